//! Data Transfer Objects (DTOs) for API requests and responses

pub mod card;
pub mod common;
pub mod funding;
pub mod transaction;

pub use card::*;
pub use common::*;
pub use funding::*;
pub use transaction::*;
