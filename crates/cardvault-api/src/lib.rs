//! API layer for CardVault
//!
//! HTTP handlers for card funding, lifecycle operations and disputes. Every
//! route except the health check requires a bearer token.

#![forbid(unsafe_code)]

pub mod dto;
pub mod handlers;
pub mod state;

pub use dto::ApiResponse;
pub use handlers::configure;
pub use state::AppState;
