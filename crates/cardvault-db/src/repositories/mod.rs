//! Repository implementations
//!
//! This module contains concrete implementations of the repository traits
//! defined in cardvault-core, using sqlx for PostgreSQL access.

pub mod card_repo;
pub mod dispute_repo;
pub mod job_repo;
pub mod ledger_repo;

pub use card_repo::{PgCardAccountRepository, PgCardRepository};
pub use dispute_repo::PgDisputeRepository;
pub use job_repo::PgJobStore;
pub use ledger_repo::PgCardLedgerRepository;
