//! CardVault Database Layer
//!
//! PostgreSQL access for the card ledger:
//!
//! - Connection pool management with sqlx
//! - Read/update repositories for cards, card accounts, ledger entries and disputes
//! - `PgLedgerStore`, the transactional writer behind every balance change
//! - `PgJobStore`, the rows behind the funding job queue
//! - Embedded SQL migrations

pub mod ledger_store;
pub mod pool;
pub mod repositories;

pub use ledger_store::PgLedgerStore;
pub use pool::{create_pool, run_migrations};
pub use repositories::*;

// Re-export commonly used types
pub use cardvault_core::{AppError, AppResult};
pub use sqlx::{PgPool, Postgres, Transaction};
