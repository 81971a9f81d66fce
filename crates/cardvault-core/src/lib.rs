//! CardVault Core Library
//!
//! This crate provides the foundational types, traits, and error handling
//! for the CardVault prepaid-card ledger. It includes:
//!
//! - Domain models (Card, CardAccount, ledger entries, disputes, funding context)
//! - Pure ledger logic (mutation planning, fee calculation, dispute eligibility)
//! - Repository and external collaborator traits
//! - Unified error handling with HTTP response mapping
//! - Application configuration

pub mod config;
pub mod error;
pub mod fees;
pub mod idempotency;
pub mod models;
pub mod money;
pub mod traits;

pub use config::AppConfig;
pub use error::AppError;

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;
