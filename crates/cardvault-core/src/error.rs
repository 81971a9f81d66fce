//! Unified error handling for CardVault
//!
//! This module provides a comprehensive error type that covers all possible
//! failure scenarios in the application, with automatic HTTP response mapping.

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

/// Main application error type
///
/// All errors in the application should be converted to this type.
/// It implements `ResponseError` for automatic HTTP response generation.
#[derive(Error, Debug, Clone)]
pub enum AppError {
    // ==================== Database Errors ====================
    #[error("Database error: {0}")]
    Database(String),

    #[error("Database pool error: {0}")]
    Pool(String),

    #[error("Transaction failed: {0}")]
    Transaction(String),

    // ==================== Cache Errors ====================
    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Cache connection failed: {0}")]
    CacheConnection(String),

    // ==================== Authentication Errors ====================
    #[error("Token expired")]
    TokenExpired,

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: insufficient permissions")]
    Forbidden,

    // ==================== Business Logic Errors ====================
    #[error("Card not found: {0}")]
    CardNotFound(String),

    #[error("Card account not found: {0}")]
    CardAccountNotFound(String),

    #[error("Ledger entry not found: {0}")]
    LedgerEntryNotFound(String),

    #[error("Card is blocked: {0}")]
    CardBlocked(String),

    #[error("Card is canceled: {0}")]
    CardCanceled(String),

    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: i64, available: i64 },

    #[error("Already processed: {0}")]
    AlreadyProcessed(String),

    #[error("Card has pending transactions: {0}")]
    PendingTransactions(String),

    #[error("Transaction cannot be disputed: {}", reasons.join("; "))]
    DisputeNotEligible { reasons: Vec<String> },

    #[error("Funding context not found: {0}")]
    FundingContextNotFound(String),

    #[error("Funding already executed: {0}")]
    FundingAlreadyExecuted(String),

    // ==================== Validation Errors ====================
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // ==================== Resource Errors ====================
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    // ==================== Concurrency Errors ====================
    #[error("Lock busy: {0}")]
    LockTimeout(String),

    // ==================== External Service Errors ====================
    #[error("Card provider error: {0}")]
    Provider(String),

    #[error("Wallet service error: {0}")]
    Wallet(String),

    #[error("Exchange service error: {0}")]
    Exchange(String),

    #[error("Charge failed after {attempts} attempts: {last_error}")]
    ChargeFailed { attempts: u32, last_error: String },

    #[error("Job queue error: {0}")]
    Queue(String),

    // ==================== Internal Errors ====================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl AppError {
    /// Returns the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            AppError::Validation(_) | AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,

            // 401 Unauthorized
            AppError::InvalidToken(_) | AppError::TokenExpired => StatusCode::UNAUTHORIZED,

            // 402 Payment Required
            AppError::InsufficientBalance { .. } => StatusCode::PAYMENT_REQUIRED,

            // 403 Forbidden
            AppError::Forbidden | AppError::Unauthorized(_) => StatusCode::FORBIDDEN,

            // 404 Not Found
            AppError::CardNotFound(_)
            | AppError::CardAccountNotFound(_)
            | AppError::LedgerEntryNotFound(_)
            | AppError::FundingContextNotFound(_)
            | AppError::NotFound(_) => StatusCode::NOT_FOUND,

            // 409 Conflict
            AppError::Conflict(_)
            | AppError::AlreadyProcessed(_)
            | AppError::PendingTransactions(_)
            | AppError::FundingAlreadyExecuted(_) => StatusCode::CONFLICT,

            // 422 Unprocessable Entity
            AppError::CardBlocked(_)
            | AppError::CardCanceled(_)
            | AppError::DisputeNotEligible { .. } => StatusCode::UNPROCESSABLE_ENTITY,

            // 423 Locked
            AppError::LockTimeout(_) => StatusCode::LOCKED,

            // 502 Bad Gateway
            AppError::Provider(_)
            | AppError::Wallet(_)
            | AppError::Exchange(_)
            | AppError::ChargeFailed { .. } => StatusCode::BAD_GATEWAY,

            // 500 Internal Server Error
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the error code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::Database(_) => "database_error",
            AppError::Pool(_) => "pool_error",
            AppError::Transaction(_) => "transaction_error",
            AppError::Cache(_) => "cache_error",
            AppError::CacheConnection(_) => "cache_connection_error",
            AppError::TokenExpired => "token_expired",
            AppError::InvalidToken(_) => "invalid_token",
            AppError::Unauthorized(_) => "unauthorized",
            AppError::Forbidden => "forbidden",
            AppError::CardNotFound(_) => "card_not_found",
            AppError::CardAccountNotFound(_) => "card_account_not_found",
            AppError::LedgerEntryNotFound(_) => "ledger_entry_not_found",
            AppError::CardBlocked(_) => "card_blocked",
            AppError::CardCanceled(_) => "card_canceled",
            AppError::InsufficientBalance { .. } => "insufficient_balance",
            AppError::AlreadyProcessed(_) => "already_processed",
            AppError::PendingTransactions(_) => "pending_transactions",
            AppError::DisputeNotEligible { .. } => "dispute_not_eligible",
            AppError::FundingContextNotFound(_) => "funding_context_not_found",
            AppError::FundingAlreadyExecuted(_) => "funding_already_executed",
            AppError::Validation(_) => "validation_error",
            AppError::InvalidInput(_) => "invalid_input",
            AppError::NotFound(_) => "not_found",
            AppError::Conflict(_) => "conflict",
            AppError::LockTimeout(_) => "lock_busy",
            AppError::Provider(_) => "provider_error",
            AppError::Wallet(_) => "wallet_error",
            AppError::Exchange(_) => "exchange_error",
            AppError::ChargeFailed { .. } => "charge_failed",
            AppError::Queue(_) => "queue_error",
            AppError::Internal(_) => "internal_error",
            AppError::Config(_) => "config_error",
            AppError::Serialization(_) => "serialization_error",
        }
    }

    /// Whether an automatic retry may succeed.
    ///
    /// Precondition failures are final; only transport-level and
    /// contention errors are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::Provider(_)
                | AppError::Wallet(_)
                | AppError::Exchange(_)
                | AppError::Database(_)
                | AppError::Pool(_)
                | AppError::Transaction(_)
                | AppError::Cache(_)
                | AppError::CacheConnection(_)
                | AppError::LockTimeout(_)
                | AppError::Queue(_)
        )
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        AppError::status_code(self)
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        let mut body = json!({
            "error": self.error_code(),
            "message": self.to_string(),
            "status": status.as_u16(),
        });

        if let AppError::DisputeNotEligible { reasons } = self {
            body["reasons"] = json!(reasons);
        }

        HttpResponse::build(status).json(body)
    }
}

// ==================== From implementations ====================

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::Validation(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(
            AppError::CardNotFound("123".to_string()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::InsufficientBalance {
                required: 1000,
                available: 500
            }
            .status_code(),
            StatusCode::PAYMENT_REQUIRED
        );
        assert_eq!(
            AppError::AlreadyProcessed("fee".to_string()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            AppError::LockTimeout("dispute:1".to_string()).status_code(),
            StatusCode::LOCKED
        );
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(AppError::TokenExpired.error_code(), "token_expired");
        assert_eq!(
            AppError::ChargeFailed {
                attempts: 3,
                last_error: "timeout".to_string()
            }
            .error_code(),
            "charge_failed"
        );
    }

    #[test]
    fn test_dispute_message_lists_reasons() {
        let err = AppError::DisputeNotEligible {
            reasons: vec!["a".to_string(), "b".to_string()],
        };
        assert_eq!(err.to_string(), "Transaction cannot be disputed: a; b");
    }

    #[test]
    fn test_retryable_split() {
        assert!(AppError::Provider("503".to_string()).is_retryable());
        assert!(AppError::LockTimeout("k".to_string()).is_retryable());
        assert!(!AppError::CardBlocked("c".to_string()).is_retryable());
        assert!(!AppError::InsufficientBalance {
            required: 1,
            available: 0
        }
        .is_retryable());
    }
}
