//! Funding DTOs
//!
//! Amounts arrive as decimal major units and are converted to ledger minor
//! units before reaching the services.

use cardvault_core::models::{FundingContext, FundingRail, SettlementOutcome};
use cardvault_core::money::from_minor_units;
use cardvault_core::{AppError, AppResult};
use cardvault_services::{ExchangeFundingReceipt, FundingReceipt, QuoteRequest};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::common::validate_positive_amount;
use super::transaction::TransactionResponse;

/// Single-currency funding request
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct FundCardRequest {
    /// USD to credit, before the funding fee
    #[validate(custom(function = "validate_positive_amount"))]
    pub amount: Decimal,

    /// `FIAT` or `BLOCKCHAIN`
    #[validate(length(min = 1, max = 20))]
    pub rail: String,
}

impl FundCardRequest {
    pub fn rail(&self) -> AppResult<FundingRail> {
        FundingRail::from_str(&self.rail)
            .ok_or_else(|| AppError::Validation(format!("Unknown funding rail '{}'", self.rail)))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FundingResponse {
    pub card_transaction_id: Uuid,
    pub amount: Decimal,
    pub fee: Decimal,
    pub total: Decimal,
    pub rail: FundingRail,
    pub job_id: Uuid,
}

impl From<FundingReceipt> for FundingResponse {
    fn from(receipt: FundingReceipt) -> Self {
        Self {
            card_transaction_id: receipt.card_transaction_id,
            amount: from_minor_units(receipt.amount),
            fee: from_minor_units(receipt.fee),
            total: from_minor_units(receipt.total),
            rail: receipt.rail,
            job_id: receipt.job_id,
        }
    }
}

/// Quote request for a cross-currency funding
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct InitializeExchangeRequest {
    #[validate(length(min = 3, max = 10))]
    pub from_currency: String,

    /// Major units of `from_currency`
    #[validate(custom(function = "validate_positive_amount"))]
    pub amount: Decimal,

    #[validate(length(min = 1, max = 100))]
    pub rate_id: Option<String>,
}

impl From<InitializeExchangeRequest> for QuoteRequest {
    fn from(req: InitializeExchangeRequest) -> Self {
        Self {
            from_currency: req.from_currency.to_uppercase(),
            amount: req.amount,
            rate_id: req.rate_id,
        }
    }
}

/// Quoted figures shown to the user before execution
#[derive(Debug, Clone, Serialize)]
pub struct ExchangeQuoteResponse {
    pub exchange_reference: String,
    pub from_currency: String,
    pub source_amount: Decimal,
    pub usd_amount_after_exchange: Decimal,
    pub exchange_fee: Decimal,
    pub card_fee_usd: Decimal,
    pub net_usd_amount: Decimal,
    pub created_at: DateTime<Utc>,
}

impl From<FundingContext> for ExchangeQuoteResponse {
    fn from(context: FundingContext) -> Self {
        Self {
            exchange_reference: context.exchange_reference,
            from_currency: context.from_currency,
            source_amount: context.source_amount,
            usd_amount_after_exchange: context.usd_amount_after_exchange,
            exchange_fee: context.exchange_fee,
            card_fee_usd: context.card_fee_usd,
            net_usd_amount: context.net_usd_amount,
            created_at: context.created_at,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ExecuteExchangeRequest {
    #[validate(length(min = 1, max = 100))]
    pub exchange_reference: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExchangeFundingResponse {
    pub card_transaction_id: Uuid,
    pub exchange_reference: String,
    pub amount: Decimal,
    pub job_id: Uuid,
}

impl From<ExchangeFundingReceipt> for ExchangeFundingResponse {
    fn from(receipt: ExchangeFundingReceipt) -> Self {
        Self {
            card_transaction_id: receipt.card_transaction_id,
            exchange_reference: receipt.exchange_reference,
            amount: from_minor_units(receipt.amount),
            job_id: receipt.job_id,
        }
    }
}

/// Result of a settlement call
#[derive(Debug, Clone, Serialize)]
pub struct SettlementResponse {
    /// `false` when the credit had already been applied
    pub settled_now: bool,
    pub transaction: TransactionResponse,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub card_balance: Option<Decimal>,
}

impl From<SettlementOutcome> for SettlementResponse {
    fn from(outcome: SettlementOutcome) -> Self {
        match outcome {
            SettlementOutcome::Settled {
                entry, card_balance, ..
            } => Self {
                settled_now: true,
                transaction: entry.into(),
                card_balance: Some(from_minor_units(card_balance)),
            },
            SettlementOutcome::AlreadySettled { entry } => Self {
                settled_now: false,
                transaction: entry.into(),
                card_balance: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_fund_request_validation() {
        let ok = FundCardRequest {
            amount: dec!(100),
            rail: "fiat".to_string(),
        };
        assert!(ok.validate().is_ok());
        assert_eq!(ok.rail().unwrap(), FundingRail::Fiat);

        let zero = FundCardRequest {
            amount: dec!(0),
            rail: "FIAT".to_string(),
        };
        assert!(zero.validate().is_err());

        let unknown = FundCardRequest {
            amount: dec!(1),
            rail: "cheque".to_string(),
        };
        assert!(matches!(unknown.rail(), Err(AppError::Validation(_))));
    }

    #[test]
    fn test_quote_request_uppercases_currency() {
        let req = InitializeExchangeRequest {
            from_currency: "ngn".to_string(),
            amount: dec!(25000),
            rate_id: None,
        };
        assert!(req.validate().is_ok());

        let quote = QuoteRequest::from(req);
        assert_eq!(quote.from_currency, "NGN");
    }

    #[test]
    fn test_funding_response_major_units() {
        let response = FundingResponse::from(FundingReceipt {
            card_transaction_id: Uuid::new_v4(),
            amount: 10000,
            fee: 100,
            total: 10100,
            rail: FundingRail::Blockchain,
            job_id: Uuid::new_v4(),
        });

        assert_eq!(response.total, dec!(101.00));
        assert_eq!(response.fee, dec!(1.00));
    }
}
