//! Funding models: rails, fee breakdowns and the cross-currency escrow context

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::fees::{FeeSchedule, FeeType};
use crate::money::{floor_cents, floor_to_minor_units};
use crate::{AppError, AppResult};

/// Transport used to move funds into a card
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FundingRail {
    Fiat,
    Blockchain,
}

impl fmt::Display for FundingRail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FundingRail::Fiat => write!(f, "FIAT"),
            FundingRail::Blockchain => write!(f, "BLOCKCHAIN"),
        }
    }
}

impl FundingRail {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "FIAT" => Some(FundingRail::Fiat),
            "BLOCKCHAIN" | "CRYPTO" => Some(FundingRail::Blockchain),
            _ => None,
        }
    }
}

/// Single-currency funding amounts in minor units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundingBreakdown {
    /// Credited to the card
    pub amount: i64,
    /// Kept as the funding fee, never below the configured minimum
    pub fee: i64,
    /// Moved off the rail: `amount + fee`
    pub total: i64,
}

impl FundingBreakdown {
    pub fn compute(schedule: &FeeSchedule, amount: i64) -> AppResult<Self> {
        let fee = schedule.with_minimum(schedule.calculate_minor(FeeType::CardFunding, amount)?);
        let total = amount.checked_add(fee).ok_or_else(|| {
            AppError::InvalidInput(format!("Funding amount {} is too large", amount))
        })?;
        Ok(Self { amount, fee, total })
    }
}

/// Card-side figures of a cross-currency quote, in USD
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CrossCurrencyBreakdown {
    pub usd_amount_after_exchange: Decimal,
    /// Raw card funding fee
    pub card_fee: Decimal,
    /// Card fee floored to cents
    pub card_fee_usd: Decimal,
    /// What the card is credited, floored to cents
    pub net_usd_amount: Decimal,
}

impl CrossCurrencyBreakdown {
    /// Derive the card fee and net credit from the exchanged USD amount.
    ///
    /// Both legs are floored to whole cents so the card is never promised a
    /// fraction of a cent the provider cannot settle.
    pub fn compute(schedule: &FeeSchedule, usd_amount_after_exchange: Decimal) -> Self {
        let card_fee = schedule
            .calculate(FeeType::CrossCurrencyFunding, usd_amount_after_exchange)
            .fee;
        let net = floor_cents(floor_cents(usd_amount_after_exchange) - card_fee);

        Self {
            usd_amount_after_exchange,
            card_fee,
            card_fee_usd: floor_cents(card_fee),
            net_usd_amount: net.max(Decimal::ZERO),
        }
    }

    pub fn net_minor_units(&self) -> AppResult<i64> {
        floor_to_minor_units(self.net_usd_amount)
    }
}

/// Escrow state handed from "initialize" to "execute" of a cross-currency
/// funding. Keyed by the exchange reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundingContext {
    pub exchange_reference: String,
    pub user_id: Uuid,
    pub card_id: Uuid,
    pub card_account_id: Uuid,

    pub from_currency: String,
    pub source_amount: Decimal,

    pub usd_amount_after_exchange: Decimal,
    pub exchange_fee: Decimal,
    pub card_fee: Decimal,
    pub card_fee_usd: Decimal,
    pub net_usd_amount: Decimal,

    pub network: String,
    pub deposit_address: String,

    /// Set once by "execute"; presence means the context is consumed
    pub card_transaction_id: Option<Uuid>,

    pub created_at: DateTime<Utc>,
    pub executed_at: Option<DateTime<Utc>>,
}

impl FundingContext {
    pub fn is_executed(&self) -> bool {
        self.card_transaction_id.is_some()
    }

    pub fn apply(&mut self, update: &FundingContextUpdate) {
        if let Some(id) = update.card_transaction_id {
            self.card_transaction_id = Some(id);
        }
        if let Some(at) = update.executed_at {
            self.executed_at = Some(at);
        }
    }
}

/// Partial update of a stored [`FundingContext`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FundingContextUpdate {
    pub card_transaction_id: Option<Uuid>,
    pub executed_at: Option<DateTime<Utc>>,
}
