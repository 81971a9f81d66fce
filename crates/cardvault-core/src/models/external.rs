//! Request and response shapes exchanged with external collaborators

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::card::CardStatus;
use super::dispute::DisputeStatus;

/// Charge accepted by the card provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderCharge {
    pub reference: String,
}

/// Dispute opened at the card provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderDispute {
    pub reference: String,
    pub status: DisputeStatus,
}

/// Patch sent to the provider for a card
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frozen: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<CardStatus>,
}

impl CardUpdate {
    pub fn frozen(frozen: bool) -> Self {
        Self {
            frozen: Some(frozen),
            status: None,
        }
    }

    pub fn canceled() -> Self {
        Self {
            frozen: Some(true),
            status: Some(CardStatus::Canceled),
        }
    }
}

/// Fiat wallet transfer to an on-chain deposit address
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FiatTransferRequest {
    /// Minor units, fee included
    pub amount: i64,
    pub fee: i64,
    pub asset: String,
    pub network: String,
    pub destination_address: String,
    pub idempotency_key: String,
    pub narration: Option<String>,
}

/// Blockchain wallet send
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockchainTransferRequest {
    pub asset_id: String,
    pub network: String,
    /// Minor units
    pub amount: i64,
    pub peer_address: String,
    pub idempotency_key: String,
}

/// Reference returned by either rail
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RailTransfer {
    pub reference: String,
}

/// Quote request for a currency exchange into the settlement asset
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeQuoteRequest {
    pub user_id: Uuid,
    pub from_currency: String,
    pub to_currency: String,
    pub amount: Decimal,
    pub rate_id: Option<String>,
    pub destination_address: String,
}

/// Quote issued by the exchange service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeQuote {
    pub reference: String,
    pub from_currency: String,
    pub source_amount: Decimal,
    pub usd_amount_after_exchange: Decimal,
    pub exchange_fee: Decimal,
}

/// State of an exchange execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExchangeStatus {
    Completed,
    Processing,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeExecution {
    pub reference: String,
    pub status: ExchangeStatus,
    pub failure_reason: Option<String>,
}

/// Best-effort user notification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub user_id: Uuid,
    pub title: String,
    pub body: String,
}

impl Notification {
    pub fn new(user_id: Uuid, title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            user_id,
            title: title.into(),
            body: body.into(),
        }
    }
}
