//! Card DTOs
//!
//! Request and response types for card lifecycle endpoints.

use cardvault_core::models::{BalanceTransfer, Card, CardStatus, FeeStatus};
use cardvault_core::money::from_minor_units;
use cardvault_services::ReissueOutcome;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::transaction::TransactionResponse;

/// Re-issue request: the replacement card receives the balance
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ReissueRequest {
    pub new_card_id: Uuid,
}

/// Card as returned to its holder
#[derive(Debug, Clone, Serialize)]
pub struct CardResponse {
    pub id: Uuid,
    pub card_account_id: Uuid,
    pub status: CardStatus,
    /// Major units
    pub balance: Decimal,
    pub is_frozen: bool,
    pub issuance_fee_status: FeeStatus,
    pub updated_at: DateTime<Utc>,
}

impl From<Card> for CardResponse {
    fn from(card: Card) -> Self {
        Self {
            id: card.id,
            card_account_id: card.card_account_id,
            status: card.status,
            balance: from_minor_units(card.balance),
            is_frozen: card.is_frozen,
            issuance_fee_status: card.issuance_fee_status,
            updated_at: card.updated_at,
        }
    }
}

/// Both legs of a balance hand-over
#[derive(Debug, Clone, Serialize)]
pub struct TransferResponse {
    pub source: TransactionResponse,
    pub destination: TransactionResponse,
}

impl From<BalanceTransfer> for TransferResponse {
    fn from(transfer: BalanceTransfer) -> Self {
        Self {
            source: transfer.source_entry.into(),
            destination: transfer.destination_entry.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReissueResponse {
    pub canceled_card: CardResponse,
    pub replacement_card: CardResponse,
    /// Absent for a zero balance or a failed hand-over
    pub transfer: Option<TransferResponse>,
}

impl From<ReissueOutcome> for ReissueResponse {
    fn from(outcome: ReissueOutcome) -> Self {
        Self {
            canceled_card: outcome.canceled_card.into(),
            replacement_card: outcome.replacement_card.into(),
            transfer: outcome.transfer.map(Into::into),
        }
    }
}
