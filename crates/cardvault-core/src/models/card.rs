//! Card and card-account models
//!
//! A card's balance is only ever rewritten by the ledger store while the
//! card lock is held; these types carry the checks every writer shares.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::{AppError, AppResult};

/// Card status enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CardStatus {
    /// Card is live and can be funded or charged
    #[default]
    Active,
    /// Issued but not yet activated by the holder
    Inactive,
    /// Blocked by the provider or by compliance
    Blocked,
    /// Permanently closed (terminal)
    Canceled,
}

impl fmt::Display for CardStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CardStatus::Active => write!(f, "ACTIVE"),
            CardStatus::Inactive => write!(f, "INACTIVE"),
            CardStatus::Blocked => write!(f, "BLOCKED"),
            CardStatus::Canceled => write!(f, "CANCELED"),
        }
    }
}

impl CardStatus {
    /// Parse from string (case-insensitive)
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "ACTIVE" => Some(CardStatus::Active),
            "INACTIVE" => Some(CardStatus::Inactive),
            "BLOCKED" => Some(CardStatus::Blocked),
            "CANCELED" | "CANCELLED" => Some(CardStatus::Canceled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, CardStatus::Canceled)
    }
}

/// Issuance-fee status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FeeStatus {
    #[default]
    Pending,
    Completed,
    Failed,
}

impl fmt::Display for FeeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeeStatus::Pending => write!(f, "PENDING"),
            FeeStatus::Completed => write!(f, "COMPLETED"),
            FeeStatus::Failed => write!(f, "FAILED"),
        }
    }
}

impl FeeStatus {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "PENDING" => Some(FeeStatus::Pending),
            "COMPLETED" => Some(FeeStatus::Completed),
            "FAILED" => Some(FeeStatus::Failed),
            _ => None,
        }
    }
}

/// Provider-issued card
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Card {
    /// Unique identifier
    pub id: Uuid,

    /// Owning card account
    pub card_account_id: Uuid,

    /// End user owning the card account
    pub user_id: Uuid,

    /// Card id at the issuing provider
    pub provider_reference: String,

    pub status: CardStatus,

    /// Balance in minor units
    pub balance: i64,

    pub is_frozen: bool,

    pub issuance_fee_status: FeeStatus,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Card {
    /// Reject cards that can no longer move money
    pub fn ensure_usable(&self) -> AppResult<()> {
        match self.status {
            CardStatus::Canceled => Err(AppError::CardCanceled(self.id.to_string())),
            CardStatus::Blocked => Err(AppError::CardBlocked(self.id.to_string())),
            _ => Ok(()),
        }
    }

    /// Reject cards that belong to someone else
    pub fn ensure_owned_by(&self, user_id: Uuid) -> AppResult<()> {
        if self.user_id != user_id {
            return Err(AppError::CardNotFound(self.id.to_string()));
        }
        Ok(())
    }

    /// Reject a debit the balance cannot cover
    pub fn ensure_covers(&self, amount: i64) -> AppResult<()> {
        if self.balance < amount {
            return Err(AppError::InsufficientBalance {
                required: amount,
                available: self.balance,
            });
        }
        Ok(())
    }
}

impl Default for Card {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            card_account_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            provider_reference: String::new(),
            status: CardStatus::Active,
            balance: 0,
            is_frozen: false,
            issuance_fee_status: FeeStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Card account ("card user"): one per end user
///
/// `balance` mirrors the effects applied to the user's cards; it is updated
/// in the same transaction as the card, never recomputed by summing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CardAccount {
    pub id: Uuid,
    pub user_id: Uuid,

    /// Card-holder id at the issuing provider
    pub provider_reference: String,

    /// Mirrored balance in minor units
    pub balance: i64,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Default for CardAccount {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            provider_reference: String::new(),
            balance: 0,
            created_at: now,
            updated_at: now,
        }
    }
}
