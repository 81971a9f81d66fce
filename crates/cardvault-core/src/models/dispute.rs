//! Dispute models and eligibility rules

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::ledger::{CardLedgerEntry, EntryKind, EntryStatus};

/// Merchant category code for automated cash disbursements
pub const ATM_MERCHANT_CATEGORY_CODE: &str = "6011";

/// Default dispute window in days
pub const DEFAULT_DISPUTE_WINDOW_DAYS: i64 = 60;

/// Dispute status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DisputeStatus {
    #[default]
    Pending,
    UnderReview,
    Accepted,
    Rejected,
    Won,
    Lost,
    Canceled,
}

impl fmt::Display for DisputeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DisputeStatus::Pending => "PENDING",
            DisputeStatus::UnderReview => "UNDER_REVIEW",
            DisputeStatus::Accepted => "ACCEPTED",
            DisputeStatus::Rejected => "REJECTED",
            DisputeStatus::Won => "WON",
            DisputeStatus::Lost => "LOST",
            DisputeStatus::Canceled => "CANCELED",
        };
        write!(f, "{}", s)
    }
}

impl DisputeStatus {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "PENDING" => Some(DisputeStatus::Pending),
            "UNDER_REVIEW" => Some(DisputeStatus::UnderReview),
            "ACCEPTED" => Some(DisputeStatus::Accepted),
            "REJECTED" => Some(DisputeStatus::Rejected),
            "WON" => Some(DisputeStatus::Won),
            "LOST" => Some(DisputeStatus::Lost),
            "CANCELED" | "CANCELLED" => Some(DisputeStatus::Canceled),
            _ => None,
        }
    }

    /// Resolved outcomes; at most one non-terminal dispute per entry
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DisputeStatus::Accepted
                | DisputeStatus::Rejected
                | DisputeStatus::Won
                | DisputeStatus::Lost
                | DisputeStatus::Canceled
        )
    }
}

/// Dispute opened against one card ledger entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dispute {
    pub id: Uuid,

    /// The disputed spend entry
    pub card_entry_id: Uuid,

    pub card_id: Uuid,
    pub user_id: Uuid,

    /// Ledger entry that recorded the dispute fee
    pub fee_entry_id: Option<Uuid>,

    /// Dispute id at the card provider
    pub provider_reference: String,

    pub status: DisputeStatus,
    pub evidence: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Dispute audit event type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisputeEventType {
    Created,
    StatusChanged,
}

impl fmt::Display for DisputeEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisputeEventType::Created => write!(f, "created"),
            DisputeEventType::StatusChanged => write!(f, "status_changed"),
        }
    }
}

impl DisputeEventType {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "created" => Some(DisputeEventType::Created),
            "status_changed" => Some(DisputeEventType::StatusChanged),
            _ => None,
        }
    }
}

/// Append-only dispute audit entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisputeEvent {
    pub id: Uuid,
    pub dispute_id: Uuid,
    pub event_type: DisputeEventType,
    pub from_status: Option<DisputeStatus>,
    pub to_status: DisputeStatus,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl DisputeEvent {
    pub fn created(dispute: &Dispute) -> Self {
        Self {
            id: Uuid::new_v4(),
            dispute_id: dispute.id,
            event_type: DisputeEventType::Created,
            from_status: None,
            to_status: dispute.status,
            note: None,
            created_at: dispute.created_at,
        }
    }
}

/// What the ledger store needs to persist a new dispute alongside its fee
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisputeDraft {
    pub card_entry_id: Uuid,
    pub provider_reference: String,
    pub status: DisputeStatus,
    pub evidence: Option<String>,
}

/// Result of an eligibility check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisputeEligibility {
    pub can_dispute: bool,
    pub reasons: Vec<String>,
}

fn has_atm_token(text: &str) -> bool {
    text.split(|c: char| !c.is_ascii_alphanumeric())
        .any(|token| token.eq_ignore_ascii_case("atm"))
}

/// Whether an entry looks like a cash-machine withdrawal
pub fn is_atm_transaction(entry: &CardLedgerEntry) -> bool {
    let text_fields = [
        entry.merchant_name.as_deref(),
        entry.merchant_category.as_deref(),
        entry.description.as_deref(),
    ];

    if text_fields.iter().flatten().any(|t| has_atm_token(t)) {
        return true;
    }

    if let Some(category) = entry.merchant_category.as_deref() {
        if category.to_lowercase().contains("cash withdrawal") {
            return true;
        }
    }

    entry.merchant_category_code.as_deref().map(str::trim) == Some(ATM_MERCHANT_CATEGORY_CODE)
}

/// Evaluate whether `entry` may be disputed at `now`.
///
/// `open_dispute` is any existing dispute for the entry; a terminal one does
/// not block a new dispute.
pub fn evaluate_eligibility(
    entry: &CardLedgerEntry,
    open_dispute: Option<&Dispute>,
    now: DateTime<Utc>,
    window_days: i64,
) -> DisputeEligibility {
    let mut reasons = Vec::new();

    match entry.kind {
        EntryKind::Spend => {}
        EntryKind::Refund | EntryKind::Reversal => {
            reasons.push("Refunds and reversals cannot be disputed".to_string())
        }
        _ => reasons.push("Only card spend transactions can be disputed".to_string()),
    }

    if entry.status != EntryStatus::Successful {
        reasons.push("Only settled transactions can be disputed".to_string());
    }

    if is_atm_transaction(entry) {
        reasons.push("ATM transactions cannot be disputed".to_string());
    }

    if now - entry.created_at > Duration::days(window_days) {
        reasons.push(format!(
            "Transaction is older than {} days",
            window_days
        ));
    }

    if open_dispute.is_some_and(|d| !d.status.is_terminal()) {
        reasons.push("A dispute is already open for this transaction".to_string());
    }

    DisputeEligibility {
        can_dispute: reasons.is_empty(),
        reasons,
    }
}
