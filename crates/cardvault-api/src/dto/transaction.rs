//! Ledger entry and dispute DTOs

use cardvault_core::models::{
    CardLedgerEntry, Dispute, DisputeEvent, DisputeEventType, DisputeStatus, EntryDirection,
    EntryKind, EntryStatus,
};
use cardvault_core::money::from_minor_units;
use cardvault_services::{DisputeCreated, DisputeDetails};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// Card ledger entry
#[derive(Debug, Clone, Serialize)]
pub struct TransactionResponse {
    pub id: Uuid,
    pub card_id: Uuid,
    pub amount: Decimal,
    pub direction: EntryDirection,
    pub kind: EntryKind,
    pub status: EntryStatus,
    pub balance_before: Decimal,
    pub balance_after: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merchant_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub linked_transaction_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl From<CardLedgerEntry> for TransactionResponse {
    fn from(entry: CardLedgerEntry) -> Self {
        Self {
            id: entry.id,
            card_id: entry.card_id,
            amount: from_minor_units(entry.amount),
            direction: entry.direction,
            kind: entry.kind,
            status: entry.status,
            balance_before: from_minor_units(entry.balance_before),
            balance_after: from_minor_units(entry.balance_after),
            description: entry.description,
            merchant_name: entry.merchant_name,
            failure_reason: entry.failure_reason,
            linked_transaction_id: entry.linked_entry_id,
            created_at: entry.created_at,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct CreateDisputeRequest {
    #[validate(length(max = 5000, message = "Evidence must be at most 5000 characters"))]
    pub evidence: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DisputeEventResponse {
    pub event_type: DisputeEventType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_status: Option<DisputeStatus>,
    pub to_status: DisputeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<DisputeEvent> for DisputeEventResponse {
    fn from(event: DisputeEvent) -> Self {
        Self {
            event_type: event.event_type,
            from_status: event.from_status,
            to_status: event.to_status,
            note: event.note,
            created_at: event.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DisputeResponse {
    pub id: Uuid,
    pub transaction_id: Uuid,
    pub card_id: Uuid,
    pub status: DisputeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fee_transaction_id: Option<Uuid>,
    pub events: Vec<DisputeEventResponse>,
    pub created_at: DateTime<Utc>,
}

impl DisputeResponse {
    fn build(dispute: Dispute, events: Vec<DisputeEvent>) -> Self {
        Self {
            id: dispute.id,
            transaction_id: dispute.card_entry_id,
            card_id: dispute.card_id,
            status: dispute.status,
            evidence: dispute.evidence,
            fee_transaction_id: dispute.fee_entry_id,
            events: events.into_iter().map(Into::into).collect(),
            created_at: dispute.created_at,
        }
    }
}

impl From<DisputeDetails> for DisputeResponse {
    fn from(details: DisputeDetails) -> Self {
        Self::build(details.dispute, details.events)
    }
}

impl From<DisputeCreated> for DisputeResponse {
    fn from(created: DisputeCreated) -> Self {
        Self::build(created.dispute, vec![created.event])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_response_major_units() {
        let entry = CardLedgerEntry {
            amount: 2599,
            balance_before: 10000,
            balance_after: 7401,
            direction: EntryDirection::Debit,
            ..Default::default()
        };

        let response = TransactionResponse::from(entry);
        assert_eq!(response.amount.to_string(), "25.99");
        assert_eq!(response.balance_after.to_string(), "74.01");
    }

    #[test]
    fn test_evidence_length_is_bounded() {
        let ok = CreateDisputeRequest {
            evidence: Some("Never delivered".to_string()),
        };
        assert!(ok.validate().is_ok());

        let too_long = CreateDisputeRequest {
            evidence: Some("x".repeat(5001)),
        };
        assert!(too_long.validate().is_err());
    }
}
