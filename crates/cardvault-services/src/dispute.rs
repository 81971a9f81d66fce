//! Dispute Service
//!
//! Eligibility checks and dispute creation. Creation runs under the card's
//! dispute lock: the fee is charged at the provider, the dispute is opened
//! there, then the fee debit, dispute row and its first event are committed
//! in one ledger transaction.

use cardvault_cache::keys::dispute_lock;
use cardvault_core::config::DisputeConfig;
use cardvault_core::fees::{FeeSchedule, FeeType};
use cardvault_core::models::{
    evaluate_eligibility, BalanceMutation, CardLedgerEntry, Dispute, DisputeDraft,
    DisputeEligibility, DisputeEvent, EntryKind,
};
use cardvault_core::traits::{CardLedgerRepository, CardProvider, CardRepository, DisputeRepository, LockGuard};
use cardvault_core::{AppError, AppResult};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument};
use uuid::Uuid;

use crate::balance_engine::BalanceEngine;
use crate::charge::RetryingChargeExecutor;
use crate::locks::LockManager;

/// A dispute with its audit trail
#[derive(Debug, Clone, Serialize)]
pub struct DisputeDetails {
    pub dispute: Dispute,
    pub events: Vec<DisputeEvent>,
}

/// Rows written when a dispute is opened
#[derive(Debug, Clone, Serialize)]
pub struct DisputeCreated {
    pub dispute: Dispute,
    pub event: DisputeEvent,
    pub fee_entry: CardLedgerEntry,
    pub card_balance: i64,
}

pub struct DisputeService {
    cards: Arc<dyn CardRepository>,
    entries: Arc<dyn CardLedgerRepository>,
    disputes: Arc<dyn DisputeRepository>,
    provider: Arc<dyn CardProvider>,
    charges: RetryingChargeExecutor,
    engine: Arc<BalanceEngine>,
    locks: LockManager,
    fees: FeeSchedule,
    config: DisputeConfig,
    lock_ttl: Duration,
}

impl DisputeService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cards: Arc<dyn CardRepository>,
        entries: Arc<dyn CardLedgerRepository>,
        disputes: Arc<dyn DisputeRepository>,
        provider: Arc<dyn CardProvider>,
        charges: RetryingChargeExecutor,
        engine: Arc<BalanceEngine>,
        locks: LockManager,
        fees: FeeSchedule,
        config: DisputeConfig,
        lock_ttl: Duration,
    ) -> Self {
        Self {
            cards,
            entries,
            disputes,
            provider,
            charges,
            engine,
            locks,
            fees,
            config,
            lock_ttl,
        }
    }

    /// Card ledger entry owned by `user_id`
    pub async fn find_transaction(&self, user_id: Uuid, entry_id: Uuid) -> AppResult<CardLedgerEntry> {
        let entry = self
            .entries
            .find_by_id(entry_id)
            .await?
            .filter(|e| e.user_id == user_id)
            .ok_or_else(|| AppError::LedgerEntryNotFound(entry_id.to_string()))?;
        Ok(entry)
    }

    async fn eligibility_of(&self, entry: &CardLedgerEntry) -> AppResult<DisputeEligibility> {
        let open = self.disputes.find_open_by_entry(entry.id).await?;
        Ok(evaluate_eligibility(
            entry,
            open.as_ref(),
            Utc::now(),
            self.config.window_days,
        ))
    }

    #[instrument(skip(self))]
    pub async fn eligibility(&self, user_id: Uuid, entry_id: Uuid) -> AppResult<DisputeEligibility> {
        let entry = self.find_transaction(user_id, entry_id).await?;
        self.eligibility_of(&entry).await
    }

    /// Open a dispute on a card spend and charge the dispute fee
    #[instrument(skip(self, evidence))]
    pub async fn create_dispute(
        &self,
        user_id: Uuid,
        entry_id: Uuid,
        evidence: Option<String>,
    ) -> AppResult<DisputeCreated> {
        let entry = self.find_transaction(user_id, entry_id).await?;

        let guard = self
            .locks
            .acquire(&dispute_lock(entry.card_id), self.lock_ttl)
            .await?;
        let result = self.create_locked(user_id, entry_id, evidence, &guard).await;
        self.locks.release(&guard).await;
        result
    }

    async fn create_locked(
        &self,
        user_id: Uuid,
        entry_id: Uuid,
        evidence: Option<String>,
        guard: &LockGuard,
    ) -> AppResult<DisputeCreated> {
        let entry = self.find_transaction(user_id, entry_id).await?;
        let eligibility = self.eligibility_of(&entry).await?;
        if !eligibility.can_dispute {
            return Err(AppError::DisputeNotEligible {
                reasons: eligibility.reasons,
            });
        }

        let transaction_reference = entry.provider_reference.clone().ok_or_else(|| {
            AppError::InvalidInput(format!(
                "Transaction {} has no provider reference to dispute",
                entry.id
            ))
        })?;

        let card = self
            .cards
            .find_by_id(entry.card_id)
            .await?
            .ok_or_else(|| AppError::CardNotFound(entry.card_id.to_string()))?;
        card.ensure_usable()?;

        let fee = self
            .fees
            .with_minimum(self.fees.calculate_minor(FeeType::Dispute, entry.amount)?);
        card.ensure_covers(fee)?;

        let charge = self
            .charges
            .charge_with_retry(&card.provider_reference, fee, "Dispute fee")
            .await?;

        let provider_dispute = match self
            .provider
            .create_dispute(&transaction_reference, evidence.as_deref())
            .await
        {
            Ok(dispute) => dispute,
            Err(e) => {
                error!(
                    target: "reconciliation",
                    provider_reference = %charge.reference,
                    card_id = %card.id,
                    amount = fee,
                    operation = "dispute_fee",
                    error = %e,
                    "Dispute fee charged but provider dispute was not opened"
                );
                return Err(e);
            }
        };

        let mutation = BalanceMutation::debit(card.id, fee, EntryKind::Fee)
            .describe(format!("Dispute fee for transaction {}", entry.id))
            .with_provider_reference(charge.reference.clone())
            .opening_dispute(DisputeDraft {
                card_entry_id: entry.id,
                provider_reference: provider_dispute.reference.clone(),
                status: provider_dispute.status,
                evidence,
            });

        let outcome = match self.engine.apply(guard, &mutation).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(
                    target: "reconciliation",
                    provider_reference = %charge.reference,
                    card_id = %card.id,
                    amount = fee,
                    operation = "dispute_fee",
                    dispute_reference = %provider_dispute.reference,
                    error = %e,
                    "Dispute opened at provider but ledger write failed"
                );
                return Err(e);
            }
        };

        let (dispute, event) = match (outcome.dispute, outcome.dispute_event) {
            (Some(dispute), Some(event)) => (dispute, event),
            _ => {
                return Err(AppError::Internal(
                    "Ledger store did not return the dispute rows".to_string(),
                ))
            }
        };

        info!(
            dispute_id = %dispute.id,
            card_entry_id = %entry.id,
            card_id = %card.id,
            fee,
            "Dispute created"
        );

        Ok(DisputeCreated {
            dispute,
            event,
            fee_entry: outcome.card_entry,
            card_balance: outcome.card_balance,
        })
    }

    /// Dispute owned by `user_id` with its events, oldest first
    #[instrument(skip(self))]
    pub async fn get_dispute(&self, user_id: Uuid, dispute_id: Uuid) -> AppResult<DisputeDetails> {
        let dispute = self
            .disputes
            .find_by_id(dispute_id)
            .await?
            .filter(|d| d.user_id == user_id)
            .ok_or_else(|| AppError::NotFound(format!("Dispute {}", dispute_id)))?;
        let events = self.disputes.events(dispute.id).await?;
        Ok(DisputeDetails { dispute, events })
    }
}
