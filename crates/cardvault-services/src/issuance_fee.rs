//! Card issuance fee charging

use cardvault_cache::keys::issuance_fee_lock;
use cardvault_core::fees::{FeeSchedule, FeeType};
use cardvault_core::models::{BalanceMutation, EntryKind, FeeStatus, MutationOutcome};
use cardvault_core::traits::{CardRepository, LockGuard};
use cardvault_core::{AppError, AppResult};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::balance_engine::BalanceEngine;
use crate::charge::RetryingChargeExecutor;
use crate::locks::LockManager;

const ISSUANCE_FEE_DESCRIPTION: &str = "Card issuance fee";

pub struct IssuanceFeeService {
    cards: Arc<dyn CardRepository>,
    charges: RetryingChargeExecutor,
    engine: Arc<BalanceEngine>,
    locks: LockManager,
    fees: FeeSchedule,
    lock_ttl: Duration,
}

impl IssuanceFeeService {
    pub fn new(
        cards: Arc<dyn CardRepository>,
        charges: RetryingChargeExecutor,
        engine: Arc<BalanceEngine>,
        locks: LockManager,
        fees: FeeSchedule,
        lock_ttl: Duration,
    ) -> Self {
        Self {
            cards,
            charges,
            engine,
            locks,
            fees,
            lock_ttl,
        }
    }

    /// Charge the one-off issuance fee of a card.
    ///
    /// Returns `None` when the configured fee is zero (the fee is marked
    /// COMPLETED without a ledger entry). Concurrent callers serialize on the
    /// card's issuance-fee lock; all but the first observe `AlreadyProcessed`.
    #[instrument(skip(self))]
    pub async fn charge_issuance_fee(&self, card_id: Uuid) -> AppResult<Option<MutationOutcome>> {
        let guard = self
            .locks
            .acquire(&issuance_fee_lock(card_id), self.lock_ttl)
            .await?;
        let result = self.charge_locked(card_id, &guard).await;
        self.locks.release(&guard).await;
        result
    }

    async fn charge_locked(
        &self,
        card_id: Uuid,
        guard: &LockGuard,
    ) -> AppResult<Option<MutationOutcome>> {
        let card = self
            .cards
            .find_by_id(card_id)
            .await?
            .ok_or_else(|| AppError::CardNotFound(card_id.to_string()))?;

        if card.issuance_fee_status != FeeStatus::Pending {
            return Err(AppError::AlreadyProcessed(format!(
                "Issuance fee for card {} is {}",
                card_id, card.issuance_fee_status
            )));
        }
        card.ensure_usable()?;

        let fee = self.fees.calculate_minor(FeeType::CardIssuance, 0)?;
        if fee <= 0 {
            self.cards.set_fee_status(card_id, FeeStatus::Completed).await?;
            info!(card_id = %card_id, "Issuance fee waived");
            return Ok(None);
        }
        card.ensure_covers(fee)?;

        let charge = match self
            .charges
            .charge_with_retry(&card.provider_reference, fee, ISSUANCE_FEE_DESCRIPTION)
            .await
        {
            Ok(charge) => charge,
            Err(e) => {
                warn!(card_id = %card_id, error = %e, "Issuance fee charge failed, marking FAILED");
                self.cards.set_fee_status(card_id, FeeStatus::Failed).await?;
                return Err(e);
            }
        };

        let mutation = BalanceMutation::debit(card_id, fee, EntryKind::Fee)
            .describe(ISSUANCE_FEE_DESCRIPTION)
            .with_provider_reference(charge.reference.clone())
            .completing_issuance_fee();

        match self.engine.apply(guard, &mutation).await {
            Ok(outcome) => Ok(Some(outcome)),
            Err(e) => {
                error!(
                    target: "reconciliation",
                    provider_reference = %charge.reference,
                    card_id = %card_id,
                    amount = fee,
                    operation = "issuance_fee",
                    error = %e,
                    "Provider charge taken but ledger write failed"
                );
                Err(e)
            }
        }
    }
}
