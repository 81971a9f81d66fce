//! Single-currency funding: request and settlement

use cardvault_cache::keys::funding_lock;
use cardvault_core::fees::FeeSchedule;
use cardvault_core::models::{
    FundingBreakdown, FundingJob, FundingRail, Job, JobOptions, Notification, PendingCredit,
    SettlementOutcome, FUNDING_QUEUE,
};
use cardvault_core::money::from_minor_units;
use cardvault_core::traits::{
    CardAccountRepository, CardLedgerRepository, CardRepository, JobQueue, LedgerStore, Notifier,
};
use cardvault_core::{AppError, AppResult};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::locks::LockManager;

/// Returned to the caller once the funding job is queued
#[derive(Debug, Clone, Serialize)]
pub struct FundingReceipt {
    pub card_transaction_id: Uuid,
    pub amount: i64,
    pub fee: i64,
    pub total: i64,
    pub rail: FundingRail,
    pub job_id: Uuid,
}

pub struct FundingService {
    cards: Arc<dyn CardRepository>,
    accounts: Arc<dyn CardAccountRepository>,
    entries: Arc<dyn CardLedgerRepository>,
    ledger: Arc<dyn LedgerStore>,
    queue: Arc<dyn JobQueue>,
    notifier: Arc<dyn Notifier>,
    locks: LockManager,
    fees: FeeSchedule,
    job_options: JobOptions,
    lock_ttl: Duration,
}

impl FundingService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cards: Arc<dyn CardRepository>,
        accounts: Arc<dyn CardAccountRepository>,
        entries: Arc<dyn CardLedgerRepository>,
        ledger: Arc<dyn LedgerStore>,
        queue: Arc<dyn JobQueue>,
        notifier: Arc<dyn Notifier>,
        locks: LockManager,
        fees: FeeSchedule,
        job_options: JobOptions,
        lock_ttl: Duration,
    ) -> Self {
        Self {
            cards,
            accounts,
            entries,
            ledger,
            queue,
            notifier,
            locks,
            fees,
            job_options,
            lock_ttl,
        }
    }

    /// Record the intended credit as PENDING and queue the rail transfer
    #[instrument(skip(self))]
    pub async fn request_funding(
        &self,
        user_id: Uuid,
        card_id: Uuid,
        amount: i64,
        rail: FundingRail,
    ) -> AppResult<FundingReceipt> {
        if amount <= 0 {
            return Err(AppError::InvalidInput(
                "Funding amount must be positive".to_string(),
            ));
        }

        let breakdown = FundingBreakdown::compute(&self.fees, amount)?;

        // Card checks and the pending credit are serialized with cancel_card
        let entry = self
            .locks
            .with_lock(&funding_lock(&card_id.to_string()), self.lock_ttl, || async {
                let card = self
                    .cards
                    .find_by_id(card_id)
                    .await?
                    .ok_or_else(|| AppError::CardNotFound(card_id.to_string()))?;
                card.ensure_owned_by(user_id)?;
                card.ensure_usable()?;

                self.accounts
                    .find_by_id(card.card_account_id)
                    .await?
                    .ok_or_else(|| {
                        AppError::CardAccountNotFound(card.card_account_id.to_string())
                    })?;

                self.ledger
                    .record_pending_credit(&PendingCredit::deposit(
                        card_id,
                        breakdown.amount,
                        format!("Card funding via {}", rail),
                    ))
                    .await
            })
            .await?;

        let job = Job::Funding(FundingJob {
            card_transaction_id: entry.id,
            user_id,
            card_id,
            amount: breakdown.amount,
            fee: breakdown.fee,
            rail,
        });

        let handle = match self.queue.enqueue(job, self.job_options).await {
            Ok(handle) => handle,
            Err(e) => {
                error!(card_transaction_id = %entry.id, error = %e, "Failed to queue funding job");
                if let Err(decline) = self
                    .entries
                    .record_failure(entry.id, "Funding job could not be queued", true)
                    .await
                {
                    warn!(card_transaction_id = %entry.id, error = %decline, "Failed to decline entry");
                }
                return Err(e);
            }
        };

        info!(
            card_transaction_id = %entry.id,
            queue = FUNDING_QUEUE,
            job_id = %handle.id,
            amount = breakdown.amount,
            fee = breakdown.fee,
            total = breakdown.total,
            rail = %rail,
            "Funding queued"
        );

        Ok(FundingReceipt {
            card_transaction_id: entry.id,
            amount: breakdown.amount,
            fee: breakdown.fee,
            total: breakdown.total,
            rail,
            job_id: handle.id,
        })
    }

    /// Credit a PENDING funding entry once its deposit has arrived.
    ///
    /// Exactly once: a repeated call returns `AlreadySettled` and changes
    /// nothing.
    #[instrument(skip(self))]
    pub async fn complete_funding(&self, card_transaction_id: Uuid) -> AppResult<SettlementOutcome> {
        let entry = self
            .entries
            .find_by_id(card_transaction_id)
            .await?
            .ok_or_else(|| AppError::LedgerEntryNotFound(card_transaction_id.to_string()))?;

        let outcome = self
            .locks
            .with_lock(&funding_lock(&entry.card_id.to_string()), self.lock_ttl, || {
                self.ledger.settle_pending_credit(card_transaction_id)
            })
            .await?;

        match &outcome {
            SettlementOutcome::Settled {
                entry, card_balance, ..
            } => {
                info!(
                    card_transaction_id = %entry.id,
                    card_id = %entry.card_id,
                    amount = entry.amount,
                    card_balance,
                    "Funding settled"
                );
                let notification = Notification::new(
                    entry.user_id,
                    "Card funded",
                    format!(
                        "{} USD was added to your card. New balance: {} USD",
                        from_minor_units(entry.amount),
                        from_minor_units(*card_balance)
                    ),
                );
                if let Err(e) = self.notifier.notify(&notification).await {
                    warn!(user_id = %entry.user_id, error = %e, "Notification failed");
                }
            }
            SettlementOutcome::AlreadySettled { entry } => {
                info!(card_transaction_id = %entry.id, "Funding already settled");
            }
        }

        Ok(outcome)
    }
}
