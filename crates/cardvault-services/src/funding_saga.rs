//! Funding saga job handler
//!
//! Runs the asynchronous half of both funding flows. A queue retry re-enters
//! with the same card transaction id and therefore the same idempotency key,
//! so the rails can deduplicate the transfer.

use async_trait::async_trait;
use cardvault_cache::keys::funding_lock;
use cardvault_core::config::FundingConfig;
use cardvault_core::idempotency::{funding_key, mirror_key};
use cardvault_core::models::{
    BlockchainTransferRequest, Card, CardLedgerEntry, CrossCurrencyFundingJob, EntryStatus,
    ExchangeStatus, FiatTransferRequest, FundingJob, FundingRail, Job, JobContext, JobOutcome,
    Notification, RailTransfer, SettlementOutcome,
};
use cardvault_core::money::from_minor_units;
use cardvault_core::traits::{
    BlockchainWallet, CardAccountRepository, CardLedgerRepository, CardProvider, CardRepository,
    EscrowStore, ExchangeService, FiatWallet, JobHandler, LedgerStore, Notifier,
};
use cardvault_core::{AppError, AppResult};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::locks::LockManager;

/// Shared collaborators of the saga handler
pub struct SagaDependencies {
    pub cards: Arc<dyn CardRepository>,
    pub accounts: Arc<dyn CardAccountRepository>,
    pub entries: Arc<dyn CardLedgerRepository>,
    pub ledger: Arc<dyn LedgerStore>,
    pub card_provider: Arc<dyn CardProvider>,
    pub fiat_wallet: Arc<dyn FiatWallet>,
    pub blockchain_wallet: Arc<dyn BlockchainWallet>,
    pub exchange: Arc<dyn ExchangeService>,
    pub escrow: Arc<dyn EscrowStore>,
    pub notifier: Arc<dyn Notifier>,
}

pub struct FundingSagaHandler {
    deps: SagaDependencies,
    config: FundingConfig,
    locks: LockManager,
    lock_ttl: Duration,
}

/// One failed saga attempt
struct AttemptFailure {
    error: AppError,
    /// Decline even though the queue would retry
    decline_now: bool,
}

impl From<AppError> for AttemptFailure {
    fn from(error: AppError) -> Self {
        Self {
            error,
            decline_now: false,
        }
    }
}

type AttemptResult = Result<JobOutcome, AttemptFailure>;

fn truncate_reason(reason: &str, max_len: usize) -> String {
    reason.chars().take(max_len).collect()
}

impl FundingSagaHandler {
    pub fn new(
        deps: SagaDependencies,
        config: FundingConfig,
        locks: LockManager,
        lock_ttl: Duration,
    ) -> Self {
        Self {
            deps,
            config,
            locks,
            lock_ttl,
        }
    }

    /// Entry still awaiting its rail leg, or `None` if a previous run already
    /// finished it
    async fn pending_entry(&self, card_transaction_id: Uuid) -> AppResult<Option<CardLedgerEntry>> {
        let entry = self
            .deps
            .entries
            .find_by_id(card_transaction_id)
            .await?
            .ok_or_else(|| AppError::LedgerEntryNotFound(card_transaction_id.to_string()))?;

        if entry.status != EntryStatus::Pending {
            info!(
                card_transaction_id = %entry.id,
                status = %entry.status,
                "Funding entry already final, skipping"
            );
            return Ok(None);
        }
        Ok(Some(entry))
    }

    async fn usable_card(&self, card_id: Uuid) -> AppResult<Card> {
        let card = self
            .deps
            .cards
            .find_by_id(card_id)
            .await?
            .ok_or_else(|| AppError::CardNotFound(card_id.to_string()))?;
        card.ensure_usable()?;
        Ok(card)
    }

    async fn deposit_address(&self, card: &Card) -> AppResult<String> {
        let account = self
            .deps
            .accounts
            .find_by_id(card.card_account_id)
            .await?
            .ok_or_else(|| AppError::CardAccountNotFound(card.card_account_id.to_string()))?;

        self.deps
            .card_provider
            .deposit_address(&account.provider_reference, &self.config.settlement_network)
            .await
    }

    #[instrument(skip(self, job), fields(card_transaction_id = %job.card_transaction_id, rail = %job.rail))]
    async fn run_funding(&self, job: &FundingJob) -> AttemptResult {
        let Some(entry) = self.pending_entry(job.card_transaction_id).await? else {
            return Ok(JobOutcome {
                card_transaction_id: job.card_transaction_id,
                rail_reference: None,
            });
        };

        let card = self.usable_card(job.card_id).await?;
        let address = self.deposit_address(&card).await?;
        let total = job.total().map_err(|error| AttemptFailure {
            error,
            decline_now: true,
        })?;
        let idempotency_key = funding_key(&self.config.idempotency_prefix, entry.id);

        let transfer = match job.rail {
            FundingRail::Fiat => {
                let available = self
                    .deps
                    .fiat_wallet
                    .balance(job.user_id, &self.config.fiat_asset)
                    .await?;
                if available < total {
                    return Err(AppError::InsufficientBalance {
                        required: total,
                        available,
                    }
                    .into());
                }

                let transfer = self
                    .deps
                    .fiat_wallet
                    .transfer_to_address(
                        job.user_id,
                        &FiatTransferRequest {
                            amount: total,
                            fee: job.fee,
                            asset: self.config.settlement_asset.clone(),
                            network: self.config.settlement_network.clone(),
                            destination_address: address.clone(),
                            idempotency_key,
                            narration: Some(format!("Card funding {}", entry.id)),
                        },
                    )
                    .await?;

                if self.config.mirror_enabled() {
                    self.mirror_to_blockchain(job, total, &address).await;
                }
                transfer
            }
            FundingRail::Blockchain => {
                self.deps
                    .blockchain_wallet
                    .initiate_transaction(
                        job.user_id,
                        &BlockchainTransferRequest {
                            asset_id: self.config.settlement_asset.clone(),
                            network: self.config.settlement_network.clone(),
                            amount: total,
                            peer_address: address,
                            idempotency_key,
                        },
                    )
                    .await?
            }
        };

        self.store_rail_reference(&entry, &transfer, total).await;

        info!(rail_reference = %transfer.reference, total, "Funding transfer submitted");
        Ok(JobOutcome {
            card_transaction_id: entry.id,
            rail_reference: Some(transfer.reference),
        })
    }

    /// Test-environment parity copy on the blockchain rail
    async fn mirror_to_blockchain(&self, job: &FundingJob, total: i64, address: &str) {
        let request = BlockchainTransferRequest {
            asset_id: self.config.settlement_asset.clone(),
            network: self.config.settlement_network.clone(),
            amount: total,
            peer_address: address.to_string(),
            idempotency_key: mirror_key(&self.config.idempotency_prefix, job.card_transaction_id),
        };

        match self
            .deps
            .blockchain_wallet
            .initiate_transaction(job.user_id, &request)
            .await
        {
            Ok(mirror) => info!(mirror_reference = %mirror.reference, "Mirror transfer submitted"),
            Err(e) => warn!(error = %e, "Mirror transfer failed"),
        }
    }

    /// The money has left the rail; a failure here must not decline the entry
    async fn store_rail_reference(&self, entry: &CardLedgerEntry, transfer: &RailTransfer, amount: i64) {
        if let Err(e) = self
            .deps
            .entries
            .set_rail_reference(entry.id, &transfer.reference)
            .await
        {
            error!(
                target: "reconciliation",
                provider_reference = %transfer.reference,
                card_id = %entry.card_id,
                amount,
                operation = "funding_rail_reference",
                error = %e,
                "Rail transfer submitted but reference not stored"
            );
        }
    }

    #[instrument(skip(self, job), fields(card_transaction_id = %job.card_transaction_id, exchange_reference = %job.exchange_reference))]
    async fn run_cross_currency(&self, job: &CrossCurrencyFundingJob) -> AttemptResult {
        let Some(entry) = self.pending_entry(job.card_transaction_id).await? else {
            return Ok(JobOutcome {
                card_transaction_id: job.card_transaction_id,
                rail_reference: Some(job.exchange_reference.clone()),
            });
        };

        let context = self
            .deps
            .escrow
            .get(&job.exchange_reference)
            .await?
            .ok_or_else(|| AppError::FundingContextNotFound(job.exchange_reference.clone()))?;
        if context.card_transaction_id != Some(entry.id) {
            return Err(AppError::Conflict(format!(
                "Funding context {} belongs to another card transaction",
                job.exchange_reference
            ))
            .into());
        }

        let execution = self.deps.exchange.execute(&job.exchange_reference).await?;
        let outcome = JobOutcome {
            card_transaction_id: entry.id,
            rail_reference: Some(job.exchange_reference.clone()),
        };

        match execution.status {
            ExchangeStatus::Completed => {
                let settled = self
                    .locks
                    .with_lock(&funding_lock(&entry.card_id.to_string()), self.lock_ttl, || {
                        self.deps.ledger.settle_pending_credit(entry.id)
                    })
                    .await;
                let settlement = match settled {
                    Ok(settlement) => settlement,
                    Err(e) => {
                        error!(
                            target: "reconciliation",
                            provider_reference = %job.exchange_reference,
                            card_id = %entry.card_id,
                            amount = entry.amount,
                            operation = "cross_currency_settlement",
                            error = %e,
                            "Exchange completed but card credit failed"
                        );
                        return Err(e.into());
                    }
                };

                if let SettlementOutcome::Settled { card_balance, .. } = &settlement {
                    self.notify(Notification::new(
                        entry.user_id,
                        "Card funded",
                        format!(
                            "{} USD was added to your card. New balance: {} USD",
                            from_minor_units(entry.amount),
                            from_minor_units(*card_balance)
                        ),
                    ))
                    .await;
                }

                if let Err(e) = self.deps.escrow.remove(&job.exchange_reference).await {
                    warn!(error = %e, "Failed to drop funding context");
                }
                Ok(outcome)
            }
            ExchangeStatus::Processing => {
                info!("Exchange still processing, settlement deferred");
                Ok(outcome)
            }
            ExchangeStatus::Failed => {
                let reason = execution
                    .failure_reason
                    .unwrap_or_else(|| "Exchange failed".to_string());
                Err(AttemptFailure {
                    error: AppError::Exchange(reason),
                    decline_now: true,
                })
            }
        }
    }

    /// Store the failure; decline when the queue will not retry or the
    /// failure is final on its own
    async fn record_failure(&self, job: &Job, ctx: &JobContext, failure: &AttemptFailure) {
        let id = job.card_transaction_id();
        let reason = truncate_reason(
            &failure.error.to_string(),
            self.config.failure_reason_max_len,
        );
        let decline = failure.decline_now || ctx.is_final_attempt();

        match self.deps.entries.record_failure(id, &reason, decline).await {
            Ok(entry) if decline && entry.status == EntryStatus::Declined => {
                warn!(card_transaction_id = %id, reason = %reason, "Funding declined");
                self.notify(Notification::new(
                    entry.user_id,
                    "Card funding failed",
                    format!(
                        "Your card funding of {} USD could not be completed",
                        from_minor_units(entry.amount)
                    ),
                ))
                .await;
            }
            Ok(_) => {}
            Err(e) => error!(card_transaction_id = %id, error = %e, "Failed to record funding failure"),
        }
    }

    async fn notify(&self, notification: Notification) {
        if let Err(e) = self.deps.notifier.notify(&notification).await {
            warn!(user_id = %notification.user_id, error = %e, "Notification failed");
        }
    }
}

#[async_trait]
impl JobHandler for FundingSagaHandler {
    async fn handle(&self, job: &Job, ctx: &JobContext) -> AppResult<JobOutcome> {
        let result = match job {
            Job::Funding(funding) => self.run_funding(funding).await,
            Job::CrossCurrencyFunding(exchange) => self.run_cross_currency(exchange).await,
        };

        match result {
            Ok(outcome) => Ok(outcome),
            Err(failure) => {
                warn!(
                    job = %job,
                    attempt = ctx.attempt,
                    max_attempts = ctx.max_attempts,
                    error = %failure.error,
                    "Funding job attempt failed"
                );
                self.record_failure(job, ctx, &failure).await;
                Err(failure.error)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Harness;
    use cardvault_core::fees::FeeRule;
    use cardvault_core::idempotency::MAX_IDEMPOTENCY_KEY_LEN;
    use cardvault_core::models::CardStatus;
    use rust_decimal_macros::dec;

    fn ctx(attempt: u32) -> JobContext {
        JobContext {
            job_id: Uuid::new_v4(),
            attempt,
            max_attempts: 3,
        }
    }

    #[tokio::test]
    async fn test_fiat_funding_moves_total() {
        let mut h = Harness::new();
        h.fees.card_funding = FeeRule::percentage(dec!(5));
        h.fiat.set_balance(10500);
        let card = h.seed_card(0);

        let receipt = h
            .funding_service()
            .request_funding(card.user_id, card.id, 10000, FundingRail::Fiat)
            .await
            .unwrap();
        assert_eq!(receipt.fee, 500);

        let job = h.queue.jobs().remove(0);
        let outcome = h.saga_handler().handle(&job, &ctx(1)).await.unwrap();

        assert_eq!(h.fiat.balance_now(), 0);
        let transfers = h.fiat.transfers();
        assert_eq!(transfers.len(), 1);
        assert_eq!(transfers[0].amount, 10500);
        assert_eq!(transfers[0].fee, 500);
        assert_eq!(transfers[0].destination_address, h.provider.deposit_address_value());
        assert!(transfers[0].idempotency_key.len() <= MAX_IDEMPOTENCY_KEY_LEN);

        let entry = h.store.entry(receipt.card_transaction_id);
        assert_eq!(entry.rail_reference, outcome.rail_reference);
        assert_eq!(entry.status, EntryStatus::Pending);

        let settled = h
            .funding_service()
            .complete_funding(receipt.card_transaction_id)
            .await
            .unwrap();
        assert_eq!(settled.entry().status, EntryStatus::Successful);
        assert_eq!(settled.entry().rail_reference, outcome.rail_reference);
        assert_eq!(h.store.card(card.id).balance, 10000);

        let entry = h.store.entry(receipt.card_transaction_id);
        assert_eq!(entry.status, EntryStatus::Successful);
        assert_eq!(entry.rail_reference, outcome.rail_reference);
    }

    #[tokio::test]
    async fn test_overflowing_total_declines_at_once() {
        let h = Harness::new();
        let card = h.seed_card(0);
        let receipt = h
            .funding_service()
            .request_funding(card.user_id, card.id, 1000, FundingRail::Blockchain)
            .await
            .unwrap();

        let mut job = h.queue.jobs().remove(0);
        if let Job::Funding(funding) = &mut job {
            funding.fee = i64::MAX;
        }
        let result = h.saga_handler().handle(&job, &ctx(1)).await;

        assert!(matches!(result, Err(AppError::InvalidInput(_))));
        assert_eq!(h.store.entry(receipt.card_transaction_id).status, EntryStatus::Declined);
        assert!(h.blockchain.idempotency_keys().is_empty());
    }

    #[tokio::test]
    async fn test_retry_reuses_idempotency_key() {
        let h = Harness::new();
        let card = h.seed_card(0);
        let receipt = h
            .funding_service()
            .request_funding(card.user_id, card.id, 1000, FundingRail::Blockchain)
            .await
            .unwrap();
        let job = h.queue.jobs().remove(0);

        h.blockchain.fail_next(1);
        let handler = h.saga_handler();
        assert!(handler.handle(&job, &ctx(1)).await.is_err());
        assert!(handler.handle(&job, &ctx(2)).await.is_ok());

        let keys = h.blockchain.idempotency_keys();
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0], keys[1]);
        assert_eq!(
            keys[0],
            funding_key("card-fund", receipt.card_transaction_id)
        );

        let entry = h.store.entry(receipt.card_transaction_id);
        assert_eq!(entry.status, EntryStatus::Pending);
        assert!(entry.failure_reason.is_some());
    }

    #[tokio::test]
    async fn test_insufficient_wallet_declines_on_final_attempt() {
        let h = Harness::new();
        h.fiat.set_balance(500);
        let card = h.seed_card(0);
        let receipt = h
            .funding_service()
            .request_funding(card.user_id, card.id, 1000, FundingRail::Fiat)
            .await
            .unwrap();
        let job = h.queue.jobs().remove(0);
        let handler = h.saga_handler();

        let first = handler.handle(&job, &ctx(1)).await;
        assert!(matches!(first, Err(AppError::InsufficientBalance { .. })));
        assert_eq!(h.store.entry(receipt.card_transaction_id).status, EntryStatus::Pending);

        let last = handler.handle(&job, &ctx(3)).await;
        assert!(last.is_err());

        let entry = h.store.entry(receipt.card_transaction_id);
        assert_eq!(entry.status, EntryStatus::Declined);
        let reason = entry.failure_reason.unwrap();
        assert!(reason.len() <= 255);
        assert!(h.fiat.transfers().is_empty());
        assert_eq!(h.notifier.count(), 1);
    }

    #[tokio::test]
    async fn test_failure_reason_is_truncated() {
        let mut h = Harness::new();
        h.funding.failure_reason_max_len = 16;
        h.fiat.set_balance(0);
        let card = h.seed_card(0);
        let receipt = h
            .funding_service()
            .request_funding(card.user_id, card.id, 1000, FundingRail::Fiat)
            .await
            .unwrap();
        let job = h.queue.jobs().remove(0);

        let _ = h.saga_handler().handle(&job, &ctx(3)).await;

        let entry = h.store.entry(receipt.card_transaction_id);
        assert_eq!(entry.failure_reason.unwrap().chars().count(), 16);
    }

    #[tokio::test]
    async fn test_job_revalidates_card() {
        let h = Harness::new();
        let card = h.seed_card(0);
        h.fiat.set_balance(100_000);
        h.funding_service()
            .request_funding(card.user_id, card.id, 1000, FundingRail::Fiat)
            .await
            .unwrap();
        h.store.update_card(card.id, |c| c.status = CardStatus::Blocked);

        let job = h.queue.jobs().remove(0);
        let result = h.saga_handler().handle(&job, &ctx(1)).await;

        assert!(matches!(result, Err(AppError::CardBlocked(_))));
        assert!(h.fiat.transfers().is_empty());
    }

    #[tokio::test]
    async fn test_settled_entry_is_skipped() {
        let h = Harness::new();
        let card = h.seed_card(0);
        h.fiat.set_balance(100_000);
        let receipt = h
            .funding_service()
            .request_funding(card.user_id, card.id, 1000, FundingRail::Fiat)
            .await
            .unwrap();
        h.funding_service()
            .complete_funding(receipt.card_transaction_id)
            .await
            .unwrap();

        let job = h.queue.jobs().remove(0);
        let outcome = h.saga_handler().handle(&job, &ctx(1)).await.unwrap();

        assert_eq!(outcome.rail_reference, None);
        assert!(h.fiat.transfers().is_empty());
    }

    #[tokio::test]
    async fn test_mirror_only_outside_production() {
        let mut h = Harness::new();
        h.funding.mirror_fiat_to_blockchain = true;
        h.funding.environment = "production".to_string();
        h.fiat.set_balance(100_000);
        let card = h.seed_card(0);
        h.funding_service()
            .request_funding(card.user_id, card.id, 1000, FundingRail::Fiat)
            .await
            .unwrap();
        let job = h.queue.jobs().remove(0);

        h.saga_handler().handle(&job, &ctx(1)).await.unwrap();
        assert!(h.blockchain.idempotency_keys().is_empty());

        h.funding.environment = "staging".to_string();
        let card = h.seed_card(0);
        h.funding_service()
            .request_funding(card.user_id, card.id, 1000, FundingRail::Fiat)
            .await
            .unwrap();
        let job = h.queue.jobs().remove(1);

        h.saga_handler().handle(&job, &ctx(1)).await.unwrap();
        let keys = h.blockchain.idempotency_keys();
        assert_eq!(keys.len(), 1);
        assert!(keys[0].starts_with("card-fund-m-"));
    }
}
