//! Two-phase cross-currency funding
//!
//! `initialize` quotes the exchange into USD and parks the figures in the
//! escrow store; `execute` consumes that context once, records the PENDING
//! card credit and hands the exchange leg to the funding queue.

use cardvault_cache::keys::funding_lock;
use cardvault_core::config::FundingConfig;
use cardvault_core::fees::FeeSchedule;
use cardvault_core::models::{
    Card, CardAccount, CrossCurrencyBreakdown, CrossCurrencyFundingJob, ExchangeQuoteRequest,
    FundingContext, FundingContextUpdate, Job, JobOptions, PendingCredit, LEDGER_CURRENCY,
};
use cardvault_core::money::floor_to_minor_units;
use cardvault_core::traits::{
    CardAccountRepository, CardLedgerRepository, CardProvider, CardRepository, EscrowStore,
    ExchangeService, JobQueue, LedgerStore,
};
use cardvault_core::{AppError, AppResult};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::locks::LockManager;

/// Caller input for a quote
#[derive(Debug, Clone)]
pub struct QuoteRequest {
    pub from_currency: String,
    /// Major units of `from_currency`
    pub amount: Decimal,
    pub rate_id: Option<String>,
}

/// Returned by `execute`
#[derive(Debug, Clone, Serialize)]
pub struct ExchangeFundingReceipt {
    pub card_transaction_id: Uuid,
    pub exchange_reference: String,
    /// Minor units the card will be credited
    pub amount: i64,
    pub job_id: Uuid,
}

pub struct CrossCurrencyDependencies {
    pub cards: Arc<dyn CardRepository>,
    pub accounts: Arc<dyn CardAccountRepository>,
    pub entries: Arc<dyn CardLedgerRepository>,
    pub ledger: Arc<dyn LedgerStore>,
    pub card_provider: Arc<dyn CardProvider>,
    pub exchange: Arc<dyn ExchangeService>,
    pub escrow: Arc<dyn EscrowStore>,
    pub queue: Arc<dyn JobQueue>,
}

pub struct CrossCurrencyFundingService {
    deps: CrossCurrencyDependencies,
    locks: LockManager,
    fees: FeeSchedule,
    funding: FundingConfig,
    job_options: JobOptions,
    lock_ttl: Duration,
}

impl CrossCurrencyFundingService {
    pub fn new(
        deps: CrossCurrencyDependencies,
        locks: LockManager,
        fees: FeeSchedule,
        funding: FundingConfig,
        job_options: JobOptions,
        lock_ttl: Duration,
    ) -> Self {
        Self {
            deps,
            locks,
            fees,
            funding,
            job_options,
            lock_ttl,
        }
    }

    async fn load_card(&self, user_id: Uuid, card_id: Uuid) -> AppResult<(Card, CardAccount)> {
        let card = self
            .deps
            .cards
            .find_by_id(card_id)
            .await?
            .ok_or_else(|| AppError::CardNotFound(card_id.to_string()))?;
        card.ensure_owned_by(user_id)?;
        card.ensure_usable()?;

        let account = self
            .deps
            .accounts
            .find_by_id(card.card_account_id)
            .await?
            .ok_or_else(|| AppError::CardAccountNotFound(card.card_account_id.to_string()))?;
        Ok((card, account))
    }

    /// Quote the exchange and store the funding context. No ledger writes.
    #[instrument(skip(self, request), fields(from = %request.from_currency, amount = %request.amount))]
    pub async fn initialize(
        &self,
        user_id: Uuid,
        card_id: Uuid,
        request: QuoteRequest,
    ) -> AppResult<FundingContext> {
        if request.amount <= Decimal::ZERO {
            return Err(AppError::InvalidInput(
                "Exchange amount must be positive".to_string(),
            ));
        }

        self.locks
            .with_lock(&funding_lock(&card_id.to_string()), self.lock_ttl, || {
                self.initialize_locked(user_id, card_id, request)
            })
            .await
    }

    async fn initialize_locked(
        &self,
        user_id: Uuid,
        card_id: Uuid,
        request: QuoteRequest,
    ) -> AppResult<FundingContext> {
        let (card, account) = self.load_card(user_id, card_id).await?;

        let network = self.funding.settlement_network.clone();
        let deposit_address = self
            .deps
            .card_provider
            .deposit_address(&account.provider_reference, &network)
            .await?;

        let quote = self
            .deps
            .exchange
            .initialize(&ExchangeQuoteRequest {
                user_id,
                from_currency: request.from_currency.clone(),
                to_currency: LEDGER_CURRENCY.to_string(),
                amount: request.amount,
                rate_id: request.rate_id,
                destination_address: deposit_address.clone(),
            })
            .await?;

        let breakdown = CrossCurrencyBreakdown::compute(&self.fees, quote.usd_amount_after_exchange);
        if breakdown.net_minor_units()? <= 0 {
            return Err(AppError::InvalidInput(format!(
                "Amount after fees is zero (quoted {} USD)",
                quote.usd_amount_after_exchange
            )));
        }

        let context = FundingContext {
            exchange_reference: quote.reference,
            user_id,
            card_id: card.id,
            card_account_id: account.id,
            from_currency: quote.from_currency,
            source_amount: quote.source_amount,
            usd_amount_after_exchange: breakdown.usd_amount_after_exchange,
            exchange_fee: quote.exchange_fee,
            card_fee: breakdown.card_fee,
            card_fee_usd: breakdown.card_fee_usd,
            net_usd_amount: breakdown.net_usd_amount,
            network,
            deposit_address,
            card_transaction_id: None,
            created_at: Utc::now(),
            executed_at: None,
        };
        self.deps.escrow.store(&context).await?;

        info!(
            exchange_reference = %context.exchange_reference,
            usd_amount = %context.usd_amount_after_exchange,
            card_fee_usd = %context.card_fee_usd,
            net_usd_amount = %context.net_usd_amount,
            "Cross-currency funding initialized"
        );
        Ok(context)
    }

    /// Consume the context: record the PENDING credit and queue the exchange.
    ///
    /// A second call for the same reference fails with `FundingAlreadyExecuted`.
    /// The pending credit is written under the card's funding lock as well.
    #[instrument(skip(self))]
    pub async fn execute(
        &self,
        user_id: Uuid,
        card_id: Uuid,
        exchange_reference: &str,
    ) -> AppResult<ExchangeFundingReceipt> {
        self.locks
            .with_lock(&funding_lock(exchange_reference), self.lock_ttl, || {
                self.execute_locked(user_id, card_id, exchange_reference)
            })
            .await
    }

    async fn execute_locked(
        &self,
        user_id: Uuid,
        card_id: Uuid,
        exchange_reference: &str,
    ) -> AppResult<ExchangeFundingReceipt> {
        let context = self
            .deps
            .escrow
            .get(exchange_reference)
            .await?
            .ok_or_else(|| AppError::FundingContextNotFound(exchange_reference.to_string()))?;

        if context.is_executed() {
            return Err(AppError::FundingAlreadyExecuted(
                exchange_reference.to_string(),
            ));
        }
        if context.user_id != user_id || context.card_id != card_id {
            return Err(AppError::InvalidInput(format!(
                "Funding context {} was not issued for this card",
                exchange_reference
            )));
        }

        let amount = floor_to_minor_units(context.net_usd_amount)?;

        // Serialized with cancel_card on the card's funding lock
        let entry = self
            .locks
            .with_lock(&funding_lock(&card_id.to_string()), self.lock_ttl, || async {
                let (card, _) = self.load_card(user_id, card_id).await?;
                let mut credit = PendingCredit::deposit(
                    card.id,
                    amount,
                    format!("Card funding from {}", context.from_currency),
                );
                credit.provider_reference = Some(exchange_reference.to_string());
                self.deps.ledger.record_pending_credit(&credit).await
            })
            .await?;

        let update = FundingContextUpdate {
            card_transaction_id: Some(entry.id),
            executed_at: Some(Utc::now()),
        };
        if let Err(e) = self.deps.escrow.update(exchange_reference, &update).await {
            self.decline(entry.id, "Funding context could not be updated").await;
            return Err(e);
        }

        let job = Job::CrossCurrencyFunding(CrossCurrencyFundingJob {
            exchange_reference: exchange_reference.to_string(),
            card_transaction_id: entry.id,
            user_id,
            card_id,
        });
        let handle = match self.deps.queue.enqueue(job, self.job_options).await {
            Ok(handle) => handle,
            Err(e) => {
                error!(
                    exchange_reference = %exchange_reference,
                    card_transaction_id = %entry.id,
                    error = %e,
                    "Failed to queue exchange job"
                );
                self.decline(entry.id, "Exchange job could not be queued").await;
                return Err(e);
            }
        };

        info!(
            exchange_reference = %exchange_reference,
            card_transaction_id = %entry.id,
            amount,
            job_id = %handle.id,
            "Cross-currency funding executed"
        );

        Ok(ExchangeFundingReceipt {
            card_transaction_id: entry.id,
            exchange_reference: exchange_reference.to_string(),
            amount,
            job_id: handle.id,
        })
    }

    async fn decline(&self, entry_id: Uuid, reason: &str) {
        if let Err(e) = self.deps.entries.record_failure(entry_id, reason, true).await {
            warn!(card_transaction_id = %entry_id, error = %e, "Failed to decline entry");
        }
    }
}
