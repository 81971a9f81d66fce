//! Repository, store and collaborator traits
//!
//! Services receive these as `Arc<dyn Trait>` constructor parameters.

use async_trait::async_trait;
use std::time::Duration;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{
    BalanceMutation, BalanceTransfer, BlockchainTransferRequest, Card, CardAccount,
    CardLedgerEntry, CardUpdate, Dispute, DisputeEvent, ExchangeExecution, ExchangeQuote,
    ExchangeQuoteRequest, FeeStatus, FiatTransferRequest, FundingContext, FundingContextUpdate,
    Job, JobContext, JobHandle, JobOptions, JobOutcome, MutationOutcome, Notification,
    PendingCredit, ProviderCharge, ProviderDispute, RailTransfer, SettlementOutcome, StoredJob,
};

// ==================== Repositories ====================

/// Card reads and non-balance updates
#[async_trait]
pub trait CardRepository: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Card>, AppError>;

    async fn set_frozen(&self, id: Uuid, frozen: bool) -> Result<Card, AppError>;

    async fn set_fee_status(&self, id: Uuid, status: FeeStatus) -> Result<(), AppError>;

    /// Mark CANCELED and frozen
    async fn mark_canceled(&self, id: Uuid) -> Result<Card, AppError>;
}

#[async_trait]
pub trait CardAccountRepository: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<CardAccount>, AppError>;

    async fn find_by_user(&self, user_id: Uuid) -> Result<Option<CardAccount>, AppError>;
}

/// Card ledger entry reads and status bookkeeping
#[async_trait]
pub trait CardLedgerRepository: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<CardLedgerEntry>, AppError>;

    async fn count_pending_for_card(&self, card_id: Uuid) -> Result<i64, AppError>;

    /// Store a failure reason; with `decline` the entry (and its mirror)
    /// moves PENDING -> DECLINED. Terminal entries are left untouched.
    async fn record_failure(
        &self,
        id: Uuid,
        reason: &str,
        decline: bool,
    ) -> Result<CardLedgerEntry, AppError>;

    async fn set_rail_reference(&self, id: Uuid, reference: &str) -> Result<(), AppError>;
}

#[async_trait]
pub trait DisputeRepository: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Dispute>, AppError>;

    /// Non-terminal dispute for a card entry, if any
    async fn find_open_by_entry(&self, card_entry_id: Uuid) -> Result<Option<Dispute>, AppError>;

    async fn events(&self, dispute_id: Uuid) -> Result<Vec<DisputeEvent>, AppError>;
}

/// Atomic multi-row ledger writes.
///
/// Every method re-reads the rows it touches under row locks, plans with
/// the pure functions in [`crate::models::ledger`] and commits or rolls
/// back as one unit.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn apply_mutation(&self, mutation: &BalanceMutation)
        -> Result<MutationOutcome, AppError>;

    async fn record_pending_credit(
        &self,
        credit: &PendingCredit,
    ) -> Result<CardLedgerEntry, AppError>;

    async fn settle_pending_credit(&self, entry_id: Uuid) -> Result<SettlementOutcome, AppError>;

    async fn transfer_balance(
        &self,
        source_card_id: Uuid,
        destination_card_id: Uuid,
    ) -> Result<Option<BalanceTransfer>, AppError>;
}

// ==================== Infrastructure ====================

/// Proof that a named lock is held
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockGuard {
    pub key: String,
    /// Owner token; release only succeeds with it
    pub token: String,
}

/// Distributed mutual exclusion with expiry
#[async_trait]
pub trait LockService: Send + Sync {
    /// Single non-blocking attempt
    async fn try_acquire(&self, key: &str, ttl: Duration) -> Result<Option<LockGuard>, AppError>;

    /// Release if still owned; `false` when the lock already expired
    async fn release(&self, guard: &LockGuard) -> Result<bool, AppError>;
}

/// Short-lived funding context storage keyed by exchange reference
#[async_trait]
pub trait EscrowStore: Send + Sync {
    async fn store(&self, context: &FundingContext) -> Result<(), AppError>;

    async fn get(&self, reference: &str) -> Result<Option<FundingContext>, AppError>;

    async fn update(
        &self,
        reference: &str,
        update: &FundingContextUpdate,
    ) -> Result<FundingContext, AppError>;

    async fn remove(&self, reference: &str) -> Result<bool, AppError>;
}

/// Enqueue side of the job queue
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, job: Job, options: JobOptions) -> Result<JobHandle, AppError>;
}

/// Durable job rows behind the funding queue
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn insert(&self, queue: &str, job: &Job, options: JobOptions)
        -> Result<JobHandle, AppError>;

    /// Claim up to `limit` due jobs for `visibility`. Due means queued with
    /// `run_at` passed, or running with an expired claim. Each claim counts
    /// as one attempt.
    async fn claim(
        &self,
        queue: &str,
        limit: usize,
        visibility: Duration,
    ) -> Result<Vec<StoredJob>, AppError>;

    async fn complete(&self, id: Uuid) -> Result<(), AppError>;

    /// Back to queued, due after `delay`
    async fn retry_later(&self, id: Uuid, delay: Duration, error: &str) -> Result<(), AppError>;

    /// No further attempts
    async fn fail(&self, id: Uuid, error: &str) -> Result<(), AppError>;
}

/// Registered once per queue; invoked per attempt
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &Job, ctx: &JobContext) -> Result<JobOutcome, AppError>;
}

// ==================== External collaborators ====================

#[async_trait]
pub trait CardProvider: Send + Sync {
    async fn create_charge(
        &self,
        card_reference: &str,
        amount: i64,
        description: &str,
    ) -> Result<ProviderCharge, AppError>;

    async fn create_dispute(
        &self,
        transaction_reference: &str,
        evidence: Option<&str>,
    ) -> Result<ProviderDispute, AppError>;

    async fn update_card(&self, card_reference: &str, update: &CardUpdate)
        -> Result<(), AppError>;

    /// Funding address of a card holder on a settlement network
    async fn deposit_address(
        &self,
        account_reference: &str,
        network: &str,
    ) -> Result<String, AppError>;
}

#[async_trait]
pub trait FiatWallet: Send + Sync {
    /// Available balance in minor units
    async fn balance(&self, user_id: Uuid, asset: &str) -> Result<i64, AppError>;

    async fn transfer_to_address(
        &self,
        user_id: Uuid,
        request: &FiatTransferRequest,
    ) -> Result<RailTransfer, AppError>;
}

#[async_trait]
pub trait BlockchainWallet: Send + Sync {
    async fn initiate_transaction(
        &self,
        user_id: Uuid,
        request: &BlockchainTransferRequest,
    ) -> Result<RailTransfer, AppError>;
}

#[async_trait]
pub trait ExchangeService: Send + Sync {
    async fn initialize(&self, request: &ExchangeQuoteRequest) -> Result<ExchangeQuote, AppError>;

    async fn execute(&self, reference: &str) -> Result<ExchangeExecution, AppError>;
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<(), AppError>;
}
