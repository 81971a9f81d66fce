//! In-memory collaborators for service tests
//!
//! `MemoryStore` commits through the same planning functions as the
//! PostgreSQL ledger store, under one mutex, so every store operation is
//! atomic the way a database transaction would be.

use async_trait::async_trait;
use cardvault_core::config::{DisputeConfig, FundingConfig};
use cardvault_core::fees::FeeSchedule;
use cardvault_core::models::{
    plan_settlement, plan_transfer, BalanceMutation, BalanceTransfer, BlockchainTransferRequest,
    Card, CardAccount, CardLedgerEntry, CardUpdate, Dispute, DisputeEvent, EntryDirection,
    EntryKind, EntryStatus, ExchangeExecution, ExchangeQuote, ExchangeQuoteRequest,
    ExchangeStatus, FeeStatus, FiatTransferRequest, FundingContext, FundingContextUpdate, Job,
    JobHandle, JobOptions, MainLedgerEntry, MutationOutcome, Notification, PendingCredit,
    ProviderCharge, ProviderDispute, RailTransfer, SettlementOutcome, DisputeStatus, StoredJob,
    FUNDING_QUEUE,
};
use cardvault_core::traits::{
    BlockchainWallet, CardAccountRepository, CardLedgerRepository, CardProvider, CardRepository,
    DisputeRepository, EscrowStore, ExchangeService, FiatWallet, JobQueue, JobStore, LedgerStore,
    LockGuard, LockService, Notifier,
};
use cardvault_core::{AppError, AppResult};
use chrono::{Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::balance_engine::BalanceEngine;
use crate::card_lifecycle::CardLifecycleService;
use crate::charge::RetryingChargeExecutor;
use crate::cross_currency::{CrossCurrencyDependencies, CrossCurrencyFundingService};
use crate::dispute::DisputeService;
use crate::funding::FundingService;
use crate::funding_saga::{FundingSagaHandler, SagaDependencies};
use crate::issuance_fee::IssuanceFeeService;
use crate::locks::LockManager;
use crate::retry::RetryPolicy;

pub const LOCK_TTL: Duration = Duration::from_secs(5);

// ==================== Ledger store ====================

#[derive(Default)]
struct StoreState {
    cards: HashMap<Uuid, Card>,
    accounts: HashMap<Uuid, CardAccount>,
    /// Insertion order
    entries: Vec<CardLedgerEntry>,
    mains: Vec<MainLedgerEntry>,
    disputes: Vec<Dispute>,
    events: Vec<DisputeEvent>,
}

impl StoreState {
    fn card(&self, id: Uuid) -> AppResult<Card> {
        self.cards
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::CardNotFound(id.to_string()))
    }

    fn account(&self, id: Uuid) -> AppResult<CardAccount> {
        self.accounts
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::CardAccountNotFound(id.to_string()))
    }

    fn card_mut(&mut self, id: Uuid) -> AppResult<&mut Card> {
        self.cards
            .get_mut(&id)
            .ok_or_else(|| AppError::CardNotFound(id.to_string()))
    }

    fn entry_mut(&mut self, id: Uuid) -> AppResult<&mut CardLedgerEntry> {
        self.entries
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| AppError::LedgerEntryNotFound(id.to_string()))
    }

    fn set_main_status(&mut self, card_entry_id: Uuid, status: EntryStatus) {
        if let Some(main) = self.mains.iter_mut().find(|m| m.card_entry_id == card_entry_id) {
            main.status = status;
        }
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
}

impl MemoryStore {
    pub fn insert_card(&self, card: Card) {
        self.state.lock().cards.insert(card.id, card);
    }

    pub fn insert_account(&self, account: CardAccount) {
        self.state.lock().accounts.insert(account.id, account);
    }

    pub fn insert_entry(&self, mut entry: CardLedgerEntry, card_account_id: Uuid) {
        let main = MainLedgerEntry::mirror(&mut entry, card_account_id);
        let mut state = self.state.lock();
        state.entries.push(entry);
        state.mains.push(main);
    }

    pub fn card(&self, id: Uuid) -> Card {
        self.state.lock().cards[&id].clone()
    }

    pub fn account(&self, id: Uuid) -> CardAccount {
        self.state.lock().accounts[&id].clone()
    }

    pub fn entry(&self, id: Uuid) -> CardLedgerEntry {
        self.state
            .lock()
            .entries
            .iter()
            .find(|e| e.id == id)
            .cloned()
            .expect("unknown ledger entry")
    }

    pub fn entries(&self, card_id: Uuid) -> Vec<CardLedgerEntry> {
        self.state
            .lock()
            .entries
            .iter()
            .filter(|e| e.card_id == card_id)
            .cloned()
            .collect()
    }

    pub fn entry_count(&self, card_id: Uuid) -> usize {
        self.entries(card_id).len()
    }

    pub fn disputes(&self) -> Vec<Dispute> {
        self.state.lock().disputes.clone()
    }

    pub fn update_card(&self, id: Uuid, f: impl FnOnce(&mut Card)) {
        let mut state = self.state.lock();
        let card = state.cards.get_mut(&id).expect("unknown card");
        f(card);
    }
}

#[async_trait]
impl CardRepository for MemoryStore {
    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<Card>> {
        Ok(self.state.lock().cards.get(&id).cloned())
    }

    async fn set_frozen(&self, id: Uuid, frozen: bool) -> AppResult<Card> {
        let mut state = self.state.lock();
        let card = state.card_mut(id)?;
        card.is_frozen = frozen;
        card.updated_at = Utc::now();
        Ok(card.clone())
    }

    async fn set_fee_status(&self, id: Uuid, status: FeeStatus) -> AppResult<()> {
        let mut state = self.state.lock();
        state.card_mut(id)?.issuance_fee_status = status;
        Ok(())
    }

    async fn mark_canceled(&self, id: Uuid) -> AppResult<Card> {
        let mut state = self.state.lock();
        let card = state.card_mut(id)?;
        card.status = cardvault_core::models::CardStatus::Canceled;
        card.is_frozen = true;
        card.updated_at = Utc::now();
        Ok(card.clone())
    }
}

#[async_trait]
impl CardAccountRepository for MemoryStore {
    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<CardAccount>> {
        Ok(self.state.lock().accounts.get(&id).cloned())
    }

    async fn find_by_user(&self, user_id: Uuid) -> AppResult<Option<CardAccount>> {
        Ok(self
            .state
            .lock()
            .accounts
            .values()
            .find(|a| a.user_id == user_id)
            .cloned())
    }
}

#[async_trait]
impl CardLedgerRepository for MemoryStore {
    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<CardLedgerEntry>> {
        Ok(self
            .state
            .lock()
            .entries
            .iter()
            .find(|e| e.id == id)
            .cloned())
    }

    async fn count_pending_for_card(&self, card_id: Uuid) -> AppResult<i64> {
        Ok(self
            .state
            .lock()
            .entries
            .iter()
            .filter(|e| e.card_id == card_id && e.status == EntryStatus::Pending)
            .count() as i64)
    }

    async fn record_failure(
        &self,
        id: Uuid,
        reason: &str,
        decline: bool,
    ) -> AppResult<CardLedgerEntry> {
        let mut state = self.state.lock();
        let entry = state.entry_mut(id)?;
        if entry.status.is_terminal() {
            return Ok(entry.clone());
        }

        entry.failure_reason = Some(reason.to_string());
        entry.updated_at = Utc::now();
        if decline {
            entry.status = EntryStatus::Declined;
        }
        let entry = entry.clone();
        if decline {
            state.set_main_status(id, EntryStatus::Declined);
        }
        Ok(entry)
    }

    async fn set_rail_reference(&self, id: Uuid, reference: &str) -> AppResult<()> {
        let mut state = self.state.lock();
        state.entry_mut(id)?.rail_reference = Some(reference.to_string());
        Ok(())
    }
}

#[async_trait]
impl DisputeRepository for MemoryStore {
    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<Dispute>> {
        Ok(self
            .state
            .lock()
            .disputes
            .iter()
            .find(|d| d.id == id)
            .cloned())
    }

    async fn find_open_by_entry(&self, card_entry_id: Uuid) -> AppResult<Option<Dispute>> {
        Ok(self
            .state
            .lock()
            .disputes
            .iter()
            .find(|d| d.card_entry_id == card_entry_id && !d.status.is_terminal())
            .cloned())
    }

    async fn events(&self, dispute_id: Uuid) -> AppResult<Vec<DisputeEvent>> {
        Ok(self
            .state
            .lock()
            .events
            .iter()
            .filter(|e| e.dispute_id == dispute_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn apply_mutation(&self, mutation: &BalanceMutation) -> AppResult<MutationOutcome> {
        let mut state = self.state.lock();
        let card = state.card(mutation.card_id)?;
        let account = state.account(card.card_account_id)?;

        let outcome = mutation.plan(&card, &account, Utc::now())?;

        let stored = state.card_mut(card.id)?;
        stored.balance = outcome.card_balance;
        if let Some(status) = outcome.fee_status {
            stored.issuance_fee_status = status;
        }
        if let Some(account) = state.accounts.get_mut(&account.id) {
            account.balance = outcome.account_balance;
        }
        state.entries.push(outcome.card_entry.clone());
        state.mains.push(outcome.main_entry.clone());
        if let Some(dispute) = &outcome.dispute {
            state.disputes.push(dispute.clone());
        }
        if let Some(event) = &outcome.dispute_event {
            state.events.push(event.clone());
        }
        Ok(outcome)
    }

    async fn record_pending_credit(&self, credit: &PendingCredit) -> AppResult<CardLedgerEntry> {
        let mut state = self.state.lock();
        let card = state.card(credit.card_id)?;
        let account = state.account(card.card_account_id)?;

        let (entry, main) = credit.plan(&card, &account, Utc::now())?;
        state.entries.push(entry.clone());
        state.mains.push(main);
        Ok(entry)
    }

    async fn settle_pending_credit(&self, entry_id: Uuid) -> AppResult<SettlementOutcome> {
        let mut state = self.state.lock();
        let entry = state.entry_mut(entry_id)?.clone();
        let card = state.card(entry.card_id)?;
        let account = state.account(card.card_account_id)?;

        let outcome = plan_settlement(&entry, &card, &account, Utc::now())?;
        if let SettlementOutcome::Settled {
            entry: settled,
            card_balance,
            account_balance,
        } = &outcome
        {
            *state.entry_mut(entry_id)? = settled.clone();
            state.set_main_status(entry_id, EntryStatus::Successful);
            state.card_mut(card.id)?.balance = *card_balance;
            if let Some(account) = state.accounts.get_mut(&account.id) {
                account.balance = *account_balance;
            }
        }
        Ok(outcome)
    }

    async fn transfer_balance(
        &self,
        source_card_id: Uuid,
        destination_card_id: Uuid,
    ) -> AppResult<Option<BalanceTransfer>> {
        let mut state = self.state.lock();
        let source = state.card(source_card_id)?;
        let destination = state.card(destination_card_id)?;

        let Some(transfer) = plan_transfer(&source, &destination, Utc::now())? else {
            return Ok(None);
        };

        state.card_mut(source.id)?.balance = transfer.source_balance;
        state.card_mut(destination.id)?.balance = transfer.destination_balance;
        state.entries.push(transfer.source_entry.clone());
        state.entries.push(transfer.destination_entry.clone());
        state.mains.push(transfer.source_main.clone());
        state.mains.push(transfer.destination_main.clone());
        Ok(Some(transfer))
    }
}

// ==================== Locks and escrow ====================

#[derive(Default)]
pub struct MemoryLocks {
    held: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryLocks {
    pub fn is_held(&self, name: &str) -> bool {
        self.held
            .lock()
            .get(name)
            .is_some_and(|(_, expires)| *expires > Instant::now())
    }
}

#[async_trait]
impl LockService for MemoryLocks {
    async fn try_acquire(&self, key: &str, ttl: Duration) -> AppResult<Option<LockGuard>> {
        let mut held = self.held.lock();
        let now = Instant::now();
        if held.get(key).is_some_and(|(_, expires)| *expires > now) {
            return Ok(None);
        }

        let token = Uuid::new_v4().to_string();
        held.insert(key.to_string(), (token.clone(), now + ttl));
        Ok(Some(LockGuard {
            key: key.to_string(),
            token,
        }))
    }

    async fn release(&self, guard: &LockGuard) -> AppResult<bool> {
        let mut held = self.held.lock();
        match held.get(&guard.key) {
            Some((token, _)) if *token == guard.token => {
                held.remove(&guard.key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[derive(Default)]
pub struct MemoryEscrow {
    contexts: Mutex<HashMap<String, FundingContext>>,
}

impl MemoryEscrow {
    pub fn context(&self, reference: &str) -> Option<FundingContext> {
        self.contexts.lock().get(reference).cloned()
    }
}

#[async_trait]
impl EscrowStore for MemoryEscrow {
    async fn store(&self, context: &FundingContext) -> AppResult<()> {
        self.contexts
            .lock()
            .insert(context.exchange_reference.clone(), context.clone());
        Ok(())
    }

    async fn get(&self, reference: &str) -> AppResult<Option<FundingContext>> {
        Ok(self.context(reference))
    }

    async fn update(
        &self,
        reference: &str,
        update: &FundingContextUpdate,
    ) -> AppResult<FundingContext> {
        let mut contexts = self.contexts.lock();
        let context = contexts
            .get_mut(reference)
            .ok_or_else(|| AppError::FundingContextNotFound(reference.to_string()))?;
        context.apply(update);
        Ok(context.clone())
    }

    async fn remove(&self, reference: &str) -> AppResult<bool> {
        Ok(self.contexts.lock().remove(reference).is_some())
    }
}

// ==================== External collaborators ====================

const DEPOSIT_ADDRESS: &str = "9xQeWvG816bUx9EPjHmaT23yvVM2ZWbrrpZb9PusVFin";

#[derive(Default)]
struct ProviderState {
    failing_charges: u32,
    charges: Vec<(String, i64, String)>,
    fail_disputes: bool,
    updates: Vec<(String, CardUpdate)>,
}

#[derive(Default)]
pub struct FakeCardProvider {
    state: Mutex<ProviderState>,
}

impl FakeCardProvider {
    pub fn fail_next_charges(&self, n: u32) {
        self.state.lock().failing_charges = n;
    }

    pub fn fail_disputes(&self) {
        self.state.lock().fail_disputes = true;
    }

    /// Every charge call, failed ones included: (card reference, amount, description)
    pub fn charges(&self) -> Vec<(String, i64, String)> {
        self.state.lock().charges.clone()
    }

    pub fn charge_calls(&self) -> usize {
        self.state.lock().charges.len()
    }

    pub fn updates(&self) -> Vec<(String, CardUpdate)> {
        self.state.lock().updates.clone()
    }

    pub fn deposit_address_value(&self) -> String {
        DEPOSIT_ADDRESS.to_string()
    }
}

#[async_trait]
impl CardProvider for FakeCardProvider {
    async fn create_charge(
        &self,
        card_reference: &str,
        amount: i64,
        description: &str,
    ) -> AppResult<ProviderCharge> {
        let mut state = self.state.lock();
        state
            .charges
            .push((card_reference.to_string(), amount, description.to_string()));
        if state.failing_charges > 0 {
            state.failing_charges -= 1;
            return Err(AppError::Provider("503 Service Unavailable".to_string()));
        }
        Ok(ProviderCharge {
            reference: format!("chg_{}", state.charges.len()),
        })
    }

    async fn create_dispute(
        &self,
        transaction_reference: &str,
        _evidence: Option<&str>,
    ) -> AppResult<ProviderDispute> {
        if self.state.lock().fail_disputes {
            return Err(AppError::Provider("dispute endpoint unavailable".to_string()));
        }
        Ok(ProviderDispute {
            reference: format!("dsp_{}", transaction_reference),
            status: DisputeStatus::Pending,
        })
    }

    async fn update_card(&self, card_reference: &str, update: &CardUpdate) -> AppResult<()> {
        self.state
            .lock()
            .updates
            .push((card_reference.to_string(), update.clone()));
        Ok(())
    }

    async fn deposit_address(&self, _account_reference: &str, _network: &str) -> AppResult<String> {
        Ok(DEPOSIT_ADDRESS.to_string())
    }
}

#[derive(Default)]
struct FiatState {
    balance: i64,
    transfers: Vec<FiatTransferRequest>,
}

#[derive(Default)]
pub struct FakeFiatWallet {
    state: Mutex<FiatState>,
}

impl FakeFiatWallet {
    pub fn set_balance(&self, balance: i64) {
        self.state.lock().balance = balance;
    }

    pub fn balance_now(&self) -> i64 {
        self.state.lock().balance
    }

    pub fn transfers(&self) -> Vec<FiatTransferRequest> {
        self.state.lock().transfers.clone()
    }
}

#[async_trait]
impl FiatWallet for FakeFiatWallet {
    async fn balance(&self, _user_id: Uuid, _asset: &str) -> AppResult<i64> {
        Ok(self.state.lock().balance)
    }

    async fn transfer_to_address(
        &self,
        _user_id: Uuid,
        request: &FiatTransferRequest,
    ) -> AppResult<RailTransfer> {
        let mut state = self.state.lock();
        if state.balance < request.amount {
            return Err(AppError::Wallet("insufficient wallet balance".to_string()));
        }
        state.balance -= request.amount;
        state.transfers.push(request.clone());
        Ok(RailTransfer {
            reference: format!("fiat_{}", state.transfers.len()),
        })
    }
}

#[derive(Default)]
struct BlockchainState {
    failing: u32,
    keys: Vec<String>,
}

#[derive(Default)]
pub struct FakeBlockchainWallet {
    state: Mutex<BlockchainState>,
}

impl FakeBlockchainWallet {
    pub fn fail_next(&self, n: u32) {
        self.state.lock().failing = n;
    }

    /// Idempotency key of every call, failed ones included
    pub fn idempotency_keys(&self) -> Vec<String> {
        self.state.lock().keys.clone()
    }
}

#[async_trait]
impl BlockchainWallet for FakeBlockchainWallet {
    async fn initiate_transaction(
        &self,
        _user_id: Uuid,
        request: &BlockchainTransferRequest,
    ) -> AppResult<RailTransfer> {
        let mut state = self.state.lock();
        state.keys.push(request.idempotency_key.clone());
        if state.failing > 0 {
            state.failing -= 1;
            return Err(AppError::Wallet("node timeout".to_string()));
        }
        Ok(RailTransfer {
            reference: format!("bc_{}", state.keys.len()),
        })
    }
}

struct ExchangeState {
    usd_amount: Decimal,
    status: ExchangeStatus,
}

pub struct FakeExchange {
    state: Mutex<ExchangeState>,
}

impl Default for FakeExchange {
    fn default() -> Self {
        Self {
            state: Mutex::new(ExchangeState {
                usd_amount: Decimal::new(1000, 2),
                status: ExchangeStatus::Completed,
            }),
        }
    }
}

impl FakeExchange {
    /// USD amount every new quote converts to
    pub fn quote_usd(&self, amount: Decimal) {
        self.state.lock().usd_amount = amount;
    }

    pub fn execution_status(&self, status: ExchangeStatus) {
        self.state.lock().status = status;
    }
}

#[async_trait]
impl ExchangeService for FakeExchange {
    async fn initialize(&self, request: &ExchangeQuoteRequest) -> AppResult<ExchangeQuote> {
        Ok(ExchangeQuote {
            reference: format!("ex_{}", Uuid::new_v4().simple()),
            from_currency: request.from_currency.clone(),
            source_amount: request.amount,
            usd_amount_after_exchange: self.state.lock().usd_amount,
            exchange_fee: Decimal::ZERO,
        })
    }

    async fn execute(&self, reference: &str) -> AppResult<ExchangeExecution> {
        let status = self.state.lock().status;
        Ok(ExchangeExecution {
            reference: reference.to_string(),
            status,
            failure_reason: (status == ExchangeStatus::Failed)
                .then(|| "Quoted rate expired".to_string()),
        })
    }
}

#[derive(Default)]
struct QueueState {
    jobs: Vec<Job>,
    reject: bool,
}

/// Records jobs instead of running them
#[derive(Default)]
pub struct RecordingQueue {
    state: Mutex<QueueState>,
}

impl RecordingQueue {
    pub fn jobs(&self) -> Vec<Job> {
        self.state.lock().jobs.clone()
    }

    pub fn reject_all(&self) {
        self.state.lock().reject = true;
    }
}

#[async_trait]
impl JobQueue for RecordingQueue {
    async fn enqueue(&self, job: Job, _options: JobOptions) -> AppResult<JobHandle> {
        let mut state = self.state.lock();
        if state.reject {
            return Err(AppError::Queue("queue unavailable".to_string()));
        }
        state.jobs.push(job);
        Ok(JobHandle {
            id: Uuid::new_v4(),
            queue: FUNDING_QUEUE.to_string(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoredStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

struct JobRow {
    queue: String,
    job: Job,
    status: StoredStatus,
    attempts: u32,
    max_attempts: u32,
    backoff_base: Duration,
    run_at: Instant,
    locked_until: Option<Instant>,
    last_error: Option<String>,
}

/// Job table kept in memory, with the same claim rules as `funding_jobs`
#[derive(Default)]
pub struct MemoryJobStore {
    rows: Mutex<Vec<(Uuid, JobRow)>>,
}

impl MemoryJobStore {
    pub fn status(&self, id: Uuid) -> Option<StoredStatus> {
        self.rows
            .lock()
            .iter()
            .find(|(row_id, _)| *row_id == id)
            .map(|(_, row)| row.status)
    }

    pub fn last_error(&self, id: Uuid) -> Option<String> {
        self.rows
            .lock()
            .iter()
            .find(|(row_id, _)| *row_id == id)
            .and_then(|(_, row)| row.last_error.clone())
    }

    fn update(&self, id: Uuid, f: impl FnOnce(&mut JobRow)) -> AppResult<()> {
        let mut rows = self.rows.lock();
        let (_, row) = rows
            .iter_mut()
            .find(|(row_id, _)| *row_id == id)
            .ok_or_else(|| AppError::NotFound(format!("job {}", id)))?;
        f(row);
        Ok(())
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert(&self, queue: &str, job: &Job, options: JobOptions) -> AppResult<JobHandle> {
        let id = Uuid::new_v4();
        self.rows.lock().push((
            id,
            JobRow {
                queue: queue.to_string(),
                job: job.clone(),
                status: StoredStatus::Queued,
                attempts: 0,
                max_attempts: options.attempts.max(1),
                backoff_base: options.backoff_base,
                run_at: Instant::now(),
                locked_until: None,
                last_error: None,
            },
        ));
        Ok(JobHandle {
            id,
            queue: queue.to_string(),
        })
    }

    async fn claim(
        &self,
        queue: &str,
        limit: usize,
        visibility: Duration,
    ) -> AppResult<Vec<StoredJob>> {
        let now = Instant::now();
        let mut rows = self.rows.lock();
        let mut claimed = Vec::new();

        for (id, row) in rows.iter_mut() {
            if claimed.len() >= limit {
                break;
            }
            let due = row.queue == queue
                && match row.status {
                    StoredStatus::Queued => row.run_at <= now,
                    StoredStatus::Running => row.locked_until.is_some_and(|until| until <= now),
                    _ => false,
                };
            if !due {
                continue;
            }

            row.status = StoredStatus::Running;
            row.attempts = (row.attempts + 1).min(row.max_attempts);
            row.locked_until = Some(now + visibility);
            claimed.push(StoredJob {
                id: *id,
                job: row.job.clone(),
                attempt: row.attempts,
                max_attempts: row.max_attempts,
                backoff_base: row.backoff_base,
            });
        }
        Ok(claimed)
    }

    async fn complete(&self, id: Uuid) -> AppResult<()> {
        self.update(id, |row| {
            row.status = StoredStatus::Completed;
            row.locked_until = None;
            row.last_error = None;
        })
    }

    async fn retry_later(&self, id: Uuid, delay: Duration, error: &str) -> AppResult<()> {
        self.update(id, |row| {
            row.status = StoredStatus::Queued;
            row.run_at = Instant::now() + delay;
            row.locked_until = None;
            row.last_error = Some(error.to_string());
        })
    }

    async fn fail(&self, id: Uuid, error: &str) -> AppResult<()> {
        self.update(id, |row| {
            row.status = StoredStatus::Failed;
            row.locked_until = None;
            row.last_error = Some(error.to_string());
        })
    }
}

#[derive(Default)]
struct NotifierState {
    delivered: Vec<Notification>,
    failing: bool,
}

#[derive(Default)]
pub struct RecordingNotifier {
    state: Mutex<NotifierState>,
}

impl RecordingNotifier {
    /// Delivered notifications
    pub fn count(&self) -> usize {
        self.state.lock().delivered.len()
    }

    pub fn fail_all(&self) {
        self.state.lock().failing = true;
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: &Notification) -> AppResult<()> {
        let mut state = self.state.lock();
        if state.failing {
            return Err(AppError::Provider("push gateway down".to_string()));
        }
        state.delivered.push(notification.clone());
        Ok(())
    }
}

// ==================== Harness ====================

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub locks: Arc<MemoryLocks>,
    pub escrow: Arc<MemoryEscrow>,
    pub provider: Arc<FakeCardProvider>,
    pub fiat: Arc<FakeFiatWallet>,
    pub blockchain: Arc<FakeBlockchainWallet>,
    pub exchange: Arc<FakeExchange>,
    pub queue: Arc<RecordingQueue>,
    pub notifier: Arc<RecordingNotifier>,
    pub engine: Arc<BalanceEngine>,
    pub fees: FeeSchedule,
    pub funding: FundingConfig,
}

impl Harness {
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::default());
        let locks = Arc::new(MemoryLocks::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let engine = Arc::new(BalanceEngine::new(
            store.clone(),
            Self::lock_manager_for(&locks),
            notifier.clone(),
        ));

        Self {
            store,
            locks,
            escrow: Arc::new(MemoryEscrow::default()),
            provider: Arc::new(FakeCardProvider::default()),
            fiat: Arc::new(FakeFiatWallet::default()),
            blockchain: Arc::new(FakeBlockchainWallet::default()),
            exchange: Arc::new(FakeExchange::default()),
            queue: Arc::new(RecordingQueue::default()),
            notifier,
            engine,
            fees: FeeSchedule::default(),
            funding: FundingConfig::default(),
        }
    }

    fn lock_manager_for(locks: &Arc<MemoryLocks>) -> LockManager {
        LockManager::with_budget(
            locks.clone(),
            Duration::from_secs(2),
            Duration::from_millis(5),
        )
    }

    pub fn lock_manager(&self) -> LockManager {
        Self::lock_manager_for(&self.locks)
    }

    fn charges(&self) -> RetryingChargeExecutor {
        RetryingChargeExecutor::with_policy(
            self.provider.clone(),
            RetryPolicy::fixed(3, Duration::ZERO),
        )
    }

    /// Active card with a pending issuance fee on its own card account
    pub fn seed_card(&self, balance: i64) -> Card {
        self.seed_card_with(balance, |_| {})
    }

    pub fn seed_card_with(&self, balance: i64, f: impl FnOnce(&mut Card)) -> Card {
        let account = CardAccount {
            provider_reference: format!("acct_{}", Uuid::new_v4().simple()),
            balance,
            ..Default::default()
        };
        let mut card = Card {
            card_account_id: account.id,
            user_id: account.user_id,
            provider_reference: format!("card_{}", Uuid::new_v4().simple()),
            balance,
            ..Default::default()
        };
        f(&mut card);

        self.store.insert_account(account);
        self.store.insert_card(card.clone());
        card
    }

    /// Second card on the same card account as `card`
    pub fn seed_sibling_card(&self, card: &Card, balance: i64) -> Card {
        let sibling = Card {
            card_account_id: card.card_account_id,
            user_id: card.user_id,
            provider_reference: format!("card_{}", Uuid::new_v4().simple()),
            balance,
            ..Default::default()
        };
        {
            let mut state = self.store.state.lock();
            if let Some(account) = state.accounts.get_mut(&card.card_account_id) {
                account.balance += balance;
            }
        }
        self.store.insert_card(sibling.clone());
        sibling
    }

    /// Settled card spend posted `days_ago` days ago; balances untouched
    pub fn seed_spend(&self, card: &Card, amount: i64, days_ago: i64, merchant: &str) -> CardLedgerEntry {
        let posted = Utc::now() - ChronoDuration::days(days_ago);
        let entry = CardLedgerEntry {
            card_id: card.id,
            user_id: card.user_id,
            amount,
            direction: EntryDirection::Debit,
            kind: EntryKind::Spend,
            status: EntryStatus::Successful,
            balance_before: card.balance + amount,
            balance_after: card.balance,
            description: Some(format!("Purchase at {}", merchant)),
            provider_reference: Some(format!("txn_{}", Uuid::new_v4().simple())),
            merchant_name: Some(merchant.to_string()),
            created_at: posted,
            updated_at: posted,
            ..Default::default()
        };
        self.store.insert_entry(entry.clone(), card.card_account_id);
        self.store.entry(entry.id)
    }

    pub fn issuance_fee_service(&self) -> IssuanceFeeService {
        IssuanceFeeService::new(
            self.store.clone(),
            self.charges(),
            self.engine.clone(),
            self.lock_manager(),
            self.fees.clone(),
            LOCK_TTL,
        )
    }

    pub fn funding_service(&self) -> FundingService {
        self.funding_service_on(self.queue.clone())
    }

    pub fn funding_service_on(&self, queue: Arc<dyn JobQueue>) -> FundingService {
        FundingService::new(
            self.store.clone(),
            self.store.clone(),
            self.store.clone(),
            self.store.clone(),
            queue,
            self.notifier.clone(),
            self.lock_manager(),
            self.fees.clone(),
            JobOptions::default(),
            LOCK_TTL,
        )
    }

    pub fn saga_handler(&self) -> FundingSagaHandler {
        FundingSagaHandler::new(
            SagaDependencies {
                cards: self.store.clone(),
                accounts: self.store.clone(),
                entries: self.store.clone(),
                ledger: self.store.clone(),
                card_provider: self.provider.clone(),
                fiat_wallet: self.fiat.clone(),
                blockchain_wallet: self.blockchain.clone(),
                exchange: self.exchange.clone(),
                escrow: self.escrow.clone(),
                notifier: self.notifier.clone(),
            },
            self.funding.clone(),
            self.lock_manager(),
            LOCK_TTL,
        )
    }

    pub fn cross_currency_service(&self) -> CrossCurrencyFundingService {
        CrossCurrencyFundingService::new(
            CrossCurrencyDependencies {
                cards: self.store.clone(),
                accounts: self.store.clone(),
                entries: self.store.clone(),
                ledger: self.store.clone(),
                card_provider: self.provider.clone(),
                exchange: self.exchange.clone(),
                escrow: self.escrow.clone(),
                queue: self.queue.clone(),
            },
            self.lock_manager(),
            self.fees.clone(),
            self.funding.clone(),
            JobOptions::default(),
            LOCK_TTL,
        )
    }

    pub fn lifecycle_service(&self) -> CardLifecycleService {
        CardLifecycleService::new(
            self.store.clone(),
            self.store.clone(),
            self.store.clone(),
            self.provider.clone(),
            self.engine.clone(),
            self.lock_manager(),
            LOCK_TTL,
        )
    }

    pub fn dispute_service(&self) -> DisputeService {
        DisputeService::new(
            self.store.clone(),
            self.store.clone(),
            self.store.clone(),
            self.provider.clone(),
            self.charges(),
            self.engine.clone(),
            self.lock_manager(),
            self.fees.clone(),
            DisputeConfig::default(),
            LOCK_TTL,
        )
    }
}
