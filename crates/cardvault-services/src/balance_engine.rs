//! Balance Mutation Engine
//!
//! The single writer of card and card-account balances. A mutation runs under
//! a card-scoped lock; the ledger store re-reads both rows inside its own
//! transaction, checks the mutation's preconditions and writes the entry pair
//! and both balances atomically.

use cardvault_core::models::{BalanceMutation, EntryDirection, MutationOutcome, Notification};
use cardvault_core::money::from_minor_units;
use cardvault_core::traits::{LedgerStore, LockGuard, Notifier};
use cardvault_core::AppResult;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

use crate::locks::LockManager;

pub struct BalanceEngine {
    ledger: Arc<dyn LedgerStore>,
    locks: LockManager,
    notifier: Arc<dyn Notifier>,
}

impl BalanceEngine {
    pub fn new(ledger: Arc<dyn LedgerStore>, locks: LockManager, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            ledger,
            locks,
            notifier,
        }
    }

    /// Acquire `lock_name` and apply the mutation under it
    #[instrument(skip(self, mutation), fields(card_id = %mutation.card_id, amount = mutation.amount))]
    pub async fn mutate(
        &self,
        lock_name: &str,
        ttl: Duration,
        mutation: &BalanceMutation,
    ) -> AppResult<MutationOutcome> {
        let guard = self.locks.acquire(lock_name, ttl).await?;
        let result = self.apply(&guard, mutation).await;
        self.locks.release(&guard).await;
        result
    }

    /// Apply a mutation for a caller that already holds the card's lock
    pub async fn apply(
        &self,
        guard: &LockGuard,
        mutation: &BalanceMutation,
    ) -> AppResult<MutationOutcome> {
        let outcome = self.ledger.apply_mutation(mutation).await?;

        info!(
            lock = %guard.key,
            card_id = %mutation.card_id,
            entry_id = %outcome.card_entry.id,
            direction = %mutation.direction,
            kind = %mutation.kind,
            amount = mutation.amount,
            card_balance = outcome.card_balance,
            account_balance = outcome.account_balance,
            "Balance mutation committed"
        );

        self.notify_committed(&outcome).await;
        Ok(outcome)
    }

    /// Best effort; never undoes a committed mutation
    pub async fn notify(&self, notification: Notification) {
        if let Err(e) = self.notifier.notify(&notification).await {
            warn!(user_id = %notification.user_id, error = %e, "Notification failed");
        }
    }

    async fn notify_committed(&self, outcome: &MutationOutcome) {
        let entry = &outcome.card_entry;
        let verb = match entry.direction {
            EntryDirection::Credit => "credited",
            EntryDirection::Debit => "debited",
        };
        let body = format!(
            "{} USD {} ({}). New balance: {} USD",
            from_minor_units(entry.amount),
            verb,
            entry.description.as_deref().unwrap_or(entry.kind.to_string().as_str()),
            from_minor_units(outcome.card_balance),
        );

        self.notify(Notification::new(entry.user_id, format!("Card {}", verb), body))
            .await;
    }
}
