//! Freeze, cancel and re-issue
//!
//! Cancellation and balance hand-over take the card's funding lock so they
//! cannot interleave with a settlement on the same card. A re-issue locks
//! both cards in id order.

use cardvault_cache::keys::funding_lock;
use cardvault_core::models::{BalanceTransfer, Card, CardStatus, CardUpdate, Notification};
use cardvault_core::money::from_minor_units;
use cardvault_core::traits::{CardLedgerRepository, CardProvider, CardRepository, LedgerStore};
use cardvault_core::{AppError, AppResult};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument};
use uuid::Uuid;

use crate::balance_engine::BalanceEngine;
use crate::locks::LockManager;

/// Result of a cancel-and-replace
#[derive(Debug, Clone, Serialize)]
pub struct ReissueOutcome {
    pub canceled_card: Card,
    pub replacement_card: Card,
    /// `None` for a zero balance or a failed hand-over
    pub transfer: Option<BalanceTransfer>,
}

pub struct CardLifecycleService {
    cards: Arc<dyn CardRepository>,
    entries: Arc<dyn CardLedgerRepository>,
    ledger: Arc<dyn LedgerStore>,
    provider: Arc<dyn CardProvider>,
    engine: Arc<BalanceEngine>,
    locks: LockManager,
    lock_ttl: Duration,
}

impl CardLifecycleService {
    pub fn new(
        cards: Arc<dyn CardRepository>,
        entries: Arc<dyn CardLedgerRepository>,
        ledger: Arc<dyn LedgerStore>,
        provider: Arc<dyn CardProvider>,
        engine: Arc<BalanceEngine>,
        locks: LockManager,
        lock_ttl: Duration,
    ) -> Self {
        Self {
            cards,
            entries,
            ledger,
            provider,
            engine,
            locks,
            lock_ttl,
        }
    }

    async fn owned_card(&self, user_id: Uuid, card_id: Uuid) -> AppResult<Card> {
        let card = self
            .cards
            .find_by_id(card_id)
            .await?
            .ok_or_else(|| AppError::CardNotFound(card_id.to_string()))?;
        card.ensure_owned_by(user_id)?;
        Ok(card)
    }

    #[instrument(skip(self))]
    pub async fn set_frozen(&self, user_id: Uuid, card_id: Uuid, frozen: bool) -> AppResult<Card> {
        let card = self.owned_card(user_id, card_id).await?;
        if card.status == CardStatus::Canceled {
            return Err(AppError::CardCanceled(card_id.to_string()));
        }
        if card.is_frozen == frozen {
            return Ok(card);
        }

        self.provider
            .update_card(&card.provider_reference, &CardUpdate::frozen(frozen))
            .await?;
        let card = self.cards.set_frozen(card_id, frozen).await?;

        info!(card_id = %card_id, frozen, "Card freeze flag updated");
        Ok(card)
    }

    /// Cancel a card. Refused while any of its entries is still PENDING.
    #[instrument(skip(self))]
    pub async fn cancel_card(&self, user_id: Uuid, card_id: Uuid) -> AppResult<Card> {
        self.locks
            .with_lock(&funding_lock(&card_id.to_string()), self.lock_ttl, || {
                self.cancel_locked(user_id, card_id)
            })
            .await
    }

    async fn cancel_locked(&self, user_id: Uuid, card_id: Uuid) -> AppResult<Card> {
        let card = self.owned_card(user_id, card_id).await?;
        if card.status == CardStatus::Canceled {
            return Err(AppError::AlreadyProcessed(format!(
                "Card {} is already canceled",
                card_id
            )));
        }

        let pending = self.entries.count_pending_for_card(card_id).await?;
        if pending > 0 {
            return Err(AppError::PendingTransactions(format!(
                "Card {} has {} pending transaction(s)",
                card_id, pending
            )));
        }

        self.provider
            .update_card(&card.provider_reference, &CardUpdate::canceled())
            .await?;
        let card = self.cards.mark_canceled(card_id).await?;

        info!(card_id = %card_id, balance = card.balance, "Card canceled");
        Ok(card)
    }

    /// Cancel `old_card_id` (unless already canceled) and move its balance
    /// onto `new_card_id`.
    #[instrument(skip(self))]
    pub async fn reissue(
        &self,
        user_id: Uuid,
        old_card_id: Uuid,
        new_card_id: Uuid,
    ) -> AppResult<ReissueOutcome> {
        if old_card_id == new_card_id {
            return Err(AppError::InvalidInput(
                "Replacement card must differ from the canceled card".to_string(),
            ));
        }

        let replacement = self.owned_card(user_id, new_card_id).await?;
        replacement.ensure_usable()?;

        let old = self.owned_card(user_id, old_card_id).await?;
        let canceled_card = if old.status == CardStatus::Canceled {
            old
        } else {
            self.cancel_card(user_id, old_card_id).await?
        };

        let transfer = self
            .transfer_balance(old_card_id, new_card_id, user_id)
            .await;

        let replacement_card = self.owned_card(user_id, new_card_id).await?;
        Ok(ReissueOutcome {
            canceled_card,
            replacement_card,
            transfer,
        })
    }

    /// Move the whole balance of one card onto another as a linked pair of
    /// entries in one transaction.
    ///
    /// Returns `None` for a zero balance. Failures are logged and also
    /// reported as `None`; nothing is written in that case.
    #[instrument(skip(self))]
    pub async fn transfer_balance(
        &self,
        old_card_id: Uuid,
        new_card_id: Uuid,
        user_id: Uuid,
    ) -> Option<BalanceTransfer> {
        match self.transfer_locked(old_card_id, new_card_id, user_id).await {
            Ok(Some(transfer)) => {
                info!(
                    old_card_id = %old_card_id,
                    new_card_id = %new_card_id,
                    amount = transfer.source_entry.amount,
                    direction = %transfer.source_entry.direction,
                    "Balance transferred"
                );
                self.engine
                    .notify(Notification::new(
                        user_id,
                        "Balance transferred",
                        format!(
                            "{} USD was moved to your new card",
                            from_minor_units(transfer.destination_entry.signed_amount())
                        ),
                    ))
                    .await;
                Some(transfer)
            }
            Ok(None) => {
                info!(old_card_id = %old_card_id, "Zero balance, nothing to transfer");
                None
            }
            Err(e) => {
                error!(
                    old_card_id = %old_card_id,
                    new_card_id = %new_card_id,
                    error = %e,
                    "Balance transfer failed"
                );
                None
            }
        }
    }

    async fn transfer_locked(
        &self,
        old_card_id: Uuid,
        new_card_id: Uuid,
        user_id: Uuid,
    ) -> AppResult<Option<BalanceTransfer>> {
        self.owned_card(user_id, old_card_id).await?;
        self.owned_card(user_id, new_card_id).await?;

        let (first, second) = if old_card_id < new_card_id {
            (old_card_id, new_card_id)
        } else {
            (new_card_id, old_card_id)
        };

        let outer = self
            .locks
            .acquire(&funding_lock(&first.to_string()), self.lock_ttl)
            .await?;
        let result = match self
            .locks
            .acquire(&funding_lock(&second.to_string()), self.lock_ttl)
            .await
        {
            Ok(inner) => {
                let result = self.ledger.transfer_balance(old_card_id, new_card_id).await;
                self.locks.release(&inner).await;
                result
            }
            Err(e) => Err(e),
        };
        self.locks.release(&outer).await;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Harness;
    use cardvault_core::models::{
        EntryDirection, EntryKind, EntryStatus, FundingRail,
    };

    #[tokio::test]
    async fn test_freeze_and_unfreeze() {
        let h = Harness::new();
        let card = h.seed_card(0);
        let service = h.lifecycle_service();

        let frozen = service.set_frozen(card.user_id, card.id, true).await.unwrap();
        assert!(frozen.is_frozen);
        assert_eq!(h.provider.updates().len(), 1);

        let thawed = service.set_frozen(card.user_id, card.id, false).await.unwrap();
        assert!(!thawed.is_frozen);
        assert_eq!(h.provider.updates().len(), 2);
    }

    #[tokio::test]
    async fn test_freeze_canceled_card_fails() {
        let h = Harness::new();
        let card = h.seed_card_with(0, |c| c.status = CardStatus::Canceled);

        let result = h
            .lifecycle_service()
            .set_frozen(card.user_id, card.id, true)
            .await;
        assert!(matches!(result, Err(AppError::CardCanceled(_))));
        assert!(h.provider.updates().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_refused_with_pending_entries() {
        let h = Harness::new();
        let card = h.seed_card(500);
        h.funding_service()
            .request_funding(card.user_id, card.id, 1000, FundingRail::Fiat)
            .await
            .unwrap();

        let result = h.lifecycle_service().cancel_card(card.user_id, card.id).await;

        assert!(matches!(result, Err(AppError::PendingTransactions(_))));
        assert_eq!(h.store.card(card.id).status, CardStatus::Active);
    }

    #[tokio::test]
    async fn test_cancel_marks_canceled_and_frozen() {
        let h = Harness::new();
        let card = h.seed_card(500);
        let service = h.lifecycle_service();

        let canceled = service.cancel_card(card.user_id, card.id).await.unwrap();
        assert_eq!(canceled.status, CardStatus::Canceled);
        assert!(canceled.is_frozen);

        let again = service.cancel_card(card.user_id, card.id).await;
        assert!(matches!(again, Err(AppError::AlreadyProcessed(_))));
    }

    #[tokio::test]
    async fn test_reissue_moves_balance_as_linked_pair() {
        let h = Harness::new();
        let old = h.seed_card(4200);
        let new = h.seed_sibling_card(&old, 0);

        let outcome = h
            .lifecycle_service()
            .reissue(old.user_id, old.id, new.id)
            .await
            .unwrap();

        assert_eq!(outcome.canceled_card.status, CardStatus::Canceled);
        let transfer = outcome.transfer.unwrap();
        assert_eq!(transfer.source_entry.amount, 4200);
        assert_eq!(transfer.destination_entry.amount, 4200);
        assert_eq!(transfer.source_entry.direction, EntryDirection::Debit);
        assert_eq!(transfer.source_entry.kind, EntryKind::Transfer);
        assert_eq!(transfer.destination_entry.direction, EntryDirection::Credit);
        assert_eq!(transfer.destination_entry.kind, EntryKind::Deposit);
        assert_eq!(
            transfer.source_entry.linked_entry_id,
            Some(transfer.destination_entry.id)
        );
        assert_eq!(
            transfer.destination_entry.linked_entry_id,
            Some(transfer.source_entry.id)
        );
        assert!(transfer.source_entry.is_balanced());
        assert!(transfer.destination_entry.is_balanced());

        assert_eq!(h.store.card(old.id).balance, 0);
        assert_eq!(h.store.card(new.id).balance, 4200);
        assert_eq!(outcome.replacement_card.balance, 4200);
        assert_eq!(h.store.account(old.card_account_id).balance, 4200);
        assert!(h
            .store
            .entries(new.id)
            .iter()
            .all(|e| e.status == EntryStatus::Successful));
    }

    #[tokio::test]
    async fn test_zero_balance_transfers_nothing() {
        let h = Harness::new();
        let old = h.seed_card(0);
        let new = h.seed_sibling_card(&old, 0);

        let outcome = h
            .lifecycle_service()
            .reissue(old.user_id, old.id, new.id)
            .await
            .unwrap();

        assert!(outcome.transfer.is_none());
        assert_eq!(h.store.entry_count(old.id), 0);
        assert_eq!(h.store.entry_count(new.id), 0);
    }

    #[tokio::test]
    async fn test_negative_balance_is_carried_over() {
        let h = Harness::new();
        let old = h.seed_card_with(-300, |c| c.status = CardStatus::Canceled);
        let new = h.seed_sibling_card(&old, 1000);

        let transfer = h
            .lifecycle_service()
            .transfer_balance(old.id, new.id, old.user_id)
            .await
            .unwrap();

        assert_eq!(transfer.source_entry.direction, EntryDirection::Credit);
        assert_eq!(transfer.destination_entry.direction, EntryDirection::Debit);
        assert_eq!(transfer.source_entry.amount, 300);
        assert_eq!(h.store.card(old.id).balance, 0);
        assert_eq!(h.store.card(new.id).balance, 700);
    }

    #[tokio::test]
    async fn test_failed_transfer_writes_nothing() {
        let h = Harness::new();
        let old = h.seed_card(800);
        // Different card account: the pair cannot be planned
        let stranger = h.seed_card(0);
        h.store.update_card(stranger.id, |c| c.user_id = old.user_id);

        let transfer = h
            .lifecycle_service()
            .transfer_balance(old.id, stranger.id, old.user_id)
            .await;

        assert!(transfer.is_none());
        assert_eq!(h.store.card(old.id).balance, 800);
        assert_eq!(h.store.entry_count(old.id), 0);
        assert_eq!(h.store.entry_count(stranger.id), 0);
    }
}
