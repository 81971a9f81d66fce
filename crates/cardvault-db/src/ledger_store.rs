//! Transactional ledger store
//!
//! Every method opens one database transaction, re-reads the rows it is
//! about to change with `FOR UPDATE`, plans the change with the pure
//! functions from `cardvault_core::models::ledger` and commits. Any error
//! drops the transaction, which rolls it back.
//!
//! Row locks are always taken card first, then card account, then ledger
//! entry; two cards are locked in id order.

use async_trait::async_trait;
use cardvault_core::{
    models::{
        plan_settlement, plan_transfer, BalanceMutation, BalanceTransfer, CardLedgerEntry,
        EntryStatus, FeeStatus, MutationOutcome, PendingCredit, SettlementOutcome,
    },
    traits::LedgerStore,
    AppError, AppResult,
};
use chrono::Utc;
use sqlx::{PgConnection, PgPool, Postgres, Transaction};
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

use crate::repositories::card_repo::{lock_card, lock_card_account};
use crate::repositories::dispute_repo::{insert_dispute, insert_dispute_event};
use crate::repositories::ledger_repo::{insert_card_entry, insert_main_entry, lock_card_entry};

/// PostgreSQL implementation of LedgerStore
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn begin(&self) -> AppResult<Transaction<'static, Postgres>> {
        self.pool.begin().await.map_err(|e| {
            error!("Failed to start transaction: {}", e);
            AppError::Transaction(format!("Failed to start transaction: {}", e))
        })
    }

    async fn commit(tx: Transaction<'static, Postgres>) -> AppResult<()> {
        tx.commit().await.map_err(|e| {
            error!("Failed to commit transaction: {}", e);
            AppError::Transaction(format!("Failed to commit transaction: {}", e))
        })
    }

    async fn card_balance(&self, card_id: Uuid) -> AppResult<i64> {
        let result: Option<(i64,)> = sqlx::query_as("SELECT balance FROM cards WHERE id = $1")
            .bind(card_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                error!("Database error reading balance of card {}: {}", card_id, e);
                AppError::Database(format!("Failed to read card balance: {}", e))
            })?;

        result
            .map(|(balance,)| balance)
            .ok_or_else(|| AppError::CardNotFound(card_id.to_string()))
    }
}

async fn write_card_balance(
    conn: &mut PgConnection,
    card_id: Uuid,
    balance: i64,
    fee_status: Option<FeeStatus>,
) -> AppResult<()> {
    sqlx::query(
        r#"
        UPDATE cards
        SET balance = $2,
            issuance_fee_status = COALESCE($3, issuance_fee_status),
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(card_id)
    .bind(balance)
    .bind(fee_status.map(|s| s.to_string()))
    .execute(&mut *conn)
    .await
    .map_err(|e| {
        error!("Failed to update card balance: {}", e);
        AppError::Database(format!("Failed to update card balance: {}", e))
    })?;

    Ok(())
}

async fn write_account_balance(
    conn: &mut PgConnection,
    account_id: Uuid,
    balance: i64,
) -> AppResult<()> {
    sqlx::query(
        r#"
        UPDATE card_accounts
        SET balance = $2,
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(account_id)
    .bind(balance)
    .execute(&mut *conn)
    .await
    .map_err(|e| {
        error!("Failed to update card account balance: {}", e);
        AppError::Database(format!("Failed to update card account balance: {}", e))
    })?;

    Ok(())
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    #[instrument(skip(self, mutation), fields(card_id = %mutation.card_id, amount = mutation.amount))]
    async fn apply_mutation(&self, mutation: &BalanceMutation) -> AppResult<MutationOutcome> {
        let mut tx = self.begin().await?;

        let card = lock_card(&mut tx, mutation.card_id).await?;
        let account = lock_card_account(&mut tx, card.card_account_id).await?;

        let outcome = mutation.plan(&card, &account, Utc::now())?;

        insert_card_entry(&mut tx, &outcome.card_entry).await?;
        insert_main_entry(&mut tx, &outcome.main_entry).await?;
        write_card_balance(&mut tx, card.id, outcome.card_balance, outcome.fee_status).await?;
        write_account_balance(&mut tx, account.id, outcome.account_balance).await?;

        if let Some(dispute) = &outcome.dispute {
            insert_dispute(&mut tx, dispute).await?;
        }
        if let Some(event) = &outcome.dispute_event {
            insert_dispute_event(&mut tx, event).await?;
        }

        Self::commit(tx).await?;

        info!(
            entry_id = %outcome.card_entry.id,
            direction = %outcome.card_entry.direction,
            balance_before = outcome.card_entry.balance_before,
            balance_after = outcome.card_balance,
            "Balance mutation committed"
        );

        Ok(outcome)
    }

    #[instrument(skip(self, credit), fields(card_id = %credit.card_id, amount = credit.amount))]
    async fn record_pending_credit(&self, credit: &PendingCredit) -> AppResult<CardLedgerEntry> {
        let mut tx = self.begin().await?;

        let card = lock_card(&mut tx, credit.card_id).await?;
        let account = lock_card_account(&mut tx, card.card_account_id).await?;

        let (entry, main) = credit.plan(&card, &account, Utc::now())?;

        insert_card_entry(&mut tx, &entry).await?;
        insert_main_entry(&mut tx, &main).await?;

        Self::commit(tx).await?;

        debug!(entry_id = %entry.id, "Pending credit recorded");
        Ok(entry)
    }

    #[instrument(skip(self))]
    async fn settle_pending_credit(&self, entry_id: Uuid) -> AppResult<SettlementOutcome> {
        let mut tx = self.begin().await?;

        // Unlocked read to learn the card, then lock in card -> account -> entry order
        let card_id: Option<(Uuid,)> =
            sqlx::query_as("SELECT card_id FROM card_transactions WHERE id = $1")
                .bind(entry_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| {
                    error!("Database error reading ledger entry {}: {}", entry_id, e);
                    AppError::Database(format!("Failed to read ledger entry: {}", e))
                })?;
        let (card_id,) = card_id.ok_or_else(|| AppError::LedgerEntryNotFound(entry_id.to_string()))?;

        let card = lock_card(&mut tx, card_id).await?;
        let account = lock_card_account(&mut tx, card.card_account_id).await?;
        let entry = lock_card_entry(&mut tx, entry_id).await?;

        let outcome = plan_settlement(&entry, &card, &account, Utc::now())?;

        let (settled, card_balance, account_balance) = match outcome {
            SettlementOutcome::Settled {
                entry,
                card_balance,
                account_balance,
            } => (entry, card_balance, account_balance),
            already @ SettlementOutcome::AlreadySettled { .. } => {
                debug!(entry_id = %entry_id, "Pending credit already settled");
                return Ok(already);
            }
        };

        sqlx::query(
            r#"
            UPDATE card_transactions
            SET status = $2,
                balance_before = $3,
                balance_after = $4,
                updated_at = $5
            WHERE id = $1
            "#,
        )
        .bind(settled.id)
        .bind(EntryStatus::Successful.to_string())
        .bind(settled.balance_before)
        .bind(settled.balance_after)
        .bind(settled.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            error!("Failed to settle ledger entry {}: {}", entry_id, e);
            AppError::Database(format!("Failed to settle ledger entry: {}", e))
        })?;

        sqlx::query(
            r#"
            UPDATE transactions
            SET status = $2, updated_at = NOW()
            WHERE card_entry_id = $1
            "#,
        )
        .bind(settled.id)
        .bind(EntryStatus::Successful.to_string())
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            error!("Failed to settle mirror of {}: {}", entry_id, e);
            AppError::Database(format!("Failed to settle mirror entry: {}", e))
        })?;

        write_card_balance(&mut tx, card.id, card_balance, None).await?;
        write_account_balance(&mut tx, account.id, account_balance).await?;

        Self::commit(tx).await?;

        info!(
            entry_id = %entry_id,
            card_id = %card.id,
            amount = settled.amount,
            balance_after = card_balance,
            "Pending credit settled"
        );

        Ok(SettlementOutcome::Settled {
            entry: settled,
            card_balance,
            account_balance,
        })
    }

    #[instrument(skip(self))]
    async fn transfer_balance(
        &self,
        source_card_id: Uuid,
        destination_card_id: Uuid,
    ) -> AppResult<Option<BalanceTransfer>> {
        if self.card_balance(source_card_id).await? == 0 {
            debug!(card_id = %source_card_id, "Nothing to transfer");
            return Ok(None);
        }

        let mut tx = self.begin().await?;

        let (source, destination) = if source_card_id < destination_card_id {
            let source = lock_card(&mut tx, source_card_id).await?;
            let destination = lock_card(&mut tx, destination_card_id).await?;
            (source, destination)
        } else {
            let destination = lock_card(&mut tx, destination_card_id).await?;
            let source = lock_card(&mut tx, source_card_id).await?;
            (source, destination)
        };

        let Some(transfer) = plan_transfer(&source, &destination, Utc::now())? else {
            return Ok(None);
        };

        insert_card_entry(&mut tx, &transfer.source_entry).await?;
        insert_card_entry(&mut tx, &transfer.destination_entry).await?;
        insert_main_entry(&mut tx, &transfer.source_main).await?;
        insert_main_entry(&mut tx, &transfer.destination_main).await?;
        write_card_balance(&mut tx, source.id, transfer.source_balance, None).await?;
        write_card_balance(&mut tx, destination.id, transfer.destination_balance, None).await?;

        Self::commit(tx).await?;

        info!(
            from = %source.id,
            to = %destination.id,
            amount = transfer.source_entry.amount,
            "Balance transferred"
        );

        Ok(Some(transfer))
    }
}
