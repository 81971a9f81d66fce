//! Card ledger entry repository
//!
//! Reads plus the status bookkeeping that never touches a balance. The row
//! types and insert helpers here are shared with `PgLedgerStore`.

use cardvault_core::{
    models::{CardLedgerEntry, EntryDirection, EntryKind, EntryStatus, MainLedgerEntry},
    traits::CardLedgerRepository,
    AppError, AppResult,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};
use tracing::{debug, error, instrument, warn};
use uuid::Uuid;

pub(crate) const CARD_ENTRY_COLUMNS: &str = "id, card_id, user_id, main_entry_id, linked_entry_id, \
     amount, direction, kind, status, balance_before, balance_after, description, \
     provider_reference, rail_reference, merchant_name, merchant_category, \
     merchant_category_code, failure_reason, created_at, updated_at";

/// PostgreSQL implementation of CardLedgerRepository
pub struct PgCardLedgerRepository {
    pool: PgPool,
}

impl PgCardLedgerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CardLedgerRepository for PgCardLedgerRepository {
    #[instrument(skip(self))]
    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<CardLedgerEntry>> {
        debug!("Finding card ledger entry {}", id);

        let sql = format!(
            "SELECT {} FROM card_transactions WHERE id = $1",
            CARD_ENTRY_COLUMNS
        );
        let row = sqlx::query_as::<sqlx::Postgres, CardEntryRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                error!("Database error finding ledger entry {}: {}", id, e);
                AppError::Database(format!("Failed to find ledger entry: {}", e))
            })?;

        Ok(row.map(Into::into))
    }

    #[instrument(skip(self))]
    async fn count_pending_for_card(&self, card_id: Uuid) -> AppResult<i64> {
        let result: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM card_transactions WHERE card_id = $1 AND status = 'PENDING'",
        )
        .bind(card_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error counting pending entries: {}", e);
            AppError::Database(format!("Failed to count pending entries: {}", e))
        })?;

        Ok(result.0)
    }

    #[instrument(skip(self, reason))]
    async fn record_failure(
        &self,
        id: Uuid,
        reason: &str,
        decline: bool,
    ) -> AppResult<CardLedgerEntry> {
        let mut tx = self.pool.begin().await.map_err(|e| {
            error!("Failed to start transaction: {}", e);
            AppError::Transaction(format!("Failed to start transaction: {}", e))
        })?;

        let current = lock_card_entry(&mut tx, id).await?;
        if current.status.is_terminal() {
            debug!(entry_id = %id, status = %current.status, "Entry already final, failure not recorded");
            return Ok(current);
        }

        let sql = format!(
            r#"
            UPDATE card_transactions
            SET failure_reason = $2,
                status = CASE WHEN $3 THEN 'DECLINED' ELSE status END,
                updated_at = NOW()
            WHERE id = $1 AND status = 'PENDING'
            RETURNING {}
            "#,
            CARD_ENTRY_COLUMNS
        );
        let row = sqlx::query_as::<sqlx::Postgres, CardEntryRow>(&sql)
            .bind(id)
            .bind(reason)
            .bind(decline)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| {
                error!("Database error recording failure on {}: {}", id, e);
                AppError::Database(format!("Failed to record failure: {}", e))
            })?;

        if decline {
            sqlx::query(
                r#"
                UPDATE transactions
                SET status = 'DECLINED', updated_at = NOW()
                WHERE card_entry_id = $1 AND status = 'PENDING'
                "#,
            )
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                error!("Database error declining mirror of {}: {}", id, e);
                AppError::Database(format!("Failed to decline mirror entry: {}", e))
            })?;
        }

        tx.commit().await.map_err(|e| {
            error!("Failed to commit transaction: {}", e);
            AppError::Transaction(format!("Failed to commit transaction: {}", e))
        })?;

        let entry: CardLedgerEntry = row.into();
        if decline {
            warn!(entry_id = %id, status = %entry.status, "Card ledger entry declined");
        }
        Ok(entry)
    }

    #[instrument(skip(self))]
    async fn set_rail_reference(&self, id: Uuid, reference: &str) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE card_transactions
            SET rail_reference = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(reference)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error storing rail reference on {}: {}", id, e);
            AppError::Database(format!("Failed to store rail reference: {}", e))
        })?;

        Ok(())
    }
}

/// Insert a card-level leg
pub(crate) async fn insert_card_entry(
    conn: &mut PgConnection,
    entry: &CardLedgerEntry,
) -> AppResult<()> {
    sqlx::query(
        r#"
        INSERT INTO card_transactions (
            id, card_id, user_id, main_entry_id, linked_entry_id,
            amount, direction, kind, status, balance_before, balance_after,
            description, provider_reference, rail_reference,
            merchant_name, merchant_category, merchant_category_code,
            failure_reason, created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20)
        "#,
    )
    .bind(entry.id)
    .bind(entry.card_id)
    .bind(entry.user_id)
    .bind(entry.main_entry_id)
    .bind(entry.linked_entry_id)
    .bind(entry.amount)
    .bind(entry.direction.to_string())
    .bind(entry.kind.to_string())
    .bind(entry.status.to_string())
    .bind(entry.balance_before)
    .bind(entry.balance_after)
    .bind(&entry.description)
    .bind(&entry.provider_reference)
    .bind(&entry.rail_reference)
    .bind(&entry.merchant_name)
    .bind(&entry.merchant_category)
    .bind(&entry.merchant_category_code)
    .bind(&entry.failure_reason)
    .bind(entry.created_at)
    .bind(entry.updated_at)
    .execute(&mut *conn)
    .await
    .map_err(|e| {
        error!("Failed to insert card ledger entry: {}", e);
        AppError::Database(format!("Failed to insert card ledger entry: {}", e))
    })?;

    Ok(())
}

/// Insert the account-level mirror of a card leg
pub(crate) async fn insert_main_entry(
    conn: &mut PgConnection,
    entry: &MainLedgerEntry,
) -> AppResult<()> {
    sqlx::query(
        r#"
        INSERT INTO transactions (
            id, user_id, card_account_id, card_entry_id, amount, direction,
            kind, status, currency, description, created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        "#,
    )
    .bind(entry.id)
    .bind(entry.user_id)
    .bind(entry.card_account_id)
    .bind(entry.card_entry_id)
    .bind(entry.amount)
    .bind(entry.direction.to_string())
    .bind(entry.kind.to_string())
    .bind(entry.status.to_string())
    .bind(&entry.currency)
    .bind(&entry.description)
    .bind(entry.created_at)
    .bind(entry.updated_at)
    .execute(&mut *conn)
    .await
    .map_err(|e| {
        error!("Failed to insert main ledger entry: {}", e);
        AppError::Database(format!("Failed to insert main ledger entry: {}", e))
    })?;

    Ok(())
}

/// Lock and load a card ledger entry inside a transaction
pub(crate) async fn lock_card_entry(
    conn: &mut PgConnection,
    id: Uuid,
) -> AppResult<CardLedgerEntry> {
    let sql = format!(
        "SELECT {} FROM card_transactions WHERE id = $1 FOR UPDATE",
        CARD_ENTRY_COLUMNS
    );
    let row = sqlx::query_as::<sqlx::Postgres, CardEntryRow>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| {
            error!("Failed to lock ledger entry {}: {}", id, e);
            AppError::Database(format!("Failed to lock ledger entry: {}", e))
        })?
        .ok_or_else(|| AppError::LedgerEntryNotFound(id.to_string()))?;

    Ok(row.into())
}

/// Database row representation
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct CardEntryRow {
    id: Uuid,
    card_id: Uuid,
    user_id: Uuid,
    main_entry_id: Option<Uuid>,
    linked_entry_id: Option<Uuid>,
    amount: i64,
    direction: String,
    kind: String,
    status: String,
    balance_before: i64,
    balance_after: i64,
    description: Option<String>,
    provider_reference: Option<String>,
    rail_reference: Option<String>,
    merchant_name: Option<String>,
    merchant_category: Option<String>,
    merchant_category_code: Option<String>,
    failure_reason: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<CardEntryRow> for CardLedgerEntry {
    fn from(row: CardEntryRow) -> Self {
        Self {
            id: row.id,
            card_id: row.card_id,
            user_id: row.user_id,
            main_entry_id: row.main_entry_id,
            linked_entry_id: row.linked_entry_id,
            amount: row.amount,
            direction: EntryDirection::from_str(&row.direction).unwrap_or(EntryDirection::Debit),
            kind: EntryKind::from_str(&row.kind).unwrap_or(EntryKind::Spend),
            status: EntryStatus::from_str(&row.status).unwrap_or(EntryStatus::Pending),
            balance_before: row.balance_before,
            balance_after: row.balance_after,
            description: row.description,
            provider_reference: row.provider_reference,
            rail_reference: row.rail_reference,
            merchant_name: row.merchant_name,
            merchant_category: row.merchant_category,
            merchant_category_code: row.merchant_category_code,
            failure_reason: row.failure_reason,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_conversion() {
        let now = Utc::now();
        let row = CardEntryRow {
            id: Uuid::new_v4(),
            card_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            main_entry_id: Some(Uuid::new_v4()),
            linked_entry_id: None,
            amount: 2599,
            direction: "DEBIT".to_string(),
            kind: "SPEND".to_string(),
            status: "SUCCESSFUL".to_string(),
            balance_before: 10000,
            balance_after: 7401,
            description: Some("Coffee".to_string()),
            provider_reference: Some("txn_1".to_string()),
            rail_reference: None,
            merchant_name: Some("Blue Bottle".to_string()),
            merchant_category: None,
            merchant_category_code: Some("5814".to_string()),
            failure_reason: None,
            created_at: now,
            updated_at: now,
        };

        let entry: CardLedgerEntry = row.into();
        assert_eq!(entry.direction, EntryDirection::Debit);
        assert_eq!(entry.kind, EntryKind::Spend);
        assert_eq!(entry.status, EntryStatus::Successful);
        assert!(entry.is_balanced());
    }
}
