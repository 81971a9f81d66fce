//! Card and card-account repositories
//!
//! Balances are never written here; see `PgLedgerStore`.

use cardvault_core::{
    models::{Card, CardAccount, CardStatus, FeeStatus},
    traits::{CardAccountRepository, CardRepository},
    AppError, AppResult,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

pub(crate) const CARD_COLUMNS: &str = "id, card_account_id, user_id, provider_reference, status, \
     balance, is_frozen, issuance_fee_status, created_at, updated_at";

pub(crate) const CARD_ACCOUNT_COLUMNS: &str =
    "id, user_id, provider_reference, balance, created_at, updated_at";

/// PostgreSQL implementation of CardRepository
pub struct PgCardRepository {
    pool: PgPool,
}

impl PgCardRepository {
    /// Create a new card repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CardRepository for PgCardRepository {
    #[instrument(skip(self))]
    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<Card>> {
        debug!("Finding card by id: {}", id);

        let sql = format!("SELECT {} FROM cards WHERE id = $1", CARD_COLUMNS);
        let row = sqlx::query_as::<sqlx::Postgres, CardRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                error!("Database error finding card {}: {}", id, e);
                AppError::Database(format!("Failed to find card: {}", e))
            })?;

        Ok(row.map(Into::into))
    }

    #[instrument(skip(self))]
    async fn set_frozen(&self, id: Uuid, frozen: bool) -> AppResult<Card> {
        let sql = format!(
            "UPDATE cards SET is_frozen = $2, updated_at = NOW() WHERE id = $1 RETURNING {}",
            CARD_COLUMNS
        );
        let row = sqlx::query_as::<sqlx::Postgres, CardRow>(&sql)
            .bind(id)
            .bind(frozen)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                error!("Database error freezing card {}: {}", id, e);
                AppError::Database(format!("Failed to update card: {}", e))
            })?
            .ok_or_else(|| AppError::CardNotFound(id.to_string()))?;

        info!(card_id = %id, frozen, "Card freeze flag updated");
        Ok(row.into())
    }

    #[instrument(skip(self))]
    async fn set_fee_status(&self, id: Uuid, status: FeeStatus) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE cards
            SET issuance_fee_status = $2,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error updating fee status for card {}: {}", id, e);
            AppError::Database(format!("Failed to update fee status: {}", e))
        })?;

        if result.rows_affected() == 0 {
            return Err(AppError::CardNotFound(id.to_string()));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn mark_canceled(&self, id: Uuid) -> AppResult<Card> {
        let sql = format!(
            "UPDATE cards SET status = 'CANCELED', is_frozen = TRUE, updated_at = NOW() \
             WHERE id = $1 RETURNING {}",
            CARD_COLUMNS
        );
        let row = sqlx::query_as::<sqlx::Postgres, CardRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                error!("Database error canceling card {}: {}", id, e);
                AppError::Database(format!("Failed to cancel card: {}", e))
            })?
            .ok_or_else(|| AppError::CardNotFound(id.to_string()))?;

        info!(card_id = %id, "Card canceled");
        Ok(row.into())
    }
}

/// PostgreSQL implementation of CardAccountRepository
pub struct PgCardAccountRepository {
    pool: PgPool,
}

impl PgCardAccountRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CardAccountRepository for PgCardAccountRepository {
    #[instrument(skip(self))]
    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<CardAccount>> {
        let sql = format!(
            "SELECT {} FROM card_accounts WHERE id = $1",
            CARD_ACCOUNT_COLUMNS
        );
        let row = sqlx::query_as::<sqlx::Postgres, CardAccountRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                error!("Database error finding card account {}: {}", id, e);
                AppError::Database(format!("Failed to find card account: {}", e))
            })?;

        Ok(row.map(Into::into))
    }

    #[instrument(skip(self))]
    async fn find_by_user(&self, user_id: Uuid) -> AppResult<Option<CardAccount>> {
        let sql = format!(
            "SELECT {} FROM card_accounts WHERE user_id = $1",
            CARD_ACCOUNT_COLUMNS
        );
        let row = sqlx::query_as::<sqlx::Postgres, CardAccountRow>(&sql)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                error!("Database error finding card account for user {}: {}", user_id, e);
                AppError::Database(format!("Failed to find card account: {}", e))
            })?;

        Ok(row.map(Into::into))
    }
}

/// Lock and load a card row inside a transaction
pub(crate) async fn lock_card(conn: &mut PgConnection, id: Uuid) -> AppResult<Card> {
    let sql = format!("SELECT {} FROM cards WHERE id = $1 FOR UPDATE", CARD_COLUMNS);
    let row = sqlx::query_as::<sqlx::Postgres, CardRow>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| {
            error!("Failed to lock card {}: {}", id, e);
            AppError::Database(format!("Failed to lock card: {}", e))
        })?
        .ok_or_else(|| AppError::CardNotFound(id.to_string()))?;

    Ok(row.into())
}

/// Lock and load a card-account row inside a transaction
pub(crate) async fn lock_card_account(conn: &mut PgConnection, id: Uuid) -> AppResult<CardAccount> {
    let sql = format!(
        "SELECT {} FROM card_accounts WHERE id = $1 FOR UPDATE",
        CARD_ACCOUNT_COLUMNS
    );
    let row = sqlx::query_as::<sqlx::Postgres, CardAccountRow>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| {
            error!("Failed to lock card account {}: {}", id, e);
            AppError::Database(format!("Failed to lock card account: {}", e))
        })?
        .ok_or_else(|| AppError::CardAccountNotFound(id.to_string()))?;

    Ok(row.into())
}

/// Database row representation
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct CardRow {
    id: Uuid,
    card_account_id: Uuid,
    user_id: Uuid,
    provider_reference: String,
    status: String,
    balance: i64,
    is_frozen: bool,
    issuance_fee_status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<CardRow> for Card {
    fn from(row: CardRow) -> Self {
        Self {
            id: row.id,
            card_account_id: row.card_account_id,
            user_id: row.user_id,
            provider_reference: row.provider_reference,
            // Unknown statuses are treated as blocked so no money moves
            status: CardStatus::from_str(&row.status).unwrap_or(CardStatus::Blocked),
            balance: row.balance,
            is_frozen: row.is_frozen,
            issuance_fee_status: FeeStatus::from_str(&row.issuance_fee_status)
                .unwrap_or(FeeStatus::Pending),
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct CardAccountRow {
    id: Uuid,
    user_id: Uuid,
    provider_reference: String,
    balance: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<CardAccountRow> for CardAccount {
    fn from(row: CardAccountRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            provider_reference: row.provider_reference,
            balance: row.balance,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}
