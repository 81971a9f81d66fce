//! Dispute repository
//!
//! Disputes and their events are inserted by `PgLedgerStore` together with
//! the dispute fee; this repository only reads them.

use cardvault_core::{
    models::{Dispute, DisputeEvent, DisputeEventType, DisputeStatus},
    traits::DisputeRepository,
    AppError, AppResult,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};
use tracing::{debug, error, instrument};
use uuid::Uuid;

const DISPUTE_COLUMNS: &str = "id, card_entry_id, card_id, user_id, fee_entry_id, \
     provider_reference, status, evidence, created_at, updated_at";

/// PostgreSQL implementation of DisputeRepository
pub struct PgDisputeRepository {
    pool: PgPool,
}

impl PgDisputeRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DisputeRepository for PgDisputeRepository {
    #[instrument(skip(self))]
    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<Dispute>> {
        let sql = format!("SELECT {} FROM disputes WHERE id = $1", DISPUTE_COLUMNS);
        let row = sqlx::query_as::<sqlx::Postgres, DisputeRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                error!("Database error finding dispute {}: {}", id, e);
                AppError::Database(format!("Failed to find dispute: {}", e))
            })?;

        Ok(row.map(Into::into))
    }

    #[instrument(skip(self))]
    async fn find_open_by_entry(&self, card_entry_id: Uuid) -> AppResult<Option<Dispute>> {
        debug!("Looking for an open dispute on entry {}", card_entry_id);

        let sql = format!(
            "SELECT {} FROM disputes WHERE card_entry_id = $1 \
             AND status IN ('PENDING', 'UNDER_REVIEW') \
             ORDER BY created_at DESC LIMIT 1",
            DISPUTE_COLUMNS
        );
        let row = sqlx::query_as::<sqlx::Postgres, DisputeRow>(&sql)
            .bind(card_entry_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                error!("Database error finding disputes for {}: {}", card_entry_id, e);
                AppError::Database(format!("Failed to find disputes: {}", e))
            })?;

        Ok(row.map(Into::into))
    }

    #[instrument(skip(self))]
    async fn events(&self, dispute_id: Uuid) -> AppResult<Vec<DisputeEvent>> {
        let rows = sqlx::query_as::<sqlx::Postgres, DisputeEventRow>(
            r#"
            SELECT id, dispute_id, event_type, from_status, to_status, note, created_at
            FROM dispute_events
            WHERE dispute_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(dispute_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error loading events for {}: {}", dispute_id, e);
            AppError::Database(format!("Failed to load dispute events: {}", e))
        })?;

        Ok(rows.into_iter().map(Into::into).collect())
    }
}

pub(crate) async fn insert_dispute(conn: &mut PgConnection, dispute: &Dispute) -> AppResult<()> {
    sqlx::query(
        r#"
        INSERT INTO disputes (
            id, card_entry_id, card_id, user_id, fee_entry_id,
            provider_reference, status, evidence, created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        "#,
    )
    .bind(dispute.id)
    .bind(dispute.card_entry_id)
    .bind(dispute.card_id)
    .bind(dispute.user_id)
    .bind(dispute.fee_entry_id)
    .bind(&dispute.provider_reference)
    .bind(dispute.status.to_string())
    .bind(&dispute.evidence)
    .bind(dispute.created_at)
    .bind(dispute.updated_at)
    .execute(&mut *conn)
    .await
    .map_err(|e| {
        error!("Failed to insert dispute: {}", e);
        AppError::Database(format!("Failed to insert dispute: {}", e))
    })?;

    Ok(())
}

pub(crate) async fn insert_dispute_event(
    conn: &mut PgConnection,
    event: &DisputeEvent,
) -> AppResult<()> {
    sqlx::query(
        r#"
        INSERT INTO dispute_events (id, dispute_id, event_type, from_status, to_status, note, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(event.id)
    .bind(event.dispute_id)
    .bind(event.event_type.to_string())
    .bind(event.from_status.map(|s| s.to_string()))
    .bind(event.to_status.to_string())
    .bind(&event.note)
    .bind(event.created_at)
    .execute(&mut *conn)
    .await
    .map_err(|e| {
        error!("Failed to insert dispute event: {}", e);
        AppError::Database(format!("Failed to insert dispute event: {}", e))
    })?;

    Ok(())
}

#[derive(Debug, sqlx::FromRow)]
struct DisputeRow {
    id: Uuid,
    card_entry_id: Uuid,
    card_id: Uuid,
    user_id: Uuid,
    fee_entry_id: Option<Uuid>,
    provider_reference: String,
    status: String,
    evidence: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<DisputeRow> for Dispute {
    fn from(row: DisputeRow) -> Self {
        Self {
            id: row.id,
            card_entry_id: row.card_entry_id,
            card_id: row.card_id,
            user_id: row.user_id,
            fee_entry_id: row.fee_entry_id,
            provider_reference: row.provider_reference,
            status: DisputeStatus::from_str(&row.status).unwrap_or_default(),
            evidence: row.evidence,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct DisputeEventRow {
    id: Uuid,
    dispute_id: Uuid,
    event_type: String,
    from_status: Option<String>,
    to_status: String,
    note: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<DisputeEventRow> for DisputeEvent {
    fn from(row: DisputeEventRow) -> Self {
        Self {
            id: row.id,
            dispute_id: row.dispute_id,
            event_type: DisputeEventType::from_str(&row.event_type)
                .unwrap_or(DisputeEventType::StatusChanged),
            from_status: row.from_status.as_deref().and_then(DisputeStatus::from_str),
            to_status: DisputeStatus::from_str(&row.to_status).unwrap_or_default(),
            note: row.note,
            created_at: row.created_at,
        }
    }
}
