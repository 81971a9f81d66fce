//! Funding job rows
//!
//! Backs the durable job queue. Payloads are stored as JSONB; claims use
//! `FOR UPDATE SKIP LOCKED` so several workers can poll the same queue.

use async_trait::async_trait;
use cardvault_core::{
    models::{Job, JobHandle, JobOptions, StoredJob},
    traits::JobStore,
    AppError, AppResult,
};
use sqlx::PgPool;
use std::time::Duration;
use tracing::{debug, error, instrument, warn};
use uuid::Uuid;

/// PostgreSQL implementation of JobStore
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ClaimedRow {
    id: Uuid,
    payload: String,
    attempts: i32,
    max_attempts: i32,
    backoff_base_ms: i64,
}

impl ClaimedRow {
    fn into_stored(self) -> Result<StoredJob, (Uuid, serde_json::Error)> {
        let job: Job = serde_json::from_str(&self.payload).map_err(|e| (self.id, e))?;
        Ok(StoredJob {
            id: self.id,
            job,
            attempt: self.attempts.max(1) as u32,
            max_attempts: self.max_attempts.max(1) as u32,
            backoff_base: Duration::from_millis(self.backoff_base_ms.max(0) as u64),
        })
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    #[instrument(skip(self, job), fields(job = %job))]
    async fn insert(&self, queue: &str, job: &Job, options: JobOptions) -> AppResult<JobHandle> {
        let payload = serde_json::to_string(job)
            .map_err(|e| AppError::Serialization(format!("Job payload: {}", e)))?;
        let id = Uuid::new_v4();

        sqlx::query(
            r#"
            INSERT INTO funding_jobs (id, queue, job_type, payload, max_attempts, backoff_base_ms)
            VALUES ($1, $2, $3, $4::jsonb, $5, $6)
            "#,
        )
        .bind(id)
        .bind(queue)
        .bind(job.job_type())
        .bind(payload)
        .bind(options.attempts.max(1) as i32)
        .bind(options.backoff_base.as_millis() as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error enqueueing job: {}", e);
            AppError::Queue(format!("Failed to enqueue job: {}", e))
        })?;

        debug!(job_id = %id, queue, "Job stored");
        Ok(JobHandle {
            id,
            queue: queue.to_string(),
        })
    }

    /// A stale claim on the final attempt is re-run as the final attempt
    #[instrument(skip(self))]
    async fn claim(
        &self,
        queue: &str,
        limit: usize,
        visibility: Duration,
    ) -> AppResult<Vec<StoredJob>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let rows = sqlx::query_as::<sqlx::Postgres, ClaimedRow>(
            r#"
            UPDATE funding_jobs
            SET status = 'RUNNING',
                attempts = LEAST(attempts + 1, max_attempts),
                locked_until = NOW() + make_interval(secs => $3),
                updated_at = NOW()
            WHERE id IN (
                SELECT id FROM funding_jobs
                WHERE queue = $1
                  AND ((status = 'QUEUED' AND run_at <= NOW())
                    OR (status = 'RUNNING' AND locked_until <= NOW()))
                ORDER BY run_at
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, payload::text AS payload, attempts, max_attempts, backoff_base_ms
            "#,
        )
        .bind(queue)
        .bind(limit as i64)
        .bind(visibility.as_secs_f64())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error claiming jobs: {}", e);
            AppError::Database(format!("Failed to claim jobs: {}", e))
        })?;

        let mut claimed = Vec::with_capacity(rows.len());
        for row in rows {
            match row.into_stored() {
                Ok(job) => claimed.push(job),
                Err((id, e)) => {
                    warn!(job_id = %id, "Unreadable job payload: {}", e);
                    self.fail(id, &format!("Unreadable payload: {}", e)).await?;
                }
            }
        }
        Ok(claimed)
    }

    #[instrument(skip(self))]
    async fn complete(&self, id: Uuid) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE funding_jobs
            SET status = 'COMPLETED', locked_until = NULL, last_error = NULL, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error completing job {}: {}", id, e);
            AppError::Database(format!("Failed to complete job: {}", e))
        })?;
        Ok(())
    }

    #[instrument(skip(self, last_error))]
    async fn retry_later(&self, id: Uuid, delay: Duration, last_error: &str) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE funding_jobs
            SET status = 'QUEUED',
                run_at = NOW() + make_interval(secs => $2),
                locked_until = NULL,
                last_error = $3,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(delay.as_secs_f64())
        .bind(last_error)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error rescheduling job {}: {}", id, e);
            AppError::Database(format!("Failed to reschedule job: {}", e))
        })?;
        Ok(())
    }

    #[instrument(skip(self, last_error))]
    async fn fail(&self, id: Uuid, last_error: &str) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE funding_jobs
            SET status = 'FAILED', locked_until = NULL, last_error = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(last_error)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error failing job {}: {}", id, e);
            AppError::Database(format!("Failed to mark job failed: {}", e))
        })?;
        Ok(())
    }
}
