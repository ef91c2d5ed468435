//! Durable delivery job queue implementation.
//!
//! Jobs are claimed with `FOR UPDATE SKIP LOCKED` so multiple consumers can
//! poll the same table without double-claiming. Successful jobs are deleted
//! on acknowledgement; failed jobs are re-queued with exponential backoff
//! until their retry budget runs out.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use serde_json::Value as JsonValue;
use sqlx::{Pool, Postgres, Row};
use tokio::sync::Notify;
use uuid::Uuid;

use courier_core::{defaults, DeliveryJob, Error, JobQueue, JobStatus, Result};

/// PostgreSQL implementation of the delivery JobQueue.
pub struct PgJobQueue {
    pool: Pool<Postgres>,
    /// Notify handle for event-driven worker wake.
    notify: Arc<Notify>,
}

impl PgJobQueue {
    /// Create a new PgJobQueue with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self {
            pool,
            notify: Arc::new(Notify::new()),
        }
    }

    /// Get the job notification handle for event-driven waking.
    pub fn job_notify(&self) -> Arc<Notify> {
        self.notify.clone()
    }

    fn parse_job_row(row: sqlx::postgres::PgRow) -> Result<DeliveryJob> {
        let status: String = row.get("status");
        Ok(DeliveryJob {
            id: row.get("id"),
            status: JobStatus::from_str(&status)?,
            payload: row.get("payload"),
            error_message: row.get("error_message"),
            retry_count: row.get("retry_count"),
            max_retries: row.get("max_retries"),
            run_after: row.get("run_after"),
            created_at: row.get("created_at"),
            started_at: row.get("started_at"),
        })
    }
}

#[async_trait]
impl JobQueue for PgJobQueue {
    async fn enqueue(&self, payload: JsonValue) -> Result<Uuid> {
        let job_id = Uuid::now_v7();
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO delivery_jobs (id, status, payload, retry_count, max_retries, run_after, created_at)
             VALUES ($1, 'pending', $2, 0, $3, $4, $4)",
        )
        .bind(job_id)
        .bind(&payload)
        .bind(defaults::JOB_MAX_RETRIES)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        self.notify.notify_waiters();
        Ok(job_id)
    }

    async fn claim_next(&self) -> Result<Option<DeliveryJob>> {
        let now = Utc::now();

        let row = sqlx::query(
            "UPDATE delivery_jobs
             SET status = 'running', started_at = $1
             WHERE id = (
                 SELECT id FROM delivery_jobs
                 WHERE status = 'pending' AND run_after <= $1
                 ORDER BY created_at ASC
                 LIMIT 1
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING id, status, payload, error_message, retry_count, max_retries,
                       run_after, created_at, started_at",
        )
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.map(Self::parse_job_row).transpose()
    }

    async fn complete(&self, job_id: Uuid) -> Result<()> {
        // Completed jobs are removed outright so the queue never grows
        // without bound.
        sqlx::query("DELETE FROM delivery_jobs WHERE id = $1")
            .bind(job_id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(())
    }

    async fn fail(&self, job_id: Uuid, error: &str) -> Result<()> {
        let now = Utc::now();

        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let (retry_count, max_retries): (i32, i32) =
            sqlx::query_as("SELECT retry_count, max_retries FROM delivery_jobs WHERE id = $1")
                .bind(job_id)
                .fetch_one(&mut *tx)
                .await
                .map_err(Error::Database)?;

        if retry_count < max_retries {
            // Retry: back to pending with exponential backoff.
            let backoff_secs = defaults::JOB_RETRY_BACKOFF_SECS << retry_count;
            let run_after = now + ChronoDuration::seconds(backoff_secs);

            sqlx::query(
                "UPDATE delivery_jobs
                 SET status = 'pending', retry_count = $1, error_message = $2,
                     run_after = $3, started_at = NULL
                 WHERE id = $4",
            )
            .bind(retry_count + 1)
            .bind(error)
            .bind(run_after)
            .bind(job_id)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
        } else {
            // Retry budget exhausted: terminal failure.
            sqlx::query(
                "UPDATE delivery_jobs
                 SET status = 'failed', error_message = $1
                 WHERE id = $2",
            )
            .bind(error)
            .bind(job_id)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
        }

        tx.commit().await.map_err(Error::Database)?;
        Ok(())
    }

    async fn fail_permanent(&self, job_id: Uuid, error: &str) -> Result<()> {
        // No retry bookkeeping: the job parks as failed regardless of its
        // remaining budget.
        sqlx::query(
            "UPDATE delivery_jobs
             SET status = 'failed', error_message = $1
             WHERE id = $2",
        )
        .bind(error)
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn pending_count(&self) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM delivery_jobs WHERE status = 'pending'")
                .fetch_one(&self.pool)
                .await
                .map_err(Error::Database)?;
        Ok(count)
    }
}
