//! Postgres-backed job store.
//!
//! Workers claim jobs with `FOR UPDATE SKIP LOCKED`, so any number of worker
//! processes can poll the same tables without handing a job out twice.
//!
//! ## Tables
//!
//! - `jobs`: queued and running jobs; completed rows are deleted
//! - `failed_jobs`: jobs that exhausted their attempts (full job kept as JSON)

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use tracing::instrument;
use uuid::Uuid;

use super::store::{JobStats, JobStore, JobStoreError};
use super::types::{FailedJob, Job, JobId, JobKind, JobStatus, RetryPolicy};

#[derive(Debug, Clone)]
pub struct PostgresJobStore {
    pool: Arc<PgPool>,
}

impl PostgresJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[derive(Debug, FromRow)]
struct JobRow {
    id: Uuid,
    queue: String,
    kind: String,
    payload: serde_json::Value,
    status: String,
    retry_policy: Json<RetryPolicy>,
    attempts: i32,
    last_error: Option<String>,
    available_at: DateTime<Utc>,
    reserved_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<JobRow> for Job {
    type Error = JobStoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let kind = JobKind::from_type_name(&row.kind)
            .ok_or_else(|| JobStoreError::Corrupt(format!("unknown job kind {:?}", row.kind)))?;
        let status = JobStatus::parse(&row.status)
            .ok_or_else(|| JobStoreError::Corrupt(format!("unknown job status {:?}", row.status)))?;

        Ok(Job {
            id: JobId::from_uuid(row.id),
            queue: row.queue,
            kind,
            payload: row.payload,
            status,
            retry_policy: row.retry_policy.0,
            attempt: row.attempts.max(0) as u32,
            last_error: row.last_error,
            available_at: row.available_at,
            reserved_at: row.reserved_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct FailedJobRow {
    id: Uuid,
    job: Json<Job>,
    error: String,
    failed_at: DateTime<Utc>,
}

impl From<FailedJobRow> for FailedJob {
    fn from(row: FailedJobRow) -> Self {
        FailedJob {
            id: row.id,
            job: row.job.0,
            error: row.error,
            failed_at: row.failed_at,
        }
    }
}

const JOB_COLUMNS: &str = "id, queue, kind, payload, status, retry_policy, attempts, last_error, \
                           available_at, reserved_at, created_at, updated_at";

fn map_sqlx_error(operation: &str, e: sqlx::Error) -> JobStoreError {
    JobStoreError::Storage(format!("{operation}: {e}"))
}

#[async_trait]
impl JobStore for PostgresJobStore {
    #[instrument(skip(self, job), fields(job_id = %job.id, kind = %job.kind, queue = %job.queue), err)]
    async fn enqueue(&self, job: Job) -> Result<JobId, JobStoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO jobs (
                id, queue, kind, payload, status, retry_policy, attempts,
                last_error, available_at, reserved_at, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(job.id.0)
        .bind(&job.queue)
        .bind(job.kind.type_name())
        .bind(&job.payload)
        .bind(job.status.as_str())
        .bind(Json(&job.retry_policy))
        .bind(job.attempt as i32)
        .bind(&job.last_error)
        .bind(job.available_at)
        .bind(job.reserved_at)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&*self.pool)
        .await;

        match result {
            Ok(_) => Ok(job.id),
            Err(sqlx::Error::Database(db)) if db.code().as_deref() == Some("23505") => {
                Err(JobStoreError::AlreadyExists(job.id))
            }
            Err(e) => Err(map_sqlx_error("enqueue", e)),
        }
    }

    async fn get(&self, job_id: JobId) -> Result<Option<Job>, JobStoreError> {
        let row: Option<JobRow> =
            sqlx::query_as(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1"))
                .bind(job_id.0)
                .fetch_optional(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("get", e))?;

        row.map(Job::try_from).transpose()
    }

    async fn claim_next(
        &self,
        queues: &[String],
        retry_after: Duration,
    ) -> Result<Option<Job>, JobStoreError> {
        let claim = format!(
            r#"
            UPDATE jobs
            SET status = 'running',
                attempts = attempts + 1,
                reserved_at = NOW(),
                updated_at = NOW()
            WHERE id = (
                SELECT id FROM jobs
                WHERE queue = $1
                  AND (
                    (status = 'pending' AND available_at <= NOW())
                    OR (status = 'running' AND reserved_at <= NOW() - make_interval(secs => $2))
                  )
                ORDER BY available_at ASC, created_at ASC
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING {JOB_COLUMNS}
            "#
        );

        for queue in queues {
            let row: Option<JobRow> = sqlx::query_as(&claim)
                .bind(queue)
                .bind(retry_after.as_secs_f64())
                .fetch_optional(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("claim_next", e))?;

            if let Some(row) = row {
                return Job::try_from(row).map(Some);
            }
        }

        Ok(None)
    }

    async fn complete(&self, job_id: JobId) -> Result<(), JobStoreError> {
        let result = sqlx::query("DELETE FROM jobs WHERE id = $1")
            .bind(job_id.0)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("complete", e))?;

        if result.rows_affected() == 0 {
            return Err(JobStoreError::NotFound(job_id));
        }
        Ok(())
    }

    async fn release(&self, job: &Job) -> Result<(), JobStoreError> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = $2,
                attempts = $3,
                last_error = $4,
                available_at = $5,
                reserved_at = $6,
                updated_at = $7
            WHERE id = $1
            "#,
        )
        .bind(job.id.0)
        .bind(job.status.as_str())
        .bind(job.attempt as i32)
        .bind(&job.last_error)
        .bind(job.available_at)
        .bind(job.reserved_at)
        .bind(job.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("release", e))?;

        if result.rows_affected() == 0 {
            return Err(JobStoreError::NotFound(job.id));
        }
        Ok(())
    }

    #[instrument(skip(self, job, error), fields(job_id = %job.id, kind = %job.kind), err)]
    async fn fail(&self, job: Job, error: String) -> Result<FailedJob, JobStoreError> {
        let entry = FailedJob::new(job, error);

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("fail", e))?;

        sqlx::query("DELETE FROM jobs WHERE id = $1")
            .bind(entry.job.id.0)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("fail", e))?;

        sqlx::query(
            r#"
            INSERT INTO failed_jobs (id, job_id, queue, kind, job, error, failed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(entry.id)
        .bind(entry.job.id.0)
        .bind(&entry.job.queue)
        .bind(entry.job.kind.type_name())
        .bind(Json(&entry.job))
        .bind(&entry.error)
        .bind(entry.failed_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("fail", e))?;

        tx.commit().await.map_err(|e| map_sqlx_error("fail", e))?;
        Ok(entry)
    }

    async fn queue_size(&self, queue: &str) -> Result<usize, JobStoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE queue = $1")
            .bind(queue)
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("queue_size", e))?;
        Ok(count.max(0) as usize)
    }

    async fn average_wait_secs(
        &self,
        queue: &str,
        since: DateTime<Utc>,
    ) -> Result<f64, JobStoreError> {
        let avg: Option<f64> = sqlx::query_scalar(
            r#"
            SELECT AVG(EXTRACT(EPOCH FROM (NOW() - created_at)))::float8
            FROM jobs
            WHERE queue = $1 AND created_at >= $2
            "#,
        )
        .bind(queue)
        .bind(since)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("average_wait_secs", e))?;
        Ok(avg.unwrap_or(0.0))
    }

    async fn list_failed(&self, limit: usize) -> Result<Vec<FailedJob>, JobStoreError> {
        let rows: Vec<FailedJobRow> = sqlx::query_as(
            "SELECT id, job, error, failed_at FROM failed_jobs ORDER BY failed_at DESC LIMIT $1",
        )
        .bind(limit as i64)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_failed", e))?;

        Ok(rows.into_iter().map(FailedJob::from).collect())
    }

    async fn failed_count(&self, kinds: &[JobKind]) -> Result<usize, JobStoreError> {
        let names: Vec<&str> = kinds.iter().map(JobKind::type_name).collect();
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM failed_jobs WHERE cardinality($1::text[]) = 0 OR kind = ANY($1)",
        )
        .bind(&names)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("failed_count", e))?;
        Ok(count.max(0) as usize)
    }

    async fn retry_failed(&self, failed_id: Uuid) -> Result<Job, JobStoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("retry_failed", e))?;

        let row: Option<FailedJobRow> = sqlx::query_as(
            "DELETE FROM failed_jobs WHERE id = $1 RETURNING id, job, error, failed_at",
        )
        .bind(failed_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("retry_failed", e))?;

        let mut job = row
            .map(|r| r.job.0)
            .ok_or(JobStoreError::FailedNotFound(failed_id))?;
        job.reset_for_retry(Utc::now());

        sqlx::query(
            r#"
            INSERT INTO jobs (
                id, queue, kind, payload, status, retry_policy, attempts,
                last_error, available_at, reserved_at, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (id) DO UPDATE SET
                status = EXCLUDED.status,
                attempts = EXCLUDED.attempts,
                last_error = EXCLUDED.last_error,
                available_at = EXCLUDED.available_at,
                reserved_at = EXCLUDED.reserved_at,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(job.id.0)
        .bind(&job.queue)
        .bind(job.kind.type_name())
        .bind(&job.payload)
        .bind(job.status.as_str())
        .bind(Json(&job.retry_policy))
        .bind(job.attempt as i32)
        .bind(&job.last_error)
        .bind(job.available_at)
        .bind(job.reserved_at)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("retry_failed", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("retry_failed", e))?;
        Ok(job)
    }

    async fn forget_failed(&self, failed_id: Uuid) -> Result<(), JobStoreError> {
        let result = sqlx::query("DELETE FROM failed_jobs WHERE id = $1")
            .bind(failed_id)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("forget_failed", e))?;

        if result.rows_affected() == 0 {
            return Err(JobStoreError::FailedNotFound(failed_id));
        }
        Ok(())
    }

    async fn stats(&self) -> Result<JobStats, JobStoreError> {
        let (pending, running): (i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'pending'),
                COUNT(*) FILTER (WHERE status = 'running')
            FROM jobs
            "#,
        )
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("stats", e))?;

        let failed: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM failed_jobs")
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("stats", e))?;

        Ok(JobStats {
            pending: pending.max(0) as usize,
            running: running.max(0) as usize,
            failed: failed.max(0) as usize,
        })
    }

    fn connection_name(&self) -> &'static str {
        "postgres"
    }
}
