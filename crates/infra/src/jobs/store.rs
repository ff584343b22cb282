//! Job storage implementations.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::types::{FailedJob, Job, JobId, JobKind, JobStatus};

/// Job store abstraction.
///
/// Completed jobs are deleted; jobs that exhaust their attempts move to a
/// separate failed-job list where they can be inspected, retried or forgotten.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Enqueue a new job.
    async fn enqueue(&self, job: Job) -> Result<JobId, JobStoreError>;

    /// Get a queued or running job by ID.
    async fn get(&self, job_id: JobId) -> Result<Option<Job>, JobStoreError>;

    /// Reserve the next ready job from `queues` (earlier queues first).
    ///
    /// Running jobs reserved longer than `retry_after` ago are treated as
    /// abandoned and may be claimed again. Returns None if nothing is ready.
    async fn claim_next(
        &self,
        queues: &[String],
        retry_after: Duration,
    ) -> Result<Option<Job>, JobStoreError>;

    /// Remove a successfully completed job.
    async fn complete(&self, job_id: JobId) -> Result<(), JobStoreError>;

    /// Persist a job released for another attempt.
    async fn release(&self, job: &Job) -> Result<(), JobStoreError>;

    /// Move a job to the failed-job list.
    async fn fail(&self, job: Job, error: String) -> Result<FailedJob, JobStoreError>;

    /// Number of queued + running jobs on a queue.
    async fn queue_size(&self, queue: &str) -> Result<usize, JobStoreError>;

    /// Average age in seconds of the jobs on `queue` created since `since`.
    async fn average_wait_secs(
        &self,
        queue: &str,
        since: DateTime<Utc>,
    ) -> Result<f64, JobStoreError>;

    /// List failed jobs, most recent first.
    async fn list_failed(&self, limit: usize) -> Result<Vec<FailedJob>, JobStoreError>;

    /// Count failed jobs of the given kinds (all kinds when empty).
    async fn failed_count(&self, kinds: &[JobKind]) -> Result<usize, JobStoreError>;

    /// Push a failed job back onto its queue with a fresh attempt budget.
    async fn retry_failed(&self, failed_id: Uuid) -> Result<Job, JobStoreError>;

    /// Delete a failed job.
    async fn forget_failed(&self, failed_id: Uuid) -> Result<(), JobStoreError>;

    /// Get job statistics.
    async fn stats(&self) -> Result<JobStats, JobStoreError>;

    /// Short backend name reported by the metrics endpoints.
    fn connection_name(&self) -> &'static str;
}

/// Job store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum JobStoreError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("failed job not found: {0}")]
    FailedNotFound(Uuid),
    #[error("job already exists: {0}")]
    AlreadyExists(JobId),
    #[error("corrupt job row: {0}")]
    Corrupt(String),
    #[error("storage error: {0}")]
    Storage(String),
}

/// Job statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct JobStats {
    pub pending: usize,
    pub running: usize,
    pub failed: usize,
}

/// In-memory job store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
    failed: RwLock<HashMap<Uuid, FailedJob>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every pending job available immediately.
    #[cfg(test)]
    pub(crate) async fn make_all_ready(&self) {
        let now = Utc::now();
        for job in self.jobs.write().await.values_mut() {
            if job.available_at > now {
                job.available_at = now;
            }
        }
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn enqueue(&self, job: Job) -> Result<JobId, JobStoreError> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job.id) {
            return Err(JobStoreError::AlreadyExists(job.id));
        }
        let id = job.id;
        jobs.insert(id, job);
        Ok(id)
    }

    async fn get(&self, job_id: JobId) -> Result<Option<Job>, JobStoreError> {
        Ok(self.jobs.read().await.get(&job_id).cloned())
    }

    async fn claim_next(
        &self,
        queues: &[String],
        retry_after: Duration,
    ) -> Result<Option<Job>, JobStoreError> {
        let mut jobs = self.jobs.write().await;
        let now = Utc::now();

        for queue in queues {
            // Oldest ready job first, FIFO by availability.
            let next = jobs
                .values()
                .filter(|j| &j.queue == queue && (j.is_ready(now) || j.is_stale(now, retry_after)))
                .min_by_key(|j| (j.available_at, j.created_at))
                .map(|j| j.id);

            if let Some(job) = next.and_then(|id| jobs.get_mut(&id)) {
                job.mark_running(now);
                return Ok(Some(job.clone()));
            }
        }

        Ok(None)
    }

    async fn complete(&self, job_id: JobId) -> Result<(), JobStoreError> {
        self.jobs
            .write()
            .await
            .remove(&job_id)
            .map(|_| ())
            .ok_or(JobStoreError::NotFound(job_id))
    }

    async fn release(&self, job: &Job) -> Result<(), JobStoreError> {
        let mut jobs = self.jobs.write().await;
        match jobs.get_mut(&job.id) {
            Some(slot) => {
                *slot = job.clone();
                Ok(())
            }
            None => Err(JobStoreError::NotFound(job.id)),
        }
    }

    async fn fail(&self, job: Job, error: String) -> Result<FailedJob, JobStoreError> {
        let mut jobs = self.jobs.write().await;
        let mut failed = self.failed.write().await;

        jobs.remove(&job.id);
        let entry = FailedJob::new(job, error);
        failed.insert(entry.id, entry.clone());
        Ok(entry)
    }

    async fn queue_size(&self, queue: &str) -> Result<usize, JobStoreError> {
        Ok(self.jobs.read().await.values().filter(|j| j.queue == queue).count())
    }

    async fn average_wait_secs(
        &self,
        queue: &str,
        since: DateTime<Utc>,
    ) -> Result<f64, JobStoreError> {
        let jobs = self.jobs.read().await;
        let now = Utc::now();
        let ages: Vec<f64> = jobs
            .values()
            .filter(|j| j.queue == queue && j.created_at >= since)
            .map(|j| (now - j.created_at).num_milliseconds() as f64 / 1000.0)
            .collect();

        if ages.is_empty() {
            return Ok(0.0);
        }
        Ok(ages.iter().sum::<f64>() / ages.len() as f64)
    }

    async fn list_failed(&self, limit: usize) -> Result<Vec<FailedJob>, JobStoreError> {
        let failed = self.failed.read().await;
        let mut result: Vec<_> = failed.values().cloned().collect();
        result.sort_by(|a, b| b.failed_at.cmp(&a.failed_at));
        result.truncate(limit);
        Ok(result)
    }

    async fn failed_count(&self, kinds: &[JobKind]) -> Result<usize, JobStoreError> {
        let failed = self.failed.read().await;
        Ok(failed
            .values()
            .filter(|f| kinds.is_empty() || kinds.contains(&f.job.kind))
            .count())
    }

    async fn retry_failed(&self, failed_id: Uuid) -> Result<Job, JobStoreError> {
        let mut jobs = self.jobs.write().await;
        let mut failed = self.failed.write().await;

        let entry = failed
            .remove(&failed_id)
            .ok_or(JobStoreError::FailedNotFound(failed_id))?;

        let mut job = entry.job;
        job.reset_for_retry(Utc::now());
        jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn forget_failed(&self, failed_id: Uuid) -> Result<(), JobStoreError> {
        self.failed
            .write()
            .await
            .remove(&failed_id)
            .map(|_| ())
            .ok_or(JobStoreError::FailedNotFound(failed_id))
    }

    async fn stats(&self) -> Result<JobStats, JobStoreError> {
        let jobs = self.jobs.read().await;
        let failed = self.failed.read().await;

        let mut stats = JobStats {
            failed: failed.len(),
            ..Default::default()
        };
        for job in jobs.values() {
            match job.status {
                JobStatus::Pending => stats.pending += 1,
                JobStatus::Running => stats.running += 1,
            }
        }
        Ok(stats)
    }

    fn connection_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::types::{EMAIL_QUEUE, VERIFICATION_QUEUE};
    use agentform_core::FormId;

    fn queues() -> Vec<String> {
        vec![VERIFICATION_QUEUE.to_string(), EMAIL_QUEUE.to_string()]
    }

    const RETRY_AFTER: Duration = Duration::from_secs(360);

    #[tokio::test]
    async fn enqueue_and_claim() {
        let store = InMemoryJobStore::new();

        let job = Job::for_form(JobKind::VerifyEmail, FormId::new(1));
        let job_id = store.enqueue(job).await.unwrap();

        let claimed = store.claim_next(&queues(), RETRY_AFTER).await.unwrap().unwrap();
        assert_eq!(claimed.id, job_id);
        assert_eq!(claimed.status, JobStatus::Running);
        assert_eq!(claimed.attempt, 1);

        // No more jobs
        assert!(store.claim_next(&queues(), RETRY_AFTER).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delayed_jobs_are_not_claimed_early() {
        let store = InMemoryJobStore::new();
        store
            .enqueue(Job::for_form(JobKind::SendWelcomeEmail, FormId::new(1)))
            .await
            .unwrap();

        assert!(store.claim_next(&queues(), RETRY_AFTER).await.unwrap().is_none());
        assert_eq!(store.queue_size(EMAIL_QUEUE).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn queues_are_polled_in_priority_order() {
        let store = InMemoryJobStore::new();
        let email = Job::new(JobKind::SendWelcomeEmail, serde_json::json!({"form_id": 1}));
        let verify = Job::new(JobKind::VerifyEmail, serde_json::json!({"form_id": 2}));
        store.enqueue(email.clone()).await.unwrap();
        store.enqueue(verify.clone()).await.unwrap();

        let first = store.claim_next(&queues(), RETRY_AFTER).await.unwrap().unwrap();
        assert_eq!(first.id, verify.id);
        let second = store.claim_next(&queues(), RETRY_AFTER).await.unwrap().unwrap();
        assert_eq!(second.id, email.id);
    }

    #[tokio::test]
    async fn stale_reservations_are_reclaimed() {
        let store = InMemoryJobStore::new();
        store
            .enqueue(Job::new(JobKind::VerifyEmail, serde_json::json!({"form_id": 1})))
            .await
            .unwrap();

        let first = store.claim_next(&queues(), RETRY_AFTER).await.unwrap().unwrap();
        assert!(store.claim_next(&queues(), RETRY_AFTER).await.unwrap().is_none());

        let again = store.claim_next(&queues(), Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(again.id, first.id);
        assert_eq!(again.attempt, 2);
    }

    #[tokio::test]
    async fn failed_job_flow() {
        let store = InMemoryJobStore::new();

        let job = Job::new(JobKind::VerifyEmail, serde_json::json!({"form_id": 1}));
        let job_id = job.id;
        store.enqueue(job).await.unwrap();

        let claimed = store.claim_next(&queues(), RETRY_AFTER).await.unwrap().unwrap();
        let failed = store.fail(claimed, "max attempts exceeded".to_string()).await.unwrap();

        // Job is no longer queued
        assert!(store.get(job_id).await.unwrap().is_none());
        assert_eq!(store.failed_count(&[]).await.unwrap(), 1);
        assert_eq!(store.failed_count(&[JobKind::SendWelcomeEmail]).await.unwrap(), 0);

        let retried = store.retry_failed(failed.id).await.unwrap();
        assert_eq!(retried.status, JobStatus::Pending);
        assert_eq!(retried.attempt, 0);
        assert!(store.list_failed(10).await.unwrap().is_empty());
        assert!(store.get(job_id).await.unwrap().is_some());

        assert!(matches!(
            store.forget_failed(failed.id).await,
            Err(JobStoreError::FailedNotFound(_))
        ));
    }

    #[tokio::test]
    async fn stats_tracking() {
        let store = InMemoryJobStore::new();

        for i in 0..5 {
            let job = Job::new(JobKind::VerifyEmail, serde_json::json!({ "form_id": i }));
            store.enqueue(job).await.unwrap();
        }

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.pending, 5);

        store.claim_next(&queues(), RETRY_AFTER).await.unwrap();
        store.claim_next(&queues(), RETRY_AFTER).await.unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.pending, 3);
        assert_eq!(stats.running, 2);
        assert_eq!(store.queue_size(VERIFICATION_QUEUE).await.unwrap(), 5);
    }
}
