//! Job executor with retry and backoff logic.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, info_span, warn};

use super::store::{JobStore, JobStoreError};
use super::types::{Job, JobKind, JobResult, QUEUES};

/// Handler for one job kind.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Run one attempt of the job.
    async fn handle(&self, job: &Job) -> JobResult;

    /// Called once after the last attempt failed.
    async fn failed(&self, _job: &Job, _error: &str) {}
}

/// Job executor configuration.
#[derive(Debug, Clone)]
pub struct JobExecutorConfig {
    /// How often to poll for new jobs
    pub poll_interval: Duration,
    /// Number of concurrent workers
    pub concurrency: usize,
    /// Name for logging
    pub name: String,
    /// Queues to poll, highest priority first
    pub queues: Vec<String>,
    /// Reservations older than this are considered abandoned
    pub retry_after: Duration,
}

impl Default for JobExecutorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            concurrency: 2,
            name: "job-executor".to_string(),
            queues: QUEUES.iter().map(|q| q.to_string()).collect(),
            retry_after: Duration::from_secs(360),
        }
    }
}

impl JobExecutorConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_queues<I, Q>(mut self, queues: I) -> Self
    where
        I: IntoIterator<Item = Q>,
        Q: Into<String>,
    {
        self.queues = queues.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

/// What happened to a job after one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Succeeded and removed from the queue
    Completed,
    /// Failed; back on the queue for another attempt
    Released { available_at: DateTime<Utc> },
    /// Failed for the last time; moved to failed jobs
    Failed { error: String },
}

/// Executor runtime statistics.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ExecutorStats {
    pub jobs_processed: u64,
    pub jobs_succeeded: u64,
    pub jobs_released: u64,
    pub jobs_failed: u64,
    pub current_running: usize,
    pub uptime_secs: u64,
}

#[derive(Debug)]
struct StatsCounters {
    started: Instant,
    processed: AtomicU64,
    succeeded: AtomicU64,
    released: AtomicU64,
    failed: AtomicU64,
    running: AtomicUsize,
}

impl StatsCounters {
    fn new() -> Self {
        Self {
            started: Instant::now(),
            processed: AtomicU64::new(0),
            succeeded: AtomicU64::new(0),
            released: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            running: AtomicUsize::new(0),
        }
    }

    fn record(&self, outcome: &JobOutcome) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        let counter = match outcome {
            JobOutcome::Completed => &self.succeeded,
            JobOutcome::Released { .. } => &self.released,
            JobOutcome::Failed { .. } => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> ExecutorStats {
        ExecutorStats {
            jobs_processed: self.processed.load(Ordering::Relaxed),
            jobs_succeeded: self.succeeded.load(Ordering::Relaxed),
            jobs_released: self.released.load(Ordering::Relaxed),
            jobs_failed: self.failed.load(Ordering::Relaxed),
            current_running: self.running.load(Ordering::Relaxed),
            uptime_secs: self.started.elapsed().as_secs(),
        }
    }
}

/// Handle to control a running executor.
#[derive(Debug)]
pub struct JobExecutorHandle {
    shutdown: watch::Sender<bool>,
    workers: Vec<JoinHandle<()>>,
    stats: Arc<StatsCounters>,
}

impl JobExecutorHandle {
    /// Request graceful shutdown; in-flight jobs finish first.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for worker in self.workers {
            let _ = worker.await;
        }
    }

    /// Get current executor statistics.
    pub fn stats(&self) -> ExecutorStats {
        self.stats.snapshot()
    }
}

/// Background job executor.
///
/// Polls a job store for ready jobs, executes them with registered handlers,
/// releases failed attempts with the job's backoff and moves exhausted jobs to
/// the failed-job list.
pub struct JobExecutor {
    store: Arc<dyn JobStore>,
    handlers: HashMap<JobKind, Arc<dyn JobHandler>>,
}

impl JobExecutor {
    /// Create a new executor with the given store.
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self {
            store,
            handlers: HashMap::new(),
        }
    }

    /// Register the handler for a job kind.
    pub fn register_handler(&mut self, kind: JobKind, handler: Arc<dyn JobHandler>) {
        self.handlers.insert(kind, handler);
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Spawn `config.concurrency` workers on the current tokio runtime.
    pub fn spawn(self, config: JobExecutorConfig) -> JobExecutorHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let stats = Arc::new(StatsCounters::new());
        let executor = Arc::new(self);
        let config = Arc::new(config);

        let workers = (0..config.concurrency.max(1))
            .map(|worker| {
                let span = info_span!("worker", executor = %config.name, worker);
                tokio::spawn(
                    worker_loop(
                        executor.clone(),
                        config.clone(),
                        shutdown_rx.clone(),
                        stats.clone(),
                    )
                    .instrument(span),
                )
            })
            .collect();

        JobExecutorHandle {
            shutdown: shutdown_tx,
            workers,
            stats,
        }
    }

    /// Claim and execute the next ready job, if any.
    pub async fn run_next(
        &self,
        queues: &[String],
        retry_after: Duration,
    ) -> Result<Option<JobOutcome>, JobStoreError> {
        match self.store.claim_next(queues, retry_after).await? {
            Some(job) => self.execute_one(job).await.map(Some),
            None => Ok(None),
        }
    }

    /// Execute one attempt of a claimed job and record its outcome.
    pub async fn execute_one(&self, job: Job) -> Result<JobOutcome, JobStoreError> {
        let span = info_span!("job", job_id = %job.id, kind = %job.kind, attempt = job.attempt);
        self.execute_inner(job).instrument(span).await
    }

    async fn execute_inner(&self, mut job: Job) -> Result<JobOutcome, JobStoreError> {
        let handler = self.handlers.get(&job.kind).cloned();

        // A reclaimed reservation counts as an attempt; past the limit the
        // handler does not run again.
        let exhausted = job.attempt > job.retry_policy.max_attempts;

        let result = match &handler {
            _ if exhausted => JobResult::Failure(format!(
                "max attempts exceeded ({} of {})",
                job.attempt - 1,
                job.retry_policy.max_attempts
            )),
            Some(handler) => {
                let timeout = job.retry_policy.timeout;
                match tokio::time::timeout(timeout, handler.handle(&job)).await {
                    Ok(result) => result,
                    Err(_) => JobResult::Failure(format!(
                        "attempt timed out after {}s",
                        timeout.as_secs_f64()
                    )),
                }
            }
            None => JobResult::Failure(format!("no handler for job kind: {}", job.kind)),
        };

        match result {
            JobResult::Success => {
                self.store.complete(job.id).await?;
                debug!("job completed successfully");
                Ok(JobOutcome::Completed)
            }
            JobResult::Failure(error) if job.can_retry() => {
                job.release(error.clone(), Utc::now());
                self.store.release(&job).await?;
                warn!(
                    error = %error,
                    retry_at = %job.available_at,
                    max_attempts = job.retry_policy.max_attempts,
                    "job attempt failed, released for retry"
                );
                Ok(JobOutcome::Released {
                    available_at: job.available_at,
                })
            }
            JobResult::Failure(error) => {
                job.last_error = Some(error.clone());
                let failed = self.store.fail(job.clone(), error.clone()).await?;
                error!(
                    error = %error,
                    failed_job_id = %failed.id,
                    attempts = job.attempt,
                    "job permanently failed"
                );
                if let Some(handler) = handler {
                    handler.failed(&job, &error).await;
                }
                Ok(JobOutcome::Failed { error })
            }
        }
    }
}

async fn worker_loop(
    executor: Arc<JobExecutor>,
    config: Arc<JobExecutorConfig>,
    mut shutdown: watch::Receiver<bool>,
    stats: Arc<StatsCounters>,
) {
    info!(queues = ?config.queues, "job worker started");

    loop {
        if *shutdown.borrow() {
            break;
        }

        match executor.store.claim_next(&config.queues, config.retry_after).await {
            Ok(Some(job)) => {
                debug!(job_id = %job.id, kind = %job.kind, "claimed job");

                stats.running.fetch_add(1, Ordering::Relaxed);
                let outcome = executor.execute_one(job).await;
                stats.running.fetch_sub(1, Ordering::Relaxed);

                match outcome {
                    Ok(outcome) => stats.record(&outcome),
                    Err(e) => error!(error = %e, "failed to record job outcome"),
                }
            }
            Ok(None) => {
                tokio::select! {
                    _ = tokio::time::sleep(config.poll_interval) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
            Err(e) => {
                error!(error = %e, "failed to claim job");
                tokio::time::sleep(config.poll_interval).await;
            }
        }
    }

    info!("job worker stopped");
}
