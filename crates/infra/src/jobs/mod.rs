//! Background job system with retry, backoff, and failed-job handling.
//!
//! ## Design
//!
//! - Jobs are typed and routed to named queues
//! - Retry policy with a per-attempt backoff schedule and attempt timeout
//! - Completed jobs are deleted; exhausted jobs move to the failed-job list
//! - Abandoned reservations are reclaimed after `retry_after`
//!
//! ## Components
//!
//! - `Job`: Core job abstraction with payload and metadata
//! - `JobStore`: Persistence for jobs (in-memory or Postgres)
//! - `JobExecutor`: Runs jobs with retry logic on tokio workers
//! - `FailedJob`: Failed jobs for inspection/replay

pub mod executor;
pub mod postgres;
pub mod store;
pub mod types;

pub use executor::{
    ExecutorStats, JobExecutor, JobExecutorConfig, JobExecutorHandle, JobHandler, JobOutcome,
};
pub use postgres::PostgresJobStore;
pub use store::{InMemoryJobStore, JobStats, JobStore, JobStoreError};
pub use types::{
    DEFAULT_QUEUE, EMAIL_QUEUE, FailedJob, FormJobPayload, Job, JobId, JobKind, JobResult,
    JobStatus, QUEUES, RetryPolicy, VERIFICATION_QUEUE,
};
