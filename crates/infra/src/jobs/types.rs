//! Core job types and policies.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use agentform_core::FormId;

/// Queue polled by verification workers.
pub const VERIFICATION_QUEUE: &str = "verification";
/// Queue polled by welcome-email workers.
pub const EMAIL_QUEUE: &str = "email";
/// Catch-all queue.
pub const DEFAULT_QUEUE: &str = "default";

/// Every queue the pipeline knows about, in polling priority order.
pub const QUEUES: [&str; 3] = [VERIFICATION_QUEUE, EMAIL_QUEUE, DEFAULT_QUEUE];

/// Unique job identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

/// Job kind, used to route a job to its handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Verify the email address of a submitted form.
    VerifyEmail,
    /// Send the welcome email of a verified form.
    SendWelcomeEmail,
}

impl JobKind {
    pub const ALL: [JobKind; 2] = [JobKind::VerifyEmail, JobKind::SendWelcomeEmail];

    pub fn type_name(&self) -> &'static str {
        match self {
            JobKind::VerifyEmail => "verify_email",
            JobKind::SendWelcomeEmail => "send_welcome_email",
        }
    }

    pub fn from_type_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.type_name() == name)
    }

    pub fn default_queue(&self) -> &'static str {
        match self {
            JobKind::VerifyEmail => VERIFICATION_QUEUE,
            JobKind::SendWelcomeEmail => EMAIL_QUEUE,
        }
    }

    /// Retry policy the pipeline uses for this kind.
    pub fn retry_policy(&self) -> RetryPolicy {
        match self {
            JobKind::VerifyEmail => RetryPolicy::schedule(
                3,
                [10, 30, 60].map(Duration::from_secs).to_vec(),
                Duration::from_secs(300),
            ),
            JobKind::SendWelcomeEmail => RetryPolicy::schedule(
                3,
                [5, 15, 30].map(Duration::from_secs).to_vec(),
                Duration::from_secs(120),
            ),
        }
    }

    /// Delay before the first attempt.
    pub fn initial_delay(&self) -> Duration {
        match self {
            JobKind::VerifyEmail => Duration::ZERO,
            JobKind::SendWelcomeEmail => Duration::from_secs(2),
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.type_name())
    }
}

/// Job execution status.
///
/// Completed jobs are removed from the store and exhausted ones are moved to
/// the failed-job list, so only these two states are ever stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Queued, waiting for `available_at`
    Pending,
    /// Reserved by a worker
    Running,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "running" => Some(JobStatus::Running),
            _ => None,
        }
    }
}

/// Retry policy configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total number of attempts (including the first)
    pub max_attempts: u32,
    /// Delay after each failed attempt; the last entry repeats
    pub backoff: Vec<Duration>,
    /// Maximum run time of a single attempt
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: vec![Duration::from_secs(10)],
            timeout: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Create a policy with the same delay after every failure.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            backoff: vec![delay],
            ..Default::default()
        }
    }

    /// Create a policy with one delay per failed attempt.
    pub fn schedule(max_attempts: u32, backoff: Vec<Duration>, timeout: Duration) -> Self {
        Self {
            max_attempts,
            backoff,
            timeout,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Calculate the delay after a failed attempt (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 || self.backoff.is_empty() {
            return Duration::ZERO;
        }
        let idx = (attempt as usize - 1).min(self.backoff.len() - 1);
        self.backoff[idx]
    }

    /// Check if more attempts are allowed.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// Payload carried by the pipeline jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormJobPayload {
    pub form_id: FormId,
}

/// A background job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique job ID
    pub id: JobId,
    /// Queue the job is polled from
    pub queue: String,
    /// Job kind for routing
    pub kind: JobKind,
    /// JSON payload
    pub payload: serde_json::Value,
    /// Current status
    pub status: JobStatus,
    /// Retry policy
    pub retry_policy: RetryPolicy,
    /// Attempts made so far (incremented when reserved)
    pub attempt: u32,
    /// Error of the previous attempt, if any
    pub last_error: Option<String>,
    /// Earliest time the job may run
    pub available_at: DateTime<Utc>,
    /// When a worker reserved the job
    pub reserved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Create a new job on the kind's default queue with its default policy.
    pub fn new(kind: JobKind, payload: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            queue: kind.default_queue().to_string(),
            kind,
            payload,
            status: JobStatus::Pending,
            retry_policy: kind.retry_policy(),
            attempt: 0,
            last_error: None,
            available_at: now,
            reserved_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Pipeline job for a form, honouring the kind's initial delay.
    pub fn for_form(kind: JobKind, form_id: FormId) -> Self {
        let payload = serde_json::json!({ "form_id": form_id });
        Self::new(kind, payload).delayed(kind.initial_delay())
    }

    /// Decode the form payload.
    pub fn form_payload(&self) -> Result<FormJobPayload, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }

    /// Set a custom retry policy.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Move the job to another queue.
    pub fn on_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = queue.into();
        self
    }

    /// Schedule the job with a delay from its creation.
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.available_at = self.created_at + to_chrono(delay);
        self
    }

    /// Check if the job is ready to execute.
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Pending && now >= self.available_at
    }

    /// A running job whose reservation outlived `retry_after` (its worker died).
    pub fn is_stale(&self, now: DateTime<Utc>, retry_after: Duration) -> bool {
        match (self.status, self.reserved_at) {
            (JobStatus::Running, Some(at)) => now >= at + to_chrono(retry_after),
            _ => false,
        }
    }

    /// Mark job as reserved by a worker.
    pub fn mark_running(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Running;
        self.attempt += 1;
        self.reserved_at = Some(now);
        self.updated_at = now;
    }

    /// Whether another attempt is allowed after the current one failed.
    pub fn can_retry(&self) -> bool {
        self.retry_policy.should_retry(self.attempt)
    }

    /// Put a failed job back on its queue, delayed by the policy backoff.
    pub fn release(&mut self, error: String, now: DateTime<Utc>) {
        let delay = self.retry_policy.delay_for_attempt(self.attempt);
        self.status = JobStatus::Pending;
        self.last_error = Some(error);
        self.reserved_at = None;
        self.available_at = now + to_chrono(delay);
        self.updated_at = now;
    }

    /// Reset for a fresh run (failed-job retry).
    pub fn reset_for_retry(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Pending;
        self.attempt = 0;
        self.last_error = None;
        self.reserved_at = None;
        self.available_at = now;
        self.updated_at = now;
    }
}

/// Result of job execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobResult {
    /// Job completed successfully
    Success,
    /// Job failed with an error; retried according to its policy
    Failure(String),
}

/// A job that exhausted its attempts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedJob {
    pub id: Uuid,
    pub job: Job,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

impl FailedJob {
    pub fn new(job: Job, error: String) -> Self {
        Self {
            id: Uuid::now_v7(),
            job,
            error,
            failed_at: Utc::now(),
        }
    }
}

pub(crate) fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::days(36_500))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn schedule_backoff_follows_each_attempt() {
        let policy = JobKind::VerifyEmail.retry_policy();

        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(10));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(30));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(60));
        assert_eq!(policy.delay_for_attempt(7), Duration::from_secs(60));
    }

    #[test]
    fn fixed_backoff_is_constant() {
        let policy = RetryPolicy::fixed(3, Duration::from_millis(500));

        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(500));
    }

    #[test]
    fn should_retry_respects_max_attempts() {
        let policy = RetryPolicy::fixed(3, Duration::ZERO);

        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
        assert!(!policy.should_retry(4));
    }

    #[test]
    fn pipeline_kinds_use_their_queues_and_delays() {
        let verify = Job::for_form(JobKind::VerifyEmail, FormId::new(7));
        assert_eq!(verify.queue, VERIFICATION_QUEUE);
        assert_eq!(verify.available_at, verify.created_at);
        assert_eq!(verify.form_payload().unwrap().form_id, FormId::new(7));

        let email = Job::for_form(JobKind::SendWelcomeEmail, FormId::new(7));
        assert_eq!(email.queue, EMAIL_QUEUE);
        assert_eq!(email.available_at - email.created_at, chrono::Duration::seconds(2));
        assert_eq!(email.retry_policy.timeout, Duration::from_secs(120));
    }

    #[test]
    fn job_lifecycle() {
        let mut job = Job::new(JobKind::VerifyEmail, serde_json::json!({"form_id": 1}));
        let now = Utc::now();
        assert!(job.is_ready(now));
        assert_eq!(job.attempt, 0);

        job.mark_running(now);
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.attempt, 1);
        assert!(!job.is_ready(now));
        assert!(!job.is_stale(now, Duration::from_secs(60)));
        assert!(job.is_stale(now + chrono::Duration::seconds(61), Duration::from_secs(60)));

        job.release("boom".to_string(), now);
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.available_at, now + chrono::Duration::seconds(10));
        assert_eq!(job.last_error.as_deref(), Some("boom"));
        assert!(job.can_retry());
    }

    #[test]
    fn type_names_round_trip() {
        for kind in JobKind::ALL {
            assert_eq!(JobKind::from_type_name(kind.type_name()), Some(kind));
        }
        assert_eq!(JobKind::from_type_name("nope"), None);
    }

    proptest! {
        #[test]
        fn delay_is_always_a_schedule_entry(
            delays in proptest::collection::vec(0u64..1_000, 1..6),
            attempt in 1u32..50,
        ) {
            let schedule: Vec<_> = delays.iter().copied().map(Duration::from_millis).collect();
            let policy = RetryPolicy::schedule(3, schedule.clone(), Duration::from_secs(1));
            prop_assert!(schedule.contains(&policy.delay_for_attempt(attempt)));
        }
    }
}
