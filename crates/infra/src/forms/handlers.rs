//! Job handlers for the verify -> welcome email pipeline.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info};

use agentform_core::AgentForm;

use super::service::AgentFormService;
use crate::jobs::{Job, JobExecutor, JobHandler, JobKind, JobResult};

/// Register both pipeline handlers on an executor.
pub fn register_form_handlers(executor: &mut JobExecutor, service: Arc<AgentFormService>) {
    executor.register_handler(
        JobKind::VerifyEmail,
        Arc::new(VerifyEmailHandler::new(service.clone())),
    );
    executor.register_handler(
        JobKind::SendWelcomeEmail,
        Arc::new(SendWelcomeEmailHandler::new(service)),
    );
}

async fn load_form(service: &AgentFormService, job: &Job) -> Result<AgentForm, String> {
    let payload = job
        .form_payload()
        .map_err(|e| format!("invalid job payload: {e}"))?;
    service.get(payload.form_id).await.map_err(|e| e.to_string())
}

/// Verifies the address, then dispatches the welcome email.
pub struct VerifyEmailHandler {
    service: Arc<AgentFormService>,
}

impl VerifyEmailHandler {
    pub fn new(service: Arc<AgentFormService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl JobHandler for VerifyEmailHandler {
    async fn handle(&self, job: &Job) -> JobResult {
        let form = match load_form(&self.service, job).await {
            Ok(form) => form,
            Err(e) => return JobResult::Failure(e),
        };

        let form = match self.service.verify_email(&form, job.attempt).await {
            Ok(form) => form,
            Err(e) => {
                error!(form_id = %form.id, attempt = job.attempt, error = %e, "verification attempt failed");
                return JobResult::Failure(e.to_string());
            }
        };

        if form.is_email_sent() {
            return JobResult::Success;
        }

        match self.service.dispatch(JobKind::SendWelcomeEmail, form.id).await {
            Ok(job_id) => {
                info!(form_id = %form.id, %job_id, "welcome email dispatched");
                JobResult::Success
            }
            Err(e) => JobResult::Failure(format!("failed to dispatch welcome email: {e}")),
        }
    }

    async fn failed(&self, job: &Job, error: &str) {
        let form_id = job.form_payload().map(|p| p.form_id.get()).ok();
        error!(?form_id, attempts = job.attempt, error, "email verification failed permanently");
    }
}

/// Sends the welcome email of a verified form.
pub struct SendWelcomeEmailHandler {
    service: Arc<AgentFormService>,
}

impl SendWelcomeEmailHandler {
    pub fn new(service: Arc<AgentFormService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl JobHandler for SendWelcomeEmailHandler {
    async fn handle(&self, job: &Job) -> JobResult {
        let form = match load_form(&self.service, job).await {
            Ok(form) => form,
            Err(e) => return JobResult::Failure(e),
        };

        match self.service.send_welcome_email(&form, job.attempt).await {
            Ok(_) => JobResult::Success,
            Err(e) => {
                error!(form_id = %form.id, attempt = job.attempt, error = %e, "welcome email attempt failed");
                JobResult::Failure(e.to_string())
            }
        }
    }

    async fn failed(&self, job: &Job, error: &str) {
        let form_id = job.form_payload().map(|p| p.form_id.get()).ok();
        error!(?form_id, attempts = job.attempt, error, "welcome email failed permanently");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::forms::repository::{FormRepository, InMemoryFormRepository};
    use crate::forms::workload::{SimulatedWorkload, Workload, WorkloadError};
    use crate::jobs::{
        EMAIL_QUEUE, InMemoryJobStore, JobOutcome, JobStore, RetryPolicy, VERIFICATION_QUEUE,
    };
    use agentform_core::FormId;

    /// Fails verification a fixed number of times.
    struct Flaky {
        failures_left: AtomicU32,
    }

    #[async_trait]
    impl Workload for Flaky {
        async fn verify_email(&self, _form: &AgentForm, attempt: u32) -> Result<(), WorkloadError> {
            if self.failures_left.load(Ordering::SeqCst) > 0 {
                self.failures_left.fetch_sub(1, Ordering::SeqCst);
                return Err(WorkloadError(format!("service unavailable - attempt {attempt}")));
            }
            Ok(())
        }

        async fn send_welcome_email(
            &self,
            _form: &AgentForm,
            _attempt: u32,
        ) -> Result<(), WorkloadError> {
            Ok(())
        }
    }

    struct Harness {
        forms: Arc<InMemoryFormRepository>,
        jobs: Arc<InMemoryJobStore>,
        service: Arc<AgentFormService>,
        executor: JobExecutor,
    }

    fn harness(workload: Arc<dyn Workload>) -> Harness {
        let forms = Arc::new(InMemoryFormRepository::new());
        let jobs = Arc::new(InMemoryJobStore::new());
        let service = Arc::new(AgentFormService::new(forms.clone(), jobs.clone(), workload));
        let mut executor = JobExecutor::new(jobs.clone());
        register_form_handlers(&mut executor, service.clone());
        Harness {
            forms,
            jobs,
            service,
            executor,
        }
    }

    async fn submit(h: &Harness) -> AgentForm {
        h.service
            .submit("Grace", "grace@example.com", "cobol")
            .await
            .unwrap()
    }

    /// Run the next job on `queue`, skipping any backoff or initial delay.
    async fn run_now(h: &Harness, queue: &str) -> Option<JobOutcome> {
        h.jobs.make_all_ready().await;
        let job = h
            .jobs
            .claim_next(&[queue.to_string()], Duration::from_secs(600))
            .await
            .unwrap()?;
        Some(h.executor.execute_one(job).await.unwrap())
    }

    #[tokio::test]
    async fn verification_dispatches_the_welcome_email() {
        let h = harness(Arc::new(SimulatedWorkload::instant()));
        let form = submit(&h).await;

        assert_eq!(run_now(&h, VERIFICATION_QUEUE).await, Some(JobOutcome::Completed));

        let stored = h.forms.get(form.id).await.unwrap().unwrap();
        assert!(stored.is_verified());
        assert!(!stored.is_email_sent());
        assert_eq!(h.jobs.queue_size(EMAIL_QUEUE).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn welcome_email_completes_the_form() {
        let h = harness(Arc::new(SimulatedWorkload::instant()));
        let form = submit(&h).await;
        h.service.verify_email(&form, 1).await.unwrap();

        let job = Job::new(JobKind::SendWelcomeEmail, serde_json::json!({ "form_id": form.id }));
        h.jobs.enqueue(job).await.unwrap();
        assert_eq!(run_now(&h, EMAIL_QUEUE).await, Some(JobOutcome::Completed));

        assert!(h.service.is_processing_complete(form.id).await.unwrap());
    }

    #[tokio::test]
    async fn welcome_email_for_unverified_form_fails() {
        let h = harness(Arc::new(SimulatedWorkload::instant()));
        let form = submit(&h).await;

        let job = Job::new(JobKind::SendWelcomeEmail, serde_json::json!({ "form_id": form.id }))
            .with_retry_policy(RetryPolicy::fixed(1, Duration::ZERO));
        h.jobs.enqueue(job).await.unwrap();

        let outcome = run_now(&h, EMAIL_QUEUE).await;
        assert!(matches!(outcome, Some(JobOutcome::Failed { .. })));
        assert!(h.forms.get(form.id).await.unwrap().unwrap().email_sent_at.is_none());
    }

    #[tokio::test]
    async fn transient_failures_are_retried_until_success() {
        let h = harness(Arc::new(Flaky {
            failures_left: AtomicU32::new(2),
        }));
        let form = submit(&h).await;

        for expected_attempt in 1..=2 {
            let outcome = run_now(&h, VERIFICATION_QUEUE).await;
            assert!(
                matches!(outcome, Some(JobOutcome::Released { .. })),
                "attempt {expected_attempt}: {outcome:?}"
            );
        }
        assert_eq!(run_now(&h, VERIFICATION_QUEUE).await, Some(JobOutcome::Completed));
        assert!(h.forms.get(form.id).await.unwrap().unwrap().is_verified());
    }

    #[tokio::test]
    async fn verification_failing_every_attempt_lands_in_failed_jobs() {
        let h = harness(Arc::new(Flaky {
            failures_left: AtomicU32::new(u32::MAX),
        }));
        let form = submit(&h).await;

        for _ in 0..3 {
            run_now(&h, VERIFICATION_QUEUE).await;
        }

        let failed = h.jobs.list_failed(10).await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].job.attempt, 3);
        assert!(failed[0].error.contains("attempt 3"));
        assert!(!h.forms.get(form.id).await.unwrap().unwrap().is_verified());
        assert_eq!(h.jobs.queue_size(EMAIL_QUEUE).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn jobs_for_missing_forms_fail() {
        let h = harness(Arc::new(SimulatedWorkload::instant()));
        let job = Job::for_form(JobKind::VerifyEmail, FormId::new(999))
            .with_retry_policy(RetryPolicy::fixed(1, Duration::ZERO));
        h.jobs.enqueue(job).await.unwrap();

        let outcome = run_now(&h, VERIFICATION_QUEUE).await;
        assert!(matches!(outcome, Some(JobOutcome::Failed { ref error }) if error.contains("999")));
    }
}
