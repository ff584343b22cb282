//! Form submission and the two processing steps.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, instrument, warn};

use agentform_core::{AgentForm, DomainError, FormId, NewAgentForm};

use super::repository::{FormRepository, FormStoreError};
use super::workload::{Workload, WorkloadError};
use crate::jobs::{Job, JobId, JobKind, JobStore, JobStoreError};

#[derive(Debug, Clone, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Forms(#[from] FormStoreError),
    #[error(transparent)]
    Jobs(#[from] JobStoreError),
    #[error("workload failed: {0}")]
    Workload(#[from] WorkloadError),
}

/// Whole-table processing statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FormStatistics {
    pub total: u64,
    pub verified: u64,
    pub email_sent: u64,
    pub completed: u64,
    pub verification_rate: f64,
    pub completion_rate: f64,
}

/// Percentage rounded to two decimals; 0 when `total` is 0.
pub(crate) fn percentage(part: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    round2(part as f64 / total as f64 * 100.0)
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Application service for the form pipeline.
#[derive(Clone)]
pub struct AgentFormService {
    forms: Arc<dyn FormRepository>,
    jobs: Arc<dyn JobStore>,
    workload: Arc<dyn Workload>,
}

impl AgentFormService {
    pub fn new(
        forms: Arc<dyn FormRepository>,
        jobs: Arc<dyn JobStore>,
        workload: Arc<dyn Workload>,
    ) -> Self {
        Self {
            forms,
            jobs,
            workload,
        }
    }

    pub fn forms(&self) -> &Arc<dyn FormRepository> {
        &self.forms
    }

    pub fn jobs(&self) -> &Arc<dyn JobStore> {
        &self.jobs
    }

    /// Validate and store a submission, then queue its verification.
    #[instrument(skip_all, err)]
    pub async fn submit(
        &self,
        name: &str,
        email: &str,
        secret: &str,
    ) -> Result<AgentForm, ServiceError> {
        let new = NewAgentForm::new(name, email, secret)?;
        let form = self.forms.create(new).await?;
        let job_id = self.dispatch(JobKind::VerifyEmail, form.id).await?;
        info!(form_id = %form.id, %job_id, "form submitted, verification queued");
        Ok(form)
    }

    /// Queue a pipeline job for a form.
    pub async fn dispatch(&self, kind: JobKind, form_id: FormId) -> Result<JobId, ServiceError> {
        Ok(self.jobs.enqueue(Job::for_form(kind, form_id)).await?)
    }

    pub async fn get(&self, form_id: FormId) -> Result<AgentForm, ServiceError> {
        self.forms
            .get(form_id)
            .await?
            .ok_or(ServiceError::Forms(FormStoreError::NotFound(form_id)))
    }

    /// Run the verification step and stamp `email_verified_at`.
    ///
    /// An already verified form is returned unchanged.
    pub async fn verify_email(
        &self,
        form: &AgentForm,
        attempt: u32,
    ) -> Result<AgentForm, ServiceError> {
        if form.is_verified() {
            return Ok(form.clone());
        }

        info!(form_id = %form.id, attempt, "starting email verification");
        if let Err(e) = self.workload.verify_email(form, attempt).await {
            warn!(form_id = %form.id, attempt, error = %e, "email verification failed");
            return Err(e.into());
        }

        let form = self.forms.mark_verified(form.id, Utc::now()).await?;
        info!(form_id = %form.id, attempt, "email verification successful");
        Ok(form)
    }

    /// Run the welcome step and stamp `email_sent_at`.
    ///
    /// Fails unless the form is verified; a form whose email was already sent
    /// is returned unchanged.
    pub async fn send_welcome_email(
        &self,
        form: &AgentForm,
        attempt: u32,
    ) -> Result<AgentForm, ServiceError> {
        if !form.is_verified() {
            return Err(DomainError::invariant(format!(
                "form {} cannot receive a welcome email before verification",
                form.id
            ))
            .into());
        }
        if form.is_email_sent() {
            return Ok(form.clone());
        }

        info!(form_id = %form.id, attempt, "sending welcome email");
        if let Err(e) = self.workload.send_welcome_email(form, attempt).await {
            warn!(form_id = %form.id, attempt, error = %e, "welcome email sending failed");
            return Err(e.into());
        }

        let form = self.forms.mark_email_sent(form.id, Utc::now()).await?;
        info!(form_id = %form.id, email = %form.email, attempt, "welcome email sent, processing complete");
        Ok(form)
    }

    pub async fn statistics(&self) -> Result<FormStatistics, ServiceError> {
        let counts = self.forms.counts(None).await?;
        Ok(FormStatistics {
            total: counts.total,
            verified: counts.verified,
            email_sent: counts.email_sent,
            completed: counts.completed,
            verification_rate: percentage(counts.verified, counts.total),
            completion_rate: percentage(counts.completed, counts.total),
        })
    }

    pub async fn is_processing_complete(&self, form_id: FormId) -> Result<bool, ServiceError> {
        Ok(self.get(form_id).await?.is_processing_complete())
    }

    /// Clear both timestamps so the form can be run through the pipeline again.
    pub async fn reset_processing_status(&self, form_id: FormId) -> Result<AgentForm, ServiceError> {
        let form = self.forms.reset_processing(form_id, Utc::now()).await?;
        info!(form_id = %form.id, "processing status reset");
        Ok(form)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forms::repository::InMemoryFormRepository;
    use crate::forms::workload::SimulatedWorkload;
    use crate::jobs::{InMemoryJobStore, VERIFICATION_QUEUE};

    fn service() -> (AgentFormService, Arc<InMemoryJobStore>) {
        let jobs = Arc::new(InMemoryJobStore::new());
        let service = AgentFormService::new(
            Arc::new(InMemoryFormRepository::new()),
            jobs.clone(),
            Arc::new(SimulatedWorkload::instant()),
        );
        (service, jobs)
    }

    #[tokio::test]
    async fn submit_stores_the_form_and_queues_verification() {
        let (service, jobs) = service();
        let form = service.submit("Ada Lovelace", "ada@example.com", "hunter2").await.unwrap();

        assert_eq!(form.stage(), agentform_core::ProcessingStage::AwaitingVerification);
        assert_eq!(jobs.queue_size(VERIFICATION_QUEUE).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn invalid_submissions_queue_nothing() {
        let (service, jobs) = service();
        let err = service.submit("", "", "").await.unwrap_err();

        assert!(matches!(err, ServiceError::Domain(DomainError::Validation(_))));
        assert_eq!(jobs.stats().await.unwrap().pending, 0);
    }

    #[tokio::test]
    async fn steps_stamp_timestamps_in_order() {
        let (service, _) = service();
        let form = service.submit("Ada Lovelace", "ada@example.com", "hunter2").await.unwrap();

        let err = service.send_welcome_email(&form, 1).await.unwrap_err();
        assert!(matches!(err, ServiceError::Domain(DomainError::InvariantViolation(_))));

        let verified = service.verify_email(&form, 1).await.unwrap();
        assert!(verified.is_verified());
        let sent = service.send_welcome_email(&verified, 1).await.unwrap();
        assert!(service.is_processing_complete(sent.id).await.unwrap());

        // Re-running a finished step keeps the first stamps.
        let again = service.send_welcome_email(&sent, 2).await.unwrap();
        assert_eq!(again.email_sent_at, sent.email_sent_at);
    }

    #[tokio::test]
    async fn statistics_round_rates() {
        let (service, _) = service();
        assert_eq!(service.statistics().await.unwrap(), FormStatistics::default());

        let a = service.submit("Ada Lovelace", "a@example.com", "hunter2").await.unwrap();
        service.submit("Ada Lovelace", "b@example.com", "hunter2").await.unwrap();
        service.submit("Ada Lovelace", "c@example.com", "hunter2").await.unwrap();
        let a = service.verify_email(&a, 1).await.unwrap();
        service.send_welcome_email(&a, 1).await.unwrap();

        let stats = service.statistics().await.unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.verification_rate, 33.33);
        assert_eq!(stats.completion_rate, 33.33);

        let reset = service.reset_processing_status(a.id).await.unwrap();
        assert!(!reset.is_verified());
        assert_eq!(service.statistics().await.unwrap().completed, 0);
    }

    #[test]
    fn percentage_handles_empty_totals() {
        assert_eq!(percentage(0, 0), 0.0);
        assert_eq!(percentage(2, 3), 66.67);
    }
}
