//! Recovery for forms left unprocessed, e.g. after worker downtime.
//!
//! Unverified forms get a fresh verification job; verified forms without a
//! welcome email get a fresh email job. Forms younger than the cutoff are left
//! alone since their jobs may still be in flight.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use agentform_core::{AgentForm, FormId};

use crate::forms::{FormRepository, FormStoreError};
use crate::jobs::{Job, JobKind, JobStore};

#[derive(Debug, Clone)]
pub struct RequeueOptions {
    /// Only forms created at least this many hours ago
    pub older_than_hours: u32,
    /// Maximum forms per stage
    pub limit: usize,
    pub verification_only: bool,
    pub email_only: bool,
    pub dry_run: bool,
}

impl Default for RequeueOptions {
    fn default() -> Self {
        Self {
            older_than_hours: 1,
            limit: 100,
            verification_only: false,
            email_only: false,
            dry_run: false,
        }
    }
}

impl RequeueOptions {
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - chrono::Duration::hours(i64::from(self.older_than_hours))
    }
}

/// Forms selected for requeueing.
#[derive(Debug, Clone, Default)]
pub struct RequeuePlan {
    pub needs_verification: Vec<AgentForm>,
    pub needs_email: Vec<AgentForm>,
}

impl RequeuePlan {
    pub fn is_empty(&self) -> bool {
        self.needs_verification.is_empty() && self.needs_email.is_empty()
    }

    pub fn total(&self) -> usize {
        self.needs_verification.len() + self.needs_email.len()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RequeueReport {
    pub verification_queued: usize,
    pub email_queued: usize,
    pub verification_errors: usize,
    pub email_errors: usize,
    /// Form and error of every failed enqueue
    pub failures: Vec<(FormId, String)>,
}

impl RequeueReport {
    pub fn total_queued(&self) -> usize {
        self.verification_queued + self.email_queued
    }

    pub fn total_errors(&self) -> usize {
        self.verification_errors + self.email_errors
    }
}

/// Select the forms to requeue.
///
/// `verification_only` drops the email stage and `email_only` drops the
/// verification stage; setting both selects nothing.
pub async fn plan(
    forms: &dyn FormRepository,
    options: &RequeueOptions,
) -> Result<RequeuePlan, FormStoreError> {
    let cutoff = options.cutoff(Utc::now());

    let needs_verification = if options.email_only {
        Vec::new()
    } else {
        forms.needing_verification(cutoff, options.limit).await?
    };
    let needs_email = if options.verification_only {
        Vec::new()
    } else {
        forms.needing_email(cutoff, options.limit).await?
    };

    Ok(RequeuePlan {
        needs_verification,
        needs_email,
    })
}

/// Enqueue the planned jobs. In dry-run mode nothing is enqueued but the
/// counts report what would have been.
pub async fn execute(plan: &RequeuePlan, jobs: &dyn JobStore, dry_run: bool) -> RequeueReport {
    let mut report = RequeueReport::default();

    for form in &plan.needs_verification {
        match enqueue(jobs, JobKind::VerifyEmail, form.id, dry_run).await {
            Ok(()) => report.verification_queued += 1,
            Err(e) => {
                report.verification_errors += 1;
                report.failures.push((form.id, e));
            }
        }
    }

    for form in &plan.needs_email {
        match enqueue(jobs, JobKind::SendWelcomeEmail, form.id, dry_run).await {
            Ok(()) => report.email_queued += 1,
            Err(e) => {
                report.email_errors += 1;
                report.failures.push((form.id, e));
            }
        }
    }

    info!(
        dry_run,
        verification_queued = report.verification_queued,
        email_queued = report.email_queued,
        errors = report.total_errors(),
        "requeue finished"
    );
    report
}

async fn enqueue(
    jobs: &dyn JobStore,
    kind: JobKind,
    form_id: FormId,
    dry_run: bool,
) -> Result<(), String> {
    if dry_run {
        return Ok(());
    }
    jobs.enqueue(Job::for_form(kind, form_id))
        .await
        .map(|_| ())
        .map_err(|e| {
            warn!(%form_id, %kind, error = %e, "failed to requeue form");
            e.to_string()
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forms::InMemoryFormRepository;
    use crate::jobs::{EMAIL_QUEUE, InMemoryJobStore, VERIFICATION_QUEUE};
    use agentform_core::NewAgentForm;

    async fn seeded() -> InMemoryFormRepository {
        let repo = InMemoryFormRepository::new();
        for email in ["a@example.com", "b@example.com", "c@example.com", "d@example.com"] {
            repo.create(NewAgentForm::new("X", email, "s").unwrap()).await.unwrap();
        }
        // 1, 2 unverified; 3 verified only; 4 complete
        repo.mark_verified(FormId::new(3), Utc::now()).await.unwrap();
        repo.mark_verified(FormId::new(4), Utc::now()).await.unwrap();
        repo.mark_email_sent(FormId::new(4), Utc::now()).await.unwrap();
        repo
    }

    fn now_cutoff() -> RequeueOptions {
        RequeueOptions {
            older_than_hours: 0,
            ..Default::default()
        }
    }

    fn ids(forms: &[AgentForm]) -> Vec<i64> {
        forms.iter().map(|f| f.id.get()).collect()
    }

    #[tokio::test]
    async fn plan_splits_forms_by_missing_step() {
        let repo = seeded().await;
        let plan = plan(&repo, &now_cutoff()).await.unwrap();

        assert_eq!(ids(&plan.needs_verification), [1, 2]);
        assert_eq!(ids(&plan.needs_email), [3]);
        assert_eq!(plan.total(), 3);
    }

    #[tokio::test]
    async fn recent_forms_are_left_alone() {
        let repo = seeded().await;
        let plan = plan(&repo, &RequeueOptions::default()).await.unwrap();
        assert!(plan.is_empty());
    }

    #[tokio::test]
    async fn filters_and_limit_apply() {
        let repo = seeded().await;

        let only_verification = RequeueOptions {
            verification_only: true,
            limit: 1,
            ..now_cutoff()
        };
        let p = plan(&repo, &only_verification).await.unwrap();
        assert_eq!(ids(&p.needs_verification), [1]);
        assert!(p.needs_email.is_empty());

        let only_email = RequeueOptions {
            email_only: true,
            ..now_cutoff()
        };
        let p = plan(&repo, &only_email).await.unwrap();
        assert!(p.needs_verification.is_empty());
        assert_eq!(ids(&p.needs_email), [3]);
    }

    #[tokio::test]
    async fn execute_enqueues_unless_dry_run() {
        let repo = seeded().await;
        let jobs = InMemoryJobStore::new();
        let plan = plan(&repo, &now_cutoff()).await.unwrap();

        let dry = execute(&plan, &jobs, true).await;
        assert_eq!(dry.total_queued(), 3);
        assert_eq!(jobs.stats().await.unwrap().pending, 0);

        let report = execute(&plan, &jobs, false).await;
        assert_eq!(report.verification_queued, 2);
        assert_eq!(report.email_queued, 1);
        assert_eq!(report.total_errors(), 0);
        assert_eq!(jobs.queue_size(VERIFICATION_QUEUE).await.unwrap(), 2);
        assert_eq!(jobs.queue_size(EMAIL_QUEUE).await.unwrap(), 1);
    }
}
