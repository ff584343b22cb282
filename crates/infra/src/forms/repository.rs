//! Form storage.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;

use agentform_core::{AgentForm, DomainError, FormId, NewAgentForm};

/// Persistence for submitted forms.
#[async_trait]
pub trait FormRepository: Send + Sync {
    /// Insert a new form. Fails with `Conflict` if the email is taken.
    async fn create(&self, new: NewAgentForm) -> Result<AgentForm, FormStoreError>;

    async fn get(&self, id: FormId) -> Result<Option<AgentForm>, FormStoreError>;

    /// Stamp `email_verified_at` unless already set.
    async fn mark_verified(&self, id: FormId, at: DateTime<Utc>)
    -> Result<AgentForm, FormStoreError>;

    /// Stamp `email_sent_at`. Rejected unless the form is verified.
    async fn mark_email_sent(
        &self,
        id: FormId,
        at: DateTime<Utc>,
    ) -> Result<AgentForm, FormStoreError>;

    /// Clear both processing timestamps.
    async fn reset_processing(
        &self,
        id: FormId,
        at: DateTime<Utc>,
    ) -> Result<AgentForm, FormStoreError>;

    /// Unverified forms created at or before `created_before`, oldest first.
    async fn needing_verification(
        &self,
        created_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<AgentForm>, FormStoreError>;

    /// Verified forms without a welcome email, by verification time.
    async fn needing_email(
        &self,
        created_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<AgentForm>, FormStoreError>;

    /// Counts over forms created since `created_since` (all forms when None).
    async fn counts(
        &self,
        created_since: Option<DateTime<Utc>>,
    ) -> Result<FormCounts, FormStoreError>;

    /// Verifications and emails stamped since `since`.
    async fn activity_since(&self, since: DateTime<Utc>) -> Result<FormActivity, FormStoreError>;

    /// Average stage durations over forms created since `created_since`.
    async fn processing_times(
        &self,
        created_since: DateTime<Utc>,
    ) -> Result<ProcessingTimes, FormStoreError>;
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum FormStoreError {
    #[error("form not found: {0}")]
    NotFound(FormId),
    #[error("email already registered: {0}")]
    Conflict(String),
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("storage error: {0}")]
    Storage(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FormCounts {
    pub total: u64,
    pub verified: u64,
    pub email_sent: u64,
    pub completed: u64,
}

impl FormCounts {
    /// Forms missing either timestamp.
    pub fn pending(&self) -> u64 {
        self.total.saturating_sub(self.completed)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FormActivity {
    pub verified: u64,
    /// Completed forms whose email was sent in the window
    pub emails_sent: u64,
}

/// Average durations in seconds; 0 when no form qualifies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ProcessingTimes {
    /// created -> verified
    pub avg_verification_secs: f64,
    /// verified -> email sent
    pub avg_email_secs: f64,
    /// created -> email sent
    pub avg_total_secs: f64,
}

/// In-memory form repository for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryFormRepository {
    inner: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    next_id: i64,
    forms: BTreeMap<FormId, AgentForm>,
}

impl InMemoryFormRepository {
    pub fn new() -> Self {
        Self::default()
    }

    async fn update<F>(&self, id: FormId, f: F) -> Result<AgentForm, FormStoreError>
    where
        F: FnOnce(&mut AgentForm) -> Result<(), FormStoreError> + Send,
    {
        let mut inner = self.inner.write().await;
        let form = inner.forms.get_mut(&id).ok_or(FormStoreError::NotFound(id))?;
        f(form)?;
        Ok(form.clone())
    }
}

fn avg_secs(samples: impl Iterator<Item = chrono::Duration>) -> f64 {
    let (sum, n) = samples.fold((0.0, 0u32), |(sum, n), d| {
        (sum + d.num_milliseconds() as f64 / 1000.0, n + 1)
    });
    if n == 0 { 0.0 } else { sum / f64::from(n) }
}

#[async_trait]
impl FormRepository for InMemoryFormRepository {
    async fn create(&self, new: NewAgentForm) -> Result<AgentForm, FormStoreError> {
        let mut inner = self.inner.write().await;
        if inner.forms.values().any(|f| f.email == new.email.as_str()) {
            return Err(FormStoreError::Conflict(new.email.into_string()));
        }

        inner.next_id += 1;
        let id = FormId::new(inner.next_id);
        let form = AgentForm::from_new(id, new, Utc::now());
        inner.forms.insert(id, form.clone());
        Ok(form)
    }

    async fn get(&self, id: FormId) -> Result<Option<AgentForm>, FormStoreError> {
        Ok(self.inner.read().await.forms.get(&id).cloned())
    }

    async fn mark_verified(
        &self,
        id: FormId,
        at: DateTime<Utc>,
    ) -> Result<AgentForm, FormStoreError> {
        self.update(id, |form| {
            form.mark_verified(at);
            Ok(())
        })
        .await
    }

    async fn mark_email_sent(
        &self,
        id: FormId,
        at: DateTime<Utc>,
    ) -> Result<AgentForm, FormStoreError> {
        self.update(id, |form| form.mark_email_sent(at).map_err(FormStoreError::from))
            .await
    }

    async fn reset_processing(
        &self,
        id: FormId,
        at: DateTime<Utc>,
    ) -> Result<AgentForm, FormStoreError> {
        self.update(id, |form| {
            form.reset_processing(at);
            Ok(())
        })
        .await
    }

    async fn needing_verification(
        &self,
        created_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<AgentForm>, FormStoreError> {
        let inner = self.inner.read().await;
        let mut forms: Vec<_> = inner
            .forms
            .values()
            .filter(|f| !f.is_verified() && f.created_at <= created_before)
            .cloned()
            .collect();
        forms.sort_by_key(|f| (f.created_at, f.id));
        forms.truncate(limit);
        Ok(forms)
    }

    async fn needing_email(
        &self,
        created_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<AgentForm>, FormStoreError> {
        let inner = self.inner.read().await;
        let mut forms: Vec<_> = inner
            .forms
            .values()
            .filter(|f| f.is_verified() && !f.is_email_sent() && f.created_at <= created_before)
            .cloned()
            .collect();
        forms.sort_by_key(|f| (f.email_verified_at, f.id));
        forms.truncate(limit);
        Ok(forms)
    }

    async fn counts(
        &self,
        created_since: Option<DateTime<Utc>>,
    ) -> Result<FormCounts, FormStoreError> {
        let inner = self.inner.read().await;
        let mut counts = FormCounts::default();
        for form in inner
            .forms
            .values()
            .filter(|f| created_since.is_none_or(|since| f.created_at >= since))
        {
            counts.total += 1;
            counts.verified += u64::from(form.is_verified());
            counts.email_sent += u64::from(form.is_email_sent());
            counts.completed += u64::from(form.is_processing_complete());
        }
        Ok(counts)
    }

    async fn activity_since(&self, since: DateTime<Utc>) -> Result<FormActivity, FormStoreError> {
        let inner = self.inner.read().await;
        let mut activity = FormActivity::default();
        for form in inner.forms.values() {
            if form.email_verified_at.is_some_and(|at| at >= since) {
                activity.verified += 1;
            }
            if form.is_verified() && form.email_sent_at.is_some_and(|at| at >= since) {
                activity.emails_sent += 1;
            }
        }
        Ok(activity)
    }

    async fn processing_times(
        &self,
        created_since: DateTime<Utc>,
    ) -> Result<ProcessingTimes, FormStoreError> {
        let inner = self.inner.read().await;
        let recent: Vec<_> = inner
            .forms
            .values()
            .filter(|f| f.created_at >= created_since)
            .collect();

        Ok(ProcessingTimes {
            avg_verification_secs: avg_secs(
                recent
                    .iter()
                    .filter_map(|f| f.email_verified_at.map(|v| v - f.created_at)),
            ),
            avg_email_secs: avg_secs(recent.iter().filter_map(|f| {
                Some(f.email_sent_at? - f.email_verified_at?)
            })),
            avg_total_secs: avg_secs(recent.iter().filter_map(|f| {
                f.email_verified_at?;
                Some(f.email_sent_at? - f.created_at)
            })),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_form(email: &str) -> NewAgentForm {
        NewAgentForm::new("Ada", email, "secret").unwrap()
    }

    #[tokio::test]
    async fn create_assigns_sequential_ids_and_rejects_duplicates() {
        let repo = InMemoryFormRepository::new();
        let a = repo.create(new_form("a@example.com")).await.unwrap();
        let b = repo.create(new_form("b@example.com")).await.unwrap();
        assert_eq!(a.id.get() + 1, b.id.get());

        let err = repo.create(new_form("a@example.com")).await.unwrap_err();
        assert!(matches!(err, FormStoreError::Conflict(email) if email == "a@example.com"));
    }

    #[tokio::test]
    async fn emails_differing_only_in_case_conflict() {
        let repo = InMemoryFormRepository::new();
        repo.create(new_form("Ada@X.com")).await.unwrap();

        let err = repo.create(new_form("ada@x.com")).await.unwrap_err();
        assert!(matches!(err, FormStoreError::Conflict(email) if email == "ada@x.com"));
    }

    #[tokio::test]
    async fn email_cannot_be_marked_sent_before_verification() {
        let repo = InMemoryFormRepository::new();
        let form = repo.create(new_form("a@example.com")).await.unwrap();

        let err = repo.mark_email_sent(form.id, Utc::now()).await.unwrap_err();
        assert!(matches!(err, FormStoreError::Domain(DomainError::InvariantViolation(_))));

        repo.mark_verified(form.id, Utc::now()).await.unwrap();
        let sent = repo.mark_email_sent(form.id, Utc::now()).await.unwrap();
        assert!(sent.is_processing_complete());
    }

    #[tokio::test]
    async fn missing_forms_are_reported() {
        let repo = InMemoryFormRepository::new();
        let err = repo.mark_verified(FormId::new(42), Utc::now()).await.unwrap_err();
        assert!(matches!(err, FormStoreError::NotFound(id) if id == FormId::new(42)));
    }

    #[tokio::test]
    async fn recovery_queries_split_by_stage() {
        let repo = InMemoryFormRepository::new();
        let unverified = repo.create(new_form("a@example.com")).await.unwrap();
        let verified = repo.create(new_form("b@example.com")).await.unwrap();
        let done = repo.create(new_form("c@example.com")).await.unwrap();

        repo.mark_verified(verified.id, Utc::now()).await.unwrap();
        repo.mark_verified(done.id, Utc::now()).await.unwrap();
        repo.mark_email_sent(done.id, Utc::now()).await.unwrap();

        let cutoff = Utc::now();
        let needs_verification = repo.needing_verification(cutoff, 10).await.unwrap();
        let needs_email = repo.needing_email(cutoff, 10).await.unwrap();
        assert_eq!(needs_verification.iter().map(|f| f.id).collect::<Vec<_>>(), [unverified.id]);
        assert_eq!(needs_email.iter().map(|f| f.id).collect::<Vec<_>>(), [verified.id]);

        // Nothing was created before the epoch.
        let epoch = DateTime::<Utc>::UNIX_EPOCH;
        assert!(repo.needing_verification(epoch, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn counts_and_processing_times() {
        let repo = InMemoryFormRepository::new();
        assert_eq!(repo.counts(None).await.unwrap(), FormCounts::default());

        let form = repo.create(new_form("a@example.com")).await.unwrap();
        repo.create(new_form("b@example.com")).await.unwrap();

        let verified_at = form.created_at + chrono::Duration::seconds(4);
        let sent_at = verified_at + chrono::Duration::seconds(2);
        repo.mark_verified(form.id, verified_at).await.unwrap();
        repo.mark_email_sent(form.id, sent_at).await.unwrap();

        let counts = repo.counts(None).await.unwrap();
        assert_eq!(counts.total, 2);
        assert_eq!(counts.completed, 1);
        assert_eq!(counts.pending(), 1);

        let times = repo
            .processing_times(form.created_at - chrono::Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(times.avg_verification_secs, 4.0);
        assert_eq!(times.avg_email_secs, 2.0);
        assert_eq!(times.avg_total_secs, 6.0);

        let activity = repo.activity_since(form.created_at).await.unwrap();
        assert_eq!(activity, FormActivity { verified: 1, emails_sent: 1 });
    }
}
