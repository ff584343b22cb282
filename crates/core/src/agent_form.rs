//! The submitted form and its two-step processing lifecycle.
//!
//! A form is created on submission, then stamped by the background pipeline:
//!
//! 1. `email_verified_at` by the verification job
//! 2. `email_sent_at` by the welcome-email job, only once verified
//!
//! Invariant: `email_sent_at` implies `email_verified_at`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::email::Email;
use crate::error::{DomainError, DomainResult, ValidationErrors};
use crate::id::FormId;

/// Maximum length of every text field.
pub const MAX_FIELD_LEN: usize = 255;

/// Validated submission payload.
#[derive(Clone, PartialEq, Eq)]
pub struct NewAgentForm {
    pub name: String,
    pub email: Email,
    pub secret: String,
}

impl NewAgentForm {
    /// Validate raw input. All failing fields are reported at once.
    pub fn new(name: &str, email: &str, secret: &str) -> DomainResult<Self> {
        let mut errors = ValidationErrors::new();

        let name = name.trim();
        check_text(&mut errors, "name", name);

        let email_raw = email.trim();
        let parsed_email = if email_raw.is_empty() {
            errors.add("email", "The email field is required.");
            None
        } else if email_raw.chars().count() > MAX_FIELD_LEN {
            errors.add("email", format!("The email field must not be greater than {MAX_FIELD_LEN} characters."));
            None
        } else {
            match Email::parse(email_raw) {
                Ok(e) => Some(e),
                Err(reason) => {
                    errors.add("email", format!("The email field {reason}."));
                    None
                }
            }
        };

        // Secrets are kept verbatim; only emptiness and length are checked.
        if secret.trim().is_empty() {
            errors.add("secret", "The secret field is required.");
        } else if secret.chars().count() > MAX_FIELD_LEN {
            errors.add("secret", format!("The secret field must not be greater than {MAX_FIELD_LEN} characters."));
        }

        errors.into_result()?;

        match parsed_email {
            Some(email) => Ok(Self {
                name: name.to_string(),
                email,
                secret: secret.to_string(),
            }),
            None => Err(DomainError::invariant("email missing after validation")),
        }
    }
}

impl core::fmt::Debug for NewAgentForm {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("NewAgentForm")
            .field("name", &self.name)
            .field("email", &self.email)
            .field("secret", &"<redacted>")
            .finish()
    }
}

fn check_text(errors: &mut ValidationErrors, field: &str, value: &str) {
    if value.is_empty() {
        errors.add(field, format!("The {field} field is required."));
    } else if value.chars().count() > MAX_FIELD_LEN {
        errors.add(
            field,
            format!("The {field} field must not be greater than {MAX_FIELD_LEN} characters."),
        );
    }
}

/// Where a form currently is in the pipeline.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStage {
    AwaitingVerification,
    AwaitingWelcomeEmail,
    Completed,
}

/// A persisted form submission.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentForm {
    pub id: FormId,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing, default)]
    pub secret: String,
    pub email_verified_at: Option<DateTime<Utc>>,
    pub email_sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AgentForm {
    /// Build the persisted representation of a fresh submission.
    pub fn from_new(id: FormId, new: NewAgentForm, now: DateTime<Utc>) -> Self {
        Self {
            id,
            name: new.name,
            email: new.email.into_string(),
            secret: new.secret,
            email_verified_at: None,
            email_sent_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_verified(&self) -> bool {
        self.email_verified_at.is_some()
    }

    pub fn is_email_sent(&self) -> bool {
        self.email_sent_at.is_some()
    }

    pub fn is_processing_complete(&self) -> bool {
        self.is_verified() && self.is_email_sent()
    }

    pub fn stage(&self) -> ProcessingStage {
        match (self.email_verified_at, self.email_sent_at) {
            (None, _) => ProcessingStage::AwaitingVerification,
            (Some(_), None) => ProcessingStage::AwaitingWelcomeEmail,
            (Some(_), Some(_)) => ProcessingStage::Completed,
        }
    }

    /// Stamp verification. A form that is already verified keeps its first stamp.
    pub fn mark_verified(&mut self, at: DateTime<Utc>) {
        if self.email_verified_at.is_none() {
            self.email_verified_at = Some(at);
            self.updated_at = at;
        }
    }

    /// Stamp the welcome email. Rejected unless the form is verified.
    pub fn mark_email_sent(&mut self, at: DateTime<Utc>) -> DomainResult<()> {
        if !self.is_verified() {
            return Err(DomainError::invariant(format!(
                "form {} cannot send a welcome email before verification",
                self.id
            )));
        }
        self.email_sent_at = Some(at);
        self.updated_at = at;
        Ok(())
    }

    /// Clear both processing timestamps.
    pub fn reset_processing(&mut self, at: DateTime<Utc>) {
        self.email_verified_at = None;
        self.email_sent_at = None;
        self.updated_at = at;
    }

    /// Check the timestamp invariant (used when loading rows from storage).
    pub fn check_invariants(&self) -> DomainResult<()> {
        if self.email_sent_at.is_some() && self.email_verified_at.is_none() {
            return Err(DomainError::invariant(format!(
                "form {} has email_sent_at without email_verified_at",
                self.id
            )));
        }
        Ok(())
    }
}

impl core::fmt::Debug for AgentForm {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AgentForm")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("email", &self.email)
            .field("secret", &"<redacted>")
            .field("email_verified_at", &self.email_verified_at)
            .field("email_sent_at", &self.email_sent_at)
            .field("created_at", &self.created_at)
            .field("updated_at", &self.updated_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample() -> AgentForm {
        let new = NewAgentForm::new("Ada", "ada@example.com", "s3cret").unwrap();
        AgentForm::from_new(FormId::new(1), new, Utc::now())
    }

    #[test]
    fn validation_reports_every_failing_field() {
        let err = NewAgentForm::new("  ", "not-an-email", "").unwrap_err();
        let DomainError::Validation(errors) = err else {
            panic!("expected validation error");
        };
        let fields: Vec<_> = errors.fields().collect();
        assert_eq!(fields, vec!["email", "name", "secret"]);
        assert_eq!(errors.messages("name"), ["The name field is required."]);
    }

    #[test]
    fn validation_enforces_length_limit() {
        let long = "x".repeat(MAX_FIELD_LEN + 1);
        let err = NewAgentForm::new(&long, "a@b.io", &long).unwrap_err();
        let DomainError::Validation(errors) = err else {
            panic!("expected validation error");
        };
        assert!(errors.messages("name")[0].contains("255"));
        assert!(errors.messages("secret")[0].contains("255"));
        assert!(errors.messages("email").is_empty());
    }

    #[test]
    fn lifecycle_moves_through_stages() {
        let mut form = sample();
        assert_eq!(form.stage(), ProcessingStage::AwaitingVerification);

        form.mark_verified(Utc::now());
        assert_eq!(form.stage(), ProcessingStage::AwaitingWelcomeEmail);

        form.mark_email_sent(Utc::now()).unwrap();
        assert_eq!(form.stage(), ProcessingStage::Completed);
        assert!(form.is_processing_complete());

        form.reset_processing(Utc::now());
        assert_eq!(form.stage(), ProcessingStage::AwaitingVerification);
    }

    #[test]
    fn email_cannot_be_sent_before_verification() {
        let mut form = sample();
        let err = form.mark_email_sent(Utc::now()).unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
        assert!(form.email_sent_at.is_none());
    }

    #[test]
    fn verification_keeps_first_stamp() {
        let mut form = sample();
        let first = Utc::now();
        form.mark_verified(first);
        form.mark_verified(first + chrono::Duration::seconds(30));
        assert_eq!(form.email_verified_at, Some(first));
    }

    #[test]
    fn secret_is_not_serialized_or_debug_printed() {
        let form = sample();
        let json = serde_json::to_value(&form).unwrap();
        assert!(json.get("secret").is_none());
        assert!(!format!("{form:?}").contains("s3cret"));
    }

    proptest! {
        #[test]
        fn sent_always_implies_verified(ops in proptest::collection::vec(0u8..3, 0..20)) {
            let mut form = sample();
            for op in ops {
                let now = Utc::now();
                match op {
                    0 => form.mark_verified(now),
                    1 => { let _ = form.mark_email_sent(now); }
                    _ => form.reset_processing(now),
                }
                prop_assert!(form.check_invariants().is_ok());
            }
        }
    }
}
