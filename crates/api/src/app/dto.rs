use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use agentform_core::{AgentForm, DomainResult, ProcessingStage, ValidationErrors};

pub const SUBMITTED_MESSAGE: &str =
    "Form submitted successfully! Email verification is in progress.";

/// Body of `POST /agent-form`.
///
/// Absent or null fields read as empty so the domain reports them as
/// required; any other non-string value is rejected per field.
#[derive(Debug, Default, PartialEq)]
pub struct SubmitFormRequest {
    pub name: String,
    pub email: String,
    pub secret: String,
}

impl SubmitFormRequest {
    pub fn from_json(body: &Value) -> DomainResult<Self> {
        let mut errors = ValidationErrors::new();
        let mut field = |key: &str| match body.get(key) {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(_) => {
                errors.add(key, format!("The {key} field must be a string."));
                String::new()
            }
        };
        let request = Self {
            name: field("name"),
            email: field("email"),
            secret: field("secret"),
        };
        errors.into_result()?;
        Ok(request)
    }
}

#[derive(Debug, Serialize)]
pub struct SubmitFormResponse {
    pub id: i64,
    pub message: &'static str,
}

/// Processing status of one form; the secret is never included.
#[derive(Debug, Serialize)]
pub struct FormStatusResponse {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub stage: ProcessingStage,
    pub email_verified_at: Option<DateTime<Utc>>,
    pub email_sent_at: Option<DateTime<Utc>>,
    pub processing_complete: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<AgentForm> for FormStatusResponse {
    fn from(form: AgentForm) -> Self {
        Self {
            id: form.id.get(),
            stage: form.stage(),
            processing_complete: form.is_processing_complete(),
            name: form.name,
            email: form.email,
            email_verified_at: form.email_verified_at,
            email_sent_at: form.email_sent_at,
            created_at: form.created_at,
            updated_at: form.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentform_core::DomainError;
    use serde_json::json;

    #[test]
    fn missing_and_null_fields_read_as_empty() {
        let request =
            SubmitFormRequest::from_json(&json!({ "name": "Ada", "email": null })).unwrap();
        assert_eq!(
            request,
            SubmitFormRequest {
                name: "Ada".into(),
                ..Default::default()
            }
        );
    }

    #[test]
    fn non_string_fields_are_reported_by_name() {
        let err = SubmitFormRequest::from_json(&json!({
            "name": 5,
            "email": "ada@example.com",
            "secret": ["x"],
        }))
        .unwrap_err();

        let DomainError::Validation(errors) = err else {
            panic!("expected validation error, got {err:?}");
        };
        assert_eq!(errors.fields().collect::<Vec<_>>(), vec!["name", "secret"]);
        assert_eq!(errors.messages("name"), ["The name field must be a string."]);
    }
}
