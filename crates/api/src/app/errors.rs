use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use agentform_core::DomainError;
use agentform_infra::forms::{FormStoreError, ServiceError};
use agentform_infra::metrics::MetricsError;

pub const VALIDATION_MESSAGE: &str = "The given data was invalid.";
pub const SUBMIT_FAILED_MESSAGE: &str =
    "An error occurred while submitting the form. Please try again.";

pub fn service_error_to_response(err: ServiceError) -> axum::response::Response {
    match err {
        ServiceError::Domain(e) | ServiceError::Forms(FormStoreError::Domain(e)) => {
            domain_error_to_response(e)
        }
        e @ ServiceError::Forms(FormStoreError::Conflict(_)) => {
            json_error(StatusCode::CONFLICT, "conflict", e.to_string())
        }
        ServiceError::Forms(FormStoreError::NotFound(id)) => json_error(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("form {id} not found"),
        ),
        other => {
            tracing::error!(error = %other, "request failed");
            json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                SUBMIT_FAILED_MESSAGE,
            )
        }
    }
}

pub fn domain_error_to_response(err: DomainError) -> axum::response::Response {
    match err {
        DomainError::Validation(errors) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            axum::Json(json!({
                "error": "validation_error",
                "message": VALIDATION_MESSAGE,
                "errors": errors,
            })),
        )
            .into_response(),
        DomainError::InvariantViolation(msg) => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "invariant_violation", msg)
        }
        DomainError::InvalidId(msg) => json_error(StatusCode::BAD_REQUEST, "invalid_id", msg),
        DomainError::NotFound => json_error(StatusCode::NOT_FOUND, "not_found", "not found"),
        DomainError::Conflict(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
    }
}

pub fn metrics_error_to_response(err: MetricsError) -> axum::response::Response {
    tracing::error!(error = %err, "failed to compute metrics");
    json_error(StatusCode::INTERNAL_SERVER_ERROR, "metrics_error", err.to_string())
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
