use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, Path, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
};

use agentform_core::FormId;
use agentform_infra::services::AppServices;

use crate::app::{dto, errors};

pub async fn submit_form(
    Extension(services): Extension<Arc<AppServices>>,
    body: Result<Json<serde_json::Value>, JsonRejection>,
) -> axum::response::Response {
    let body = match body {
        Ok(Json(body)) => body,
        Err(rejection) => {
            return errors::json_error(rejection.status(), "invalid_json", rejection.body_text());
        }
    };
    let request = match dto::SubmitFormRequest::from_json(&body) {
        Ok(request) => request,
        Err(e) => return errors::domain_error_to_response(e),
    };

    let form = match services
        .form_service
        .submit(&request.name, &request.email, &request.secret)
        .await
    {
        Ok(form) => form,
        Err(e) => return errors::service_error_to_response(e),
    };

    (
        StatusCode::CREATED,
        Json(dto::SubmitFormResponse {
            id: form.id.get(),
            message: dto::SUBMITTED_MESSAGE,
        }),
    )
        .into_response()
}

pub async fn get_form(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let form_id: FormId = match id.parse() {
        Ok(v) => v,
        Err(_) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid form id");
        }
    };

    match services.form_service.get(form_id).await {
        Ok(form) => (StatusCode::OK, Json(dto::FormStatusResponse::from(form))).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}
