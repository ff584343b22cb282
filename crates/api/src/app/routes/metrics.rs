use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use serde::Deserialize;

use agentform_infra::services::AppServices;

use crate::app::errors;

/// Longest trend window a client may request.
const MAX_TREND_HOURS: u32 = 24 * 7;

pub fn router() -> Router {
    Router::new()
        .route("/agentform", get(agentform_dashboard))
        .route("/horizon", get(queue_dashboard))
}

#[derive(Debug, Default, Deserialize)]
pub struct TrendQuery {
    pub hours: Option<u32>,
}

pub async fn agentform_dashboard(
    Extension(services): Extension<Arc<AppServices>>,
) -> axum::response::Response {
    match services.metrics.dashboard().await {
        Ok(dashboard) => (StatusCode::OK, Json(dashboard)).into_response(),
        Err(e) => errors::metrics_error_to_response(e),
    }
}

/// Queue sizes, wait times, throughput and stored trend snapshots.
pub async fn queue_dashboard(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<TrendQuery>,
) -> axum::response::Response {
    let hours = query.hours.unwrap_or(1).min(MAX_TREND_HOURS);

    let queue = match services.metrics.queue_metrics().await {
        Ok(v) => v,
        Err(e) => return errors::metrics_error_to_response(e),
    };
    let throughput = match services.metrics.throughput_metrics().await {
        Ok(v) => v,
        Err(e) => return errors::metrics_error_to_response(e),
    };
    let trends = match services.metrics.trend_data(hours).await {
        Ok(v) => v,
        Err(e) => return errors::metrics_error_to_response(e),
    };

    (
        StatusCode::OK,
        Json(serde_json::json!({
            "queue_metrics": queue,
            "throughput_metrics": throughput,
            "trends": trends,
            "timestamp": chrono::Utc::now(),
        })),
    )
        .into_response()
}
