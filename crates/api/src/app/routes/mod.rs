use axum::{
    Router,
    routing::{get, post},
};

pub mod forms;
pub mod metrics;
pub mod system;

/// Router for the public form and the metrics endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/agent-form", post(forms::submit_form))
        .route("/agent-form/:id", get(forms::get_form))
        .nest("/api/metrics", metrics::router())
}
