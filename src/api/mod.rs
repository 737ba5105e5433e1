use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::AppState;

pub mod handlers;

/// The full HTTP application: health check plus the versioned API.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .nest("/v1", api_router())
        .with_state(state)
        // Job events are small; artifacts are fetched from S3, never posted.
        .layer(DefaultBodyLimit::max(5 * 1024 * 1024))
        .layer(TraceLayer::new_for_http())
}

/// Build the gate's API router.
/// Routes are relative; the caller mounts this under `/v1`.
pub fn api_router() -> Router<Arc<AppState>> {
    Router::new()
        // Pipeline invoke action target
        .route("/jobs", post(handlers::launch_job))
        .route("/executions/:id", get(handlers::get_execution))
        // Task endpoints for an external workflow engine
        .route("/tasks/evaluate", post(handlers::evaluate_task))
        .route("/tasks/approve", post(handlers::approve_task))
}
