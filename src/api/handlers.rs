use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::Value;
use uuid::Uuid;

use crate::errors::GateError;
use crate::models::execution::ExecutionRecord;
use crate::models::job::{resolve_approval_target, JobEvent, RequestError};
use crate::AppState;

/// POST /v1/jobs: start the approval workflow for a pipeline job.
pub async fn launch_job(
    State(state): State<Arc<AppState>>,
    Json(event): Json<Value>,
) -> Result<impl IntoResponse, GateError> {
    let started = state.launcher.launch(&event).await?;
    Ok((StatusCode::ACCEPTED, Json(started)))
}

/// GET /v1/executions/:id: a local execution and its transition history.
pub async fn get_execution(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ExecutionRecord>, GateError> {
    state
        .executions
        .execution(&id)
        .map(Json)
        .ok_or(GateError::ExecutionNotFound)
}

/// POST /v1/tasks/evaluate: the event with `autoApprove` added.
pub async fn evaluate_task(
    State(state): State<Arc<AppState>>,
    Json(event): Json<Value>,
) -> Json<Value> {
    Json(state.evaluator.evaluate_value(event).await)
}

/// POST /v1/tasks/approve: approve the pending action and echo the event.
///
/// Answers 409 `NoTokenError` while the token is not published.
pub async fn approve_task(
    State(state): State<Arc<AppState>>,
    Json(event): Json<Value>,
) -> Result<Json<Value>, GateError> {
    let job: JobEvent = serde_json::from_value(event.clone())
        .map_err(|e| RequestError::MalformedEvent(e.to_string()))?;
    let target = resolve_approval_target(&job, state.evaluator.approval_defaults())?;

    state.approver.resolve_and_approve(&target).await?;
    tracing::info!(target = %target, "approved via task endpoint");
    Ok(Json(event))
}
