use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::gate::approver::ApprovalError;
use crate::models::job::RequestError;
use crate::workflow::definition::NO_TOKEN_ERROR;

#[derive(Debug, Error)]
pub enum GateError {
    #[error("APPROVAL_GATE_WORKFLOW_ID environment variable is not set")]
    MissingWorkflowId,

    #[error("unknown workflow definition: {0}")]
    UnknownWorkflow(String),

    #[error("invalid job event: {0}")]
    InvalidJob(#[from] RequestError),

    #[error("no token for action yet")]
    NoTokenYet,

    #[error("execution not found")]
    ExecutionNotFound,

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<ApprovalError> for GateError {
    fn from(err: ApprovalError) -> Self {
        match err {
            ApprovalError::NoTokenYet => GateError::NoTokenYet,
            ApprovalError::Fatal(e) => GateError::Upstream(format!("{:#}", e)),
        }
    }
}

impl IntoResponse for GateError {
    fn into_response(self) -> Response {
        let (status, error_type, code, msg) = match &self {
            GateError::MissingWorkflowId | GateError::UnknownWorkflow(_) => {
                tracing::error!("{}", self);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "configuration_error",
                    "workflow_not_configured",
                    self.to_string(),
                )
            }
            GateError::InvalidJob(e) => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                "invalid_job",
                e.to_string(),
            ),
            // The error type doubles as the retry selector of an external engine.
            GateError::NoTokenYet => (
                StatusCode::CONFLICT,
                NO_TOKEN_ERROR,
                "no_token_yet",
                self.to_string(),
            ),
            GateError::ExecutionNotFound => (
                StatusCode::NOT_FOUND,
                "not_found_error",
                "execution_not_found",
                self.to_string(),
            ),
            GateError::Upstream(e) => (
                StatusCode::BAD_GATEWAY,
                "upstream_error",
                "upstream_failed",
                e.clone(),
            ),
            GateError::Internal(e) => {
                tracing::error!("Internal error: {:#}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal_server_error",
                    "internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "message": msg,
                "type": error_type,
                "code": code,
            }
        }));

        (status, body).into_response()
    }
}
