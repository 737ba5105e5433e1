//! approval-gate: conditional IAM approval gate for CodePipeline.
//!
//! Re-exports modules needed by the binary and by integration tests in `tests/`.

use std::sync::Arc;

pub mod api;
pub mod aws;
pub mod cli;
pub mod config;
pub mod errors;
pub mod gate;
pub mod launcher;
pub mod models;
pub mod services;
pub mod workflow;

/// Shared application state passed to HTTP handlers.
pub struct AppState {
    pub config: config::Config,
    pub evaluator: Arc<gate::evaluator::ChangeEvaluationService>,
    pub approver: Arc<gate::approver::ApprovalExecutor>,
    pub executions: Arc<workflow::engine::LocalEngine>,
    pub launcher: launcher::Launcher,
}
