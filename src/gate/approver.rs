//! Approval Executor: consumes the pending approval token of an action.

use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use super::PipelineService;
use crate::models::pipeline::{ApprovalResult, ApprovalStatus, ApprovalTarget, ExecutionStatus, PipelineState};

pub const APPROVAL_SUMMARY: &str = "Manual approval not required - no IAM changes detected";

#[derive(Debug, Error)]
pub enum ApprovalError {
    /// The action has no token yet (or no longer has one). Worth retrying.
    #[error("no token for action yet")]
    NoTokenYet,

    #[error("approval failed: {0:#}")]
    Fatal(#[from] anyhow::Error),
}

impl ApprovalError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ApprovalError::NoTokenYet)
    }
}

/// Token of the in-progress `target` action, if the pipeline has published one.
pub fn pending_token<'a>(state: &'a PipelineState, target: &ApprovalTarget) -> Option<&'a str> {
    let Some(stage) = state.stage_states.iter().find(|s| {
        s.stage_name == target.stage_name
            && s.latest_execution
                .as_ref()
                .is_some_and(|e| e.status == ExecutionStatus::InProgress)
    }) else {
        info!(stage = %target.stage_name, "did not find an in-progress stage to approve");
        return None;
    };

    let Some(action) = stage.action_states.iter().find(|a| {
        a.action_name == target.action_name
            && a.latest_execution
                .as_ref()
                .is_some_and(|e| e.status == ExecutionStatus::InProgress)
    }) else {
        info!(action = %target.action_name, "did not find an in-progress action to approve");
        return None;
    };

    let token = action.latest_execution.as_ref()?.token.as_deref();
    if token.is_none() {
        info!(action = %target.action_name, "target action did not have a token");
    }
    token
}

pub struct ApprovalExecutor {
    pipeline: Arc<dyn PipelineService>,
}

impl ApprovalExecutor {
    pub fn new(pipeline: Arc<dyn PipelineService>) -> Self {
        Self { pipeline }
    }

    pub async fn resolve_and_approve(&self, target: &ApprovalTarget) -> Result<(), ApprovalError> {
        info!(pipeline = %target.pipeline_name, "checking pipeline state");
        let state = self.pipeline.get_pipeline_state(&target.pipeline_name).await?;

        let token = pending_token(&state, target).ok_or(ApprovalError::NoTokenYet)?;

        let result = ApprovalResult {
            summary: APPROVAL_SUMMARY.to_string(),
            status: ApprovalStatus::Approved,
        };
        info!(target = %target, "auto-approving manual approval step");
        self.pipeline.put_approval_result(target, token, &result).await?;
        Ok(())
    }
}
