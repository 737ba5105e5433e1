use std::fmt;

use serde::{Deserialize, Serialize};

/// The (pipeline, stage, action) triple an approval token is scoped to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalTarget {
    pub pipeline_name: String,
    pub stage_name: String,
    pub action_name: String,
}

impl fmt::Display for ApprovalTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.pipeline_name, self.stage_name, self.action_name
        )
    }
}

/// Process-wide approval target defaults, overridable per job.
#[derive(Debug, Clone)]
pub struct ApprovalDefaults {
    pub pipeline_name: Option<String>,
    pub stage_name: String,
    pub action_name: String,
}

impl Default for ApprovalDefaults {
    fn default() -> Self {
        Self {
            pipeline_name: None,
            stage_name: "iam".to_string(),
            action_name: "IAM_Approval".to_string(),
        }
    }
}

// ── GetPipelineState ─────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineState {
    pub pipeline_name: Option<String>,
    #[serde(default)]
    pub stage_states: Vec<StageState>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageState {
    pub stage_name: String,
    pub latest_execution: Option<StageExecution>,
    #[serde(default)]
    pub action_states: Vec<ActionState>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageExecution {
    pub status: ExecutionStatus,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionState {
    pub action_name: String,
    pub latest_execution: Option<ActionExecution>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionExecution {
    pub status: ExecutionStatus,
    pub token: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum ExecutionStatus {
    InProgress,
    Succeeded,
    Failed,
    #[serde(other)]
    Other,
}

// ── PutApprovalResult ────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct ApprovalResult {
    pub summary: String,
    pub status: ApprovalStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ApprovalStatus {
    Approved,
}
