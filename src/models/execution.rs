use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// States of the conditional approval workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum WorkflowState {
    Evaluating,
    Deciding { auto_approve: bool },
    Waiting,
    Approving { attempt: u32 },
    Approved,
    NoAutoApproval,
    Failed { reason: String },
}

impl WorkflowState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowState::Approved | WorkflowState::NoAutoApproval | WorkflowState::Failed { .. }
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Transition {
    #[serde(flatten)]
    pub state: WorkflowState,
    pub at: DateTime<Utc>,
}

/// One run of the approval workflow for one pipeline job.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionRecord {
    pub id: Uuid,
    pub job_id: Option<String>,
    pub state: WorkflowState,
    pub history: Vec<Transition>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ExecutionRecord {
    pub fn new(job_id: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            job_id,
            state: WorkflowState::Evaluating,
            history: vec![Transition {
                state: WorkflowState::Evaluating,
                at: now,
            }],
            started_at: now,
            finished_at: None,
        }
    }

    pub fn transition(&mut self, state: WorkflowState) {
        let now = Utc::now();
        if state.is_terminal() {
            self.finished_at = Some(now);
        }
        self.history.push(Transition {
            state: state.clone(),
            at: now,
        });
        self.state = state;
    }

    /// Number of times the approval step was attempted.
    pub fn approval_attempts(&self) -> usize {
        self.history
            .iter()
            .filter(|t| matches!(t.state, WorkflowState::Approving { .. }))
            .count()
    }
}
