//! The conditional approval workflow.
//!
//! ```text
//! Evaluating ─▶ Deciding ─┬─ true ──▶ Waiting ─▶ Approving ─▶ Approved
//!                         │                        │  ▲
//!                         │             NoTokenYet └──┘ (bounded, backoff)
//!                         └─ false ─▶ NoAutoApproval
//! ```
//!
//! The pipeline publishes the approval token on its own schedule, so the
//! workflow can reach `Approving` before the token exists. A fixed delay makes
//! that rare; bounded retries make it terminate when it happens.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::gate::approver::{ApprovalError, ApprovalExecutor};
use crate::gate::evaluator::{ChangeEvaluationService, EvaluationOutcome};
use crate::models::execution::{ExecutionRecord, WorkflowState};
use crate::models::job::JobEvent;
use crate::models::pipeline::ApprovalTarget;

pub mod definition;
pub mod engine;
pub mod retry;

use retry::RetryPolicy;

/// The `Evaluating` step.
#[async_trait]
pub trait Evaluator: Send + Sync {
    async fn evaluate(&self, event: &JobEvent) -> anyhow::Result<EvaluationOutcome>;
}

/// The `Approving` step.
#[async_trait]
pub trait Approver: Send + Sync {
    async fn approve(&self, target: &ApprovalTarget) -> Result<(), ApprovalError>;
}

#[async_trait]
impl Evaluator for ChangeEvaluationService {
    async fn evaluate(&self, event: &JobEvent) -> anyhow::Result<EvaluationOutcome> {
        Ok(self.evaluate_event(event).await)
    }
}

#[async_trait]
impl Approver for ApprovalExecutor {
    async fn approve(&self, target: &ApprovalTarget) -> Result<(), ApprovalError> {
        self.resolve_and_approve(target).await
    }
}

#[derive(Debug, Clone)]
pub struct WorkflowSettings {
    /// Pause between deciding to approve and the first approval attempt.
    pub approval_delay: Duration,
    pub retry: RetryPolicy,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            approval_delay: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }
}

pub struct ApprovalWorkflow {
    evaluator: Arc<dyn Evaluator>,
    approver: Arc<dyn Approver>,
    settings: WorkflowSettings,
}

impl ApprovalWorkflow {
    pub fn new(
        evaluator: Arc<dyn Evaluator>,
        approver: Arc<dyn Approver>,
        settings: WorkflowSettings,
    ) -> Self {
        Self {
            evaluator,
            approver,
            settings,
        }
    }

    pub fn settings(&self) -> &WorkflowSettings {
        &self.settings
    }

    /// Drive `record` to a terminal state, calling `observe` after every transition.
    pub async fn run<F>(&self, mut record: ExecutionRecord, input: &JobEvent, mut observe: F) -> ExecutionRecord
    where
        F: FnMut(&ExecutionRecord) + Send,
    {
        let mut outcome: Option<EvaluationOutcome> = None;
        observe(&record);

        while !record.state.is_terminal() {
            let next = self.step(&record.state, input, &mut outcome).await;
            info!(execution_id = %record.id, job_id = ?record.job_id, next = ?next, "workflow transition");
            record.transition(next);
            observe(&record);
        }

        if let WorkflowState::Failed { reason } = &record.state {
            warn!(execution_id = %record.id, job_id = ?record.job_id, "workflow failed: {}", reason);
        }
        record
    }

    async fn step(
        &self,
        state: &WorkflowState,
        input: &JobEvent,
        outcome: &mut Option<EvaluationOutcome>,
    ) -> WorkflowState {
        match state {
            WorkflowState::Evaluating => {
                match AssertUnwindSafe(self.evaluator.evaluate(input)).catch_unwind().await {
                    Ok(Ok(result)) => {
                        let auto_approve = result.auto_approve;
                        *outcome = Some(result);
                        WorkflowState::Deciding { auto_approve }
                    }
                    Ok(Err(e)) => WorkflowState::Failed {
                        reason: format!("evaluation failed: {:#}", e),
                    },
                    Err(_) => WorkflowState::Failed {
                        reason: "evaluation panicked".to_string(),
                    },
                }
            }
            WorkflowState::Deciding { auto_approve: true } => WorkflowState::Waiting,
            WorkflowState::Deciding { auto_approve: false } => WorkflowState::NoAutoApproval,
            WorkflowState::Waiting => {
                sleep(self.settings.approval_delay).await;
                WorkflowState::Approving { attempt: 1 }
            }
            WorkflowState::Approving { attempt } => {
                let Some(target) = outcome.as_ref().and_then(|o| o.approval.as_ref()) else {
                    return WorkflowState::Failed {
                        reason: "no approval target for this job".to_string(),
                    };
                };
                self.attempt_approval(target, *attempt).await
            }
            terminal => terminal.clone(),
        }
    }

    async fn attempt_approval(&self, target: &ApprovalTarget, attempt: u32) -> WorkflowState {
        let result = match AssertUnwindSafe(self.approver.approve(target)).catch_unwind().await {
            Ok(result) => result,
            Err(_) => {
                return WorkflowState::Failed {
                    reason: format!("approval of {} panicked", target),
                }
            }
        };
        match result {
            Ok(()) => WorkflowState::Approved,
            Err(e) if e.is_retryable() => {
                let retry = &self.settings.retry;
                if !retry.allows_another(attempt) {
                    return WorkflowState::Failed {
                        reason: format!("{} after {} attempts", e, attempt),
                    };
                }
                let wait = retry.backoff(attempt);
                info!(target = %target, attempt, ?wait, "no approval token yet, retrying");
                sleep(wait).await;
                WorkflowState::Approving { attempt: attempt + 1 }
            }
            Err(e) => WorkflowState::Failed {
                reason: e.to_string(),
            },
        }
    }
}
