//! Workflow engines that can host the approval workflow.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use dashmap::DashMap;
use serde::Serialize;
use uuid::Uuid;

use super::ApprovalWorkflow;
use crate::aws::stepfunctions::StepFunctionsClient;
use crate::errors::GateError;
use crate::models::execution::ExecutionRecord;
use crate::models::job::JobEvent;

/// Name of the workflow definition hosted by [`LocalEngine`].
pub const LOCAL_WORKFLOW: &str = "conditional-approval";

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionStarted {
    pub execution_id: String,
    pub started_at: DateTime<Utc>,
}

#[async_trait]
pub trait WorkflowEngine: Send + Sync {
    async fn start_execution(&self, input: &serde_json::Value) -> anyhow::Result<ExecutionStarted>;
}

/// How long a finished execution stays queryable by default.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(3600);

/// Runs the workflow on the local tokio runtime and keeps its records.
///
/// Finished records are dropped once they are older than the retention;
/// running ones are never dropped.
pub struct LocalEngine {
    workflow: Arc<ApprovalWorkflow>,
    executions: Arc<DashMap<Uuid, ExecutionRecord>>,
    retention: Duration,
}

impl LocalEngine {
    pub fn new(workflow: Arc<ApprovalWorkflow>) -> Self {
        Self {
            workflow,
            executions: Arc::new(DashMap::new()),
            retention: DEFAULT_RETENTION,
        }
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn execution(&self, id: &Uuid) -> Option<ExecutionRecord> {
        self.executions.get(id).map(|r| r.value().clone())
    }

    pub fn len(&self) -> usize {
        self.executions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executions.is_empty()
    }

    /// Drop records that finished more than the retention before `now`.
    /// Returns how many were dropped.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let retention = chrono::Duration::from_std(self.retention).unwrap_or(chrono::Duration::MAX);
        let before = self.executions.len();
        self.executions.retain(|_, record| match record.finished_at {
            Some(finished) => now.signed_duration_since(finished) < retention,
            None => true,
        });
        before.saturating_sub(self.executions.len())
    }

    /// Spawn the periodic sweep. Call this once at startup.
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> tokio::task::JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                let dropped = engine.sweep(Utc::now());
                if dropped > 0 {
                    tracing::info!(dropped, remaining = engine.len(), "expired finished executions");
                }
            }
        })
    }

    /// Run one execution to completion in the caller's task.
    pub async fn run(&self, input: JobEvent) -> ExecutionRecord {
        let record = ExecutionRecord::new(input.job_id().map(String::from));
        let executions = self.executions.clone();
        self.workflow
            .run(record, &input, move |r| {
                executions.insert(r.id, r.clone());
            })
            .await
    }
}

#[async_trait]
impl WorkflowEngine for LocalEngine {
    async fn start_execution(&self, input: &serde_json::Value) -> anyhow::Result<ExecutionStarted> {
        let event: JobEvent = serde_json::from_value(input.clone()).unwrap_or_else(|e| {
            tracing::warn!("could not decode job event ({}); it will not be auto-approved", e);
            JobEvent::default()
        });

        let record = ExecutionRecord::new(event.job_id().map(String::from));
        let started = ExecutionStarted {
            execution_id: record.id.to_string(),
            started_at: record.started_at,
        };
        self.executions.insert(record.id, record.clone());

        let workflow = self.workflow.clone();
        let executions = self.executions.clone();
        tokio::spawn(async move {
            workflow
                .run(record, &event, move |r| {
                    executions.insert(r.id, r.clone());
                })
                .await;
        });

        tracing::info!(execution_id = %started.execution_id, "started local execution");
        Ok(started)
    }
}

/// Starts executions of a deployed Step Functions state machine.
pub struct StepFunctionsEngine {
    client: StepFunctionsClient,
    state_machine_arn: String,
}

impl StepFunctionsEngine {
    pub fn new(client: StepFunctionsClient, state_machine_arn: impl Into<String>) -> Self {
        Self {
            client,
            state_machine_arn: state_machine_arn.into(),
        }
    }
}

#[async_trait]
impl WorkflowEngine for StepFunctionsEngine {
    async fn start_execution(&self, input: &serde_json::Value) -> anyhow::Result<ExecutionStarted> {
        let name = Uuid::new_v4().to_string();
        let out = self
            .client
            .start_execution(&self.state_machine_arn, &name, input)
            .await?;

        let started_at = Utc
            .timestamp_millis_opt((out.start_date * 1000.0) as i64)
            .single()
            .unwrap_or_else(Utc::now);
        tracing::info!(execution_arn = %out.execution_arn, %started_at, "started execution");

        Ok(ExecutionStarted {
            execution_id: out.execution_arn,
            started_at,
        })
    }
}

/// Pick the engine for the configured workflow identifier.
///
/// `arn:` identifiers name a Step Functions state machine; anything else must
/// name the local definition.
pub fn select(
    workflow_id: Option<&str>,
    local: Arc<LocalEngine>,
    step_functions: StepFunctionsClient,
) -> Result<Arc<dyn WorkflowEngine>, GateError> {
    let id = workflow_id
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or(GateError::MissingWorkflowId)?;

    if id.starts_with("arn:") {
        return Ok(Arc::new(StepFunctionsEngine::new(step_functions, id)));
    }
    if id == LOCAL_WORKFLOW {
        return Ok(local);
    }
    Err(GateError::UnknownWorkflow(id.to_string()))
}
