//! Workflow Launcher: turns a pipeline job into a workflow execution.
//!
//! The pipeline job is reported successful as soon as the execution starts;
//! the approval itself happens asynchronously on the manual approval action.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::errors::GateError;
use crate::gate::PipelineService;
use crate::models::job::RequestError;
use crate::workflow::engine::{ExecutionStarted, WorkflowEngine};

pub struct Launcher {
    engine: Arc<dyn WorkflowEngine>,
    pipeline: Arc<dyn PipelineService>,
}

impl Launcher {
    pub fn new(engine: Arc<dyn WorkflowEngine>, pipeline: Arc<dyn PipelineService>) -> Self {
        Self { engine, pipeline }
    }

    pub async fn launch(&self, event: &serde_json::Value) -> Result<ExecutionStarted, GateError> {
        let job_id = event
            .get("CodePipeline.job")
            .and_then(|job| job.get("id"))
            .and_then(|id| id.as_str())
            .ok_or(RequestError::MissingJobId)?;

        let started = match self.engine.start_execution(event).await {
            Ok(started) => started,
            Err(e) => {
                error!(job_id, "error launching workflow: {:#}", e);
                let message = format!("could not start approval workflow: {}", e);
                if let Err(report) = self.pipeline.put_job_failure_result(job_id, &message).await {
                    warn!(job_id, "could not report job failure: {:#}", report);
                }
                return Err(e.into());
            }
        };
        info!(
            job_id,
            execution_id = %started.execution_id,
            started_at = %started.started_at,
            "started workflow execution"
        );

        self.pipeline.put_job_success_result(job_id).await?;
        info!(job_id, "marked pipeline job as completed");
        Ok(started)
    }
}
