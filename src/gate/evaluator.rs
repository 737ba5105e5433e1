//! Change Evaluation Service: one auto-approve decision per pipeline job.

use futures::future;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{info, warn};

use super::diff::DiffEvaluator;
use super::extractor::ArtifactExtractor;
use crate::models::job::{GateRequest, InputArtifact, JobEvent, S3Location};
use crate::models::pipeline::{ApprovalDefaults, ApprovalTarget};

/// The decision for one job.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationOutcome {
    pub job_id: Option<String>,
    pub auto_approve: bool,
    pub changed_artifacts: Vec<S3Location>,
    pub approval: Option<ApprovalTarget>,
}

impl EvaluationOutcome {
    fn manual(job_id: Option<String>) -> Self {
        Self {
            job_id,
            auto_approve: false,
            changed_artifacts: Vec::new(),
            approval: None,
        }
    }
}

pub struct ChangeEvaluationService {
    extractor: ArtifactExtractor,
    diff: DiffEvaluator,
    defaults: ApprovalDefaults,
    concurrency: usize,
}

impl ChangeEvaluationService {
    pub fn new(
        extractor: ArtifactExtractor,
        diff: DiffEvaluator,
        defaults: ApprovalDefaults,
        concurrency: usize,
    ) -> Self {
        Self {
            extractor,
            diff,
            defaults,
            concurrency: concurrency.max(1),
        }
    }

    pub fn approval_defaults(&self) -> &ApprovalDefaults {
        &self.defaults
    }

    /// Validate `event` and evaluate it. Invalid events never auto-approve.
    pub async fn evaluate_event(&self, event: &JobEvent) -> EvaluationOutcome {
        let request = match GateRequest::from_event(event, &self.defaults) {
            Ok(r) => r,
            Err(e) => {
                warn!(job_id = ?event.job_id(), "{}; requiring manual approval", e);
                return EvaluationOutcome::manual(event.job_id().map(String::from));
            }
        };
        self.evaluate(&request).await
    }

    /// Evaluate a raw event and return it with `autoApprove` set, the shape
    /// an external workflow engine branches on.
    pub async fn evaluate_value(&self, mut event: serde_json::Value) -> serde_json::Value {
        let outcome = match serde_json::from_value::<JobEvent>(event.clone()) {
            Ok(parsed) => self.evaluate_event(&parsed).await,
            Err(e) => {
                warn!("could not decode job event ({}); requiring manual approval", e);
                EvaluationOutcome::manual(None)
            }
        };

        match event.as_object_mut() {
            Some(obj) => {
                obj.insert("autoApprove".into(), outcome.auto_approve.into());
                event
            }
            None => serde_json::json!({ "autoApprove": false }),
        }
    }

    pub async fn evaluate(&self, request: &GateRequest) -> EvaluationOutcome {
        info!(job_id = %request.job_id, stack = %request.stack_name, "checking for changes to stack");

        // `buffered` keeps input order in the output while running up to
        // `concurrency` artifacts at once; all artifacts are always evaluated.
        let checks: Vec<_> = request
            .artifacts
            .iter()
            .map(|artifact| self.artifact_changed(&request.stack_name, artifact))
            .collect();
        let changed: Vec<S3Location> = stream::iter(checks)
            .buffered(self.concurrency)
            .filter_map(future::ready)
            .collect()
            .await;

        match changed.first() {
            Some(first) => info!(
                job_id = %request.job_id,
                changed = changed.len(),
                "change detected in IAM template contained in {}", first
            ),
            None => info!(job_id = %request.job_id, "no change detected in IAM template"),
        }

        EvaluationOutcome {
            job_id: Some(request.job_id.clone()),
            auto_approve: changed.is_empty(),
            changed_artifacts: changed,
            approval: Some(request.approval.clone()),
        }
    }

    async fn artifact_changed(&self, stack_name: &str, artifact: &InputArtifact) -> Option<S3Location> {
        let Some(location) = artifact.s3_location() else {
            warn!(artifact = ?artifact.name, "input artifact is not from S3, ignoring it");
            return None;
        };

        let template = self.extractor.candidate_template(location).await?;
        if self.diff.has_changes(stack_name, &template.body).await {
            Some(location.clone())
        } else {
            None
        }
    }
}
