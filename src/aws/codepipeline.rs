//! CodePipeline client: pipeline state, approval results and job results.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use serde::de::IgnoredAny;
use serde_json::json;

use super::{AwsClient, JsonService};
use crate::gate::PipelineService;
use crate::models::pipeline::{ApprovalResult, ApprovalTarget, PipelineState};

pub const CODEPIPELINE: JsonService = JsonService {
    signing_name: "codepipeline",
    endpoint_prefix: "codepipeline",
    target_prefix: "CodePipeline_20150709",
    content_type: "application/x-amz-json-1.1",
};

#[derive(Clone)]
pub struct CodePipelineClient {
    aws: Arc<AwsClient>,
}

impl CodePipelineClient {
    pub fn new(aws: Arc<AwsClient>) -> Self {
        Self { aws }
    }
}

// Approval and job results are state transitions: a repeat after a lost
// response fails on the consumed token or the finished job.
#[async_trait]
impl PipelineService for CodePipelineClient {
    async fn get_pipeline_state(&self, pipeline_name: &str) -> anyhow::Result<PipelineState> {
        self.aws
            .json_call(CODEPIPELINE, "GetPipelineState", &json!({ "name": pipeline_name }))
            .await
            .with_context(|| format!("GetPipelineState {} failed", pipeline_name))
    }

    async fn put_approval_result(
        &self,
        target: &ApprovalTarget,
        token: &str,
        result: &ApprovalResult,
    ) -> anyhow::Result<()> {
        let request = json!({
            "pipelineName": target.pipeline_name,
            "stageName": target.stage_name,
            "actionName": target.action_name,
            "token": token,
            "result": result,
        });
        let _: IgnoredAny = self
            .aws
            .json_call_once(CODEPIPELINE, "PutApprovalResult", &request)
            .await
            .with_context(|| format!("PutApprovalResult {} failed", target))?;
        Ok(())
    }

    async fn put_job_success_result(&self, job_id: &str) -> anyhow::Result<()> {
        let _: IgnoredAny = self
            .aws
            .json_call_once(CODEPIPELINE, "PutJobSuccessResult", &json!({ "jobId": job_id }))
            .await
            .with_context(|| format!("PutJobSuccessResult {} failed", job_id))?;
        Ok(())
    }

    async fn put_job_failure_result(&self, job_id: &str, message: &str) -> anyhow::Result<()> {
        let request = json!({
            "jobId": job_id,
            "failureDetails": { "type": "JobFailed", "message": message },
        });
        let _: IgnoredAny = self
            .aws
            .json_call_once(CODEPIPELINE, "PutJobFailureResult", &request)
            .await
            .with_context(|| format!("PutJobFailureResult {} failed", job_id))?;
        Ok(())
    }
}
