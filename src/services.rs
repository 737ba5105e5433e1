//! Builds the long-lived clients and services once at startup.

use std::sync::Arc;

use crate::aws::cloudformation::CloudFormationClient;
use crate::aws::codepipeline::CodePipelineClient;
use crate::aws::s3::ObjectStoreBlobs;
use crate::aws::stepfunctions::StepFunctionsClient;
use crate::aws::{self, AwsClient};
use crate::config::Config;
use crate::gate::approver::ApprovalExecutor;
use crate::gate::diff::DiffEvaluator;
use crate::gate::evaluator::ChangeEvaluationService;
use crate::gate::extractor::ArtifactExtractor;
use crate::gate::PipelineService;
use crate::workflow::engine::LocalEngine;
use crate::workflow::ApprovalWorkflow;

pub struct Services {
    pub pipeline: Arc<dyn PipelineService>,
    pub evaluator: Arc<ChangeEvaluationService>,
    pub approver: Arc<ApprovalExecutor>,
    pub local_engine: Arc<LocalEngine>,
    pub step_functions: StepFunctionsClient,
}

impl Services {
    pub fn from_config(cfg: &Config) -> anyhow::Result<Self> {
        let credentials = aws::default_credentials(&cfg.aws)?;
        let aws = Arc::new(AwsClient::with_provider(credentials, cfg.aws.clone())?);
        tracing::info!(region = aws.region(), "AWS clients ready");

        let pipeline: Arc<dyn PipelineService> = Arc::new(CodePipelineClient::new(aws.clone()));
        let blobs = Arc::new(ObjectStoreBlobs::new(
            cfg.aws.region.clone(),
            cfg.aws.endpoint.clone(),
        ));

        let evaluator = Arc::new(ChangeEvaluationService::new(
            ArtifactExtractor::new(blobs, cfg.template_pattern.clone()),
            DiffEvaluator::new(
                Arc::new(CloudFormationClient::new(aws.clone())),
                cfg.change_set_poll,
            ),
            cfg.approval.clone(),
            cfg.artifact_concurrency,
        ));
        let approver = Arc::new(ApprovalExecutor::new(pipeline.clone()));

        let workflow = Arc::new(ApprovalWorkflow::new(
            evaluator.clone(),
            approver.clone(),
            cfg.workflow.clone(),
        ));

        Ok(Self {
            pipeline,
            evaluator,
            approver,
            local_engine: Arc::new(
                LocalEngine::new(workflow).with_retention(cfg.execution_retention),
            ),
            step_functions: StepFunctionsClient::new(aws),
        })
    }
}
