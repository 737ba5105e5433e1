//! Change detection and approval: the decision logic of the gate.
//!
//! External systems are reached through the traits below so each component
//! can be driven by the AWS clients in [`crate::aws`] or by test doubles.

use async_trait::async_trait;
use bytes::Bytes;

use crate::models::job::S3Location;
use crate::models::pipeline::{ApprovalResult, ApprovalTarget, PipelineState};
use crate::models::stack::{ChangeSet, ChangeSetHandle, ChangeSetRequest, Stack};

pub mod approver;
pub mod diff;
pub mod evaluator;
pub mod extractor;

/// Fetches artifact objects.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn fetch(&self, location: &S3Location) -> anyhow::Result<Bytes>;
}

/// Live stacks and disposable change sets.
#[async_trait]
pub trait StackManager: Send + Sync {
    /// `Ok(None)` when the stack does not exist.
    async fn describe_stack(&self, name: &str) -> anyhow::Result<Option<Stack>>;
    async fn create_change_set(&self, request: &ChangeSetRequest) -> anyhow::Result<ChangeSetHandle>;
    async fn describe_change_set(&self, id: &str) -> anyhow::Result<ChangeSet>;
    /// Addressed by name and stack so a change set whose creation was never
    /// confirmed can still be removed.
    async fn delete_change_set(&self, handle: &ChangeSetHandle) -> anyhow::Result<()>;
}

/// The pipeline service the gate reports to.
#[async_trait]
pub trait PipelineService: Send + Sync {
    async fn get_pipeline_state(&self, pipeline_name: &str) -> anyhow::Result<PipelineState>;
    async fn put_approval_result(
        &self,
        target: &ApprovalTarget,
        token: &str,
        result: &ApprovalResult,
    ) -> anyhow::Result<()>;
    async fn put_job_success_result(&self, job_id: &str) -> anyhow::Result<()>;
    async fn put_job_failure_result(&self, job_id: &str, message: &str) -> anyhow::Result<()>;
}
