//! Test doubles for the AWS collaborators plus job event and archive builders.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::io::{Cursor, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use approval_gate::aws::s3::ObjectStoreBlobs;
use approval_gate::gate::diff::{DiffEvaluator, PollSettings};
use approval_gate::gate::evaluator::ChangeEvaluationService;
use approval_gate::gate::extractor::{ArtifactExtractor, DEFAULT_TEMPLATE_PATTERN};
use approval_gate::gate::{PipelineService, StackManager};
use approval_gate::models::pipeline::{ApprovalDefaults, ApprovalResult, ApprovalTarget, PipelineState};
use approval_gate::models::stack::{
    ChangeSet, ChangeSetHandle, ChangeSetRequest, ChangeSetStatus, ResourceChange, Stack,
};
use async_trait::async_trait;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::ObjectStore;
use regex::Regex;
use serde_json::{json, Value};

pub const BUCKET: &str = "codepipeline-artifacts";
pub const STACK: &str = "iam-roles";
pub const PIPELINE: &str = "image-test";

pub const NO_CHANGES_REASON: &str =
    "The submitted information didn't contain changes. Submit different information to create a change set.";

// ── Archives ─────────────────────────────────────────────────

/// A zip archive holding `files` in the given order.
pub fn zip_archive(files: &[(&str, &str)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default();
    for (name, body) in files {
        writer.start_file(*name, options).unwrap();
        writer.write_all(body.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// Blob store serving `objects` (key, bytes) from the artifact bucket.
pub async fn blobs(objects: Vec<(&str, Vec<u8>)>) -> Arc<ObjectStoreBlobs> {
    let store = InMemory::new();
    for (key, bytes) in objects {
        store.put(&Path::from(key), bytes.into()).await.unwrap();
    }
    Arc::new(ObjectStoreBlobs::new("us-east-1", None).with_store(BUCKET, Arc::new(store)))
}

// ── Job events ───────────────────────────────────────────────

pub fn s3_artifact(key: &str) -> Value {
    json!({
        "name": "BuildOutput",
        "location": {
            "type": "S3",
            "s3Location": { "bucketName": BUCKET, "objectKey": key }
        }
    })
}

pub fn job_event(job_id: &str, user_parameters: Option<&str>, artifacts: Vec<Value>) -> Value {
    let mut configuration = json!({ "FunctionName": "approval-gate" });
    if let Some(params) = user_parameters {
        configuration["UserParameters"] = json!(params);
    }
    json!({
        "CodePipeline.job": {
            "id": job_id,
            "accountId": "111111111111",
            "data": {
                "actionConfiguration": { "configuration": configuration },
                "inputArtifacts": artifacts
            }
        }
    })
}

pub fn gate_parameters() -> String {
    json!({ "stackName": STACK, "pipelineName": PIPELINE }).to_string()
}

// ── CloudFormation ───────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum StackLookup {
    Exists,
    Missing,
    Error,
}

#[derive(Debug, Clone)]
pub enum Describe {
    Settled(ChangeSet),
    Error,
    Panic,
}

pub fn change_set(status: ChangeSetStatus, reason: Option<&str>, changes: usize) -> ChangeSet {
    ChangeSet {
        id: "arn:aws:cloudformation:us-east-1:111111111111:changeSet/chg/1".into(),
        status,
        status_reason: reason.map(String::from),
        changes: (0..changes)
            .map(|i| ResourceChange {
                action: "Modify".into(),
                logical_id: format!("Role{}", i),
                resource_type: "AWS::IAM::Role".into(),
            })
            .collect(),
    }
}

/// Scripted `StackManager` that counts every call.
pub struct FakeStacks {
    lookup: StackLookup,
    create_fails: bool,
    delete_fails: bool,
    /// Popped per describe call; the last entry repeats.
    describes: Mutex<VecDeque<Describe>>,
    pub requests: Mutex<Vec<ChangeSetRequest>>,
    pub deleted: Mutex<Vec<ChangeSetHandle>>,
    pub describe_stack_calls: AtomicUsize,
    pub create_calls: AtomicUsize,
    pub describe_calls: AtomicUsize,
    pub delete_calls: AtomicUsize,
}

impl FakeStacks {
    pub fn new(lookup: StackLookup, describes: Vec<Describe>) -> Self {
        Self {
            lookup,
            create_fails: false,
            delete_fails: false,
            describes: Mutex::new(describes.into()),
            requests: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
            describe_stack_calls: AtomicUsize::new(0),
            create_calls: AtomicUsize::new(0),
            describe_calls: AtomicUsize::new(0),
            delete_calls: AtomicUsize::new(0),
        }
    }

    /// An existing stack whose change sets settle as `settled`.
    pub fn settling(settled: ChangeSet) -> Self {
        Self::new(StackLookup::Exists, vec![Describe::Settled(settled)])
    }

    pub fn failing_create(mut self) -> Self {
        self.create_fails = true;
        self
    }

    pub fn failing_delete(mut self) -> Self {
        self.delete_fails = true;
        self
    }

    pub fn creates(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn deletes(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }

    pub fn describes(&self) -> usize {
        self.describe_calls.load(Ordering::SeqCst)
    }

    pub fn stack_lookups(&self) -> usize {
        self.describe_stack_calls.load(Ordering::SeqCst)
    }

    fn next_describe(&self) -> Describe {
        let mut script = self.describes.lock().unwrap();
        if script.len() > 1 {
            script.pop_front().unwrap()
        } else {
            script.front().cloned().unwrap_or(Describe::Error)
        }
    }
}

#[async_trait]
impl StackManager for FakeStacks {
    async fn describe_stack(&self, name: &str) -> anyhow::Result<Option<Stack>> {
        self.describe_stack_calls.fetch_add(1, Ordering::SeqCst);
        match self.lookup {
            StackLookup::Exists => Ok(Some(Stack {
                name: name.to_string(),
                parameter_keys: vec!["Env".into()],
            })),
            StackLookup::Missing => Ok(None),
            StackLookup::Error => anyhow::bail!("Rate exceeded"),
        }
    }

    async fn create_change_set(&self, request: &ChangeSetRequest) -> anyhow::Result<ChangeSetHandle> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        if self.create_fails {
            anyhow::bail!("Template format error: unsupported structure");
        }
        Ok(ChangeSetHandle {
            id: format!("arn:aws:cloudformation:us-east-1:111111111111:changeSet/{}/1", request.name),
            name: request.name.clone(),
            stack_name: request.stack_name.clone(),
        })
    }

    async fn describe_change_set(&self, _id: &str) -> anyhow::Result<ChangeSet> {
        self.describe_calls.fetch_add(1, Ordering::SeqCst);
        match self.next_describe() {
            Describe::Settled(cs) => Ok(cs),
            Describe::Error => anyhow::bail!("ChangeSetNotFound"),
            Describe::Panic => panic!("unexpected change set shape"),
        }
    }

    async fn delete_change_set(&self, handle: &ChangeSetHandle) -> anyhow::Result<()> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        self.deleted.lock().unwrap().push(handle.clone());
        if self.delete_fails {
            anyhow::bail!("InvalidChangeSetStatus");
        }
        Ok(())
    }
}

pub fn fast_poll() -> PollSettings {
    PollSettings {
        interval: Duration::from_millis(1),
        max_polls: 5,
    }
}

pub fn diff(stacks: Arc<FakeStacks>) -> DiffEvaluator {
    DiffEvaluator::new(stacks, fast_poll())
}

pub fn evaluation_service(blobs: Arc<ObjectStoreBlobs>, stacks: Arc<FakeStacks>) -> ChangeEvaluationService {
    ChangeEvaluationService::new(
        ArtifactExtractor::new(blobs, Regex::new(DEFAULT_TEMPLATE_PATTERN).unwrap()),
        diff(stacks),
        ApprovalDefaults::default(),
        4,
    )
}

// ── CodePipeline ─────────────────────────────────────────────

/// `PipelineService` whose approval action gets its token after
/// `token_after` state reads (never when `None`).
pub struct FakePipeline {
    token_after: Option<usize>,
    approval_fails: bool,
    job_result_fails: bool,
    pub state_calls: AtomicUsize,
    pub approvals: Mutex<Vec<(ApprovalTarget, String, ApprovalResult)>>,
    pub job_successes: Mutex<Vec<String>>,
    pub job_failures: Mutex<Vec<(String, String)>>,
}

impl FakePipeline {
    pub fn new(token_after: Option<usize>) -> Self {
        Self {
            token_after,
            approval_fails: false,
            job_result_fails: false,
            state_calls: AtomicUsize::new(0),
            approvals: Mutex::new(Vec::new()),
            job_successes: Mutex::new(Vec::new()),
            job_failures: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_approval(mut self) -> Self {
        self.approval_fails = true;
        self
    }

    pub fn failing_job_results(mut self) -> Self {
        self.job_result_fails = true;
        self
    }

    pub fn state_reads(&self) -> usize {
        self.state_calls.load(Ordering::SeqCst)
    }

    pub fn approval_count(&self) -> usize {
        self.approvals.lock().unwrap().len()
    }
}

fn pipeline_state(action_status: &str, token: Option<&str>) -> PipelineState {
    serde_json::from_value(json!({
        "pipelineName": PIPELINE,
        "stageStates": [{
            "stageName": "iam",
            "latestExecution": { "pipelineExecutionId": "e-1", "status": "InProgress" },
            "actionStates": [{
                "actionName": "IAM_Approval",
                "latestExecution": { "status": action_status, "token": token }
            }]
        }]
    }))
    .unwrap()
}

#[async_trait]
impl PipelineService for FakePipeline {
    async fn get_pipeline_state(&self, _pipeline_name: &str) -> anyhow::Result<PipelineState> {
        let read = self.state_calls.fetch_add(1, Ordering::SeqCst) + 1;
        match self.token_after {
            Some(n) if read > n => Ok(pipeline_state("InProgress", Some("token-123"))),
            // The action moved on without a token.
            _ => Ok(pipeline_state("Succeeded", None)),
        }
    }

    async fn put_approval_result(
        &self,
        target: &ApprovalTarget,
        token: &str,
        result: &ApprovalResult,
    ) -> anyhow::Result<()> {
        if self.approval_fails {
            anyhow::bail!("InvalidApprovalTokenException");
        }
        self.approvals
            .lock()
            .unwrap()
            .push((target.clone(), token.to_string(), result.clone()));
        Ok(())
    }

    async fn put_job_success_result(&self, job_id: &str) -> anyhow::Result<()> {
        if self.job_result_fails {
            anyhow::bail!("JobNotFoundException");
        }
        self.job_successes.lock().unwrap().push(job_id.to_string());
        Ok(())
    }

    async fn put_job_failure_result(&self, job_id: &str, message: &str) -> anyhow::Result<()> {
        self.job_failures
            .lock()
            .unwrap()
            .push((job_id.to_string(), message.to_string()));
        Ok(())
    }
}
