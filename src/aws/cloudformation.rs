//! CloudFormation stack manager: stack lookup and disposable change sets.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use serde::de::IgnoredAny;
use serde::Deserialize;

use super::{AwsClient, AwsError, Members, QueryService};
use crate::gate::StackManager;
use crate::models::stack::{ChangeSet, ChangeSetHandle, ChangeSetRequest, ChangeSetStatus, ResourceChange, Stack};

pub const CLOUDFORMATION: QueryService = QueryService {
    signing_name: "cloudformation",
    endpoint_prefix: "cloudformation",
    version: "2010-05-15",
};

#[derive(Clone)]
pub struct CloudFormationClient {
    aws: Arc<AwsClient>,
}

impl CloudFormationClient {
    pub fn new(aws: Arc<AwsClient>) -> Self {
        Self { aws }
    }
}

// ── Response shapes ──────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeStacksResponse {
    describe_stacks_result: DescribeStacksResult,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeStacksResult {
    #[serde(default)]
    stacks: Members<StackMember>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StackMember {
    stack_name: String,
    #[serde(default)]
    parameters: Members<ParameterMember>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ParameterMember {
    parameter_key: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CreateChangeSetResponse {
    create_change_set_result: CreateChangeSetResult,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CreateChangeSetResult {
    id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeChangeSetResponse {
    describe_change_set_result: DescribeChangeSetResult,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeChangeSetResult {
    change_set_id: Option<String>,
    status: String,
    status_reason: Option<String>,
    #[serde(default)]
    changes: Members<ChangeMember>,
    next_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ChangeMember {
    resource_change: Option<ResourceChangeMember>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ResourceChangeMember {
    action: Option<String>,
    logical_resource_id: String,
    resource_type: String,
}

fn is_missing_stack(err: &AwsError) -> bool {
    err.code() == Some("ValidationError")
        && err.message().is_some_and(|m| m.contains("does not exist"))
}

fn create_change_set_params(request: &ChangeSetRequest) -> Vec<(String, String)> {
    let mut params = vec![
        ("StackName".to_string(), request.stack_name.clone()),
        ("ChangeSetName".to_string(), request.name.clone()),
        ("ChangeSetType".to_string(), "UPDATE".to_string()),
        ("Description".to_string(), request.description.clone()),
        ("TemplateBody".to_string(), request.template_body.clone()),
        ("UsePreviousTemplate".to_string(), "false".to_string()),
    ];
    for (i, capability) in request.capabilities.iter().enumerate() {
        params.push((format!("Capabilities.member.{}", i + 1), capability.clone()));
    }
    for (i, key) in request.reuse_parameters.iter().enumerate() {
        params.push((format!("Parameters.member.{}.ParameterKey", i + 1), key.clone()));
        params.push((format!("Parameters.member.{}.UsePreviousValue", i + 1), "true".to_string()));
    }
    params
}

#[async_trait]
impl StackManager for CloudFormationClient {
    async fn describe_stack(&self, name: &str) -> anyhow::Result<Option<Stack>> {
        let params = [("StackName".to_string(), name.to_string())];
        let resp: DescribeStacksResponse = match self
            .aws
            .query_call(CLOUDFORMATION, "DescribeStacks", &params)
            .await
        {
            Ok(r) => r,
            Err(e) if is_missing_stack(&e) => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("DescribeStacks {} failed", name)),
        };

        Ok(resp
            .describe_stacks_result
            .stacks
            .member
            .into_iter()
            .next()
            .map(|s| Stack {
                name: s.stack_name,
                parameter_keys: s
                    .parameters
                    .member
                    .into_iter()
                    .map(|p| p.parameter_key)
                    .collect(),
            }))
    }

    async fn create_change_set(&self, request: &ChangeSetRequest) -> anyhow::Result<ChangeSetHandle> {
        let resp: CreateChangeSetResponse = self
            .aws
            .query_call_once(CLOUDFORMATION, "CreateChangeSet", &create_change_set_params(request))
            .await
            .with_context(|| format!("CreateChangeSet on {} failed", request.stack_name))?;

        Ok(ChangeSetHandle {
            id: resp.create_change_set_result.id,
            name: request.name.clone(),
            stack_name: request.stack_name.clone(),
        })
    }

    async fn describe_change_set(&self, id: &str) -> anyhow::Result<ChangeSet> {
        let mut change_set = ChangeSet {
            id: id.to_string(),
            status: ChangeSetStatus::Pending,
            status_reason: None,
            changes: Vec::new(),
        };
        let mut next_token: Option<String> = None;

        loop {
            let mut params = vec![("ChangeSetName".to_string(), id.to_string())];
            if let Some(token) = next_token.take() {
                params.push(("NextToken".to_string(), token));
            }

            let resp: DescribeChangeSetResponse = self
                .aws
                .query_call(CLOUDFORMATION, "DescribeChangeSet", &params)
                .await
                .with_context(|| format!("DescribeChangeSet {} failed", id))?;
            let page = resp.describe_change_set_result;

            if let Some(change_set_id) = page.change_set_id {
                change_set.id = change_set_id;
            }
            change_set.status = ChangeSetStatus::from_cloudformation(&page.status);
            change_set.status_reason = page.status_reason;
            change_set.changes.extend(
                page.changes
                    .member
                    .into_iter()
                    .filter_map(|c| c.resource_change)
                    .map(|rc| ResourceChange {
                        action: rc.action.unwrap_or_default(),
                        logical_id: rc.logical_resource_id,
                        resource_type: rc.resource_type,
                    }),
            );

            match page.next_token {
                Some(token) if !token.is_empty() => next_token = Some(token),
                _ => break,
            }
        }

        Ok(change_set)
    }

    async fn delete_change_set(&self, handle: &ChangeSetHandle) -> anyhow::Result<()> {
        let params = [
            ("ChangeSetName".to_string(), handle.id.clone()),
            ("StackName".to_string(), handle.stack_name.clone()),
        ];
        let _: IgnoredAny = self
            .aws
            .query_call(CLOUDFORMATION, "DeleteChangeSet", &params)
            .await
            .with_context(|| format!("DeleteChangeSet {} failed", handle.name))?;
        Ok(())
    }
}
