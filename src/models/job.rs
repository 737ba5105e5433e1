//! Inbound CodePipeline job events and their validated form.
//!
//! The pipeline invokes the gate with a loosely structured event. It is
//! decoded once into [`JobEvent`] and then validated into a [`GateRequest`];
//! every validation failure maps to "require manual approval" upstream.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::pipeline::{ApprovalDefaults, ApprovalTarget};

/// Blob store kind the gate knows how to read artifacts from.
pub const S3_STORE: &str = "S3";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobEvent {
    #[serde(rename = "CodePipeline.job", skip_serializing_if = "Option::is_none")]
    pub job: Option<JobPayload>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobPayload {
    pub id: Option<String>,
    pub data: Option<JobData>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobData {
    #[serde(default)]
    pub input_artifacts: Vec<InputArtifact>,
    pub action_configuration: Option<ActionConfiguration>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionConfiguration {
    pub configuration: Option<ActionSettings>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ActionSettings {
    pub user_parameters: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputArtifact {
    pub name: Option<String>,
    pub location: Option<ArtifactLocation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactLocation {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub s3_location: Option<S3Location>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct S3Location {
    pub bucket_name: String,
    pub object_key: String,
}

impl fmt::Display for S3Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s3://{}/{}", self.bucket_name, self.object_key)
    }
}

impl InputArtifact {
    /// The S3 location of this artifact, if it is stored in S3.
    pub fn s3_location(&self) -> Option<&S3Location> {
        let location = self.location.as_ref()?;
        if location.kind.as_deref() != Some(S3_STORE) {
            return None;
        }
        location.s3_location.as_ref()
    }
}

impl JobEvent {
    pub fn job_id(&self) -> Option<&str> {
        self.job.as_ref()?.id.as_deref()
    }

    fn data(&self) -> Option<&JobData> {
        self.job.as_ref()?.data.as_ref()
    }

    fn user_parameters(&self) -> Option<&str> {
        self.data()?
            .action_configuration
            .as_ref()?
            .configuration
            .as_ref()?
            .user_parameters
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// Job event validation failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RequestError {
    #[error("could not find CodePipeline.job in request")]
    MissingJob,

    #[error("job has no id")]
    MissingJobId,

    #[error("could not find inputArtifacts in request")]
    MissingArtifacts,

    #[error("could not find stack name in request")]
    MissingStackName,

    #[error("no approval pipeline configured for this job")]
    MissingApprovalPipeline,

    #[error("invalid UserParameters: {0}")]
    InvalidUserParameters(String),

    #[error("malformed job event: {0}")]
    MalformedEvent(String),
}

/// Structured form of `UserParameters`. A plain string is just a stack name.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GateParameters {
    stack_name: Option<String>,
    pipeline_name: Option<String>,
    stage_name: Option<String>,
    action_name: Option<String>,
}

fn parse_user_parameters(raw: &str) -> Result<GateParameters, RequestError> {
    if !raw.starts_with('{') {
        return Ok(GateParameters {
            stack_name: Some(raw.to_string()),
            ..Default::default()
        });
    }
    serde_json::from_str(raw).map_err(|e| RequestError::InvalidUserParameters(e.to_string()))
}

/// Resolve which approval action this job's gate should approve.
pub fn resolve_approval_target(
    event: &JobEvent,
    defaults: &ApprovalDefaults,
) -> Result<ApprovalTarget, RequestError> {
    let params = match event.user_parameters() {
        Some(raw) => parse_user_parameters(raw)?,
        None => GateParameters::default(),
    };
    approval_target(&params, defaults)
}

fn approval_target(
    params: &GateParameters,
    defaults: &ApprovalDefaults,
) -> Result<ApprovalTarget, RequestError> {
    let pipeline_name = params
        .pipeline_name
        .clone()
        .or_else(|| defaults.pipeline_name.clone())
        .ok_or(RequestError::MissingApprovalPipeline)?;

    Ok(ApprovalTarget {
        pipeline_name,
        stage_name: params
            .stage_name
            .clone()
            .unwrap_or_else(|| defaults.stage_name.clone()),
        action_name: params
            .action_name
            .clone()
            .unwrap_or_else(|| defaults.action_name.clone()),
    })
}

/// A job event that carries everything the gate needs.
#[derive(Debug, Clone)]
pub struct GateRequest {
    pub job_id: String,
    pub artifacts: Vec<InputArtifact>,
    pub stack_name: String,
    pub approval: ApprovalTarget,
}

impl GateRequest {
    pub fn from_event(event: &JobEvent, defaults: &ApprovalDefaults) -> Result<Self, RequestError> {
        let job = event.job.as_ref().ok_or(RequestError::MissingJob)?;
        let job_id = job.id.clone().ok_or(RequestError::MissingJobId)?;

        let artifacts = event
            .data()
            .map(|d| d.input_artifacts.clone())
            .filter(|a| !a.is_empty())
            .ok_or(RequestError::MissingArtifacts)?;

        let raw = event.user_parameters().ok_or(RequestError::MissingStackName)?;
        let params = parse_user_parameters(raw)?;
        let stack_name = params
            .stack_name
            .clone()
            .filter(|s| !s.trim().is_empty())
            .ok_or(RequestError::MissingStackName)?;

        let approval = approval_target(&params, defaults)?;

        Ok(Self {
            job_id,
            artifacts,
            stack_name,
            approval,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> ApprovalDefaults {
        ApprovalDefaults {
            pipeline_name: Some("image-test".into()),
            ..Default::default()
        }
    }

    fn event(user_parameters: Option<&str>) -> JobEvent {
        let mut value = serde_json::json!({
            "CodePipeline.job": {
                "id": "11111111-abcd-1111-abcd-111111abcdef",
                "accountId": "111111111111",
                "data": {
                    "actionConfiguration": {
                        "configuration": {"FunctionName": "start-conditional-approval"}
                    },
                    "inputArtifacts": [{
                        "name": "BuildOutput",
                        "revision": null,
                        "location": {
                            "type": "S3",
                            "s3Location": {"bucketName": "artifacts", "objectKey": "image-test/Build/abc.zip"}
                        }
                    }]
                }
            }
        });
        if let Some(p) = user_parameters {
            value["CodePipeline.job"]["data"]["actionConfiguration"]["configuration"]["UserParameters"] =
                serde_json::Value::String(p.to_string());
        }
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_plain_user_parameters_name_the_stack() {
        let req = GateRequest::from_event(&event(Some("iam-roles")), &defaults()).unwrap();
        assert_eq!(req.stack_name, "iam-roles");
        assert_eq!(req.approval.pipeline_name, "image-test");
        assert_eq!(req.approval.stage_name, "iam");
        assert_eq!(req.approval.action_name, "IAM_Approval");
        assert_eq!(
            req.artifacts[0].s3_location().unwrap().to_string(),
            "s3://artifacts/image-test/Build/abc.zip"
        );
    }

    #[test]
    fn test_json_user_parameters_override_approval_target() {
        let params = r#"{"stackName": "iam-roles", "pipelineName": "web", "actionName": "Gate"}"#;
        let req = GateRequest::from_event(&event(Some(params)), &ApprovalDefaults::default()).unwrap();
        assert_eq!(req.stack_name, "iam-roles");
        assert_eq!(req.approval.pipeline_name, "web");
        assert_eq!(req.approval.stage_name, "iam");
        assert_eq!(req.approval.action_name, "Gate");
    }

    #[test]
    fn test_missing_fields_are_reported() {
        assert_eq!(
            GateRequest::from_event(&JobEvent::default(), &defaults()).unwrap_err(),
            RequestError::MissingJob
        );
        assert_eq!(
            GateRequest::from_event(&event(None), &defaults()).unwrap_err(),
            RequestError::MissingStackName
        );
        assert_eq!(
            GateRequest::from_event(&event(Some("   ")), &defaults()).unwrap_err(),
            RequestError::MissingStackName
        );
        assert_eq!(
            GateRequest::from_event(&event(Some("iam-roles")), &ApprovalDefaults::default()).unwrap_err(),
            RequestError::MissingApprovalPipeline
        );
        assert!(matches!(
            GateRequest::from_event(&event(Some("{not json")), &defaults()).unwrap_err(),
            RequestError::InvalidUserParameters(_)
        ));
    }

    #[test]
    fn test_empty_artifact_list_is_missing() {
        let mut ev = event(Some("iam-roles"));
        ev.job.as_mut().unwrap().data.as_mut().unwrap().input_artifacts.clear();
        assert_eq!(
            GateRequest::from_event(&ev, &defaults()).unwrap_err(),
            RequestError::MissingArtifacts
        );
    }

    #[test]
    fn test_non_s3_artifact_has_no_location() {
        let artifact = InputArtifact {
            name: Some("Source".into()),
            location: Some(ArtifactLocation {
                kind: Some("CodeCommit".into()),
                s3_location: Some(S3Location {
                    bucket_name: "b".into(),
                    object_key: "k".into(),
                }),
            }),
        };
        assert!(artifact.s3_location().is_none());
    }
}
