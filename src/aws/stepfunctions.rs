use std::sync::Arc;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use super::{AwsClient, JsonService};

pub const STEP_FUNCTIONS: JsonService = JsonService {
    signing_name: "states",
    endpoint_prefix: "states",
    target_prefix: "AWSStepFunctions",
    content_type: "application/x-amz-json-1.0",
};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StartExecutionInput<'a> {
    state_machine_arn: &'a str,
    name: &'a str,
    input: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartExecutionOutput {
    pub execution_arn: String,
    /// Epoch seconds.
    pub start_date: f64,
}

#[derive(Clone)]
pub struct StepFunctionsClient {
    aws: Arc<AwsClient>,
}

impl StepFunctionsClient {
    pub fn new(aws: Arc<AwsClient>) -> Self {
        Self { aws }
    }

    pub async fn start_execution(
        &self,
        state_machine_arn: &str,
        name: &str,
        input: &serde_json::Value,
    ) -> anyhow::Result<StartExecutionOutput> {
        let request = StartExecutionInput {
            state_machine_arn,
            name,
            input: input.to_string(),
        };
        self.aws
            .json_call(STEP_FUNCTIONS, "StartExecution", &request)
            .await
            .with_context(|| format!("StartExecution on {} failed", state_machine_arn))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aws::{AwsConfig, Credentials};
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_start_execution_sends_input_as_string() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("x-amz-target", "AWSStepFunctions.StartExecution"))
            .and(header("content-type", "application/x-amz-json-1.0"))
            .and(body_partial_json(json!({
                "stateMachineArn": "arn:aws:states:us-east-1:111111111111:stateMachine:conditional-approval",
                "name": "job-1",
                "input": "{\"autoApprove\":true}"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "executionArn": "arn:aws:states:us-east-1:111111111111:execution:conditional-approval:job-1",
                "startDate": 1700000000.123
            })))
            .expect(1)
            .mount(&server)
            .await;

        let aws = AwsClient::new(
            Credentials {
                access_key_id: "AKIDEXAMPLE".into(),
                secret_access_key: "secret".into(),
                session_token: None,
            },
            AwsConfig {
                region: "us-east-1".into(),
                endpoint: Some(server.uri()),
            },
        )
        .unwrap();

        let out = StepFunctionsClient::new(Arc::new(aws))
            .start_execution(
                "arn:aws:states:us-east-1:111111111111:stateMachine:conditional-approval",
                "job-1",
                &json!({"autoApprove": true}),
            )
            .await
            .unwrap();
        assert!(out.execution_arn.ends_with(":job-1"));
        assert!(out.start_date > 1.6e9);
    }
}
