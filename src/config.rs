use std::time::Duration;

use anyhow::Context;
use regex::Regex;

use crate::aws::AwsConfig;
use crate::gate::diff::PollSettings;
use crate::gate::extractor::DEFAULT_TEMPLATE_PATTERN;
use crate::models::pipeline::ApprovalDefaults;
use crate::workflow::engine::DEFAULT_RETENTION;
use crate::workflow::retry::RetryPolicy;
use crate::workflow::WorkflowSettings;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// Workflow definition the launcher starts: a Step Functions state
    /// machine ARN or the local `conditional-approval` definition.
    /// Set via APPROVAL_GATE_WORKFLOW_ID. Required to serve.
    pub workflow_id: Option<String>,
    /// Artifact entries matching this pattern are IAM templates.
    pub template_pattern: Regex,
    pub approval: ApprovalDefaults,
    pub workflow: WorkflowSettings,
    pub change_set_poll: PollSettings,
    /// Artifacts evaluated at once per job.
    pub artifact_concurrency: usize,
    /// How long finished local executions stay queryable.
    pub execution_retention: Duration,
    pub aws: AwsConfig,
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();

    let pattern = env_string("APPROVAL_GATE_TEMPLATE_PATTERN")
        .unwrap_or_else(|| DEFAULT_TEMPLATE_PATTERN.to_string());
    let template_pattern = Regex::new(&pattern)
        .with_context(|| format!("APPROVAL_GATE_TEMPLATE_PATTERN is not a valid regex: {}", pattern))?;

    let defaults = ApprovalDefaults::default();
    let retry_defaults = RetryPolicy::default();
    let poll_defaults = PollSettings::default();

    Ok(Config {
        port: env_parse("APPROVAL_GATE_PORT").unwrap_or(8080),
        workflow_id: env_string("APPROVAL_GATE_WORKFLOW_ID"),
        template_pattern,
        approval: ApprovalDefaults {
            pipeline_name: env_string("APPROVAL_GATE_PIPELINE_NAME"),
            stage_name: env_string("APPROVAL_GATE_STAGE_NAME").unwrap_or(defaults.stage_name),
            action_name: env_string("APPROVAL_GATE_ACTION_NAME").unwrap_or(defaults.action_name),
        },
        workflow: WorkflowSettings {
            approval_delay: Duration::from_secs(
                env_parse("APPROVAL_GATE_APPROVAL_DELAY_SECS").unwrap_or(30),
            ),
            retry: RetryPolicy {
                max_attempts: env_parse("APPROVAL_GATE_MAX_APPROVAL_ATTEMPTS")
                    .unwrap_or(retry_defaults.max_attempts)
                    .max(1),
                interval: env_parse("APPROVAL_GATE_RETRY_INTERVAL_MS")
                    .map(Duration::from_millis)
                    .unwrap_or(retry_defaults.interval),
                backoff_rate: env_parse("APPROVAL_GATE_RETRY_BACKOFF_RATE")
                    .unwrap_or(retry_defaults.backoff_rate),
                max_backoff: env_parse("APPROVAL_GATE_RETRY_MAX_BACKOFF_MS")
                    .map(Duration::from_millis)
                    .unwrap_or(retry_defaults.max_backoff),
                jitter: env_parse("APPROVAL_GATE_RETRY_JITTER_MS")
                    .map(Duration::from_millis)
                    .unwrap_or(retry_defaults.jitter),
            },
        },
        change_set_poll: PollSettings {
            interval: env_parse("APPROVAL_GATE_CHANGE_SET_POLL_MS")
                .map(Duration::from_millis)
                .unwrap_or(poll_defaults.interval),
            max_polls: env_parse("APPROVAL_GATE_CHANGE_SET_MAX_POLLS")
                .unwrap_or(poll_defaults.max_polls)
                .max(1),
        },
        artifact_concurrency: env_parse("APPROVAL_GATE_ARTIFACT_CONCURRENCY").unwrap_or(4),
        execution_retention: Duration::from_secs(
            env_parse::<u64>("APPROVAL_GATE_EXECUTION_RETENTION_SECS")
                .unwrap_or(DEFAULT_RETENTION.as_secs())
                .max(1),
        ),
        aws: AwsConfig {
            region: env_string("AWS_REGION")
                .or_else(|| env_string("AWS_DEFAULT_REGION"))
                .unwrap_or_else(|| "us-east-1".into()),
            endpoint: env_string("APPROVAL_GATE_AWS_ENDPOINT"),
        },
    })
}
