//! Amazon States Language rendering of the approval workflow, for running it
//! on Step Functions instead of the local engine.

use serde_json::{json, Value};

use super::WorkflowSettings;

const EVALUATE: &str = "Check if should be Auto Approved";
const DECIDE: &str = "AutoApprove?";
const WAIT: &str = "Wait for approval token";
const APPROVE: &str = "Auto Approve";
const NO_AUTO_APPROVAL: &str = "No Auto Approval";

/// Error name the approve task raises when the token is not published yet.
pub const NO_TOKEN_ERROR: &str = "NoTokenError";

/// Build the state machine definition. `evaluate_resource` and
/// `approve_resource` are the task ARNs backing the two task states.
pub fn state_machine(settings: &WorkflowSettings, evaluate_resource: &str, approve_resource: &str) -> Value {
    let retry = &settings.retry;
    let interval_secs = retry.interval.as_secs().max(1);

    json!({
        "Comment": "Approve the IAM stage automatically when no IAM changes are detected",
        "StartAt": EVALUATE,
        "States": {
            EVALUATE: {
                "Type": "Task",
                "Resource": evaluate_resource,
                "Next": DECIDE
            },
            DECIDE: {
                "Type": "Choice",
                "Choices": [{
                    "Variable": "$.autoApprove",
                    "BooleanEquals": true,
                    "Next": WAIT
                }],
                "Default": NO_AUTO_APPROVAL
            },
            WAIT: {
                "Type": "Wait",
                "Seconds": settings.approval_delay.as_secs(),
                "Next": APPROVE
            },
            APPROVE: {
                "Type": "Task",
                "Resource": approve_resource,
                "Retry": [{
                    "ErrorEquals": [NO_TOKEN_ERROR],
                    "IntervalSeconds": interval_secs,
                    "BackoffRate": retry.backoff_rate,
                    "MaxAttempts": retry.max_attempts.saturating_sub(1)
                }],
                "End": true
            },
            NO_AUTO_APPROVAL: {
                "Type": "Pass",
                "End": true
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_definition_shape() {
        let def = state_machine(&WorkflowSettings::default(), "arn:evaluate", "arn:approve");

        assert_eq!(def["StartAt"], EVALUATE);
        let states = &def["States"];
        assert_eq!(states[EVALUATE]["Resource"], "arn:evaluate");
        assert_eq!(states[DECIDE]["Choices"][0]["Variable"], "$.autoApprove");
        assert_eq!(states[DECIDE]["Default"], NO_AUTO_APPROVAL);
        assert_eq!(states[WAIT]["Seconds"], 30);

        let retry = &states[APPROVE]["Retry"][0];
        assert_eq!(retry["ErrorEquals"][0], NO_TOKEN_ERROR);
        // Step Functions counts retries, not attempts.
        assert_eq!(retry["MaxAttempts"], 7);
        assert_eq!(states[NO_AUTO_APPROVAL]["Type"], "Pass");
    }
}
