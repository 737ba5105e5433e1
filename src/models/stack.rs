use serde::Serialize;
use uuid::Uuid;

/// Capability required to create or update named IAM resources.
pub const CAPABILITY_NAMED_IAM: &str = "CAPABILITY_NAMED_IAM";

const CHANGE_SET_DESCRIPTION: &str =
    "Temporary Change Set to see if stack has changed and needs to be submitted for approval";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stack {
    pub name: String,
    pub parameter_keys: Vec<String>,
}

/// Everything needed to create a disposable UPDATE change set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSetRequest {
    pub name: String,
    pub stack_name: String,
    pub template_body: String,
    /// Parameters passed with `UsePreviousValue=true`.
    pub reuse_parameters: Vec<String>,
    pub capabilities: Vec<String>,
    pub description: String,
}

impl ChangeSetRequest {
    /// An UPDATE against `stack` that keeps every current parameter value.
    pub fn update(stack: &Stack, template_body: &str) -> Self {
        Self {
            name: format!("chg{}", Uuid::new_v4().simple()),
            stack_name: stack.name.clone(),
            template_body: template_body.to_string(),
            reuse_parameters: stack.parameter_keys.clone(),
            capabilities: vec![CAPABILITY_NAMED_IAM.to_string()],
            description: CHANGE_SET_DESCRIPTION.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSetHandle {
    /// ARN when creation was confirmed, otherwise the change set name.
    pub id: String,
    pub name: String,
    pub stack_name: String,
}

impl ChangeSetHandle {
    /// The change set `request` may have left behind when its create call
    /// failed without a definite answer.
    pub fn unconfirmed(request: &ChangeSetRequest) -> Self {
        Self {
            id: request.name.clone(),
            name: request.name.clone(),
            stack_name: request.stack_name.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChangeSetStatus {
    Pending,
    Complete,
    Failed,
}

impl ChangeSetStatus {
    pub fn from_cloudformation(status: &str) -> Self {
        match status {
            "CREATE_COMPLETE" => Self::Complete,
            "FAILED" | "DELETE_FAILED" => Self::Failed,
            _ => Self::Pending,
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSet {
    pub id: String,
    pub status: ChangeSetStatus,
    pub status_reason: Option<String>,
    pub changes: Vec<ResourceChange>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceChange {
    pub action: String,
    pub logical_id: String,
    pub resource_type: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_request_reuses_parameters() {
        let stack = Stack {
            name: "iam-roles".into(),
            parameter_keys: vec!["Env".into(), "Prefix".into()],
        };
        let req = ChangeSetRequest::update(&stack, "Resources: {}");

        assert!(req.name.starts_with("chg"));
        assert_eq!(req.name.len(), 35);
        assert!(req.name.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_eq!(req.reuse_parameters, vec!["Env", "Prefix"]);
        assert_eq!(req.capabilities, vec![CAPABILITY_NAMED_IAM]);
        assert_ne!(req.name, ChangeSetRequest::update(&stack, "").name);
    }

    #[test]
    fn test_unconfirmed_handle_addresses_by_name_and_stack() {
        let stack = Stack {
            name: "iam-roles".into(),
            parameter_keys: vec![],
        };
        let req = ChangeSetRequest::update(&stack, "Resources: {}");
        let handle = ChangeSetHandle::unconfirmed(&req);

        assert_eq!(handle.id, req.name);
        assert_eq!(handle.name, req.name);
        assert_eq!(handle.stack_name, "iam-roles");
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(ChangeSetStatus::from_cloudformation("CREATE_PENDING"), ChangeSetStatus::Pending);
        assert_eq!(ChangeSetStatus::from_cloudformation("CREATE_IN_PROGRESS"), ChangeSetStatus::Pending);
        assert_eq!(ChangeSetStatus::from_cloudformation("CREATE_COMPLETE"), ChangeSetStatus::Complete);
        assert_eq!(ChangeSetStatus::from_cloudformation("FAILED"), ChangeSetStatus::Failed);
        assert!(!ChangeSetStatus::Pending.is_terminal());
        assert!(ChangeSetStatus::Failed.is_terminal());
    }
}
