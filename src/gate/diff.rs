//! Decides whether a candidate template would change a live stack.
//!
//! The only primitive CloudFormation offers for this is a change set, which is
//! a real (if unexecuted) resource. Every change set created here is deleted
//! before [`DiffEvaluator::has_changes`] returns, whatever happened in between.
//!
//! Any doubt resolves to "changed": a needless manual review is acceptable,
//! a skipped one is not.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use futures::FutureExt;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use super::StackManager;
use crate::models::stack::{ChangeSet, ChangeSetHandle, ChangeSetRequest, ChangeSetStatus};

/// CloudFormation fails change sets that would do nothing with this reason.
static NO_CHANGES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"didn.t contain changes|No updates are to be performed")
        .expect("static regex is valid")
});

/// Polling bounds for waiting on change set creation.
#[derive(Debug, Clone, Copy)]
pub struct PollSettings {
    pub interval: Duration,
    pub max_polls: u32,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            max_polls: 120,
        }
    }
}

pub struct DiffEvaluator {
    stacks: Arc<dyn StackManager>,
    poll: PollSettings,
}

impl DiffEvaluator {
    pub fn new(stacks: Arc<dyn StackManager>, poll: PollSettings) -> Self {
        Self { stacks, poll }
    }

    /// `true` if deploying `template_body` to `stack_name` would change anything.
    pub async fn has_changes(&self, stack_name: &str, template_body: &str) -> bool {
        let stack = match self.stacks.describe_stack(stack_name).await {
            Ok(Some(stack)) => stack,
            Ok(None) => {
                info!(stack = stack_name, "stack does not exist, treating creation as a change");
                return true;
            }
            Err(e) => {
                error!(stack = stack_name, "error describing stack, treating template as a change: {:#}", e);
                return true;
            }
        };

        let request = ChangeSetRequest::update(&stack, template_body);
        let handle = match self.stacks.create_change_set(&request).await {
            Ok(handle) => handle,
            Err(e) => {
                error!(stack = stack_name, "could not create change set, treating template as a change: {:#}", e);
                // A create whose response was lost may still have succeeded.
                let unconfirmed = ChangeSetHandle::unconfirmed(&request);
                if let Err(e) = self.stacks.delete_change_set(&unconfirmed).await {
                    debug!(change_set = %unconfirmed.name, "no change set left behind: {:#}", e);
                }
                return true;
            }
        };
        debug!(stack = stack_name, change_set = %handle.name, "created change set");

        // Nothing between creation and deletion may skip the delete: inspect()
        // reports through its return value and panics are caught.
        let outcome = AssertUnwindSafe(self.inspect(&handle)).catch_unwind().await;
        self.release(&handle).await;

        match outcome {
            Ok(Ok(changed)) => changed,
            Ok(Err(e)) => {
                error!(
                    stack = stack_name,
                    change_set = %handle.name,
                    "error evaluating change set, treating template as a change: {:#}", e
                );
                true
            }
            Err(_) => {
                error!(
                    stack = stack_name,
                    change_set = %handle.name,
                    "change set evaluation panicked, treating template as a change"
                );
                true
            }
        }
    }

    async fn inspect(&self, handle: &ChangeSetHandle) -> anyhow::Result<bool> {
        let change_set = match self.wait_for_terminal(&handle.id).await {
            Ok(cs) => cs,
            Err(e) => {
                info!(
                    change_set = %handle.name,
                    "waiting on change set failed ({:#}), checking it directly", e
                );
                self.stacks
                    .describe_change_set(&handle.id)
                    .await
                    .context("direct change set read failed")?
            }
        };
        Ok(classify(&change_set))
    }

    async fn wait_for_terminal(&self, id: &str) -> anyhow::Result<ChangeSet> {
        let mut polls = 0;
        loop {
            let change_set = self.stacks.describe_change_set(id).await?;
            polls += 1;
            if change_set.status.is_terminal() {
                debug!(change_set = id, status = ?change_set.status, polls, "change set settled");
                return Ok(change_set);
            }
            if polls >= self.poll.max_polls {
                anyhow::bail!("change set still pending after {} polls", polls);
            }
            sleep(self.poll.interval).await;
        }
    }

    async fn release(&self, handle: &ChangeSetHandle) {
        info!(change_set = %handle.name, "deleting change set");
        if let Err(e) = self.stacks.delete_change_set(handle).await {
            warn!(change_set = %handle.name, "failed to delete change set: {:#}", e);
        }
    }
}

/// Whether a settled change set means the stack would change.
pub fn classify(change_set: &ChangeSet) -> bool {
    match change_set.status {
        ChangeSetStatus::Failed => {
            let reason = change_set.status_reason.as_deref().unwrap_or_default();
            if NO_CHANGES.is_match(reason) {
                info!("change set did not have any changes");
                false
            } else {
                error!("create change set FAILED: {}. Treating it as a change", reason);
                true
            }
        }
        ChangeSetStatus::Complete if change_set.changes.is_empty() => {
            info!("no changes found");
            false
        }
        ChangeSetStatus::Complete => {
            for change in &change_set.changes {
                info!(
                    action = %change.action,
                    logical_id = %change.logical_id,
                    resource_type = %change.resource_type,
                    "change found"
                );
            }
            true
        }
        ChangeSetStatus::Pending => {
            warn!("change set never settled, treating it as a change");
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::stack::ResourceChange;

    fn change_set(status: ChangeSetStatus, reason: Option<&str>, changes: usize) -> ChangeSet {
        ChangeSet {
            id: "arn:cs".into(),
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

    #[test]
    fn test_no_changes_failure_is_unchanged() {
        let cs = change_set(
            ChangeSetStatus::Failed,
            Some("The submitted information didn't contain changes. Submit different information to create a change set."),
            0,
        );
        assert!(!classify(&cs));

        let cs = change_set(ChangeSetStatus::Failed, Some("No updates are to be performed."), 0);
        assert!(!classify(&cs));
    }

    #[test]
    fn test_other_failure_is_changed() {
        let cs = change_set(
            ChangeSetStatus::Failed,
            Some("Template format error: Unresolved resource dependencies"),
            0,
        );
        assert!(classify(&cs));
        assert!(classify(&change_set(ChangeSetStatus::Failed, None, 0)));
    }

    #[test]
    fn test_complete_depends_on_change_list() {
        assert!(classify(&change_set(ChangeSetStatus::Complete, None, 1)));
        assert!(!classify(&change_set(ChangeSetStatus::Complete, None, 0)));
    }

    #[test]
    fn test_pending_is_changed() {
        assert!(classify(&change_set(ChangeSetStatus::Pending, None, 0)));
    }
}
