//! Polling of long-running vCenter tasks

use tokio::time::{sleep, Instant};

use super::types::TaskInfo;
use super::{fetch, ManagedObjectRef, TaskState, Vim};
use crate::config::TaskPolicy;
use crate::{Error, Result};

/// Wait for `task` to finish and return its final info.
///
/// A task that ends in the `error` state becomes [`Error::TaskFailed`].
pub async fn wait_for_task(
    vim: &dyn Vim,
    task: &ManagedObjectRef,
    policy: &TaskPolicy,
) -> Result<TaskInfo> {
    let started = Instant::now();
    let mut last_progress = None;

    loop {
        let info: TaskInfo = fetch(vim, task, "info")
            .await?
            .ok_or_else(|| Error::Decode(format!("task {} has no info", task.value)))?;

        match info.state {
            TaskState::Success => {
                tracing::debug!(task = %task.value, elapsed_ms = started.elapsed().as_millis(), "Task succeeded");
                return Ok(info);
            }
            TaskState::Error => {
                let message = info
                    .error
                    .as_ref()
                    .map(|e| e.message())
                    .unwrap_or_else(|| "no error details".to_string());
                tracing::warn!(task = %task.value, error = %message, "Task failed");
                return Err(Error::TaskFailed {
                    task: task.value.clone(),
                    message,
                });
            }
            TaskState::Queued | TaskState::Running => {
                if info.progress.is_some() && info.progress != last_progress {
                    tracing::debug!(task = %task.value, state = %info.state, progress = ?info.progress, "Task in progress");
                    last_progress = info.progress;
                }
            }
        }

        if let Some(timeout) = policy.timeout {
            if started.elapsed() >= timeout {
                return Err(Error::Timeout(task.value.clone()));
            }
        }

        sleep(policy.poll_interval).await;
    }
}

/// Decode the task reference returned by a `*_Task` method and wait for it
pub(crate) async fn run_task(
    vim: &dyn Vim,
    method: &str,
    returned: serde_json::Value,
    policy: &TaskPolicy,
) -> Result<TaskInfo> {
    let task: ManagedObjectRef = super::decode(method, returned)?;
    tracing::debug!(task = %task.value, method, "Waiting for task");
    wait_for_task(vim, &task, policy).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vim::{testing, MockVim};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn policy() -> TaskPolicy {
        TaskPolicy {
            poll_interval: Duration::from_millis(500),
            timeout: Some(Duration::from_secs(10)),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_until_success() {
        let polls = Arc::new(AtomicUsize::new(0));
        let counter = polls.clone();

        let mut vim = MockVim::new();
        vim.expect_property()
            .withf(|obj, name| obj.value == "task-7" && name == "info")
            .returning(move |_, _| {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                Ok(match n {
                    0 => json!({"key": "task-7", "state": "queued"}),
                    1 => json!({"key": "task-7", "state": "running", "progress": 40}),
                    _ => testing::task_success(Some(json!({"_typeName": "ID", "id": "x"}))),
                })
            });

        let task = ManagedObjectRef::new("Task", "task-7");
        let info = wait_for_task(&vim, &task, &policy()).await.unwrap();

        assert_eq!(info.state, TaskState::Success);
        assert_eq!(info.result.unwrap()["id"], "x");
        assert_eq!(polls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_error_state_is_task_failed() {
        let mut vim = MockVim::new();
        vim.expect_property().returning(|_, _| {
            Ok(json!({
                "key": "task-9",
                "state": "error",
                "error": {"localizedMessage": "The disk is in use", "fault": {"_typeName": "ResourceInUse"}}
            }))
        });

        let task = ManagedObjectRef::new("Task", "task-9");
        match wait_for_task(&vim, &task, &policy()).await {
            Err(Error::TaskFailed { task, message }) => {
                assert_eq!(task, "task-9");
                assert_eq!(message, "The disk is in use");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out() {
        let mut vim = MockVim::new();
        vim.expect_property()
            .returning(|_, _| Ok(json!({"key": "task-3", "state": "running"})));

        let task = ManagedObjectRef::new("Task", "task-3");
        let result = wait_for_task(&vim, &task, &policy()).await;
        assert!(matches!(result, Err(Error::Timeout(id)) if id == "task-3"));
    }

    #[tokio::test]
    async fn test_run_task_requires_reference() {
        let vim = MockVim::new();
        let result = run_task(&vim, "DetachDisk_Task", serde_json::Value::Null, &policy()).await;
        assert!(matches!(result, Err(Error::Decode(_))));
    }
}
