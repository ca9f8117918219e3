//! Turns fire-and-forget hypervisor tasks into a completion signal.

use crate::{
    config::PollPolicy,
    core::domain::{
        error::{OrchestratorError, OrchestratorResult},
        model::vm::{GuestRuntimeStatus, TaskState},
        port::hypervisor::Hypervisor,
        value_object::{GuestId, TaskHandle},
    },
};
use std::sync::Arc;
use tracing::{debug, warn};

pub struct TaskPoller {
    hypervisor: Arc<dyn Hypervisor>,
}

impl TaskPoller {
    pub fn new(hypervisor: Arc<dyn Hypervisor>) -> Self {
        Self { hypervisor }
    }

    /// Single non-blocking status query.
    pub async fn check(&self, node: &str, handle: &TaskHandle) -> OrchestratorResult<TaskState> {
        self.hypervisor.task_status(node, handle).await
    }

    /// Polls until the task stops.
    ///
    /// An explicit task failure is `RemoteRejected` with the hypervisor's
    /// reason; running out of attempts is `Timeout`. A transient fault during
    /// a poll uses up one attempt.
    pub async fn await_completion(
        &self,
        node: &str,
        handle: &TaskHandle,
        policy: PollPolicy,
    ) -> OrchestratorResult<()> {
        for attempt in 1..=policy.max_attempts {
            match self.check(node, handle).await {
                Ok(TaskState::Ok) => {
                    debug!(node, task = %handle, attempt, "task finished");
                    return Ok(());
                }
                Ok(TaskState::Error(reason)) => {
                    return Err(OrchestratorError::RemoteRejected(reason));
                }
                Ok(TaskState::Running) => {
                    debug!(node, task = %handle, attempt, "task still running");
                }
                Err(err) if err.is_retryable() => {
                    warn!(node, task = %handle, attempt, error = %err, "task poll failed");
                }
                Err(err) => return Err(err),
            }
            if attempt < policy.max_attempts {
                tokio::time::sleep(policy.interval).await;
            }
        }
        Err(OrchestratorError::Timeout {
            operation: format!("task {}", handle.kind().unwrap_or("unknown")),
            attempts: policy.max_attempts,
        })
    }

    /// Polls the guest's `lock` field until it clears.
    pub async fn await_unlocked(
        &self,
        node: &str,
        id: GuestId,
        policy: PollPolicy,
    ) -> OrchestratorResult<GuestRuntimeStatus> {
        for attempt in 1..=policy.max_attempts {
            match self.hypervisor.guest_status(node, id).await {
                Ok(status) if !status.is_locked() => return Ok(status),
                Ok(status) => {
                    debug!(node, vmid = %id, attempt, lock = ?status.lock, "guest still locked");
                }
                Err(err) if err.is_retryable() => {
                    warn!(node, vmid = %id, attempt, error = %err, "status poll failed");
                }
                Err(err) => return Err(err),
            }
            if attempt < policy.max_attempts {
                tokio::time::sleep(policy.interval).await;
            }
        }
        Err(OrchestratorError::Timeout {
            operation: format!("unlock of guest {}", id),
            attempts: policy.max_attempts,
        })
    }
}
