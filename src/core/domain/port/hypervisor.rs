//! The hypervisor capability the orchestrator drives.

use crate::core::domain::error::OrchestratorResult;
use crate::core::domain::model::vm::{
    CloneOptions, ConfigParams, GuestRuntimeStatus, PowerAction, TaskState, VmConfig,
};
use crate::core::domain::value_object::{GuestId, TaskHandle};
use async_trait::async_trait;

/// Commands against a hypervisor cluster. Every call names its target node.
///
/// Calls are not idempotent on the remote side: callers must not re-issue a
/// clone or delete for a guest that may still be mid-operation.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Hypervisor: Send + Sync {
    /// The cluster's suggestion for the next free guest id.
    async fn next_guest_id(&self, node: &str) -> OrchestratorResult<GuestId>;

    /// Whether any guest (VM or container) in the cluster owns `id`.
    async fn guest_exists(&self, node: &str, id: GuestId) -> OrchestratorResult<bool>;

    async fn clone_guest(
        &self,
        node: &str,
        template: GuestId,
        new_id: GuestId,
        options: &CloneOptions,
    ) -> OrchestratorResult<TaskHandle>;

    /// Deletes the guest and purges its disks.
    async fn delete_guest(&self, node: &str, id: GuestId) -> OrchestratorResult<Option<TaskHandle>>;

    async fn update_config(
        &self,
        node: &str,
        id: GuestId,
        params: &ConfigParams,
    ) -> OrchestratorResult<Option<TaskHandle>>;

    async fn resize_disk(
        &self,
        node: &str,
        id: GuestId,
        disk: &str,
        size_bytes: u64,
    ) -> OrchestratorResult<()>;

    async fn power_action(
        &self,
        node: &str,
        id: GuestId,
        action: PowerAction,
    ) -> OrchestratorResult<TaskHandle>;

    async fn guest_status(&self, node: &str, id: GuestId) -> OrchestratorResult<GuestRuntimeStatus>;

    async fn guest_config(&self, node: &str, id: GuestId) -> OrchestratorResult<VmConfig>;

    async fn task_status(&self, node: &str, handle: &TaskHandle) -> OrchestratorResult<TaskState>;
}
