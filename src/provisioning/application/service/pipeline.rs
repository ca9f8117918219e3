//! Collaborators and remote operations shared by the build and reinstall
//! pipelines.

use super::{
    deployment_tracker::DeploymentTracker, resource_allocator::ResourceAllocator,
    retry_driver::RetryDriver, task_poller::TaskPoller,
};
use crate::{
    config::OrchestratorConfig,
    core::domain::{
        error::{OrchestratorError, OrchestratorResult},
        model::{
            address::Address,
            deployment::{Deployment, StepDefinition, StepStatus},
            guest::{Guest, GuestStatus},
            node::Node,
            vm::{CloneOptions, ConfigParams, NetworkInterface, PowerAction},
        },
        port::{
            hypervisor::Hypervisor,
            repository::{AddressPool, DeploymentRepository, GuestRepository, PlacementStore},
        },
        value_object::{GuestId, RootPassword},
    },
};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub struct PipelineContext {
    pub(crate) config: Arc<OrchestratorConfig>,
    pub(crate) hypervisor: Arc<dyn Hypervisor>,
    pub(crate) guests: Arc<dyn GuestRepository>,
    pub(crate) placements: Arc<dyn PlacementStore>,
    pub(crate) addresses: Arc<dyn AddressPool>,
    pub(crate) tracker: DeploymentTracker,
    pub(crate) poller: TaskPoller,
    pub(crate) retry: RetryDriver,
    pub(crate) allocator: ResourceAllocator,
}

impl PipelineContext {
    pub fn new(
        config: Arc<OrchestratorConfig>,
        hypervisor: Arc<dyn Hypervisor>,
        guests: Arc<dyn GuestRepository>,
        deployments: Arc<dyn DeploymentRepository>,
        placements: Arc<dyn PlacementStore>,
        addresses: Arc<dyn AddressPool>,
    ) -> Self {
        let allocator = ResourceAllocator::new(
            Arc::clone(&hypervisor),
            Arc::clone(&placements),
            Arc::clone(&guests),
            config.id_probe_limit,
            config.min_guest_id,
        );
        Self {
            tracker: DeploymentTracker::new(deployments),
            poller: TaskPoller::new(Arc::clone(&hypervisor)),
            retry: RetryDriver::new(config.retry),
            allocator,
            config,
            hypervisor,
            guests,
            placements,
            addresses,
        }
    }

    /// Re-reads the guest, applies `apply` and stores the result.
    pub(crate) async fn update_guest<F>(&self, uuid: Uuid, apply: F) -> OrchestratorResult<Guest>
    where
        F: FnOnce(&mut Guest),
    {
        let mut guest = self.guests.get(uuid).await?;
        apply(&mut guest);
        self.guests.save(&guest).await?;
        Ok(guest)
    }

    /// Clones `template` into `vmid` and waits for the copy to settle.
    ///
    /// A dispatch retried after a transient fault first checks whether the
    /// earlier attempt already created the guest, and if so does not clone
    /// again. The task handle lives on the guest while it is being polled.
    pub(crate) async fn clone_template(
        &self,
        guest: &Guest,
        node: &Node,
        template: GuestId,
        vmid: GuestId,
        refuse_existing: bool,
    ) -> OrchestratorResult<()> {
        let hypervisor = &self.hypervisor;
        let node_name = node.cluster_name.as_str();
        if refuse_existing && hypervisor.guest_exists(node_name, vmid).await? {
            return Err(OrchestratorError::Conflict(format!(
                "guest id {} already exists on the cluster",
                vmid
            )));
        }

        let options = CloneOptions {
            name: guest.name.clone(),
            storage: self.config.full_clone.then(|| {
                node.vm_storage
                    .clone()
                    .unwrap_or_else(|| self.config.default_storage.clone())
            }),
            full: self.config.full_clone,
        };
        let options = &options;
        let dispatched = self
            .retry
            .run("clone", move |attempt| async move {
                if attempt > 1 && hypervisor.guest_exists(node_name, vmid).await? {
                    warn!(node = node_name, %vmid, attempt, "clone was accepted by an earlier attempt");
                    return Ok(None);
                }
                hypervisor
                    .clone_guest(node_name, template, vmid, options)
                    .await
                    .map(Some)
            })
            .await?;

        if let Some(handle) = dispatched {
            info!(guest = %guest.uuid, %vmid, task = %handle, "clone dispatched");
            let task = handle.clone();
            self.update_guest(guest.uuid, move |g| g.installation_task = Some(task))
                .await?;
            let outcome = self
                .poller
                .await_completion(node_name, &handle, self.config.task_poll)
                .await;
            // A timed out task may still be running; keep its handle around.
            if !matches!(outcome, Err(OrchestratorError::Timeout { .. })) {
                self.update_guest(guest.uuid, |g| g.installation_task = None)
                    .await?;
            }
            outcome?;
        }
        self.poller
            .await_unlocked(node_name, vmid, self.config.unlock_poll)
            .await?;
        Ok(())
    }

    /// Pushes the compute shape, and the `net0` rate limit when the guest has one.
    pub(crate) async fn configure(
        &self,
        guest: &Guest,
        node: &str,
        vmid: GuestId,
    ) -> OrchestratorResult<()> {
        let mut params = ConfigParams::new()
            .name(&guest.name)
            .cores(guest.shape.cores)
            .memory_bytes(guest.shape.memory_bytes)
            .agent(true);

        if let Some(limit) = guest.bandwidth.limit_mbit {
            let hypervisor = &self.hypervisor;
            let current = self
                .retry
                .run("read config", move |_| hypervisor.guest_config(node, vmid))
                .await?;
            let interface = match current.network_interface(0) {
                Some(parsed) => parsed?,
                None => NetworkInterface::new(self.config.default_bridge.clone()),
            };
            params = params.network(0, &interface.with_rate_mbit(limit));
        }

        self.apply_config("configure", node, vmid, &params).await
    }

    pub(crate) async fn resize_disk(
        &self,
        node: &str,
        vmid: GuestId,
        size_bytes: u64,
    ) -> OrchestratorResult<()> {
        self.hypervisor
            .resize_disk(node, vmid, &self.config.primary_disk, size_bytes)
            .await
    }

    /// Writes the cloud-init user, password and, if known, the primary address.
    pub(crate) async fn write_credentials(
        &self,
        node: &str,
        vmid: GuestId,
        user: &str,
        password: &RootPassword,
        primary: Option<&Address>,
    ) -> OrchestratorResult<()> {
        let mut params = ConfigParams::new()
            .cloud_init_user(user)
            .cloud_init_password(password.as_str());
        if let Some(address) = primary {
            params = params.ipconfig(0, address.ipconfig());
        }
        self.apply_config("apply credentials", node, vmid, &params)
            .await
    }

    pub(crate) async fn apply_config(
        &self,
        operation: &str,
        node: &str,
        vmid: GuestId,
        params: &ConfigParams,
    ) -> OrchestratorResult<()> {
        let hypervisor = &self.hypervisor;
        let task = self
            .retry
            .run(operation, move |_| hypervisor.update_config(node, vmid, params))
            .await?;
        if let Some(handle) = task {
            self.poller
                .await_completion(node, &handle, self.config.task_poll)
                .await?;
        }
        Ok(())
    }

    /// Sends a power verb and waits for its task.
    pub(crate) async fn power(
        &self,
        node: &str,
        vmid: GuestId,
        action: PowerAction,
    ) -> OrchestratorResult<()> {
        let hypervisor = &self.hypervisor;
        let handle = self
            .retry
            .run(action.as_str(), move |_| hypervisor.power_action(node, vmid, action))
            .await?;
        self.poller
            .await_completion(node, &handle, self.config.task_poll)
            .await
    }

    /// Waits for the lock to clear, deletes the guest with its disks and waits
    /// for the removal. A retried dispatch that finds the guest gone is done.
    pub(crate) async fn delete_guest(&self, node: &str, vmid: GuestId) -> OrchestratorResult<()> {
        self.poller
            .await_unlocked(node, vmid, self.config.unlock_poll)
            .await?;
        let hypervisor = &self.hypervisor;
        let task = self
            .retry
            .run("delete", move |attempt| async move {
                if attempt > 1 && !hypervisor.guest_exists(node, vmid).await? {
                    debug!(node, %vmid, "guest already gone");
                    return Ok(None);
                }
                hypervisor.delete_guest(node, vmid).await
            })
            .await?;
        if let Some(handle) = task {
            self.poller
                .await_completion(node, &handle, self.config.task_poll)
                .await?;
        }
        Ok(())
    }
}

/// Guest status to record for a failed deployment: the status declared by the
/// failed step, or `fallback` when the failure happened outside any step.
pub(crate) fn failure_status(
    deployment: &Deployment,
    steps: &[StepDefinition],
    fallback: GuestStatus,
) -> GuestStatus {
    deployment
        .steps
        .iter()
        .position(|step| step.status == StepStatus::Failed)
        .and_then(|index| steps.get(index))
        .map(|definition| definition.failure_status)
        .unwrap_or(fallback)
}
