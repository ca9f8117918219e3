//! Direct guest mutations that run outside a deployment: power verbs,
//! password changes and status sync.

use super::{retry_driver::RetryDriver, task_poller::TaskPoller};
use crate::{
    config::OrchestratorConfig,
    core::domain::{
        error::{OrchestratorError, OrchestratorResult},
        model::{
            guest::{Guest, GuestStatus},
            vm::{ConfigParams, PowerAction},
        },
        port::{
            hypervisor::Hypervisor,
            repository::{DeploymentRepository, GuestRepository, PlacementStore},
        },
        value_object::RootPassword,
    },
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};
use uuid::Uuid;

/// One lock per guest, taken without waiting.
#[derive(Default)]
pub struct GuestLocks {
    locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl GuestLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes the guest's lock or fails with `Conflict` when it is held.
    pub async fn try_acquire(&self, guest: Uuid) -> OrchestratorResult<OwnedMutexGuard<()>> {
        let lock = {
            let mut locks = self.locks.lock().await;
            Arc::clone(locks.entry(guest).or_default())
        };
        lock.try_lock_owned().map_err(|_| {
            OrchestratorError::Conflict(format!("another operation is running on guest {}", guest))
        })
    }
}

pub struct PowerService {
    config: Arc<OrchestratorConfig>,
    hypervisor: Arc<dyn Hypervisor>,
    guests: Arc<dyn GuestRepository>,
    deployments: Arc<dyn DeploymentRepository>,
    placements: Arc<dyn PlacementStore>,
    poller: TaskPoller,
    locks: Arc<GuestLocks>,
}

impl PowerService {
    pub fn new(
        config: Arc<OrchestratorConfig>,
        hypervisor: Arc<dyn Hypervisor>,
        guests: Arc<dyn GuestRepository>,
        deployments: Arc<dyn DeploymentRepository>,
        placements: Arc<dyn PlacementStore>,
        locks: Arc<GuestLocks>,
    ) -> Self {
        Self {
            poller: TaskPoller::new(Arc::clone(&hypervisor)),
            config,
            hypervisor,
            guests,
            deployments,
            placements,
            locks,
        }
    }

    /// Loads a guest that may be mutated right now: not suspended, placed,
    /// and with no deployment in flight. Returns it with its node name.
    async fn mutable_guest(&self, uuid: Uuid) -> OrchestratorResult<(Guest, String)> {
        let guest = self.guests.get(uuid).await?;
        guest.ensure_not_suspended()?;
        let (node_id, _) = guest.placement()?;
        if let Some(deployment) = self.deployments.in_flight_for_guest(uuid).await? {
            return Err(OrchestratorError::Conflict(format!(
                "deployment {} is in flight for guest {}",
                deployment.uuid, uuid
            )));
        }
        let node = self.placements.node(node_id).await?;
        Ok((guest, node.cluster_name))
    }

    /// Sends `action` to the guest and records the resulting status.
    pub async fn power(&self, uuid: Uuid, action: PowerAction) -> OrchestratorResult<Guest> {
        let _lock = self.locks.try_acquire(uuid).await?;
        let (mut guest, node) = self.mutable_guest(uuid).await?;
        let (_, vmid) = guest.placement()?;

        let hypervisor = &self.hypervisor;
        let poller = &self.poller;
        let task_poll = self.config.task_poll;
        let node_name = node.as_str();
        RetryDriver::new(self.config.power_retry)
            .run(action.as_str(), move |_| async move {
                let handle = hypervisor.power_action(node_name, vmid, action).await?;
                poller.await_completion(node_name, &handle, task_poll).await
            })
            .await?;

        guest.status = action.resulting_status();
        guest.last_hypervisor_status = Some(
            match guest.status {
                GuestStatus::Running => "running",
                _ => "stopped",
            }
            .to_string(),
        );
        self.guests.save(&guest).await?;
        info!(guest = %uuid, %vmid, %action, status = %guest.status, "power action applied");
        Ok(guest)
    }

    /// Replaces the cloud-init root password.
    pub async fn update_password(&self, uuid: Uuid, password: &RootPassword) -> OrchestratorResult<()> {
        let _lock = self.locks.try_acquire(uuid).await?;
        let (guest, node) = self.mutable_guest(uuid).await?;
        let (_, vmid) = guest.placement()?;

        let params = ConfigParams::new()
            .cloud_init_user("root")
            .cloud_init_password(password.as_str());
        let hypervisor = &self.hypervisor;
        let node_name = node.as_str();
        let params = &params;
        let task = RetryDriver::new(self.config.retry)
            .run("update password", move |_| hypervisor.update_config(node_name, vmid, params))
            .await?;
        if let Some(handle) = task {
            self.poller
                .await_completion(node_name, &handle, self.config.task_poll)
                .await?;
        }
        info!(guest = %uuid, %vmid, "root password updated");
        Ok(())
    }

    /// Refreshes the last-known hypervisor status. The lifecycle status only
    /// follows it for an idle, fully installed guest.
    pub async fn sync_status(&self, uuid: Uuid) -> OrchestratorResult<Guest> {
        let mut guest = self.guests.get(uuid).await?;
        let (node_id, vmid) = guest.placement()?;
        let node = self.placements.node(node_id).await?;
        let runtime = self.hypervisor.guest_status(&node.cluster_name, vmid).await?;

        guest.last_hypervisor_status = Some(runtime.status.clone());
        // install_failed and error are terminal and only a new deployment clears them.
        let idle = !guest.is_installing
            && matches!(
                guest.status,
                GuestStatus::Installed | GuestStatus::Running | GuestStatus::Stopped
            )
            && self.deployments.in_flight_for_guest(uuid).await?.is_none();
        match GuestStatus::from_hypervisor(&runtime.status) {
            Some(status) if idle && status != guest.status => {
                info!(guest = %uuid, %vmid, from = %guest.status, to = %status, "status adopted from hypervisor");
                guest.status = status;
            }
            _ => debug!(guest = %uuid, %vmid, hypervisor = %runtime.status, "status recorded"),
        }
        self.guests.save(&guest).await?;
        Ok(guest)
    }
}
