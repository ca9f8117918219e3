//! In-process implementation of every persistence port.
//!
//! All state sits behind one writer lock, which is what makes
//! `insert_if_idle` atomic. The whole state can be written to and read back
//! from a JSON snapshot.

use crate::core::domain::{
    error::{OrchestratorError, OrchestratorResult},
    model::{
        address::Address,
        deployment::Deployment,
        guest::Guest,
        node::{Node, NodeAllocation},
    },
    port::repository::{AddressPool, DeploymentRepository, GuestRepository, PlacementStore},
    value_object::GuestId,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreState {
    guests: BTreeMap<Uuid, Guest>,
    deployments: BTreeMap<u64, Deployment>,
    next_deployment_id: u64,
    nodes: BTreeMap<u32, Node>,
    addresses: BTreeMap<u64, Address>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<StoreState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_node(&self, node: Node) {
        self.state.write().await.nodes.insert(node.id, node);
    }

    /// Adds an unclaimed (or pre-claimed) lease to the pool.
    pub async fn add_address(&self, address: Address) {
        self.state.write().await.addresses.insert(address.id, address);
    }

    /// Every address currently linked to `guest`.
    pub async fn addresses_for(&self, guest: Uuid) -> Vec<Address> {
        self.state
            .read()
            .await
            .addresses
            .values()
            .filter(|a| a.guest == Some(guest))
            .cloned()
            .collect()
    }

    /// Writes the full state to `path` as JSON. The file is replaced atomically.
    pub async fn save_snapshot(&self, path: impl AsRef<Path>) -> OrchestratorResult<()> {
        let path = path.as_ref();
        let json = {
            let state = self.state.read().await;
            serde_json::to_vec_pretty(&*state)?
        };
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, path).await?;
        info!(path = %path.display(), "snapshot saved");
        Ok(())
    }

    /// Loads a store from a snapshot written by [`save_snapshot`](Self::save_snapshot).
    pub async fn load_snapshot(path: impl AsRef<Path>) -> OrchestratorResult<Self> {
        let path = path.as_ref();
        let raw = tokio::fs::read(path).await?;
        let state: StoreState = serde_json::from_slice(&raw)?;
        info!(
            path = %path.display(),
            guests = state.guests.len(),
            deployments = state.deployments.len(),
            "snapshot loaded"
        );
        Ok(Self {
            state: RwLock::new(state),
        })
    }
}

#[async_trait]
impl GuestRepository for MemoryStore {
    async fn get(&self, uuid: Uuid) -> OrchestratorResult<Guest> {
        self.state
            .read()
            .await
            .guests
            .get(&uuid)
            .cloned()
            .ok_or_else(|| OrchestratorError::NotFound(format!("guest {}", uuid)))
    }

    async fn save(&self, guest: &Guest) -> OrchestratorResult<()> {
        self.state
            .write()
            .await
            .guests
            .insert(guest.uuid, guest.clone());
        Ok(())
    }

    async fn known_guest_ids(&self) -> OrchestratorResult<Vec<GuestId>> {
        Ok(self
            .state
            .read()
            .await
            .guests
            .values()
            .filter_map(|g| g.vmid)
            .collect())
    }
}

#[async_trait]
impl DeploymentRepository for MemoryStore {
    async fn insert_if_idle(&self, mut deployment: Deployment) -> OrchestratorResult<Deployment> {
        let mut state = self.state.write().await;
        if let Some(existing) = state
            .deployments
            .values()
            .find(|d| d.guest == deployment.guest && d.is_in_flight())
        {
            return Err(OrchestratorError::Conflict(format!(
                "guest {} already has deployment {} in flight",
                deployment.guest, existing.uuid
            )));
        }
        state.next_deployment_id += 1;
        deployment.id = state.next_deployment_id;
        state.deployments.insert(deployment.id, deployment.clone());
        debug!(deployment = %deployment.uuid, id = deployment.id, "deployment inserted");
        Ok(deployment)
    }

    async fn save(&self, deployment: &Deployment) -> OrchestratorResult<()> {
        let mut state = self.state.write().await;
        let stored = state.deployments.get_mut(&deployment.id).ok_or_else(|| {
            OrchestratorError::NotFound(format!("deployment {}", deployment.uuid))
        })?;
        if !stored.is_in_flight() && *stored != *deployment {
            return Err(OrchestratorError::InvalidTransition(format!(
                "deployment {} is terminal",
                deployment.uuid
            )));
        }
        *stored = deployment.clone();
        Ok(())
    }

    async fn get(&self, uuid: Uuid) -> OrchestratorResult<Deployment> {
        self.state
            .read()
            .await
            .deployments
            .values()
            .find(|d| d.uuid == uuid)
            .cloned()
            .ok_or_else(|| OrchestratorError::NotFound(format!("deployment {}", uuid)))
    }

    async fn in_flight_for_guest(&self, guest: Uuid) -> OrchestratorResult<Option<Deployment>> {
        Ok(self
            .state
            .read()
            .await
            .deployments
            .values()
            .find(|d| d.guest == guest && d.is_in_flight())
            .cloned())
    }

    async fn in_flight(&self) -> OrchestratorResult<Vec<Deployment>> {
        Ok(self
            .state
            .read()
            .await
            .deployments
            .values()
            .filter(|d| d.is_in_flight())
            .cloned()
            .collect())
    }

    async fn history_for_guest(&self, guest: Uuid) -> OrchestratorResult<Vec<Deployment>> {
        Ok(self
            .state
            .read()
            .await
            .deployments
            .values()
            .filter(|d| d.guest == guest)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl PlacementStore for MemoryStore {
    async fn node_allocations(&self) -> OrchestratorResult<Vec<NodeAllocation>> {
        let state = self.state.read().await;
        Ok(state
            .nodes
            .values()
            .map(|node| {
                let placed = state.guests.values().filter(|g| g.node == Some(node.id));
                let (memory, disk, count) = placed.fold((0u64, 0u64, 0usize), |acc, g| {
                    (
                        acc.0.saturating_add(g.shape.memory_bytes),
                        acc.1.saturating_add(g.shape.disk_bytes),
                        acc.2 + 1,
                    )
                });
                NodeAllocation {
                    node: node.clone(),
                    allocated_memory_bytes: memory,
                    allocated_disk_bytes: disk,
                    guest_count: count,
                }
            })
            .collect())
    }

    async fn node(&self, id: u32) -> OrchestratorResult<Node> {
        self.state
            .read()
            .await
            .nodes
            .get(&id)
            .cloned()
            .ok_or_else(|| OrchestratorError::NotFound(format!("node {}", id)))
    }
}

#[async_trait]
impl AddressPool for MemoryStore {
    async fn claim(
        &self,
        address_id: u64,
        guest: Uuid,
        is_primary: bool,
    ) -> OrchestratorResult<Address> {
        let mut state = self.state.write().await;
        let address = state
            .addresses
            .get(&address_id)
            .ok_or_else(|| OrchestratorError::NotFound(format!("address {}", address_id)))?;
        if let Some(owner) = address.guest.filter(|owner| *owner != guest) {
            return Err(OrchestratorError::Conflict(format!(
                "address {} is held by guest {}",
                address.address, owner
            )));
        }
        if is_primary {
            for other in state
                .addresses
                .values_mut()
                .filter(|a| a.guest == Some(guest) && a.id != address_id)
            {
                other.is_primary = false;
            }
        }
        let address = state
            .addresses
            .get_mut(&address_id)
            .ok_or_else(|| OrchestratorError::NotFound(format!("address {}", address_id)))?;
        address.guest = Some(guest);
        address.is_primary = is_primary;
        Ok(address.clone())
    }

    async fn primary_address(&self, guest: Uuid) -> OrchestratorResult<Option<Address>> {
        Ok(self
            .state
            .read()
            .await
            .addresses
            .values()
            .find(|a| a.guest == Some(guest) && a.is_primary)
            .cloned())
    }
}
