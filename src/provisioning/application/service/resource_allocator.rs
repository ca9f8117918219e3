//! Node placement and guest id reservation.

use crate::core::domain::{
    error::{OrchestratorError, OrchestratorResult},
    model::{guest::Guest, node::Node},
    port::{
        hypervisor::Hypervisor,
        repository::{GuestRepository, PlacementStore},
    },
    value_object::{GuestId, MIN_GUEST_ID},
};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub struct ResourceAllocator {
    hypervisor: Arc<dyn Hypervisor>,
    placements: Arc<dyn PlacementStore>,
    guests: Arc<dyn GuestRepository>,
    id_probe_limit: u32,
    min_guest_id: u32,
    /// Serializes reserve-and-record so two builds never take the same id.
    reservation: Mutex<()>,
}

impl ResourceAllocator {
    pub fn new(
        hypervisor: Arc<dyn Hypervisor>,
        placements: Arc<dyn PlacementStore>,
        guests: Arc<dyn GuestRepository>,
        id_probe_limit: u32,
        min_guest_id: u32,
    ) -> Self {
        Self {
            hypervisor,
            placements,
            guests,
            id_probe_limit,
            min_guest_id: min_guest_id.max(MIN_GUEST_ID),
            reservation: Mutex::new(()),
        }
    }

    /// Least-loaded node (by guest count, ties to the lowest id) whose free
    /// capacity covers the request.
    pub async fn find_placement(
        &self,
        memory_bytes: u64,
        disk_bytes: u64,
        exclude_nodes: &[u32],
    ) -> OrchestratorResult<Node> {
        let allocations = self.placements.node_allocations().await?;
        allocations
            .into_iter()
            .filter(|a| !exclude_nodes.contains(&a.node.id))
            .filter(|a| a.fits(memory_bytes, disk_bytes))
            .min_by_key(|a| (a.guest_count, a.node.id))
            .map(|a| a.node)
            .ok_or_else(|| {
                OrchestratorError::InsufficientResources(format!(
                    "no node has {} bytes of memory and {} bytes of disk free",
                    memory_bytes, disk_bytes
                ))
            })
    }

    /// A guest id that neither a known guest nor the cluster is using.
    ///
    /// Starts from the cluster's suggestion, or from the highest known id + 1
    /// when the cluster cannot be asked, and probes upward.
    pub async fn reserve_id(&self, node: &Node) -> OrchestratorResult<GuestId> {
        let known: HashSet<u32> = self
            .guests
            .known_guest_ids()
            .await?
            .into_iter()
            .map(|id| id.get())
            .collect();

        let start = match self.hypervisor.next_guest_id(&node.cluster_name).await {
            Ok(id) => id.get().max(self.min_guest_id),
            Err(err) => {
                let fallback = known
                    .iter()
                    .max()
                    .map(|max| max.saturating_add(1))
                    .unwrap_or(self.min_guest_id)
                    .max(self.min_guest_id);
                warn!(node = %node.cluster_name, error = %err, fallback, "next id unavailable, probing from known ids");
                fallback
            }
        };

        let mut candidate = start;
        for _ in 0..self.id_probe_limit {
            if !known.contains(&candidate) {
                let id = GuestId::new(candidate)?;
                if !self.hypervisor.guest_exists(&node.cluster_name, id).await? {
                    debug!(node = %node.cluster_name, vmid = candidate, "guest id reserved");
                    return Ok(id);
                }
            }
            candidate = candidate.checked_add(1).ok_or(OrchestratorError::NoUniqueIdAvailable {
                start,
                probes: self.id_probe_limit,
            })?;
        }
        Err(OrchestratorError::NoUniqueIdAvailable {
            start,
            probes: self.id_probe_limit,
        })
    }

    /// Places the guest and records node and id on it. A guest that already
    /// has both keeps them.
    pub async fn allocate(
        &self,
        guest: &mut Guest,
        exclude_nodes: &[u32],
    ) -> OrchestratorResult<(Node, GuestId)> {
        if let (Some(node_id), Some(vmid)) = (guest.node, guest.vmid) {
            let node = self.placements.node(node_id).await?;
            debug!(guest = %guest.uuid, %vmid, "reusing existing placement");
            return Ok((node, vmid));
        }

        let _reservation = self.reservation.lock().await;
        let node = self
            .find_placement(guest.shape.memory_bytes, guest.shape.disk_bytes, exclude_nodes)
            .await?;
        let vmid = match guest.vmid {
            Some(vmid) => vmid,
            None => self.reserve_id(&node).await?,
        };
        guest.assign_placement(node.id, vmid)?;
        self.guests.save(guest).await?;
        info!(guest = %guest.uuid, node = %node.cluster_name, %vmid, "placement assigned");
        Ok((node, vmid))
    }
}
