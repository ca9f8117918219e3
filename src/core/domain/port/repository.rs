//! Persistence ports. The bundled implementation lives in
//! `core::infrastructure::memory_store`.

use crate::core::domain::error::OrchestratorResult;
use crate::core::domain::model::address::Address;
use crate::core::domain::model::deployment::Deployment;
use crate::core::domain::model::guest::Guest;
use crate::core::domain::model::node::{Node, NodeAllocation};
use crate::core::domain::value_object::GuestId;
use async_trait::async_trait;
use uuid::Uuid;

#[async_trait]
pub trait GuestRepository: Send + Sync {
    /// Fails with `NotFound` for an unknown guest.
    async fn get(&self, uuid: Uuid) -> OrchestratorResult<Guest>;

    /// Inserts or replaces the guest record.
    async fn save(&self, guest: &Guest) -> OrchestratorResult<()>;

    /// Every guest id already assigned.
    async fn known_guest_ids(&self) -> OrchestratorResult<Vec<GuestId>>;
}

#[async_trait]
pub trait DeploymentRepository: Send + Sync {
    /// Inserts the deployment unless its guest already has one in flight,
    /// in which case `Conflict` is returned. The check and the insert are
    /// one atomic operation. Assigns the internal id.
    async fn insert_if_idle(&self, deployment: Deployment) -> OrchestratorResult<Deployment>;

    /// Replaces an existing record.
    async fn save(&self, deployment: &Deployment) -> OrchestratorResult<()>;

    async fn get(&self, uuid: Uuid) -> OrchestratorResult<Deployment>;

    /// The pending or running deployment of a guest, if any.
    async fn in_flight_for_guest(&self, guest: Uuid) -> OrchestratorResult<Option<Deployment>>;

    /// All pending or running deployments.
    async fn in_flight(&self) -> OrchestratorResult<Vec<Deployment>>;

    /// Every deployment of a guest, oldest first.
    async fn history_for_guest(&self, guest: Uuid) -> OrchestratorResult<Vec<Deployment>>;
}

/// Node inventory with what is already placed on each node.
#[async_trait]
pub trait PlacementStore: Send + Sync {
    async fn node_allocations(&self) -> OrchestratorResult<Vec<NodeAllocation>>;

    async fn node(&self, id: u32) -> OrchestratorResult<Node>;
}

/// IPAM capability: leases are owned by the pool, the orchestrator only claims.
#[async_trait]
pub trait AddressPool: Send + Sync {
    /// Links the lease to the guest. Fails with `Conflict` if another guest holds it.
    async fn claim(&self, address_id: u64, guest: Uuid, is_primary: bool)
    -> OrchestratorResult<Address>;

    async fn primary_address(&self, guest: Uuid) -> OrchestratorResult<Option<Address>>;
}
