use crate::core::domain::value_object::{GuestId, RootPassword};
use uuid::Uuid;

/// Input for a first-time build of an existing guest record.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub guest: Uuid,
    /// Template to clone from; must live on (or be reachable from) the placement node.
    pub template: GuestId,
    pub root_password: RootPassword,
    /// Address pool leases to claim; the first becomes primary.
    pub address_ids: Vec<u64>,
    /// Nodes the allocator must not pick.
    pub exclude_nodes: Vec<u32>,
    /// Cloud-init user, `root` when unset.
    pub cloud_init_user: Option<String>,
}

impl BuildRequest {
    pub fn new(guest: Uuid, template: GuestId, root_password: RootPassword) -> Self {
        Self {
            guest,
            template,
            root_password,
            address_ids: Vec::new(),
            exclude_nodes: Vec::new(),
            cloud_init_user: None,
        }
    }

    pub fn with_addresses(mut self, address_ids: impl IntoIterator<Item = u64>) -> Self {
        self.address_ids = address_ids.into_iter().collect();
        self
    }

    pub fn excluding_nodes(mut self, nodes: impl IntoIterator<Item = u32>) -> Self {
        self.exclude_nodes = nodes.into_iter().collect();
        self
    }

    pub fn cloud_init_user(&self) -> &str {
        self.cloud_init_user.as_deref().unwrap_or("root")
    }
}
