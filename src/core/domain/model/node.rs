use serde::{Deserialize, Serialize};

/// A hypervisor node guests can be placed on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: u32,
    pub display_name: String,
    /// Node name as used in API paths (`/nodes/{cluster_name}/...`).
    pub cluster_name: String,
    pub memory_bytes: u64,
    pub disk_bytes: u64,
    /// Storage pool new disks land on; falls back to the configured default.
    pub vm_storage: Option<String>,
}

/// A node together with what is already placed on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeAllocation {
    pub node: Node,
    pub allocated_memory_bytes: u64,
    pub allocated_disk_bytes: u64,
    pub guest_count: usize,
}

impl NodeAllocation {
    #[must_use]
    pub fn free_memory_bytes(&self) -> u64 {
        self.node
            .memory_bytes
            .saturating_sub(self.allocated_memory_bytes)
    }

    #[must_use]
    pub fn free_disk_bytes(&self) -> u64 {
        self.node.disk_bytes.saturating_sub(self.allocated_disk_bytes)
    }

    /// Whether the remaining capacity covers both requirements.
    #[must_use]
    pub fn fits(&self, memory_bytes: u64, disk_bytes: u64) -> bool {
        self.free_memory_bytes() >= memory_bytes && self.free_disk_bytes() >= disk_bytes
    }
}
