//! Domain models for cluster-wide resources.
//!
//! The `/cluster/resources?type=vm` endpoint lists every guest in the cluster,
//! QEMU VMs and LXC containers alike. Both occupy the shared VMID space, which
//! is what the existence check is about.

use serde::{Deserialize, Serialize};

/// A resource discovered in the Proxmox cluster, discriminated by `type`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClusterResource {
    /// A QEMU virtual machine.
    Qemu(GuestResource),
    /// An LXC container.
    Lxc(GuestResource),
    /// Nodes, storages, pools and anything newer.
    #[serde(other)]
    Other,
}

impl ClusterResource {
    /// The VMID this resource occupies, if it is a guest.
    #[must_use]
    pub fn vmid(&self) -> Option<u32> {
        match self {
            ClusterResource::Qemu(guest) | ClusterResource::Lxc(guest) => Some(guest.vmid),
            ClusterResource::Other => None,
        }
    }
}

/// Fields shared by QEMU and LXC entries.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct GuestResource {
    /// The guest identifier (unique per cluster).
    pub vmid: u32,
    /// The Proxmox node where this guest resides.
    pub node: String,
    /// Unique resource identifier (e.g., `qemu/100`).
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Resource status (e.g., `running`, `stopped`).
    #[serde(default)]
    pub status: Option<String>,
    /// Set while the guest is a template.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<u8>,
}
