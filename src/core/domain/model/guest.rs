//! The managed virtual machine and its lifecycle status.

use crate::core::domain::error::{OrchestratorError, OrchestratorResult};
use crate::core::domain::value_object::{GuestId, TaskHandle};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Lifecycle status of a guest, owned by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuestStatus {
    Installing,
    Installed,
    Running,
    Stopped,
    Reinstalling,
    InstallFailed,
    Error,
}

impl GuestStatus {
    /// Display string, identical to the serialized form.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            GuestStatus::Installing => "installing",
            GuestStatus::Installed => "installed",
            GuestStatus::Running => "running",
            GuestStatus::Stopped => "stopped",
            GuestStatus::Reinstalling => "reinstalling",
            GuestStatus::InstallFailed => "install_failed",
            GuestStatus::Error => "error",
        }
    }

    /// Maps a hypervisor-reported power state onto a lifecycle status.
    #[must_use]
    pub fn from_hypervisor(status: &str) -> Option<Self> {
        match status {
            "running" => Some(GuestStatus::Running),
            "stopped" => Some(GuestStatus::Stopped),
            _ => None,
        }
    }
}

impl fmt::Display for GuestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Requested compute resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputeShape {
    pub cores: u32,
    pub memory_bytes: u64,
    pub disk_bytes: u64,
}

/// Network bandwidth accounting for a guest.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bandwidth {
    /// Rate limit in Mbit/s pushed onto `net0`; `None` is unlimited.
    pub limit_mbit: Option<u64>,
    pub usage_bytes: u64,
}

/// A guest VM as tracked by the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Guest {
    /// Stable external identifier used for routing.
    pub uuid: Uuid,
    /// Assigned once by the allocator.
    pub vmid: Option<GuestId>,
    /// Placement node id; assigned together with `vmid`.
    pub node: Option<u32>,
    pub name: String,
    pub shape: ComputeShape,
    pub status: GuestStatus,
    pub is_suspended: bool,
    pub is_installing: bool,
    pub installed_at: Option<DateTime<Utc>>,
    pub last_hypervisor_status: Option<String>,
    pub installation_task: Option<TaskHandle>,
    pub bandwidth: Bandwidth,
}

impl Guest {
    /// A new guest awaiting its first build.
    pub fn new(name: impl Into<String>, shape: ComputeShape) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            vmid: None,
            node: None,
            name: name.into(),
            shape,
            status: GuestStatus::Installing,
            is_suspended: false,
            is_installing: true,
            installed_at: None,
            last_hypervisor_status: None,
            installation_task: None,
            bandwidth: Bandwidth::default(),
        }
    }

    /// Records the placement. A guest keeps its first VMID for life.
    pub fn assign_placement(&mut self, node: u32, vmid: GuestId) -> OrchestratorResult<()> {
        match self.vmid {
            Some(existing) if existing != vmid => Err(OrchestratorError::Conflict(format!(
                "guest {} already owns vmid {}",
                self.uuid, existing
            ))),
            _ => {
                self.vmid = Some(vmid);
                self.node = Some(node);
                Ok(())
            }
        }
    }

    /// Boundary gate for power, network and credential mutations.
    pub fn ensure_not_suspended(&self) -> OrchestratorResult<()> {
        if self.is_suspended {
            return Err(OrchestratorError::Suspended(self.uuid));
        }
        Ok(())
    }

    /// Placement as a pair, or `NotFound` for a guest that was never built.
    pub fn placement(&self) -> OrchestratorResult<(u32, GuestId)> {
        match (self.node, self.vmid) {
            (Some(node), Some(vmid)) => Ok((node, vmid)),
            _ => Err(OrchestratorError::NotFound(format!(
                "guest {} has no placement",
                self.uuid
            ))),
        }
    }
}
