//! VM lifecycle orchestration on Proxmox VE.
//!
//! The crate drives the long-running, failure-prone remote work of building,
//! reinstalling and operating guests: every build or reinstall is a
//! [`Deployment`] made of ordered steps whose progress is persisted as it
//! happens, hypervisor tasks are polled to completion, and transient faults
//! are retried under a bounded policy.
//!
//! # Examples
//!
//! ```no_run
//! use leeca_orchestrator::{
//!     BuildRequest, ClientConfig, GuestId, MemoryStore, NodeConnection, Orchestrator,
//!     OrchestratorConfig, OrchestratorPorts, OrchestratorResult, ProxmoxHypervisor,
//!     RootPassword,
//! };
//! use std::sync::Arc;
//! use uuid::Uuid;
//!
//! #[tokio::main]
//! async fn main() -> OrchestratorResult<()> {
//!     let connection = NodeConnection::builder()
//!         .host("proxmox.example.com")
//!         .credentials("automation", "secret", "pve")
//!         .build()?;
//!     let hypervisor = Arc::new(ProxmoxHypervisor::new(connection, ClientConfig::default()));
//!     let store = Arc::new(MemoryStore::new());
//!     let orchestrator = Orchestrator::new(
//!         OrchestratorPorts::from_store(hypervisor, store),
//!         OrchestratorConfig::default(),
//!     )?;
//!
//!     # let guest = Uuid::new_v4();
//!     let request = BuildRequest::new(
//!         guest,
//!         GuestId::new(9000)?,
//!         RootPassword::new("correct-horse-battery", None)?,
//!     );
//!     orchestrator.build(request).await?.finished().await;
//!     Ok(())
//! }
//! ```

mod auth;
pub mod config;
mod core;
mod provisioning;

pub use crate::{
    config::{ClientConfig, OrchestratorConfig, PollPolicy, RateLimitConfig, RetryPolicy},
    core::{
        domain::{
            error::{OrchestratorError, OrchestratorResult, ValidationError},
            model::{
                address::{Address, AddressKind},
                deployment::{
                    Deployment, DeploymentKind, DeploymentStatus, DeploymentStep, StepStatus,
                },
                guest::{Bandwidth, ComputeShape, Guest, GuestStatus},
                node::{Node, NodeAllocation},
                node_connection::{NodeConnection, NodeConnectionBuilder},
                vm::{
                    CloneOptions, ConfigParams, GuestRuntimeStatus, NetworkInterface, PowerAction,
                    TaskState, VmConfig,
                },
            },
            port::{
                hypervisor::Hypervisor,
                repository::{AddressPool, DeploymentRepository, GuestRepository, PlacementStore},
            },
            value_object::{GuestId, RootPassword, TaskHandle},
        },
        infrastructure::{memory_store::MemoryStore, proxmox_hypervisor::ProxmoxHypervisor},
    },
    provisioning::application::{
        request::{build_request::BuildRequest, reinstall_request::ReinstallRequest},
        service::orchestrator::{DeploymentHandle, Orchestrator, OrchestratorPorts},
    },
};

#[cfg(test)]
mod tests;
