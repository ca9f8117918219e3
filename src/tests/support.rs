//! Shared fixtures for the scenario tests: an in-process hypervisor with
//! scripted faults, fast policies and seeded store data.

use crate::{
    config::{OrchestratorConfig, PollPolicy, RetryPolicy},
    core::{
        domain::{
            error::{OrchestratorError, OrchestratorResult},
            model::{
                address::{Address, AddressKind},
                guest::{ComputeShape, Guest, GuestStatus},
                node::Node,
                vm::{
                    CloneOptions, ConfigParams, GuestRuntimeStatus, PowerAction, TaskState,
                    VmConfig,
                },
            },
            model::deployment::{Deployment, DeploymentStatus},
            port::{
                hypervisor::Hypervisor,
                repository::{DeploymentRepository, GuestRepository},
            },
            value_object::{GuestId, RootPassword, TaskHandle},
        },
        infrastructure::memory_store::MemoryStore,
    },
    provisioning::application::service::orchestrator::{Orchestrator, OrchestratorPorts},
};
use async_trait::async_trait;
use uuid::Uuid;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const GIB: u64 = 1 << 30;

type FaultFactory = fn() -> OrchestratorError;

#[derive(Default)]
struct FakeState {
    next_id: u32,
    /// vmid -> power state
    guests: BTreeMap<u32, String>,
    calls: Vec<String>,
    fail_next: HashMap<&'static str, VecDeque<OrchestratorError>>,
    fail_always: HashMap<&'static str, FaultFactory>,
    /// Operations whose next call takes effect remotely but reports a fault.
    fault_after_effect: HashSet<&'static str>,
    /// Task kind -> exit status reported by the task.
    task_failures: HashMap<&'static str, String>,
    configs: Vec<(u32, ConfigParams)>,
    net0: Option<String>,
}

/// A single-node Proxmox stand-in. Operations are named `next_id`,
/// `exists`, `clone`, `delete`, `config`, `resize`, `power`, `status`,
/// `read_config` and `task` for fault scripting.
pub struct FakeHypervisor {
    state: Mutex<FakeState>,
}

impl FakeHypervisor {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState {
                next_id: 100,
                ..FakeState::default()
            }),
        }
    }

    pub fn with_next_id(self, id: u32) -> Self {
        self.state.lock().unwrap().next_id = id;
        self
    }

    /// A guest that already exists on the cluster, in `power` state.
    pub fn with_guest(self, id: u32, power: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .guests
            .insert(id, power.to_string());
        self
    }

    pub fn with_net0(self, net0: &str) -> Self {
        self.state.lock().unwrap().net0 = Some(net0.to_string());
        self
    }

    pub fn fail_next(&self, operation: &'static str, error: OrchestratorError) {
        self.state
            .lock()
            .unwrap()
            .fail_next
            .entry(operation)
            .or_default()
            .push_back(error);
    }

    pub fn fail_always(&self, operation: &'static str, fault: FaultFactory) {
        self.state
            .lock()
            .unwrap()
            .fail_always
            .insert(operation, fault);
    }

    pub fn fault_after_effect(&self, operation: &'static str) {
        self.state
            .lock()
            .unwrap()
            .fault_after_effect
            .insert(operation);
    }

    pub fn fail_task(&self, kind: &'static str, exit_status: &str) {
        self.state
            .lock()
            .unwrap()
            .task_failures
            .insert(kind, exit_status.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    pub fn exists(&self, id: u32) -> bool {
        self.state.lock().unwrap().guests.contains_key(&id)
    }

    pub fn power_state(&self, id: u32) -> Option<String> {
        self.state.lock().unwrap().guests.get(&id).cloned()
    }

    pub fn set_power_state(&self, id: u32, power: &str) {
        self.state
            .lock()
            .unwrap()
            .guests
            .insert(id, power.to_string());
    }

    /// Every config push for `id`, oldest first.
    pub fn configs(&self, id: u32) -> Vec<ConfigParams> {
        self.state
            .lock()
            .unwrap()
            .configs
            .iter()
            .filter(|(vmid, _)| *vmid == id)
            .map(|(_, params)| params.clone())
            .collect()
    }

    /// The value most recently written for `key` on `id`.
    pub fn config_value(&self, id: u32, key: &str) -> Option<serde_json::Value> {
        self.configs(id)
            .iter()
            .rev()
            .find_map(|params| params.get(key).cloned())
    }

    /// Records the call and returns a scripted fault, if any.
    fn enter(&self, operation: &'static str, call: String) -> OrchestratorResult<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call);
        if let Some(fault) = state.fail_always.get(operation) {
            return Err(fault());
        }
        match state.fail_next.get_mut(operation).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Reports a fault for an operation that already took effect.
    fn leave(&self, operation: &'static str) -> OrchestratorResult<()> {
        if self
            .state
            .lock()
            .unwrap()
            .fault_after_effect
            .remove(operation)
        {
            return Err(OrchestratorError::TransientFault(format!(
                "{} response lost",
                operation
            )));
        }
        Ok(())
    }

    fn upid(node: &str, kind: &str, id: GuestId) -> TaskHandle {
        TaskHandle::new(format!(
            "UPID:{}:0003A1B2:0123ABCD:65F1C0DE:{}:{}:root@pam:",
            node, kind, id
        ))
        .unwrap()
    }
}

#[async_trait]
impl Hypervisor for FakeHypervisor {
    async fn next_guest_id(&self, _node: &str) -> OrchestratorResult<GuestId> {
        self.enter("next_id", "next_id".to_string())?;
        let state = self.state.lock().unwrap();
        let mut id = state.next_id;
        while state.guests.contains_key(&id) {
            id += 1;
        }
        Ok(GuestId::new(id)?)
    }

    async fn guest_exists(&self, _node: &str, id: GuestId) -> OrchestratorResult<bool> {
        self.enter("exists", format!("exists {}", id))?;
        Ok(self.exists(id.get()))
    }

    async fn clone_guest(
        &self,
        node: &str,
        template: GuestId,
        new_id: GuestId,
        options: &CloneOptions,
    ) -> OrchestratorResult<TaskHandle> {
        self.enter("clone", format!("clone {} -> {} {}", template, new_id, options.name))?;
        {
            let mut state = self.state.lock().unwrap();
            if state.guests.contains_key(&new_id.get()) {
                return Err(OrchestratorError::RemoteRejected(format!(
                    "VM {} already exists",
                    new_id
                )));
            }
            state.guests.insert(new_id.get(), "stopped".to_string());
        }
        self.leave("clone")?;
        Ok(Self::upid(node, "qmclone", template))
    }

    async fn delete_guest(&self, node: &str, id: GuestId) -> OrchestratorResult<Option<TaskHandle>> {
        self.enter("delete", format!("delete {}", id))?;
        if self.state.lock().unwrap().guests.remove(&id.get()).is_none() {
            return Err(OrchestratorError::RemoteRejected(format!(
                "VM {} does not exist",
                id
            )));
        }
        self.leave("delete")?;
        Ok(Some(Self::upid(node, "qmdestroy", id)))
    }

    async fn update_config(
        &self,
        node: &str,
        id: GuestId,
        params: &ConfigParams,
    ) -> OrchestratorResult<Option<TaskHandle>> {
        self.enter("config", format!("config {}", id))?;
        self.state
            .lock()
            .unwrap()
            .configs
            .push((id.get(), params.clone()));
        Ok(Some(Self::upid(node, "qmconfig", id)))
    }

    async fn resize_disk(
        &self,
        _node: &str,
        id: GuestId,
        disk: &str,
        size_bytes: u64,
    ) -> OrchestratorResult<()> {
        self.enter("resize", format!("resize {} {} {}", id, disk, size_bytes))
    }

    async fn power_action(
        &self,
        node: &str,
        id: GuestId,
        action: PowerAction,
    ) -> OrchestratorResult<TaskHandle> {
        self.enter("power", format!("power {} {}", action, id))?;
        {
            let mut state = self.state.lock().unwrap();
            let current = state.guests.get_mut(&id.get()).ok_or_else(|| {
                OrchestratorError::RemoteRejected(format!("VM {} does not exist", id))
            })?;
            if matches!(action, PowerAction::Stop | PowerAction::Shutdown | PowerAction::Kill)
                && current.as_str() == "stopped"
            {
                return Err(OrchestratorError::RemoteRejected(format!(
                    "VM {} not running",
                    id
                )));
            }
            *current = match action.resulting_status() {
                GuestStatus::Running => "running".to_string(),
                _ => "stopped".to_string(),
            };
        }
        self.leave("power")?;
        let kind = format!("qm{}", action.as_str());
        Ok(Self::upid(node, &kind, id))
    }

    async fn guest_status(&self, _node: &str, id: GuestId) -> OrchestratorResult<GuestRuntimeStatus> {
        self.enter("status", format!("status {}", id))?;
        let status = self.power_state(id.get()).ok_or_else(|| {
            OrchestratorError::RemoteRejected(format!("VM {} does not exist", id))
        })?;
        Ok(GuestRuntimeStatus {
            status,
            ..GuestRuntimeStatus::default()
        })
    }

    async fn guest_config(&self, _node: &str, id: GuestId) -> OrchestratorResult<VmConfig> {
        self.enter("read_config", format!("read_config {}", id))?;
        let mut config = VmConfig::default();
        if let Some(net0) = self.state.lock().unwrap().net0.clone() {
            config
                .extra
                .insert("net0".to_string(), serde_json::Value::String(net0));
        }
        Ok(config)
    }

    async fn task_status(&self, _node: &str, handle: &TaskHandle) -> OrchestratorResult<TaskState> {
        let kind = handle.kind().unwrap_or_default().to_string();
        self.enter("task", format!("task {}", kind))?;
        match self.state.lock().unwrap().task_failures.get(kind.as_str()) {
            Some(exit) => Ok(TaskState::Error(exit.clone())),
            None => Ok(TaskState::Ok),
        }
    }
}

/// Millisecond-scale waits so scenarios finish quickly.
pub fn fast_config() -> OrchestratorConfig {
    let poll = PollPolicy::new(Duration::from_millis(1), 5);
    let retry = RetryPolicy {
        max_attempts: 3,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(2),
        multiplier: 2.0,
        attempt_timeout: Duration::from_secs(2),
    };
    OrchestratorConfig {
        task_poll: poll,
        unlock_poll: poll,
        retry,
        power_retry: retry,
        ..OrchestratorConfig::default()
    }
}

pub fn node(id: u32) -> Node {
    Node {
        id,
        display_name: format!("Node {}", id),
        cluster_name: format!("pve{}", id),
        memory_bytes: 64 * GIB,
        disk_bytes: 1000 * GIB,
        vm_storage: Some("fast-ssd".to_string()),
    }
}

pub fn address(id: u64, ip: &str, gateway: &str, cidr: u8) -> Address {
    let address: std::net::IpAddr = ip.parse().unwrap();
    Address {
        id,
        kind: if address.is_ipv4() {
            AddressKind::Ipv4
        } else {
            AddressKind::Ipv6
        },
        address,
        cidr,
        gateway: gateway.parse().unwrap(),
        guest: None,
        is_primary: false,
    }
}

pub fn password() -> RootPassword {
    RootPassword::new("Tr0ub4dor&3-horse", None).unwrap()
}

pub fn template() -> GuestId {
    GuestId::new(9000).unwrap()
}

/// A guest record awaiting its first build: 2 cores, 2 GiB, 10 GiB.
pub async fn seed_guest(store: &MemoryStore, name: &str) -> Guest {
    let guest = Guest::new(
        name,
        ComputeShape {
            cores: 2,
            memory_bytes: 2 * GIB,
            disk_bytes: 10 * GIB,
        },
    );
    GuestRepository::save(store, &guest).await.unwrap();
    guest
}

/// A guest that was built earlier and is placed on `node` as `vmid`.
pub async fn seed_built_guest(store: &MemoryStore, name: &str, node: u32, vmid: u32) -> Guest {
    let mut guest = seed_guest(store, name).await;
    guest
        .assign_placement(node, GuestId::new(vmid).unwrap())
        .unwrap();
    guest.status = GuestStatus::Running;
    guest.is_installing = false;
    guest.installed_at = Some(chrono::Utc::now());
    GuestRepository::save(store, &guest).await.unwrap();
    guest
}

pub struct Harness {
    pub hypervisor: Arc<FakeHypervisor>,
    pub store: Arc<MemoryStore>,
    pub orchestrator: Arc<Orchestrator>,
}

/// An orchestrator over a fresh store containing node 1.
pub async fn harness(hypervisor: FakeHypervisor) -> Harness {
    harness_with(hypervisor, fast_config()).await
}

pub async fn harness_with(hypervisor: FakeHypervisor, config: OrchestratorConfig) -> Harness {
    let hypervisor = Arc::new(hypervisor);
    let store = Arc::new(MemoryStore::new());
    store.add_node(node(1)).await;
    let orchestrator = Orchestrator::new(
        OrchestratorPorts::from_store(hypervisor.clone(), store.clone()),
        config,
    )
    .unwrap();
    Harness {
        hypervisor,
        store,
        orchestrator: Arc::new(orchestrator),
    }
}

/// A [`MemoryStore`] whose writes can be switched off, to exercise
/// persistence failures half way through an operation.
pub struct RefusingStore {
    pub inner: Arc<MemoryStore>,
    /// Every guest save fails.
    pub refuse_guest_saves: bool,
    /// Saving a failed deployment fails.
    pub refuse_failed_deployments: bool,
}

impl RefusingStore {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            refuse_guest_saves: false,
            refuse_failed_deployments: false,
        }
    }
}

fn store_offline() -> OrchestratorError {
    OrchestratorError::Storage("store is read-only".to_string())
}

#[async_trait]
impl GuestRepository for RefusingStore {
    async fn get(&self, uuid: Uuid) -> OrchestratorResult<Guest> {
        GuestRepository::get(&*self.inner, uuid).await
    }

    async fn save(&self, guest: &Guest) -> OrchestratorResult<()> {
        if self.refuse_guest_saves {
            return Err(store_offline());
        }
        GuestRepository::save(&*self.inner, guest).await
    }

    async fn known_guest_ids(&self) -> OrchestratorResult<Vec<GuestId>> {
        self.inner.known_guest_ids().await
    }
}

#[async_trait]
impl DeploymentRepository for RefusingStore {
    async fn insert_if_idle(&self, deployment: Deployment) -> OrchestratorResult<Deployment> {
        self.inner.insert_if_idle(deployment).await
    }

    async fn save(&self, deployment: &Deployment) -> OrchestratorResult<()> {
        if self.refuse_failed_deployments && deployment.status == DeploymentStatus::Failed {
            return Err(store_offline());
        }
        DeploymentRepository::save(&*self.inner, deployment).await
    }

    async fn get(&self, uuid: Uuid) -> OrchestratorResult<Deployment> {
        DeploymentRepository::get(&*self.inner, uuid).await
    }

    async fn in_flight_for_guest(&self, guest: Uuid) -> OrchestratorResult<Option<Deployment>> {
        self.inner.in_flight_for_guest(guest).await
    }

    async fn in_flight(&self) -> OrchestratorResult<Vec<Deployment>> {
        self.inner.in_flight().await
    }

    async fn history_for_guest(&self, guest: Uuid) -> OrchestratorResult<Vec<Deployment>> {
        self.inner.history_for_guest(guest).await
    }
}
