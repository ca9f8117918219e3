//! Domain models for QEMU virtual machine operations.
//!
//! This module defines the structures exchanged with the hypervisor when
//! cloning, configuring, powering and polling guests.

use crate::core::domain::error::ValidationError;
use crate::core::domain::model::guest::GuestStatus;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Accepts a number encoded either as JSON number or as string (Proxmox
/// returns both depending on version and endpoint).
fn lenient_u64<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_u64()
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom("expected unsigned integer")),
        Some(Value::String(s)) => s.parse().map(Some).map_err(serde::de::Error::custom),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected number, got {}",
            other
        ))),
    }
}

/// Live runtime status from `/nodes/{node}/qemu/{vmid}/status/current`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct GuestRuntimeStatus {
    /// Current VM status (e.g., "running", "stopped").
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Set while a clone, migration, backup or similar holds the guest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock: Option<String>,
    /// QEMU process status (e.g., "running", "paused").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qmpstatus: Option<String>,
    /// Uptime in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uptime: Option<u64>,
    /// CPU usage (0.0 to 1.0 per core).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mem: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maxmem: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maxdisk: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub netin: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub netout: Option<u64>,
}

impl GuestRuntimeStatus {
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.lock.as_deref().is_some_and(|lock| !lock.is_empty())
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.status == "running"
    }
}

/// Raw task status from `/nodes/{node}/tasks/{upid}/status`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TaskStatus {
    /// `running` or `stopped`.
    pub status: String,
    /// Present once the task stopped: `OK`, `WARNINGS: n`, or an error message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exitstatus: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upid: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub task_type: Option<String>,
}

impl TaskStatus {
    /// Collapses the raw status into a terminal/non-terminal state.
    #[must_use]
    pub fn state(&self) -> TaskState {
        if self.status == "running" {
            return TaskState::Running;
        }
        match self.exitstatus.as_deref() {
            Some("OK") => TaskState::Ok,
            Some(exit) if exit.starts_with("WARNINGS") => TaskState::Ok,
            Some(exit) => TaskState::Error(exit.to_string()),
            None => TaskState::Error(format!("task {} without exit status", self.status)),
        }
    }
}

/// State of a hypervisor task as seen by the poller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskState {
    Running,
    Ok,
    /// Carries the hypervisor's reason verbatim.
    Error(String),
}

impl TaskState {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskState::Running)
    }
}

/// Power verbs a guest can receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerAction {
    Start,
    /// Hard stop.
    Stop,
    /// ACPI shutdown.
    Shutdown,
    Reboot,
    /// Hard stop that also ignores a held lock.
    Kill,
    Reset,
}

impl PowerAction {
    /// Path segment below `/nodes/{node}/qemu/{vmid}/`.
    #[must_use]
    pub fn endpoint(&self) -> &'static str {
        match self {
            PowerAction::Start => "status/start",
            PowerAction::Stop | PowerAction::Kill => "status/stop",
            PowerAction::Shutdown => "status/shutdown",
            PowerAction::Reboot => "status/reboot",
            PowerAction::Reset => "status/reset",
        }
    }

    /// Request body the verb is sent with.
    #[must_use]
    pub fn params(&self) -> Value {
        match self {
            PowerAction::Kill => serde_json::json!({ "skiplock": 1 }),
            _ => serde_json::json!({}),
        }
    }

    /// Lifecycle status the guest ends up in once the action succeeded.
    #[must_use]
    pub fn resulting_status(&self) -> GuestStatus {
        match self {
            PowerAction::Start | PowerAction::Reboot | PowerAction::Reset => GuestStatus::Running,
            PowerAction::Stop | PowerAction::Shutdown | PowerAction::Kill => GuestStatus::Stopped,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            PowerAction::Start => "start",
            PowerAction::Stop => "stop",
            PowerAction::Shutdown => "shutdown",
            PowerAction::Reboot => "reboot",
            PowerAction::Kill => "kill",
            PowerAction::Reset => "reset",
        }
    }
}

impl fmt::Display for PowerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Options for `POST /nodes/{node}/qemu/{template}/clone`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloneOptions {
    /// Name of the new guest.
    pub name: String,
    /// Target storage for a full clone.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<String>,
    /// Full clone instead of a linked clone.
    pub full: bool,
}

impl CloneOptions {
    /// Request body including the new guest id.
    #[must_use]
    pub fn to_params(&self, new_id: u32) -> Value {
        let mut params = serde_json::json!({
            "newid": new_id,
            "name": self.name,
            "full": u8::from(self.full),
        });
        if let (Some(storage), Some(map)) = (&self.storage, params.as_object_mut()) {
            map.insert("storage".to_string(), Value::String(storage.clone()));
        }
        params
    }
}

/// Key/value set pushed through `PUT|POST /nodes/{node}/qemu/{vmid}/config`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigParams(BTreeMap<String, Value>);

impl ConfigParams {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn set(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn cores(self, cores: u32) -> Self {
        self.set("cores", cores)
    }

    /// Memory from bytes; Proxmox takes MiB.
    #[must_use]
    pub fn memory_bytes(self, bytes: u64) -> Self {
        self.set("memory", bytes / (1024 * 1024))
    }

    #[must_use]
    pub fn name(self, name: &str) -> Self {
        self.set("name", name)
    }

    #[must_use]
    pub fn agent(self, enabled: bool) -> Self {
        self.set("agent", u8::from(enabled))
    }

    #[must_use]
    pub fn cloud_init_user(self, user: &str) -> Self {
        self.set("ciuser", user)
    }

    #[must_use]
    pub fn cloud_init_password(self, password: &str) -> Self {
        self.set("cipassword", password)
    }

    #[must_use]
    pub fn ipconfig(self, index: u8, value: String) -> Self {
        self.set(format!("ipconfig{}", index), value)
    }

    #[must_use]
    pub fn network(self, index: u8, interface: &NetworkInterface) -> Self {
        self.set(format!("net{}", index), interface.to_string())
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// VM configuration from `/nodes/{node}/qemu/{vmid}/config`.
///
/// Only the keys the orchestrator reasons about are typed; disks, network
/// devices and everything else stay in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct VmConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "lenient_u64", skip_serializing_if = "Option::is_none")]
    pub cores: Option<u64>,
    /// Memory in MiB.
    #[serde(default, deserialize_with = "lenient_u64", skip_serializing_if = "Option::is_none")]
    pub memory: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ciuser: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipconfig0: Option<String>,
    /// Proxmox configuration digest (for updates).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl VmConfig {
    /// Parses the `net{index}` entry, if present.
    pub fn network_interface(&self, index: u8) -> Option<Result<NetworkInterface, ValidationError>> {
        self.extra
            .get(&format!("net{}", index))
            .and_then(Value::as_str)
            .map(str::parse)
    }
}

/// A `net{n}` device string: `model=mac,bridge=..,firewall=..,rate=..,tag=..`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkInterface {
    pub model: String,
    pub mac_address: Option<String>,
    pub bridge: String,
    pub firewall: Option<bool>,
    /// Rate limit in MB/s; `None` means unlimited.
    pub rate: Option<String>,
    pub vlan_tag: Option<u16>,
    /// Keys not modelled above, preserved in their original order.
    pub other: Vec<(String, String)>,
}

const NIC_MODELS: [&str; 4] = ["virtio", "e1000", "rtl8139", "vmxnet3"];

impl NetworkInterface {
    #[must_use]
    pub fn new(bridge: impl Into<String>) -> Self {
        Self {
            model: "virtio".to_string(),
            mac_address: None,
            bridge: bridge.into(),
            firewall: None,
            rate: None,
            vlan_tag: None,
            other: Vec::new(),
        }
    }

    /// Sets the rate limit in Mbit/s; zero clears it.
    #[must_use]
    pub fn with_rate_mbit(mut self, mbit: u64) -> Self {
        self.rate = if mbit == 0 {
            None
        } else {
            // Proxmox rate is MB/s
            let megabytes = mbit as f64 / 8.0;
            Some(format_rate(megabytes))
        };
        self
    }
}

fn format_rate(value: f64) -> String {
    let rendered = format!("{:.3}", value);
    rendered
        .trim_end_matches('0')
        .trim_end_matches('.')
        .to_string()
}

impl FromStr for NetworkInterface {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut interface = NetworkInterface::new(String::new());
        let mut bridge = None;
        for part in s.split(',').filter(|p| !p.is_empty()) {
            let Some((key, value)) = part.split_once('=') else {
                interface.other.push((part.to_string(), String::new()));
                continue;
            };
            match key {
                model if NIC_MODELS.contains(&model) => {
                    interface.model = model.to_string();
                    interface.mac_address = Some(value.to_string());
                }
                "model" => interface.model = value.to_string(),
                "macaddr" => interface.mac_address = Some(value.to_string()),
                "bridge" => bridge = Some(value.to_string()),
                "firewall" => interface.firewall = Some(value == "1"),
                "rate" => interface.rate = Some(value.to_string()),
                "tag" => {
                    let tag = value.parse().map_err(|_| {
                        ValidationError::Format(format!("Invalid VLAN tag '{}'", value))
                    })?;
                    interface.vlan_tag = Some(tag);
                }
                _ => interface.other.push((key.to_string(), value.to_string())),
            }
        }
        interface.bridge = bridge.ok_or_else(|| ValidationError::Field {
            field: "bridge".to_string(),
            message: format!("Network device '{}' has no bridge", s),
        })?;
        Ok(interface)
    }
}

impl fmt::Display for NetworkInterface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.mac_address {
            Some(mac) => write!(f, "{}={}", self.model, mac)?,
            None => write!(f, "model={}", self.model)?,
        }
        write!(f, ",bridge={}", self.bridge)?;
        if let Some(firewall) = self.firewall {
            write!(f, ",firewall={}", u8::from(firewall))?;
        }
        if let Some(rate) = &self.rate {
            write!(f, ",rate={}", rate)?;
        }
        if let Some(tag) = self.vlan_tag {
            write!(f, ",tag={}", tag)?;
        }
        for (key, value) in &self.other {
            if value.is_empty() {
                write!(f, ",{}", key)?;
            } else {
                write!(f, ",{}={}", key, value)?;
            }
        }
        Ok(())
    }
}
