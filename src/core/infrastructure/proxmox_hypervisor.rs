//! [`Hypervisor`] implementation over the Proxmox VE REST API.

use crate::{
    config::ClientConfig,
    core::{
        domain::{
            error::{OrchestratorError, OrchestratorResult},
            model::{
                cluster_resource::ClusterResource,
                node_connection::NodeConnection,
                vm::{
                    CloneOptions, ConfigParams, GuestRuntimeStatus, PowerAction, TaskState,
                    TaskStatus, VmConfig,
                },
            },
            port::hypervisor::Hypervisor,
            value_object::{GuestId, TaskHandle},
        },
        infrastructure::api_client::ApiClient,
    },
};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

const GIB: u64 = 1024 * 1024 * 1024;
const MIB: u64 = 1024 * 1024;

/// Routes each call to the API client of its node.
///
/// Nodes without their own connection go through the default connection
/// (any cluster member can proxy requests for the others). Clients are
/// created lazily and cached, so authentication is per node and shared by
/// all concurrent callers.
pub struct ProxmoxHypervisor {
    config: ClientConfig,
    default_connection: Option<NodeConnection>,
    connections: HashMap<String, NodeConnection>,
    clients: RwLock<HashMap<String, Arc<ApiClient>>>,
}

impl ProxmoxHypervisor {
    /// A hypervisor whose every node is reached through `connection`.
    pub fn new(connection: NodeConnection, config: ClientConfig) -> Self {
        Self {
            config,
            default_connection: Some(connection),
            connections: HashMap::new(),
            clients: RwLock::new(HashMap::new()),
        }
    }

    /// Adds a dedicated connection for `node`.
    pub fn with_node(mut self, node: impl Into<String>, connection: NodeConnection) -> Self {
        self.connections.insert(node.into(), connection);
        self
    }

    async fn client_for(&self, node: &str) -> OrchestratorResult<Arc<ApiClient>> {
        let key = if self.connections.contains_key(node) {
            node
        } else {
            ""
        };
        if let Some(client) = self.clients.read().await.get(key) {
            return Ok(Arc::clone(client));
        }

        let mut clients = self.clients.write().await;
        if let Some(client) = clients.get(key) {
            return Ok(Arc::clone(client));
        }
        let connection = self
            .connections
            .get(node)
            .or(self.default_connection.as_ref())
            .ok_or_else(|| OrchestratorError::NotFound(format!("no connection for node {}", node)))?;
        debug!(node, host = %connection.endpoint().host(), "creating api client");
        let client = Arc::new(ApiClient::new(connection.clone(), self.config.clone())?);
        clients.insert(key.to_string(), Arc::clone(&client));
        Ok(client)
    }
}

fn parse_task_handle(upid: String) -> OrchestratorResult<TaskHandle> {
    TaskHandle::new(upid).map_err(|e| {
        OrchestratorError::RemoteRejected(format!("hypervisor returned an invalid task id: {}", e))
    })
}

/// Proxmox accepts sizes with a unit suffix.
fn disk_size(size_bytes: u64) -> String {
    if size_bytes % GIB == 0 {
        format!("{}G", size_bytes / GIB)
    } else {
        format!("{}M", size_bytes.div_ceil(MIB))
    }
}

#[async_trait]
impl Hypervisor for ProxmoxHypervisor {
    async fn next_guest_id(&self, node: &str) -> OrchestratorResult<GuestId> {
        let client = self.client_for(node).await?;
        // Returned as a string by most versions
        let raw: Value = client.get("cluster/nextid").await?;
        let id = match &raw {
            Value::String(s) => s.parse::<u32>().ok(),
            Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
            _ => None,
        }
        .ok_or_else(|| OrchestratorError::RemoteRejected(format!("unexpected next id {}", raw)))?;
        Ok(GuestId::new(id)?)
    }

    async fn guest_exists(&self, node: &str, id: GuestId) -> OrchestratorResult<bool> {
        let client = self.client_for(node).await?;
        let resources: Vec<ClusterResource> = client.get("cluster/resources?type=vm").await?;
        Ok(resources.iter().any(|r| r.vmid() == Some(id.get())))
    }

    async fn clone_guest(
        &self,
        node: &str,
        template: GuestId,
        new_id: GuestId,
        options: &CloneOptions,
    ) -> OrchestratorResult<TaskHandle> {
        let client = self.client_for(node).await?;
        let path = format!("nodes/{}/qemu/{}/clone", node, template);
        let upid: String = client.post(&path, &options.to_params(new_id.get())).await?;
        info!(node, %template, vmid = %new_id, %upid, "clone dispatched");
        parse_task_handle(upid)
    }

    async fn delete_guest(&self, node: &str, id: GuestId) -> OrchestratorResult<Option<TaskHandle>> {
        let client = self.client_for(node).await?;
        let path = format!(
            "nodes/{}/qemu/{}?purge=1&destroy-unreferenced-disks=1",
            node, id
        );
        let upid: Option<String> = client.delete(&path).await?;
        info!(node, vmid = %id, "delete dispatched");
        upid.map(parse_task_handle).transpose()
    }

    async fn update_config(
        &self,
        node: &str,
        id: GuestId,
        params: &ConfigParams,
    ) -> OrchestratorResult<Option<TaskHandle>> {
        let client = self.client_for(node).await?;
        let path = format!("nodes/{}/qemu/{}/config", node, id);
        let upid: Option<String> = client.post(&path, params).await?;
        upid.map(parse_task_handle).transpose()
    }

    async fn resize_disk(
        &self,
        node: &str,
        id: GuestId,
        disk: &str,
        size_bytes: u64,
    ) -> OrchestratorResult<()> {
        let client = self.client_for(node).await?;
        let path = format!("nodes/{}/qemu/{}/resize", node, id);
        let body = serde_json::json!({ "disk": disk, "size": disk_size(size_bytes) });
        let _: Option<Value> = client.put(&path, &body).await?;
        Ok(())
    }

    async fn power_action(
        &self,
        node: &str,
        id: GuestId,
        action: PowerAction,
    ) -> OrchestratorResult<TaskHandle> {
        let client = self.client_for(node).await?;
        let path = format!("nodes/{}/qemu/{}/{}", node, id, action.endpoint());
        let upid: String = client.post(&path, &action.params()).await?;
        info!(node, vmid = %id, %action, "power action dispatched");
        parse_task_handle(upid)
    }

    async fn guest_status(&self, node: &str, id: GuestId) -> OrchestratorResult<GuestRuntimeStatus> {
        let client = self.client_for(node).await?;
        client
            .get(&format!("nodes/{}/qemu/{}/status/current", node, id))
            .await
    }

    async fn guest_config(&self, node: &str, id: GuestId) -> OrchestratorResult<VmConfig> {
        let client = self.client_for(node).await?;
        client.get(&format!("nodes/{}/qemu/{}/config", node, id)).await
    }

    async fn task_status(&self, node: &str, handle: &TaskHandle) -> OrchestratorResult<TaskState> {
        let client = self.client_for(node).await?;
        let status: TaskStatus = client
            .get(&format!("nodes/{}/tasks/{}/status", node, handle))
            .await?;
        Ok(status.state())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disk_size_suffix() {
        assert_eq!(disk_size(10 * GIB), "10G");
        assert_eq!(disk_size(10 * GIB + 1), "10241M");
        assert_eq!(disk_size(512 * MIB), "512M");
    }
}
