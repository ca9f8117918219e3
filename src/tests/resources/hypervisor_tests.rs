use crate::{
    config::ClientConfig,
    core::{
        domain::{
            error::OrchestratorError,
            model::{
                node_connection::NodeConnection,
                vm::{CloneOptions, ConfigParams, PowerAction, TaskState},
            },
            port::hypervisor::Hypervisor,
            value_object::{ApiCredentials, ApiEndpoint, GuestId, TaskHandle},
        },
        infrastructure::proxmox_hypervisor::ProxmoxHypervisor,
    },
};
use url::Url;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_json, header, method, path, query_param},
};

const CLONE_UPID: &str = "UPID:pve1:0003A1B2:0123ABCD:65F1C0DE:qmclone:9000:root@pam:";

fn create_test_connection(server_url: &str) -> NodeConnection {
    NodeConnection::new(
        ApiEndpoint::from_url_unchecked(Url::parse(server_url).unwrap()),
        ApiCredentials::new("automation", "testpass", "pve").unwrap(),
        true,
    )
}

/// A hypervisor against `mock_server` whose login always succeeds.
async fn create_hypervisor(mock_server: &MockServer) -> ProxmoxHypervisor {
    Mock::given(method("POST"))
        .and(path("/api2/json/access/ticket"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": {
                "ticket": "PVE:automation@pve:4EEC61E2::sig",
                "CSRFPreventionToken": "4EEC61E2:token",
                "username": "automation@pve"
            }
        })))
        .mount(mock_server)
        .await;
    ProxmoxHypervisor::new(
        create_test_connection(&mock_server.uri()),
        ClientConfig::default(),
    )
}

fn vmid(id: u32) -> GuestId {
    GuestId::new(id).unwrap()
}

#[tokio::test]
async fn test_next_guest_id_accepts_string_and_number() {
    let mock_server = MockServer::start().await;
    let hypervisor = create_hypervisor(&mock_server).await;

    Mock::given(method("GET"))
        .and(path("/api2/json/cluster/nextid"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"data": "150"})))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api2/json/cluster/nextid"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"data": 151})))
        .mount(&mock_server)
        .await;

    assert_eq!(hypervisor.next_guest_id("pve1").await.unwrap(), vmid(150));
    assert_eq!(hypervisor.next_guest_id("pve1").await.unwrap(), vmid(151));
}

#[tokio::test]
async fn test_guest_exists_covers_vms_and_containers() {
    let mock_server = MockServer::start().await;
    let hypervisor = create_hypervisor(&mock_server).await;

    Mock::given(method("GET"))
        .and(path("/api2/json/cluster/resources"))
        .and(query_param("type", "vm"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": [
                {"type": "qemu", "vmid": 150, "node": "pve1", "id": "qemu/150", "status": "running"},
                {"type": "lxc", "vmid": 151, "node": "pve2", "id": "lxc/151", "status": "stopped"},
                {"type": "qemu", "vmid": 9000, "node": "pve1", "id": "qemu/9000", "template": 1}
            ]
        })))
        .mount(&mock_server)
        .await;

    assert!(hypervisor.guest_exists("pve1", vmid(150)).await.unwrap());
    assert!(hypervisor.guest_exists("pve1", vmid(151)).await.unwrap());
    assert!(!hypervisor.guest_exists("pve1", vmid(152)).await.unwrap());
}

#[tokio::test]
async fn test_clone_sends_options_and_parses_upid() {
    let mock_server = MockServer::start().await;
    let hypervisor = create_hypervisor(&mock_server).await;

    Mock::given(method("POST"))
        .and(path("/api2/json/nodes/pve1/qemu/9000/clone"))
        .and(header("CSRFPreventionToken", "4EEC61E2:token"))
        .and(body_json(serde_json::json!({
            "newid": 150,
            "name": "web-1",
            "full": 1,
            "storage": "local-lvm"
        })))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"data": CLONE_UPID})),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let options = CloneOptions {
        name: "web-1".to_string(),
        storage: Some("local-lvm".to_string()),
        full: true,
    };
    let handle = hypervisor
        .clone_guest("pve1", vmid(9000), vmid(150), &options)
        .await
        .unwrap();
    assert_eq!(handle.kind(), Some("qmclone"));
    assert_eq!(handle.node(), Some("pve1"));
}

#[tokio::test]
async fn test_task_status_mapping() {
    let mock_server = MockServer::start().await;
    let hypervisor = create_hypervisor(&mock_server).await;
    let handle = TaskHandle::new(CLONE_UPID).unwrap();
    let task_path = format!("/api2/json/nodes/pve1/tasks/{}/status", CLONE_UPID);

    let responses = [
        serde_json::json!({"status": "running", "upid": CLONE_UPID, "type": "qmclone"}),
        serde_json::json!({"status": "stopped", "exitstatus": "WARNINGS: 1"}),
        serde_json::json!({"status": "stopped", "exitstatus": "clone failed: no space left"}),
    ];
    for body in responses {
        Mock::given(method("GET"))
            .and(path(task_path.as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"data": body})))
            .up_to_n_times(1)
            .mount(&mock_server)
            .await;
    }

    assert_eq!(hypervisor.task_status("pve1", &handle).await.unwrap(), TaskState::Running);
    assert_eq!(hypervisor.task_status("pve1", &handle).await.unwrap(), TaskState::Ok);
    assert_eq!(
        hypervisor.task_status("pve1", &handle).await.unwrap(),
        TaskState::Error("clone failed: no space left".to_string())
    );
}

#[tokio::test]
async fn test_delete_purges_disks() {
    let mock_server = MockServer::start().await;
    let hypervisor = create_hypervisor(&mock_server).await;

    Mock::given(method("DELETE"))
        .and(path("/api2/json/nodes/pve1/qemu/150"))
        .and(query_param("purge", "1"))
        .and(query_param("destroy-unreferenced-disks", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": "UPID:pve1:0003A1B3:0123ABCE:65F1C0DF:qmdestroy:150:automation@pve:"
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let handle = hypervisor.delete_guest("pve1", vmid(150)).await.unwrap().unwrap();
    assert_eq!(handle.kind(), Some("qmdestroy"));
    assert_eq!(handle.object_id(), Some("150"));
}

#[tokio::test]
async fn test_config_and_resize_requests() {
    let mock_server = MockServer::start().await;
    let hypervisor = create_hypervisor(&mock_server).await;

    Mock::given(method("POST"))
        .and(path("/api2/json/nodes/pve1/qemu/150/config"))
        .and(body_json(serde_json::json!({"cores": 2, "memory": 2048, "ciuser": "root"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"data": null})))
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/api2/json/nodes/pve1/qemu/150/resize"))
        .and(body_json(serde_json::json!({"disk": "scsi0", "size": "10G"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"data": null})))
        .expect(1)
        .mount(&mock_server)
        .await;

    let params = ConfigParams::new()
        .cores(2)
        .memory_bytes(2 << 30)
        .cloud_init_user("root");
    let task = hypervisor.update_config("pve1", vmid(150), &params).await.unwrap();
    assert!(task.is_none());
    hypervisor
        .resize_disk("pve1", vmid(150), "scsi0", 10 << 30)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_kill_skips_lock() {
    let mock_server = MockServer::start().await;
    let hypervisor = create_hypervisor(&mock_server).await;

    Mock::given(method("POST"))
        .and(path("/api2/json/nodes/pve1/qemu/150/status/stop"))
        .and(body_json(serde_json::json!({"skiplock": 1})))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": "UPID:pve1:0003A1B4:0123ABCF:65F1C0E0:qmstop:150:automation@pve:"
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let handle = hypervisor
        .power_action("pve1", vmid(150), PowerAction::Kill)
        .await
        .unwrap();
    assert_eq!(handle.kind(), Some("qmstop"));
}

#[tokio::test]
async fn test_guest_status_and_config_parsing() {
    let mock_server = MockServer::start().await;
    let hypervisor = create_hypervisor(&mock_server).await;

    Mock::given(method("GET"))
        .and(path("/api2/json/nodes/pve1/qemu/150/status/current"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": {
                "status": "stopped",
                "lock": "clone",
                "name": "web-1",
                "maxmem": 2147483648_u64,
                "uptime": 0
            }
        })))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api2/json/nodes/pve1/qemu/150/config"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": {
                "name": "web-1",
                "cores": 2,
                "memory": "2048",
                "net0": "virtio=BC:24:11:2E:4F:10,bridge=vmbr0,firewall=1",
                "scsi0": "local-lvm:vm-150-disk-0,size=10G",
                "digest": "9c2b1f"
            }
        })))
        .mount(&mock_server)
        .await;

    let status = hypervisor.guest_status("pve1", vmid(150)).await.unwrap();
    assert!(status.is_locked());
    assert!(!status.is_running());

    let config = hypervisor.guest_config("pve1", vmid(150)).await.unwrap();
    assert_eq!(config.memory, Some(2048));
    let net0 = config.network_interface(0).unwrap().unwrap();
    assert_eq!(net0.bridge, "vmbr0");
    assert_eq!(net0.mac_address.as_deref(), Some("BC:24:11:2E:4F:10"));
}

#[tokio::test]
async fn test_unavailable_node_is_transient() {
    let mock_server = MockServer::start().await;
    let hypervisor = create_hypervisor(&mock_server).await;

    Mock::given(method("POST"))
        .and(path("/api2/json/nodes/pve2/qemu/150/status/start"))
        .respond_with(ResponseTemplate::new(596).set_body_string("Connection timed out"))
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api2/json/nodes/pve1/qemu/150/status/start"))
        .respond_with(
            ResponseTemplate::new(500).set_body_string("VM 150 already running"),
        )
        .mount(&mock_server)
        .await;

    let result = hypervisor
        .power_action("pve2", vmid(150), PowerAction::Start)
        .await;
    assert!(matches!(result, Err(ref e) if e.is_retryable()));

    let result = hypervisor
        .power_action("pve1", vmid(150), PowerAction::Start)
        .await;
    assert!(matches!(result, Err(OrchestratorError::RemoteRejected(ref m)) if m.contains("already running")));
}

#[tokio::test]
async fn test_dedicated_node_connection_is_used() {
    let default_server = MockServer::start().await;
    let dedicated_server = MockServer::start().await;
    let hypervisor = create_hypervisor(&default_server).await;
    create_hypervisor(&dedicated_server).await;
    let hypervisor = hypervisor.with_node("pve2", create_test_connection(&dedicated_server.uri()));

    Mock::given(method("GET"))
        .and(path("/api2/json/cluster/nextid"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"data": "300"})))
        .expect(1)
        .mount(&dedicated_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api2/json/cluster/nextid"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"data": "100"})))
        .expect(1)
        .mount(&default_server)
        .await;

    assert_eq!(hypervisor.next_guest_id("pve2").await.unwrap(), vmid(300));
    assert_eq!(hypervisor.next_guest_id("pve1").await.unwrap(), vmid(100));
}
