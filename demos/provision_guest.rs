use leeca_orchestrator::{
    BuildRequest, ClientConfig, ComputeShape, Guest, GuestId, GuestRepository, MemoryStore,
    Node, NodeConnection, Orchestrator, OrchestratorConfig, OrchestratorPorts, OrchestratorResult,
    PowerAction, ProxmoxHypervisor, RootPassword,
};
use std::{env, sync::Arc};
use tracing_subscriber::EnvFilter;

const GIB: u64 = 1024 * 1024 * 1024;

#[tokio::main]
async fn main() -> OrchestratorResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    dotenvy::dotenv().ok();

    let var = |key: &str, default: &str| env::var(key).unwrap_or_else(|_| default.to_string());
    let node_name = var("PROXMOX_NODE", "pve");
    let client_config = ClientConfig::builder()
        .rate_limit(10, 20)
        .password_min_score(3)
        .build()?;

    let connection = NodeConnection::builder()
        .host(var("PROXMOX_HOST", "192.168.1.182"))
        .port(var("PROXMOX_PORT", "8006").parse().unwrap_or(8006))
        .credentials(
            var("PROXMOX_USERNAME", "automation"),
            var("PROXMOX_PASSWORD", ""),
            var("PROXMOX_REALM", "pve"),
        )
        .accept_invalid_certs(true)
        .build()?;
    let hypervisor = Arc::new(ProxmoxHypervisor::new(connection, client_config.clone()));

    let store = Arc::new(MemoryStore::new());
    store
        .add_node(Node {
            id: 1,
            display_name: node_name.clone(),
            cluster_name: node_name,
            memory_bytes: 64 * GIB,
            disk_bytes: 1000 * GIB,
            vm_storage: env::var("PROXMOX_STORAGE").ok(),
        })
        .await;
    let guest = Guest::new(
        "demo-guest",
        ComputeShape {
            cores: 2,
            memory_bytes: 2 * GIB,
            disk_bytes: 20 * GIB,
        },
    );
    GuestRepository::save(&*store, &guest).await?;

    let config = match env::var("ORCHESTRATOR_CONFIG") {
        Ok(path) => OrchestratorConfig::from_file(path).await?,
        Err(_) => OrchestratorConfig::default(),
    };
    let orchestrator = Orchestrator::new(
        OrchestratorPorts::from_store(hypervisor, Arc::clone(&store)),
        config,
    )?;

    let template = GuestId::new(var("PROXMOX_TEMPLATE", "9000").parse().unwrap_or(9000))?;
    let password = RootPassword::new(
        var("GUEST_ROOT_PASSWORD", "Tr0ub4dor&3-horse-staple"),
        client_config.password_score()?,
    )?;

    let handle = orchestrator
        .build(BuildRequest::new(guest.uuid, template, password))
        .await?;
    println!("Deployment {} queued", handle.uuid());
    handle.finished().await;

    for deployment in orchestrator.deployment_history(guest.uuid).await? {
        println!("{:?} deployment {}: {:?}", deployment.kind, deployment.uuid, deployment.status);
        for step in &deployment.steps {
            println!(
                "  {:<22} {:?} {:?} {}",
                step.name,
                step.status,
                step.duration(),
                step.error.as_deref().unwrap_or("")
            );
        }
    }

    let guest = orchestrator.sync_status(guest.uuid).await?;
    println!("Guest {} is {}", guest.name, guest.status);
    if env::var("DEMO_STOP").is_ok() {
        let guest = orchestrator.power(guest.uuid, PowerAction::Shutdown).await?;
        println!("Guest {} is {}", guest.name, guest.status);
    }
    Ok(())
}
