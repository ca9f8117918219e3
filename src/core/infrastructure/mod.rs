pub mod api_client;
pub mod memory_store;
pub mod proxmox_hypervisor;
