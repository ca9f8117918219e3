pub mod hypervisor;
pub mod repository;
