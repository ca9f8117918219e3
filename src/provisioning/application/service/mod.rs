pub mod build_pipeline;
pub mod deployment_tracker;
pub mod orchestrator;
pub mod pipeline;
pub mod power_service;
pub mod reconciler;
pub mod reinstall_pipeline;
pub mod resource_allocator;
pub mod retry_driver;
pub mod scheduler;
pub mod task_poller;
