pub mod address;
pub mod api_session;
pub mod cluster_resource;
pub mod deployment;
pub mod guest;
pub mod node;
pub mod node_connection;
pub mod vm;
