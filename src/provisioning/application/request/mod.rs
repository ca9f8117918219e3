pub mod build_request;
pub mod reinstall_request;
