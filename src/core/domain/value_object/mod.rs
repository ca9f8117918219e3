mod api_credentials;
mod api_endpoint;
mod api_ticket;
mod guest_id;
mod root_password;
mod task_handle;

pub mod serde_helpers;

pub use api_credentials::ApiCredentials;
pub use api_endpoint::ApiEndpoint;
pub use api_ticket::{ApiTicket, CsrfToken};
pub use guest_id::{GuestId, MAX_GUEST_ID, MIN_GUEST_ID};
pub use root_password::RootPassword;
pub use task_handle::TaskHandle;

// Re-export validation functions for internal use
#[allow(unused_imports)]
pub(crate) use api_credentials::{validate_realm, validate_username};
#[allow(unused_imports)]
pub(crate) use api_endpoint::{validate_host, validate_port};
#[allow(unused_imports)]
pub(crate) use api_ticket::{validate_csrf_token, validate_ticket};
#[allow(unused_imports)]
pub(crate) use guest_id::validate_guest_id;
#[allow(unused_imports)]
pub(crate) use root_password::validate_root_password;
#[allow(unused_imports)]
pub(crate) use task_handle::validate_task_handle;
