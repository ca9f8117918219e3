use crate::core::domain::value_object::{GuestId, RootPassword};
use uuid::Uuid;

/// Input for wiping a guest and cloning it again from a template.
#[derive(Debug, Clone)]
pub struct ReinstallRequest {
    pub guest: Uuid,
    pub template: GuestId,
    pub root_password: RootPassword,
}

impl ReinstallRequest {
    pub fn new(guest: Uuid, template: GuestId, root_password: RootPassword) -> Self {
        Self {
            guest,
            template,
            root_password,
        }
    }
}
