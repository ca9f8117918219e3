use crate::core::domain::error::ValidationError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lowest guest id Proxmox hands out; ids below are reserved.
pub const MIN_GUEST_ID: u32 = 100;
/// Highest guest id Proxmox accepts.
pub const MAX_GUEST_ID: u32 = 999_999_999;

/// A cluster-unique numeric guest identifier (VMID).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct GuestId(u32);

impl GuestId {
    /// Creates a validated guest id.
    pub fn new(id: u32) -> Result<Self, ValidationError> {
        validate_guest_id(id)?;
        Ok(Self(id))
    }

    /// Creates a new guest id without validation.
    #[allow(unused)]
    pub(crate) fn new_unchecked(id: u32) -> Self {
        Self(id)
    }

    /// Returns the numeric id.
    #[must_use]
    pub fn get(&self) -> u32 {
        self.0
    }

    /// The id right after this one, if still in range.
    #[must_use]
    pub fn next(&self) -> Option<Self> {
        self.0.checked_add(1).and_then(|id| Self::new(id).ok())
    }
}

impl TryFrom<u32> for GuestId {
    type Error = ValidationError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<GuestId> for u32 {
    fn from(id: GuestId) -> Self {
        id.0
    }
}

impl fmt::Display for GuestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Validates a guest id against the Proxmox range.
pub(crate) fn validate_guest_id(id: u32) -> Result<(), ValidationError> {
    if !(MIN_GUEST_ID..=MAX_GUEST_ID).contains(&id) {
        return Err(ValidationError::Field {
            field: "vmid".to_string(),
            message: format!(
                "Guest id must be between {} and {} (got {})",
                MIN_GUEST_ID, MAX_GUEST_ID, id
            ),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_guest_id_bounds() {
        assert!(validate_guest_id(100).is_ok());
        assert!(validate_guest_id(999_999_999).is_ok());
        assert!(validate_guest_id(99).is_err());
        assert!(validate_guest_id(1_000_000_000).is_err());
    }

    #[test]
    fn test_next_stops_at_upper_bound() {
        assert_eq!(GuestId::new(150).unwrap().next().unwrap().get(), 151);
        assert!(GuestId::new(MAX_GUEST_ID).unwrap().next().is_none());
    }

    #[test]
    fn test_serde_rejects_reserved_ids() {
        let id: GuestId = serde_json::from_str("9000").unwrap();
        assert_eq!(id.get(), 9000);
        assert!(serde_json::from_str::<GuestId>("42").is_err());
    }
}
