use crate::core::domain::error::ValidationError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// An opaque hypervisor task identifier (Proxmox UPID).
///
/// Format: `UPID:{node}:{pid}:{pstart}:{starttime}:{type}:{id}:{user}:`.
/// Only the node, type and id segments are interpreted; everything else is
/// carried through untouched.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TaskHandle(String);

impl TaskHandle {
    /// Creates a validated task handle.
    pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
        let value = value.into();
        validate_task_handle(&value)?;
        Ok(Self(value))
    }

    /// Creates a new task handle without validation.
    #[allow(unused)]
    pub(crate) fn new_unchecked(value: String) -> Self {
        Self(value)
    }

    /// Returns the handle as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The node that owns the task.
    #[must_use]
    pub fn node(&self) -> Option<&str> {
        self.segment(1)
    }

    /// Task type, e.g. `qmclone`, `qmstart`, `qmdestroy`.
    #[must_use]
    pub fn kind(&self) -> Option<&str> {
        self.segment(5)
    }

    /// The object the task operates on (usually the guest id).
    #[must_use]
    pub fn object_id(&self) -> Option<&str> {
        self.segment(6)
    }

    /// The user that issued the task.
    #[must_use]
    pub fn user(&self) -> Option<&str> {
        self.segment(7)
    }

    fn segment(&self, index: usize) -> Option<&str> {
        self.0.split(':').nth(index).filter(|s| !s.is_empty())
    }
}

impl TryFrom<String> for TaskHandle {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<TaskHandle> for String {
    fn from(handle: TaskHandle) -> Self {
        handle.0
    }
}

impl fmt::Display for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Validates the format of a UPID string.
pub(crate) fn validate_task_handle(upid: &str) -> Result<(), ValidationError> {
    if upid.is_empty() {
        return Err(ValidationError::Field {
            field: "upid".to_string(),
            message: "Task handle cannot be empty".to_string(),
        });
    }
    let parts: Vec<&str> = upid.split(':').collect();
    if parts.len() < 7 || parts[0] != "UPID" || parts[1].is_empty() {
        return Err(ValidationError::Format(format!(
            "Invalid task handle '{}': must start with 'UPID:<node>:' and have at least 7 parts",
            upid
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLONE_UPID: &str = "UPID:pve1:0003A1B2:0123ABCD:65F1C0DE:qmclone:9000:root@pam:";

    #[test]
    fn test_parse_segments() {
        let handle = TaskHandle::new(CLONE_UPID).unwrap();
        assert_eq!(handle.node(), Some("pve1"));
        assert_eq!(handle.kind(), Some("qmclone"));
        assert_eq!(handle.object_id(), Some("9000"));
        assert_eq!(handle.user(), Some("root@pam"));
    }

    #[test]
    fn test_validate_task_handle() {
        assert!(validate_task_handle(CLONE_UPID).is_ok());
        assert!(validate_task_handle("").is_err());
        assert!(validate_task_handle("not-a-upid").is_err());
        assert!(validate_task_handle("UPID::1:2:3:qmstart:100:root@pam:").is_err());
    }
}
