use thiserror::Error;
use uuid::Uuid;

/// The main error type for orchestration operations.
///
/// Hypervisor faults are split by whether a retry is safe: a
/// [`TransientFault`](OrchestratorError::TransientFault) may be retried within the
/// unit-of-work's attempt budget, a
/// [`RemoteRejected`](OrchestratorError::RemoteRejected) never is.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// Network failure or timeout while talking to the hypervisor.
    ///
    /// # Fields
    /// * `0` - What went wrong during the call
    #[error("Transient fault: {0}")]
    TransientFault(String),

    /// The hypervisor explicitly refused the requested operation.
    ///
    /// # Fields
    /// * `0` - The hypervisor-provided reason, verbatim where available
    #[error("Hypervisor rejected the request: {0}")]
    RemoteRejected(String),

    /// Authentication against a node failed
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// An invariant would be violated (in-flight deployment, VMID collision, held guest lock)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// No node can host the requested compute shape
    #[error("Insufficient resources: {0}")]
    InsufficientResources(String),

    /// Linear probing for a free guest id gave up.
    #[error("No unique guest id available: probed {probes} ids starting at {start}")]
    NoUniqueIdAvailable { start: u32, probes: u32 },

    /// Polling exhausted its attempts without a terminal answer.
    ///
    /// The remote operation may still be in progress; this does not imply the
    /// hypervisor-side object is missing.
    #[error("Timed out waiting for {operation} after {attempts} attempts")]
    Timeout { operation: String, attempts: u32 },

    /// The guest is suspended and the request is gated
    #[error("Guest {0} is suspended")]
    Suspended(Uuid),

    #[error("Not found: {0}")]
    NotFound(String),

    /// A deployment or step transition that the state machine forbids
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    /// Persisting or loading orchestration records failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// Represents validation failures with detailed context
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl OrchestratorError {
    /// Returns `true` when the failure is safe to retry blindly.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, OrchestratorError::TransientFault(_))
    }
}

impl From<std::io::Error> for OrchestratorError {
    fn from(error: std::io::Error) -> Self {
        OrchestratorError::Storage(error.to_string())
    }
}

impl From<serde_json::Error> for OrchestratorError {
    fn from(error: serde_json::Error) -> Self {
        OrchestratorError::Storage(error.to_string())
    }
}

/// Specialized error type for validation failures.
///
/// This enum provides detailed context about why a validation
/// failed, including field-specific errors and format violations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Represents a validation failure for a specific field
    ///
    /// # Fields
    /// * `field` - The name of the field that failed validation
    /// * `message` - A detailed message about why validation failed
    #[error("Field '{field}' validation failed: {message}")]
    Field { field: String, message: String },

    /// Represents format/syntax validation failures
    #[error("Format error: {0}")]
    Format(String),

    /// Represents violations of domain constraints
    #[error("Domain constraint violation: {0}")]
    ConstraintViolation(String),
}

/// Type alias for Results that may fail with an OrchestratorError
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;
