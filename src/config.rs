//! Runtime configuration for the hypervisor client and the orchestrator.
//!
//! Every struct has sensible defaults and can be loaded from JSON, with
//! durations written as seconds.

use crate::core::domain::error::{OrchestratorResult, ValidationError};
use crate::core::domain::value_object::serde_helpers::{duration_secs, duration_secs_f64};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Token-bucket limits applied to outgoing API requests per node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RateLimitConfig {
    pub requests_per_second: u32,
    pub burst_size: u32,
}

/// Settings for the per-node HTTP client.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// How long a ticket is trusted before a fresh login.
    #[serde(with = "duration_secs")]
    pub ticket_lifetime: Duration,
    pub rate_limit: Option<RateLimitConfig>,
    #[serde(with = "duration_secs")]
    pub request_timeout: Duration,
    /// Minimum zxcvbn score (0-4) for cloud-init passwords.
    pub password_min_score: Option<u8>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            // Proxmox tickets live two hours
            ticket_lifetime: Duration::from_secs(2 * 60 * 60),
            rate_limit: None,
            request_timeout: Duration::from_secs(30),
            password_min_score: None,
        }
    }
}

impl ClientConfig {
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    /// The password strength floor as a zxcvbn score.
    pub fn password_score(&self) -> Result<Option<zxcvbn::Score>, ValidationError> {
        self.password_min_score
            .map(|score| match score {
                0 => Ok(zxcvbn::Score::Zero),
                1 => Ok(zxcvbn::Score::One),
                2 => Ok(zxcvbn::Score::Two),
                3 => Ok(zxcvbn::Score::Three),
                4 => Ok(zxcvbn::Score::Four),
                _ => Err(ValidationError::Field {
                    field: "password_min_score".to_string(),
                    message: format!("Score must be between 0 and 4 (got {})", score),
                }),
            })
            .transpose()
    }
}

/// Builder for [`ClientConfig`].
#[derive(Debug, Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    pub fn ticket_lifetime(mut self, lifetime: Duration) -> Self {
        self.config.ticket_lifetime = lifetime;
        self
    }

    pub fn rate_limit(mut self, requests_per_second: u32, burst_size: u32) -> Self {
        self.config.rate_limit = Some(RateLimitConfig {
            requests_per_second,
            burst_size,
        });
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    pub fn password_min_score(mut self, score: u8) -> Self {
        self.config.password_min_score = Some(score);
        self
    }

    /// Validates and returns the configuration.
    pub fn build(self) -> Result<ClientConfig, ValidationError> {
        if let Some(rate_limit) = self.config.rate_limit {
            if rate_limit.requests_per_second == 0 || rate_limit.burst_size == 0 {
                return Err(ValidationError::ConstraintViolation(
                    "Rate limit and burst size must be greater than zero".to_string(),
                ));
            }
        }
        self.config.password_score()?;
        Ok(self.config)
    }
}

/// Attempt budget and spacing for a blocking remote wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct PollPolicy {
    #[serde(with = "duration_secs_f64")]
    pub interval: Duration,
    pub max_attempts: u32,
}

impl PollPolicy {
    #[must_use]
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }

    /// Upper bound on the time the wait can take.
    #[must_use]
    pub fn budget(&self) -> Duration {
        self.interval.saturating_mul(self.max_attempts)
    }
}

/// Bounded retry with exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    #[serde(with = "duration_secs_f64")]
    pub initial_backoff: Duration,
    #[serde(with = "duration_secs_f64")]
    pub max_backoff: Duration,
    pub multiplier: f64,
    /// Per-attempt deadline; an elapsed attempt counts as a transient fault.
    #[serde(with = "duration_secs_f64")]
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(30),
            multiplier: 2.0,
            attempt_timeout: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based).
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16) as i32;
        let scaled = self.initial_backoff.as_secs_f64() * self.multiplier.powi(exponent);
        Duration::try_from_secs_f64(scaled)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

/// Settings for the pipelines, scheduler and allocator.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Waiting for clone/delete/start tasks.
    pub task_poll: PollPolicy,
    /// Waiting for a guest lock to clear.
    pub unlock_poll: PollPolicy,
    /// Retry policy for individual hypervisor calls within a step.
    pub retry: RetryPolicy,
    /// Retry policy for direct power actions.
    pub power_retry: RetryPolicy,
    #[serde(with = "duration_secs")]
    pub build_timeout: Duration,
    #[serde(with = "duration_secs")]
    pub reinstall_timeout: Duration,
    /// Pipelines allowed to run at the same time.
    pub max_concurrent_pipelines: usize,
    /// Free-id probes before giving up.
    pub id_probe_limit: u32,
    pub min_guest_id: u32,
    pub default_storage: String,
    pub primary_disk: String,
    pub full_clone: bool,
    /// Bridge used when `net0` has to be synthesized for a bandwidth limit.
    pub default_bridge: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            task_poll: PollPolicy::new(Duration::from_secs(5), 60),
            unlock_poll: PollPolicy::new(Duration::from_secs(2), 60),
            retry: RetryPolicy::default(),
            power_retry: RetryPolicy {
                max_attempts: 3,
                ..RetryPolicy::default()
            },
            build_timeout: Duration::from_secs(600),
            reinstall_timeout: Duration::from_secs(900),
            max_concurrent_pipelines: 8,
            id_probe_limit: 100,
            min_guest_id: 100,
            default_storage: "local-lvm".to_string(),
            primary_disk: "scsi0".to_string(),
            full_clone: true,
            default_bridge: "vmbr0".to_string(),
        }
    }
}

impl OrchestratorConfig {
    /// Loads a JSON configuration file; missing keys keep their defaults.
    pub async fn from_file(path: impl AsRef<Path>) -> OrchestratorResult<Self> {
        let raw = tokio::fs::read_to_string(path).await?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks cross-field constraints.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_concurrent_pipelines == 0 {
            return Err(ValidationError::Field {
                field: "max_concurrent_pipelines".to_string(),
                message: "At least one pipeline must be allowed to run".to_string(),
            });
        }
        if self.task_poll.max_attempts == 0 || self.unlock_poll.max_attempts == 0 {
            return Err(ValidationError::ConstraintViolation(
                "Poll policies need at least one attempt".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 || self.power_retry.max_attempts == 0 {
            return Err(ValidationError::ConstraintViolation(
                "Retry policies need at least one attempt".to_string(),
            ));
        }
        if self.primary_disk.is_empty() {
            return Err(ValidationError::Field {
                field: "primary_disk".to_string(),
                message: "Primary disk cannot be empty".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy {
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(5),
            ..RetryPolicy::default()
        };
        assert_eq!(policy.backoff(1), Duration::from_secs(1));
        assert_eq!(policy.backoff(2), Duration::from_secs(2));
        assert_eq!(policy.backoff(3), Duration::from_secs(4));
        assert_eq!(policy.backoff(4), Duration::from_secs(5));
        assert_eq!(policy.backoff(40), Duration::from_secs(5));
    }

    #[test]
    fn test_client_builder_rejects_zero_rate() {
        assert!(ClientConfig::builder().rate_limit(0, 1).build().is_err());
        assert!(ClientConfig::builder().password_min_score(7).build().is_err());
        let config = ClientConfig::builder()
            .rate_limit(10, 20)
            .password_min_score(3)
            .build()
            .unwrap();
        assert_eq!(config.password_score().unwrap(), Some(zxcvbn::Score::Three));
    }

    #[tokio::test]
    async fn test_from_file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"build_timeout": 300, "task_poll": {{"interval": 0.5, "max_attempts": 10}}, "default_storage": "ceph"}}"#
        )
        .unwrap();

        let config = OrchestratorConfig::from_file(file.path()).await.unwrap();
        assert_eq!(config.build_timeout, Duration::from_secs(300));
        assert_eq!(config.task_poll.interval, Duration::from_millis(500));
        assert_eq!(config.default_storage, "ceph");
        assert_eq!(config.reinstall_timeout, Duration::from_secs(900));
        assert_eq!(config.primary_disk, "scsi0");
    }

    #[tokio::test]
    async fn test_from_file_rejects_invalid() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"max_concurrent_pipelines": 0}}"#).unwrap();
        assert!(OrchestratorConfig::from_file(file.path()).await.is_err());
    }
}
