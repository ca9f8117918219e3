use crate::core::domain::error::ValidationError;
use url::Url;

/// Base URL of one node's API (`http[s]://host:port/`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiEndpoint {
    host: String,
    port: u16,
    url: Url,
}

impl ApiEndpoint {
    /// Builds a validated endpoint from its parts.
    pub fn new(host: impl Into<String>, port: u16, secure: bool) -> Result<Self, ValidationError> {
        let host = host.into();
        validate_host(&host)?;
        validate_port(port)?;
        let scheme = if secure { "https" } else { "http" };
        let url = Url::parse(&format!("{}://{}:{}/", scheme, host, port))
            .map_err(|e| ValidationError::Format(format!("Invalid URL format: {}", e)))?;
        Ok(Self { host, port, url })
    }

    /// Wraps an already-formed base URL without validation (test servers).
    #[allow(unused)]
    pub(crate) fn from_url_unchecked(url: Url) -> Self {
        Self {
            host: url.host_str().unwrap_or_default().to_string(),
            port: url.port_or_known_default().unwrap_or_default(),
            url,
        }
    }

    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Absolute URL of an API path below `/api2/json/`.
    #[must_use]
    pub fn api_url(&self, path: &str) -> String {
        format!(
            "{}/api2/json/{}",
            self.url.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

/// Validates a hostname (RFC 1035 labels) or an IP literal.
pub(crate) fn validate_host(host: &str) -> Result<(), ValidationError> {
    if host.is_empty() {
        return Err(ValidationError::Field {
            field: "host".to_string(),
            message: "Host cannot be empty".to_string(),
        });
    }
    if host.parse::<std::net::IpAddr>().is_ok() {
        return Ok(());
    }
    if host.len() > 253 {
        return Err(ValidationError::Format(
            "Hostname cannot exceed 253 characters".to_string(),
        ));
    }
    for label in host.split('.') {
        if label.is_empty() || label.len() > 63 {
            return Err(ValidationError::Format(
                "Label must be between 1 and 63 characters".to_string(),
            ));
        }
        if !label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(ValidationError::Format(
                "Label can only contain alphanumeric characters and hyphens".to_string(),
            ));
        }
        if label.starts_with('-') || label.ends_with('-') {
            return Err(ValidationError::Format(
                "Label cannot start or end with hyphen".to_string(),
            ));
        }
    }
    Ok(())
}

/// Validates a port number.
pub(crate) fn validate_port(port: u16) -> Result<(), ValidationError> {
    if port == 0 {
        return Err(ValidationError::Field {
            field: "port".to_string(),
            message: "Port cannot be 0".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_host() {
        assert!(validate_host("pve1.example.com").is_ok());
        assert!(validate_host("10.0.0.5").is_ok());
        assert!(validate_host("").is_err());
        assert!(validate_host("-bad.example.com").is_err());
        assert!(validate_host("bad_label.example.com").is_err());
    }

    #[test]
    fn test_api_url_joins_paths() {
        let endpoint = ApiEndpoint::new("pve1.example.com", 8006, true).unwrap();
        assert_eq!(
            endpoint.api_url("/nodes/pve1/qemu"),
            "https://pve1.example.com:8006/api2/json/nodes/pve1/qemu"
        );
        assert_eq!(endpoint.port(), 8006);
    }

    #[test]
    fn test_port_zero_rejected() {
        assert!(ApiEndpoint::new("pve1", 0, true).is_err());
    }
}
