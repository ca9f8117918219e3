use crate::core::domain::error::ValidationError;
use std::time::{Duration, SystemTime};

/// A Proxmox authentication ticket.
#[derive(Debug, Clone)]
pub struct ApiTicket {
    value: String,
    created_at: SystemTime,
}

impl ApiTicket {
    /// Creates a validated ticket issued now.
    pub fn new(value: String) -> Result<Self, ValidationError> {
        validate_ticket(&value)?;
        Ok(Self::new_unchecked(value))
    }

    /// Creates a new ticket without validation.
    pub(crate) fn new_unchecked(value: String) -> Self {
        Self {
            value,
            created_at: SystemTime::now(),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.value
    }

    /// Checks if the ticket is expired based on a given lifetime.
    #[must_use]
    pub fn is_expired(&self, lifetime: Duration) -> bool {
        self.created_at
            .elapsed()
            .map(|age| age > lifetime)
            .unwrap_or(true)
    }

    /// Formats the ticket as a cookie header.
    #[must_use]
    pub fn as_cookie_header(&self) -> String {
        format!("PVEAuthCookie={}", self.value)
    }
}

/// A CSRF prevention token, required on every write request.
#[derive(Debug, Clone)]
pub struct CsrfToken(String);

impl CsrfToken {
    pub fn new(value: String) -> Result<Self, ValidationError> {
        validate_csrf_token(&value)?;
        Ok(Self(value))
    }

    /// Creates a new CSRF token without validation.
    pub(crate) fn new_unchecked(value: String) -> Self {
        Self(value)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Validates the format of a ticket string.
pub(crate) fn validate_ticket(ticket: &str) -> Result<(), ValidationError> {
    if ticket.is_empty() {
        return Err(ValidationError::Field {
            field: "ticket".to_string(),
            message: "Ticket cannot be empty".to_string(),
        });
    }
    let parts: Vec<&str> = ticket.split(':').collect();
    if parts.len() < 5 || parts[0] != "PVE" {
        return Err(ValidationError::Format(
            "Invalid ticket format: must start with 'PVE:' and have at least 5 parts".to_string(),
        ));
    }
    Ok(())
}

/// Validates the format of a CSRF token string (`TOKENID:VALUE`).
pub(crate) fn validate_csrf_token(token: &str) -> Result<(), ValidationError> {
    let Some((id, value)) = token.split_once(':') else {
        return Err(ValidationError::Format(
            "CSRF token must be in format TOKENID:VALUE".to_string(),
        ));
    };
    if id.len() != 8 || !id.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ValidationError::Format(
            "Token ID must be 8 hexadecimal characters".to_string(),
        ));
    }
    if value.is_empty() {
        return Err(ValidationError::Field {
            field: "csrf_token".to_string(),
            message: "CSRF token value cannot be empty".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ticket_validation() {
        assert!(validate_ticket("PVE:root@pam:4EEC61E2::sig").is_ok());
        assert!(validate_ticket("").is_err());
        assert!(validate_ticket("XYZ:root@pam:4EEC61E2::sig").is_err());
    }

    #[test]
    fn test_ticket_expiry() {
        let ticket = ApiTicket::new_unchecked("PVE:root@pam:4EEC61E2::sig".to_string());
        assert!(!ticket.is_expired(Duration::from_secs(7200)));
        let stale = ApiTicket {
            value: "PVE:root@pam:4EEC61E2::sig".to_string(),
            created_at: SystemTime::now() - Duration::from_secs(7300),
        };
        assert!(stale.is_expired(Duration::from_secs(7200)));
        assert_eq!(
            ticket.as_cookie_header(),
            "PVEAuthCookie=PVE:root@pam:4EEC61E2::sig"
        );
    }

    #[test]
    fn test_csrf_validation() {
        assert!(validate_csrf_token("4EEC61E2:abc123").is_ok());
        assert!(validate_csrf_token("4EEC61E2").is_err());
        assert!(validate_csrf_token("XYZ:abc").is_err());
        assert!(validate_csrf_token("4EEC61E2:").is_err());
    }
}
