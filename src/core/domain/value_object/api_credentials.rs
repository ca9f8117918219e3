use crate::core::domain::error::ValidationError;
use std::fmt;

const ALLOWED_REALMS: [&str; 5] = ["pam", "pve", "ldap", "ad", "openid"];

/// Username, password and realm used to obtain a node ticket.
#[derive(Clone)]
pub struct ApiCredentials {
    username: String,
    password: String,
    realm: String,
}

impl ApiCredentials {
    /// Creates validated credentials.
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        realm: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        let credentials = Self {
            username: username.into(),
            password: password.into(),
            realm: realm.into(),
        };
        validate_username(&credentials.username)?;
        validate_realm(&credentials.realm)?;
        if credentials.password.is_empty() {
            return Err(ValidationError::Field {
                field: "password".to_string(),
                message: "Password cannot be empty".to_string(),
            });
        }
        Ok(credentials)
    }

    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    #[must_use]
    pub fn password(&self) -> &str {
        &self.password
    }

    #[must_use]
    pub fn realm(&self) -> &str {
        &self.realm
    }

    /// `user@realm`, the form Proxmox prints in task owners.
    #[must_use]
    pub fn user_at_realm(&self) -> String {
        format!("{}@{}", self.username, self.realm)
    }
}

impl fmt::Debug for ApiCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiCredentials")
            .field("username", &self.username)
            .field("realm", &self.realm)
            .finish_non_exhaustive()
    }
}

/// Validates a username.
pub(crate) fn validate_username(username: &str) -> Result<(), ValidationError> {
    if username.is_empty() {
        return Err(ValidationError::Field {
            field: "username".to_string(),
            message: "Username cannot be empty".to_string(),
        });
    }
    if username.len() > 64 {
        return Err(ValidationError::Format(format!(
            "Username length must not exceed 64 characters (got {})",
            username.len()
        )));
    }
    let allowed = |c: char| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.';
    if !username.chars().all(allowed) {
        return Err(ValidationError::Format(
            "Username contains invalid characters. Allowed: alphanumeric, -, _, .".to_string(),
        ));
    }
    Ok(())
}

/// Validates an authentication realm.
pub(crate) fn validate_realm(realm: &str) -> Result<(), ValidationError> {
    if !ALLOWED_REALMS.contains(&realm) {
        return Err(ValidationError::ConstraintViolation(format!(
            "Invalid realm '{}'. Allowed realms are: {}",
            realm,
            ALLOWED_REALMS.join(", ")
        )));
    }
    Ok(())
}
