use crate::core::domain::error::ValidationError;
use std::fmt;
use zxcvbn::zxcvbn;

/// Cloud-init root credential pushed into a guest (plaintext, only held for the pipeline run).
#[derive(Clone)]
pub struct RootPassword(String);

impl RootPassword {
    /// Creates a validated password, optionally enforcing a zxcvbn strength score.
    pub fn new(
        password: impl Into<String>,
        min_score: Option<zxcvbn::Score>,
    ) -> Result<Self, ValidationError> {
        let password = password.into();
        validate_root_password(&password, min_score)?;
        Ok(Self(password))
    }

    /// Creates a new password without validation.
    #[allow(unused)]
    pub(crate) fn new_unchecked(password: String) -> Self {
        Self(password)
    }

    /// Returns the password as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for RootPassword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RootPassword(***)")
    }
}

/// Validates a cloud-init password. 72 bytes is the bcrypt ceiling most guest images hash with.
pub(crate) fn validate_root_password(
    password: &str,
    min_score: Option<zxcvbn::Score>,
) -> Result<(), ValidationError> {
    if password.is_empty() {
        return Err(ValidationError::Field {
            field: "password".to_string(),
            message: "Password cannot be empty".to_string(),
        });
    }
    if password.len() < 8 {
        return Err(ValidationError::Format(
            "Password must be at least 8 characters long".to_string(),
        ));
    }
    if password.len() > 72 {
        return Err(ValidationError::Format(
            "Password cannot exceed 72 characters".to_string(),
        ));
    }
    if let Some(min_score) = min_score {
        let entropy = zxcvbn(password, &[]);
        if entropy.score() < min_score {
            return Err(ValidationError::ConstraintViolation(
                "Password is too weak (increase complexity)".to_string(),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_length_limits() {
        assert!(validate_root_password("", None).is_err());
        assert!(validate_root_password("short", None).is_err());
        assert!(validate_root_password(&"a".repeat(73), None).is_err());
        assert!(validate_root_password("longenough", None).is_ok());
    }

    #[test]
    fn test_strength_is_optional() {
        assert!(validate_root_password("password", None).is_ok());
        assert!(validate_root_password("password", Some(zxcvbn::Score::Three)).is_err());
        assert!(
            validate_root_password("correct-horse-battery-staple-42", Some(zxcvbn::Score::Three))
                .is_ok()
        );
    }

    #[test]
    fn test_debug_is_redacted() {
        let password = RootPassword::new("s3cret-value!", None).unwrap();
        assert_eq!(format!("{:?}", password), "RootPassword(***)");
    }
}
