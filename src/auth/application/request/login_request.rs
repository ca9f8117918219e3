use crate::core::domain::value_object::ApiCredentials;
use serde::Serialize;

/// Body of `POST access/ticket`.
#[derive(Serialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
    pub realm: String,
}

impl From<&ApiCredentials> for LoginRequest {
    fn from(credentials: &ApiCredentials) -> Self {
        Self {
            username: credentials.username().to_string(),
            password: credentials.password().to_string(),
            realm: credentials.realm().to_string(),
        }
    }
}
