use serde::Deserialize;

/// `data` envelope of a ticket response.
#[derive(Debug, Deserialize)]
pub struct LoginResponse {
    pub data: LoginResponseData,
}

#[derive(Debug, Deserialize)]
pub struct LoginResponseData {
    pub ticket: String,
    #[serde(rename = "CSRFPreventionToken")]
    pub csrf_token: String,
    /// Echo of the authenticated `user@realm`.
    #[serde(default)]
    pub username: Option<String>,
}
