use crate::core::domain::{
    error::{OrchestratorResult, ValidationError},
    value_object::{ApiCredentials, ApiEndpoint},
};

/// Everything needed to reach and authenticate against one hypervisor node.
#[derive(Debug, Clone)]
pub struct NodeConnection {
    endpoint: ApiEndpoint,
    credentials: ApiCredentials,
    accept_invalid_certs: bool,
}

impl NodeConnection {
    pub fn new(
        endpoint: ApiEndpoint,
        credentials: ApiCredentials,
        accept_invalid_certs: bool,
    ) -> Self {
        Self {
            endpoint,
            credentials,
            accept_invalid_certs,
        }
    }

    /// Creates a new builder for a node connection.
    pub fn builder() -> NodeConnectionBuilder {
        NodeConnectionBuilder {
            secure: true,
            ..NodeConnectionBuilder::default()
        }
    }

    pub fn endpoint(&self) -> &ApiEndpoint {
        &self.endpoint
    }

    pub fn credentials(&self) -> &ApiCredentials {
        &self.credentials
    }

    pub fn accept_invalid_certs(&self) -> bool {
        self.accept_invalid_certs
    }
}

/// Builder for [`NodeConnection`].
#[derive(Debug, Default)]
pub struct NodeConnectionBuilder {
    host: Option<String>,
    port: Option<u16>,
    username: Option<String>,
    password: Option<String>,
    realm: Option<String>,
    secure: bool,
    accept_invalid_certs: bool,
}

impl NodeConnectionBuilder {
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
        realm: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self.realm = Some(realm.into());
        self
    }

    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// Allow self-signed certificates.
    pub fn accept_invalid_certs(mut self, accept: bool) -> Self {
        self.accept_invalid_certs = accept;
        self
    }

    pub fn build(self) -> OrchestratorResult<NodeConnection> {
        let host = self.host.ok_or_else(|| required("host"))?;
        let endpoint = ApiEndpoint::new(host, self.port.unwrap_or(8006), self.secure)?;
        let credentials = ApiCredentials::new(
            self.username.ok_or_else(|| required("username"))?,
            self.password.ok_or_else(|| required("password"))?,
            self.realm.ok_or_else(|| required("realm"))?,
        )?;
        Ok(NodeConnection::new(
            endpoint,
            credentials,
            self.accept_invalid_certs,
        ))
    }
}

fn required(field: &str) -> ValidationError {
    ValidationError::Field {
        field: field.to_string(),
        message: format!("{} is required", field),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::domain::error::OrchestratorError;

    #[test]
    fn test_builder_defaults() {
        let connection = NodeConnection::builder()
            .host("pve1.example.com")
            .credentials("root", "secret", "pam")
            .build()
            .unwrap();
        assert_eq!(connection.endpoint().port(), 8006);
        assert_eq!(
            connection.endpoint().api_url("version"),
            "https://pve1.example.com:8006/api2/json/version"
        );
        assert!(!connection.accept_invalid_certs());
    }

    #[test]
    fn test_builder_requires_host() {
        let result = NodeConnection::builder()
            .credentials("root", "secret", "pam")
            .build();
        assert!(matches!(
            result,
            Err(OrchestratorError::Validation(ValidationError::Field { ref field, .. })) if field == "host"
        ));
    }
}
