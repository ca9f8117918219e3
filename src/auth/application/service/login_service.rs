use crate::{
    auth::application::{
        request::login_request::LoginRequest, response::login_response::LoginResponse,
    },
    core::domain::{
        error::{OrchestratorError, OrchestratorResult, ValidationError},
        model::{api_session::ApiSession, node_connection::NodeConnection},
        value_object::{ApiTicket, CsrfToken},
    },
};

use reqwest::{
    Client, StatusCode,
    header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderValue},
};
use tracing::{debug, warn};

/// Obtains a ticket for one node via `POST access/ticket`.
pub struct LoginService {
    http_client: Client,
    default_headers: HeaderMap,
}

impl LoginService {
    /// Creates a service that reuses an existing HTTP client.
    pub fn new(http_client: Client) -> Self {
        let mut default_headers = HeaderMap::new();
        default_headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        default_headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        Self {
            http_client,
            default_headers,
        }
    }

    pub async fn execute(&self, connection: &NodeConnection) -> OrchestratorResult<ApiSession> {
        let url = connection.endpoint().api_url("access/ticket");
        let request = LoginRequest::from(connection.credentials());
        debug!(host = %connection.endpoint().host(), user = %request.username, "requesting ticket");

        let response = self
            .http_client
            .post(&url)
            .headers(self.default_headers.clone())
            .json(&request)
            .send()
            .await
            .map_err(|e| OrchestratorError::TransientFault(format!("Login request failed: {}", e)))?;

        match response.status() {
            StatusCode::OK => self.handle_successful_login(response).await,
            StatusCode::UNAUTHORIZED => {
                warn!(host = %connection.endpoint().host(), "login rejected");
                Err(OrchestratorError::Authentication(
                    "Invalid credentials provided".to_string(),
                ))
            }
            StatusCode::BAD_REQUEST => Err(OrchestratorError::Validation(ValidationError::Field {
                field: "request".to_string(),
                message: "Invalid request format".to_string(),
            })),
            StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT => Err(OrchestratorError::TransientFault(format!(
                "Proxmox service is currently unavailable ({})",
                response.status()
            ))),
            status => Err(OrchestratorError::RemoteRejected(format!(
                "Unexpected login response status: {}",
                status
            ))),
        }
    }

    async fn handle_successful_login(
        &self,
        response: reqwest::Response,
    ) -> OrchestratorResult<ApiSession> {
        let login_response = response.json::<LoginResponse>().await.map_err(|e| {
            OrchestratorError::RemoteRejected(format!("Failed to parse login response: {}", e))
        })?;

        let ticket = ApiTicket::new(login_response.data.ticket)?;
        let csrf_token = CsrfToken::new(login_response.data.csrf_token)?;

        Ok(ApiSession::new(ticket, Some(csrf_token)))
    }
}
