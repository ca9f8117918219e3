//! Internal HTTP client that handles authentication and automatic ticket refresh.

use crate::{
    auth::application::service::login_service::LoginService,
    config::ClientConfig,
    core::domain::{
        error::{OrchestratorError, OrchestratorResult, ValidationError},
        model::{api_session::ApiSession, node_connection::NodeConnection},
    },
};
use governor::{DefaultDirectRateLimiter, Quota};
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::num::NonZeroU32;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Proxmox wraps every payload in `{"data": ...}`.
#[derive(Deserialize)]
struct Envelope<T> {
    data: T,
}

/// HTTP client bound to one node.
///
/// Adds `PVEAuthCookie` and `CSRFPreventionToken` to each request. A
/// `401 Unauthorized` triggers one fresh login and one retry of the request.
#[derive(Debug)]
pub struct ApiClient {
    http_client: Client,
    connection: Arc<NodeConnection>,
    auth: Arc<RwLock<Option<ApiSession>>>,
    config: Arc<ClientConfig>,
    rate_limiter: Option<Arc<DefaultDirectRateLimiter>>,
}

impl ApiClient {
    /// Creates a new `ApiClient`. The client starts unauthenticated.
    ///
    /// # Errors
    /// Returns `Validation` for a zero rate limit and `TransientFault` if the
    /// HTTP client cannot be built.
    pub fn new(connection: NodeConnection, config: ClientConfig) -> OrchestratorResult<Self> {
        let http_client = Client::builder()
            .danger_accept_invalid_certs(connection.accept_invalid_certs())
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| OrchestratorError::TransientFault(e.to_string()))?;

        let rate_limiter = match config.rate_limit {
            Some(rl) => {
                let invalid = || {
                    ValidationError::ConstraintViolation(
                        "Rate limit and burst size must be greater than zero".to_string(),
                    )
                };
                let per_second = NonZeroU32::new(rl.requests_per_second).ok_or_else(invalid)?;
                let burst = NonZeroU32::new(rl.burst_size).ok_or_else(invalid)?;
                let quota = Quota::per_second(per_second).allow_burst(burst);
                Some(Arc::new(DefaultDirectRateLimiter::direct(quota)))
            }
            None => None,
        };

        Ok(Self {
            http_client,
            connection: Arc::new(connection),
            auth: Arc::new(RwLock::new(None)),
            config: Arc::new(config),
            rate_limiter,
        })
    }

    #[cfg(test)]
    async fn set_auth(&self, auth: ApiSession) {
        let mut lock = self.auth.write().await;
        *lock = Some(auth);
    }

    #[cfg(test)]
    async fn auth(&self) -> Option<ApiSession> {
        self.auth.read().await.clone()
    }

    /// Authenticated GET; returns the unwrapped `data` payload.
    pub async fn get<T>(&self, path: &str) -> OrchestratorResult<T>
    where
        T: DeserializeOwned,
    {
        self.execute_request(Method::GET, path, None::<&()>).await
    }

    /// Authenticated POST with a JSON body.
    pub async fn post<B, T>(&self, path: &str, body: &B) -> OrchestratorResult<T>
    where
        B: serde::Serialize,
        T: DeserializeOwned,
    {
        self.execute_request(Method::POST, path, Some(body)).await
    }

    /// Authenticated PUT with a JSON body.
    pub async fn put<B, T>(&self, path: &str, body: &B) -> OrchestratorResult<T>
    where
        B: serde::Serialize,
        T: DeserializeOwned,
    {
        self.execute_request(Method::PUT, path, Some(body)).await
    }

    /// Authenticated DELETE. Query parameters go into `path`.
    pub async fn delete<T>(&self, path: &str) -> OrchestratorResult<T>
    where
        T: DeserializeOwned,
    {
        self.execute_request(Method::DELETE, path, None::<&()>).await
    }

    /// Ensures authentication, sends the request, handles 401 by refreshing
    /// once, and unwraps the response envelope.
    async fn execute_request<B, T>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> OrchestratorResult<T>
    where
        B: serde::Serialize,
        T: DeserializeOwned,
    {
        self.ensure_authenticated().await?;

        let response = self.send(method.clone(), path, body).await?;
        let response = if response.status() == StatusCode::UNAUTHORIZED {
            warn!(host = %self.connection.endpoint().host(), path, "ticket rejected, refreshing");
            self.refresh_auth().await?;
            let retried = self.send(method, path, body).await?;
            if retried.status() == StatusCode::UNAUTHORIZED {
                return Err(OrchestratorError::Authentication(format!(
                    "Request to {} still unauthorized after refresh",
                    path
                )));
            }
            retried
        } else {
            response
        };

        Self::parse_response(path, response).await
    }

    /// One attempt: rate limit, attach auth headers, send.
    async fn send<B>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> OrchestratorResult<reqwest::Response>
    where
        B: serde::Serialize,
    {
        if let Some(limiter) = &self.rate_limiter {
            limiter.until_ready().await;
        }

        let url = self.connection.endpoint().api_url(path);
        debug!(%method, %url, "hypervisor request");
        let mut req_builder = self.http_client.request(method, &url);

        {
            let auth_guard = self.auth.read().await;
            if let Some(auth) = auth_guard.as_ref() {
                req_builder = req_builder.header("Cookie", auth.ticket().as_cookie_header());
                if let Some(csrf) = auth.csrf_token() {
                    req_builder = req_builder.header("CSRFPreventionToken", csrf.as_str());
                }
            }
        }

        if let Some(body) = body {
            req_builder = req_builder.json(body);
        }

        req_builder.send().await.map_err(|e| {
            OrchestratorError::TransientFault(format!("HTTP request to {} failed: {}", path, e))
        })
    }

    async fn parse_response<T>(path: &str, response: reqwest::Response) -> OrchestratorResult<T>
    where
        T: DeserializeOwned,
    {
        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown".to_string());
            return Err(classify_status(status, path, &error_text));
        }

        response
            .json::<Envelope<T>>()
            .await
            .map(|envelope| envelope.data)
            .map_err(|e| {
                OrchestratorError::RemoteRejected(format!(
                    "Unexpected response from {}: {}",
                    path, e
                ))
            })
    }

    /// Ensures that we have a valid (non-expired) ticket. If not, attempts to refresh.
    async fn ensure_authenticated(&self) -> OrchestratorResult<()> {
        let need_refresh = {
            let auth_guard = self.auth.read().await;
            match auth_guard.as_ref() {
                Some(auth) => auth.ticket().is_expired(self.config.ticket_lifetime),
                None => true,
            }
        };

        if need_refresh {
            self.refresh_auth().await?;
        }
        Ok(())
    }

    /// Performs a fresh login using the stored credentials to obtain a new ticket.
    async fn refresh_auth(&self) -> OrchestratorResult<()> {
        let service = LoginService::new(self.http_client.clone());
        let auth = service.execute(&self.connection).await?;
        let mut lock = self.auth.write().await;
        *lock = Some(auth);
        Ok(())
    }
}

/// Maps a non-success HTTP status to the error taxonomy. 596 is what
/// pveproxy answers when the node behind it is unreachable.
fn classify_status(status: StatusCode, path: &str, body: &str) -> OrchestratorError {
    match status.as_u16() {
        502 | 503 | 504 | 596 => OrchestratorError::TransientFault(format!(
            "API unavailable ({}) for {}: {}",
            status, path, body
        )),
        401 => OrchestratorError::Authentication(format!("Unauthorized for {}", path)),
        _ => OrchestratorError::RemoteRejected(format!("API error ({}) for {}: {}", status, path, body)),
    }
}
