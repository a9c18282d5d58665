//! HTTP client for the remote device gateway.
//!
//! The gateway exposes a login endpoint issuing short-lived bearer tokens and
//! a two-way RPC endpoint per device that returns the device logger's event
//! pages as a JSON array. The orchestrator talks to this module through the
//! [`TelemetryGateway`] trait so sync logic can be tested against a mock.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

use crate::config::GatewayConfig;

/// Errors from the remote gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The gateway rejected the configured credentials.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// A previously issued token is no longer accepted.
    #[error("authentication token expired")]
    AuthExpired,

    /// The request failed at the transport level (timeout, connect, ...).
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The gateway answered with an unexpected HTTP status.
    #[error("gateway returned status {status}")]
    Status {
        /// The HTTP status code.
        status: StatusCode,
    },

    /// The response body did not have the expected shape.
    #[error("invalid gateway response: {0}")]
    InvalidResponse(String),
}

/// A bearer token issued by the gateway login endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthToken(String);

impl AuthToken {
    /// Wrap a raw token string.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The raw token value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Remote source of raw telemetry records for one device.
#[async_trait]
pub trait TelemetryGateway: Send + Sync {
    /// Obtain a fresh bearer token.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Auth`] on rejected credentials and
    /// [`GatewayError::Transport`] on network failure.
    async fn authenticate(&self) -> Result<AuthToken, GatewayError>;

    /// Fetch the raw event array for one device.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::AuthExpired`] on a 401-class response so the
    /// caller can re-authenticate once, [`GatewayError::Transport`] on
    /// timeout, and [`GatewayError::InvalidResponse`] if the body is not a
    /// JSON array.
    async fn fetch_events(
        &self,
        external_id: &str,
        token: &AuthToken,
    ) -> Result<Vec<serde_json::Value>, GatewayError>;
}

/// Response body of the login endpoint.
#[derive(Debug, Deserialize)]
struct LoginResponse {
    token: String,
}

/// Gateway client over HTTP (reqwest).
#[derive(Debug)]
pub struct HttpGateway {
    client: Client,
    base_url: String,
    username: String,
    password: String,
}

impl HttpGateway {
    /// Create a new gateway client from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn new(config: &GatewayConfig) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("aerolog/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }

    fn login_url(&self) -> String {
        format!("{}/api/auth/login", self.base_url)
    }

    fn rpc_url(&self, external_id: &str) -> String {
        format!("{}/api/plugins/rpc/twoway/{external_id}", self.base_url)
    }
}

#[async_trait]
impl TelemetryGateway for HttpGateway {
    async fn authenticate(&self) -> Result<AuthToken, GatewayError> {
        tracing::debug!("Authenticating against {}", self.base_url);

        let response = self
            .client
            .post(self.login_url())
            .json(&json!({
                "username": self.username,
                "password": self.password,
            }))
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => {
                let body: LoginResponse = response
                    .json()
                    .await
                    .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;
                Ok(AuthToken::new(body.token))
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(GatewayError::Auth("credentials rejected".to_string()))
            }
            status => Err(GatewayError::Status { status }),
        }
    }

    async fn fetch_events(
        &self,
        external_id: &str,
        token: &AuthToken,
    ) -> Result<Vec<serde_json::Value>, GatewayError> {
        let url = self.rpc_url(external_id);
        tracing::debug!("Fetching events: {}", url);

        let response = self
            .client
            .post(&url)
            .header("X-Authorization", format!("Bearer {}", token.as_str()))
            .json(&json!({
                "method": "syncEvent",
                "params": {},
            }))
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => {
                let body: serde_json::Value = response
                    .json()
                    .await
                    .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;

                match body {
                    serde_json::Value::Array(records) => {
                        tracing::debug!(
                            "Retrieved {} records for device {}",
                            records.len(),
                            external_id
                        );
                        Ok(records)
                    }
                    other => Err(GatewayError::InvalidResponse(format!(
                        "expected an array, got {other}"
                    ))),
                }
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(GatewayError::AuthExpired),
            status => Err(GatewayError::Status { status }),
        }
    }
}
