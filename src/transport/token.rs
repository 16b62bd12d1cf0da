use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{VoiceError, VoiceResult};

/// Supplies the short-lived auth token the voice endpoint requires
#[async_trait::async_trait]
pub trait TokenProvider: Send + Sync {
    async fn fetch_token(&self) -> VoiceResult<String>;
}

/// A token known up front
#[derive(Debug, Clone)]
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

#[async_trait::async_trait]
impl TokenProvider for StaticToken {
    async fn fetch_token(&self) -> VoiceResult<String> {
        if self.0.is_empty() {
            return Err(VoiceError::Auth("No token configured".to_string()));
        }
        Ok(self.0.clone())
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: String,
}

/// Fetches a fresh token over HTTP before every connect
///
/// The endpoint answers `GET` with `{ "token": "..." }`.
#[derive(Debug, Clone)]
pub struct EndpointTokenProvider {
    endpoint: String,
    bearer: Option<String>,
    client: reqwest::Client,
}

impl EndpointTokenProvider {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            bearer: None,
            client: reqwest::Client::new(),
        }
    }

    /// Credential presented to the token endpoint itself
    pub fn with_bearer(mut self, bearer: impl Into<String>) -> Self {
        self.bearer = Some(bearer.into());
        self
    }
}

#[async_trait::async_trait]
impl TokenProvider for EndpointTokenProvider {
    async fn fetch_token(&self) -> VoiceResult<String> {
        debug!("Requesting voice token from {}", self.endpoint);

        let mut request = self.client.get(&self.endpoint);
        if let Some(bearer) = &self.bearer {
            request = request.bearer_auth(bearer);
        }

        let response = request
            .send()
            .await
            .map_err(|e| VoiceError::Auth(format!("Token request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(VoiceError::Auth(format!(
                "Token endpoint returned {}",
                status
            )));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| VoiceError::Auth(format!("Malformed token response: {}", e)))?;

        if body.token.is_empty() {
            return Err(VoiceError::Auth("Token endpoint returned an empty token".to_string()));
        }

        info!("Voice token acquired");
        Ok(body.token)
    }
}
