//! OAuth2 token refresh
//!
//! Only the refresh contract lives here; obtaining the first token pair
//! (browser consent) is the host application's job.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::types::error::EasError;

/// Errors that can occur during OAuth operations
#[derive(Debug, Error)]
pub enum OAuthError {
    #[error("OAuth request failed: {0}")]
    Request(String),

    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),

    #[error("No refresh token available")]
    MissingRefreshToken,
}

impl From<OAuthError> for EasError {
    fn from(err: OAuthError) -> Self {
        EasError::Credential(err.to_string())
    }
}

/// OAuth2 tokens
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OAuthTokens {
    /// Access token for API requests; empty forces a refresh
    pub access_token: String,
    /// Refresh token for obtaining new access tokens
    pub refresh_token: Option<String>,
    /// Token expiration time (Unix timestamp)
    pub expires_at: Option<i64>,
}

impl OAuthTokens {
    /// Whether the access token is empty or expires within `grace_secs`
    pub fn is_expired(&self, grace_secs: i64) -> bool {
        if self.access_token.is_empty() {
            return true;
        }
        match self.expires_at {
            Some(expires_at) => expires_at - chrono::Utc::now().timestamp() < grace_secs,
            None => false,
        }
    }
}

/// Exchanges a refresh token for a new token pair
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> Result<OAuthTokens, OAuthError>;
}

/// Token endpoint response
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
}

/// `grant_type=refresh_token` against a token endpoint
pub struct OAuthClient {
    http: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: Option<String>,
}

impl OAuthClient {
    pub fn new(token_url: &str, client_id: &str, client_secret: Option<&str>) -> Self {
        Self {
            http: reqwest::Client::new(),
            token_url: token_url.to_string(),
            client_id: client_id.to_string(),
            client_secret: client_secret.map(str::to_string),
        }
    }
}

#[async_trait]
impl TokenRefresher for OAuthClient {
    async fn refresh(&self, refresh_token: &str) -> Result<OAuthTokens, OAuthError> {
        let mut params = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.client_id.as_str()),
        ];
        if let Some(secret) = &self.client_secret {
            params.push(("client_secret", secret.as_str()));
        }

        debug!("Refreshing access token");

        let response = self
            .http
            .post(&self.token_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| OAuthError::Request(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!("Token refresh failed with {}", status);
            return Err(OAuthError::RefreshFailed(format!("{}: {}", status, body)));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| OAuthError::RefreshFailed(e.to_string()))?;

        info!("Access token refreshed");
        Ok(tokens_from_response(token, refresh_token))
    }
}

/// Keep the previous refresh token when the server does not rotate it
fn tokens_from_response(token: TokenResponse, previous_refresh: &str) -> OAuthTokens {
    OAuthTokens {
        access_token: token.access_token,
        refresh_token: token
            .refresh_token
            .or_else(|| Some(previous_refresh.to_string())),
        expires_at: token
            .expires_in
            .map(|secs| chrono::Utc::now().timestamp() + secs),
    }
}
