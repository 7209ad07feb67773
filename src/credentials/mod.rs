//! Credential storage and prompting
//!
//! The host application owns the actual secret storage; the engine only needs
//! `get`/`update`. OAuth token pairs are kept in the secret slot as JSON.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use thiserror::Error;
use tracing::{debug, info};

use crate::oauth::OAuthTokens;
use crate::types::error::EasError;

/// Errors that can occur during credential operations
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("Credential store error: {0}")]
    Store(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Credential not found: {0}")]
    NotFound(String),
}

impl From<CredentialError> for EasError {
    fn from(err: CredentialError) -> Self {
        EasError::Credential(err.to_string())
    }
}

/// A user name and its secret (password or serialized token pair)
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub secret: String,
}

impl Credentials {
    pub fn new(user: &str, secret: &str) -> Self {
        Self {
            user: user.to_string(),
            secret: secret.to_string(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Shared credential storage, keyed by account id
pub trait CredentialStore: Send + Sync {
    fn get(&self, account: &str) -> Result<Credentials, CredentialError>;

    fn update(&self, account: &str, user: &str, secret: &str) -> Result<(), CredentialError>;

    /// Token pair stored for an OAuth2 account
    fn get_tokens(&self, account: &str) -> Result<OAuthTokens, CredentialError> {
        let credentials = self.get(account)?;
        serde_json::from_str(&credentials.secret)
            .map_err(|e| CredentialError::Serialization(e.to_string()))
    }

    fn update_tokens(&self, account: &str, tokens: &OAuthTokens) -> Result<(), CredentialError> {
        let user = self.get(account).map(|c| c.user).unwrap_or_default();
        let json = serde_json::to_string(tokens)
            .map_err(|e| CredentialError::Serialization(e.to_string()))?;
        self.update(account, &user, &json)
    }
}

/// Asks the user for new credentials after an authentication failure
#[async_trait]
pub trait CredentialPrompt: Send + Sync {
    /// `None` when the user cancels
    async fn prompt(&self, account: &str, user: &str) -> Option<Credentials>;
}

/// In-process credential store
#[derive(Default)]
pub struct MemoryCredentialStore {
    entries: RwLock<HashMap<String, Credentials>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_password(self, account: &str, user: &str, password: &str) -> Self {
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(account.to_string(), Credentials::new(user, password));
        }
        self
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self, account: &str) -> Result<Credentials, CredentialError> {
        let entries = self
            .entries
            .read()
            .map_err(|e| CredentialError::Store(e.to_string()))?;
        debug!("Retrieved credentials for {}", account);
        entries
            .get(account)
            .cloned()
            .ok_or_else(|| CredentialError::NotFound(account.to_string()))
    }

    fn update(&self, account: &str, user: &str, secret: &str) -> Result<(), CredentialError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|e| CredentialError::Store(e.to_string()))?;
        entries.insert(account.to_string(), Credentials::new(user, secret));
        info!("Stored credentials for {}", account);
        Ok(())
    }
}
