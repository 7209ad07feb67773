//! Unified error type for the engine
//!
//! Every variant maps to a stable machine-readable code through
//! [`EasError::code`], which is what ends up in a terminal `SyncStatus`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::wbxml::WbxmlError;

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "type", content = "message")]
pub enum EasError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Authentication failed with HTTP {0}")]
    Auth(u16),

    #[error("Server requires provisioning")]
    ProvisionRequired,

    #[error("Server redirected to {0}")]
    Redirect(String),

    #[error("HTTP error {0}")]
    Http(u16),

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("WBXML error: {0}")]
    Wbxml(String),

    #[error("Missing field in response: {0}")]
    MissingField(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Credential error: {0}")]
    Credential(String),

    #[error("Autodiscovery failed: {0}")]
    Autodiscovery(String),

    #[error("Operation not supported: {0}")]
    NotSupported(String),

    #[error("Sync cancelled")]
    Cancelled,
}

impl EasError {
    /// Stable code reported in terminal statuses
    pub fn code(&self) -> String {
        match self {
            EasError::Config(_) => "config".to_string(),
            EasError::Network(_) => "network".to_string(),
            EasError::Timeout(_) => "timeout".to_string(),
            // 401 and 403 end the same way; the status stays in the message
            EasError::Auth(_) => "401".to_string(),
            EasError::ProvisionRequired => "449".to_string(),
            EasError::Redirect(_) => "451".to_string(),
            EasError::Http(status) => format!("httperror::{}", status),
            EasError::MalformedPayload(_) | EasError::Wbxml(_) => "invalidwbxml".to_string(),
            EasError::MissingField(path) => format!("wbxmlmissingfield::{}", path),
            EasError::Store(_) => "store".to_string(),
            EasError::Credential(_) => "credentials".to_string(),
            EasError::Autodiscovery(_) => "autodiscover".to_string(),
            EasError::NotSupported(_) => "notsupported".to_string(),
            EasError::Cancelled => "cancelled".to_string(),
        }
    }

    /// Transport-level failures that count against the network retry budget
    pub fn is_network(&self) -> bool {
        matches!(self, EasError::Network(_) | EasError::Timeout(_))
    }
}

impl From<WbxmlError> for EasError {
    fn from(err: WbxmlError) -> Self {
        match err {
            WbxmlError::BadHeader => EasError::MalformedPayload(err.to_string()),
            other => EasError::Wbxml(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for EasError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            EasError::Timeout(err.to_string())
        } else {
            EasError::Network(err.to_string())
        }
    }
}

impl From<std::io::Error> for EasError {
    fn from(err: std::io::Error) -> Self {
        EasError::Config(err.to_string())
    }
}

impl From<toml::de::Error> for EasError {
    fn from(err: toml::de::Error) -> Self {
        EasError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for EasError {
    fn from(err: serde_json::Error) -> Self {
        EasError::Store(err.to_string())
    }
}

impl From<quick_xml::DeError> for EasError {
    fn from(err: quick_xml::DeError) -> Self {
        EasError::Autodiscovery(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EasError>;
