//! Engine and account configuration
//!
//! Configuration is loaded from TOML and passed explicitly to the engine; there
//! is no process-wide configuration state.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::types::error::EasError;
use crate::types::ProtocolVersion;

/// Tunables of the protocol engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Timeout applied to every HTTP request
    pub request_timeout_secs: u64,
    /// Maximum number of local changes per upload batch
    pub max_upload_items: usize,
    /// `WindowSize` of download requests
    pub window_size: u32,
    /// Credential retries per request
    pub password_prompt_budget: u32,
    /// Network retries per request
    pub network_error_budget: u32,
    /// Re-runs of one folder after a folder reset
    pub folder_resync_limit: u32,
    /// Re-runs of the account cycle after an account reset
    pub account_resync_limit: u32,
    /// OPTIONS results are reused for this long
    pub options_cache_secs: i64,
    /// Tokens expiring within this window are refreshed first
    pub token_grace_secs: i64,
    /// Shared deadline for all autodiscover probes
    pub autodiscover_deadline_secs: u64,
    /// Redirects followed by one autodiscover probe
    pub autodiscover_max_hops: usize,
    /// Provision handshakes attempted before giving up
    pub provision_attempts: u32,
    /// Cooldown after status 110
    pub throttle_cooldown_secs: i64,
    pub device_type: String,
    pub user_agent: String,
    /// Versions tried in order when the account selects "auto"
    pub preferred_versions: Vec<ProtocolVersion>,
    pub filter_type: String,
    /// AirSyncBase body type requested from 12.0+ servers
    pub body_type: u32,
    /// Ask for item estimates before downloading
    pub estimate_items: bool,
    /// Treat Sync.4/5/6/8 on upload as isolatable item failures
    pub upload_soft_fail: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 90,
            max_upload_items: 50,
            window_size: 50,
            password_prompt_budget: 3,
            network_error_budget: 1,
            folder_resync_limit: 3,
            account_resync_limit: 3,
            options_cache_secs: 24 * 60 * 60,
            token_grace_secs: 30,
            autodiscover_deadline_secs: 60,
            autodiscover_max_hops: 5,
            provision_attempts: 2,
            throttle_cooldown_secs: 30 * 60,
            device_type: "eassync".to_string(),
            user_agent: format!("eas-sync/{}", env!("CARGO_PKG_VERSION")),
            preferred_versions: vec![
                ProtocolVersion::V16_1,
                ProtocolVersion::V14_0,
                ProtocolVersion::V2_5,
            ],
            filter_type: "0".to_string(),
            body_type: 1,
            estimate_items: true,
            upload_soft_fail: true,
        }
    }
}

impl EngineConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn autodiscover_deadline(&self) -> Duration {
        Duration::from_secs(self.autodiscover_deadline_secs)
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_secs = timeout.as_secs();
        self
    }

    pub fn with_max_upload_items(mut self, max: usize) -> Self {
        self.max_upload_items = max.max(1);
        self
    }

    pub fn with_preferred_versions(mut self, versions: Vec<ProtocolVersion>) -> Self {
        self.preferred_versions = versions;
        self
    }

    pub fn with_estimates(mut self, enabled: bool) -> Self {
        self.estimate_items = enabled;
        self
    }

    pub fn with_autodiscover_deadline(mut self, deadline: Duration) -> Self {
        self.autodiscover_deadline_secs = deadline.as_secs();
        self
    }
}

/// Protocol version chosen by the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VersionSelection {
    /// Highest preferred version the server advertises
    #[default]
    Auto,
    Fixed(ProtocolVersion),
}

impl fmt::Display for VersionSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionSelection::Auto => f.write_str("auto"),
            VersionSelection::Fixed(version) => write!(f, "{}", version),
        }
    }
}

impl TryFrom<String> for VersionSelection {
    type Error = EasError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.eq_ignore_ascii_case("auto") {
            Ok(VersionSelection::Auto)
        } else {
            value.parse().map(VersionSelection::Fixed)
        }
    }
}

impl Serialize for VersionSelection {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for VersionSelection {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        VersionSelection::try_from(value).map_err(serde::de::Error::custom)
    }
}

/// Authentication configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AuthConfig {
    /// User and password from the credential store
    Basic,
    /// Bearer token pair from the credential store, refreshed at `token_url`
    OAuth2 {
        token_url: String,
        client_id: String,
        client_secret: Option<String>,
    },
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self::Basic
    }
}

/// One ActiveSync account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountConfig {
    /// Key used for the credential and state stores
    pub id: String,

    /// Login and email address
    pub user: String,

    /// Server host, optionally with port
    pub host: String,

    #[serde(default = "default_true")]
    pub use_https: bool,

    #[serde(default = "generate_device_id")]
    pub device_id: String,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub version: VersionSelection,

    /// Whether to provision when the server asks for it
    #[serde(default = "default_true")]
    pub provision: bool,

    /// Rediscover the endpoint on connection failures
    #[serde(default)]
    pub autodiscover: bool,
}

impl AccountConfig {
    pub fn new(id: &str, user: &str, host: &str) -> Self {
        Self {
            id: id.to_string(),
            user: user.to_string(),
            host: host.to_string(),
            use_https: true,
            device_id: generate_device_id(),
            auth: AuthConfig::Basic,
            version: VersionSelection::Auto,
            provision: true,
            autodiscover: false,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Random 32 hex digit device id
pub fn generate_device_id() -> String {
    let value: u128 = rand::thread_rng().gen();
    format!("{:032x}", value)
}

/// Contents of the configuration file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub engine: EngineConfig,

    /// Map of account id to account configuration
    #[serde(default)]
    pub accounts: HashMap<String, AccountConfig>,
}

impl Settings {
    /// Load from the first existing default path, or defaults when none exists
    pub fn load() -> Result<Self, EasError> {
        for path in default_config_paths() {
            if path.exists() {
                info!("Found config at: {:?}", path);
                return Self::from_path(&path);
            }
        }

        info!("No config file found, using defaults");
        Ok(Self::default())
    }

    pub fn from_path(path: &Path) -> Result<Self, EasError> {
        info!("Loading configuration from: {:?}", path);

        let content = fs::read_to_string(path)
            .map_err(|e| EasError::Config(format!("Failed to read config: {}", e)))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, EasError> {
        toml::from_str(content)
            .map_err(|e| EasError::Config(format!("Failed to parse config: {}", e)))
    }

    pub fn account(&self, id: &str) -> Result<&AccountConfig, EasError> {
        self.accounts
            .get(id)
            .ok_or_else(|| EasError::Config(format!("Unknown account: {}", id)))
    }
}

/// Get default config paths
pub fn default_config_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    if let Some(config_dir) = dirs::config_dir() {
        paths.push(config_dir.join("eas-sync").join("config.toml"));
    }

    if let Some(home_dir) = dirs::home_dir() {
        paths.push(home_dir.join(".config").join("eas-sync").join("config.toml"));
        paths.push(home_dir.join(".eas-sync.toml"));
    }

    paths
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_settings() {
        let settings = Settings::from_toml(
            r#"
            [engine]
            max_upload_items = 20
            preferred_versions = ["14.1", "2.5"]

            [accounts.work]
            id = "work"
            user = "jdoe@example.com"
            host = "mail.example.com"
            version = "14.0"
            autodiscover = true

            [accounts.work.auth]
            type = "oauth2"
            token_url = "https://login.example.com/token"
            client_id = "abc"
            "#,
        )
        .unwrap();

        assert_eq!(settings.engine.max_upload_items, 20);
        assert_eq!(settings.engine.window_size, 50);
        assert_eq!(
            settings.engine.preferred_versions,
            vec![ProtocolVersion::V14_1, ProtocolVersion::V2_5]
        );

        let account = settings.account("work").unwrap();
        assert!(account.use_https);
        assert!(account.provision);
        assert!(account.autodiscover);
        assert_eq!(account.device_id.len(), 32);
        assert_eq!(account.version, VersionSelection::Fixed(ProtocolVersion::V14_0));
        assert!(matches!(
            account.auth,
            AuthConfig::OAuth2 { ref client_id, .. } if client_id == "abc"
        ));
    }

    #[test]
    fn test_unknown_version_is_rejected() {
        let result = Settings::from_toml(
            r#"
            [accounts.a]
            id = "a"
            user = "a@example.com"
            host = "example.com"
            version = "1.0"
            "#,
        );
        assert!(matches!(result, Err(EasError::Config(_))));
    }

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.password_prompt_budget, 3);
        assert_eq!(config.network_error_budget, 1);
        assert_eq!(config.options_cache_secs, 86_400);
        assert_eq!(config.token_grace_secs, 30);
        assert!(Settings::default().account("missing").is_err());
    }
}
