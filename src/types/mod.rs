//! Data structures shared across the engine

pub mod error;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::config::{AccountConfig, AuthConfig};
use error::EasError;

/// Synckey meaning "uninitialized, must bootstrap"
pub const INITIAL_SYNC_KEY: &str = "0";

/// ActiveSync protocol versions this engine can speak
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ProtocolVersion {
    #[serde(rename = "2.5")]
    V2_5,
    #[serde(rename = "12.0")]
    V12_0,
    #[serde(rename = "12.1")]
    V12_1,
    #[serde(rename = "14.0")]
    V14_0,
    #[serde(rename = "14.1")]
    V14_1,
    #[serde(rename = "16.0")]
    V16_0,
    #[serde(rename = "16.1")]
    V16_1,
}

impl ProtocolVersion {
    pub fn as_str(self) -> &'static str {
        match self {
            ProtocolVersion::V2_5 => "2.5",
            ProtocolVersion::V12_0 => "12.0",
            ProtocolVersion::V12_1 => "12.1",
            ProtocolVersion::V14_0 => "14.0",
            ProtocolVersion::V14_1 => "14.1",
            ProtocolVersion::V16_0 => "16.0",
            ProtocolVersion::V16_1 => "16.1",
        }
    }

    /// 2.5 servers need `<Class>` in Sync and GetItemEstimate collections
    pub fn is_legacy(self) -> bool {
        self == ProtocolVersion::V2_5
    }

    /// PolicyType sent in Provision requests
    pub fn policy_type(self) -> &'static str {
        if self.is_legacy() {
            "MS-WAP-Provisioning-XML"
        } else {
            "MS-EAS-Provisioning-WBXML"
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProtocolVersion {
    type Err = EasError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "2.5" => Ok(ProtocolVersion::V2_5),
            "12.0" => Ok(ProtocolVersion::V12_0),
            "12.1" => Ok(ProtocolVersion::V12_1),
            "14.0" => Ok(ProtocolVersion::V14_0),
            "14.1" => Ok(ProtocolVersion::V14_1),
            "16.0" => Ok(ProtocolVersion::V16_0),
            "16.1" => Ok(ProtocolVersion::V16_1),
            other => Err(EasError::NotSupported(format!("protocol version {}", other))),
        }
    }
}

/// How requests are authenticated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    Basic,
    OAuth2,
}

/// Connection and negotiation state of one account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountConnection {
    pub account_id: String,
    /// Value of the `User` query parameter
    pub user: String,
    /// Host (and optional port) of the ActiveSync endpoint
    pub host: String,
    pub use_https: bool,
    pub device_id: String,
    pub device_type: String,
    pub auth_mode: AuthMode,
    /// Version in use; only changed while negotiating
    pub version: Option<ProtocolVersion>,
    /// `MS-ASProtocolVersions` from the last OPTIONS request
    pub server_versions: Vec<String>,
    /// `MS-ASProtocolCommands` from the last OPTIONS request
    pub server_commands: Vec<String>,
    pub options_checked_at: Option<DateTime<Utc>>,
    /// Whether the server's policy requires provisioning
    pub provisioning: bool,
    pub policy_key: Option<String>,
    pub folder_sync_key: String,
    pub autodiscover: bool,
    /// Automatic syncs are suppressed until this time (status 110)
    pub no_autosync_until: Option<DateTime<Utc>>,
}

impl AccountConnection {
    /// Fresh connection state for a configured account
    pub fn from_config(config: &AccountConfig, device_type: &str) -> Self {
        let auth_mode = match config.auth {
            AuthConfig::Basic => AuthMode::Basic,
            AuthConfig::OAuth2 { .. } => AuthMode::OAuth2,
        };
        Self {
            account_id: config.id.clone(),
            user: config.user.clone(),
            host: config.host.clone(),
            use_https: config.use_https,
            device_id: config.device_id.clone(),
            device_type: device_type.to_string(),
            auth_mode,
            version: None,
            server_versions: Vec::new(),
            server_commands: Vec::new(),
            options_checked_at: None,
            provisioning: config.provision,
            policy_key: None,
            folder_sync_key: INITIAL_SYNC_KEY.to_string(),
            autodiscover: config.autodiscover,
            no_autosync_until: None,
        }
    }

    /// `<scheme>://<host>/Microsoft-Server-ActiveSync`
    pub fn endpoint(&self) -> String {
        let scheme = if self.use_https { "https" } else { "http" };
        format!("{}://{}/Microsoft-Server-ActiveSync", scheme, self.host)
    }

    pub fn supports_command(&self, command: &str) -> bool {
        self.server_commands.iter().any(|c| c == command)
    }

    /// The account's email address, used for autodiscover
    pub fn email(&self) -> &str {
        &self.user
    }
}

/// Local classification of a server folder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FolderType {
    Contact,
    Event,
    Task,
    Trash,
    Other,
}

impl FolderType {
    /// Map a FolderHierarchy `Type` value
    pub fn from_code(code: u32) -> Self {
        match code {
            8 | 13 => FolderType::Event,
            7 | 15 => FolderType::Task,
            9 | 14 => FolderType::Contact,
            4 => FolderType::Trash,
            _ => FolderType::Other,
        }
    }

    /// `<Class>` value sent to 2.5 servers
    pub fn class(self) -> Option<&'static str> {
        match self {
            FolderType::Contact => Some("Contacts"),
            FolderType::Event => Some("Calendar"),
            FolderType::Task => Some("Tasks"),
            FolderType::Trash | FolderType::Other => None,
        }
    }

    /// Whether items of this folder are synchronized at all
    pub fn is_syncable(self) -> bool {
        self.class().is_some()
    }
}

/// A server folder as known locally
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Folder {
    pub server_id: String,
    pub parent_id: String,
    pub display_name: String,
    pub folder_type: FolderType,
    /// Raw FolderHierarchy type value
    pub type_code: u32,
    pub sync_key: String,
    /// Local changes are reverted instead of uploaded
    pub download_only: bool,
    /// Folder is selected for synchronization
    pub selected: bool,
    pub color: Option<String>,
    pub custom_name: Option<String>,
}

impl Folder {
    pub fn new(server_id: &str, parent_id: &str, display_name: &str, type_code: u32) -> Self {
        let folder_type = FolderType::from_code(type_code);
        Self {
            server_id: server_id.to_string(),
            parent_id: parent_id.to_string(),
            display_name: display_name.to_string(),
            folder_type,
            type_code,
            sync_key: INITIAL_SYNC_KEY.to_string(),
            download_only: false,
            selected: folder_type.is_syncable(),
            color: None,
            custom_name: None,
        }
    }

    pub fn needs_bootstrap(&self) -> bool {
        self.sync_key.is_empty() || self.sync_key == INITIAL_SYNC_KEY
    }

    /// Name shown to the user
    pub fn name(&self) -> &str {
        self.custom_name.as_deref().unwrap_or(&self.display_name)
    }
}

/// An item in a target store, with protocol fields keyed by tag path
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub fields: BTreeMap<String, String>,
}

impl Item {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
}

/// Who made a change; server-made changes are never uploaded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOrigin {
    User,
    Server,
}

/// A pending local mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeLogEntry {
    pub item_id: String,
    pub kind: ChangeKind,
    pub origin: ChangeOrigin,
}

/// One request/response exchange, kept for diagnostics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestRecord {
    pub command: String,
    pub url: String,
    pub started_at: DateTime<Utc>,
    pub http_status: Option<u16>,
    /// XML rendering of the request body
    pub request: String,
    /// XML rendering of the decoded response, if any
    pub response: Option<String>,
    pub elapsed_ms: u64,
}

/// Terminal status of one account sync attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatus {
    /// Machine-readable code; `"ok"` on success
    pub code: String,
    pub detail: Option<String>,
    pub transcript: Vec<RequestRecord>,
}

impl SyncStatus {
    pub fn ok() -> Self {
        Self::new("ok", None)
    }

    pub fn new(code: impl Into<String>, detail: Option<String>) -> Self {
        Self {
            code: code.into(),
            detail,
            transcript: Vec::new(),
        }
    }

    pub fn from_error(err: &EasError) -> Self {
        Self::new(err.code(), Some(err.to_string()))
    }

    pub fn is_ok(&self) -> bool {
        self.code == "ok"
    }
}
