//! eas-sync - Exchange ActiveSync client engine
//!
//! Synchronizes contacts, calendars and tasks of an ActiveSync account
//! with local stores supplied by the embedding application.
//!
//! ## Module Organization
//!
//! - `wbxml/`: WBXML codec and the ActiveSync code pages
//! - `transport/`: HTTP exchange, authentication and retry handling
//! - `status/`: Classification of protocol status codes
//! - `sync/`: Per-account sync state machine
//! - `store/`: Storage traits, item mapping and in-memory stores
//! - `autodiscovery/`: Server discovery from an email address
//! - `config/`: Engine and account configuration
//! - `credentials/`: Credential storage and prompting
//! - `oauth/`: OAuth2 token refresh
//! - `types/`: Shared data structures and errors

pub mod autodiscovery;
pub mod config;
pub mod credentials;
pub mod oauth;
pub mod status;
pub mod store;
pub mod sync;
pub mod transport;
pub mod types;
pub mod wbxml;

#[cfg(test)]
mod testing;

pub use config::{AccountConfig, AuthConfig, EngineConfig, Settings, VersionSelection};
pub use store::{ItemMapper, StateStore, TargetProvider, TargetStore};
pub use sync::{SyncEngine, SyncEvent, SyncPhase, SyncTrigger};
pub use types::error::{EasError, Result};
pub use types::{Folder, Item, ProtocolVersion, SyncStatus};

use tracing_subscriber::EnvFilter;

/// Install a `tracing` subscriber for applications embedding the engine.
///
/// Debug builds log this crate at debug level and everything else at info.
/// `RUST_LOG` overrides both. Does nothing if a subscriber is already set.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cfg!(debug_assertions) {
            EnvFilter::new("eas_sync=debug,info")
        } else {
            EnvFilter::new("info")
        }
    });

    if tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .is_ok()
    {
        tracing::info!("Logging initialized");
    }
}
