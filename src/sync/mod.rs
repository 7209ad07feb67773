//! ActiveSync account state machine
//!
//! One [`SyncEngine::sync_account`] call runs
//! `CheckOptions -> NegotiateVersion -> Provision -> FolderHierarchy -> FolderSync*`
//! for one account and returns a single terminal [`SyncStatus`]. Phases return
//! a [`Step`]; interruptions (`Reset`, `Terminal`, errors) are values switched
//! on by the loops in `engine` and `folder`, never unwound through panics.
//!
//! Features:
//! - Synckeys are persisted only after a response has been fully applied
//! - Upload batches shrink on unattributed rejections to isolate bad items
//! - Download-only folders revert local changes instead of uploading them
//! - Progress events on an optional flume channel

mod engine;
mod folder;
mod hierarchy;
mod options;
mod provision;
mod requests;
mod session;
mod upload;

pub use engine::SyncEngine;
pub use session::{next_batch_size, FolderStats, SyncSession};

use serde::{Deserialize, Serialize};

use crate::types::error::EasError;
use crate::types::SyncStatus;

/// How much state a reset throws away
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResetScope {
    /// The current folder's synckey and binding; the folder is re-run
    Folder,
    /// Every folder binding and the hierarchy synckey; the cycle is re-run
    Account,
    /// Nothing local; the cycle is re-run with updated connection state
    Connection,
}

/// Result of one settled phase or cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Continue,
    Reset(ResetScope),
    Terminal(SyncStatus),
}

/// Why a phase stopped early
#[derive(Debug)]
pub(crate) enum Interrupt {
    Reset(ResetScope),
    Terminal(SyncStatus),
    Error(EasError),
}

impl From<EasError> for Interrupt {
    fn from(err: EasError) -> Self {
        Interrupt::Error(err)
    }
}

pub(crate) type Step<T = ()> = std::result::Result<T, Interrupt>;

/// What started a sync
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncTrigger {
    Manual,
    /// Periodic or push-triggered; suppressed during a throttle cooldown
    Automatic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncPhase {
    CheckOptions,
    NegotiateVersion,
    Provision,
    FolderHierarchy,
    FolderSync,
    Done,
}

/// Event emitted by the sync engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SyncEvent {
    PhaseChanged {
        account_id: String,
        phase: SyncPhase,
    },
    FolderStarted {
        account_id: String,
        folder_id: String,
        name: String,
    },
    Estimate {
        account_id: String,
        folder_id: String,
        count: u32,
    },
    FolderFinished {
        account_id: String,
        folder_id: String,
        stats: FolderStats,
    },
    ItemFailed {
        account_id: String,
        folder_id: String,
        item_id: String,
        status: String,
    },
    Finished(SyncStatus),
}
