//! Storage collaborators of the engine
//!
//! The engine never touches storage directly. Items live in a per-folder
//! [`TargetStore`], bindings are opened through a [`TargetProvider`], and
//! account and folder state goes to a [`StateStore`]. Implementations must
//! serialize their own writes; several accounts may sync concurrently.

mod mapper;
mod memory;

pub use mapper::{default_page, FlatMapper, ItemMapper};
pub use memory::{MemoryStateStore, MemoryTargetProvider, MemoryTargetStore};

use std::sync::Arc;

use crate::types::error::Result;
use crate::types::{AccountConnection, ChangeLogEntry, ChangeOrigin, Folder, Item};

/// Items of one folder plus the log of pending local mutations
pub trait TargetStore: Send + Sync {
    fn get_item(&self, id: &str) -> Result<Option<Item>>;

    fn add_item(&self, item: Item, origin: ChangeOrigin) -> Result<()>;

    /// Replace `old` with `item`; the ids differ when a server id is assigned
    fn modify_item(&self, item: Item, old: &Item, origin: ChangeOrigin) -> Result<()>;

    fn delete_item(&self, item: &Item, origin: ChangeOrigin) -> Result<()>;

    /// Pending entries in queue order, at most `limit` of them
    fn change_log_entries(&self, limit: Option<usize>) -> Result<Vec<ChangeLogEntry>>;

    /// Drop an entry, or move it to the end of the queue when `requeue` is set
    fn remove_change_log_entry(&self, id: &str, requeue: bool) -> Result<()>;
}

/// Binds server folders to target stores
pub trait TargetProvider: Send + Sync {
    fn open_target(&self, folder: &Folder) -> Result<Arc<dyn TargetStore>>;

    /// Drop the folder's binding together with all of its items
    fn discard_target(&self, folder: &Folder) -> Result<()>;
}

/// Persistent account and folder state
pub trait StateStore: Send + Sync {
    fn load_account(&self, account_id: &str) -> Result<Option<AccountConnection>>;

    fn persist_account(&self, conn: &AccountConnection) -> Result<()>;

    fn load_folders(&self, account_id: &str) -> Result<Vec<Folder>>;

    fn persist_folder(&self, account_id: &str, folder: &Folder) -> Result<()>;

    fn remove_folder(&self, account_id: &str, server_id: &str) -> Result<()>;

    /// Folder last seen with this server id, kept across deletes
    fn cached_folder(&self, account_id: &str, server_id: &str) -> Result<Option<Folder>>;

    fn cache_folder(&self, account_id: &str, folder: &Folder) -> Result<()>;
}
