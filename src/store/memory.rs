use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, RwLock};
use tracing::debug;

use super::{StateStore, TargetProvider, TargetStore};
use crate::types::error::{EasError, Result};
use crate::types::{AccountConnection, ChangeKind, ChangeLogEntry, ChangeOrigin, Folder, Item};

fn lock_error(e: impl std::fmt::Display) -> EasError {
    EasError::Store(format!("lock poisoned: {}", e))
}

#[derive(Default)]
struct TargetInner {
    items: BTreeMap<String, Item>,
    log: VecDeque<ChangeLogEntry>,
    failing: HashSet<String>,
}

impl TargetInner {
    fn check(&self, id: &str) -> Result<()> {
        if self.failing.contains(id) {
            return Err(EasError::Store(format!("cannot store item {}", id)));
        }
        Ok(())
    }

    fn log(&mut self, item_id: &str, kind: ChangeKind, origin: ChangeOrigin) {
        let position = self.log.iter().position(|entry| entry.item_id == item_id);
        let Some(index) = position else {
            self.log.push_back(ChangeLogEntry {
                item_id: item_id.to_string(),
                kind,
                origin,
            });
            return;
        };

        let existing = &self.log[index];
        if existing.origin == ChangeOrigin::User
            && origin == ChangeOrigin::User
            && existing.kind == ChangeKind::Added
        {
            // the server never saw it
            if kind == ChangeKind::Deleted {
                self.log.remove(index);
            }
            return;
        }

        self.log[index] = ChangeLogEntry {
            item_id: item_id.to_string(),
            kind,
            origin,
        };
    }
}

/// In-memory [`TargetStore`]
#[derive(Default)]
pub struct MemoryTargetStore {
    inner: RwLock<TargetInner>,
}

impl MemoryTargetStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn items(&self) -> Vec<Item> {
        self.inner
            .read()
            .map(|inner| inner.items.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|inner| inner.items.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Make every write touching `id` fail
    #[cfg(test)]
    pub(crate) fn fail_on(&self, id: &str) {
        if let Ok(mut inner) = self.inner.write() {
            inner.failing.insert(id.to_string());
        }
    }
}

impl TargetStore for MemoryTargetStore {
    fn get_item(&self, id: &str) -> Result<Option<Item>> {
        let inner = self.inner.read().map_err(lock_error)?;
        Ok(inner.items.get(id).cloned())
    }

    fn add_item(&self, item: Item, origin: ChangeOrigin) -> Result<()> {
        let mut inner = self.inner.write().map_err(lock_error)?;
        inner.check(&item.id)?;
        if inner.items.contains_key(&item.id) {
            return Err(EasError::Store(format!("item {} already exists", item.id)));
        }
        inner.log(&item.id, ChangeKind::Added, origin);
        inner.items.insert(item.id.clone(), item);
        Ok(())
    }

    fn modify_item(&self, item: Item, old: &Item, origin: ChangeOrigin) -> Result<()> {
        let mut inner = self.inner.write().map_err(lock_error)?;
        inner.check(&item.id)?;
        if inner.items.remove(&old.id).is_none() {
            return Err(EasError::Store(format!("item {} not found", old.id)));
        }
        inner.log(&item.id, ChangeKind::Modified, origin);
        inner.items.insert(item.id.clone(), item);
        Ok(())
    }

    fn delete_item(&self, item: &Item, origin: ChangeOrigin) -> Result<()> {
        let mut inner = self.inner.write().map_err(lock_error)?;
        inner.check(&item.id)?;
        if inner.items.remove(&item.id).is_none() {
            return Err(EasError::Store(format!("item {} not found", item.id)));
        }
        inner.log(&item.id, ChangeKind::Deleted, origin);
        Ok(())
    }

    fn change_log_entries(&self, limit: Option<usize>) -> Result<Vec<ChangeLogEntry>> {
        let inner = self.inner.read().map_err(lock_error)?;
        let limit = limit.unwrap_or(usize::MAX);
        Ok(inner.log.iter().take(limit).cloned().collect())
    }

    fn remove_change_log_entry(&self, id: &str, requeue: bool) -> Result<()> {
        let mut inner = self.inner.write().map_err(lock_error)?;
        let Some(index) = inner.log.iter().position(|entry| entry.item_id == id) else {
            return Ok(());
        };
        if let Some(entry) = inner.log.remove(index) {
            if requeue {
                inner.log.push_back(entry);
            }
        }
        Ok(())
    }
}

/// Hands out one [`MemoryTargetStore`] per folder server id
#[derive(Default)]
pub struct MemoryTargetProvider {
    targets: RwLock<HashMap<String, Arc<MemoryTargetStore>>>,
}

impl MemoryTargetProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// The store bound to a folder, creating it when missing
    pub fn target(&self, server_id: &str) -> Arc<MemoryTargetStore> {
        if let Ok(targets) = self.targets.read() {
            if let Some(target) = targets.get(server_id) {
                return target.clone();
            }
        }
        match self.targets.write() {
            Ok(mut targets) => targets
                .entry(server_id.to_string())
                .or_insert_with(|| Arc::new(MemoryTargetStore::new()))
                .clone(),
            Err(_) => Arc::new(MemoryTargetStore::new()),
        }
    }

    pub fn has_target(&self, server_id: &str) -> bool {
        self.targets
            .read()
            .map(|targets| targets.contains_key(server_id))
            .unwrap_or(false)
    }
}

impl TargetProvider for MemoryTargetProvider {
    fn open_target(&self, folder: &Folder) -> Result<Arc<dyn TargetStore>> {
        Ok(self.target(&folder.server_id))
    }

    fn discard_target(&self, folder: &Folder) -> Result<()> {
        let mut targets = self.targets.write().map_err(lock_error)?;
        targets.remove(&folder.server_id);
        debug!("Discarded target of folder {}", folder.server_id);
        Ok(())
    }
}

#[derive(Default)]
struct StateInner {
    accounts: HashMap<String, AccountConnection>,
    folders: HashMap<String, BTreeMap<String, Folder>>,
    cache: HashMap<String, HashMap<String, Folder>>,
}

/// In-memory [`StateStore`]
#[derive(Default)]
pub struct MemoryStateStore {
    inner: RwLock<StateInner>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn folder(&self, account_id: &str, server_id: &str) -> Option<Folder> {
        self.inner.read().ok().and_then(|inner| {
            inner
                .folders
                .get(account_id)
                .and_then(|folders| folders.get(server_id))
                .cloned()
        })
    }
}

impl StateStore for MemoryStateStore {
    fn load_account(&self, account_id: &str) -> Result<Option<AccountConnection>> {
        let inner = self.inner.read().map_err(lock_error)?;
        Ok(inner.accounts.get(account_id).cloned())
    }

    fn persist_account(&self, conn: &AccountConnection) -> Result<()> {
        let mut inner = self.inner.write().map_err(lock_error)?;
        inner.accounts.insert(conn.account_id.clone(), conn.clone());
        Ok(())
    }

    fn load_folders(&self, account_id: &str) -> Result<Vec<Folder>> {
        let inner = self.inner.read().map_err(lock_error)?;
        Ok(inner
            .folders
            .get(account_id)
            .map(|folders| folders.values().cloned().collect())
            .unwrap_or_default())
    }

    fn persist_folder(&self, account_id: &str, folder: &Folder) -> Result<()> {
        let mut inner = self.inner.write().map_err(lock_error)?;
        inner
            .folders
            .entry(account_id.to_string())
            .or_default()
            .insert(folder.server_id.clone(), folder.clone());
        Ok(())
    }

    fn remove_folder(&self, account_id: &str, server_id: &str) -> Result<()> {
        let mut inner = self.inner.write().map_err(lock_error)?;
        if let Some(folders) = inner.folders.get_mut(account_id) {
            folders.remove(server_id);
        }
        Ok(())
    }

    fn cached_folder(&self, account_id: &str, server_id: &str) -> Result<Option<Folder>> {
        let inner = self.inner.read().map_err(lock_error)?;
        Ok(inner
            .cache
            .get(account_id)
            .and_then(|cache| cache.get(server_id))
            .cloned())
    }

    fn cache_folder(&self, account_id: &str, folder: &Folder) -> Result<()> {
        let mut inner = self.inner.write().map_err(lock_error)?;
        inner
            .cache
            .entry(account_id.to_string())
            .or_default()
            .insert(folder.server_id.clone(), folder.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, kind: ChangeKind, origin: ChangeOrigin) -> ChangeLogEntry {
        ChangeLogEntry {
            item_id: id.to_string(),
            kind,
            origin,
        }
    }

    #[test]
    fn test_user_changes_are_logged_in_order() {
        let store = MemoryTargetStore::new();
        store.add_item(Item::new("a"), ChangeOrigin::User).unwrap();
        store.add_item(Item::new("b"), ChangeOrigin::User).unwrap();

        let entries = store.change_log_entries(Some(1)).unwrap();
        assert_eq!(entries, vec![entry("a", ChangeKind::Added, ChangeOrigin::User)]);
        assert_eq!(store.change_log_entries(None).unwrap().len(), 2);
    }

    #[test]
    fn test_edit_of_unsent_add_stays_add() {
        let store = MemoryTargetStore::new();
        let item = Item::new("a");
        store.add_item(item.clone(), ChangeOrigin::User).unwrap();
        store
            .modify_item(item.clone().with_field("Subject", "x"), &item, ChangeOrigin::User)
            .unwrap();
        assert_eq!(
            store.change_log_entries(None).unwrap(),
            vec![entry("a", ChangeKind::Added, ChangeOrigin::User)]
        );

        store.delete_item(&item, ChangeOrigin::User).unwrap();
        assert!(store.change_log_entries(None).unwrap().is_empty());
        assert!(store.is_empty());
    }

    #[test]
    fn test_server_writes_are_tagged() {
        let store = MemoryTargetStore::new();
        store.add_item(Item::new("s1"), ChangeOrigin::Server).unwrap();
        assert_eq!(
            store.change_log_entries(None).unwrap(),
            vec![entry("s1", ChangeKind::Added, ChangeOrigin::Server)]
        );
    }

    #[test]
    fn test_duplicate_add_is_rejected() {
        let store = MemoryTargetStore::new();
        store.add_item(Item::new("a"), ChangeOrigin::Server).unwrap();
        assert!(store.add_item(Item::new("a"), ChangeOrigin::Server).is_err());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_requeue_moves_entry_to_end() {
        let store = MemoryTargetStore::new();
        for id in ["a", "b", "c"] {
            store.add_item(Item::new(id), ChangeOrigin::User).unwrap();
        }
        store.remove_change_log_entry("a", true).unwrap();
        store.remove_change_log_entry("b", false).unwrap();
        let ids: Vec<String> = store
            .change_log_entries(None)
            .unwrap()
            .into_iter()
            .map(|e| e.item_id)
            .collect();
        assert_eq!(ids, vec!["c", "a"]);
    }

    #[test]
    fn test_modify_can_rename() {
        let store = MemoryTargetStore::new();
        let local = Item::new("local-1").with_field("Subject", "x");
        store.add_item(local.clone(), ChangeOrigin::User).unwrap();
        let mut renamed = local.clone();
        renamed.id = "7:1".to_string();
        store.modify_item(renamed, &local, ChangeOrigin::Server).unwrap();

        assert!(store.get_item("local-1").unwrap().is_none());
        assert_eq!(store.get_item("7:1").unwrap().unwrap().field("Subject"), Some("x"));
    }

    #[test]
    fn test_provider_discard() {
        let provider = MemoryTargetProvider::new();
        let folder = Folder::new("2", "0", "Calendar", 8);
        let target = provider.open_target(&folder).unwrap();
        target.add_item(Item::new("a"), ChangeOrigin::Server).unwrap();
        assert!(provider.has_target("2"));

        provider.discard_target(&folder).unwrap();
        assert!(!provider.has_target("2"));
        assert!(provider.target("2").is_empty());
    }

    #[test]
    fn test_state_store_folders_and_cache() {
        let state = MemoryStateStore::new();
        let mut folder = Folder::new("2", "0", "Calendar", 8);
        folder.color = Some("#ff0000".to_string());
        state.persist_folder("acc", &folder).unwrap();
        state.cache_folder("acc", &folder).unwrap();

        state.remove_folder("acc", "2").unwrap();
        assert!(state.load_folders("acc").unwrap().is_empty());
        assert_eq!(
            state.cached_folder("acc", "2").unwrap().unwrap().color.as_deref(),
            Some("#ff0000")
        );
    }
}
