use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::requests;
use super::{Interrupt, ResetScope, Step, SyncEngine, SyncEvent, SyncSession};
use crate::status::{StatusAction, StatusPolicy};
use crate::store::TargetStore;
use crate::transport::RequestOptions;
use crate::types::error::{EasError, Result};
use crate::types::{ChangeKind, ChangeLogEntry, ChangeOrigin, Folder, ProtocolVersion};
use crate::wbxml::Element;

impl SyncEngine {
    /// Drain the change log in batches.
    ///
    /// A rejected multi-item batch shrinks the next one; a rejected single
    /// item is quarantined for the rest of this attempt. Entries leave the
    /// log only after the synckey that acknowledges them is stored.
    pub(super) async fn upload(
        &mut self,
        folder: &mut Folder,
        target: &Arc<dyn TargetStore>,
        session: &mut SyncSession,
    ) -> Step {
        let version = self.version()?;

        loop {
            let batch: Vec<ChangeLogEntry> = pending_changes(target.as_ref(), session)?
                .into_iter()
                .take(session.batch_size)
                .collect();
            if batch.is_empty() {
                return Ok(());
            }

            let mut commands = Vec::new();
            let mut sent = Vec::new();
            for entry in batch {
                match self.upload_command(folder, target.as_ref(), &entry, version)? {
                    Some(command) => {
                        commands.push(command);
                        sent.push(entry);
                    }
                    None => {
                        debug!("Item {} vanished, dropping its change", entry.item_id);
                        target.remove_change_log_entry(&entry.item_id, false)?;
                    }
                }
            }
            if sent.is_empty() {
                continue;
            }

            info!(
                "Uploading {} changes of folder {}",
                sent.len(),
                folder.server_id
            );
            session.in_flight = sent.iter().map(|entry| entry.item_id.clone()).collect();
            let request = requests::sync_upload(folder, &session.sync_key, version, commands);
            let response = self.exchange(&request).await?;

            let classification = StatusPolicy::evaluate(
                &response,
                "Sync.Collections.Collection.Status",
                self.config.upload_soft_fail,
            );
            let key = classification.key.clone();
            if self.check_status(classification)? == StatusAction::SoftFail {
                self.isolate(folder, target.as_ref(), session, &sent, &key)?;
                session.in_flight.clear();
                continue;
            }

            let collection = response
                .at("Sync.Collections.Collection")
                .ok_or_else(|| EasError::MissingField("Sync.Collections.Collection".to_string()))?;
            let sync_key = collection
                .find("SyncKey")
                .map(Element::text)
                .ok_or_else(|| {
                    EasError::MissingField("Sync.Collections.Collection.SyncKey".to_string())
                })?;

            self.apply_commands(folder, target, session, collection)?;
            let rejected = self.apply_responses(folder, target.as_ref(), session, collection)?;
            self.commit_sync_key(folder, session, sync_key)?;

            for entry in &sent {
                if rejected.contains(&entry.item_id) {
                    continue;
                }
                target.remove_change_log_entry(&entry.item_id, false)?;
                session.stats.uploaded += 1;
            }
            session.in_flight.clear();
        }
    }

    fn upload_command(
        &self,
        folder: &Folder,
        target: &dyn TargetStore,
        entry: &ChangeLogEntry,
        version: ProtocolVersion,
    ) -> Result<Option<Element>> {
        if entry.kind == ChangeKind::Deleted {
            return Ok(Some(requests::upload_delete(&entry.item_id)));
        }

        let Some(item) = target.get_item(&entry.item_id)? else {
            return Ok(None);
        };
        let data = self.mapper.to_application_data(folder, &item, version)?;
        Ok(Some(match entry.kind {
            ChangeKind::Added => requests::upload_add(&item.id, data),
            _ => requests::upload_change(&item.id, data),
        }))
    }

    /// The server refused the whole batch without naming an item
    fn isolate(
        &self,
        folder: &Folder,
        target: &dyn TargetStore,
        session: &mut SyncSession,
        batch: &[ChangeLogEntry],
        status: &str,
    ) -> Result<()> {
        match batch {
            [entry] => {
                warn!(
                    "Server rejected item {} of folder {} ({})",
                    entry.item_id, folder.server_id, status
                );
                target.remove_change_log_entry(&entry.item_id, true)?;
                self.quarantine(folder, session, &entry.item_id, status);
            }
            _ => {
                session.shrink(batch.len());
                info!(
                    "Batch of {} rejected in folder {} ({}), retrying with {}",
                    batch.len(),
                    folder.server_id,
                    status,
                    session.batch_size
                );
            }
        }
        Ok(())
    }

    fn quarantine(&self, folder: &Folder, session: &mut SyncSession, item_id: &str, status: &str) {
        session.quarantine(item_id);
        self.emit(SyncEvent::ItemFailed {
            account_id: self.conn.account_id.clone(),
            folder_id: folder.server_id.clone(),
            item_id: item_id.to_string(),
            status: status.to_string(),
        });
    }

    /// Per-item results; returns the ids the server refused
    fn apply_responses(
        &self,
        folder: &Folder,
        target: &dyn TargetStore,
        session: &mut SyncSession,
        collection: &Element,
    ) -> Result<HashSet<String>> {
        let mut rejected = HashSet::new();
        let Some(responses) = collection.find("Responses") else {
            return Ok(rejected);
        };

        for response in responses.elements() {
            let status = response
                .find("Status")
                .map(|status| status.text().trim().to_string())
                .unwrap_or_else(|| "1".to_string());
            let id_tag = if response.name == "Add" { "ClientId" } else { "ServerId" };
            let Some(item_id) = response.find(id_tag).map(Element::text) else {
                continue;
            };

            match status.as_str() {
                "1" => {
                    let server_id = response.find("ServerId").map(Element::text);
                    if let (true, Some(server_id)) = (response.name == "Add", server_id) {
                        if let Some(old) = target.get_item(&item_id)? {
                            debug!("Item {} is {} on the server", item_id, server_id);
                            let mut renamed = old.clone();
                            renamed.id = server_id;
                            target.modify_item(renamed, &old, ChangeOrigin::Server)?;
                        }
                    }
                }
                "7" | "9" => debug!("Item {} answered with status {}", item_id, status),
                code => {
                    let key = format!("Sync.{}", code);
                    warn!(
                        "Server refused {} of item {} ({})",
                        response.name, item_id, key
                    );
                    target.remove_change_log_entry(&item_id, true)?;
                    self.quarantine(folder, session, &item_id, &key);
                    rejected.insert(item_id);
                }
            }
        }

        Ok(rejected)
    }

    /// Undo local changes of a download-only folder
    pub(super) async fn revert(&mut self, folder: &Folder, target: &Arc<dyn TargetStore>) -> Step {
        let mut fetch = Vec::new();
        for entry in target.change_log_entries(None)? {
            match (entry.origin, entry.kind) {
                (ChangeOrigin::Server, _) => {}
                (ChangeOrigin::User, ChangeKind::Added) => {
                    if let Some(item) = target.get_item(&entry.item_id)? {
                        target.delete_item(&item, ChangeOrigin::Server)?;
                    }
                }
                (ChangeOrigin::User, _) => {
                    fetch.push(entry.item_id);
                    continue;
                }
            }
            target.remove_change_log_entry(&entry.item_id, false)?;
        }

        if fetch.is_empty() {
            return Ok(());
        }
        info!(
            "Restoring {} items of download-only folder {}",
            fetch.len(),
            folder.server_id
        );

        if self.version()?.is_legacy() || !self.conn.supports_command("ItemOperations") {
            info!("Server cannot fetch by id, resetting folder {}", folder.server_id);
            return Err(Interrupt::Reset(ResetScope::Folder));
        }

        let request = requests::item_fetch(folder, &fetch, &self.config);
        let response = match self
            .send(&request, RequestOptions::default().soft_fail())
            .await
        {
            Ok(Some(response)) => response,
            Ok(None) => return Err(Interrupt::Reset(ResetScope::Folder)),
            Err(Interrupt::Error(e)) if e != EasError::Cancelled => {
                warn!("Fetch for folder {} failed: {}", folder.server_id, e);
                return Err(Interrupt::Reset(ResetScope::Folder));
            }
            Err(other) => return Err(other),
        };

        let status = StatusPolicy::evaluate(&response, "ItemOperations.Status", true);
        if !status.is_continue() {
            warn!("Fetch for folder {} refused: {}", folder.server_id, status);
            return Err(Interrupt::Reset(ResetScope::Folder));
        }

        let mut restored = HashSet::new();
        for fetched in response.all_at("ItemOperations.Response.Fetch") {
            let fetched_status = fetched.find("Status").map(|s| s.text().trim().to_string());
            let server_id = fetched.find("ServerId").map(Element::text);
            let properties = fetched.find("Properties");
            let (Some("1"), Some(server_id), Some(properties)) =
                (fetched_status.as_deref(), server_id, properties)
            else {
                warn!("Incomplete fetch result in folder {}", folder.server_id);
                return Err(Interrupt::Reset(ResetScope::Folder));
            };

            let item = self
                .mapper
                .from_application_data(folder, &server_id, properties)?;
            match target.get_item(&server_id)? {
                Some(old) => target.modify_item(item, &old, ChangeOrigin::Server)?,
                None => target.add_item(item, ChangeOrigin::Server)?,
            }
            target.remove_change_log_entry(&server_id, false)?;
            restored.insert(server_id);
        }

        if fetch.iter().any(|id| !restored.contains(id)) {
            warn!("Server did not return every item of folder {}", folder.server_id);
            return Err(Interrupt::Reset(ResetScope::Folder));
        }
        Ok(())
    }
}

/// User changes not yet uploaded or quarantined. Server-origin entries are
/// dropped on the way.
fn pending_changes(target: &dyn TargetStore, session: &SyncSession) -> Result<Vec<ChangeLogEntry>> {
    let mut pending = Vec::new();
    for entry in target.change_log_entries(None)? {
        if entry.origin == ChangeOrigin::Server {
            target.remove_change_log_entry(&entry.item_id, false)?;
            continue;
        }
        if !session.is_failed(&entry.item_id) {
            pending.push(entry);
        }
    }
    Ok(pending)
}
