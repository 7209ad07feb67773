use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::requests;
use super::{Interrupt, ResetScope, Step, SyncEngine, SyncEvent, SyncSession};
use crate::status::StatusPolicy;
use crate::store::TargetStore;
use crate::transport::RequestOptions;
use crate::types::error::{EasError, Result};
use crate::types::{ChangeKind, ChangeOrigin, Folder, Item, SyncStatus, INITIAL_SYNC_KEY};
use crate::wbxml::Element;

const COLLECTION_STATUS: &str = "Sync.Collections.Collection.Status";

fn missing(path: &str) -> EasError {
    EasError::MissingField(format!("Sync.Collections.Collection.{}", path))
}

/// A server command resolved against the target, not yet written
enum StagedWrite {
    Add(Item),
    Modify { item: Item, old: Item },
    Delete(Item),
}

impl SyncEngine {
    /// Sync one folder, re-running it after folder resets
    pub(super) async fn sync_folder(&mut self, mut folder: Folder) -> Step {
        let mut resets = 0;
        loop {
            match self.run_folder(&mut folder).await {
                Err(Interrupt::Reset(ResetScope::Folder)) => {
                    resets += 1;
                    if resets > self.config.folder_resync_limit {
                        return Err(Interrupt::Terminal(SyncStatus::new(
                            "resynclimit",
                            Some(format!("folder {} reset {} times", folder.server_id, resets - 1)),
                        )));
                    }
                    warn!(
                        "Resetting folder {} ({}/{})",
                        folder.server_id, resets, self.config.folder_resync_limit
                    );
                    self.reset_folder(&mut folder)?;
                }
                other => return other,
            }
        }
    }

    async fn run_folder(&mut self, folder: &mut Folder) -> Step {
        let target = self.targets.open_target(folder)?;
        let mut session =
            SyncSession::new(&folder.server_id, &folder.sync_key, self.config.max_upload_items);

        info!("Syncing folder {} ({})", folder.name(), folder.server_id);
        self.emit(SyncEvent::FolderStarted {
            account_id: self.conn.account_id.clone(),
            folder_id: folder.server_id.clone(),
            name: folder.name().to_string(),
        });

        if folder.needs_bootstrap() {
            self.bootstrap(folder, &mut session).await?;
        }
        if folder.download_only {
            self.revert(folder, &target).await?;
        }
        if self.config.estimate_items {
            self.estimate(folder, &mut session).await;
        }

        self.download(folder, &target, &mut session).await?;
        if !folder.download_only {
            self.upload(folder, &target, &mut session).await?;
        }

        debug!("Folder {} done: {:?}", folder.server_id, session.stats);
        self.emit(SyncEvent::FolderFinished {
            account_id: self.conn.account_id.clone(),
            folder_id: folder.server_id.clone(),
            stats: session.stats,
        });
        Ok(())
    }

    /// Throw away the folder's binding and synckey. Local additions the
    /// server never saw are carried over into the fresh binding.
    fn reset_folder(&mut self, folder: &mut Folder) -> Result<()> {
        let target = self.targets.open_target(folder)?;
        let mut preserved = Vec::new();
        if !folder.download_only {
            for entry in target.change_log_entries(None)? {
                if entry.origin == ChangeOrigin::User && entry.kind == ChangeKind::Added {
                    if let Some(item) = target.get_item(&entry.item_id)? {
                        preserved.push(item);
                    }
                }
            }
        }

        self.targets.discard_target(folder)?;
        let target = self.targets.open_target(folder)?;
        if !preserved.is_empty() {
            info!(
                "Keeping {} local additions of folder {}",
                preserved.len(),
                folder.server_id
            );
        }
        for item in preserved {
            target.add_item(item, ChangeOrigin::User)?;
        }

        folder.sync_key = INITIAL_SYNC_KEY.to_string();
        self.persist_folder(folder)
    }

    /// Request the first real synckey
    async fn bootstrap(&mut self, folder: &mut Folder, session: &mut SyncSession) -> Step {
        debug!("Requesting synckey for folder {}", folder.server_id);
        let request = requests::sync_bootstrap(folder, self.version()?);
        let response = self.exchange(&request).await?;
        self.check_status(StatusPolicy::evaluate(&response, COLLECTION_STATUS, false))?;

        let sync_key = response
            .text_at("Sync.Collections.Collection.SyncKey")
            .ok_or_else(|| missing("SyncKey"))?;
        self.commit_sync_key(folder, session, sync_key)?;
        Ok(())
    }

    /// Item count for progress reporting; failures are ignored
    async fn estimate(&mut self, folder: &Folder, session: &mut SyncSession) {
        if !self.conn.supports_command("GetItemEstimate") {
            return;
        }
        let Ok(version) = self.version() else {
            return;
        };

        let request = requests::item_estimate(folder, &session.sync_key, version, &self.config);
        let response = match self
            .send(&request, RequestOptions::allow_empty().soft_fail())
            .await
        {
            Ok(Some(response)) => response,
            Ok(None) => return,
            Err(Interrupt::Error(e)) => {
                debug!("Estimate for folder {} failed: {}", folder.server_id, e);
                return;
            }
            Err(_) => return,
        };

        let status = StatusPolicy::evaluate(&response, "GetItemEstimate.Response.Status", true);
        if !status.is_continue() {
            debug!("Estimate for folder {} skipped: {}", folder.server_id, status);
            return;
        }

        let count = response
            .text_at("GetItemEstimate.Response.Collection.Estimate")
            .and_then(|value| value.trim().parse::<u32>().ok());
        if let Some(count) = count {
            session.estimate = Some(count);
            self.emit(SyncEvent::Estimate {
                account_id: self.conn.account_id.clone(),
                folder_id: folder.server_id.clone(),
                count,
            });
        }
    }

    /// Fetch server changes until the server has no more
    async fn download(
        &mut self,
        folder: &mut Folder,
        target: &Arc<dyn TargetStore>,
        session: &mut SyncSession,
    ) -> Step {
        let version = self.version()?;
        loop {
            let request =
                requests::sync_download(folder, &session.sync_key, version, &self.config);
            let Some(response) = self.send(&request, RequestOptions::allow_empty()).await? else {
                debug!("No changes for folder {}", folder.server_id);
                return Ok(());
            };
            self.check_status(StatusPolicy::evaluate(&response, COLLECTION_STATUS, false))?;

            let Some(collection) = response.at("Sync.Collections.Collection") else {
                return Ok(());
            };
            let sync_key = collection
                .find("SyncKey")
                .map(Element::text)
                .ok_or_else(|| missing("SyncKey"))?;

            self.apply_commands(folder, target, session, collection)?;
            self.commit_sync_key(folder, session, sync_key)?;

            if collection.find("MoreAvailable").is_none() {
                return Ok(());
            }
        }
    }

    /// Apply server Add/Change/Delete commands; store writes are server-origin.
    ///
    /// Every command is mapped before the first write, so a malformed
    /// command leaves the target and its change log untouched.
    pub(super) fn apply_commands(
        &self,
        folder: &Folder,
        target: &Arc<dyn TargetStore>,
        session: &mut SyncSession,
        collection: &Element,
    ) -> Result<()> {
        let Some(commands) = collection.find("Commands") else {
            return Ok(());
        };

        let writes = self.stage_commands(folder, target.as_ref(), commands)?;
        for write in writes {
            match write {
                StagedWrite::Add(item) => {
                    target.add_item(item, ChangeOrigin::Server)?;
                    session.stats.added += 1;
                }
                StagedWrite::Modify { item, old } => {
                    target.modify_item(item, &old, ChangeOrigin::Server)?;
                    session.stats.changed += 1;
                }
                StagedWrite::Delete(old) => {
                    target.delete_item(&old, ChangeOrigin::Server)?;
                    session.stats.deleted += 1;
                }
            }
        }

        Ok(())
    }

    /// Turn commands into store writes, reading the target but not touching it
    fn stage_commands(
        &self,
        folder: &Folder,
        target: &dyn TargetStore,
        commands: &Element,
    ) -> Result<Vec<StagedWrite>> {
        // items as they will be once the earlier writes of this batch land
        let mut staged: HashMap<String, Option<Item>> = HashMap::new();
        let current = |staged: &HashMap<String, Option<Item>>, id: &str| match staged.get(id) {
            Some(item) => Ok(item.clone()),
            None => target.get_item(id),
        };

        let mut writes = Vec::new();
        for command in commands.elements() {
            let server_id = command
                .find("ServerId")
                .map(Element::text)
                .ok_or_else(|| missing(&format!("Commands.{}.ServerId", command.name)))?;

            match command.name.as_str() {
                "Add" => {
                    if current(&staged, &server_id)?.is_some() {
                        debug!("Item {} already present, skipping add", server_id);
                        continue;
                    }
                    let item = self.item_from(folder, &server_id, command)?;
                    staged.insert(server_id, Some(item.clone()));
                    writes.push(StagedWrite::Add(item));
                }
                "Change" => {
                    let item = self.item_from(folder, &server_id, command)?;
                    let write = match current(&staged, &server_id)? {
                        Some(old) => StagedWrite::Modify {
                            item: item.clone(),
                            old,
                        },
                        None => {
                            debug!("Change for unknown item {}, adding it", server_id);
                            StagedWrite::Add(item.clone())
                        }
                    };
                    staged.insert(server_id, Some(item));
                    writes.push(write);
                }
                "Delete" | "SoftDelete" => {
                    if let Some(old) = current(&staged, &server_id)? {
                        staged.insert(server_id, None);
                        writes.push(StagedWrite::Delete(old));
                    }
                }
                other => debug!("Ignoring {} command for {}", other, server_id),
            }
        }

        Ok(writes)
    }

    fn item_from(&self, folder: &Folder, server_id: &str, command: &Element) -> Result<Item> {
        let data = command
            .find("ApplicationData")
            .ok_or_else(|| missing(&format!("Commands.{}.ApplicationData", command.name)))?;
        self.mapper.from_application_data(folder, server_id, data)
    }

    /// Record a new synckey once everything before it has been applied
    pub(super) fn commit_sync_key(
        &self,
        folder: &mut Folder,
        session: &mut SyncSession,
        sync_key: String,
    ) -> Result<()> {
        debug!("Folder {} synckey now {}", folder.server_id, sync_key);
        folder.sync_key = sync_key.clone();
        session.sync_key = sync_key;
        self.persist_folder(folder)
    }
}

#[cfg(test)]
mod tests {
    use crate::store::TargetStore;
    use crate::sync::engine::harness::*;
    use crate::sync::{SyncEvent, SyncTrigger};
    use crate::testing::{eas_server, wbxml_response};
    use crate::transport::HttpResponse;
    use crate::types::{ChangeOrigin, Item};
    use crate::wbxml::{Element, Page};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    fn calendar_hierarchy() -> Element {
        folder_sync_ok("1", &[("2", "Calendar", 8)])
    }

    #[test_log::test(tokio::test)]
    async fn test_bootstrap_then_full_fetch() {
        let http = eas_server("14.0", |command, request| match command {
            "FolderSync" => Ok(wbxml_response(&calendar_hierarchy())),
            "Sync" => match collection_text(request, "SyncKey").as_deref() {
                Some("0") => {
                    assert!(!request.has("Sync.Collections.Collection.GetChanges"));
                    Ok(wbxml_response(&sync_response("2", "1", "1", vec![])))
                }
                Some("1") => Ok(wbxml_response(&sync_response(
                    "2",
                    "2",
                    "1",
                    vec![commands(vec![server_add("2:1", "Standup")])],
                ))),
                _ => Ok(HttpResponse::new(200)),
            },
            other => panic!("unexpected {}", other),
        });
        let mut h = harness(http);
        let events = h.engine.subscribe();

        let status = h.engine.sync_account(SyncTrigger::Manual).await;
        assert!(status.is_ok(), "{:?}", status);
        assert_eq!(h.http.commands(), vec!["FolderSync", "Sync", "Sync"]);

        let items = h.targets.target("2").items();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].field("Subject"), Some("Standup"));
        assert_eq!(h.state.folder("acc", "2").unwrap().sync_key, "2");
        // downloaded items are never queued for upload
        assert!(h.targets.target("2").change_log_entries(None).unwrap().is_empty());

        let finished = events.drain().find_map(|event| match event {
            SyncEvent::FolderFinished { stats, .. } => Some(stats),
            _ => None,
        });
        assert_eq!(finished.unwrap().added, 1);
    }

    fn add_on_page(server_id: &str, page: Page, field: &str, value: &str) -> Element {
        Element::new(Page::AirSync, "Add")
            .child(Element::with_text(Page::AirSync, "ServerId", server_id))
            .child(
                Element::new(Page::AirSync, "ApplicationData")
                    .child(Element::with_text(page, field, value)),
            )
    }

    /// A second Add for an id the store already holds leaves the first copy
    async fn assert_duplicate_add_skipped(type_code: u32, page: Page, field: &'static str) {
        let http = eas_server("14.0", move |command, request| match command {
            "FolderSync" => Ok(wbxml_response(&folder_sync_ok(
                "1",
                &[("2", "Collection", type_code)],
            ))),
            "Sync" => match collection_text(request, "SyncKey").as_deref() {
                Some("0") => Ok(wbxml_response(&sync_response("2", "1", "1", vec![]))),
                Some("1") => Ok(wbxml_response(&sync_response(
                    "2",
                    "2",
                    "1",
                    vec![commands(vec![
                        add_on_page("2:1", page, field, "Remote"),
                        add_on_page("2:1", page, field, "Remote again"),
                    ])],
                ))),
                _ => Ok(HttpResponse::new(200)),
            },
            other => panic!("unexpected {}", other),
        });
        let mut h = harness(http);
        h.targets
            .target("2")
            .add_item(Item::new("2:1").with_field(field, "Local"), ChangeOrigin::Server)
            .unwrap();

        let status = h.engine.sync_account(SyncTrigger::Manual).await;
        assert!(status.is_ok(), "type {}: {:?}", type_code, status);
        let items = h.targets.target("2").items();
        assert_eq!(items.len(), 1, "type {}", type_code);
        assert_eq!(items[0].field(field), Some("Local"), "type {}", type_code);
        assert_eq!(h.state.folder("acc", "2").unwrap().sync_key, "2");
    }

    #[test_log::test(tokio::test)]
    async fn test_duplicate_add_is_skipped() {
        assert_duplicate_add_skipped(8, Page::Calendar, "Subject").await;
    }

    #[test_log::test(tokio::test)]
    async fn test_duplicate_contact_add_is_skipped() {
        assert_duplicate_add_skipped(9, Page::Contacts, "FirstName").await;
    }

    #[test_log::test(tokio::test)]
    async fn test_duplicate_task_add_is_skipped() {
        assert_duplicate_add_skipped(7, Page::Tasks, "Subject").await;
    }

    #[test_log::test(tokio::test)]
    async fn test_synckey_unchanged_when_apply_fails() {
        let http = eas_server("14.0", |command, request| match command {
            "FolderSync" => Ok(wbxml_response(&calendar_hierarchy())),
            "Sync" => match collection_text(request, "SyncKey").as_deref() {
                Some("0") => Ok(wbxml_response(&sync_response("2", "1", "1", vec![]))),
                _ => Ok(wbxml_response(&sync_response(
                    "2",
                    "2",
                    "1",
                    vec![commands(vec![
                        server_add("2:1", "First"),
                        server_add("2:2", "Broken"),
                    ])],
                ))),
            },
            other => panic!("unexpected {}", other),
        });
        let mut h = harness(http);
        h.targets.target("2").fail_on("2:2");

        let status = h.engine.sync_account(SyncTrigger::Manual).await;
        assert_eq!(status.code, "store");
        assert_eq!(h.state.folder("acc", "2").unwrap().sync_key, "1");
    }

    #[test_log::test(tokio::test)]
    async fn test_malformed_command_writes_nothing() {
        let http = eas_server("14.0", |command, request| match command {
            "FolderSync" => Ok(wbxml_response(&calendar_hierarchy())),
            "Sync" => match collection_text(request, "SyncKey").as_deref() {
                Some("0") => Ok(wbxml_response(&sync_response("2", "1", "1", vec![]))),
                _ => Ok(wbxml_response(&sync_response(
                    "2",
                    "2",
                    "1",
                    vec![commands(vec![
                        server_add("2:1", "First"),
                        Element::new(Page::AirSync, "Change")
                            .child(Element::with_text(Page::AirSync, "ServerId", "2:1")),
                    ])],
                ))),
            },
            other => panic!("unexpected {}", other),
        });
        let mut h = harness(http);

        let status = h.engine.sync_account(SyncTrigger::Manual).await;
        assert_eq!(
            status.code,
            "wbxmlmissingfield::Sync.Collections.Collection.Commands.Change.ApplicationData"
        );
        let target = h.targets.target("2");
        assert!(target.is_empty());
        assert!(target.change_log_entries(None).unwrap().is_empty());
        assert_eq!(h.state.folder("acc", "2").unwrap().sync_key, "1");
    }

    #[test_log::test(tokio::test)]
    async fn test_change_after_add_in_one_batch() {
        let http = eas_server("14.0", |command, request| match command {
            "FolderSync" => Ok(wbxml_response(&calendar_hierarchy())),
            "Sync" => match collection_text(request, "SyncKey").as_deref() {
                Some("0") => Ok(wbxml_response(&sync_response("2", "1", "1", vec![]))),
                Some("1") => {
                    let mut change = server_add("2:1", "Renamed");
                    change.name = "Change".to_string();
                    Ok(wbxml_response(&sync_response(
                        "2",
                        "2",
                        "1",
                        vec![commands(vec![
                            server_add("2:1", "First"),
                            change,
                            server_add("2:2", "Gone"),
                            Element::new(Page::AirSync, "Delete")
                                .child(Element::with_text(Page::AirSync, "ServerId", "2:2")),
                        ])],
                    )))
                }
                _ => Ok(HttpResponse::new(200)),
            },
            other => panic!("unexpected {}", other),
        });
        let mut h = harness(http);

        let status = h.engine.sync_account(SyncTrigger::Manual).await;
        assert!(status.is_ok(), "{:?}", status);
        let items = h.targets.target("2").items();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].field("Subject"), Some("Renamed"));
    }

    #[test_log::test(tokio::test)]
    async fn test_invalid_synckey_resets_folder_once() {
        let invalid_sent = Arc::new(AtomicUsize::new(0));
        let counter = invalid_sent.clone();
        let http = eas_server("14.0", move |command, request| match command {
            "FolderSync" => Ok(wbxml_response(&calendar_hierarchy())),
            "Sync" if is_upload(request) => Ok(wbxml_response(&sync_response(
                "2",
                "2",
                "1",
                vec![responses(vec![add_response("local", "2:5", "1")])],
            ))),
            "Sync" => match collection_text(request, "SyncKey").as_deref() {
                Some("0") => Ok(wbxml_response(&sync_response("2", "1", "1", vec![]))),
                Some("1") if counter.fetch_add(1, Ordering::SeqCst) == 0 => {
                    Ok(wbxml_response(&sync_response("2", "1", "3", vec![])))
                }
                _ => Ok(HttpResponse::new(200)),
            },
            other => panic!("unexpected {}", other),
        });
        let mut h = harness(http);
        let target = h.targets.target("2");
        target
            .add_item(Item::new("stale"), ChangeOrigin::Server)
            .unwrap();
        target
            .add_item(
                Item::new("local").with_field("Subject", "Unsent"),
                ChangeOrigin::User,
            )
            .unwrap();

        let status = h.engine.sync_account(SyncTrigger::Manual).await;
        assert!(status.is_ok(), "{:?}", status);
        assert_eq!(invalid_sent.load(Ordering::SeqCst), 2);

        let keys: Vec<Option<String>> = h
            .http
            .requests()
            .iter()
            .filter_map(|request| crate::wbxml::decode(&request.body).ok().flatten())
            .filter(|tree| tree.name == "Sync" && !is_upload(tree))
            .map(|tree| collection_text(&tree, "SyncKey"))
            .collect();
        assert_eq!(
            keys,
            vec![
                Some("0".to_string()),
                Some("1".to_string()),
                Some("0".to_string()),
                Some("1".to_string())
            ]
        );

        // the binding was replaced, the unsent addition survived and was uploaded
        let fresh = h.targets.target("2");
        assert!(fresh.get_item("stale").unwrap().is_none());
        assert!(fresh.get_item("local").unwrap().is_none());
        assert_eq!(
            fresh.get_item("2:5").unwrap().unwrap().field("Subject"),
            Some("Unsent")
        );
        assert!(fresh.change_log_entries(None).unwrap().is_empty());
        assert_eq!(h.state.folder("acc", "2").unwrap().sync_key, "2");
    }

    #[test_log::test(tokio::test)]
    async fn test_folder_reset_limit() {
        let http = eas_server("14.0", |command, request| match command {
            "FolderSync" => Ok(wbxml_response(&calendar_hierarchy())),
            "Sync" => match collection_text(request, "SyncKey").as_deref() {
                Some("0") => Ok(wbxml_response(&sync_response("2", "1", "1", vec![]))),
                _ => Ok(wbxml_response(&sync_response("2", "1", "3", vec![]))),
            },
            other => panic!("unexpected {}", other),
        });
        let mut h = harness(http);

        let status = h.engine.sync_account(SyncTrigger::Manual).await;
        assert_eq!(status.code, "resynclimit");
        // four runs of bootstrap plus download
        assert_eq!(h.http.commands().len(), 1 + 4 * 2);
    }

    #[test_log::test(tokio::test)]
    async fn test_paged_download_and_estimate() {
        let seen_keys = Arc::new(Mutex::new(Vec::new()));
        let recorder = seen_keys.clone();
        let http = eas_server("14.0", move |command, request| match command {
            "FolderSync" => Ok(wbxml_response(&calendar_hierarchy())),
            "GetItemEstimate" => Ok(wbxml_response(
                &Element::new(Page::GetItemEstimate, "GetItemEstimate").child(
                    Element::new(Page::GetItemEstimate, "Response")
                        .child(Element::with_text(Page::GetItemEstimate, "Status", "1"))
                        .child(
                            Element::new(Page::GetItemEstimate, "Collection")
                                .child(Element::with_text(
                                    Page::GetItemEstimate,
                                    "CollectionId",
                                    "2",
                                ))
                                .child(Element::with_text(Page::GetItemEstimate, "Estimate", "3")),
                        ),
                ),
            )),
            "Sync" => {
                let key = collection_text(request, "SyncKey").unwrap_or_default();
                recorder.lock().unwrap().push(key.clone());
                let page = |next: &str, commands_list: Vec<Element>, more: bool| {
                    let mut extra = vec![commands(commands_list)];
                    if more {
                        extra.insert(0, Element::new(Page::AirSync, "MoreAvailable"));
                    }
                    wbxml_response(&sync_response("2", next, "1", extra))
                };
                match key.as_str() {
                    "0" => Ok(wbxml_response(&sync_response("2", "1", "1", vec![]))),
                    "1" => Ok(page(
                        "2",
                        vec![server_add("2:1", "One"), server_add("2:2", "Two")],
                        true,
                    )),
                    "2" => Ok(page("3", vec![server_add("2:3", "Three")], false)),
                    _ => Ok(HttpResponse::new(200)),
                }
            }
            other => panic!("unexpected {}", other),
        });
        let config = crate::config::EngineConfig::default();
        let mut h = harness_with(http, config, account(), None);
        let events = h.engine.subscribe();

        let status = h.engine.sync_account(SyncTrigger::Manual).await;
        assert!(status.is_ok(), "{:?}", status);
        assert_eq!(*seen_keys.lock().unwrap(), vec!["0", "1", "2"]);
        assert_eq!(h.targets.target("2").len(), 3);
        assert!(events
            .drain()
            .any(|event| matches!(event, SyncEvent::Estimate { count: 3, .. })));
    }

    #[test_log::test(tokio::test)]
    async fn test_change_and_delete_commands() {
        let http = eas_server("14.0", |command, request| match command {
            "FolderSync" => Ok(wbxml_response(&calendar_hierarchy())),
            "Sync" => match collection_text(request, "SyncKey").as_deref() {
                Some("0") => Ok(wbxml_response(&sync_response("2", "1", "1", vec![]))),
                Some("1") => {
                    let change = Element::new(Page::AirSync, "Change")
                        .child(Element::with_text(Page::AirSync, "ServerId", "2:1"))
                        .child(
                            Element::new(Page::AirSync, "ApplicationData")
                                .child(Element::with_text(Page::Calendar, "Subject", "Moved")),
                        );
                    let missing_change = Element::new(Page::AirSync, "Change")
                        .child(Element::with_text(Page::AirSync, "ServerId", "2:9"))
                        .child(
                            Element::new(Page::AirSync, "ApplicationData")
                                .child(Element::with_text(Page::Calendar, "Subject", "New")),
                        );
                    let delete = Element::new(Page::AirSync, "SoftDelete")
                        .child(Element::with_text(Page::AirSync, "ServerId", "2:2"));
                    Ok(wbxml_response(&sync_response(
                        "2",
                        "2",
                        "1",
                        vec![commands(vec![change, missing_change, delete])],
                    )))
                }
                _ => Ok(HttpResponse::new(200)),
            },
            other => panic!("unexpected {}", other),
        });
        let mut h = harness(http);
        let target = h.targets.target("2");
        target
            .add_item(Item::new("2:1").with_field("Subject", "Old"), ChangeOrigin::Server)
            .unwrap();
        target.add_item(Item::new("2:2"), ChangeOrigin::Server).unwrap();

        let status = h.engine.sync_account(SyncTrigger::Manual).await;
        assert!(status.is_ok(), "{:?}", status);
        let target = h.targets.target("2");
        assert_eq!(
            target.get_item("2:1").unwrap().unwrap().field("Subject"),
            Some("Moved")
        );
        assert!(target.get_item("2:9").unwrap().is_some());
        assert!(target.get_item("2:2").unwrap().is_none());
    }
}
