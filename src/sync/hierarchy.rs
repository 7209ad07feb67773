use std::collections::HashMap;
use tracing::{debug, info};

use super::requests;
use super::{Step, SyncEngine};
use crate::status::StatusPolicy;
use crate::types::error::{EasError, Result};
use crate::types::Folder;
use crate::wbxml::Element;

/// Folder as described by a FolderSync `Add` or `Update`
fn parse_folder(change: &Element) -> Result<Folder> {
    let field = |name: &str| change.find(name).map(Element::text);
    let missing = |name: &str| {
        EasError::MissingField(format!("FolderSync.Changes.{}.{}", change.name, name))
    };
    let server_id = field("ServerId").ok_or_else(|| missing("ServerId"))?;
    let type_code = field("Type")
        .and_then(|value| value.trim().parse::<u32>().ok())
        .ok_or_else(|| missing("Type"))?;

    Ok(Folder::new(
        &server_id,
        &field("ParentId").unwrap_or_else(|| "0".to_string()),
        &field("DisplayName").unwrap_or_default(),
        type_code,
    ))
}

impl SyncEngine {
    /// FolderSync round trip applied to the local folder set
    pub(super) async fn sync_hierarchy(&mut self) -> Step {
        let request = requests::folder_sync(&self.conn.folder_sync_key);
        let response = self.exchange(&request).await?;
        self.check_status(StatusPolicy::evaluate(&response, "FolderSync.Status", false))?;

        let sync_key = response
            .text_at("FolderSync.SyncKey")
            .ok_or_else(|| EasError::MissingField("FolderSync.SyncKey".to_string()))?;

        let account_id = self.conn.account_id.clone();
        let mut folders: HashMap<String, Folder> = self
            .state
            .load_folders(&account_id)?
            .into_iter()
            .map(|folder| (folder.server_id.clone(), folder))
            .collect();

        let changes = response
            .all_at("FolderSync.Changes.Add")
            .into_iter()
            .chain(response.all_at("FolderSync.Changes.Update"));
        for change in changes {
            let incoming = parse_folder(change)?;
            let folder = match folders.get(&incoming.server_id) {
                Some(existing) => Folder {
                    parent_id: incoming.parent_id,
                    display_name: incoming.display_name,
                    folder_type: incoming.folder_type,
                    type_code: incoming.type_code,
                    ..existing.clone()
                },
                None => self.restore_cached(incoming)?,
            };

            debug!("Folder {} ({}) updated", folder.server_id, folder.display_name);
            self.state.persist_folder(&account_id, &folder)?;
            self.state.cache_folder(&account_id, &folder)?;
            folders.insert(folder.server_id.clone(), folder);
        }

        for delete in response.all_at("FolderSync.Changes.Delete") {
            let server_id = delete.find("ServerId").map(Element::text).ok_or_else(|| {
                EasError::MissingField("FolderSync.Changes.Delete.ServerId".to_string())
            })?;
            if let Some(folder) = folders.remove(&server_id) {
                info!("Folder {} deleted on server", folder.name());
                self.state.cache_folder(&account_id, &folder)?;
                self.targets.discard_target(&folder)?;
                self.state.remove_folder(&account_id, &server_id)?;
            }
        }

        self.conn.folder_sync_key = sync_key;
        self.state.persist_account(&self.conn)?;
        Ok(())
    }

    /// Carry user settings over from a folder previously seen with this id
    fn restore_cached(&self, mut folder: Folder) -> Result<Folder> {
        if let Some(cached) = self
            .state
            .cached_folder(&self.conn.account_id, &folder.server_id)?
        {
            debug!("Restoring settings of folder {}", folder.server_id);
            folder.color = cached.color;
            folder.custom_name = cached.custom_name;
            folder.download_only = cached.download_only;
            folder.selected = cached.selected;
        }
        Ok(folder)
    }
}
