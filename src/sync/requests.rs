//! Request documents sent by the engine

use crate::config::EngineConfig;
use crate::types::{Folder, ProtocolVersion};
use crate::wbxml::{Element, Page};

fn airsync(name: &str, text: &str) -> Element {
    Element::with_text(Page::AirSync, name, text)
}

pub fn folder_sync(sync_key: &str) -> Element {
    Element::new(Page::FolderHierarchy, "FolderSync")
        .child(Element::with_text(Page::FolderHierarchy, "SyncKey", sync_key))
}

fn policy(version: ProtocolVersion) -> Element {
    Element::new(Page::Provision, "Policy").child(Element::with_text(
        Page::Provision,
        "PolicyType",
        version.policy_type(),
    ))
}

/// Initial policy download
pub fn provision_request(version: ProtocolVersion) -> Element {
    Element::new(Page::Provision, "Provision")
        .child(Element::new(Page::Provision, "Policies").child(policy(version)))
}

/// Acknowledge a downloaded policy with its temporary key
pub fn provision_ack(version: ProtocolVersion, temporary_key: &str) -> Element {
    let policy = policy(version)
        .child(Element::with_text(Page::Provision, "PolicyKey", temporary_key))
        .child(Element::with_text(Page::Provision, "Status", "1"));
    Element::new(Page::Provision, "Provision")
        .child(Element::new(Page::Provision, "Policies").child(policy))
}

/// Collection header: `Class` (2.5 only), `SyncKey`, `CollectionId`
pub fn collection(folder: &Folder, sync_key: &str, version: ProtocolVersion) -> Element {
    let mut collection = Element::new(Page::AirSync, "Collection");
    if version.is_legacy() {
        if let Some(class) = folder.folder_type.class() {
            collection.push(airsync("Class", class));
        }
    }
    collection
        .child(airsync("SyncKey", sync_key))
        .child(airsync("CollectionId", &folder.server_id))
}

/// `Sync` document around one collection
pub fn sync(collection: Element) -> Element {
    Element::new(Page::AirSync, "Sync")
        .child(Element::new(Page::AirSync, "Collections").child(collection))
}

/// Synckey request with the zero key
pub fn sync_bootstrap(folder: &Folder, version: ProtocolVersion) -> Element {
    sync(collection(folder, crate::types::INITIAL_SYNC_KEY, version))
}

fn download_options(config: &EngineConfig, version: ProtocolVersion) -> Element {
    let mut options =
        Element::new(Page::AirSync, "Options").child(airsync("FilterType", &config.filter_type));
    if version.is_legacy() {
        options.push(airsync("Truncation", "9"));
    } else {
        options.push(
            Element::new(Page::AirSyncBase, "BodyPreference")
                .child(Element::with_text(
                    Page::AirSyncBase,
                    "Type",
                    config.body_type.to_string(),
                )),
        );
    }
    options
}

/// Ask for server changes
pub fn sync_download(
    folder: &Folder,
    sync_key: &str,
    version: ProtocolVersion,
    config: &EngineConfig,
) -> Element {
    let collection = collection(folder, sync_key, version)
        .child(Element::new(Page::AirSync, "GetChanges"))
        .child(airsync("WindowSize", &config.window_size.to_string()))
        .child(download_options(config, version));
    sync(collection)
}

/// Upload local changes; `commands` holds the Add/Change/Delete elements
pub fn sync_upload(
    folder: &Folder,
    sync_key: &str,
    version: ProtocolVersion,
    commands: Vec<Element>,
) -> Element {
    let mut collection = collection(folder, sync_key, version);
    if !version.is_legacy() {
        collection.push(airsync("GetChanges", "0"));
    }
    let mut list = Element::new(Page::AirSync, "Commands");
    for command in commands {
        list.push(command);
    }
    sync(collection.child(list))
}

pub fn upload_add(client_id: &str, data: Element) -> Element {
    Element::new(Page::AirSync, "Add")
        .child(airsync("ClientId", client_id))
        .child(data)
}

pub fn upload_change(server_id: &str, data: Element) -> Element {
    Element::new(Page::AirSync, "Change")
        .child(airsync("ServerId", server_id))
        .child(data)
}

pub fn upload_delete(server_id: &str) -> Element {
    Element::new(Page::AirSync, "Delete").child(airsync("ServerId", server_id))
}

pub fn item_estimate(
    folder: &Folder,
    sync_key: &str,
    version: ProtocolVersion,
    config: &EngineConfig,
) -> Element {
    let mut collection = Element::new(Page::GetItemEstimate, "Collection");
    if version.is_legacy() {
        if let Some(class) = folder.folder_type.class() {
            collection.push(Element::with_text(Page::GetItemEstimate, "Class", class));
        }
        collection.push(Element::with_text(
            Page::GetItemEstimate,
            "CollectionId",
            &folder.server_id,
        ));
        collection.push(airsync("FilterType", &config.filter_type));
        collection.push(airsync("SyncKey", sync_key));
    } else {
        collection.push(airsync("SyncKey", sync_key));
        collection.push(Element::with_text(
            Page::GetItemEstimate,
            "CollectionId",
            &folder.server_id,
        ));
        collection.push(
            Element::new(Page::AirSync, "Options")
                .child(airsync("FilterType", &config.filter_type)),
        );
    }

    Element::new(Page::GetItemEstimate, "GetItemEstimate")
        .child(Element::new(Page::GetItemEstimate, "Collections").child(collection))
}

/// Fetch the server copy of several items of one folder
pub fn item_fetch(folder: &Folder, server_ids: &[String], config: &EngineConfig) -> Element {
    let mut operations = Element::new(Page::ItemOperations, "ItemOperations");
    for server_id in server_ids {
        operations.push(
            Element::new(Page::ItemOperations, "Fetch")
                .child(Element::with_text(Page::ItemOperations, "Store", "Mailbox"))
                .child(airsync("CollectionId", &folder.server_id))
                .child(airsync("ServerId", server_id))
                .child(
                    Element::new(Page::ItemOperations, "Options").child(
                        Element::new(Page::AirSyncBase, "BodyPreference").child(
                            Element::with_text(
                                Page::AirSyncBase,
                                "Type",
                                config.body_type.to_string(),
                            ),
                        ),
                    ),
                ),
        );
    }
    operations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wbxml::{decode, encode};

    fn calendar() -> Folder {
        Folder::new("2", "0", "Calendar", 8)
    }

    #[test]
    fn test_legacy_collection_has_class_first() {
        let element = collection(&calendar(), "0", ProtocolVersion::V2_5);
        let names: Vec<&str> = element.elements().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["Class", "SyncKey", "CollectionId"]);
        assert_eq!(element.text_at("Collection.Class").as_deref(), Some("Calendar"));

        let element = collection(&calendar(), "0", ProtocolVersion::V14_0);
        assert!(!element.has("Collection.Class"));
    }

    #[test]
    fn test_download_body_preference() {
        let config = EngineConfig::default();
        let modern = sync_download(&calendar(), "5", ProtocolVersion::V14_0, &config);
        let preference = modern
            .at("Sync.Collections.Collection.Options.BodyPreference")
            .unwrap();
        assert_eq!(preference.page, Page::AirSyncBase);
        assert_eq!(
            modern.text_at("Sync.Collections.Collection.WindowSize").as_deref(),
            Some("50")
        );

        let legacy = sync_download(&calendar(), "5", ProtocolVersion::V2_5, &config);
        assert!(!legacy.has("Sync.Collections.Collection.Options.BodyPreference"));
    }

    #[test]
    fn test_requests_encode() {
        let config = EngineConfig::default();
        let documents = vec![
            folder_sync("0"),
            provision_request(ProtocolVersion::V14_0),
            provision_ack(ProtocolVersion::V14_0, "123"),
            sync_bootstrap(&calendar(), ProtocolVersion::V2_5),
            sync_upload(
                &calendar(),
                "7",
                ProtocolVersion::V14_0,
                vec![upload_delete("2:1")],
            ),
            item_estimate(&calendar(), "7", ProtocolVersion::V14_0, &config),
            item_estimate(&calendar(), "7", ProtocolVersion::V2_5, &config),
            item_fetch(&calendar(), &["2:1".to_string()], &config),
        ];
        for document in documents {
            let bytes = encode(&document).unwrap();
            assert_eq!(decode(&bytes).unwrap().unwrap(), document);
        }
    }
}
