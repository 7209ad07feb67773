//! Protocol status codes and their recovery actions
//!
//! Every `Status` element the engine reads goes through [`StatusPolicy`].
//! Command-specific codes live below 100; codes from 101 up are shared by all
//! commands and may appear in place of any command status.

use std::fmt;

use crate::types::error::EasError;
use crate::wbxml::Element;

/// What the engine does after reading a status
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusAction {
    Continue,
    /// Caller declared the failure tolerable (used to isolate bad items)
    SoftFail,
    /// Reset the current folder's synckey and bindings, then re-run it
    ResyncFolder,
    /// Restart the whole account cycle
    ResyncAccount,
    /// End the account's sync attempt with this terminal code
    Abort(String),
}

/// Side effect on account state that accompanies an action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountEffect {
    /// Drop the policy key and provision again
    Reprovision,
    /// Suppress automatic syncs for the configured throttle cooldown
    Cooldown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub action: StatusAction,
    /// `"<Command>.<Code>"`
    pub key: String,
    pub effect: Option<AccountEffect>,
}

impl Classification {
    fn new(key: String, action: StatusAction) -> Self {
        Self {
            action,
            key,
            effect: None,
        }
    }

    fn with_effect(mut self, effect: AccountEffect) -> Self {
        self.effect = Some(effect);
        self
    }

    pub fn is_continue(&self) -> bool {
        self.action == StatusAction::Continue
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {:?}", self.key, self.action)
    }
}

pub struct StatusPolicy;

impl StatusPolicy {
    /// Read and classify the status at `path`.
    ///
    /// When `path` is absent the command's top-level `Status` is used; when
    /// that is absent too the result is an abort with a missing-field code.
    pub fn evaluate(response: &Element, path: &str, allow_soft_fail: bool) -> Classification {
        let command = path.split('.').next().unwrap_or_default();
        let status = response
            .text_at(path)
            .or_else(|| response.text_at(&format!("{}.Status", command)));

        match status {
            Some(code) => Self::classify(command, code.trim(), allow_soft_fail),
            None => Classification::new(
                format!("{}.?", command),
                StatusAction::Abort(EasError::MissingField(path.to_string()).code()),
            ),
        }
    }

    /// Classify `"<command>.<code>"`
    pub fn classify(command: &str, code: &str, allow_soft_fail: bool) -> Classification {
        let key = format!("{}.{}", command, code);
        let Ok(value) = code.parse::<u32>() else {
            return Classification::new(key.clone(), StatusAction::Abort(key));
        };

        if value == 1 {
            return Classification::new(key, StatusAction::Continue);
        }
        if value > 100 {
            return global(key, value, allow_soft_fail);
        }

        let soft_or_abort = |key: &str| {
            if allow_soft_fail {
                StatusAction::SoftFail
            } else {
                StatusAction::Abort(key.to_string())
            }
        };

        let action = match (command, value) {
            // invalid synckey
            ("Sync", 3) => StatusAction::ResyncFolder,
            // protocol error, server error, conversion error, object not found
            ("Sync", 4 | 5 | 6 | 8) => soft_or_abort(&key),
            // conflict resolved server-side; disk or permission trouble
            ("Sync", 7 | 9) => StatusAction::Continue,
            // hierarchy changed
            ("Sync", 12) => StatusAction::ResyncAccount,

            ("FolderSync", 9) => StatusAction::ResyncAccount,
            ("FolderCreate" | "FolderUpdate" | "FolderDelete", 4 | 9) => {
                StatusAction::ResyncAccount
            }

            // sync state not primed yet
            ("GetItemEstimate", 3) => StatusAction::Continue,
            ("GetItemEstimate", 4) => StatusAction::ResyncFolder,
            ("GetItemEstimate", 2) => soft_or_abort(&key),

            ("ItemOperations", _) => soft_or_abort(&key),

            _ => StatusAction::Abort(key.clone()),
        };

        Classification::new(key, action)
    }
}

fn global(key: String, value: u32, allow_soft_fail: bool) -> Classification {
    match value {
        101..=103 => Classification::new(key, StatusAction::Abort(format!("global.{}", value))),
        110 => Classification::new(key, StatusAction::Abort("global.110".to_string()))
            .with_effect(AccountEffect::Cooldown),
        109..=131 => {
            let reason = match global_name(value) {
                Some(name) => format!("global.clientdenied::{}::{}", value, name),
                None => format!("global.clientdenied::{}", value),
            };
            Classification::new(key, StatusAction::Abort(reason))
        }
        141..=144 => Classification::new(key, StatusAction::ResyncAccount)
            .with_effect(AccountEffect::Reprovision),
        _ if allow_soft_fail => Classification::new(key, StatusAction::SoftFail),
        _ => Classification::new(key, StatusAction::Abort(format!("global.{}", value))),
    }
}

/// Names of the common status codes
pub fn global_name(code: u32) -> Option<&'static str> {
    let name = match code {
        101 => "InvalidContent",
        102 => "InvalidWBXML",
        103 => "InvalidXML",
        104 => "InvalidDateTime",
        105 => "InvalidCombinationOfIDs",
        106 => "InvalidIDs",
        107 => "InvalidMIME",
        108 => "DeviceIdMissingOrInvalid",
        109 => "DeviceTypeMissingOrInvalid",
        110 => "ServerError",
        111 => "ServerErrorRetryLater",
        112 => "ActiveDirectoryAccessDenied",
        113 => "MailboxQuotaExceeded",
        114 => "MailboxServerOffline",
        115 => "SendQuotaExceeded",
        116 => "MessageRecipientUnresolved",
        117 => "MessageReplyNotAllowed",
        118 => "MessagePreviouslySent",
        119 => "MessageHasNoRecipient",
        120 => "MailSubmissionFailed",
        121 => "MessageReplyFailed",
        122 => "AttachmentIsTooLarge",
        123 => "UserHasNoMailbox",
        124 => "UserCannotBeAnonymous",
        125 => "UserPrincipalCouldNotBeFound",
        126 => "UserDisabledForSync",
        127 => "UserOnNewMailboxCannotSync",
        128 => "UserOnLegacyMailboxCannotSync",
        129 => "DeviceIsBlockedForThisUser",
        130 => "AccessDenied",
        131 => "AccountDisabled",
        132 => "SyncStateNotFound",
        133 => "SyncStateLocked",
        134 => "SyncStateCorrupt",
        135 => "SyncStateAlreadyExists",
        136 => "SyncStateVersionInvalid",
        137 => "CommandNotSupported",
        138 => "VersionNotSupported",
        139 => "DeviceNotFullyProvisionable",
        140 => "RemoteWipeRequested",
        141 => "LegacyDeviceOnStrictPolicy",
        142 => "DeviceNotProvisioned",
        143 => "PolicyRefresh",
        144 => "InvalidPolicyKey",
        145 => "ExternallyManagedDevicesNotAllowed",
        _ => return None,
    };
    Some(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wbxml::Page;

    fn sync_response(collection_status: Option<&str>, top_status: Option<&str>) -> Element {
        let mut collection = Element::new(Page::AirSync, "Collection")
            .child(Element::with_text(Page::AirSync, "SyncKey", "5"));
        if let Some(status) = collection_status {
            collection.push(Element::with_text(Page::AirSync, "Status", status));
        }
        let mut sync = Element::new(Page::AirSync, "Sync");
        if let Some(status) = top_status {
            sync.push(Element::with_text(Page::AirSync, "Status", status));
        }
        sync.child(Element::new(Page::AirSync, "Collections").child(collection))
    }

    const PATH: &str = "Sync.Collections.Collection.Status";

    #[test]
    fn test_sync_table() {
        assert!(StatusPolicy::classify("Sync", "1", false).is_continue());
        assert_eq!(
            StatusPolicy::classify("Sync", "3", false).action,
            StatusAction::ResyncFolder
        );
        for code in ["4", "5", "6", "8"] {
            assert_eq!(
                StatusPolicy::classify("Sync", code, true).action,
                StatusAction::SoftFail
            );
            assert_eq!(
                StatusPolicy::classify("Sync", code, false).action,
                StatusAction::Abort(format!("Sync.{}", code))
            );
        }
        assert!(StatusPolicy::classify("Sync", "7", false).is_continue());
        assert!(StatusPolicy::classify("Sync", "9", false).is_continue());
        assert_eq!(
            StatusPolicy::classify("Sync", "12", false).action,
            StatusAction::ResyncAccount
        );
    }

    #[test]
    fn test_folder_commands() {
        assert_eq!(
            StatusPolicy::classify("FolderSync", "9", false).action,
            StatusAction::ResyncAccount
        );
        assert_eq!(
            StatusPolicy::classify("FolderDelete", "9", false).action,
            StatusAction::ResyncAccount
        );
        for code in ["3", "6"] {
            assert_eq!(
                StatusPolicy::classify("FolderDelete", code, false).action,
                StatusAction::Abort(format!("FolderDelete.{}", code))
            );
        }
    }

    #[test]
    fn test_global_codes() {
        assert_eq!(
            StatusPolicy::classify("Sync", "102", true).action,
            StatusAction::Abort("global.102".to_string())
        );
        assert_eq!(
            StatusPolicy::classify("FolderSync", "129", false).action,
            StatusAction::Abort("global.clientdenied::129::DeviceIsBlockedForThisUser".to_string())
        );

        let throttled = StatusPolicy::classify("Sync", "110", false);
        assert_eq!(throttled.action, StatusAction::Abort("global.110".to_string()));
        assert_eq!(throttled.effect, Some(AccountEffect::Cooldown));

        let reprovision = StatusPolicy::classify("FolderSync", "142", false);
        assert_eq!(reprovision.action, StatusAction::ResyncAccount);
        assert_eq!(reprovision.effect, Some(AccountEffect::Reprovision));

        assert_eq!(
            StatusPolicy::classify("Sync", "150", true).action,
            StatusAction::SoftFail
        );
    }

    #[test]
    fn test_nested_status_wins() {
        let response = sync_response(Some("3"), Some("1"));
        let classification = StatusPolicy::evaluate(&response, PATH, false);
        assert_eq!(classification.key, "Sync.3");
        assert_eq!(classification.action, StatusAction::ResyncFolder);
    }

    #[test]
    fn test_falls_back_to_top_level_status() {
        let response = sync_response(None, Some("12"));
        assert_eq!(
            StatusPolicy::evaluate(&response, PATH, false).action,
            StatusAction::ResyncAccount
        );
    }

    #[test]
    fn test_missing_status_aborts() {
        let response = sync_response(None, None);
        assert_eq!(
            StatusPolicy::evaluate(&response, PATH, false).action,
            StatusAction::Abort("wbxmlmissingfield::Sync.Collections.Collection.Status".to_string())
        );
    }
}
