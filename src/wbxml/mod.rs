//! WBXML codec for ActiveSync payloads
//!
//! - `codepages`: the 25 ActiveSync tag tables
//! - `element`: decoded tree with dotted-path lookup
//! - `writer`: streaming encoder with explicit page switching
//! - `reader`: decoder

mod codepages;
mod element;
mod reader;
mod writer;

pub use codepages::{Page, ALL_PAGES};
pub use element::{Element, Node};
pub use reader::decode;
pub use writer::WbxmlWriter;

use thiserror::Error;

/// WBXML 1.3, unknown public id, UTF-8, empty string table
pub const HEADER: [u8; 4] = [0x03, 0x01, 0x6A, 0x00];

/// Global tokens (WBXML 1.3 section 7.1)
pub(crate) mod token {
    pub const SWITCH_PAGE: u8 = 0x00;
    pub const END: u8 = 0x01;
    pub const ENTITY: u8 = 0x02;
    pub const STR_I: u8 = 0x03;
    pub const STR_T: u8 = 0x83;
    pub const OPAQUE: u8 = 0xC3;
    pub const CONTENT_BIT: u8 = 0x40;
    pub const ATTRIBUTE_BIT: u8 = 0x80;
}

/// Errors raised while encoding or decoding WBXML
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WbxmlError {
    #[error("Payload does not start with the WBXML header")]
    BadHeader,

    #[error("Payload ended unexpectedly")]
    Truncated,

    #[error("Unknown code page {0}")]
    UnknownPage(u8),

    #[error("Tag {tag} is not defined on code page {page}")]
    UnknownTag { page: String, tag: String },

    #[error("Unsupported WBXML token 0x{0:02X}")]
    UnsupportedToken(u8),

    #[error("Invalid string: {0}")]
    InvalidString(String),

    #[error("Unbalanced document: {0}")]
    Unbalanced(String),

    #[error("Malformed payload: {0}")]
    Malformed(String),
}

/// Whether `bytes` starts with the ActiveSync WBXML header.
///
/// The fourth byte is the string table length and is not checked.
pub fn is_wbxml(bytes: &[u8]) -> bool {
    bytes.len() >= HEADER.len() && bytes[..3] == HEADER[..3]
}

/// Encode a whole tree; pages are switched as the tree requires
pub fn encode(tree: &Element) -> Result<Vec<u8>, WbxmlError> {
    let mut writer = WbxmlWriter::new();
    writer.write_element(tree)?;
    writer.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sync_request() -> Element {
        Element::new(Page::AirSync, "Sync").child(
            Element::new(Page::AirSync, "Collections").child(
                Element::new(Page::AirSync, "Collection")
                    .child(Element::with_text(Page::AirSync, "SyncKey", "0"))
                    .child(Element::with_text(Page::AirSync, "CollectionId", "5"))
                    .child(Element::new(Page::AirSync, "GetChanges"))
                    .child(
                        Element::new(Page::AirSync, "Options")
                            .child(Element::with_text(Page::AirSync, "FilterType", "0"))
                            .child(
                                Element::new(Page::AirSyncBase, "BodyPreference")
                                    .child(Element::with_text(Page::AirSyncBase, "Type", "1")),
                            )
                            .child(Element::with_text(Page::AirSync, "MIMESupport", "0")),
                    ),
            ),
        )
    }

    #[test]
    fn test_decode_reproduces_encoded_tree() {
        let trees = vec![
            sync_request(),
            Element::new(Page::FolderHierarchy, "FolderSync")
                .child(Element::with_text(Page::FolderHierarchy, "SyncKey", "")),
            Element::new(Page::Provision, "Provision").child(
                Element::new(Page::Provision, "Policies").child(
                    Element::new(Page::Provision, "Policy")
                        .child(Element::with_text(
                            Page::Provision,
                            "PolicyType",
                            "MS-EAS-Provisioning-WBXML",
                        ))
                        .child(Element::new(Page::Provision, "RemoteWipe")),
                ),
            ),
            {
                let mut data = Element::new(Page::AirSyncBase, "Data");
                data.push_opaque(vec![0, 1, 2, 0xFF]);
                Element::new(Page::ItemOperations, "ItemOperations").child(data)
            },
        ];

        for tree in trees {
            let bytes = encode(&tree).unwrap();
            assert!(is_wbxml(&bytes));
            let decoded = decode(&bytes).unwrap().unwrap();
            assert_eq!(decoded, tree);
            assert_eq!(encode(&decoded).unwrap(), bytes);
        }
    }

    #[test]
    fn test_page_switches_back_after_nested_page() {
        let bytes = encode(&sync_request()).unwrap();
        // FilterType "0", switch to AirSyncBase, BodyPreference
        assert!(bytes
            .windows(7)
            .any(|w| w == [0x03, b'0', 0x00, 0x01, 0x00, 0x11, 0x45]));
        // END BodyPreference, switch to AirSync, MIMESupport
        assert!(bytes.windows(4).any(|w| w == [0x01, 0x00, 0x00, 0x62]));
    }

    #[test]
    fn test_is_wbxml() {
        assert!(is_wbxml(&HEADER));
        assert!(is_wbxml(&[0x03, 0x01, 0x6A, 0x05, b'x']));
        assert!(!is_wbxml(&[0x03, 0x01, 0x6A]));
        assert!(!is_wbxml(b"HTTP"));
    }

    fn known_tags() -> Vec<(Page, &'static str)> {
        ALL_PAGES
            .iter()
            .flat_map(|&page| {
                (codepages::FIRST_TAG_TOKEN..0x40)
                    .filter_map(move |token| page.tag(token).map(|name| (page, name)))
            })
            .collect()
    }

    fn tag() -> impl Strategy<Value = (Page, &'static str)> {
        prop::sample::select(known_tags())
    }

    fn leaf() -> impl Strategy<Value = Element> {
        prop_oneof![
            tag().prop_map(|(page, name)| Element::new(page, name)),
            (tag(), "[^\\x00]{0,16}")
                .prop_map(|((page, name), text)| Element::with_text(page, name, text)),
            (tag(), prop::collection::vec(any::<u8>(), 0..24)).prop_map(|((page, name), data)| {
                let mut element = Element::new(page, name);
                element.push_opaque(data);
                element
            }),
        ]
    }

    // children land on random pages, so nesting crosses page switches
    fn tree() -> impl Strategy<Value = Element> {
        leaf().prop_recursive(4, 48, 5, |inner| {
            (tag(), prop::collection::vec(inner, 1..5)).prop_map(|((page, name), children)| {
                children
                    .into_iter()
                    .fold(Element::new(page, name), Element::child)
            })
        })
    }

    #[test]
    fn test_every_page_has_tags() {
        let tags = known_tags();
        for page in ALL_PAGES {
            assert!(tags.iter().any(|(p, _)| *p == page), "{} has no tags", page);
        }
    }

    proptest! {
        #[test]
        fn test_generated_tree_decodes_to_itself(tree in tree()) {
            let bytes = encode(&tree).unwrap();
            let decoded = decode(&bytes).unwrap().unwrap();
            prop_assert_eq!(&decoded, &tree);
            prop_assert_eq!(encode(&decoded).unwrap(), bytes);
        }
    }
}
