use std::collections::{BTreeMap, HashMap};

use crate::types::error::{EasError, Result};
use crate::types::{Folder, FolderType, Item, ProtocolVersion};
use crate::wbxml::{Element, Page};

/// Converts between `ApplicationData` elements and store items
pub trait ItemMapper: Send + Sync {
    fn from_application_data(&self, folder: &Folder, server_id: &str, data: &Element)
        -> Result<Item>;

    /// `ApplicationData` element for an upload
    fn to_application_data(
        &self,
        folder: &Folder,
        item: &Item,
        version: ProtocolVersion,
    ) -> Result<Element>;
}

/// Code page of the item fields in a folder
pub fn default_page(folder_type: FolderType) -> Page {
    match folder_type {
        FolderType::Contact => Page::Contacts,
        FolderType::Event => Page::Calendar,
        FolderType::Task => Page::Tasks,
        FolderType::Trash | FolderType::Other => Page::Email,
    }
}

/// Keeps every leaf of `ApplicationData` as a field keyed by its tag path.
///
/// Key segments carry a `Page:` prefix when their page differs from the
/// parent's, and an `[n]` suffix for the n-th repeated sibling, so
/// `AirSyncBase:Body.Data` or `Attendees.Attendee[1].Email`.
#[derive(Debug, Default, Clone, Copy)]
pub struct FlatMapper;

impl FlatMapper {
    pub fn new() -> Self {
        Self
    }
}

fn flatten(
    element: &Element,
    parent_page: Page,
    prefix: &str,
    fields: &mut BTreeMap<String, String>,
) {
    let mut seen: HashMap<String, usize> = HashMap::new();
    for child in element.elements() {
        let base = if child.page == parent_page {
            child.name.clone()
        } else {
            format!("{}:{}", child.page.name(), child.name)
        };
        let count = seen.entry(base.clone()).or_insert(0);
        let segment = if *count == 0 {
            base
        } else {
            format!("{}[{}]", base, count)
        };
        *count += 1;

        let key = if prefix.is_empty() {
            segment
        } else {
            format!("{}.{}", prefix, segment)
        };
        if child.elements().next().is_some() {
            flatten(child, child.page, &key, fields);
        } else {
            fields.insert(key, child.text());
        }
    }
}

/// Element under construction, children keyed by their segment label
struct Draft {
    page: Page,
    name: String,
    text: Option<String>,
    children: Vec<(String, Draft)>,
}

impl Draft {
    fn new(page: Page, name: &str) -> Self {
        Self {
            page,
            name: name.to_string(),
            text: None,
            children: Vec::new(),
        }
    }

    fn insert(&mut self, segments: &[&str], value: &str) -> Result<()> {
        let Some((segment, rest)) = segments.split_first() else {
            self.text = Some(value.to_string());
            return Ok(());
        };

        let (page, name) = parse_segment(segment, self.page)?;
        let index = match self.children.iter().position(|(label, _)| label == segment) {
            Some(index) => index,
            None => {
                self.children
                    .push((segment.to_string(), Draft::new(page, name)));
                self.children.len() - 1
            }
        };
        self.children[index].1.insert(rest, value)
    }

    fn build(self) -> Element {
        let mut element = Element::new(self.page, self.name);
        if let Some(text) = self.text.filter(|text| !text.is_empty()) {
            element.push_text(text);
        }
        for (_, child) in self.children {
            element.push(child.build());
        }
        element
    }
}

/// `[Page:]Name[n]` relative to the parent's page
fn parse_segment<'a>(segment: &'a str, parent_page: Page) -> Result<(Page, &'a str)> {
    let segment = match segment.find('[') {
        Some(bracket) => &segment[..bracket],
        None => segment,
    };
    let (page, name) = match segment.split_once(':') {
        Some((page_name, name)) => {
            let page = Page::by_name(page_name)
                .ok_or_else(|| EasError::Store(format!("unknown code page {}", page_name)))?;
            (page, name)
        }
        None => (parent_page, segment),
    };
    if page.token(name).is_none() {
        return Err(EasError::Store(format!(
            "unknown tag {} on page {}",
            name, page
        )));
    }
    Ok((page, name))
}

impl ItemMapper for FlatMapper {
    fn from_application_data(
        &self,
        folder: &Folder,
        server_id: &str,
        data: &Element,
    ) -> Result<Item> {
        let mut item = Item::new(server_id);
        flatten(data, default_page(folder.folder_type), "", &mut item.fields);
        Ok(item)
    }

    fn to_application_data(
        &self,
        folder: &Folder,
        item: &Item,
        version: ProtocolVersion,
    ) -> Result<Element> {
        let mut root = Draft::new(Page::AirSync, "ApplicationData");
        let page = default_page(folder.folder_type);
        // fields below ApplicationData default to the folder's page
        let mut body = Draft::new(page, "ApplicationData");

        for (key, value) in &item.fields {
            if version.is_legacy() && key.starts_with("AirSyncBase:") {
                continue;
            }
            let segments: Vec<&str> = key.split('.').collect();
            body.insert(&segments, value)?;
        }

        root.children = body.children;
        Ok(root.build())
    }
}
