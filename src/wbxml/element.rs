//! Generic decoded tree with dotted-path queries

use std::fmt::Write;

use super::codepages::Page;

/// A child of an element
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Element(Element),
    Text(String),
    Opaque(Vec<u8>),
}

/// A tag from a known code page together with its content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub page: Page,
    pub name: String,
    pub children: Vec<Node>,
}

impl Element {
    pub fn new(page: Page, name: impl Into<String>) -> Self {
        Self {
            page,
            name: name.into(),
            children: Vec::new(),
        }
    }

    /// Element holding a single text node
    pub fn with_text(page: Page, name: impl Into<String>, text: impl Into<String>) -> Self {
        let mut element = Self::new(page, name);
        element.children.push(Node::Text(text.into()));
        element
    }

    /// Builder-style child append
    pub fn child(mut self, child: Element) -> Self {
        self.children.push(Node::Element(child));
        self
    }

    pub fn push(&mut self, child: Element) {
        self.children.push(Node::Element(child));
    }

    pub fn push_text(&mut self, text: impl Into<String>) {
        self.children.push(Node::Text(text.into()));
    }

    pub fn push_opaque(&mut self, data: Vec<u8>) {
        self.children.push(Node::Opaque(data));
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Direct element children in document order
    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|node| match node {
            Node::Element(element) => Some(element),
            _ => None,
        })
    }

    /// First direct child with the given name
    pub fn find(&self, name: &str) -> Option<&Element> {
        self.elements().find(|element| element.name == name)
    }

    /// Concatenated character content of this element.
    ///
    /// Opaque data is interpreted as UTF-8 since servers send some string
    /// fields (body data, ids) as opaque blobs.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for node in &self.children {
            match node {
                Node::Text(text) => out.push_str(text),
                Node::Opaque(data) => out.push_str(&String::from_utf8_lossy(data)),
                Node::Element(_) => {}
            }
        }
        out
    }

    /// First opaque payload among the direct children
    pub fn opaque(&self) -> Option<&[u8]> {
        self.children.iter().find_map(|node| match node {
            Node::Opaque(data) => Some(data.as_slice()),
            _ => None,
        })
    }

    /// Look up a nested element by dotted path.
    ///
    /// The first segment names this element itself, so a `Sync` root answers
    /// `Sync.Collections.Collection.Status`. When several siblings share a name
    /// the first branch containing the full path wins. A missing path yields
    /// `None`, never a panic.
    pub fn at(&self, path: &str) -> Option<&Element> {
        let mut segments = path.split('.');
        if segments.next()? != self.name {
            return None;
        }
        let rest: Vec<&str> = segments.collect();
        descend_first(self, &rest)
    }

    /// Text of a nested element, `None` when the path is absent
    pub fn text_at(&self, path: &str) -> Option<String> {
        self.at(path).map(Element::text)
    }

    /// Every element matching the dotted path
    pub fn all_at(&self, path: &str) -> Vec<&Element> {
        let mut segments = path.split('.');
        let mut found = Vec::new();
        if segments.next() == Some(self.name.as_str()) {
            let rest: Vec<&str> = segments.collect();
            descend_all(self, &rest, &mut found);
        }
        found
    }

    pub fn has(&self, path: &str) -> bool {
        self.at(path).is_some()
    }

    /// Indented XML rendering for logs and transcripts.
    ///
    /// Elements whose page differs from their parent's carry the page name as
    /// a prefix (`AirSyncBase:Body`).
    pub fn to_xml(&self) -> String {
        let mut out = String::new();
        self.write_xml(&mut out, None, 0);
        out
    }

    fn write_xml(&self, out: &mut String, parent: Option<Page>, depth: usize) {
        let indent = "  ".repeat(depth);
        let name = match parent {
            Some(page) if page == self.page => self.name.clone(),
            Some(_) => format!("{}:{}", self.page.name(), self.name),
            None => self.name.clone(),
        };

        if self.children.is_empty() {
            let _ = writeln!(out, "{}<{}/>", indent, name);
            return;
        }

        let only_character_data = self
            .children
            .iter()
            .all(|node| !matches!(node, Node::Element(_)));
        if only_character_data {
            let text = render_character_data(&self.children);
            let _ = writeln!(out, "{}<{}>{}</{}>", indent, name, text, name);
            return;
        }

        let _ = writeln!(out, "{}<{}>", indent, name);
        for node in &self.children {
            match node {
                Node::Element(child) => child.write_xml(out, Some(self.page), depth + 1),
                other => {
                    let _ = writeln!(
                        out,
                        "{}  {}",
                        indent,
                        render_character_data(std::slice::from_ref(other))
                    );
                }
            }
        }
        let _ = writeln!(out, "{}</{}>", indent, name);
    }
}

fn descend_first<'a>(element: &'a Element, path: &[&str]) -> Option<&'a Element> {
    let Some((head, rest)) = path.split_first() else {
        return Some(element);
    };
    element
        .elements()
        .filter(|child| child.name == *head)
        .find_map(|child| descend_first(child, rest))
}

fn descend_all<'a>(element: &'a Element, path: &[&str], found: &mut Vec<&'a Element>) {
    let Some((head, rest)) = path.split_first() else {
        found.push(element);
        return;
    };
    for child in element.elements().filter(|child| child.name == *head) {
        descend_all(child, rest, found);
    }
}

fn render_character_data(nodes: &[Node]) -> String {
    let mut out = String::new();
    for node in nodes {
        match node {
            Node::Text(text) => out.push_str(&escape(text)),
            Node::Opaque(data) => match std::str::from_utf8(data) {
                Ok(text) => out.push_str(&escape(text)),
                Err(_) => {
                    let _ = write!(out, "[opaque {} bytes]", data.len());
                }
            },
            Node::Element(_) => {}
        }
    }
    out
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
