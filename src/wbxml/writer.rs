use super::codepages::Page;
use super::element::{Element, Node};
use super::{token, WbxmlError, HEADER};

/// Streaming WBXML encoder.
///
/// Tags are resolved against the active code page only; emitting a tag from
/// another page without calling [`WbxmlWriter::switch_page`] first is an error.
#[derive(Debug)]
pub struct WbxmlWriter {
    buf: Vec<u8>,
    page: Page,
    open: Vec<String>,
}

impl WbxmlWriter {
    pub fn new() -> Self {
        Self {
            buf: HEADER.to_vec(),
            page: Page::AirSync,
            open: Vec::new(),
        }
    }

    /// Active code page
    pub fn page(&self) -> Page {
        self.page
    }

    /// Make `page` the active code page, emitting SWITCH_PAGE when it changes
    pub fn switch_page(&mut self, page: Page) -> &mut Self {
        if page != self.page {
            self.buf.push(token::SWITCH_PAGE);
            self.buf.push(page.id());
            self.page = page;
        }
        self
    }

    fn resolve(&self, tag: &str) -> Result<u8, WbxmlError> {
        self.page.token(tag).ok_or_else(|| WbxmlError::UnknownTag {
            page: self.page.name().to_string(),
            tag: tag.to_string(),
        })
    }

    /// Open a tag that will carry content
    pub fn open(&mut self, tag: &str) -> Result<&mut Self, WbxmlError> {
        let value = self.resolve(tag)?;
        self.buf.push(value | token::CONTENT_BIT);
        self.open.push(tag.to_string());
        Ok(self)
    }

    /// Close the innermost open tag
    pub fn close(&mut self) -> Result<&mut Self, WbxmlError> {
        if self.open.pop().is_none() {
            return Err(WbxmlError::Unbalanced("close without open tag".to_string()));
        }
        self.buf.push(token::END);
        Ok(self)
    }

    /// Emit a tag without content (`<Tag/>`)
    pub fn empty(&mut self, tag: &str) -> Result<&mut Self, WbxmlError> {
        let value = self.resolve(tag)?;
        self.buf.push(value);
        Ok(self)
    }

    /// Inline null-terminated string
    pub fn text(&mut self, text: &str) -> Result<&mut Self, WbxmlError> {
        if text.as_bytes().contains(&0) {
            return Err(WbxmlError::InvalidString(
                "inline strings cannot contain NUL".to_string(),
            ));
        }
        self.buf.push(token::STR_I);
        self.buf.extend_from_slice(text.as_bytes());
        self.buf.push(0);
        Ok(self)
    }

    /// Length-prefixed opaque data
    pub fn opaque(&mut self, data: &[u8]) -> &mut Self {
        self.buf.push(token::OPAQUE);
        write_mb_u32(&mut self.buf, data.len() as u32);
        self.buf.extend_from_slice(data);
        self
    }

    /// `<Tag>text</Tag>` on the active page
    pub fn text_element(&mut self, tag: &str, text: &str) -> Result<&mut Self, WbxmlError> {
        self.open(tag)?.text(text)?.close()
    }

    /// Write a whole tree, switching pages as the elements require
    pub fn write_element(&mut self, element: &Element) -> Result<&mut Self, WbxmlError> {
        self.switch_page(element.page);
        if element.children.is_empty() {
            return self.empty(&element.name);
        }

        self.open(&element.name)?;
        for node in &element.children {
            match node {
                Node::Element(child) => {
                    self.write_element(child)?;
                }
                Node::Text(text) => {
                    self.text(text)?;
                }
                Node::Opaque(data) => {
                    self.opaque(data);
                }
            }
        }
        // children may have moved to another page; END is page independent
        self.close()
    }

    /// Finish the document; every opened tag must be closed
    pub fn finish(self) -> Result<Vec<u8>, WbxmlError> {
        if let Some(tag) = self.open.last() {
            return Err(WbxmlError::Unbalanced(format!("unclosed tag {}", tag)));
        }
        Ok(self.buf)
    }
}

impl Default for WbxmlWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// Multi-byte unsigned integer: 7 bits per byte, high bit set on all but the last
pub(crate) fn write_mb_u32(buf: &mut Vec<u8>, mut value: u32) {
    let mut bytes = [0u8; 5];
    let mut index = bytes.len() - 1;
    bytes[index] = (value & 0x7F) as u8;
    value >>= 7;
    while value > 0 {
        index -= 1;
        bytes[index] = (value & 0x7F) as u8 | 0x80;
        value >>= 7;
    }
    buf.extend_from_slice(&bytes[index..]);
}
