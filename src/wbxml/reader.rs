use tracing::warn;

use super::codepages::Page;
use super::element::{Element, Node};
use super::{is_wbxml, token, WbxmlError};

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn byte(&mut self) -> Result<u8, WbxmlError> {
        let value = *self.bytes.get(self.pos).ok_or(WbxmlError::Truncated)?;
        self.pos += 1;
        Ok(value)
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], WbxmlError> {
        let end = self.pos.checked_add(len).ok_or(WbxmlError::Truncated)?;
        let slice = self.bytes.get(self.pos..end).ok_or(WbxmlError::Truncated)?;
        self.pos = end;
        Ok(slice)
    }

    fn mb_u32(&mut self) -> Result<u32, WbxmlError> {
        let mut value: u32 = 0;
        for _ in 0..5 {
            let byte = self.byte()?;
            value = (value << 7) | u32::from(byte & 0x7F);
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(WbxmlError::Malformed("multi-byte integer too long".to_string()))
    }

    fn cstr(&mut self) -> Result<String, WbxmlError> {
        let rest = &self.bytes[self.pos..];
        let len = rest
            .iter()
            .position(|b| *b == 0)
            .ok_or(WbxmlError::Truncated)?;
        let text = std::str::from_utf8(&rest[..len])
            .map_err(|e| WbxmlError::InvalidString(e.to_string()))?
            .to_string();
        self.pos += len + 1;
        Ok(text)
    }

    fn at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }
}

fn string_table_entry(table: &[u8], offset: u32) -> Result<String, WbxmlError> {
    let rest = table
        .get(offset as usize..)
        .ok_or_else(|| {
            WbxmlError::Malformed(format!("string table offset {} out of range", offset))
        })?;
    let len = rest.iter().position(|b| *b == 0).unwrap_or(rest.len());
    std::str::from_utf8(&rest[..len])
        .map(str::to_string)
        .map_err(|e| WbxmlError::InvalidString(e.to_string()))
}

fn attach(stack: &mut [Element], node: Node) -> Result<(), WbxmlError> {
    match stack.last_mut() {
        Some(parent) => {
            parent.children.push(node);
            Ok(())
        }
        None => Err(WbxmlError::Unbalanced(
            "content outside of the root element".to_string(),
        )),
    }
}

/// Decode a WBXML payload.
///
/// An empty payload (or a bare header) is `Ok(None)`: whether that is acceptable
/// is the caller's call. A payload without the ActiveSync header is
/// [`WbxmlError::BadHeader`].
pub fn decode(bytes: &[u8]) -> Result<Option<Element>, WbxmlError> {
    if bytes.is_empty() {
        return Ok(None);
    }
    if !is_wbxml(bytes) {
        return Err(WbxmlError::BadHeader);
    }

    // version, public id, charset
    let mut cursor = Cursor { bytes, pos: 3 };
    let table_len = cursor.mb_u32()? as usize;
    let table = cursor.take(table_len)?;

    let mut page = Page::AirSync;
    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    while !cursor.at_end() {
        let byte = cursor.byte()?;
        match byte {
            token::SWITCH_PAGE => {
                let id = cursor.byte()?;
                page = Page::from_id(id).ok_or(WbxmlError::UnknownPage(id))?;
            }
            token::END => {
                let element = stack
                    .pop()
                    .ok_or_else(|| WbxmlError::Unbalanced("END without open tag".to_string()))?;
                if stack.is_empty() {
                    root = Some(element);
                    break;
                }
                attach(&mut stack, Node::Element(element))?;
            }
            token::ENTITY => {
                let code = cursor.mb_u32()?;
                let ch = char::from_u32(code)
                    .ok_or_else(|| WbxmlError::InvalidString(format!("bad entity {}", code)))?;
                attach(&mut stack, Node::Text(ch.to_string()))?;
            }
            token::STR_I => {
                let text = cursor.cstr()?;
                attach(&mut stack, Node::Text(text))?;
            }
            token::STR_T => {
                let offset = cursor.mb_u32()?;
                let text = string_table_entry(table, offset)?;
                attach(&mut stack, Node::Text(text))?;
            }
            token::OPAQUE => {
                let len = cursor.mb_u32()? as usize;
                let data = cursor.take(len)?.to_vec();
                attach(&mut stack, Node::Opaque(data))?;
            }
            other if other & 0x3F <= 0x04 => {
                return Err(WbxmlError::UnsupportedToken(other));
            }
            other if other & token::ATTRIBUTE_BIT != 0 => {
                return Err(WbxmlError::UnsupportedToken(other));
            }
            other => {
                let value = other & 0x3F;
                let name = match page.tag(value) {
                    Some(name) => name.to_string(),
                    None => {
                        warn!("Unknown WBXML tag 0x{:02X} on page {}", value, page);
                        format!("Unknown_0x{:02X}", value)
                    }
                };
                let element = Element::new(page, name);
                if other & token::CONTENT_BIT != 0 {
                    stack.push(element);
                } else if stack.is_empty() {
                    root = Some(element);
                    break;
                } else {
                    attach(&mut stack, Node::Element(element))?;
                }
            }
        }
    }

    if !stack.is_empty() {
        return Err(WbxmlError::Truncated);
    }
    if !cursor.at_end() {
        warn!(
            "Ignoring {} trailing bytes after WBXML root element",
            bytes.len() - cursor.pos
        );
    }
    Ok(root)
}
