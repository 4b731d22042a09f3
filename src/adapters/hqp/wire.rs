//! XML wire codec for the DSP control protocol.
//!
//! Requests are single newline-terminated documents:
//! `<?xml version="1.0"?><Command attr="value"/>`
//!
//! Responses are newline-terminated documents too, but a list-returning
//! command may answer in either of two shapes:
//! - one document whose root contains repeated child elements, or
//! - an opening line, one line per item, then a closing line.
//!
//! The assembler tracks element depth so both shapes come out as a single
//! document; the parser then extracts root attributes and child items.

use std::collections::HashMap;
use std::io::Cursor;

use quick_xml::events::{BytesStart, Event};
use quick_xml::{Reader, Writer};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("unparseable XML: {0}")]
    Xml(String),
    #[error("line is not part of an XML document: {0:?}")]
    Noise(String),
    #[error("unbalanced closing tag: {0:?}")]
    Unbalanced(String),
}

/// Build a request document with XML-escaped attribute values.
pub fn build_request(command: &str, attrs: &[(&str, &str)]) -> String {
    let mut writer = Writer::new(Cursor::new(Vec::new()));

    let mut elem = BytesStart::new(command);
    for (key, value) in attrs {
        elem.push_attribute((*key, *value));
    }

    // Writing an empty element into an in-memory cursor cannot fail
    let _ = writer.write_event(Event::Empty(elem));

    format!(
        "<?xml version=\"1.0\"?>{}",
        String::from_utf8_lossy(&writer.into_inner().into_inner())
    )
}

/// Accumulates newline-delimited lines into complete XML documents.
#[derive(Debug, Default)]
pub struct DocAssembler {
    buf: String,
    depth: i32,
    has_root: bool,
}

impl DocAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop any partial document (used after a response timeout so a stale
    /// tail cannot bleed into the next response).
    pub fn reset(&mut self) {
        self.buf.clear();
        self.depth = 0;
        self.has_root = false;
    }

    /// Feed one line; returns a complete document when depth returns to
    /// zero. A line that cannot belong to a document yields an error and is
    /// discarded without touching accumulated state.
    pub fn push_line(&mut self, line: &str) -> Result<Option<String>, WireError> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }
        if !trimmed.starts_with('<') {
            return Err(WireError::Noise(trimmed.to_string()));
        }

        let (delta, opens) = scan_tags(trimmed)?;
        if self.depth + delta < 0 {
            self.reset();
            return Err(WireError::Unbalanced(trimmed.to_string()));
        }

        self.buf.push_str(trimmed);
        self.buf.push('\n');
        self.depth += delta;
        self.has_root |= opens;

        if self.has_root && self.depth == 0 {
            let doc = std::mem::take(&mut self.buf);
            self.has_root = false;
            Ok(Some(doc))
        } else {
            Ok(None)
        }
    }
}

/// Depth delta and whether the line contains any element tag. Declarations
/// and self-closing elements are depth-neutral; self-closing still counts
/// as an element so `<State/>` alone forms a document.
fn scan_tags(line: &str) -> Result<(i32, bool), WireError> {
    let mut delta = 0i32;
    let mut saw_element = false;
    let mut rest = line;

    while let Some(start) = rest.find('<') {
        let after = &rest[start..];
        let end = after
            .find('>')
            .ok_or_else(|| WireError::Xml(format!("unterminated tag in {:?}", line)))?;
        let tag = &after[..=end];

        if tag.starts_with("<?") || tag.starts_with("<!--") {
            // declaration / comment
        } else if tag.starts_with("</") {
            delta -= 1;
        } else if tag.ends_with("/>") {
            saw_element = true;
        } else {
            saw_element = true;
            delta += 1;
        }

        rest = &after[end + 1..];
    }

    Ok((delta, saw_element))
}

/// A parsed response document: root element with attributes, plus any
/// direct child elements (list items) in document order.
#[derive(Debug, Clone, Default)]
pub struct ParsedDoc {
    pub root: String,
    pub attrs: HashMap<String, String>,
    pub items: Vec<(String, HashMap<String, String>)>,
}

impl ParsedDoc {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(String::as_str)
    }

    pub fn attr_string(&self, name: &str) -> String {
        self.attrs.get(name).cloned().unwrap_or_default()
    }

    pub fn attr_u32(&self, name: &str) -> u32 {
        self.attr(name).and_then(|s| s.parse().ok()).unwrap_or(0)
    }

    pub fn attr_opt_u32(&self, name: &str) -> Option<u32> {
        self.attr(name).and_then(|s| s.parse().ok())
    }

    pub fn attr_i32(&self, name: &str) -> i32 {
        self.attr(name).and_then(|s| s.parse().ok()).unwrap_or(0)
    }

    pub fn attr_bool(&self, name: &str) -> bool {
        self.attr(name).map(|s| s == "1").unwrap_or(false)
    }

    /// Child items carrying the given tag, preserving server order.
    pub fn items_named<'a>(
        &'a self,
        tag: &'a str,
    ) -> impl Iterator<Item = &'a HashMap<String, String>> {
        self.items
            .iter()
            .filter(move |(name, _)| name == tag)
            .map(|(_, attrs)| attrs)
    }
}

fn attr_map(e: &BytesStart<'_>) -> Result<HashMap<String, String>, WireError> {
    let mut map = HashMap::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|e| WireError::Xml(e.to_string()))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
        let value = attr
            .unescape_value()
            .map_err(|e| WireError::Xml(e.to_string()))?
            .to_string();
        map.insert(key, value);
    }
    Ok(map)
}

/// Parse one response document into root attributes and child items.
pub fn parse_doc(doc: &str) -> Result<ParsedDoc, WireError> {
    let mut reader = Reader::from_str(doc);
    reader.config_mut().trim_text(true);

    let mut parsed = ParsedDoc::default();
    let mut depth = 0usize;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if depth == 0 {
                    parsed.root = name;
                    parsed.attrs = attr_map(&e)?;
                } else if depth == 1 {
                    parsed.items.push((name, attr_map(&e)?));
                }
                depth += 1;
            }
            Ok(Event::Empty(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if depth == 0 {
                    parsed.root = name;
                    parsed.attrs = attr_map(&e)?;
                    // Self-closing root: complete document
                    break;
                } else if depth == 1 {
                    parsed.items.push((name, attr_map(&e)?));
                }
            }
            Ok(Event::End(_)) => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    break;
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(WireError::Xml(e.to_string())),
        }
    }

    if parsed.root.is_empty() {
        return Err(WireError::Xml("document without a root element".into()));
    }
    Ok(parsed)
}
