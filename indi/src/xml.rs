//! Incremental assembly of top-level XML elements
//!
//! quick-xml yields a flat stream of events. The server stream has no root
//! element, so every top-level element is a complete command. The assembler
//! rebuilds each one into an owned tree and hands it out when it closes.

use std::collections::HashMap;

use quick_xml::events::{BytesStart, Event};

use crate::error::{IndiError, IndiResult};

/// Owned XML element
#[derive(Debug, Clone, Default, PartialEq)]
pub struct XmlElement {
    pub tag: String,
    pub attributes: HashMap<String, String>,
    pub text: String,
    pub children: Vec<XmlElement>,
}

impl XmlElement {
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_string(),
            ..Default::default()
        }
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// Attribute value, empty string when absent
    pub fn attr_or_empty(&self, name: &str) -> &str {
        self.attr(name).unwrap_or("")
    }

    pub fn with_attr(mut self, name: &str, value: &str) -> Self {
        self.attributes.insert(name.to_string(), value.to_string());
        self
    }

    pub fn with_text(mut self, text: &str) -> Self {
        self.text = text.to_string();
        self
    }

    pub fn with_child(mut self, child: XmlElement) -> Self {
        self.children.push(child);
        self
    }

    fn from_start(e: &BytesStart<'_>) -> IndiResult<Self> {
        let tag = String::from_utf8_lossy(e.name().as_ref()).to_string();
        let mut attributes = HashMap::new();
        for attr in e.attributes() {
            let attr = attr.map_err(|err| IndiError::ParseError(format!("<{}>: {}", tag, err)))?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
            let value = attr
                .unescape_value()
                .map_err(|err| IndiError::ParseError(format!("<{}> {}: {}", tag, key, err)))?;
            attributes.insert(key, value.to_string());
        }
        Ok(Self {
            tag,
            attributes,
            ..Default::default()
        })
    }
}

/// Rebuilds complete top-level elements from reader events
#[derive(Debug, Default)]
pub struct ElementAssembler {
    stack: Vec<XmlElement>,
}

impl ElementAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop any partially assembled element
    pub fn reset(&mut self) {
        self.stack.clear();
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Feed one event. Returns the element that just closed at the top level.
    pub fn push(&mut self, event: Event<'_>) -> IndiResult<Option<XmlElement>> {
        match event {
            Event::Start(e) => {
                self.stack.push(XmlElement::from_start(&e)?);
                Ok(None)
            }
            Event::Empty(e) => {
                let element = XmlElement::from_start(&e)?;
                Ok(self.close(element))
            }
            Event::Text(t) => {
                if let Some(top) = self.stack.last_mut() {
                    let text = t
                        .unescape()
                        .map_err(|err| IndiError::ParseError(format!("<{}> text: {}", top.tag, err)))?;
                    top.text.push_str(&text);
                }
                Ok(None)
            }
            Event::CData(c) => {
                if let Some(top) = self.stack.last_mut() {
                    top.text.push_str(&String::from_utf8_lossy(&c));
                }
                Ok(None)
            }
            Event::End(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                match self.stack.pop() {
                    Some(element) if element.tag == name => Ok(self.close(element)),
                    Some(element) => {
                        let msg = format!("expected </{}>, found </{}>", element.tag, name);
                        self.reset();
                        Err(IndiError::ParseError(msg))
                    }
                    None => Err(IndiError::ParseError(format!("unmatched </{}>", name))),
                }
            }
            // declarations, comments, processing instructions, Eof
            _ => Ok(None),
        }
    }

    fn close(&mut self, element: XmlElement) -> Option<XmlElement> {
        match self.stack.last_mut() {
            Some(parent) => {
                parent.children.push(element);
                None
            }
            None => Some(element),
        }
    }
}
