//! In-memory device and property model
//!
//! Built from `def*Vector` elements and mutated in place by `set*Vector`.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};

use crate::error::{IndiError, IndiResult};
use crate::format::parse_sexagesimal;
use crate::protocol::{element_tag, parse_switch, standard_properties};
use crate::xml::XmlElement;
use crate::{IndiPermission, IndiPropertyState, IndiPropertyType, SwitchRule};

/// Number element value with its display metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumberValue {
    pub value: f64,
    pub format: String,
    pub min: f64,
    pub max: f64,
    pub step: f64,
}

impl NumberValue {
    pub fn new(value: f64) -> Self {
        Self {
            value,
            format: "%g".to_string(),
            min: 0.0,
            max: 0.0,
            step: 0.0,
        }
    }
}

/// Last BLOB received (or staged) for an element
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlobValue {
    #[serde(skip)]
    pub data: Vec<u8>,
    pub format: String,
    pub size: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ElementValue {
    Text(String),
    Number(NumberValue),
    Switch(bool),
    Light(IndiPropertyState),
    Blob(BlobValue),
}

impl ElementValue {
    pub fn kind(&self) -> IndiPropertyType {
        match self {
            Self::Text(_) => IndiPropertyType::Text,
            Self::Number(_) => IndiPropertyType::Number,
            Self::Switch(_) => IndiPropertyType::Switch,
            Self::Light(_) => IndiPropertyType::Light,
            Self::Blob(_) => IndiPropertyType::Blob,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(n.value),
            _ => None,
        }
    }

    pub fn as_switch(&self) -> Option<bool> {
        match self {
            Self::Switch(on) => Some(*on),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Element {
    pub name: String,
    pub label: String,
    pub value: ElementValue,
}

impl Element {
    fn from_definition(child: &XmlElement, kind: IndiPropertyType) -> IndiResult<Self> {
        let name = child.attr_or_empty("name").to_string();
        if name.is_empty() {
            return Err(IndiError::ParseError(format!("<{}> without name", child.tag)));
        }
        let label = child
            .attr("label")
            .filter(|l| !l.is_empty())
            .unwrap_or(&name)
            .to_string();
        let value = match kind {
            IndiPropertyType::Text => ElementValue::Text(child.text.clone()),
            IndiPropertyType::Number => {
                let mut number = NumberValue::new(parse_number(&child.text)?);
                if let Some(format) = child.attr("format") {
                    number.format = format.to_string();
                }
                number.min = parse_optional_number(child.attr("min"))?.unwrap_or(0.0);
                number.max = parse_optional_number(child.attr("max"))?.unwrap_or(0.0);
                number.step = parse_optional_number(child.attr("step"))?.unwrap_or(0.0);
                ElementValue::Number(number)
            }
            IndiPropertyType::Switch => ElementValue::Switch(parse_switch_value(&child.text)?),
            IndiPropertyType::Light => ElementValue::Light(parse_light_value(&child.text)?),
            IndiPropertyType::Blob => ElementValue::Blob(BlobValue {
                format: child.attr_or_empty("format").to_string(),
                ..Default::default()
            }),
        };
        Ok(Self { name, label, value })
    }
}

/// A named, typed property vector on a device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    pub device: String,
    pub name: String,
    pub label: String,
    pub group: String,
    pub kind: IndiPropertyType,
    pub state: IndiPropertyState,
    pub perm: IndiPermission,
    /// Only meaningful for switch vectors
    pub rule: SwitchRule,
    pub timeout: f64,
    pub timestamp: Option<String>,
    pub elements: Vec<Element>,
}

impl Property {
    /// Build from a `def*Vector` element
    pub fn from_definition(el: &XmlElement, kind: IndiPropertyType) -> IndiResult<Self> {
        let device = el.attr_or_empty("device").to_string();
        let name = el.attr_or_empty("name").to_string();
        if device.is_empty() || name.is_empty() {
            return Err(IndiError::ParseError(format!(
                "<{}> requires device and name",
                el.tag
            )));
        }
        let default_perm = if kind == IndiPropertyType::Light {
            IndiPermission::ReadOnly
        } else {
            IndiPermission::ReadWrite
        };
        let child_tag = element_tag("def", kind);
        let elements = el
            .children
            .iter()
            .filter(|c| c.tag == child_tag)
            .map(|c| Element::from_definition(c, kind))
            .collect::<IndiResult<Vec<_>>>()?;

        Ok(Self {
            label: el
                .attr("label")
                .filter(|l| !l.is_empty())
                .unwrap_or(&name)
                .to_string(),
            group: el.attr_or_empty("group").to_string(),
            kind,
            state: el
                .attr("state")
                .and_then(IndiPropertyState::parse)
                .unwrap_or_default(),
            perm: el
                .attr("perm")
                .and_then(IndiPermission::parse)
                .unwrap_or(default_perm),
            rule: el.attr("rule").and_then(SwitchRule::parse).unwrap_or_default(),
            timeout: parse_optional_number(el.attr("timeout"))?.unwrap_or(0.0),
            timestamp: el.attr("timestamp").map(str::to_string),
            elements,
            device,
            name,
        })
    }

    /// Apply a `set*Vector` element. Returns the names of the elements that changed.
    ///
    /// Unknown element names are skipped. A BLOB with `size="0"` only updates state.
    /// If any child fails to parse the property is left untouched.
    pub fn apply_update(&mut self, el: &XmlElement) -> IndiResult<Vec<String>> {
        let mut next = self.clone();
        let updated = next.merge_update(el)?;
        *self = next;
        Ok(updated)
    }

    fn merge_update(&mut self, el: &XmlElement) -> IndiResult<Vec<String>> {
        if let Some(state) = el.attr("state").and_then(IndiPropertyState::parse) {
            self.state = state;
        }
        if let Some(timeout) = parse_optional_number(el.attr("timeout"))? {
            self.timeout = timeout;
        }
        if let Some(ts) = el.attr("timestamp") {
            self.timestamp = Some(ts.to_string());
        }

        let child_tag = element_tag("one", self.kind);
        let mut updated = Vec::new();
        for child in el.children.iter().filter(|c| c.tag == child_tag) {
            let name = child.attr_or_empty("name");
            let Some(element) = self.elements.iter_mut().find(|e| e.name == name) else {
                tracing::debug!("{}.{}: ignoring unknown element {}", self.device, self.name, name);
                continue;
            };
            match &mut element.value {
                ElementValue::Text(s) => *s = child.text.clone(),
                ElementValue::Number(n) => {
                    n.value = parse_number(&child.text)?;
                    if let Some(min) = parse_optional_number(child.attr("min"))? {
                        n.min = min;
                    }
                    if let Some(max) = parse_optional_number(child.attr("max"))? {
                        n.max = max;
                    }
                }
                ElementValue::Switch(on) => *on = parse_switch_value(&child.text)?,
                ElementValue::Light(state) => *state = parse_light_value(&child.text)?,
                ElementValue::Blob(blob) => {
                    let size: usize = child
                        .attr("size")
                        .and_then(|s| s.trim().parse().ok())
                        .unwrap_or(0);
                    if size == 0 {
                        continue;
                    }
                    blob.data = decode_blob(&child.text)?;
                    blob.size = blob.data.len();
                    blob.format = child.attr_or_empty("format").to_string();
                    if blob.size != size {
                        tracing::warn!(
                            "{}.{}.{}: BLOB declared {} bytes, decoded {}",
                            self.device,
                            self.name,
                            element.name,
                            size,
                            blob.size
                        );
                    }
                }
            }
            updated.push(element.name.clone());
        }
        Ok(updated)
    }

    pub fn element(&self, name: &str) -> Option<&Element> {
        self.elements.iter().find(|e| e.name == name)
    }

    pub fn element_mut(&mut self, name: &str) -> Option<&mut Element> {
        self.elements.iter_mut().find(|e| e.name == name)
    }

    pub fn is_writable(&self) -> bool {
        self.perm != IndiPermission::ReadOnly
    }

    /// Set one switch, honouring the vector's rule
    pub fn set_switch(&mut self, element: &str, on: bool) -> IndiResult<()> {
        if self.element(element).is_none() {
            return Err(IndiError::ElementNotFound {
                device: self.device.clone(),
                property: self.name.clone(),
                element: element.to_string(),
            });
        }
        let exclusive = self.rule.is_exclusive();
        for e in &mut self.elements {
            if let ElementValue::Switch(value) = &mut e.value {
                if e.name == element {
                    *value = on;
                } else if on && exclusive {
                    *value = false;
                }
            }
        }
        Ok(())
    }

    /// The first switch that is On
    pub fn active_switch(&self) -> Option<&Element> {
        self.elements
            .iter()
            .find(|e| matches!(e.value, ElementValue::Switch(true)))
    }
}

/// A device and everything the server has told us about it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub name: String,
    /// Display name. The protocol never sends one, so it starts as `name`.
    pub label: String,
    pub properties: Vec<Property>,
    pub messages: Vec<String>,
    /// `enableBLOB` already sent for this device
    pub blob_enabled: bool,
}

impl Device {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            label: name.to_string(),
            properties: Vec::new(),
            messages: Vec::new(),
            blob_enabled: false,
        }
    }

    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties.iter().find(|p| p.name == name)
    }

    pub fn property_mut(&mut self, name: &str) -> Option<&mut Property> {
        self.properties.iter_mut().find(|p| p.name == name)
    }

    /// Add a property. A redefinition replaces the old one and reports `PropertyDuplicated`.
    pub fn add_property(&mut self, property: Property) -> IndiResult<()> {
        match self.properties.iter_mut().find(|p| p.name == property.name) {
            Some(existing) => {
                let err = IndiError::PropertyDuplicated {
                    device: self.name.clone(),
                    property: property.name.clone(),
                };
                *existing = property;
                Err(err)
            }
            None => {
                self.properties.push(property);
                Ok(())
            }
        }
    }

    pub fn remove_property(&mut self, name: &str) -> Option<Property> {
        let idx = self.properties.iter().position(|p| p.name == name)?;
        Some(self.properties.remove(idx))
    }

    /// `CONNECTION.CONNECT` is On
    pub fn is_connected(&self) -> bool {
        self.property(standard_properties::CONNECTION)
            .and_then(|p| p.element(standard_properties::CONNECT))
            .and_then(|e| e.value.as_switch())
            .unwrap_or(false)
    }

    pub fn driver_name(&self) -> Option<&str> {
        self.driver_info(standard_properties::DRIVER_NAME)
    }

    pub fn driver_exec(&self) -> Option<&str> {
        self.driver_info(standard_properties::DRIVER_EXEC)
    }

    fn driver_info(&self, element: &str) -> Option<&str> {
        self.property(standard_properties::DRIVER_INFO)?
            .element(element)?
            .value
            .as_text()
    }

    pub fn add_message(&mut self, line: String) {
        self.messages.push(line);
    }

    pub fn last_message(&self) -> Option<&str> {
        self.messages.last().map(String::as_str)
    }
}

/// "{timestamp}: {message}" for any element carrying a `message` attribute
pub fn message_line(el: &XmlElement) -> Option<String> {
    let message = el.attr("message").filter(|m| !m.is_empty())?;
    let timestamp = el
        .attr("timestamp")
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S").to_string());
    Some(format!("{}: {}", timestamp, message))
}

fn parse_number(text: &str) -> IndiResult<f64> {
    parse_sexagesimal(text).ok_or_else(|| IndiError::InvalidValue {
        kind: "number".to_string(),
        value: text.trim().to_string(),
    })
}

fn parse_optional_number(text: Option<&str>) -> IndiResult<Option<f64>> {
    match text.map(str::trim).filter(|t| !t.is_empty()) {
        Some(t) => parse_number(t).map(Some),
        None => Ok(None),
    }
}

fn parse_switch_value(text: &str) -> IndiResult<bool> {
    parse_switch(text).ok_or_else(|| IndiError::InvalidValue {
        kind: "switch".to_string(),
        value: text.trim().to_string(),
    })
}

fn parse_light_value(text: &str) -> IndiResult<IndiPropertyState> {
    IndiPropertyState::parse(text).ok_or_else(|| IndiError::InvalidValue {
        kind: "light".to_string(),
        value: text.trim().to_string(),
    })
}

/// Base64 payload with the line breaks the server inserts
fn decode_blob(text: &str) -> IndiResult<Vec<u8>> {
    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| IndiError::ParseError(format!("BLOB base64: {}", e)))
}
