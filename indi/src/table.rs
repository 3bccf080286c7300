//! Flag-tagged property list shared with consumers
//!
//! The listener is the only source of Insert/Update/Remove flags; local
//! writes go through [`PropertyTable::stage`], which leaves flags alone. Consumers
//! take changes with [`PropertyTable::changes`] and then
//! [`acknowledge`](PropertyTable::acknowledge) them: an acknowledged Remove
//! deletes the item, any other flag goes back to Idle.
//!
//! Items are keyed by `"/device/property/element"`, so a key is never present
//! twice. A Remove that is re-defined before it is acknowledged becomes an
//! Update.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::device::{Element, ElementValue, Property};
use crate::error::{IndiError, IndiResult};
use crate::format::format_number;
use crate::{IndiPropertyState, IndiPropertyType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PropertyFlag {
    #[default]
    Idle,
    Insert,
    Update,
    Remove,
}

/// One element as seen by a consumer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyListItem {
    pub device: String,
    pub property: String,
    pub element: String,
    pub kind: IndiPropertyType,
    /// Display text; numbers are rendered with `number_format`
    pub value: String,
    /// Raw value for number elements
    pub number: Option<f64>,
    pub number_format: String,
    pub state: IndiPropertyState,
    pub key: String,
    pub flag: PropertyFlag,
}

impl PropertyListItem {
    fn from_element(property: &Property, element: &Element, flag: PropertyFlag) -> Self {
        let mut item = Self {
            device: property.device.clone(),
            property: property.name.clone(),
            element: element.name.clone(),
            kind: property.kind,
            value: String::new(),
            number: None,
            number_format: String::new(),
            state: property.state,
            key: property_key(&property.device, &property.name, &element.name),
            flag,
        };
        item.refresh(property, element);
        item
    }

    fn refresh(&mut self, property: &Property, element: &Element) {
        self.state = property.state;
        self.value = match &element.value {
            ElementValue::Text(s) => s.clone(),
            ElementValue::Number(n) => {
                self.number = Some(n.value);
                self.number_format = n.format.clone();
                format_number(n.value, &n.format)
            }
            ElementValue::Switch(on) => if *on { "ON" } else { "OFF" }.to_string(),
            ElementValue::Light(state) => state.as_str().to_string(),
            ElementValue::Blob(blob) => blob.size.to_string(),
        };
    }

    /// Number value as a plain decimal string
    pub fn raw_value(&self) -> String {
        match self.number {
            Some(n) => n.to_string(),
            None => self.value.clone(),
        }
    }

    fn mark_changed(&mut self) {
        match self.flag {
            PropertyFlag::Idle | PropertyFlag::Remove => self.flag = PropertyFlag::Update,
            PropertyFlag::Insert | PropertyFlag::Update => {}
        }
    }
}

/// Caller's request to change one element
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPropertyRequest {
    pub device: String,
    pub property: String,
    pub element: String,
    pub kind: IndiPropertyType,
    pub key: String,
    pub value: String,
}

impl NewPropertyRequest {
    pub fn new(device: &str, property: &str, element: &str, kind: IndiPropertyType, value: &str) -> Self {
        Self {
            device: device.to_string(),
            property: property.to_string(),
            element: element.to_string(),
            kind,
            key: property_key(device, property, element),
            value: value.to_string(),
        }
    }

    pub fn from_key(key: &str, kind: IndiPropertyType, value: &str) -> IndiResult<Self> {
        let (device, property, element) = parse_key(key)?;
        Ok(Self::new(&device, &property, &element, kind, value))
    }
}

/// `"/device/property/element"`
///
/// `%` and `/` inside a name are written as `%25` and `%2F`, so distinct
/// names never share a key.
pub fn property_key(device: &str, property: &str, element: &str) -> String {
    format!(
        "/{}/{}/{}",
        escape_segment(device),
        escape_segment(property),
        escape_segment(element)
    )
}

/// Split a composite key back into device, property and element
pub fn parse_key(key: &str) -> IndiResult<(String, String, String)> {
    let invalid = || IndiError::InvalidKey(key.to_string());
    let rest = key.strip_prefix('/').ok_or_else(invalid)?;
    let parts: Vec<&str> = rest.split('/').collect();
    let [device, property, element] = parts.as_slice() else {
        return Err(invalid());
    };
    if device.is_empty() || property.is_empty() || element.is_empty() {
        return Err(invalid());
    }
    Ok((
        unescape_segment(device),
        unescape_segment(property),
        unescape_segment(element),
    ))
}

fn device_prefix(device: &str) -> String {
    format!("/{}/", escape_segment(device))
}

fn escape_segment(name: &str) -> Cow<'_, str> {
    if name.contains(|c: char| c == '%' || c == '/') {
        Cow::Owned(name.replace('%', "%25").replace('/', "%2F"))
    } else {
        Cow::Borrowed(name)
    }
}

fn unescape_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    let mut rest = segment;
    while let Some(idx) = rest.find('%') {
        out.push_str(&rest[..idx]);
        let tail = &rest[idx..];
        match tail.get(1..3) {
            Some(code) if code.eq_ignore_ascii_case("2f") => out.push('/'),
            Some("25") => out.push('%'),
            _ => {
                out.push('%');
                rest = &tail[1..];
                continue;
            }
        }
        rest = &tail[3..];
    }
    out.push_str(rest);
    out
}

#[derive(Debug, Default)]
struct TableInner {
    items: BTreeMap<String, PropertyListItem>,
    requests: Vec<NewPropertyRequest>,
}

impl TableInner {
    fn with_prefix<'a>(&'a mut self, prefix: &'a str) -> impl Iterator<Item = &'a mut PropertyListItem> + 'a {
        self.items
            .range_mut(prefix.to_string()..)
            .take_while(move |(k, _)| k.starts_with(prefix))
            .map(|(_, v)| v)
    }
}

/// Shared handle; clones refer to the same list
#[derive(Debug, Clone, Default)]
pub struct PropertyTable {
    inner: Arc<Mutex<TableInner>>,
}

impl PropertyTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flag every element of a (re)defined property
    pub async fn define(&self, property: &Property) {
        let mut inner = self.inner.lock().await;
        let prefix = property_key(&property.device, &property.name, "");
        for element in &property.elements {
            let key = property_key(&property.device, &property.name, &element.name);
            inner
                .items
                .entry(key)
                .and_modify(|item| {
                    item.refresh(property, element);
                    item.mark_changed();
                })
                .or_insert_with(|| PropertyListItem::from_element(property, element, PropertyFlag::Insert));
        }
        // elements dropped by a redefinition
        for item in inner.with_prefix(&prefix) {
            if property.element(&item.element).is_none() {
                item.flag = PropertyFlag::Remove;
            }
        }
    }

    /// Refresh the elements a `set*Vector` touched; a state change touches all of them
    pub async fn update(&self, property: &Property, updated: &[String]) {
        let mut inner = self.inner.lock().await;
        for element in &property.elements {
            let key = property_key(&property.device, &property.name, &element.name);
            let Some(item) = inner.items.get_mut(&key) else {
                continue;
            };
            if item.state != property.state || updated.iter().any(|n| n == &element.name) {
                item.refresh(property, element);
                item.mark_changed();
            }
        }
    }

    /// Mirror a locally staged write: values and state change, flags do not
    pub async fn stage(&self, property: &Property) {
        let mut inner = self.inner.lock().await;
        for element in &property.elements {
            let key = property_key(&property.device, &property.name, &element.name);
            if let Some(item) = inner.items.get_mut(&key) {
                item.refresh(property, element);
            }
        }
    }

    pub async fn remove_property(&self, device: &str, property: &str) -> usize {
        let prefix = property_key(device, property, "");
        self.flag_removed(&prefix).await
    }

    pub async fn remove_device(&self, device: &str) -> usize {
        let prefix = device_prefix(device);
        self.flag_removed(&prefix).await
    }

    async fn flag_removed(&self, prefix: &str) -> usize {
        let mut inner = self.inner.lock().await;
        let mut count = 0;
        for item in inner.with_prefix(prefix) {
            item.flag = PropertyFlag::Remove;
            count += 1;
        }
        count
    }

    pub async fn get_property_item(&self, device: &str, property: &str, element: &str) -> Option<PropertyListItem> {
        let inner = self.inner.lock().await;
        inner.items.get(&property_key(device, property, element)).cloned()
    }

    pub async fn get_item(&self, key: &str) -> Option<PropertyListItem> {
        self.inner.lock().await.items.get(key).cloned()
    }

    /// The switch element of `property` that is ON
    pub async fn get_active_switch_item(&self, device: &str, property: &str) -> Option<PropertyListItem> {
        let mut inner = self.inner.lock().await;
        let prefix = property_key(device, property, "");
        let found = inner
            .with_prefix(&prefix)
            .find(|item| item.kind == IndiPropertyType::Switch && item.value == "ON")
            .map(|item| item.clone());
        found
    }

    pub async fn snapshot(&self) -> Vec<PropertyListItem> {
        self.inner.lock().await.items.values().cloned().collect()
    }

    /// Items whose flag is not Idle
    pub async fn changes(&self) -> Vec<PropertyListItem> {
        self.inner
            .lock()
            .await
            .items
            .values()
            .filter(|item| item.flag != PropertyFlag::Idle)
            .cloned()
            .collect()
    }

    /// Mark a change as processed. Returns false for an unknown key.
    pub async fn acknowledge(&self, key: &str) -> bool {
        let mut inner = self.inner.lock().await;
        acknowledge_locked(&mut inner, key)
    }

    /// `changes` and `acknowledge` in one step
    pub async fn drain_changes(&self) -> Vec<PropertyListItem> {
        let mut inner = self.inner.lock().await;
        let changed: Vec<PropertyListItem> = inner
            .items
            .values()
            .filter(|item| item.flag != PropertyFlag::Idle)
            .cloned()
            .collect();
        for item in &changed {
            acknowledge_locked(&mut inner, &item.key);
        }
        changed
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.items.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.items.is_empty()
    }

    pub async fn push_request(&self, request: NewPropertyRequest) {
        self.inner.lock().await.requests.push(request);
    }

    pub async fn pending_requests(&self) -> Vec<NewPropertyRequest> {
        self.inner.lock().await.requests.clone()
    }

    pub async fn clear_requests(&self) {
        self.inner.lock().await.requests.clear();
    }

    pub async fn clear(&self) {
        let mut inner = self.inner.lock().await;
        inner.items.clear();
        inner.requests.clear();
    }
}

fn acknowledge_locked(inner: &mut TableInner, key: &str) -> bool {
    let Some(flag) = inner.items.get(key).map(|item| item.flag) else {
        return false;
    };
    if flag == PropertyFlag::Remove {
        inner.items.remove(key);
    } else if let Some(item) = inner.items.get_mut(key) {
        item.flag = PropertyFlag::Idle;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml::XmlElement;

    fn switch_property(connect: &str, disconnect: &str) -> Property {
        let def = XmlElement::new("defSwitchVector")
            .with_attr("device", "CCD Simulator")
            .with_attr("name", "CONNECTION")
            .with_child(XmlElement::new("defSwitch").with_attr("name", "CONNECT").with_text(connect))
            .with_child(
                XmlElement::new("defSwitch")
                    .with_attr("name", "DISCONNECT")
                    .with_text(disconnect),
            );
        Property::from_definition(&def, IndiPropertyType::Switch).unwrap()
    }

    fn ra_property(value: &str) -> Property {
        let def = XmlElement::new("defNumberVector")
            .with_attr("device", "Telescope")
            .with_attr("name", "EQUATORIAL_EOD_COORD")
            .with_child(
                XmlElement::new("defNumber")
                    .with_attr("name", "RA")
                    .with_attr("format", "%10.6m")
                    .with_text(value),
            );
        Property::from_definition(&def, IndiPropertyType::Number).unwrap()
    }

    #[test]
    fn test_key_round_trip() {
        let key = property_key("CCD Simulator", "CONNECTION", "CONNECT");
        assert_eq!(key, "/CCD Simulator/CONNECTION/CONNECT");
        assert_eq!(
            parse_key(&key).unwrap(),
            (
                "CCD Simulator".to_string(),
                "CONNECTION".to_string(),
                "CONNECT".to_string()
            )
        );
        assert!(parse_key("CCD/CONNECTION/CONNECT").is_err());
        assert!(parse_key("/CCD/CONNECTION").is_err());
        assert!(parse_key("/CCD//CONNECT").is_err());

        let req = NewPropertyRequest::from_key(&key, IndiPropertyType::Switch, "ON").unwrap();
        assert_eq!(req.device, "CCD Simulator");
        assert_eq!(req.key, key);
    }

    #[tokio::test]
    async fn test_define_inserts_then_acknowledge() {
        let table = PropertyTable::new();
        table.define(&switch_property("Off", "On")).await;

        let changes = table.changes().await;
        assert_eq!(changes.len(), 2);
        assert!(changes.iter().all(|i| i.flag == PropertyFlag::Insert));

        let active = table
            .get_active_switch_item("CCD Simulator", "CONNECTION")
            .await
            .unwrap();
        assert_eq!(active.element, "DISCONNECT");

        assert_eq!(table.drain_changes().await.len(), 2);
        assert!(table.changes().await.is_empty());
        assert_eq!(table.len().await, 2);
    }

    #[tokio::test]
    async fn test_update_keeps_pending_insert() {
        let table = PropertyTable::new();
        let mut prop = switch_property("Off", "On");
        table.define(&prop).await;

        prop.set_switch("CONNECT", true).unwrap();
        table.update(&prop, &["CONNECT".to_string()]).await;
        let item = table
            .get_property_item("CCD Simulator", "CONNECTION", "CONNECT")
            .await
            .unwrap();
        assert_eq!(item.flag, PropertyFlag::Insert);
        assert_eq!(item.value, "ON");

        table.drain_changes().await;
        table.update(&prop, &["CONNECT".to_string()]).await;
        let changes = table.changes().await;
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].flag, PropertyFlag::Update);
    }

    #[tokio::test]
    async fn test_state_change_flags_whole_property() {
        let table = PropertyTable::new();
        let mut prop = switch_property("Off", "On");
        table.define(&prop).await;
        table.drain_changes().await;

        prop.state = IndiPropertyState::Busy;
        table.update(&prop, &[]).await;
        let changes = table.changes().await;
        assert_eq!(changes.len(), 2);
        assert!(changes.iter().all(|i| i.state == IndiPropertyState::Busy));
    }

    #[tokio::test]
    async fn test_remove_then_redefine_is_update() {
        let table = PropertyTable::new();
        let prop = switch_property("Off", "On");
        table.define(&prop).await;
        table.drain_changes().await;

        assert_eq!(table.remove_property("CCD Simulator", "CONNECTION").await, 2);
        table.define(&prop).await;
        let changes = table.changes().await;
        assert_eq!(changes.len(), 2);
        assert!(changes.iter().all(|i| i.flag == PropertyFlag::Update));
        assert_eq!(table.len().await, 2);
    }

    #[tokio::test]
    async fn test_remove_device_by_prefix() {
        let table = PropertyTable::new();
        table.define(&switch_property("Off", "On")).await;
        table.define(&ra_property("1.0")).await;
        table.drain_changes().await;

        assert_eq!(table.remove_device("CCD Simulator").await, 2);
        assert_eq!(table.remove_device("CCD").await, 0);
        table.drain_changes().await;
        let keys: Vec<String> = table.snapshot().await.into_iter().map(|i| i.key).collect();
        assert_eq!(keys, vec!["/Telescope/EQUATORIAL_EOD_COORD/RA".to_string()]);
    }

    #[tokio::test]
    async fn test_stage_keeps_flags() {
        let table = PropertyTable::new();
        table.define(&switch_property("Off", "On")).await;
        table.drain_changes().await;

        let mut staged = switch_property("On", "Off");
        staged.state = IndiPropertyState::Busy;
        table.stage(&staged).await;
        assert!(table.changes().await.is_empty());
        let item = table
            .get_property_item("CCD Simulator", "CONNECTION", "CONNECT")
            .await
            .unwrap();
        assert_eq!(item.value, "ON");
        assert_eq!(item.state, IndiPropertyState::Busy);
        assert_eq!(item.flag, PropertyFlag::Idle);
    }

    #[tokio::test]
    async fn test_names_with_slashes_do_not_collide() {
        let text_property = |device: &str, name: &str| {
            let def = XmlElement::new("defTextVector")
                .with_attr("device", device)
                .with_attr("name", name)
                .with_child(XmlElement::new("defText").with_attr("name", "E").with_text("x"));
            Property::from_definition(&def, IndiPropertyType::Text).unwrap()
        };
        let table = PropertyTable::new();
        table.define(&text_property("A/B", "C")).await;
        table.define(&text_property("A", "B/C")).await;
        assert_eq!(table.len().await, 2);

        let key = property_key("A/B", "C", "E");
        assert_eq!(key, "/A%2FB/C/E");
        assert_ne!(key, property_key("A", "B/C", "E"));
        assert_eq!(
            parse_key(&key).unwrap(),
            ("A/B".to_string(), "C".to_string(), "E".to_string())
        );
        assert_eq!(parse_key(&property_key("50%", "P", "E")).unwrap().0, "50%");

        table.drain_changes().await;
        assert_eq!(table.remove_device("A").await, 1);
        let removed = table.changes().await;
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].device, "A");
        assert!(table.get_property_item("A/B", "C", "E").await.is_some());
    }

    #[tokio::test]
    async fn test_number_items_are_formatted() {
        let table = PropertyTable::new();
        table.define(&ra_property("12.5")).await;
        let item = table
            .get_property_item("Telescope", "EQUATORIAL_EOD_COORD", "RA")
            .await
            .unwrap();
        assert_eq!(item.value, "12:30:00");
        assert_eq!(item.raw_value(), "12.5");
        assert_eq!(item.number_format, "%10.6m");
    }

    #[tokio::test]
    async fn test_redefinition_drops_missing_elements() {
        let table = PropertyTable::new();
        table.define(&switch_property("Off", "On")).await;
        table.drain_changes().await;

        let mut smaller = switch_property("On", "Off");
        smaller.elements.retain(|e| e.name == "CONNECT");
        table.define(&smaller).await;
        let item = table
            .get_property_item("CCD Simulator", "CONNECTION", "DISCONNECT")
            .await
            .unwrap();
        assert_eq!(item.flag, PropertyFlag::Remove);
        assert!(table.acknowledge(&item.key).await);
        assert!(!table.acknowledge(&item.key).await);
        assert_eq!(table.len().await, 1);
    }

    #[tokio::test]
    async fn test_requests() {
        let table = PropertyTable::new();
        table
            .push_request(NewPropertyRequest::new(
                "CCD Simulator",
                "CONNECTION",
                "CONNECT",
                IndiPropertyType::Switch,
                "ON",
            ))
            .await;
        assert_eq!(table.pending_requests().await.len(), 1);
        table.clear_requests().await;
        assert!(table.pending_requests().await.is_empty());
    }
}
