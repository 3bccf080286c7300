//! Routing of complete inbound elements
//!
//! Each element changes the registry first, then the property table, then
//! goes out as an [`IndiEvent`]. Registry locks are never held across a send
//! or a file write.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, RwLock};

use crate::blob::BlobSink;
use crate::client::IndiEvent;
use crate::device::{message_line, BlobValue, ElementValue, Property};
use crate::encoder;
use crate::error::{IndiError, IndiResult};
use crate::protocol::InboundCommand;
use crate::registry::Registry;
use crate::table::PropertyTable;
use crate::xml::XmlElement;
use crate::BlobMode;

pub(crate) struct Dispatcher {
    registry: Arc<RwLock<Registry>>,
    table: PropertyTable,
    events: broadcast::Sender<IndiEvent>,
    commands: mpsc::Sender<String>,
    blobs: BlobSink,
    auto_enable_blobs: bool,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<RwLock<Registry>>,
        table: PropertyTable,
        events: broadcast::Sender<IndiEvent>,
        commands: mpsc::Sender<String>,
        blobs: BlobSink,
        auto_enable_blobs: bool,
    ) -> Self {
        Self {
            registry,
            table,
            events,
            commands,
            blobs,
            auto_enable_blobs,
        }
    }

    pub async fn dispatch(&self, el: &XmlElement) -> IndiResult<()> {
        match InboundCommand::classify(&el.tag) {
            InboundCommand::Echo => Ok(()),
            InboundCommand::Message => {
                self.record_message(el).await;
                Ok(())
            }
            InboundCommand::DelProperty => {
                self.record_message(el).await;
                self.delete_property(el).await
            }
            InboundCommand::Define(kind) => {
                let result = self.define_property(Property::from_definition(el, kind)?).await;
                self.record_message(el).await;
                result
            }
            InboundCommand::Set(_) => {
                self.record_message(el).await;
                self.update_property(el).await
            }
            InboundCommand::Unknown => Err(IndiError::DispatchError(el.tag.clone())),
        }
    }

    /// Appends the `message` attribute, if any. Unknown devices drop it.
    async fn record_message(&self, el: &XmlElement) {
        let Some(line) = message_line(el) else {
            return;
        };
        let device = el.attr("device").filter(|d| !d.is_empty());
        {
            let mut registry = self.registry.write().await;
            match device {
                Some(name) => match registry.get_device_mut(name) {
                    Some(d) => d.add_message(line.clone()),
                    None => {
                        tracing::debug!("Message for unknown device {}: {}", name, line);
                        return;
                    }
                },
                None => registry.add_server_message(line.clone()),
            }
        }
        tracing::debug!("INDI message [{}]: {}", device.unwrap_or("server"), line);
        let _ = self.events.send(IndiEvent::Message {
            device: device.map(str::to_string),
            message: line,
        });
    }

    async fn define_property(&self, property: Property) -> IndiResult<()> {
        let device_name = property.device.clone();
        let (created, enable_blobs, added) = {
            let mut registry = self.registry.write().await;
            let created = registry.get_device(&device_name).is_none();
            let device = registry.find_or_create(&device_name);
            let enable_blobs = self.auto_enable_blobs && !device.blob_enabled;
            if enable_blobs {
                device.blob_enabled = true;
            }
            (created, enable_blobs, device.add_property(property.clone()))
        };

        if created {
            let _ = self.events.send(IndiEvent::DeviceDefined(device_name.clone()));
        }
        if enable_blobs {
            let cmd = encoder::enable_blob(BlobMode::Also, &device_name, None);
            if self.commands.send(cmd).await.is_err() {
                return Err(IndiError::ChannelClosed("writer task gone".to_string()));
            }
        }

        self.table.define(&property).await;
        tracing::debug!(
            "Property defined: {}.{} ({:?})",
            device_name,
            property.name,
            property.kind
        );
        let _ = self.events.send(IndiEvent::PropertyDefined {
            device: device_name,
            property: property.name.clone(),
        });
        added
    }

    async fn update_property(&self, el: &XmlElement) -> IndiResult<()> {
        let device_name = el.attr_or_empty("device");
        let property_name = el.attr_or_empty("name");

        let (property, blobs) = {
            let mut registry = self.registry.write().await;
            let device = registry
                .get_device_mut(device_name)
                .ok_or_else(|| IndiError::DeviceNotFound(device_name.to_string()))?;
            let property = device
                .property_mut(property_name)
                .ok_or_else(|| IndiError::PropertyNotFound {
                    device: device_name.to_string(),
                    property: property_name.to_string(),
                })?;
            if InboundCommand::classify(&el.tag) != InboundCommand::Set(property.kind) {
                return Err(IndiError::DispatchError(format!(
                    "{} for {} property {}.{}",
                    el.tag,
                    property.kind.wire_name(),
                    device_name,
                    property_name
                )));
            }
            let updated = property.apply_update(el)?;
            let blobs: Vec<(String, BlobValue)> = property
                .elements
                .iter()
                .filter(|e| updated.contains(&e.name))
                .filter_map(|e| match &e.value {
                    ElementValue::Blob(blob) => Some((e.label.clone(), blob.clone())),
                    _ => None,
                })
                .collect();
            ((property.clone(), updated), blobs)
        };
        let (property, updated) = property;

        self.table.update(&property, &updated).await;
        let _ = self.events.send(IndiEvent::PropertyUpdated {
            device: property.device.clone(),
            property: property.name.clone(),
            state: property.state,
        });

        for (label, blob) in blobs {
            match self.blobs.store(&label, &blob).await {
                Ok(path) => {
                    let _ = self.events.send(IndiEvent::BlobStored {
                        device: property.device.clone(),
                        property: property.name.clone(),
                        path,
                        size: blob.data.len(),
                    });
                }
                Err(e) => {
                    tracing::warn!("Dropping BLOB {}.{}: {}", property.device, property.name, e);
                    let _ = self.events.send(IndiEvent::Error(e.to_string()));
                }
            }
        }
        Ok(())
    }

    async fn delete_property(&self, el: &XmlElement) -> IndiResult<()> {
        let device_name = el.attr_or_empty("device");
        if device_name.is_empty() {
            return Err(IndiError::ParseError("delProperty without device".to_string()));
        }
        match el.attr("name").filter(|n| !n.is_empty()) {
            Some(property_name) => {
                {
                    let mut registry = self.registry.write().await;
                    let device = registry
                        .get_device_mut(device_name)
                        .ok_or_else(|| IndiError::DeviceNotFound(device_name.to_string()))?;
                    device
                        .remove_property(property_name)
                        .ok_or_else(|| IndiError::PropertyNotFound {
                            device: device_name.to_string(),
                            property: property_name.to_string(),
                        })?;
                }
                self.table.remove_property(device_name, property_name).await;
                tracing::debug!("Property deleted: {}.{}", device_name, property_name);
                let _ = self.events.send(IndiEvent::PropertyRemoved {
                    device: device_name.to_string(),
                    property: property_name.to_string(),
                });
            }
            None => {
                if !self.registry.write().await.remove(device_name) {
                    return Err(IndiError::DeviceNotFound(device_name.to_string()));
                }
                let removed = self.table.remove_device(device_name).await;
                tracing::info!("Device deleted: {} ({} elements)", device_name, removed);
                let _ = self.events.send(IndiEvent::DeviceRemoved(device_name.to_string()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::PropertyFlag;
    use crate::IndiPropertyState;

    struct Harness {
        dispatcher: Dispatcher,
        registry: Arc<RwLock<Registry>>,
        table: PropertyTable,
        commands: mpsc::Receiver<String>,
        events: broadcast::Receiver<IndiEvent>,
        dir: tempfile::TempDir,
    }

    fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(RwLock::new(Registry::new()));
        let table = PropertyTable::new();
        let (event_tx, events) = broadcast::channel(64);
        let (cmd_tx, commands) = mpsc::channel(16);
        let dispatcher = Dispatcher::new(
            registry.clone(),
            table.clone(),
            event_tx,
            cmd_tx,
            BlobSink::new(Some(dir.path().to_path_buf())),
            true,
        );
        Harness {
            dispatcher,
            registry,
            table,
            commands,
            events,
            dir,
        }
    }

    fn connection_def() -> XmlElement {
        XmlElement::new("defSwitchVector")
            .with_attr("device", "CCD Simulator")
            .with_attr("name", "CONNECTION")
            .with_attr("state", "Idle")
            .with_child(XmlElement::new("defSwitch").with_attr("name", "CONNECT").with_text("Off"))
            .with_child(XmlElement::new("defSwitch").with_attr("name", "DISCONNECT").with_text("On"))
    }

    fn connection_set(state: &str, connect: &str, disconnect: &str) -> XmlElement {
        XmlElement::new("setSwitchVector")
            .with_attr("device", "CCD Simulator")
            .with_attr("name", "CONNECTION")
            .with_attr("state", state)
            .with_child(XmlElement::new("oneSwitch").with_attr("name", "CONNECT").with_text(connect))
            .with_child(XmlElement::new("oneSwitch").with_attr("name", "DISCONNECT").with_text(disconnect))
    }

    #[tokio::test]
    async fn test_definition_creates_device_and_enables_blobs_once() {
        let mut h = harness();
        h.dispatcher.dispatch(&connection_def()).await.unwrap();

        let registry = h.registry.read().await;
        let device = registry.get_device("CCD Simulator").unwrap();
        assert!(device.property("CONNECTION").is_some());
        assert!(device.blob_enabled);
        drop(registry);

        assert_eq!(
            h.commands.try_recv().unwrap(),
            "<enableBLOB device=\"CCD Simulator\">Also</enableBLOB>"
        );
        let second = connection_def().with_attr("name", "DEBUG");
        h.dispatcher.dispatch(&second).await.unwrap();
        assert!(h.commands.try_recv().is_err());

        assert!(matches!(h.events.try_recv().unwrap(), IndiEvent::DeviceDefined(_)));
        assert_eq!(h.table.changes().await.len(), 4);
    }

    #[tokio::test]
    async fn test_redefinition_reports_duplicate() {
        let h = harness();
        h.dispatcher.dispatch(&connection_def()).await.unwrap();
        let err = h.dispatcher.dispatch(&connection_def()).await.unwrap_err();
        assert!(matches!(err, IndiError::PropertyDuplicated { .. }));
        assert_eq!(h.table.len().await, 2);
    }

    #[tokio::test]
    async fn test_last_write_wins() {
        let h = harness();
        h.dispatcher.dispatch(&connection_def()).await.unwrap();
        for (state, c, d) in [("Busy", "On", "Off"), ("Alert", "Off", "On"), ("Ok", "On", "Off")] {
            h.dispatcher.dispatch(&connection_set(state, c, d)).await.unwrap();
        }
        let registry = h.registry.read().await;
        let prop = registry
            .get_device("CCD Simulator")
            .unwrap()
            .property("CONNECTION")
            .unwrap();
        assert_eq!(prop.state, IndiPropertyState::Ok);
        assert_eq!(prop.element("CONNECT").unwrap().value, ElementValue::Switch(true));
        assert_eq!(prop.element("DISCONNECT").unwrap().value, ElementValue::Switch(false));
        drop(registry);

        let item = h
            .table
            .get_property_item("CCD Simulator", "CONNECTION", "CONNECT")
            .await
            .unwrap();
        assert_eq!(item.value, "ON");
        assert_eq!(item.state, IndiPropertyState::Ok);
    }

    #[tokio::test]
    async fn test_set_for_unknown_device_or_property() {
        let h = harness();
        let err = h.dispatcher.dispatch(&connection_set("Ok", "On", "Off")).await.unwrap_err();
        assert!(matches!(err, IndiError::DeviceNotFound(_)));
        assert!(h.registry.read().await.devices().is_empty());

        h.dispatcher.dispatch(&connection_def()).await.unwrap();
        let other = connection_set("Ok", "On", "Off").with_attr("name", "UPLOAD_MODE");
        let err = h.dispatcher.dispatch(&other).await.unwrap_err();
        assert!(matches!(err, IndiError::PropertyNotFound { .. }));
    }

    #[tokio::test]
    async fn test_malformed_set_is_not_half_applied() {
        let mut h = harness();
        let def = XmlElement::new("defNumberVector")
            .with_attr("device", "Focuser")
            .with_attr("name", "P")
            .with_attr("state", "Busy")
            .with_child(XmlElement::new("defNumber").with_attr("name", "A").with_text("1"))
            .with_child(XmlElement::new("defNumber").with_attr("name", "B").with_text("2"));
        h.dispatcher.dispatch(&def).await.unwrap();
        h.table.drain_changes().await;
        while h.events.try_recv().is_ok() {}

        let set = XmlElement::new("setNumberVector")
            .with_attr("device", "Focuser")
            .with_attr("name", "P")
            .with_attr("state", "Ok")
            .with_child(XmlElement::new("oneNumber").with_attr("name", "A").with_text("5"))
            .with_child(XmlElement::new("oneNumber").with_attr("name", "B").with_text("nan-ish"));
        let err = h.dispatcher.dispatch(&set).await.unwrap_err();
        assert!(matches!(err, IndiError::InvalidValue { .. }));

        let registry = h.registry.read().await;
        let prop = registry.get_device("Focuser").unwrap().property("P").unwrap();
        assert_eq!(prop.state, IndiPropertyState::Busy);
        assert_eq!(prop.element("A").unwrap().value.as_number(), Some(1.0));
        drop(registry);

        let item = h.table.get_property_item("Focuser", "P", "A").await.unwrap();
        assert_eq!(item.state, IndiPropertyState::Busy);
        assert_eq!(item.value, "1");
        assert!(h.table.changes().await.is_empty());
        assert!(h.events.try_recv().is_err());

        // the next well-formed update still lands
        let good = XmlElement::new("setNumberVector")
            .with_attr("device", "Focuser")
            .with_attr("name", "P")
            .with_attr("state", "Ok")
            .with_child(XmlElement::new("oneNumber").with_attr("name", "B").with_text("3"));
        h.dispatcher.dispatch(&good).await.unwrap();
        let item = h.table.get_property_item("Focuser", "P", "B").await.unwrap();
        assert_eq!(item.state, IndiPropertyState::Ok);
        assert_eq!(item.value, "3");
    }

    #[tokio::test]
    async fn test_echo_and_unknown_tags() {
        let h = harness();
        let echo = XmlElement::new("newSwitchVector").with_attr("device", "X");
        h.dispatcher.dispatch(&echo).await.unwrap();
        assert!(h.registry.read().await.devices().is_empty());

        let err = h
            .dispatcher
            .dispatch(&XmlElement::new("pingRequest"))
            .await
            .unwrap_err();
        assert!(matches!(err, IndiError::DispatchError(tag) if tag == "pingRequest"));
    }

    #[tokio::test]
    async fn test_messages() {
        let h = harness();
        let unknown = XmlElement::new("message")
            .with_attr("device", "Ghost")
            .with_attr("message", "boo");
        h.dispatcher.dispatch(&unknown).await.unwrap();
        assert!(h.registry.read().await.get_device("Ghost").is_none());

        let def = connection_def()
            .with_attr("timestamp", "2024-01-01T00:00:00")
            .with_attr("message", "ready");
        h.dispatcher.dispatch(&def).await.unwrap();
        let server = XmlElement::new("message").with_attr("message", "server up");
        h.dispatcher.dispatch(&server).await.unwrap();

        let registry = h.registry.read().await;
        assert_eq!(
            registry.get_device("CCD Simulator").unwrap().last_message(),
            Some("2024-01-01T00:00:00: ready")
        );
        assert_eq!(registry.server_messages().len(), 1);
    }

    #[tokio::test]
    async fn test_del_property_and_device() {
        let h = harness();
        h.dispatcher.dispatch(&connection_def()).await.unwrap();
        h.dispatcher
            .dispatch(&connection_def().with_attr("name", "DEBUG"))
            .await
            .unwrap();
        h.table.drain_changes().await;

        let del = XmlElement::new("delProperty")
            .with_attr("device", "CCD Simulator")
            .with_attr("name", "DEBUG");
        h.dispatcher.dispatch(&del).await.unwrap();
        let changes = h.table.changes().await;
        assert_eq!(changes.len(), 2);
        assert!(changes.iter().all(|i| i.flag == PropertyFlag::Remove && i.property == "DEBUG"));
        assert!(h
            .registry
            .read()
            .await
            .get_device("CCD Simulator")
            .unwrap()
            .property("DEBUG")
            .is_none());

        let del_all = XmlElement::new("delProperty").with_attr("device", "CCD Simulator");
        h.dispatcher.dispatch(&del_all).await.unwrap();
        assert!(h.registry.read().await.devices().is_empty());
        h.table.drain_changes().await;
        assert!(h.table.is_empty().await);

        let err = h.dispatcher.dispatch(&del_all).await.unwrap_err();
        assert!(matches!(err, IndiError::DeviceNotFound(_)));
    }

    #[tokio::test]
    async fn test_blob_without_temp_dir_is_dropped() {
        let registry = Arc::new(RwLock::new(Registry::new()));
        let table = PropertyTable::new();
        let (event_tx, mut events) = broadcast::channel(64);
        let (cmd_tx, _commands) = mpsc::channel(16);
        let sink = BlobSink::with_env(None, |_| None);
        let image = sink.image_available();
        let dispatcher = Dispatcher::new(registry.clone(), table.clone(), event_tx, cmd_tx, sink, false);

        let def = XmlElement::new("defBLOBVector")
            .with_attr("device", "CCD Simulator")
            .with_attr("name", "CCD1")
            .with_child(XmlElement::new("defBLOB").with_attr("name", "CCD1"));
        dispatcher.dispatch(&def).await.unwrap();
        let set = XmlElement::new("setBLOBVector")
            .with_attr("device", "CCD Simulator")
            .with_attr("name", "CCD1")
            .with_attr("state", "Ok")
            .with_child(
                XmlElement::new("oneBLOB")
                    .with_attr("name", "CCD1")
                    .with_attr("size", "5")
                    .with_attr("format", ".fits")
                    .with_text("aGVsbG8="),
            );
        dispatcher.dispatch(&set).await.unwrap();

        let mut error = None;
        while let Ok(event) = events.try_recv() {
            match event {
                IndiEvent::Error(message) => error = Some(message),
                IndiEvent::BlobStored { .. } => panic!("BLOB should have been dropped"),
                _ => {}
            }
        }
        assert!(error.unwrap().contains("TMP"));
        assert_eq!(image.count(), 0);

        // the session keeps going
        let state = registry.read().await.get_device("CCD Simulator").unwrap().property("CCD1").unwrap().state;
        assert_eq!(state, IndiPropertyState::Ok);
        dispatcher.dispatch(&connection_def()).await.unwrap();
        assert!(table.get_property_item("CCD Simulator", "CONNECTION", "CONNECT").await.is_some());
    }

    #[tokio::test]
    async fn test_blob_is_written_to_disk() {
        let mut h = harness();
        let def = XmlElement::new("defBLOBVector")
            .with_attr("device", "CCD Simulator")
            .with_attr("name", "CCD1")
            .with_child(
                XmlElement::new("defBLOB")
                    .with_attr("name", "CCD1")
                    .with_attr("label", "Image"),
            );
        h.dispatcher.dispatch(&def).await.unwrap();
        let set = XmlElement::new("setBLOBVector")
            .with_attr("device", "CCD Simulator")
            .with_attr("name", "CCD1")
            .with_attr("state", "Ok")
            .with_child(
                XmlElement::new("oneBLOB")
                    .with_attr("name", "CCD1")
                    .with_attr("size", "5")
                    .with_attr("format", ".fits")
                    .with_text("aGVsbG8="),
            );
        h.dispatcher.dispatch(&set).await.unwrap();

        let path = h.dir.path().join("Image.fits");
        assert_eq!(std::fs::read(&path).unwrap(), b"hello");
        assert_eq!(h.dispatcher.blobs.image_available().count(), 1);

        let mut stored = false;
        while let Ok(event) = h.events.try_recv() {
            if let IndiEvent::BlobStored { size, .. } = event {
                assert_eq!(size, 5);
                stored = true;
            }
        }
        assert!(stored);
    }
}
