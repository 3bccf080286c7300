//! INDI client implementation
//!
//! One [`IndiClient`] owns one TCP session:
//! - a listener task that owns the read half and feeds the dispatcher
//! - a writer task that owns the write half; every outbound command goes
//!   through its channel
//! - the device registry and the flag-tagged property table
//!
//! Synchronous sends wait for the property to leave Busy by watching the
//! event channel, bounded by the property timeout and the abort flag.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::{lookup_host, TcpStream};
use tokio::sync::{broadcast, mpsc, oneshot, watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, timeout, Instant};

use crate::blob::{BlobSink, ImageAvailable};
use crate::config::IndiClientConfig;
use crate::device::{Device, ElementValue, Property};
use crate::dispatch::Dispatcher;
use crate::encoder::{self, BlobTransfer};
use crate::error::{IndiError, IndiResult};
use crate::format::parse_sexagesimal;
use crate::listener::{run_listener, DisconnectHandler, DisconnectStatus, ListenerContext};
use crate::protocol::standard_properties;
use crate::registry::Registry;
use crate::table::{NewPropertyRequest, PropertyListItem, PropertyTable};
use crate::{BlobMode, IndiPermission, IndiPropertyState, IndiPropertyType};

/// INDI client event
#[derive(Debug, Clone, PartialEq)]
pub enum IndiEvent {
    /// Session established and handshake flushed
    Connected,
    /// Listener exited
    Disconnected(DisconnectStatus),
    DeviceDefined(String),
    DeviceRemoved(String),
    PropertyDefined {
        device: String,
        property: String,
    },
    PropertyUpdated {
        device: String,
        property: String,
        state: IndiPropertyState,
    },
    PropertyRemoved {
        device: String,
        property: String,
    },
    /// Message attribute from the server; `device` is None for server-wide messages
    Message {
        device: Option<String>,
        message: String,
    },
    /// BLOB decoded and written to disk
    BlobStored {
        device: String,
        property: String,
        path: PathBuf,
        size: usize,
    },
    /// Recovered, non-fatal problem worth surfacing to the user
    Error(String),
}

/// Result of a successful property send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Server reported Ok or Idle
    Completed,
    /// Written to the socket, not waited on
    Sent,
    /// Abort flag raised while waiting
    Aborted,
}

/// Caller-settable abort flag for in-flight synchronous sends
#[derive(Debug, Clone)]
pub struct AbortHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl AbortHandle {
    fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn abort(&self) {
        self.tx.send_replace(true);
    }

    pub fn reset(&self) {
        self.tx.send_replace(false);
    }

    pub fn is_aborted(&self) -> bool {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// INDI client
pub struct IndiClient {
    config: IndiClientConfig,
    /// Devices named in the handshake; empty means all
    watch_list: Vec<String>,
    connected: Arc<AtomicBool>,
    registry: Arc<RwLock<Registry>>,
    table: PropertyTable,
    blobs: BlobSink,
    /// Command sender (writer task)
    tx: Option<mpsc::Sender<String>>,
    event_tx: broadcast::Sender<IndiEvent>,
    /// Listener stop signal
    shutdown_tx: Option<oneshot::Sender<()>>,
    listener: Option<JoinHandle<DisconnectStatus>>,
    writer: Option<JoinHandle<()>>,
    on_disconnect: Arc<RwLock<Option<DisconnectHandler>>>,
    abort: AbortHandle,
}

impl IndiClient {
    /// Create a new INDI client
    pub fn new(host: &str, port: Option<u16>) -> Self {
        Self::with_config(IndiClientConfig::new(host, port))
    }

    pub fn with_config(config: IndiClientConfig) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            blobs: BlobSink::new(config.blob_dir.clone()),
            config,
            watch_list: Vec::new(),
            connected: Arc::new(AtomicBool::new(false)),
            registry: Arc::new(RwLock::new(Registry::new())),
            table: PropertyTable::new(),
            tx: None,
            event_tx,
            shutdown_tx: None,
            listener: None,
            writer: None,
            on_disconnect: Arc::new(RwLock::new(None)),
            abort: AbortHandle::new(),
        }
    }

    pub fn config(&self) -> &IndiClientConfig {
        &self.config
    }

    /// Subscribe to session events
    pub fn subscribe(&self) -> broadcast::Receiver<IndiEvent> {
        self.event_tx.subscribe()
    }

    /// Restrict the handshake to `device`. Only takes effect on the next connect.
    pub fn watch_device(&mut self, device: &str) {
        if self.is_connected() {
            tracing::warn!(
                "watch_device({}) ignored: already connected, reconnect to apply",
                device
            );
            return;
        }
        if !self.watch_list.iter().any(|d| d == device) {
            self.watch_list.push(device.to_string());
        }
    }

    pub fn watched_devices(&self) -> &[String] {
        &self.watch_list
    }

    /// Connect to the INDI server and send the handshake
    pub async fn connect(&mut self) -> IndiResult<()> {
        if self.is_connected() {
            tracing::debug!("Already connected to {}:{}", self.config.host, self.config.port);
            return Ok(());
        }
        // a previous session that ended on its own still has finished tasks
        self.disconnect().await?;

        let host = self.config.host.clone();
        let port = self.config.port;
        let connection_timeout = self.config.timeouts.connection_timeout();

        let addrs: Vec<_> = match timeout(connection_timeout, lookup_host((host.clone(), port))).await {
            Ok(Ok(addrs)) => addrs.collect(),
            Ok(Err(e)) => {
                return Err(IndiError::ConnectionFailed(format!(
                    "Failed to resolve {}: {}",
                    host, e
                )))
            }
            Err(_) => {
                return Err(IndiError::ConnectionTimeout {
                    host,
                    port,
                    duration: connection_timeout,
                })
            }
        };
        if addrs.is_empty() {
            return Err(IndiError::ConnectionFailed(format!("No address for {}", host)));
        }

        let stream = match timeout(connection_timeout, TcpStream::connect(&addrs[..])).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(IndiError::ConnectionFailed(format!(
                    "Failed to connect to INDI server at {}:{}: {}",
                    host, port, e
                )));
            }
            Err(_) => {
                return Err(IndiError::ConnectionTimeout {
                    host,
                    port,
                    duration: connection_timeout,
                });
            }
        };
        let _ = stream.set_nodelay(true);
        let (read_half, mut write_half) = stream.into_split();

        self.send_handshake(&mut write_half).await?;

        let (tx, rx) = mpsc::channel::<String>(100);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        {
            let mut registry = self.registry.write().await;
            registry.clear();
            registry.set_connected(true);
        }
        self.table.clear().await;
        self.connected.store(true, Ordering::SeqCst);

        self.writer = Some(tokio::spawn(Self::writer_task(write_half, rx)));

        let ctx = ListenerContext {
            dispatcher: Dispatcher::new(
                self.registry.clone(),
                self.table.clone(),
                self.event_tx.clone(),
                tx.clone(),
                self.blobs.clone(),
                self.config.auto_enable_blobs,
            ),
            registry: self.registry.clone(),
            connected: self.connected.clone(),
            events: self.event_tx.clone(),
            on_disconnect: self.on_disconnect.clone(),
        };
        self.listener = Some(tokio::spawn(run_listener(read_half, ctx, shutdown_rx)));
        self.tx = Some(tx);
        self.shutdown_tx = Some(shutdown_tx);

        tracing::info!("Connected to INDI server {}:{}", host, port);
        let _ = self.event_tx.send(IndiEvent::Connected);
        Ok(())
    }

    async fn send_handshake<W: AsyncWrite + Unpin>(&self, writer: &mut W) -> IndiResult<()> {
        let version = &self.config.protocol_version;
        let commands: Vec<String> = if self.watch_list.is_empty() {
            vec![encoder::get_properties(version, None)]
        } else {
            self.watch_list
                .iter()
                .map(|d| encoder::get_properties(version, Some(d)))
                .collect()
        };
        for cmd in commands {
            tracing::debug!("INDI handshake: {}", cmd);
            writer.write_all(cmd.as_bytes()).await.map_err(handshake_error)?;
            writer.write_all(b"\n").await.map_err(handshake_error)?;
        }
        writer.flush().await.map_err(handshake_error)
    }

    /// Writer task - sends commands to INDI server
    async fn writer_task<W: AsyncWrite + Unpin>(mut writer: W, mut rx: mpsc::Receiver<String>) {
        while let Some(cmd) = rx.recv().await {
            if let Err(e) = writer.write_all(cmd.as_bytes()).await {
                tracing::error!("INDI write error: {}", e);
                break;
            }
            if let Err(e) = writer.write_all(b"\n").await {
                tracing::error!("INDI write error: {}", e);
                break;
            }
        }
        let _ = writer.shutdown().await;
    }

    /// Disconnect from the INDI server
    ///
    /// Stops the listener and waits for it to exit, then closes the writer.
    /// Calling it again, or without a session, is a no-op.
    pub async fn disconnect(&mut self) -> IndiResult<()> {
        if self.listener.is_none() && self.writer.is_none() && self.tx.is_none() {
            return Ok(());
        }
        tracing::info!(
            "Disconnecting from INDI server {}:{}",
            self.config.host,
            self.config.port
        );

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(listener) = self.listener.take() {
            if let Err(e) = listener.await {
                tracing::error!("INDI listener task failed: {}", e);
            }
        }

        // last sender; the writer drains, then shuts the socket down
        self.tx = None;
        if let Some(writer) = self.writer.take() {
            if let Err(e) = writer.await {
                tracing::error!("INDI writer task failed: {}", e);
            }
        }

        self.connected.store(false, Ordering::SeqCst);
        self.registry.write().await.clear();
        self.table.clear().await;
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Called once per session when the listener exits
    pub async fn set_disconnect_handler<F>(&self, handler: F)
    where
        F: Fn(DisconnectStatus) + Send + Sync + 'static,
    {
        *self.on_disconnect.write().await = Some(Arc::new(handler));
    }

    pub async fn send_command(&self, command: String) -> IndiResult<()> {
        let tx = self.tx.as_ref().ok_or(IndiError::NotConnected)?;
        tx.send(command).await.map_err(|e| {
            IndiError::ChannelClosed(format!(
                "Failed to send INDI command to {}:{}: {}",
                self.config.host, self.config.port, e
            ))
        })
    }

    // -- registry views ---------------------------------------------------

    pub async fn devices(&self) -> Vec<String> {
        self.registry.read().await.device_names()
    }

    pub async fn device(&self, name: &str) -> Option<Device> {
        self.registry.read().await.get_device(name).cloned()
    }

    pub async fn property(&self, device: &str, property: &str) -> Option<Property> {
        self.registry
            .read()
            .await
            .get_device(device)?
            .property(property)
            .cloned()
    }

    pub async fn property_state(&self, device: &str, property: &str) -> Option<IndiPropertyState> {
        self.registry
            .read()
            .await
            .get_device(device)?
            .property(property)
            .map(|p| p.state)
    }

    pub async fn server_messages(&self) -> Vec<String> {
        self.registry.read().await.server_messages().to_vec()
    }

    pub async fn is_device_connected(&self, device: &str) -> bool {
        self.registry
            .read()
            .await
            .get_device(device)
            .map(Device::is_connected)
            .unwrap_or(false)
    }

    // -- property table ---------------------------------------------------

    /// Shared handle to the flag-tagged property list
    pub fn table(&self) -> PropertyTable {
        self.table.clone()
    }

    pub async fn get_property_item(&self, device: &str, property: &str, element: &str) -> Option<PropertyListItem> {
        self.table.get_property_item(device, property, element).await
    }

    pub async fn get_active_switch_item(&self, device: &str, property: &str) -> Option<PropertyListItem> {
        self.table.get_active_switch_item(device, property).await
    }

    // -- BLOBs ------------------------------------------------------------

    pub fn image_available(&self) -> ImageAvailable {
        self.blobs.image_available()
    }

    /// Also raise `flag` whenever a BLOB is stored
    pub async fn mirror_image_flag(&self, flag: Option<ImageAvailable>) {
        self.blobs.set_mirror(flag).await;
    }

    pub async fn set_blob_mode(&self, mode: BlobMode, device: &str, property: Option<&str>) -> IndiResult<()> {
        if device.is_empty() {
            return Err(IndiError::InvalidRequest(
                "enableBLOB requires a device".to_string(),
            ));
        }
        if let Some(d) = self.registry.write().await.get_device_mut(device) {
            d.blob_enabled = true;
        }
        self.send_command(encoder::enable_blob(mode, device, property.filter(|p| !p.is_empty())))
            .await
    }

    pub fn begin_blob(&self, device: &str, property: &str, timestamp: Option<&str>) -> BlobTransfer {
        BlobTransfer::begin(device, property, timestamp)
    }

    pub async fn end_blob(&self, transfer: BlobTransfer) -> IndiResult<()> {
        if transfer.blob_count() == 0 {
            return Err(IndiError::InvalidRequest(format!(
                "BLOB upload to {}.{} has no elements",
                transfer.device(),
                transfer.property()
            )));
        }
        tracing::debug!(
            "Uploading {} BLOB(s) to {}.{}",
            transfer.blob_count(),
            transfer.device(),
            transfer.property()
        );
        self.send_command(transfer.finish()).await
    }

    // -- outbound property writes -----------------------------------------

    /// Send the values held in `property` (by-object form)
    pub async fn send_new_text(&self, property: &Property) -> IndiResult<()> {
        self.send_new_vector(property, IndiPropertyType::Text).await
    }

    pub async fn send_new_number(&self, property: &Property) -> IndiResult<()> {
        self.send_new_vector(property, IndiPropertyType::Number).await
    }

    pub async fn send_new_switch(&self, property: &Property) -> IndiResult<()> {
        self.send_new_vector(property, IndiPropertyType::Switch).await
    }

    async fn send_new_vector(&self, property: &Property, kind: IndiPropertyType) -> IndiResult<()> {
        if property.kind != kind {
            return Err(IndiError::InvalidRequest(format!(
                "{}.{} is a {} property",
                property.device,
                property.name,
                property.kind.wire_name()
            )));
        }
        self.stage_and_send(&property.device, &property.name, |staged| {
            let mut changed = Vec::new();
            for element in &property.elements {
                let target = staged.element_mut(&element.name).ok_or_else(|| IndiError::ElementNotFound {
                    device: property.device.clone(),
                    property: property.name.clone(),
                    element: element.name.clone(),
                })?;
                target.value = element.value.clone();
                changed.push(element.name.clone());
            }
            Ok(changed)
        })
        .await
    }

    pub async fn send_new_text_by_name(&self, device: &str, property: &str, element: &str, value: &str) -> IndiResult<()> {
        let request = NewPropertyRequest::new(device, property, element, IndiPropertyType::Text, value);
        self.stage_requests(std::slice::from_ref(&request)).await
    }

    pub async fn send_new_number_by_name(&self, device: &str, property: &str, element: &str, value: f64) -> IndiResult<()> {
        let request = NewPropertyRequest::new(
            device,
            property,
            element,
            IndiPropertyType::Number,
            &value.to_string(),
        );
        self.stage_requests(std::slice::from_ref(&request)).await
    }

    pub async fn send_new_switch_by_name(&self, device: &str, property: &str, element: &str, on: bool) -> IndiResult<()> {
        let value = if on { "ON" } else { "OFF" };
        let request = NewPropertyRequest::new(device, property, element, IndiPropertyType::Switch, value);
        self.stage_requests(std::slice::from_ref(&request)).await
    }

    /// Set `CONNECTION.CONNECT`; no-op if the device already reports connected
    pub async fn connect_device(&self, device: &str) -> IndiResult<()> {
        self.set_device_connection(device, true).await
    }

    pub async fn disconnect_device(&self, device: &str) -> IndiResult<()> {
        self.set_device_connection(device, false).await
    }

    async fn set_device_connection(&self, device: &str, connect: bool) -> IndiResult<()> {
        let current = {
            let registry = self.registry.read().await;
            let d = registry
                .get_device(device)
                .ok_or_else(|| IndiError::DeviceNotFound(device.to_string()))?;
            if d.property(standard_properties::CONNECTION).is_none() {
                return Err(IndiError::PropertyNotFound {
                    device: device.to_string(),
                    property: standard_properties::CONNECTION.to_string(),
                });
            }
            d.is_connected()
        };
        if current == connect {
            tracing::debug!("{} already {}", device, if connect { "connected" } else { "disconnected" });
            return Ok(());
        }
        let element = if connect {
            standard_properties::CONNECT
        } else {
            standard_properties::DISCONNECT
        };
        self.send_new_switch_by_name(device, standard_properties::CONNECTION, element, true)
            .await
    }

    /// Send one new element value, optionally waiting for the server's verdict
    pub async fn send_new_property_value(
        &self,
        request: &NewPropertyRequest,
        synchronous: bool,
    ) -> IndiResult<SendOutcome> {
        self.send_new_property_vector(std::slice::from_ref(request), synchronous)
            .await
    }

    /// Send several elements of one property in a single `newXXXVector`
    ///
    /// With `synchronous`, waits until the property leaves Busy. Alert is an
    /// error carrying the device's latest message; the abort handle ends the
    /// wait with [`SendOutcome::Aborted`]. The pending request list is cleared
    /// whatever the outcome.
    pub async fn send_new_property_vector(
        &self,
        requests: &[NewPropertyRequest],
        synchronous: bool,
    ) -> IndiResult<SendOutcome> {
        let first = requests
            .first()
            .ok_or_else(|| IndiError::InvalidRequest("no elements to send".to_string()))?;
        if requests
            .iter()
            .any(|r| r.device != first.device || r.property != first.property)
        {
            return Err(IndiError::InvalidRequest(
                "all elements of a vector send must name the same property".to_string(),
            ));
        }

        for request in requests {
            self.table.push_request(request.clone()).await;
        }
        if synchronous {
            self.abort.reset();
        }
        // subscribe before sending so the server's answer cannot be missed
        let events = self.event_tx.subscribe();

        let result = match self.stage_requests(requests).await {
            Ok(()) if synchronous => self.wait_not_busy(&first.device, &first.property, events).await,
            Ok(()) => Ok(SendOutcome::Sent),
            Err(e) => {
                tracing::warn!("Cannot send {}: {}", first.key, e);
                Err(e)
            }
        };
        self.table.clear_requests().await;
        result
    }

    /// Abort flag shared with synchronous sends
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    async fn stage_requests(&self, requests: &[NewPropertyRequest]) -> IndiResult<()> {
        let Some(first) = requests.first() else {
            return Ok(());
        };
        self.stage_and_send(&first.device, &first.property, |staged| {
            let mut changed = Vec::new();
            for request in requests {
                apply_request(staged, request)?;
                changed.push(request.element.clone());
            }
            Ok(changed)
        })
        .await
    }

    /// Apply `apply` to a copy of the registry property, encode it, mark it
    /// Busy locally and queue the command
    async fn stage_and_send<F>(&self, device: &str, property: &str, apply: F) -> IndiResult<()>
    where
        F: FnOnce(&mut Property) -> IndiResult<Vec<String>>,
    {
        let tx = self.tx.as_ref().ok_or(IndiError::NotConnected)?;
        let staged_write = {
            let mut registry = self.registry.write().await;
            let current = registry
                .get_device_mut(device)
                .ok_or_else(|| IndiError::DeviceNotFound(device.to_string()))?
                .property_mut(property)
                .ok_or_else(|| IndiError::PropertyNotFound {
                    device: device.to_string(),
                    property: property.to_string(),
                })?;
            check_write_permission(current)?;

            let previous = current.clone();
            let mut staged = current.clone();
            let changed = apply(&mut staged)?;
            let command = encoder::new_vector(&staged)?;
            staged.state = IndiPropertyState::Busy;
            *current = staged.clone();
            (previous, staged, changed, command)
        };
        let (previous, staged, changed, command) = staged_write;

        self.table.stage(&staged).await;
        tracing::debug!(
            "Sending new{}Vector {}.{} ({})",
            staged.kind.wire_name(),
            device,
            property,
            changed.join(", ")
        );
        if let Err(e) = tx.send(command).await {
            self.restore(&previous, &staged).await;
            return Err(IndiError::ChannelClosed(format!("writer task gone: {}", e)));
        }
        Ok(())
    }

    /// Undo a staged write that never reached the socket, unless the server
    /// has updated the property since
    async fn restore(&self, previous: &Property, staged: &Property) {
        {
            let mut registry = self.registry.write().await;
            let Some(current) = registry
                .get_device_mut(&previous.device)
                .and_then(|d| d.property_mut(&previous.name))
            else {
                return;
            };
            if current != staged {
                return;
            }
            *current = previous.clone();
        }
        self.table.stage(previous).await;
        tracing::warn!("{}.{}: send failed, local state restored", previous.device, previous.name);
    }

    async fn wait_not_busy(
        &self,
        device: &str,
        property: &str,
        mut events: broadcast::Receiver<IndiEvent>,
    ) -> IndiResult<SendOutcome> {
        let duration = self.config.timeouts.property_timeout();
        let deadline = Instant::now() + duration;
        let mut abort = self.abort.subscribe();

        loop {
            let (state, message) = {
                let registry = self.registry.read().await;
                let d = registry.get_device(device);
                let state = d.and_then(|d| d.property(property)).map(|p| p.state);
                let message = d.and_then(Device::last_message).unwrap_or_default().to_string();
                (state, message)
            };
            match state {
                Some(IndiPropertyState::Ok) | Some(IndiPropertyState::Idle) => {
                    return Ok(SendOutcome::Completed)
                }
                Some(IndiPropertyState::Alert) => {
                    return Err(IndiError::ServerAlert {
                        device: device.to_string(),
                        property: property.to_string(),
                        message,
                    })
                }
                Some(IndiPropertyState::Busy) => {}
                None => {
                    return Err(IndiError::PropertyNotFound {
                        device: device.to_string(),
                        property: property.to_string(),
                    })
                }
            }
            if *abort.borrow_and_update() {
                tracing::info!("Send to {}.{} aborted", device, property);
                return Ok(SendOutcome::Aborted);
            }
            if !self.is_connected() {
                return Err(IndiError::NotConnected);
            }

            tokio::select! {
                _ = sleep_until(deadline) => {
                    return Err(IndiError::Timeout {
                        device: device.to_string(),
                        property: property.to_string(),
                        duration,
                    });
                }
                _ = abort.changed() => {}
                event = events.recv() => match event {
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(IndiError::ChannelClosed("event channel closed".to_string()));
                    }
                },
            }
        }
    }
}

impl Drop for IndiClient {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

fn handshake_error(e: std::io::Error) -> IndiError {
    IndiError::ConnectionFailed(format!("Handshake failed: {}", e))
}

/// Check property permission before write
fn check_write_permission(property: &Property) -> IndiResult<()> {
    match property.perm {
        IndiPermission::ReadOnly => Err(IndiError::PermissionDenied(format!(
            "Property '{}.{}' is read-only",
            property.device, property.name
        ))),
        IndiPermission::WriteOnly | IndiPermission::ReadWrite => Ok(()),
    }
}

fn invalid_value(kind: IndiPropertyType, value: &str) -> IndiError {
    IndiError::InvalidValue {
        kind: kind.wire_name().to_string(),
        value: value.to_string(),
    }
}

/// Write one request's value into `property`
fn apply_request(property: &mut Property, request: &NewPropertyRequest) -> IndiResult<()> {
    if request.kind != property.kind {
        return Err(IndiError::InvalidRequest(format!(
            "{} is a {} property, request is {}",
            request.key,
            property.kind.wire_name(),
            request.kind.wire_name()
        )));
    }
    // text is sent as given; an empty or blank value is valid
    let value = request.value.trim();
    if request.kind == IndiPropertyType::Switch {
        let on = match value.to_ascii_uppercase().as_str() {
            "ON" | "1" | "TRUE" => true,
            "OFF" | "0" | "FALSE" => false,
            _ => return Err(invalid_value(request.kind, value)),
        };
        return property.set_switch(&request.element, on);
    }

    let element = property
        .element_mut(&request.element)
        .ok_or_else(|| IndiError::ElementNotFound {
            device: request.device.clone(),
            property: request.property.clone(),
            element: request.element.clone(),
        })?;
    match &mut element.value {
        ElementValue::Text(s) => *s = request.value.clone(),
        ElementValue::Number(n) => {
            n.value = parse_sexagesimal(value).ok_or_else(|| invalid_value(request.kind, value))?
        }
        _ => {
            return Err(IndiError::InvalidRequest(format!(
                "{} cannot be written with newXXXVector",
                request.key
            )))
        }
    }
    Ok(())
}
