//! Protocol listener task
//!
//! Owns the read half of the socket for the lifetime of a session. Each
//! iteration races the next XML event against the stop signal.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use quick_xml::events::Event;
use quick_xml::reader::Reader;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, BufReader};
use tokio::sync::{broadcast, oneshot, RwLock};

use crate::client::IndiEvent;
use crate::dispatch::Dispatcher;
use crate::error::IndiError;
use crate::registry::Registry;
use crate::xml::ElementAssembler;

/// Parse errors in a row before the stream is considered unrecoverable
const MAX_CONSECUTIVE_PARSE_ERRORS: u32 = 64;

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisconnectStatus {
    /// Stopped by the caller
    Clean,
    /// Peer closed, read error, or unrecoverable stream
    Abnormal,
}

impl DisconnectStatus {
    /// 0 for a clean stop, -1 otherwise
    pub fn code(&self) -> i32 {
        match self {
            Self::Clean => 0,
            Self::Abnormal => -1,
        }
    }
}

pub type DisconnectHandler = Arc<dyn Fn(DisconnectStatus) + Send + Sync>;

pub(crate) struct ListenerContext {
    pub dispatcher: Dispatcher,
    pub registry: Arc<RwLock<Registry>>,
    pub connected: Arc<AtomicBool>,
    pub events: broadcast::Sender<IndiEvent>,
    pub on_disconnect: Arc<RwLock<Option<DisconnectHandler>>>,
}

pub(crate) async fn run_listener<R>(read: R, ctx: ListenerContext, mut stop: oneshot::Receiver<()>) -> DisconnectStatus
where
    R: AsyncRead + Unpin,
{
    let mut reader = Reader::from_reader(BufReader::new(read));
    reader.trim_text(true);
    reader.check_end_names(false);

    let mut buf = Vec::new();
    let mut assembler = ElementAssembler::new();
    let mut parse_errors = 0u32;

    let status = loop {
        let event = tokio::select! {
            _ = &mut stop => {
                tracing::debug!("INDI listener stop requested");
                break DisconnectStatus::Clean;
            }
            event = reader.read_event_into_async(&mut buf) => event,
        };

        let element = match event {
            Ok(Event::Eof) => {
                tracing::info!("INDI connection closed by server");
                break DisconnectStatus::Abnormal;
            }
            Ok(event) => {
                parse_errors = 0;
                match assembler.push(event) {
                    Ok(element) => element,
                    Err(e) => {
                        tracing::warn!("Discarding malformed INDI element: {}", e);
                        None
                    }
                }
            }
            Err(quick_xml::Error::Io(e)) => {
                tracing::error!("INDI read error: {}", e);
                break DisconnectStatus::Abnormal;
            }
            Err(e) => {
                parse_errors += 1;
                tracing::warn!(
                    "INDI XML parse error at {}: {}",
                    reader.buffer_position(),
                    e
                );
                assembler.reset();
                if parse_errors > MAX_CONSECUTIVE_PARSE_ERRORS {
                    tracing::error!("Too many consecutive INDI parse errors, closing session");
                    break DisconnectStatus::Abnormal;
                }
                None
            }
        };
        buf.clear();

        let Some(element) = element else {
            continue;
        };
        match ctx.dispatcher.dispatch(&element).await {
            Ok(()) => {}
            Err(IndiError::PropertyDuplicated { device, property }) => {
                tracing::trace!("Redefinition of {}.{}", device, property);
            }
            Err(e) if e.is_fatal() => {
                tracing::error!("INDI session failed: {}", e);
                break DisconnectStatus::Abnormal;
            }
            Err(e) => tracing::warn!("<{}>: {}", element.tag, e),
        }
    };

    ctx.connected.store(false, Ordering::SeqCst);
    ctx.registry.write().await.set_connected(false);
    if let Some(handler) = ctx.on_disconnect.read().await.clone() {
        handler(status);
    }
    let _ = ctx.events.send(IndiEvent::Disconnected(status));
    tracing::info!("INDI listener exited (status {})", status.code());
    status
}
