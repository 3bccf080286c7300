//! INDI error types
//!
//! Provides structured error types for INDI operations.

use std::time::Duration;

use thiserror::Error;

/// INDI client errors
#[derive(Debug, Clone, Error)]
pub enum IndiError {
    /// Host resolution or TCP connect failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection timeout: failed to connect to {host}:{port} after {duration:?}")]
    ConnectionTimeout {
        host: String,
        port: u16,
        duration: Duration,
    },

    #[error("Not connected to INDI server")]
    NotConnected,

    /// Writer task or event channel went away
    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    /// Malformed XML fragment
    #[error("XML parse error: {0}")]
    ParseError(String),

    /// Element that no handler accepts
    #[error("Dispatch error: unexpected element <{0}>")]
    DispatchError(String),

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Property not found: {device}.{property}")]
    PropertyNotFound { device: String, property: String },

    #[error("Element not found: {device}.{property}.{element}")]
    ElementNotFound {
        device: String,
        property: String,
        element: String,
    },

    /// Definition of a property that already exists
    #[error("Property duplicated: {device}.{property}")]
    PropertyDuplicated { device: String, property: String },

    /// Server reported Alert for a property the caller was waiting on
    #[error("Server alert on {device}.{property}: {message}")]
    ServerAlert {
        device: String,
        property: String,
        message: String,
    },

    #[error("Property {device}.{property} still busy after {duration:?}")]
    Timeout {
        device: String,
        property: String,
        duration: Duration,
    },

    /// Attempted to write to a read-only property
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Invalid property key: {0}")]
    InvalidKey(String),

    #[error("Invalid value '{value}' for {kind} element")]
    InvalidValue { kind: String, value: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("BLOB storage error: {0}")]
    BlobStorage(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl IndiError {
    /// Transport-level errors end the session; everything else is recovered locally
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            IndiError::ConnectionFailed(_)
                | IndiError::ConnectionTimeout { .. }
                | IndiError::NotConnected
                | IndiError::ChannelClosed(_)
        )
    }
}

impl From<IndiError> for String {
    fn from(err: IndiError) -> String {
        err.to_string()
    }
}

/// Result type for INDI operations
pub type IndiResult<T> = Result<T, IndiError>;
