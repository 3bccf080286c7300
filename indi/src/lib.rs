//! INDI Protocol Client
//!
//! Implements the client side of the INDI instrument-control protocol over a
//! persistent TCP session.
//!
//! ## Features
//!
//! - Handshake with optional device watch-list
//! - Incremental XML parsing of the server stream into a live device model
//! - Flag-tagged property table for UI consumers (Insert/Update/Remove)
//! - Blocking and fire-and-forget property writes with abort and timeout
//! - BLOB reception to disk with an "image available" signal
//! - Sexagesimal and printf-style number formatting

mod blob;
mod client;
mod device;
mod dispatch;
mod encoder;
mod error;
mod format;
mod listener;
mod protocol;
mod registry;
mod table;
mod xml;

pub mod config;

pub use blob::ImageAvailable;
pub use client::*;
pub use config::{IndiClientConfig, IndiTimeoutConfig};
pub use device::{message_line, BlobValue, Device, Element, ElementValue, NumberValue, Property};
pub use encoder::BlobTransfer;
pub use error::{IndiError, IndiResult};
pub use format::{format_number, parse_sexagesimal};
pub use listener::{DisconnectHandler, DisconnectStatus};
pub use protocol::{standard_properties, INDI_PROTOCOL_VERSION};
pub use registry::Registry;
pub use table::{parse_key, property_key, NewPropertyRequest, PropertyFlag, PropertyListItem, PropertyTable};

use serde::{Deserialize, Serialize};

/// Default INDI server port
pub const INDI_DEFAULT_PORT: u16 = 7624;

/// INDI property types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndiPropertyType {
    Text,
    Number,
    Switch,
    Light,
    Blob,
}

impl IndiPropertyType {
    /// Kind named in a `def*Vector`/`set*Vector`/`new*Vector` tag
    pub fn from_vector_tag(tag: &str) -> Option<Self> {
        let kind = tag
            .strip_prefix("def")
            .or_else(|| tag.strip_prefix("set"))
            .or_else(|| tag.strip_prefix("new"))?
            .strip_suffix("Vector")?;
        match kind {
            "Text" => Some(Self::Text),
            "Number" => Some(Self::Number),
            "Switch" => Some(Self::Switch),
            "Light" => Some(Self::Light),
            "BLOB" => Some(Self::Blob),
            _ => None,
        }
    }

    /// Wire name used in tags, e.g. `Switch` in `newSwitchVector`
    pub fn wire_name(&self) -> &'static str {
        match self {
            Self::Text => "Text",
            Self::Number => "Number",
            Self::Switch => "Switch",
            Self::Light => "Light",
            Self::Blob => "BLOB",
        }
    }

    /// Legacy type string used by host property tables ("INDI_SWITCH", ...)
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Text => "INDI_TEXT",
            Self::Number => "INDI_NUMBER",
            Self::Switch => "INDI_SWITCH",
            Self::Light => "INDI_LIGHT",
            Self::Blob => "INDI_BLOB",
        }
    }

    pub fn from_type_name(name: &str) -> Option<Self> {
        match name {
            "INDI_TEXT" => Some(Self::Text),
            "INDI_NUMBER" => Some(Self::Number),
            "INDI_SWITCH" => Some(Self::Switch),
            "INDI_LIGHT" => Some(Self::Light),
            "INDI_BLOB" => Some(Self::Blob),
            _ => None,
        }
    }
}

/// INDI property state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum IndiPropertyState {
    #[default]
    Idle,
    Ok,
    Busy,
    Alert,
}

impl IndiPropertyState {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "Idle" => Some(Self::Idle),
            "Ok" => Some(Self::Ok),
            "Busy" => Some(Self::Busy),
            "Alert" => Some(Self::Alert),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Ok => "Ok",
            Self::Busy => "Busy",
            Self::Alert => "Alert",
        }
    }
}

impl std::fmt::Display for IndiPropertyState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// INDI property permission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum IndiPermission {
    ReadOnly,
    WriteOnly,
    #[default]
    ReadWrite,
}

impl IndiPermission {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "ro" => Some(Self::ReadOnly),
            "wo" => Some(Self::WriteOnly),
            "rw" => Some(Self::ReadWrite),
            _ => None,
        }
    }
}

/// Switch vector rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SwitchRule {
    #[default]
    OneOfMany,
    AtMostOne,
    AnyOfMany,
}

impl SwitchRule {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "OneOfMany" => Some(Self::OneOfMany),
            "AtMostOne" => Some(Self::AtMostOne),
            "AnyOfMany" => Some(Self::AnyOfMany),
            _ => None,
        }
    }

    /// Whether selecting one switch deselects the others
    pub fn is_exclusive(&self) -> bool {
        matches!(self, Self::OneOfMany | Self::AtMostOne)
    }
}

/// Server-side BLOB delivery policy sent with `enableBLOB`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BlobMode {
    Never,
    #[default]
    Also,
    Only,
}

impl BlobMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Never => "Never",
            Self::Also => "Also",
            Self::Only => "Only",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_property_type_from_tag() {
        assert_eq!(
            IndiPropertyType::from_vector_tag("defSwitchVector"),
            Some(IndiPropertyType::Switch)
        );
        assert_eq!(
            IndiPropertyType::from_vector_tag("setBLOBVector"),
            Some(IndiPropertyType::Blob)
        );
        assert_eq!(
            IndiPropertyType::from_vector_tag("newNumberVector"),
            Some(IndiPropertyType::Number)
        );
        assert_eq!(IndiPropertyType::from_vector_tag("defSwitch"), None);
        assert_eq!(IndiPropertyType::from_vector_tag("message"), None);
    }

    #[test]
    fn test_type_name_mapping() {
        for kind in [
            IndiPropertyType::Text,
            IndiPropertyType::Number,
            IndiPropertyType::Switch,
            IndiPropertyType::Light,
            IndiPropertyType::Blob,
        ] {
            assert_eq!(IndiPropertyType::from_type_name(kind.type_name()), Some(kind));
        }
    }

    #[test]
    fn test_state_and_perm_parsing() {
        assert_eq!(IndiPropertyState::parse("Busy"), Some(IndiPropertyState::Busy));
        assert_eq!(IndiPropertyState::parse("busy"), None);
        assert_eq!(IndiPermission::parse("RO"), Some(IndiPermission::ReadOnly));
        assert_eq!(IndiPermission::parse("xx"), None);
        assert_eq!(SwitchRule::parse("AnyOfMany"), Some(SwitchRule::AnyOfMany));
        assert!(!SwitchRule::AnyOfMany.is_exclusive());
    }
}
