//! INDI XML Protocol definitions

use crate::IndiPropertyType;

/// INDI protocol version
pub const INDI_PROTOCOL_VERSION: &str = "1.7";

/// Standard INDI properties
pub mod standard_properties {
    /// Connection control switch
    pub const CONNECTION: &str = "CONNECTION";
    pub const CONNECT: &str = "CONNECT";
    pub const DISCONNECT: &str = "DISCONNECT";

    /// Driver identification text vector
    pub const DRIVER_INFO: &str = "DRIVER_INFO";
    pub const DRIVER_NAME: &str = "DRIVER_NAME";
    pub const DRIVER_EXEC: &str = "DRIVER_EXEC";
}

/// Top-level inbound element, classified by tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundCommand {
    Define(IndiPropertyType),
    Set(IndiPropertyType),
    Message,
    DelProperty,
    /// `new*` tags echoed back from our own commands
    Echo,
    Unknown,
}

impl InboundCommand {
    pub fn classify(tag: &str) -> Self {
        if tag.starts_with("new") {
            return Self::Echo;
        }
        match tag {
            "message" => return Self::Message,
            "delProperty" => return Self::DelProperty,
            _ => {}
        }
        match IndiPropertyType::from_vector_tag(tag) {
            Some(kind) if tag.starts_with("def") => Self::Define(kind),
            Some(kind) if tag.starts_with("set") => Self::Set(kind),
            _ => Self::Unknown,
        }
    }
}

/// Child element tag carrying one value, e.g. `defSwitch` or `oneNumber`
pub fn element_tag(prefix: &str, kind: IndiPropertyType) -> String {
    format!("{}{}", prefix, kind.wire_name())
}

/// Switch and light values on the wire
pub fn parse_switch(text: &str) -> Option<bool> {
    match text.trim() {
        "On" => Some(true),
        "Off" => Some(false),
        _ => None,
    }
}

pub fn switch_text(on: bool) -> &'static str {
    if on {
        "On"
    } else {
        "Off"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_inbound() {
        assert_eq!(
            InboundCommand::classify("defNumberVector"),
            InboundCommand::Define(IndiPropertyType::Number)
        );
        assert_eq!(
            InboundCommand::classify("setLightVector"),
            InboundCommand::Set(IndiPropertyType::Light)
        );
        assert_eq!(InboundCommand::classify("newSwitchVector"), InboundCommand::Echo);
        assert_eq!(InboundCommand::classify("message"), InboundCommand::Message);
        assert_eq!(InboundCommand::classify("delProperty"), InboundCommand::DelProperty);
        assert_eq!(InboundCommand::classify("getProperties"), InboundCommand::Unknown);
        assert_eq!(InboundCommand::classify("defWidget"), InboundCommand::Unknown);
    }

    #[test]
    fn test_element_tag() {
        assert_eq!(element_tag("one", IndiPropertyType::Blob), "oneBLOB");
        assert_eq!(element_tag("def", IndiPropertyType::Switch), "defSwitch");
    }

    #[test]
    fn test_switch_text() {
        assert_eq!(parse_switch(" On "), Some(true));
        assert_eq!(parse_switch("Off"), Some(false));
        assert_eq!(parse_switch("ON"), None);
        assert_eq!(switch_text(true), "On");
    }
}
