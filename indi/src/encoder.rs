//! Outbound command serialization
//!
//! Every function returns the complete text of one command. Writing it is the
//! session writer's job.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use quick_xml::escape::escape;

use crate::device::{ElementValue, Property};
use crate::error::{IndiError, IndiResult};
use crate::protocol::{element_tag, switch_text};
use crate::{BlobMode, IndiPropertyType};

/// Column at which BLOB payloads are wrapped
pub const BLOB_LINE_WIDTH: usize = 72;

/// Handshake, optionally scoped to one device
pub fn get_properties(version: &str, device: Option<&str>) -> String {
    match device {
        Some(device) => format!(
            "<getProperties version=\"{}\" device=\"{}\"/>",
            escape(version),
            escape(device)
        ),
        None => format!("<getProperties version=\"{}\"/>", escape(version)),
    }
}

/// `enableBLOB`, optionally scoped to one property
pub fn enable_blob(mode: BlobMode, device: &str, property: Option<&str>) -> String {
    match property {
        Some(property) => format!(
            "<enableBLOB device=\"{}\" name=\"{}\">{}</enableBLOB>",
            escape(device),
            escape(property),
            mode.as_str()
        ),
        None => format!(
            "<enableBLOB device=\"{}\">{}</enableBLOB>",
            escape(device),
            mode.as_str()
        ),
    }
}

/// Wire text of a number. Full precision, no exponent padding.
pub fn number_text(value: f64) -> String {
    value.to_string()
}

/// `newXXXVector` carrying the current values of `property`
///
/// For an exclusive switch rule with a switch On, only that switch is sent.
pub fn new_vector(property: &Property) -> IndiResult<String> {
    let names: Vec<&str> = match property.kind {
        IndiPropertyType::Switch if property.rule.is_exclusive() => match property.active_switch() {
            Some(active) => vec![active.name.as_str()],
            None => property.elements.iter().map(|e| e.name.as_str()).collect(),
        },
        _ => property.elements.iter().map(|e| e.name.as_str()).collect(),
    };
    new_vector_for(property, &names)
}

/// `newXXXVector` carrying only the named elements of `property`
pub fn new_vector_for(property: &Property, names: &[&str]) -> IndiResult<String> {
    let kind = property.kind;
    if matches!(kind, IndiPropertyType::Light | IndiPropertyType::Blob) {
        return Err(IndiError::InvalidRequest(format!(
            "{}.{}: {} vectors cannot be sent with newXXXVector",
            property.device,
            property.name,
            kind.wire_name()
        )));
    }
    let child = element_tag("one", kind);
    let mut out = format!(
        "<new{}Vector device=\"{}\" name=\"{}\">\n",
        kind.wire_name(),
        escape(&property.device),
        escape(&property.name)
    );
    for name in names {
        let element = property.element(name).ok_or_else(|| IndiError::ElementNotFound {
            device: property.device.clone(),
            property: property.name.clone(),
            element: name.to_string(),
        })?;
        let value = match &element.value {
            ElementValue::Text(s) => escape(s.as_str()).to_string(),
            ElementValue::Number(n) => number_text(n.value),
            ElementValue::Switch(on) => switch_text(*on).to_string(),
            _ => continue,
        };
        out.push_str(&format!(
            "  <{} name=\"{}\">{}</{}>\n",
            child,
            escape(&element.name),
            value,
            child
        ));
    }
    out.push_str(&format!("</new{}Vector>", kind.wire_name()));
    Ok(out)
}

/// Base64 of `data`, broken into lines of [`BLOB_LINE_WIDTH`] columns
pub fn wrap_base64(data: &[u8]) -> String {
    let encoded = STANDARD.encode(data);
    let mut out = String::with_capacity(encoded.len() + encoded.len() / BLOB_LINE_WIDTH + 1);
    // base64 output is ASCII, so byte chunks are char boundaries
    for chunk in encoded.as_bytes().chunks(BLOB_LINE_WIDTH) {
        out.push_str(&String::from_utf8_lossy(chunk));
        out.push('\n');
    }
    out
}

/// Upload of one or more BLOB elements of a property
///
/// Built up front and written as a single message, so nothing else can
/// interleave with it on the socket.
#[derive(Debug, Clone)]
pub struct BlobTransfer {
    device: String,
    property: String,
    body: String,
    count: usize,
}

impl BlobTransfer {
    /// Open a `newBLOBVector`. Without a timestamp the current UTC time is used.
    pub fn begin(device: &str, property: &str, timestamp: Option<&str>) -> Self {
        let timestamp = timestamp
            .map(str::to_string)
            .unwrap_or_else(|| chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S").to_string());
        let body = format!(
            "<newBLOBVector device=\"{}\" name=\"{}\" timestamp=\"{}\">\n",
            escape(device),
            escape(property),
            escape(&timestamp)
        );
        Self {
            device: device.to_string(),
            property: property.to_string(),
            body,
            count: 0,
        }
    }

    /// Append one `oneBLOB`; `size` is the unencoded length
    pub fn send_one_blob(&mut self, name: &str, format: &str, data: &[u8]) -> &mut Self {
        self.body.push_str(&format!(
            "  <oneBLOB name=\"{}\" size=\"{}\" format=\"{}\">\n{}  </oneBLOB>\n",
            escape(name),
            data.len(),
            escape(format),
            wrap_base64(data)
        ));
        self.count += 1;
        self
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn property(&self) -> &str {
        &self.property
    }

    pub fn blob_count(&self) -> usize {
        self.count
    }

    /// Close the vector and return the full command text
    pub fn finish(mut self) -> String {
        self.body.push_str("</newBLOBVector>");
        self.body
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml::XmlElement;
    use crate::SwitchRule;

    fn connection(rule: &str) -> Property {
        let def = XmlElement::new("defSwitchVector")
            .with_attr("device", "CCD Simulator")
            .with_attr("name", "CONNECTION")
            .with_attr("rule", rule)
            .with_child(XmlElement::new("defSwitch").with_attr("name", "CONNECT").with_text("Off"))
            .with_child(XmlElement::new("defSwitch").with_attr("name", "DISCONNECT").with_text("On"));
        Property::from_definition(&def, IndiPropertyType::Switch).unwrap()
    }

    #[test]
    fn test_get_properties() {
        assert_eq!(get_properties("1.7", None), "<getProperties version=\"1.7\"/>");
        assert_eq!(
            get_properties("1.7", Some("CCD Simulator")),
            "<getProperties version=\"1.7\" device=\"CCD Simulator\"/>"
        );
    }

    #[test]
    fn test_enable_blob() {
        assert_eq!(
            enable_blob(BlobMode::Also, "CCD Simulator", None),
            "<enableBLOB device=\"CCD Simulator\">Also</enableBLOB>"
        );
        assert_eq!(
            enable_blob(BlobMode::Never, "CCD", Some("CCD1")),
            "<enableBLOB device=\"CCD\" name=\"CCD1\">Never</enableBLOB>"
        );
    }

    #[test]
    fn test_one_of_many_sends_only_selected() {
        let mut prop = connection("OneOfMany");
        prop.set_switch("CONNECT", true).unwrap();
        let xml = new_vector(&prop).unwrap();
        assert!(xml.starts_with("<newSwitchVector device=\"CCD Simulator\" name=\"CONNECTION\">"));
        assert!(xml.contains("<oneSwitch name=\"CONNECT\">On</oneSwitch>"));
        assert!(!xml.contains("DISCONNECT"));
        assert!(xml.ends_with("</newSwitchVector>"));
    }

    #[test]
    fn test_any_of_many_sends_all() {
        let mut prop = connection("AnyOfMany");
        assert_eq!(prop.rule, SwitchRule::AnyOfMany);
        prop.set_switch("CONNECT", true).unwrap();
        let xml = new_vector(&prop).unwrap();
        assert!(xml.contains("<oneSwitch name=\"CONNECT\">On</oneSwitch>"));
        assert!(xml.contains("<oneSwitch name=\"DISCONNECT\">On</oneSwitch>"));
    }

    #[test]
    fn test_text_and_number_vectors() {
        let def = XmlElement::new("defTextVector")
            .with_attr("device", "CCD")
            .with_attr("name", "FITS_HEADER")
            .with_child(XmlElement::new("defText").with_attr("name", "OBJECT").with_text(""));
        let mut prop = Property::from_definition(&def, IndiPropertyType::Text).unwrap();
        prop.element_mut("OBJECT").unwrap().value = ElementValue::Text("M31 <core> & arms".into());
        let xml = new_vector(&prop).unwrap();
        assert!(xml.contains("<oneText name=\"OBJECT\">M31 &lt;core&gt; &amp; arms</oneText>"));

        let def = XmlElement::new("defNumberVector")
            .with_attr("device", "CCD")
            .with_attr("name", "CCD_EXPOSURE")
            .with_child(XmlElement::new("defNumber").with_attr("name", "CCD_EXPOSURE_VALUE").with_text("1"));
        let mut prop = Property::from_definition(&def, IndiPropertyType::Number).unwrap();
        if let ElementValue::Number(n) = &mut prop.element_mut("CCD_EXPOSURE_VALUE").unwrap().value {
            n.value = 2.5;
        }
        let xml = new_vector(&prop).unwrap();
        assert!(xml.contains("<oneNumber name=\"CCD_EXPOSURE_VALUE\">2.5</oneNumber>"));
        assert!(new_vector_for(&prop, &["NOPE"]).is_err());
    }

    #[test]
    fn test_light_vector_rejected() {
        let def = XmlElement::new("defLightVector")
            .with_attr("device", "D")
            .with_attr("name", "L")
            .with_child(XmlElement::new("defLight").with_attr("name", "A").with_text("Ok"));
        let prop = Property::from_definition(&def, IndiPropertyType::Light).unwrap();
        assert!(matches!(new_vector(&prop), Err(IndiError::InvalidRequest(_))));
    }

    #[test]
    fn test_blob_wrapping() {
        let data = vec![0xABu8; 200];
        let wrapped = wrap_base64(&data);
        let lines: Vec<&str> = wrapped.lines().collect();
        assert!(lines.iter().all(|l| l.len() <= BLOB_LINE_WIDTH));
        assert_eq!(lines[0].len(), BLOB_LINE_WIDTH);
        let joined: String = lines.concat();
        assert_eq!(STANDARD.decode(joined).unwrap(), data);
    }

    #[test]
    fn test_blob_transfer() {
        let mut transfer = BlobTransfer::begin("CCD Simulator", "CCD1", Some("2024-01-01T00:00:00"));
        transfer.send_one_blob("CCD1", ".fits", b"SIMPLE  =");
        assert_eq!(transfer.blob_count(), 1);
        let xml = transfer.finish();
        assert!(xml.starts_with(
            "<newBLOBVector device=\"CCD Simulator\" name=\"CCD1\" timestamp=\"2024-01-01T00:00:00\">"
        ));
        assert!(xml.contains("<oneBLOB name=\"CCD1\" size=\"9\" format=\".fits\">"));
        assert!(xml.ends_with("</newBLOBVector>"));
    }
}
