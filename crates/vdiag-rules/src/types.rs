//! Compiled rule types
//!
//! Everything here is produced by the grammar parser and immutable once a
//! rule set is compiled. Command rules in particular can only be built through
//! [`CommandRule::new`], which attaches the static danger classification.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use regex::Regex;
use serde::Serialize;
use vdiag_core::DangerLevel;

use crate::formula::Formula;
use crate::policy::{classify, Classification};

/// Transport protocol tag of a module
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum Protocol {
    Can,
    Iso9141,
    Kwp2000,
    J1850,
    Other(String),
}

impl Protocol {
    /// Known tags are matched case-insensitively; anything else is kept verbatim
    pub fn from_tag(s: &str) -> Self {
        match s.to_ascii_uppercase().as_str() {
            "CAN" => Protocol::Can,
            "ISO9141" => Protocol::Iso9141,
            "KWP2000" | "KWP" => Protocol::Kwp2000,
            "J1850" => Protocol::J1850,
            _ => Protocol::Other(s.to_string()),
        }
    }
}

impl FromStr for Protocol {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Protocol::from_tag(s))
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Can => f.write_str("CAN"),
            Protocol::Iso9141 => f.write_str("ISO9141"),
            Protocol::Kwp2000 => f.write_str("KWP2000"),
            Protocol::J1850 => f.write_str("J1850"),
            Protocol::Other(s) => f.write_str(s),
        }
    }
}

/// Bus speed class of a module
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum BusClass {
    HighSpeed,
    MediumSpeed,
    LowSpeed,
    SingleWire,
    Other(String),
}

impl BusClass {
    pub fn from_tag(s: &str) -> Self {
        match s.to_ascii_uppercase().as_str() {
            "HS" => BusClass::HighSpeed,
            "MS" => BusClass::MediumSpeed,
            "LS" => BusClass::LowSpeed,
            "SW" => BusClass::SingleWire,
            _ => BusClass::Other(s.to_string()),
        }
    }
}

impl FromStr for BusClass {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(BusClass::from_tag(s))
    }
}

impl fmt::Display for BusClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusClass::HighSpeed => f.write_str("HS"),
            BusClass::MediumSpeed => f.write_str("MS"),
            BusClass::LowSpeed => f.write_str("LS"),
            BusClass::SingleWire => f.write_str("SW"),
            BusClass::Other(s) => f.write_str(s),
        }
    }
}

/// One physical ECU on the bus
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleDescriptor {
    /// Unique module name (e.g. "HVAC")
    pub name: String,
    /// Request address on the bus
    pub address: u32,
    pub protocol: Protocol,
    pub bus: BusClass,
}

impl ModuleDescriptor {
    /// Address as upper-case hex without prefix (`7A0`)
    pub fn address_hex(&self) -> String {
        format!("{:X}", self.address)
    }
}

/// Response pattern compiled once at parse time
///
/// Matching is anchored at the first byte of the upper-case hex rendering of
/// the payload. Equality compares the source text.
#[derive(Clone)]
pub struct Pattern {
    source: String,
    regex: Regex,
}

impl Pattern {
    pub fn new(source: &str) -> Result<Self, regex::Error> {
        // Validate on its own first so an unbalanced `)` cannot escape the anchor
        Regex::new(source)?;
        let regex = Regex::new(&format!("^(?:{})", source))?;
        Ok(Self {
            source: source.to_string(),
            regex,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn regex(&self) -> &Regex {
        &self.regex
    }

    pub fn is_match(&self, hex: &str) -> bool {
        self.regex.is_match(hex)
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Pattern").field(&self.source).finish()
    }
}

impl Serialize for Pattern {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.source)
    }
}

/// A request the engine knows how to send, with its static danger tier
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandRule {
    id: String,
    module: String,
    action: String,
    service: u8,
    pid: Option<Vec<u8>>,
    data: Vec<u8>,
    response: Pattern,
    declared_level: Option<DangerLevel>,
    classification: Classification,
}

impl CommandRule {
    /// Build a command rule and attach its classification
    ///
    /// `id` must have the form `<module>.<action>`; the parser validates it.
    pub fn new(
        module: impl Into<String>,
        action: impl Into<String>,
        service: u8,
        pid: Option<Vec<u8>>,
        data: Vec<u8>,
        response: Pattern,
        declared_level: Option<DangerLevel>,
    ) -> Self {
        let module = module.into();
        let action = action.into();
        let mut rule = Self {
            id: format!("{}.{}", module, action),
            module,
            action,
            service,
            pid,
            data,
            response,
            declared_level,
            classification: Classification::default(),
        };
        rule.classification = classify(&rule);
        rule
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    /// Request service code (OBD mode or UDS/KWP service id)
    pub fn service(&self) -> u8 {
        self.service
    }

    pub fn pid(&self) -> Option<&[u8]> {
        self.pid.as_deref()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn response(&self) -> &Pattern {
        &self.response
    }

    pub fn declared_level(&self) -> Option<DangerLevel> {
        self.declared_level
    }

    pub fn classification(&self) -> &Classification {
        &self.classification
    }

    pub fn danger(&self) -> DangerLevel {
        self.classification.level
    }

    /// Raw request bytes: service, parameter id, payload
    pub fn request_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![self.service];
        if let Some(pid) = &self.pid {
            bytes.extend_from_slice(pid);
        }
        bytes.extend_from_slice(&self.data);
        bytes
    }

    /// Same request with a different response pattern, reclassified
    pub fn with_response(&self, response: Pattern) -> Self {
        Self::new(
            self.module.clone(),
            self.action.clone(),
            self.service,
            self.pid.clone(),
            self.data.clone(),
            response,
            self.declared_level,
        )
    }

    /// Positive response service id (request + 0x40)
    pub fn positive_response_sid(&self) -> u8 {
        self.service.wrapping_add(0x40)
    }
}

/// Field extraction for a command's response
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseRule {
    /// Command identifier this rule decodes
    pub command: String,
    pub pattern: Pattern,
    /// Field names in capture order
    pub fields: Vec<String>,
    /// Transform per field (aligned with `fields`, `None` = identity)
    #[serde(skip)]
    pub formulas: Vec<Option<Formula>>,
    /// Unit per field (aligned with `fields`)
    pub units: Vec<Option<String>>,
}

/// How an extracted DTC value is rendered as a code string
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DtcCalc {
    /// SAE J2012 five-character code (P/C/B/U + 4 digits)
    Sae,
    /// Raw upper-case hex
    Hex,
    /// Signed two's-complement decimal
    Twos,
    /// Unsigned value plus a fixed offset, decimal
    Offset(i64),
}

impl FromStr for DtcCalc {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.to_ascii_uppercase();
        match upper.as_str() {
            "SAE" => Ok(DtcCalc::Sae),
            "HEX" | "RAW" => Ok(DtcCalc::Hex),
            "TWOS" => Ok(DtcCalc::Twos),
            _ => {
                let rest = upper
                    .strip_prefix("OFFSET")
                    .ok_or_else(|| format!("unknown DTC formula tag '{}'", s))?;
                let rest = rest.strip_prefix('+').unwrap_or(rest);
                rest.parse::<i64>()
                    .map(DtcCalc::Offset)
                    .map_err(|_| format!("invalid DTC offset '{}'", s))
            }
        }
    }
}

impl fmt::Display for DtcCalc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DtcCalc::Sae => f.write_str("SAE"),
            DtcCalc::Hex => f.write_str("HEX"),
            DtcCalc::Twos => f.write_str("TWOS"),
            DtcCalc::Offset(n) if *n >= 0 => write!(f, "OFFSET+{}", n),
            DtcCalc::Offset(n) => write!(f, "OFFSET{}", n),
        }
    }
}

/// Inclusive range (`3-5`, or a single position `3`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn width(&self) -> usize {
        self.end - self.start + 1
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

/// Trouble-code layout and recognition rule
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DtcRule {
    /// Recognized trouble code, or `*` for a layout-only rule
    pub code: String,
    /// Command the rule is bound to (`None` = every DTC-bearing command)
    pub command: Option<String>,
    /// Byte span of the first record within the payload
    pub bytes: Span,
    /// Bit span inside the record's big-endian value (bit 0 = LSB)
    pub bits: Span,
    pub calc: DtcCalc,
    /// Distance between records; defaults to the record width
    pub stride: Option<usize>,
}

impl DtcRule {
    pub fn is_layout_only(&self) -> bool {
        self.code == "*"
    }

    pub fn stride(&self) -> usize {
        self.stride.unwrap_or_else(|| self.bytes.width())
    }
}

/// Named boolean or enumerated flag inside a response byte
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BitMapping {
    pub field: String,
    pub command: String,
    /// Payload byte index
    pub byte: usize,
    /// Bit span inside the byte (bit 0 = LSB)
    pub bits: Span,
    /// Raw value → label
    pub meanings: BTreeMap<u32, String>,
}

impl BitMapping {
    /// Extract this mapping's raw value from a byte
    pub fn extract(&self, byte: u8) -> u32 {
        let width = self.bits.width() as u32;
        let mask = if width >= 32 { u32::MAX } else { (1u32 << width) - 1 };
        ((byte as u32) >> self.bits.start) & mask
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_bytes() {
        let rule = CommandRule::new(
            "ECM",
            "READ_RPM",
            0x01,
            Some(vec![0x0C]),
            vec![],
            Pattern::new("410C([0-9A-F]{4})").unwrap(),
            None,
        );
        assert_eq!(rule.id(), "ECM.READ_RPM");
        assert_eq!(rule.request_bytes(), vec![0x01, 0x0C]);
        assert_eq!(rule.positive_response_sid(), 0x41);
        assert_eq!(rule.danger(), DangerLevel::Safe);
    }

    #[test]
    fn test_pattern_is_anchored() {
        let pattern = Pattern::new("43[0-9A-F]{4,}").unwrap();
        assert!(pattern.is_match("431632"));
        assert!(!pattern.is_match("7F0312"));
        assert!(!pattern.is_match("00431632"));
        assert_eq!(pattern, Pattern::new("43[0-9A-F]{4,}").unwrap());
    }

    #[test]
    fn test_dtc_calc_tags() {
        assert_eq!("SAE".parse::<DtcCalc>().unwrap(), DtcCalc::Sae);
        assert_eq!("raw".parse::<DtcCalc>().unwrap(), DtcCalc::Hex);
        assert_eq!("OFFSET+100".parse::<DtcCalc>().unwrap(), DtcCalc::Offset(100));
        assert_eq!("OFFSET-40".parse::<DtcCalc>().unwrap(), DtcCalc::Offset(-40));
        assert_eq!(DtcCalc::Offset(-40).to_string(), "OFFSET-40");
        assert!("CRC".parse::<DtcCalc>().is_err());
    }

    #[test]
    fn test_bit_mapping_extract() {
        let mapping = BitMapping {
            field: "mode".to_string(),
            command: "HVAC.READ_STATUS".to_string(),
            byte: 2,
            bits: Span::new(4, 6),
            meanings: BTreeMap::new(),
        };
        assert_eq!(mapping.extract(0b0101_0000), 5);
    }

    #[test]
    fn test_protocol_and_bus_tags() {
        assert_eq!("can".parse::<Protocol>().unwrap(), Protocol::Can);
        assert_eq!(
            "VPW".parse::<Protocol>().unwrap(),
            Protocol::Other("VPW".to_string())
        );
        assert_eq!("HS".parse::<BusClass>().unwrap().to_string(), "HS");
    }
}
