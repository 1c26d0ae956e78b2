//! Trouble code layouts and rendering
//!
//! A layout says where the first record sits in a payload, how wide each record
//! is, which bits of the record hold the code and how to render them. Layouts
//! come from `DTC:` rules or, failing that, from the response service.

use serde::Serialize;

use crate::error::{DecodeError, DecodeResult};
use crate::types::{DtcCalc, DtcRule, Span};

/// OBD mode 03/07/0A and UDS 0x19 / KWP 0x18 responses carry trouble codes
pub const DTC_SERVICES: &[u8] = &[0x03, 0x07, 0x0A, 0x18, 0x19];

/// ReadDTCInformation sub-functions whose responses are DTC + status lists
const UDS_DTC_LIST_REPORTS: &[u8] = &[0x02, 0x0A, 0x0F, 0x13, 0x15, 0x17];

pub fn is_dtc_service(service: u8) -> bool {
    DTC_SERVICES.contains(&service)
}

/// DTC category from the top two bits of the high byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DtcCategory {
    /// P codes: engine, transmission
    Powertrain,
    /// C codes: ABS, suspension
    Chassis,
    /// B codes: airbags, climate control
    Body,
    /// U codes: network communication
    Network,
}

impl DtcCategory {
    pub fn from_high_byte(high_byte: u8) -> Self {
        match (high_byte >> 6) & 0x03 {
            0 => DtcCategory::Powertrain,
            1 => DtcCategory::Chassis,
            2 => DtcCategory::Body,
            _ => DtcCategory::Network,
        }
    }

    pub fn prefix(&self) -> char {
        match self {
            DtcCategory::Powertrain => 'P',
            DtcCategory::Chassis => 'C',
            DtcCategory::Body => 'B',
            DtcCategory::Network => 'U',
        }
    }
}

/// Resolved record layout for one payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DtcLayout {
    /// Offset of the first record
    pub start: usize,
    /// Record width in bytes
    pub width: usize,
    /// Distance between records
    pub stride: usize,
    /// Bits of the record value holding the code
    pub bits: Span,
    pub calc: DtcCalc,
}

impl DtcLayout {
    pub fn from_rule(rule: &DtcRule) -> Self {
        Self {
            start: rule.bytes.start,
            width: rule.bytes.width(),
            stride: rule.stride(),
            bits: rule.bits,
            calc: rule.calc,
        }
    }

    /// Protocol default for a positive response payload
    pub fn default_for(service: u8, payload: &[u8]) -> Option<Self> {
        match service {
            0x03 | 0x07 | 0x0A => {
                // CAN responses put a record count after the SID
                let after_sid = payload.len().saturating_sub(1);
                let has_count = after_sid % 2 == 1
                    && payload.get(1).map(|&n| n as usize) == Some((after_sid - 1) / 2);
                Some(Self {
                    start: if has_count { 2 } else { 1 },
                    width: 2,
                    stride: 2,
                    bits: Span::new(0, 15),
                    calc: DtcCalc::Sae,
                })
            }
            0x18 => Some(Self {
                start: 2,
                width: 2,
                stride: 3,
                bits: Span::new(0, 15),
                calc: DtcCalc::Hex,
            }),
            0x19 => {
                let sub = payload.get(1).copied()?;
                UDS_DTC_LIST_REPORTS.contains(&sub).then_some(Self {
                    start: 3,
                    width: 3,
                    stride: 4,
                    bits: Span::new(8, 23),
                    calc: DtcCalc::Sae,
                })
            }
            _ => None,
        }
    }

    /// Slice the payload into records in order of appearance
    ///
    /// All-zero records are padding and skipped. A record cut short by the end
    /// of the payload is an error rather than a silently shorter list.
    pub fn records<'a>(&self, payload: &'a [u8]) -> DecodeResult<Vec<DtcRecord<'a>>> {
        let mut records = Vec::new();
        let mut offset = self.start;
        while offset < payload.len() {
            let end = offset + self.width;
            if end > payload.len() {
                return Err(DecodeError::TruncatedDtc { offset });
            }
            let bytes = &payload[offset..end];
            let status = if self.stride > self.width {
                payload.get(end).copied()
            } else {
                None
            };
            if bytes.iter().any(|&b| b != 0) {
                records.push(DtcRecord {
                    offset,
                    bytes,
                    status,
                });
            }
            offset += self.stride.max(1);
        }
        Ok(records)
    }

    /// Render one record as a code string
    pub fn render(&self, record: &[u8]) -> String {
        let value = record
            .iter()
            .take(8)
            .fold(0u64, |acc, &b| (acc << 8) | b as u64);
        let width = self.bits.width().min(64) as u32;
        let mask = if width >= 64 { u64::MAX } else { (1u64 << width) - 1 };
        let bits = (value >> self.bits.start.min(63)) & mask;
        render_value(bits, width, self.calc)
    }
}

/// One trouble-code record located in a payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DtcRecord<'a> {
    pub offset: usize,
    pub bytes: &'a [u8],
    pub status: Option<u8>,
}

/// Render extracted bits according to the formula tag
pub fn render_value(value: u64, bit_width: u32, calc: DtcCalc) -> String {
    match calc {
        DtcCalc::Sae => to_sae_code((value & 0xFFFF) as u16),
        DtcCalc::Hex => {
            let digits = (bit_width as usize + 3) / 4;
            format!("{:0width$X}", value, width = digits.max(1))
        }
        // Widths up to 64 bits plus a 64-bit offset fit in i128
        DtcCalc::Twos => {
            let width = bit_width.clamp(1, 64);
            let unsigned = i128::from(value);
            let signed = if (unsigned >> (width - 1)) & 1 == 1 {
                unsigned - (1i128 << width)
            } else {
                unsigned
            };
            signed.to_string()
        }
        DtcCalc::Offset(offset) => (i128::from(value) + i128::from(offset)).to_string(),
    }
}

/// SAE J2012 code from the two DTC bytes (e.g. `0x1632` → `P1632`)
pub fn to_sae_code(value: u16) -> String {
    let [high, low] = value.to_be_bytes();
    let prefix = DtcCategory::from_high_byte(high).prefix();
    format!(
        "{}{:X}{:X}{:X}{:X}",
        prefix,
        (high >> 4) & 0x03,
        high & 0x0F,
        low >> 4,
        low & 0x0F
    )
}
