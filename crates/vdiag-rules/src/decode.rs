//! Response matching and decoding
//!
//! Decoding is a pure function of the rule set and the payload. The payload is
//! rendered as upper-case hex without separators before pattern matching, so
//! `43 16 32` is matched as `431632`.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::debug;

use crate::error::{DecodeError, DecodeResult};
use crate::frame::{reassemble, Frame, NEGATIVE_RESPONSE_SID};
use crate::ruleset::RuleSet;
use crate::types::BitMapping;

/// Extracted and transformed field
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldValue {
    /// Captured hex text
    pub raw: String,
    /// Physical value after the formula
    pub value: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

/// One trouble code in order of appearance
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecodedDtc {
    pub code: String,
    /// Record bytes as hex
    pub raw: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u8>,
    /// Whether the rule set recognizes the code
    pub known: bool,
}

/// Bit mapping result
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum FlagValue {
    Bool(bool),
    Enum {
        value: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        label: Option<String>,
    },
}

/// Structured result of a successful decode
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Decoded {
    pub command: String,
    /// Full payload as matched (upper-case hex)
    pub payload: String,
    pub fields: BTreeMap<String, FieldValue>,
    pub dtcs: Vec<DecodedDtc>,
    pub flags: BTreeMap<String, FlagValue>,
}

impl Decoded {
    /// Codes the rule set does not recognize; these feed the research path
    pub fn unknown_dtcs(&self) -> Vec<&DecodedDtc> {
        self.dtcs.iter().filter(|d| !d.known).collect()
    }
}

/// Negative response `7F <sid> <nrc>`, if the payload is one
pub fn negative_response(payload: &[u8]) -> Option<(u8, u8)> {
    match payload {
        [NEGATIVE_RESPONSE_SID, service, nrc, ..] => Some((*service, *nrc)),
        _ => None,
    }
}

/// Decode a reassembled payload for a command
pub fn decode(rules: &RuleSet, command: &str, payload: &[u8]) -> DecodeResult<Decoded> {
    let rule = rules
        .command(command)
        .ok_or_else(|| DecodeError::UnknownCommand(command.to_string()))?;

    if let Some((service, nrc)) = negative_response(payload) {
        return Err(DecodeError::Negative { service, nrc });
    }

    let hex = hex::encode_upper(payload);
    if !rule.response().is_match(&hex) {
        debug!(
            command,
            payload = %hex,
            pattern = rule.response().source(),
            "Response did not match"
        );
        return Err(DecodeError::NoMatch {
            command: command.to_string(),
            payload: hex,
        });
    }

    let mut fields = BTreeMap::new();
    if let Some(response) = rules.response_rule(command) {
        let captures = response.pattern.regex().captures(&hex).ok_or_else(|| {
            DecodeError::NoMatch {
                command: command.to_string(),
                payload: hex.clone(),
            }
        })?;
        for (i, name) in response.fields.iter().enumerate() {
            let group = captures
                .name(name)
                .or_else(|| captures.get(i + 1))
                .ok_or_else(|| DecodeError::MissingField {
                    command: command.to_string(),
                    field: name.clone(),
                })?;
            let text = group.as_str();
            let bytes = hex::decode(text).map_err(|_| DecodeError::InvalidField {
                field: name.clone(),
                text: text.to_string(),
            })?;
            let value = match response.formulas.get(i).and_then(Option::as_ref) {
                Some(formula) => formula.apply(&bytes).map_err(|source| DecodeError::Formula {
                    field: name.clone(),
                    source,
                })?,
                None => bytes
                    .iter()
                    .take(8)
                    .fold(0u64, |acc, &b| (acc << 8) | b as u64) as f64,
            };
            fields.insert(
                name.clone(),
                FieldValue {
                    raw: text.to_string(),
                    value,
                    unit: response.units.get(i).cloned().flatten(),
                },
            );
        }
    }

    let mut dtcs = Vec::new();
    if let Some(layout) = rules.dtc_layout(rule, payload) {
        for record in layout.records(payload)? {
            let code = layout.render(record.bytes);
            let known = rules.is_known_dtc(command, &code);
            dtcs.push(DecodedDtc {
                code,
                raw: hex::encode_upper(record.bytes),
                status: record.status,
                known,
            });
        }
    }

    let mut flags = BTreeMap::new();
    for mapping in rules.bit_mappings_for(command) {
        flags.insert(mapping.field.clone(), flag_value(mapping, payload)?);
    }

    Ok(Decoded {
        command: command.to_string(),
        payload: hex,
        fields,
        dtcs,
        flags,
    })
}

/// Reassemble frames, then decode
pub fn decode_frames<I>(rules: &RuleSet, command: &str, frames: I) -> DecodeResult<Decoded>
where
    I: IntoIterator<Item = Frame>,
{
    let payload = reassemble(frames)?;
    decode(rules, command, &payload)
}

fn flag_value(mapping: &BitMapping, payload: &[u8]) -> DecodeResult<FlagValue> {
    let byte = payload
        .get(mapping.byte)
        .copied()
        .ok_or_else(|| DecodeError::ByteOutOfRange {
            field: mapping.field.clone(),
            byte: mapping.byte,
            len: payload.len(),
        })?;
    let value = mapping.extract(byte);
    if mapping.bits.width() == 1 && mapping.meanings.is_empty() {
        return Ok(FlagValue::Bool(value == 1));
    }
    Ok(FlagValue::Enum {
        value,
        label: mapping.meanings.get(&value).cloned(),
    })
}
