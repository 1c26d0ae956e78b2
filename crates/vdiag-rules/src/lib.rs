//! vdiag-rules - Rule grammar and response decoding for vehicle diagnostics
//!
//! Compiles the compact rule notation that describes modules, commands and
//! response layouts, attaches a static danger tier to every command, and
//! decodes raw ECU responses against the compiled rules.
//!
//! # Features
//!
//! - **Single-pass grammar** - line-numbered errors, nothing partially loaded
//! - **Canonical serialization** - parse → `to_text` → parse is lossless
//! - **Compiled patterns and formulas** - regexes and field transforms are built once
//! - **ISO-TP reassembly** - single, first and consecutive frames, ELM327 text
//! - **DTC rendering** - SAE J2012, hex, two's complement and offset formulas
//! - **Static danger policy** - tiers come from rule metadata, never arguments
//!
//! # Quick Start
//!
//! ```rust
//! use vdiag_rules::{decode, RuleSet};
//!
//! let rules: RuleSet = "\
//! M:ECM A:7E0 P:CAN B:HS
//! C:ECM.READ_TEMP M:01 PID:05 R:4105
//! R:ECM.READ_TEMP PATTERN:4105([0-9A-F]{2}) EXTRACT:coolant CALC:A-40 UNIT:C
//! ".parse().unwrap();
//!
//! // Coolant temperature: raw 0x5A → 90 - 40 = 50 °C
//! let decoded = decode(&rules, "ECM.READ_TEMP", &[0x41, 0x05, 0x5A]).unwrap();
//! assert_eq!(decoded.fields["coolant"].value, 50.0);
//! ```
//!
//! # Rule Text
//!
//! ```text
//! # vdiag rules v1 Ford Focus 2015
//! M:HVAC A:7A0 P:CAN B:HS
//! C:HVAC.READ_DTC M:03 R:43[0-9A-F]{4,}
//! DTC:B1632 B:1-2 BITS:0-15 CALC:SAE
//! C:HVAC.READ_STATUS M:22 PID:0110 R:620110
//! BM:mode BYTE:3 BIT:4-6 MEANING:0=face,1=feet,2=defrost
//! ```

pub mod decode;
pub mod dtc;
pub mod error;
pub mod formula;
pub mod frame;
pub mod grammar;
pub mod policy;
pub mod precision;
pub mod ruleset;
pub mod types;

pub use decode::{decode, decode_frames, negative_response, Decoded, DecodedDtc, FieldValue, FlagValue};
pub use dtc::{to_sae_code, DtcLayout};
pub use error::{DecodeError, DecodeResult, FormulaError, FrameError, GrammarError, GrammarResult};
pub use formula::Formula;
pub use frame::{is_response_pending, parse_adapter_text, reassemble, Frame, Progress, Reassembler};
pub use grammar::{
    bit_mapping_line, command_line, dtc_line, module_line, response_line, split_command_id,
};
pub use policy::{classify, Classification};
pub use ruleset::{RuleCounts, RuleSet};
pub use types::{
    BitMapping, BusClass, CommandRule, DtcCalc, DtcRule, ModuleDescriptor, Pattern, Protocol,
    ResponseRule, Span,
};
