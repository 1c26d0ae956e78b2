//! Error types for rule parsing and response decoding

use thiserror::Error;
use vdiag_core::DiagError;

/// Rule text failed to compile; carries the 1-based line number
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("line {line}: {message}")]
pub struct GrammarError {
    pub line: usize,
    pub message: String,
}

impl GrammarError {
    pub fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

/// Result type for grammar operations
pub type GrammarResult<T> = Result<T, GrammarError>;

/// Formula compile or evaluation failure
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FormulaError {
    #[error("unexpected character '{0}' in formula")]
    UnexpectedChar(char),

    #[error("unexpected end of formula")]
    UnexpectedEnd,

    #[error("unexpected token '{0}' in formula")]
    UnexpectedToken(String),

    #[error("unknown variable '{0}'")]
    UnknownVariable(String),

    #[error("formula reads byte {index} but the field has {len} bytes")]
    MissingByte { index: usize, len: usize },

    #[error("division by zero")]
    DivisionByZero,
}

/// Framing and reassembly failures
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("empty frame")]
    Empty,

    #[error("invalid hex in frame: {0}")]
    InvalidHex(String),

    #[error("frame too short for its header: {0}")]
    Truncated(String),

    #[error("consecutive frame out of sequence: expected {expected:X}, got {actual:X}")]
    Sequence { expected: u8, actual: u8 },

    #[error("unexpected {0} frame")]
    Unexpected(&'static str),

    #[error("incomplete response: received {received} of {expected} bytes")]
    Incomplete { received: usize, expected: usize },

    #[error("adapter reported no data")]
    NoData,

    #[error("adapter error: {0}")]
    Adapter(String),
}

/// Errors that can occur while decoding a response
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DecodeError {
    /// Command not present in the rule set
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// Payload did not match the response pattern (expected outcome)
    #[error("payload {payload} did not match pattern for {command}")]
    NoMatch { command: String, payload: String },

    /// ECU answered with `7F <sid> <nrc>`
    #[error("negative response for service 0x{service:02X}: NRC 0x{nrc:02X}")]
    Negative { service: u8, nrc: u8 },

    /// A declared field could not be extracted
    #[error("field '{field}' missing from response to {command}")]
    MissingField { command: String, field: String },

    /// Captured text was not whole bytes of hex
    #[error("field '{field}' captured invalid hex '{text}'")]
    InvalidField { field: String, text: String },

    /// Formula evaluation failed
    #[error("formula for '{field}' failed: {source}")]
    Formula {
        field: String,
        #[source]
        source: FormulaError,
    },

    /// DTC record cut short by the end of the payload
    #[error("truncated DTC record at byte {offset}")]
    TruncatedDtc { offset: usize },

    /// Bit mapping references a byte past the end of the payload
    #[error("bit mapping '{field}' reads byte {byte} of a {len}-byte payload")]
    ByteOutOfRange {
        field: String,
        byte: usize,
        len: usize,
    },

    /// Reassembly failure
    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// Result type for decode operations
pub type DecodeResult<T> = Result<T, DecodeError>;

impl From<GrammarError> for DiagError {
    fn from(err: GrammarError) -> Self {
        DiagError::Grammar {
            line: err.line,
            message: err.message,
        }
    }
}

impl From<FrameError> for DiagError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::Incomplete { received, expected } => {
                DiagError::IncompleteResponse { received, expected }
            }
            FrameError::NoData => DiagError::Transport("no data".to_string()),
            other => DiagError::Transport(other.to_string()),
        }
    }
}

impl From<DecodeError> for DiagError {
    fn from(err: DecodeError) -> Self {
        match err {
            DecodeError::UnknownCommand(id) => DiagError::NotFound(id),
            DecodeError::NoMatch { command, .. } => DiagError::NoMatch { command },
            DecodeError::Negative { service, nrc } => DiagError::NegativeResponse {
                service,
                nrc,
                message: "negative response".to_string(),
            },
            DecodeError::Frame(frame) => frame.into(),
            other => DiagError::Internal(other.to_string()),
        }
    }
}
