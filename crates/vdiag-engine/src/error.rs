//! Engine errors

use std::path::PathBuf;

use thiserror::Error;
use vdiag_core::DiagError;
use vdiag_rules::FrameError;

use crate::transport::TransportError;
use crate::uds::{service_name, NegativeResponseCode, NrcCategory};

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl From<ConfigError> for DiagError {
    fn from(err: ConfigError) -> Self {
        DiagError::Internal(err.to_string())
    }
}

/// Operator-side outcomes that end a confirmation sequence
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfirmationError {
    #[error("{command} declined at step {step}; not executed")]
    Declined { command: String, step: usize },

    #[error("{command} not confirmed within {timeout_ms} ms at step {step}; not executed")]
    TimedOut {
        command: String,
        step: usize,
        timeout_ms: u64,
    },

    #[error("{command} cancelled by operator; not executed")]
    Cancelled { command: String },

    /// Transition requested from the wrong state
    #[error("invalid confirmation transition: {0}")]
    InvalidState(String),
}

impl From<ConfirmationError> for DiagError {
    fn from(err: ConfirmationError) -> Self {
        match err {
            ConfirmationError::Declined { command, .. } => DiagError::ConfirmationDeclined(command),
            ConfirmationError::TimedOut { command, .. } => DiagError::ConfirmationTimedOut(command),
            ConfirmationError::Cancelled { .. } => DiagError::Cancelled,
            ConfirmationError::InvalidState(msg) => DiagError::Internal(msg),
        }
    }
}

/// Failures between sending a request and holding a complete payload
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DispatchError {
    /// Token was issued for a different command
    #[error("confirmation token for {confirmed} cannot dispatch {requested}")]
    TokenMismatch {
        confirmed: String,
        requested: String,
    },

    #[error("transport is not connected")]
    NotConnected,

    /// No frame at all within the response window
    #[error("no response within {0} ms")]
    Timeout(u64),

    /// Multi-frame reassembly started but did not finish; partial data discarded
    #[error("incomplete response: received {received} of {expected} bytes")]
    Incomplete { received: usize, expected: usize },

    #[error("negative response for service 0x{service:02X}: {nrc}")]
    Negative {
        service: u8,
        nrc: NegativeResponseCode,
    },

    #[error("framing error: {0}")]
    Frame(FrameError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("dispatch cancelled by operator")]
    Cancelled,
}

impl From<FrameError> for DispatchError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::Incomplete { received, expected } => {
                DispatchError::Incomplete { received, expected }
            }
            other => DispatchError::Frame(other),
        }
    }
}

impl From<DispatchError> for DiagError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::TokenMismatch { .. } => DiagError::Internal(err.to_string()),
            DispatchError::NotConnected => DiagError::Transport(err.to_string()),
            DispatchError::Timeout(_) => DiagError::Timeout,
            DispatchError::Incomplete { received, expected } => {
                DiagError::IncompleteResponse { received, expected }
            }
            DispatchError::Negative { service, nrc } => map_nrc(service, nrc),
            DispatchError::Frame(frame) => frame.into(),
            DispatchError::Transport(transport) => transport.into(),
            DispatchError::Cancelled => DiagError::Cancelled,
        }
    }
}

/// Map a negative response to the error taxonomy
///
/// - 0x33, 0x35, 0x36, 0x37: security → `SecurityDenied`
/// - 0x31: parameters → `OutOfRange`
/// - everything else → `NegativeResponse` with the code's name
pub fn map_nrc(service: u8, nrc: NegativeResponseCode) -> DiagError {
    match nrc.category() {
        NrcCategory::Security => DiagError::SecurityDenied {
            service,
            nrc: nrc.code(),
        },
        NrcCategory::OutOfRange => DiagError::OutOfRange {
            service,
            nrc: nrc.code(),
        },
        NrcCategory::Pending | NrcCategory::Rejected => DiagError::NegativeResponse {
            service,
            nrc: nrc.code(),
            message: format!(
                "{} refused: {}",
                service_name(service),
                nrc.name().unwrap_or("reserved code")
            ),
        },
    }
}
