//! Error taxonomy surfaced by the diagnostic command engine

use thiserror::Error;

/// Result type for engine operations
pub type DiagResult<T> = Result<T, DiagError>;

/// Errors that can occur anywhere between rule parsing and dispatch
///
/// Crate-local error types (grammar, decode, store, transport, confirmation)
/// convert into this enum so the orchestrator and its callers branch on a
/// single taxonomy.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DiagError {
    /// Malformed rule text; the whole text is rejected
    #[error("grammar error at line {line}: {message}")]
    Grammar { line: usize, message: String },

    /// Payload did not match the command's response pattern
    #[error("response for {command} did not match any known pattern")]
    NoMatch { command: String },

    /// Multi-frame reassembly did not complete in time
    #[error("incomplete response: received {received} of {expected} bytes")]
    IncompleteResponse { received: usize, expected: usize },

    /// Decoded trouble code that the rule set does not know
    #[error("unknown DTC: {0}")]
    UnknownDtc(String),

    /// ECU refused the request for security reasons (NRC 0x33/0x35/0x36/0x37)
    #[error("security access denied for service 0x{service:02X} (NRC 0x{nrc:02X})")]
    SecurityDenied { service: u8, nrc: u8 },

    /// ECU reported the request parameters out of range (NRC 0x31)
    #[error("request out of range for service 0x{service:02X} (NRC 0x{nrc:02X})")]
    OutOfRange { service: u8, nrc: u8 },

    /// Any other negative response
    #[error("negative response for service 0x{service:02X}: {message} (NRC 0x{nrc:02X})")]
    NegativeResponse {
        service: u8,
        nrc: u8,
        message: String,
    },

    /// Operator declined the confirmation sequence
    #[error("confirmation declined for {0}; not executed")]
    ConfirmationDeclined(String),

    /// Operator did not answer within the wait window
    #[error("confirmation timed out for {0}; not executed")]
    ConfirmationTimedOut(String),

    /// Another session held the knowledge file lock for every retry
    #[error("knowledge store lock contention: {0}")]
    StoreLockContention(String),

    /// Persisted knowledge failed re-validation
    #[error("corrupted knowledge file {path}: {message}")]
    CorruptedKnowledge { path: String, message: String },

    /// Command absent from every lookup tier
    #[error("command not found: {0}")]
    NotFound(String),

    /// Transport-level failure (no response, closed link)
    #[error("transport error: {0}")]
    Transport(String),

    /// Transport did not answer in time
    #[error("timed out waiting for response")]
    Timeout,

    /// Operator cancelled an in-progress step
    #[error("cancelled by operator")]
    Cancelled,

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl DiagError {
    /// Short machine-readable category name
    pub fn kind(&self) -> &'static str {
        match self {
            DiagError::Grammar { .. } => "grammar_error",
            DiagError::NoMatch { .. } => "no_match",
            DiagError::IncompleteResponse { .. } => "incomplete_response",
            DiagError::UnknownDtc(_) => "unknown_dtc",
            DiagError::SecurityDenied { .. } => "security_denied",
            DiagError::OutOfRange { .. } => "out_of_range",
            DiagError::NegativeResponse { .. } => "negative_response",
            DiagError::ConfirmationDeclined(_) => "confirmation_declined",
            DiagError::ConfirmationTimedOut(_) => "confirmation_timed_out",
            DiagError::StoreLockContention(_) => "store_lock_contention",
            DiagError::CorruptedKnowledge { .. } => "corrupted_knowledge",
            DiagError::NotFound(_) => "not_found",
            DiagError::Transport(_) => "transport_error",
            DiagError::Timeout => "timeout",
            DiagError::Cancelled => "cancelled",
            DiagError::Internal(_) => "internal_error",
        }
    }

    /// Expected outcomes are reportable results rather than failures
    pub fn is_expected(&self) -> bool {
        matches!(
            self,
            DiagError::NoMatch { .. }
                | DiagError::UnknownDtc(_)
                | DiagError::NotFound(_)
                | DiagError::ConfirmationDeclined(_)
                | DiagError::ConfirmationTimedOut(_)
                | DiagError::Cancelled
        )
    }

    /// Only a persisted knowledge file that fails re-validation ends the session
    pub fn is_fatal(&self) -> bool {
        matches!(self, DiagError::CorruptedKnowledge { .. })
    }

    /// Negative-response categories a caller may retry with a different approach
    pub fn is_retryable_nack(&self) -> bool {
        matches!(
            self,
            DiagError::SecurityDenied { .. } | DiagError::OutOfRange { .. }
        )
    }
}
