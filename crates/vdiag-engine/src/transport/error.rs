//! Transport layer errors

use thiserror::Error;
use vdiag_core::DiagError;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// No frame arrived within the wait window
    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Malformed capture file line
    #[error("Capture line {line}: {message}")]
    Capture { line: usize, message: String },
}

impl From<TransportError> for DiagError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Timeout(_) => DiagError::Timeout,
            other => DiagError::Transport(other.to_string()),
        }
    }
}

/// Parse a hex string, tolerating spaces between bytes and a `0x` prefix
pub(crate) fn parse_hex(text: &str) -> Result<Vec<u8>, String> {
    let compact: String = text.split_whitespace().collect();
    let compact = compact
        .strip_prefix("0x")
        .or_else(|| compact.strip_prefix("0X"))
        .unwrap_or(&compact);
    hex::decode(compact).map_err(|e| format!("invalid hex '{}': {}", text, e))
}

/// Parse a module address such as `7E0`, `0x7E0` or `18DA10F1`
pub(crate) fn parse_address(text: &str) -> Result<u32, String> {
    let trimmed = text.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    u32::from_str_radix(digits, 16).map_err(|_| format!("invalid address '{}'", text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_helpers() {
        assert_eq!(parse_hex("43 16 32").unwrap(), vec![0x43, 0x16, 0x32]);
        assert_eq!(parse_hex("0x1902FF").unwrap(), vec![0x19, 0x02, 0xFF]);
        assert!(parse_hex("4").is_err());
        assert_eq!(parse_address("0x7E0").unwrap(), 0x7E0);
        assert_eq!(parse_address("18DA10F1").unwrap(), 0x18DA_10F1);
        assert!(parse_address("ECU").is_err());
    }

    #[test]
    fn test_timeout_maps_to_timeout() {
        let err: DiagError = TransportError::Timeout("500ms".to_string()).into();
        assert_eq!(err, DiagError::Timeout);
        let err: DiagError = TransportError::ConnectionClosed.into();
        assert_eq!(err.kind(), "transport_error");
    }
}
