//! Replay transport
//!
//! Answers requests from a recorded capture:
//!
//! ```text
//! # HVAC read, 2015 Focus
//! > 7A0 03
//! < 43 16 32
//! > 7E0 19 02 FF
//! < 10 0B 59 02 FF 01 23 45
//! < 21 2F C1 00 00 08 AA AA
//! ```
//!
//! Exchanges are consumed in order. A request is answered by the next
//! unconsumed exchange with the same address and request bytes; a request the
//! capture never saw gets no answer and times out.

use std::collections::VecDeque;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::error::{parse_address, parse_hex};
use super::{TransportAdapter, TransportError};

#[derive(Debug, Clone, PartialEq, Eq)]
struct Exchange {
    address: u32,
    request: Vec<u8>,
    frames: Vec<Vec<u8>>,
}

/// Transport that replays a capture file
#[derive(Debug)]
pub struct ReplayTransportAdapter {
    exchanges: Vec<Exchange>,
    cursor: Mutex<usize>,
    pending: Mutex<VecDeque<Vec<u8>>>,
}

impl ReplayTransportAdapter {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, TransportError> {
        let path = path.as_ref();
        let text = tokio::fs::read_to_string(path).await.map_err(|e| {
            TransportError::InvalidConfig(format!(
                "cannot read capture {}: {}",
                path.display(),
                e
            ))
        })?;
        let adapter = Self::parse(&text)?;
        debug!(path = %path.display(), exchanges = adapter.exchanges.len(), "Loaded capture");
        Ok(adapter)
    }

    pub fn parse(text: &str) -> Result<Self, TransportError> {
        let mut exchanges: Vec<Exchange> = Vec::new();
        for (index, raw) in text.lines().enumerate() {
            let line = raw.trim();
            let number = index + 1;
            let capture_error = |message: String| TransportError::Capture {
                line: number,
                message,
            };

            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some(rest) = line.strip_prefix('>') {
                let rest = rest.trim();
                let (address, request) = rest
                    .split_once(char::is_whitespace)
                    .ok_or_else(|| capture_error("expected '> <addr> <hex>'".to_string()))?;
                exchanges.push(Exchange {
                    address: parse_address(address).map_err(capture_error)?,
                    request: parse_hex(request).map_err(capture_error)?,
                    frames: Vec::new(),
                });
            } else if let Some(rest) = line.strip_prefix('<') {
                let frame = parse_hex(rest).map_err(capture_error)?;
                exchanges
                    .last_mut()
                    .ok_or_else(|| capture_error("response before any request".to_string()))?
                    .frames
                    .push(frame);
            } else {
                return Err(capture_error(format!("unrecognized line '{}'", line)));
            }
        }

        Ok(Self {
            exchanges,
            cursor: Mutex::new(0),
            pending: Mutex::new(VecDeque::new()),
        })
    }

    /// Number of exchanges not yet replayed
    pub fn remaining(&self) -> usize {
        self.exchanges.len().saturating_sub(*self.cursor.lock())
    }
}

#[async_trait]
impl TransportAdapter for ReplayTransportAdapter {
    async fn send(&self, address: u32, payload: &[u8]) -> Result<(), TransportError> {
        let mut cursor = self.cursor.lock();
        let found = self.exchanges[*cursor..]
            .iter()
            .position(|e| e.address == address && e.request == payload);

        let mut pending = self.pending.lock();
        pending.clear();
        match found {
            Some(offset) => {
                let exchange = &self.exchanges[*cursor + offset];
                pending.extend(exchange.frames.iter().cloned());
                *cursor += offset + 1;
            }
            None => warn!(
                address = format_args!("{:X}", address),
                request = %hex::encode_upper(payload),
                "Request not present in capture"
            ),
        }
        Ok(())
    }

    async fn recv_frame(&self, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        let next = self.pending.lock().pop_front();
        match next {
            Some(frame) => Ok(frame),
            None => {
                tokio::time::sleep(timeout).await;
                Err(TransportError::Timeout(format!("{:?}", timeout)))
            }
        }
    }

    async fn is_connected(&self) -> bool {
        true
    }

    fn kind(&self) -> &'static str {
        "replay"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const CAPTURE: &str = "\
# HVAC read
> 7A0 03
< 43 16 32

> 7E0 19 02 FF
< 10 0B 59 02 FF 01 23 45
< 21 2F C1 00 00 08 AA AA
> 7A0 03
< 43 00 00
";

    const WAIT: Duration = Duration::from_millis(50);

    #[tokio::test(start_paused = true)]
    async fn test_replays_in_order() {
        let replay = ReplayTransportAdapter::parse(CAPTURE).unwrap();
        assert_eq!(replay.remaining(), 3);

        replay.send(0x7A0, &[0x03]).await.unwrap();
        assert_eq!(replay.recv_frame(WAIT).await.unwrap(), vec![0x43, 0x16, 0x32]);

        replay.send(0x7E0, &[0x19, 0x02, 0xFF]).await.unwrap();
        assert_eq!(replay.recv_frame(WAIT).await.unwrap()[0], 0x10);
        assert_eq!(replay.recv_frame(WAIT).await.unwrap()[0], 0x21);

        // Second read of the same request gets the later recording
        replay.send(0x7A0, &[0x03]).await.unwrap();
        assert_eq!(replay.recv_frame(WAIT).await.unwrap(), vec![0x43, 0x00, 0x00]);
        assert_eq!(replay.remaining(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_request_times_out() {
        let replay = ReplayTransportAdapter::parse(CAPTURE).unwrap();
        replay.send(0x7E0, &[0x22, 0xF1, 0x90]).await.unwrap();
        assert!(matches!(
            replay.recv_frame(WAIT).await,
            Err(TransportError::Timeout(_))
        ));
        assert_eq!(replay.remaining(), 3);
    }

    #[test]
    fn test_malformed_capture() {
        let err = ReplayTransportAdapter::parse("< 43 16 32").unwrap_err();
        assert_eq!(
            err,
            TransportError::Capture {
                line: 1,
                message: "response before any request".to_string()
            }
        );
        let err = ReplayTransportAdapter::parse("> 7A0 03\n! 43").unwrap_err();
        assert!(matches!(err, TransportError::Capture { line: 2, .. }));
        assert!(ReplayTransportAdapter::parse("> 7A0").is_err());
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(CAPTURE.as_bytes()).unwrap();
        let replay = ReplayTransportAdapter::load(file.path()).await.unwrap();
        assert_eq!(replay.remaining(), 3);
        assert_eq!(replay.kind(), "replay");
    }
}
