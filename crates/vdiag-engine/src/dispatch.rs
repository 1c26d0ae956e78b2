//! Command dispatch
//!
//! Sends a confirmed command to its module and collects the response frames
//! until a complete payload is reassembled. Two clocks bound the wait: the
//! whole response window, and the gap allowed between consecutive frames once
//! a segmented response has started. A `7F <sid> 78` response-pending answer
//! restarts the response window.
//!
//! When either clock runs out mid-reassembly the partial buffer is discarded
//! and the exchange fails as incomplete; partial data is never returned.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use vdiag_rules::{
    is_response_pending, negative_response, CommandRule, Frame, ModuleDescriptor, Progress,
    Reassembler,
};

use crate::config::TimeoutConfig;
use crate::confirm::{CancelToken, Confirmed};
use crate::error::DispatchError;
use crate::transport::{TransportAdapter, TransportError};

/// A completed request/response round trip
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Exchange {
    pub address: u32,
    #[serde(with = "hex_bytes")]
    pub request: Vec<u8>,
    /// Reassembled response payload
    #[serde(with = "hex_bytes")]
    pub payload: Vec<u8>,
    /// Frames received, response-pending answers included
    pub frames: usize,
    /// Response-pending answers seen before the final payload
    pub pending: usize,
}

mod hex_bytes {
    use serde::Serializer;

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode_upper(bytes))
    }
}

struct Collected {
    payload: Vec<u8>,
    frames: usize,
    pending: usize,
}

/// Sends confirmed commands over a transport
pub struct Dispatcher {
    transport: Arc<dyn TransportAdapter>,
    response_timeout: Duration,
    frame_timeout: Duration,
    cancel: CancelToken,
}

impl Dispatcher {
    pub fn new(transport: Arc<dyn TransportAdapter>, timeouts: &TimeoutConfig) -> Self {
        Self {
            transport,
            response_timeout: timeouts.response(),
            frame_timeout: timeouts.frame(),
            cancel: CancelToken::never(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Dispatch a command
    ///
    /// Requires the [`Confirmed`] token issued for this very command; the
    /// token is consumed, so one confirmation buys exactly one dispatch.
    pub async fn dispatch(
        &self,
        confirmed: Confirmed,
        rule: &CommandRule,
        module: &ModuleDescriptor,
    ) -> Result<Exchange, DispatchError> {
        if confirmed.command() != rule.id() {
            warn!(
                confirmed = confirmed.command(),
                requested = rule.id(),
                "Confirmation token does not match command"
            );
            return Err(DispatchError::TokenMismatch {
                confirmed: confirmed.command().to_string(),
                requested: rule.id().to_string(),
            });
        }
        if !self.transport.is_connected().await {
            return Err(DispatchError::NotConnected);
        }

        let request = rule.request_bytes();
        info!(
            command = rule.id(),
            tier = %confirmed.level(),
            address = %module.address_hex(),
            request = %hex::encode_upper(&request),
            transport = self.transport.kind(),
            "Dispatching command"
        );
        self.transport.send(module.address, &request).await?;

        let collected = self.collect().await?;
        if let Some((service, nrc)) = negative_response(&collected.payload) {
            warn!(
                command = rule.id(),
                service = format_args!("0x{:02X}", service),
                nrc = format_args!("0x{:02X}", nrc),
                "Negative response"
            );
            return Err(DispatchError::Negative {
                service,
                nrc: nrc.into(),
            });
        }

        info!(
            command = rule.id(),
            response = %hex::encode_upper(&collected.payload),
            frames = collected.frames,
            "Response received"
        );
        Ok(Exchange {
            address: module.address,
            request,
            payload: collected.payload,
            frames: collected.frames,
            pending: collected.pending,
        })
    }

    async fn collect(&self) -> Result<Collected, DispatchError> {
        let mut reassembler = Reassembler::new();
        let mut deadline = Instant::now() + self.response_timeout;
        let mut frames = 0;
        let mut pending = 0;

        loop {
            let now = Instant::now();
            if now >= deadline {
                return Err(self.expired(&mut reassembler));
            }
            let remaining = deadline - now;
            let wait = if reassembler.in_progress() {
                remaining.min(self.frame_timeout)
            } else {
                remaining
            };

            let received = tokio::select! {
                _ = self.cancel.cancelled() => None,
                result = self.transport.recv_frame(wait) => Some(result),
            };
            let bytes = match received {
                None => {
                    reassembler.reset();
                    info!("Dispatch cancelled; partial response discarded");
                    return Err(DispatchError::Cancelled);
                }
                Some(Ok(bytes)) => bytes,
                Some(Err(TransportError::Timeout(_))) => {
                    return Err(self.expired(&mut reassembler));
                }
                Some(Err(e)) => {
                    reassembler.reset();
                    return Err(e.into());
                }
            };

            frames += 1;
            debug!(frame = %hex::encode_upper(&bytes), "Frame received");
            match reassembler.push(Frame::classify(&bytes)?)? {
                Progress::NeedMore => {}
                Progress::Complete(payload) if is_response_pending(&payload) => {
                    pending += 1;
                    deadline = Instant::now() + self.response_timeout;
                    debug!(pending, "Response pending; wait extended");
                }
                Progress::Complete(payload) => {
                    return Ok(Collected {
                        payload,
                        frames,
                        pending,
                    })
                }
            }
        }
    }

    fn expired(&self, reassembler: &mut Reassembler) -> DispatchError {
        if reassembler.in_progress() {
            warn!(
                received = reassembler.received(),
                expected = reassembler.expected().unwrap_or(0),
                "Reassembly timed out; partial response discarded"
            );
            reassembler.abandon().into()
        } else {
            DispatchError::Timeout(self.response_timeout.as_millis() as u64)
        }
    }
}
