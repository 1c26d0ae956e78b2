//! Mock transport adapter for testing

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};

use super::error::{parse_address, parse_hex};
use super::{TransportAdapter, TransportError};
use crate::config::MockConfig;
use crate::uds::{service_id, NegativeResponseCode};

/// Scripted answer for one request
#[derive(Debug, Clone)]
struct Script {
    /// `None` answers on any address
    address: Option<u32>,
    request: Vec<u8>,
    frames: Vec<Vec<u8>>,
}

impl Script {
    fn answers(&self, address: u32) -> bool {
        self.address.map_or(true, |a| a == address)
    }
}

/// Mock transport adapter for testing
///
/// Requests are answered from scripts, exact request match first and then by
/// prefix. Unscripted requests get a `7F <sid> 11` negative response, the way
/// an ECU answers a service it does not implement.
pub struct MockTransportAdapter {
    latency: Duration,
    connected: AtomicBool,
    scripts: RwLock<Vec<Script>>,
    pending: Mutex<VecDeque<Vec<u8>>>,
    sent: Mutex<Vec<(u32, Vec<u8>)>>,
}

impl MockTransportAdapter {
    pub fn new() -> Self {
        Self {
            latency: Duration::ZERO,
            connected: AtomicBool::new(true),
            scripts: RwLock::new(Vec::new()),
            pending: Mutex::new(VecDeque::new()),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Build from configuration, dropping the frames it marks as lost
    pub fn from_config(config: &MockConfig) -> Result<Self, TransportError> {
        let adapter = Self::new().with_latency(Duration::from_millis(config.latency_ms));
        for scripted in &config.responses {
            let address = scripted
                .address
                .as_deref()
                .map(parse_address)
                .transpose()
                .map_err(TransportError::InvalidConfig)?;
            let request = parse_hex(&scripted.request).map_err(TransportError::InvalidConfig)?;
            let mut frames = Vec::with_capacity(scripted.frames.len());
            for (i, frame) in scripted.frames.iter().enumerate() {
                let bytes = parse_hex(frame).map_err(TransportError::InvalidConfig)?;
                if !scripted.drop_frames.contains(&i) {
                    frames.push(bytes);
                }
            }
            adapter.scripts.write().push(Script {
                address,
                request,
                frames,
            });
        }
        Ok(adapter)
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Add a scripted answer for requests to any address
    pub fn add_response(&self, request: Vec<u8>, frames: Vec<Vec<u8>>) {
        self.scripts.write().push(Script {
            address: None,
            request,
            frames,
        });
    }

    /// Add a scripted answer for requests to one module address
    pub fn add_response_for(&self, address: u32, request: Vec<u8>, frames: Vec<Vec<u8>>) {
        self.scripts.write().push(Script {
            address: Some(address),
            request,
            frames,
        });
    }

    /// Set connection state
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Every request sent so far, with its address
    pub fn sent(&self) -> Vec<(u32, Vec<u8>)> {
        self.sent.lock().clone()
    }

    fn find_frames(&self, address: u32, request: &[u8]) -> Vec<Vec<u8>> {
        let scripts = self.scripts.read();

        if let Some(script) = scripts
            .iter()
            .find(|s| s.answers(address) && s.request == request)
        {
            return script.frames.clone();
        }

        if let Some(script) = scripts
            .iter()
            .find(|s| s.answers(address) && request.starts_with(&s.request))
        {
            return script.frames.clone();
        }

        vec![vec![
            service_id::NEGATIVE_RESPONSE,
            request[0],
            NegativeResponseCode::SERVICE_NOT_SUPPORTED.code(),
        ]]
    }
}

impl Default for MockTransportAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransportAdapter for MockTransportAdapter {
    async fn send(&self, address: u32, payload: &[u8]) -> Result<(), TransportError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed);
        }
        if payload.is_empty() {
            return Err(TransportError::SendFailed("empty request".to_string()));
        }

        self.sent.lock().push((address, payload.to_vec()));
        let frames = self.find_frames(address, payload);
        tracing::debug!(
            address = format_args!("{:X}", address),
            request = %hex::encode_upper(payload),
            frames = frames.len(),
            "Mock transport: request sent"
        );

        // A new request supersedes anything still queued from the last one
        let mut pending = self.pending.lock();
        pending.clear();
        pending.extend(frames);
        Ok(())
    }

    async fn recv_frame(&self, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed);
        }

        let next = self.pending.lock().pop_front();
        match next {
            Some(frame) if self.latency < timeout => {
                if !self.latency.is_zero() {
                    tokio::time::sleep(self.latency).await;
                }
                Ok(frame)
            }
            Some(frame) => {
                tokio::time::sleep(timeout).await;
                self.pending.lock().push_front(frame);
                Err(TransportError::Timeout(format!("{:?}", timeout)))
            }
            None => {
                tokio::time::sleep(timeout).await;
                Err(TransportError::Timeout(format!("{:?}", timeout)))
            }
        }
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn kind(&self) -> &'static str {
        "mock"
    }
}
