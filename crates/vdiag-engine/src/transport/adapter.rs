//! Transport adapter trait

use std::time::Duration;

use async_trait::async_trait;

use super::TransportError;

/// Capability interface toward the vehicle bus
///
/// The engine never opens or configures the physical link; it only sends a
/// request to a module address and pulls raw frames back. Reassembly happens
/// above this layer, so an adapter hands frames over exactly as the bus
/// delivered them (ISO-TP headers included when present).
#[async_trait]
pub trait TransportAdapter: Send + Sync {
    /// Send a request payload to a module address
    async fn send(&self, address: u32, payload: &[u8]) -> Result<(), TransportError>;

    /// Wait for the next response frame
    ///
    /// Returns [`TransportError::Timeout`] when nothing arrives within
    /// `timeout`.
    async fn recv_frame(&self, timeout: Duration) -> Result<Vec<u8>, TransportError>;

    /// Check if the transport is connected
    async fn is_connected(&self) -> bool;

    /// Short name for logs
    fn kind(&self) -> &'static str;
}
