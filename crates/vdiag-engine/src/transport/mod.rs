//! Transport layer
//!
//! The engine talks to the vehicle through a [`TransportAdapter`], selected
//! by configuration:
//! - Mock adapter with scripted responses, for tests and dry runs
//! - Replay adapter that answers from a recorded capture file
//!
//! Physical serial or ELM327 links live outside the engine and plug in by
//! implementing the same trait.
//!
//! # Example
//!
//! ```
//! # tokio_test::block_on(async {
//! use std::time::Duration;
//! use vdiag_engine::config::TransportConfig;
//! use vdiag_engine::transport::{create_transport, TransportAdapter};
//!
//! let transport = create_transport(&TransportConfig::default()).await.unwrap();
//! transport.send(0x7E0, &[0x09, 0x02]).await.unwrap();
//! // Unscripted: the mock refuses the service
//! let frame = transport.recv_frame(Duration::from_millis(100)).await.unwrap();
//! assert_eq!(frame, vec![0x7F, 0x09, 0x11]);
//! # });
//! ```

mod adapter;
pub mod error;
pub mod mock;
pub mod replay;

pub use adapter::TransportAdapter;
pub use error::TransportError;
pub use mock::MockTransportAdapter;
pub use replay::ReplayTransportAdapter;

use std::sync::Arc;

use crate::config::TransportConfig;

/// Create a transport adapter based on configuration
pub async fn create_transport(
    config: &TransportConfig,
) -> Result<Arc<dyn TransportAdapter>, TransportError> {
    match config {
        TransportConfig::Mock(cfg) => {
            let adapter = MockTransportAdapter::from_config(cfg)?;
            Ok(Arc::new(adapter))
        }
        TransportConfig::Replay(cfg) => {
            let adapter = ReplayTransportAdapter::load(&cfg.path).await?;
            Ok(Arc::new(adapter))
        }
    }
}
