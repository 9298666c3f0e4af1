//! Transport layer for raw CAN frame exchange
//!
//! This module provides frame-level adapters for talking to an ECU:
//! - SocketCAN adapter for raw 11-bit CAN (Linux only)
//! - Mock adapter for testing and dry runs
//!
//! # Example
//!
//! ```ignore
//! use ecuflash_core::transport::open;
//! use ecuflash_core::config::TransportConfig;
//!
//! let config = TransportConfig::Mock(Default::default());
//! let bus = open(&config).await?;
//! let frame = bus.transport().receive(Duration::from_millis(100)).await?;
//! bus.close().await?;
//! ```

mod adapter;
pub mod error;
pub mod mock;

#[cfg(all(target_os = "linux", feature = "socketcan"))]
pub mod socketcan;

pub use adapter::{BusHandle, CanTransport, SessionLease};
pub use error::TransportError;
pub use mock::{MockReply, MockTransport};

use std::sync::Arc;

use crate::config::TransportConfig;

/// Open the bus described by `config`
///
/// The returned handle is shared by the sessions that use it; the caller
/// closes it when done.
pub async fn open(config: &TransportConfig) -> Result<Arc<BusHandle>, TransportError> {
    match config {
        #[cfg(all(target_os = "linux", feature = "socketcan"))]
        TransportConfig::SocketCan(cfg) => {
            let transport = socketcan::SocketCanTransport::open(cfg).await?;
            Ok(Arc::new(BusHandle::new(transport)))
        }
        #[cfg(not(all(target_os = "linux", feature = "socketcan")))]
        TransportConfig::SocketCan(_) => Err(TransportError::Unsupported(
            "SocketCAN requires Linux and the 'socketcan' feature".to_string(),
        )),
        TransportConfig::Mock(cfg) => {
            tracing::info!(response_id = format!("0x{:03X}", cfg.response_id), "Using mock CAN transport");
            Ok(Arc::new(BusHandle::new(MockTransport::new(cfg))))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MockConfig;

    #[tokio::test]
    async fn test_open_mock() {
        let bus = open(&TransportConfig::Mock(MockConfig::default()))
            .await
            .unwrap();
        assert!(bus.is_open());
        assert!(!bus.is_session_active());
        bus.close().await.unwrap();
        assert!(!bus.is_open());
    }
}
