//! Transport adapter trait and bus handle

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::TransportError;
use crate::codec::CanFrame;

/// Frame-level access to an already-configured CAN bus
///
/// Implementations never configure the adapter itself (channel, bitrate,
/// driver); they receive it ready to use.
#[async_trait]
pub trait CanTransport: Send + Sync {
    /// Put one frame on the bus
    async fn send(&self, frame: &CanFrame) -> Result<(), TransportError>;

    /// Wait up to `timeout` for the next frame
    ///
    /// Returns `Ok(None)` when nothing arrived in time. Must never block
    /// longer than `timeout`.
    async fn receive(&self, timeout: Duration) -> Result<Option<CanFrame>, TransportError>;

    /// Release the underlying bus resources
    async fn close(&self) -> Result<(), TransportError>;

    /// Whether the transport is still usable
    fn is_open(&self) -> bool;
}

#[async_trait]
impl<T: CanTransport + ?Sized> CanTransport for Arc<T> {
    async fn send(&self, frame: &CanFrame) -> Result<(), TransportError> {
        (**self).send(frame).await
    }

    async fn receive(&self, timeout: Duration) -> Result<Option<CanFrame>, TransportError> {
        (**self).receive(timeout).await
    }

    async fn close(&self) -> Result<(), TransportError> {
        (**self).close().await
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }
}

/// Shared handle to one open transport
///
/// The handle enforces that at most one flash session drives the bus at a
/// time. The caller owns the handle and closes it once its sessions are done.
pub struct BusHandle {
    transport: Box<dyn CanTransport>,
    session_active: AtomicBool,
}

impl BusHandle {
    pub fn new(transport: impl CanTransport + 'static) -> Self {
        Self::from_boxed(Box::new(transport))
    }

    pub fn from_boxed(transport: Box<dyn CanTransport>) -> Self {
        Self {
            transport,
            session_active: AtomicBool::new(false),
        }
    }

    /// The wrapped transport
    pub fn transport(&self) -> &dyn CanTransport {
        self.transport.as_ref()
    }

    /// Claim exclusive use of the bus for a session
    ///
    /// Returns `None` if another session currently holds the lease.
    pub fn try_lease(&self) -> Option<SessionLease<'_>> {
        self.session_active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| SessionLease { handle: self })
    }

    /// Whether a session currently holds the lease
    pub fn is_session_active(&self) -> bool {
        self.session_active.load(Ordering::Acquire)
    }

    pub fn is_open(&self) -> bool {
        self.transport.is_open()
    }

    /// Close the underlying transport
    pub async fn close(&self) -> Result<(), TransportError> {
        debug!("Closing CAN transport");
        self.transport.close().await
    }
}

/// Exclusive claim on a [`BusHandle`], released on drop
pub struct SessionLease<'a> {
    handle: &'a BusHandle,
}

impl Drop for SessionLease<'_> {
    fn drop(&mut self) {
        self.handle.session_active.store(false, Ordering::Release);
    }
}
