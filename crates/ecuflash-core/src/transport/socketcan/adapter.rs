//! Raw SocketCAN adapter for standard 11-bit frames

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use socketcan::{CanFrame as RawFrame, CanSocket, EmbeddedFrame, Frame, Socket, StandardId};

use crate::codec::{self, CanFrame};
use crate::config::SocketCanConfig;
use crate::transport::{CanTransport, TransportError};

/// Poll period while waiting on the non-blocking socket
const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Raw CAN socket on an already-configured interface
pub struct SocketCanTransport {
    interface: String,
    socket: Arc<Mutex<CanSocket>>,
    open: AtomicBool,
}

impl SocketCanTransport {
    pub async fn open(config: &SocketCanConfig) -> Result<Self, TransportError> {
        let socket = CanSocket::open(&config.interface).map_err(|e| {
            TransportError::ConnectionFailed(format!(
                "Failed to open raw CAN socket on {}: {}",
                config.interface, e
            ))
        })?;

        socket.set_nonblocking(true).map_err(|e| {
            TransportError::InvalidConfig(format!("Failed to set non-blocking: {}", e))
        })?;

        Self::drain_socket(&socket);

        tracing::info!(interface = %config.interface, "SocketCAN transport opened");

        Ok(Self {
            interface: config.interface.clone(),
            socket: Arc::new(Mutex::new(socket)),
            open: AtomicBool::new(true),
        })
    }

    /// Drop frames left over from before this transport was opened
    fn drain_socket(socket: &CanSocket) {
        while let Ok(frame) = socket.read_frame() {
            tracing::debug!(can_id = format!("0x{:X}", frame.raw_id()), "Drained stale frame");
        }
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.open.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(TransportError::ConnectionClosed)
        }
    }
}

/// Convert a received raw frame, ignoring remote, error and extended frames
fn from_raw(frame: &RawFrame) -> Option<CanFrame> {
    match frame {
        RawFrame::Data(data) if !data.is_extended() => {
            codec::encode(data.raw_id() as u16, data.data()).ok()
        }
        _ => None,
    }
}

fn to_raw(frame: &CanFrame) -> Result<RawFrame, TransportError> {
    let id = StandardId::new(frame.id()).ok_or_else(|| {
        TransportError::InvalidConfig(format!("Invalid standard CAN ID: 0x{:X}", frame.id()))
    })?;
    RawFrame::new(id, frame.data())
        .ok_or_else(|| TransportError::SendFailed(format!("Cannot build CAN frame {}", frame)))
}

#[async_trait]
impl CanTransport for SocketCanTransport {
    async fn send(&self, frame: &CanFrame) -> Result<(), TransportError> {
        self.ensure_open()?;

        let raw = to_raw(frame)?;
        let socket = self.socket.clone();

        tokio::task::spawn_blocking(move || {
            let socket_guard = socket.lock();
            socket_guard
                .write_frame(&raw)
                .map_err(|e| TransportError::SendFailed(e.to_string()))
        })
        .await
        .map_err(|e| TransportError::SendFailed(format!("Task join error: {}", e)))??;

        Ok(())
    }

    async fn receive(&self, timeout: Duration) -> Result<Option<CanFrame>, TransportError> {
        self.ensure_open()?;

        let socket = self.socket.clone();
        let deadline = Instant::now() + timeout;

        tokio::task::spawn_blocking(move || loop {
            let result = socket.lock().read_frame();
            match result {
                Ok(raw) => {
                    if let Some(frame) = from_raw(&raw) {
                        return Ok(Some(frame));
                    }
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(TransportError::ReceiveFailed(e.to_string())),
            }

            if Instant::now() >= deadline {
                return Ok(None);
            }
            std::thread::sleep(POLL_INTERVAL);
        })
        .await
        .map_err(|e| TransportError::ReceiveFailed(format!("Task join error: {}", e)))?
    }

    async fn close(&self) -> Result<(), TransportError> {
        // The socket itself closes when the transport is dropped
        self.open.store(false, Ordering::SeqCst);
        tracing::info!(interface = %self.interface, "SocketCAN transport closed");
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}
