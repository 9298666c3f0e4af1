//! Flash session state machine
//!
//! A [`FlashSession`] drives one flash operation over a shared [`BusHandle`]:
//! unlock, flash mode request, chunked data transfer and reset. Progress is
//! published on a watch channel and the run can be cancelled cooperatively.
//!
//! [`BusHandle`]: crate::transport::BusHandle

mod machine;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;

pub use machine::FlashSession;

/// Session state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Idle,
    Unlocking,
    ModeRequested,
    Transferring,
    Finalizing,
    Resetting,
    Closed,
    Failed,
}

impl SessionState {
    /// Closed and Failed accept no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Commands from the ECU command catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Unlock,
    FlashModeRequest,
    Reset,
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unlock => "unlock",
            Self::FlashModeRequest => "flash mode request",
            Self::Reset => "reset",
        })
    }
}

/// Cooperative cancellation for a running session
///
/// Checked before every chunk and before every retry. A cancelled session
/// fails with [`FlashError::Cancelled`](crate::FlashError::Cancelled) and sends
/// no reset.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    cancelled: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Snapshot of a running session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FlashProgress {
    pub state: SessionState,
    /// Chunks with a final outcome
    pub chunks_done: usize,
    pub total_chunks: usize,
    /// Image bytes covered by finished chunks
    pub bytes_done: usize,
}

impl FlashProgress {
    pub fn percent(&self) -> f64 {
        if self.total_chunks == 0 {
            return if self.state == SessionState::Closed { 100.0 } else { 0.0 };
        }
        self.chunks_done as f64 * 100.0 / self.total_chunks as f64
    }
}
