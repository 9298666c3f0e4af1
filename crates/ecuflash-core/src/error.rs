//! Flash session errors

use std::path::PathBuf;

use thiserror::Error;

use crate::codec::{CodecError, Rejection};
use crate::config::ConfigError;
use crate::report::TransferReport;
use crate::session::{Command, SessionState};
use crate::transport::TransportError;

/// Errors that end a flash session
#[derive(Debug, Error)]
pub enum FlashError {
    /// The transport could not be opened
    #[error("Failed to open CAN transport: {0}")]
    Connect(#[source] TransportError),

    /// Transport-level send failure
    #[error("Failed to send frame: {0}")]
    Send(#[source] TransportError),

    /// Transport-level receive failure
    #[error("Failed to receive frame: {0}")]
    Receive(#[source] TransportError),

    #[error("Unlock command not acknowledged after {attempts} attempts")]
    UnlockTimeout { attempts: u32 },

    #[error("Flash mode request not acknowledged after {attempts} attempts")]
    ModeRequestTimeout { attempts: u32 },

    /// The ECU answered unlock or flash mode request negatively
    #[error("ECU rejected {command} command: {reason}")]
    CommandRejected { command: Command, reason: Rejection },

    /// A chunk exhausted its retries without an answer
    #[error("Chunk {0} not acknowledged after all retries")]
    ChunkTransferFailed(usize),

    /// The ECU answered a chunk negatively
    #[error("Chunk {0} rejected: {1}")]
    ChunkRejected(usize, Rejection),

    /// Another session holds the bus
    #[error("Another flash session is already active on this bus")]
    SessionAlreadyActive,

    #[error("Session is {0}, not idle")]
    SessionNotIdle(SessionState),

    #[error("Flash cancelled before chunk {next_chunk}")]
    Cancelled { next_chunk: usize },

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),

    /// The image file could not be read
    #[error("Failed to read image {}: {source}", path.display())]
    ImageRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Terminal failure of [`FlashSession::begin`](crate::FlashSession::begin)
///
/// Carries the last state the session was in before failing and the report
/// up to that point.
#[derive(Debug, Error)]
#[error("Flash failed in state {state}: {error}")]
pub struct FlashFailure {
    #[source]
    pub error: FlashError,
    pub state: SessionState,
    pub report: TransferReport,
}
