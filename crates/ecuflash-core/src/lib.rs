//! ecuflash-core - CAN ECU flash transfer engine
//!
//! This crate reprograms an ECU over a raw CAN link: it unlocks the unit,
//! requests flash mode, streams a calibration image in 8-byte frames and
//! resets the ECU.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      FlashSession                           │
//! │  Idle → Unlocking → ModeRequested → Transferring →          │
//! │  Finalizing → Resetting → Closed (or Failed)                │
//! │                                                             │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────┐  │
//! │  │ImageChunker │  │ Frame codec │  │ TransferReport      │  │
//! │  │ (sentinel)  │  │ (NRC, ids)  │  │ (outcomes)          │  │
//! │  └─────────────┘  └─────────────┘  └─────────────────────┘  │
//! │                          │                                  │
//! │                    ┌─────┴─────┐                            │
//! │                    │ BusHandle │                            │
//! │                    │  (lease)  │                            │
//! │                    └─────┬─────┘                            │
//! │                          │                                  │
//! │                 ┌────────┴────────┐                         │
//! │                 │  CanTransport   │                         │
//! │                 │(SocketCAN/mock) │                         │
//! │                 └─────────────────┘                         │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod chunker;
pub mod codec;
pub mod config;
pub mod error;
pub mod report;
pub mod session;
pub mod transport;

pub use chunker::{Chunk, ImageChunker};
pub use codec::{CanFrame, CodecError, NegativeResponseCode, SentinelAction, SentinelPolicy};
pub use config::{ConfigError, EcuConfig, FlashConfig, SessionConfig, TransportConfig};
pub use error::{FlashError, FlashFailure};
pub use report::{ChunkOutcome, ChunkResult, TransferReport};
pub use session::{CancelHandle, Command, FlashProgress, FlashSession, SessionState};
pub use transport::{open, BusHandle, CanTransport, MockReply, MockTransport, TransportError};
