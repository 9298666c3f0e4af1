//! Frame codec errors

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Payload too large: {len} bytes (max 8)")]
    PayloadTooLarge { len: usize },

    #[error("Invalid standard arbitration id: 0x{0:X}")]
    InvalidArbitrationId(u16),
}
