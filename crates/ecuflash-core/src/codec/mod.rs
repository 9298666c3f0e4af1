//! CAN frame codec
//!
//! Converts between raw 11-bit CAN frames and the protocol-level messages the
//! flash session works with: outgoing command/data payloads and classified ECU
//! responses.

mod error;
mod nrc;
mod sentinel;

pub use error::CodecError;
pub use nrc::NegativeResponseCode;
pub use sentinel::{SentinelAction, SentinelPolicy};

use std::fmt;

use serde::{Deserialize, Serialize};

/// Maximum payload of a classic CAN frame
pub const MAX_PAYLOAD: usize = 8;

/// Highest valid 11-bit (standard) arbitration id
pub const MAX_STANDARD_ID: u16 = 0x7FF;

/// Reserved control pattern that must never reach the bus as chunk data
pub const SENTINEL_PAYLOAD: [u8; MAX_PAYLOAD] = [0xFF; MAX_PAYLOAD];

/// Payload transmitted in place of [`SENTINEL_PAYLOAD`] under [`SentinelPolicy::Substitute`]
pub const SUBSTITUTE_PAYLOAD: [u8; MAX_PAYLOAD] = [0xFE; MAX_PAYLOAD];

/// Default service id marking a negative response (UDS convention)
pub const DEFAULT_NEGATIVE_RESPONSE_SID: u8 = 0x7F;

/// A classic CAN data frame with a standard identifier
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct CanFrame {
    arbitration_id: u16,
    len: u8,
    data: [u8; MAX_PAYLOAD],
}

impl CanFrame {
    /// Arbitration id (11 bits)
    pub fn id(&self) -> u16 {
        self.arbitration_id
    }

    /// Payload bytes
    pub fn data(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl fmt::Debug for CanFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CanFrame(0x{:03X} [{}])", self.arbitration_id, hex::encode(self.data()))
    }
}

impl fmt::Display for CanFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:03X}#{}", self.arbitration_id, hex::encode_upper(self.data()))
    }
}

/// Build a frame for `arbitration_id` carrying `bytes`
pub fn encode(arbitration_id: u16, bytes: &[u8]) -> Result<CanFrame, CodecError> {
    if arbitration_id > MAX_STANDARD_ID {
        return Err(CodecError::InvalidArbitrationId(arbitration_id));
    }
    if bytes.len() > MAX_PAYLOAD {
        return Err(CodecError::PayloadTooLarge { len: bytes.len() });
    }

    let mut data = [0u8; MAX_PAYLOAD];
    data[..bytes.len()].copy_from_slice(bytes);

    Ok(CanFrame {
        arbitration_id,
        len: bytes.len() as u8,
        data,
    })
}

/// Extract the payload of a frame
pub fn decode(frame: &CanFrame) -> &[u8] {
    frame.data()
}

/// Inclusive range of arbitration ids the ECU answers from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseIdRange {
    pub first: u16,
    pub last: u16,
}

impl ResponseIdRange {
    pub fn new(first: u16, last: u16) -> Self {
        Self { first, last }
    }

    /// Range accepting exactly one id
    pub fn single(id: u16) -> Self {
        Self { first: id, last: id }
    }

    pub fn contains(&self, id: u16) -> bool {
        (self.first..=self.last).contains(&id)
    }
}

impl Default for ResponseIdRange {
    fn default() -> Self {
        Self {
            first: 0x7E8,
            last: 0x7EF,
        }
    }
}

impl fmt::Display for ResponseIdRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:03X}..=0x{:03X}", self.first, self.last)
    }
}

/// Classified ECU reply to a request frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EcuResponse {
    /// Any reply that is not a negative response
    Positive,
    /// ECU accepted the request but needs more time (NRC 0x78)
    Pending { service_id: u8 },
    /// Explicit rejection
    Negative {
        service_id: u8,
        nrc: NegativeResponseCode,
    },
}

impl EcuResponse {
    /// Classify a response payload.
    ///
    /// A payload is negative when it starts with `negative_sid` and carries at
    /// least the rejected service id and the NRC byte. Everything else,
    /// including an empty frame, counts as an acknowledgement.
    pub fn classify(payload: &[u8], negative_sid: u8) -> Self {
        match payload {
            [sid, service_id, nrc, ..] if *sid == negative_sid => {
                let nrc = NegativeResponseCode::from(*nrc);
                if nrc == NegativeResponseCode::ResponsePending {
                    Self::Pending {
                        service_id: *service_id,
                    }
                } else {
                    Self::Negative {
                        service_id: *service_id,
                        nrc,
                    }
                }
            }
            _ => Self::Positive,
        }
    }
}

/// Reason an ECU gave for rejecting a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Rejection {
    pub service_id: u8,
    pub nrc: NegativeResponseCode,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (NRC 0x{:02X}) for service 0x{:02X}",
            self.nrc, self.nrc, self.service_id
        )
    }
}
