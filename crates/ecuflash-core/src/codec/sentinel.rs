//! Handling of image chunks that collide with the reserved sentinel payload

use serde::{Deserialize, Serialize};

use super::{SENTINEL_PAYLOAD, SUBSTITUTE_PAYLOAD};

/// What to do with a chunk whose raw bytes equal [`SENTINEL_PAYLOAD`].
///
/// Both lossy variants are deliberate: after `Substitute` the ECU holds 0xFE
/// where the image had 0xFF, after `Skip` the ECU keeps whatever it had (erased
/// flash usually reads back as 0xFF).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SentinelPolicy {
    /// Transmit [`SUBSTITUTE_PAYLOAD`] instead (lossy)
    #[default]
    Substitute,
    /// Do not transmit the chunk
    Skip,
    /// Transmit the sentinel unchanged
    Passthrough,
}

/// Action recorded on a chunk that matched the sentinel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SentinelAction {
    Substituted,
    Skipped,
}

impl SentinelPolicy {
    /// Decide the action for a chunk. `None` means the bytes go out unchanged.
    pub fn action_for(&self, raw: &[u8]) -> Option<SentinelAction> {
        if raw != SENTINEL_PAYLOAD {
            return None;
        }
        match self {
            Self::Substitute => Some(SentinelAction::Substituted),
            Self::Skip => Some(SentinelAction::Skipped),
            Self::Passthrough => None,
        }
    }

    /// Bytes to put on the bus for `raw`, or `None` if the chunk is skipped
    pub fn apply<'a>(&self, raw: &'a [u8]) -> Option<&'a [u8]> {
        match self.action_for(raw) {
            None => Some(raw),
            Some(SentinelAction::Substituted) => Some(&SUBSTITUTE_PAYLOAD[..]),
            Some(SentinelAction::Skipped) => None,
        }
    }
}
