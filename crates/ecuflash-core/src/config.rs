//! Flash configuration
//!
//! Transport selection, ECU addressing and command catalog, and the session
//! timing/retry policy. Everything here is loadable from TOML; timing values
//! are stored in milliseconds and exposed as [`Duration`]s.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::codec::{
    ResponseIdRange, SentinelPolicy, DEFAULT_NEGATIVE_RESPONSE_SID, MAX_PAYLOAD, MAX_STANDARD_ID,
};

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid chunk size {0} (must be 1..=8)")]
    InvalidChunkSize(usize),

    #[error("Invalid standard arbitration id 0x{0:X}")]
    InvalidArbitrationId(u16),

    #[error("Invalid response id range {0}")]
    InvalidResponseRange(ResponseIdRange),

    #[error("Request id 0x{0:03X} lies inside the response id range")]
    RequestIdInResponseRange(u16),

    #[error("Command '{name}' must be 1..=8 bytes, got {len}")]
    InvalidCommand { name: &'static str, len: usize },

    #[error("Timeout '{0}' must be greater than zero")]
    ZeroTimeout(&'static str),

    #[error("Invalid retry backoff: {0}")]
    InvalidBackoff(String),
}

/// Complete configuration for one flash run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlashConfig {
    /// Transport configuration
    #[serde(default)]
    pub transport: TransportConfig,
    /// Target ECU addressing and commands
    #[serde(default)]
    pub ecu: EcuConfig,
    /// Session timing and retry policy
    pub session: SessionConfig,
}

impl FlashConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.ecu.validate()?;
        self.session.validate()
    }
}

// =============================================================================
// Transport Configuration
// =============================================================================

/// Transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransportConfig {
    /// Raw SocketCAN interface (Linux only)
    SocketCan(SocketCanConfig),
    /// In-process mock for tests and dry runs
    Mock(MockConfig),
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::Mock(MockConfig::default())
    }
}

/// SocketCAN configuration
///
/// The interface must already be up with its bitrate configured.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocketCanConfig {
    /// CAN interface name (e.g., "can0")
    pub interface: String,
}

/// Mock transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MockConfig {
    /// Simulated latency in milliseconds
    #[serde(default)]
    pub latency_ms: u64,
    /// Arbitration id the simulated ECU answers from
    #[serde(default = "default_mock_response_id")]
    pub response_id: u16,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            latency_ms: 0,
            response_id: default_mock_response_id(),
        }
    }
}

fn default_mock_response_id() -> u16 {
    0x7E8
}

// =============================================================================
// ECU Configuration
// =============================================================================

/// Target ECU addressing and command catalog
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EcuConfig {
    /// Request arbitration id (tester -> ECU)
    #[serde(default = "default_request_id")]
    pub request_id: u16,
    /// Ids the ECU answers from (ECU -> tester)
    #[serde(default)]
    pub response_ids: ResponseIdRange,
    /// First byte marking a negative response
    #[serde(default = "default_negative_sid")]
    pub negative_response_sid: u8,
    /// Command payloads for this ECU variant
    #[serde(default)]
    pub commands: CommandCatalog,
}

impl Default for EcuConfig {
    fn default() -> Self {
        Self {
            request_id: default_request_id(),
            response_ids: ResponseIdRange::default(),
            negative_response_sid: default_negative_sid(),
            commands: CommandCatalog::default(),
        }
    }
}

impl EcuConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.request_id > MAX_STANDARD_ID {
            return Err(ConfigError::InvalidArbitrationId(self.request_id));
        }
        let range = self.response_ids;
        if range.first > range.last || range.last > MAX_STANDARD_ID {
            return Err(ConfigError::InvalidResponseRange(range));
        }
        if range.contains(self.request_id) {
            return Err(ConfigError::RequestIdInResponseRange(self.request_id));
        }
        self.commands.validate()
    }
}

fn default_request_id() -> u16 {
    0x7E0
}

fn default_negative_sid() -> u8 {
    DEFAULT_NEGATIVE_RESPONSE_SID
}

/// Command payloads sent around the data transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandCatalog {
    /// Unlock / security access request
    #[serde(default = "default_unlock")]
    pub unlock: Vec<u8>,
    /// Flash mode request
    #[serde(default = "default_flash_mode_request")]
    pub flash_mode_request: Vec<u8>,
    /// ECU reset
    #[serde(default = "default_reset")]
    pub reset: Vec<u8>,
}

impl Default for CommandCatalog {
    fn default() -> Self {
        Self {
            unlock: default_unlock(),
            flash_mode_request: default_flash_mode_request(),
            reset: default_reset(),
        }
    }
}

impl CommandCatalog {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, payload) in [
            ("unlock", &self.unlock),
            ("flash_mode_request", &self.flash_mode_request),
            ("reset", &self.reset),
        ] {
            if payload.is_empty() || payload.len() > MAX_PAYLOAD {
                return Err(ConfigError::InvalidCommand {
                    name,
                    len: payload.len(),
                });
            }
        }
        Ok(())
    }
}

fn default_unlock() -> Vec<u8> {
    vec![0x02, 0x27, 0x01]
}

fn default_flash_mode_request() -> Vec<u8> {
    vec![0x34, 0x56, 0x78, 0x9A, 0xBC, 0xDE, 0xF0, 0x12]
}

fn default_reset() -> Vec<u8> {
    vec![0x11, 0x01]
}

// =============================================================================
// Session Configuration
// =============================================================================

/// Session timing, retry and acknowledgement policy
///
/// There is no `Default`: the frame pacing interval depends on the target
/// hardware and must be given via [`SessionConfig::new`] or the
/// `frame_pacing_ms` TOML field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Minimum interval between consecutive frames
    pub frame_pacing_ms: u64,
    /// Wait for a reply to unlock / flash mode request
    #[serde(default = "default_command_timeout")]
    pub command_timeout_ms: u64,
    /// Wait for a reply to each data frame
    #[serde(default = "default_chunk_timeout")]
    pub per_chunk_timeout_ms: u64,
    /// Upper bound on waiting while the ECU keeps answering "response pending"
    #[serde(default = "default_pending_timeout")]
    pub response_pending_timeout_ms: u64,
    /// Retries after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Delay before each chunk retry; unlock and mode request retries are
    /// sent as soon as the previous attempt times out
    #[serde(default)]
    pub backoff: RetryBackoff,
    /// Fail with `UnlockTimeout` when the unlock command is never answered
    #[serde(default)]
    pub require_unlock_ack: bool,
    /// Fail with `ModeRequestTimeout` when the flash mode request is never answered
    #[serde(default)]
    pub require_mode_ack: bool,
    /// Continue past chunks that exhausted their retries without an answer
    #[serde(default)]
    pub tolerate_chunk_timeouts: bool,
    /// Chunking of the image
    #[serde(default)]
    pub chunking: ChunkingConfig,
}

impl SessionConfig {
    /// Session configuration with the given pacing and default policy
    pub fn new(frame_pacing: Duration) -> Self {
        Self {
            frame_pacing_ms: frame_pacing.as_millis() as u64,
            command_timeout_ms: default_command_timeout(),
            per_chunk_timeout_ms: default_chunk_timeout(),
            response_pending_timeout_ms: default_pending_timeout(),
            max_retries: default_max_retries(),
            backoff: RetryBackoff::default(),
            require_unlock_ack: false,
            require_mode_ack: false,
            tolerate_chunk_timeouts: false,
            chunking: ChunkingConfig::default(),
        }
    }

    pub fn frame_pacing(&self) -> Duration {
        Duration::from_millis(self.frame_pacing_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn per_chunk_timeout(&self) -> Duration {
        Duration::from_millis(self.per_chunk_timeout_ms)
    }

    pub fn response_pending_timeout(&self) -> Duration {
        Duration::from_millis(self.response_pending_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.command_timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout("command_timeout_ms"));
        }
        if self.per_chunk_timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout("per_chunk_timeout_ms"));
        }
        if self.chunking.chunk_size == 0 || self.chunking.chunk_size > MAX_PAYLOAD {
            return Err(ConfigError::InvalidChunkSize(self.chunking.chunk_size));
        }
        self.backoff.validate()
    }
}

fn default_command_timeout() -> u64 {
    1000
}

fn default_chunk_timeout() -> u64 {
    1000
}

fn default_pending_timeout() -> u64 {
    5000
}

fn default_max_retries() -> u32 {
    3
}

/// Delay applied before each retry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RetryBackoff {
    /// Same delay before every retry
    Fixed { delay_ms: u64 },
    /// Delay doubling per retry, capped at `max_ms`
    Exponential { initial_ms: u64, max_ms: u64 },
}

impl Default for RetryBackoff {
    fn default() -> Self {
        Self::Fixed { delay_ms: 10 }
    }
}

impl RetryBackoff {
    /// Delay before retry number `retry` (1-based)
    pub fn delay_for(&self, retry: u32) -> Duration {
        match *self {
            Self::Fixed { delay_ms } => Duration::from_millis(delay_ms),
            Self::Exponential { initial_ms, max_ms } => {
                let factor = 1u64.checked_shl(retry.saturating_sub(1)).unwrap_or(u64::MAX);
                Duration::from_millis(initial_ms.saturating_mul(factor).min(max_ms))
            }
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        match *self {
            Self::Exponential { initial_ms, max_ms } if initial_ms > max_ms => {
                Err(ConfigError::InvalidBackoff(format!(
                    "initial_ms {} exceeds max_ms {}",
                    initial_ms, max_ms
                )))
            }
            _ => Ok(()),
        }
    }
}

/// How the image is cut into frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Bytes per chunk (1..=8)
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Treatment of the final short chunk
    #[serde(default)]
    pub padding: PaddingPolicy,
    /// Treatment of chunks equal to the reserved sentinel
    #[serde(default)]
    pub sentinel: SentinelPolicy,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            padding: PaddingPolicy::default(),
            sentinel: SentinelPolicy::default(),
        }
    }
}

fn default_chunk_size() -> usize {
    MAX_PAYLOAD
}

/// Treatment of a final chunk shorter than `chunk_size`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaddingPolicy {
    /// Send only the remaining bytes
    #[default]
    ShortFrame,
    /// Fill the frame up to `chunk_size` with the given byte
    Fill(u8),
}
