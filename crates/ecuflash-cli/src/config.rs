//! Configuration file handling for ecuflash

use anyhow::{Context, Result};
use ecuflash_core::config::{SocketCanConfig, TransportConfig};
use ecuflash_core::FlashConfig;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Command line values that take precedence over the config file
#[derive(Debug, Default)]
pub struct Overrides {
    pub interface: Option<String>,
    pub mock: bool,
    pub pacing_ms: Option<u64>,
    pub max_retries: Option<u32>,
    pub require_unlock_ack: bool,
    pub require_mode_ack: bool,
}

/// Get the default config file path
pub fn config_path() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .context("Could not determine config directory")?
        .join("ecuflash");

    Ok(config_dir.join("config.toml"))
}

/// Load the config from `path`, or from the default location if it exists
pub fn load(path: Option<&Path>) -> Result<Option<FlashConfig>> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => {
            let default = config_path()?;
            if !default.exists() {
                return Ok(None);
            }
            default
        }
    };

    let config = FlashConfig::load(&path)
        .with_context(|| format!("Failed to load config file: {}", path.display()))?;
    tracing::debug!(path = %path.display(), "Loaded config");
    Ok(Some(config))
}

/// Merge CLI arguments over config file values
///
/// Without a config file the frame pacing has to come from the command line.
pub fn resolve(config: Option<FlashConfig>, overrides: &Overrides) -> Result<FlashConfig> {
    let mut config = match (config, overrides.pacing_ms) {
        (Some(config), _) => config,
        (None, Some(pacing_ms)) => FlashConfig {
            transport: TransportConfig::default(),
            ecu: Default::default(),
            session: ecuflash_core::SessionConfig::new(Duration::from_millis(pacing_ms)),
        },
        (None, None) => anyhow::bail!(
            "Frame pacing is required: set session.frame_pacing_ms in a config file or pass --pacing-ms"
        ),
    };

    if let Some(interface) = &overrides.interface {
        config.transport = TransportConfig::SocketCan(SocketCanConfig {
            interface: interface.clone(),
        });
    }
    if overrides.mock {
        config.transport = TransportConfig::default();
    }
    if let Some(pacing_ms) = overrides.pacing_ms {
        config.session.frame_pacing_ms = pacing_ms;
    }
    if let Some(max_retries) = overrides.max_retries {
        config.session.max_retries = max_retries;
    }
    config.session.require_unlock_ack |= overrides.require_unlock_ack;
    config.session.require_mode_ack |= overrides.require_mode_ack;

    config.validate().context("Invalid configuration")?;
    Ok(config)
}
