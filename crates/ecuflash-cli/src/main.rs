//! ecuflash - flash calibration images to an ECU over CAN
//!
//! Thin driver around `ecuflash-core`: loads configuration and the image,
//! shows progress and prints the transfer report.

mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use ecuflash_core::codec::SentinelPolicy;
use ecuflash_core::config::ChunkingConfig;
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::Overrides;
use crate::output::{OutputContext, OutputFormat};

#[derive(Parser)]
#[command(name = "ecuflash")]
#[command(author, version, about = "CAN ECU flash tool")]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path (default: <config dir>/ecuflash/config.toml)
    #[arg(short, long, env = "ECUFLASH_CONFIG")]
    config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    output: OutputFormat,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,

    /// Minimal output (for scripting)
    #[arg(short, long)]
    quiet: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Sentinel policy as accepted on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SentinelArg {
    /// Send the substitute pattern instead
    Substitute,
    /// Do not transmit the chunk
    Skip,
    /// Send the chunk unchanged
    Passthrough,
}

impl From<SentinelArg> for SentinelPolicy {
    fn from(arg: SentinelArg) -> Self {
        match arg {
            SentinelArg::Substitute => Self::Substitute,
            SentinelArg::Skip => Self::Skip,
            SentinelArg::Passthrough => Self::Passthrough,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Flash an image to the ECU
    Flash {
        /// Raw binary image
        file: PathBuf,

        /// SocketCAN interface (overrides the configured transport)
        #[arg(short, long, conflicts_with = "mock")]
        interface: Option<String>,

        /// Use the mock transport (dry run)
        #[arg(long)]
        mock: bool,

        /// Minimum interval between frames in milliseconds
        #[arg(long)]
        pacing_ms: Option<u64>,

        /// Retries per frame after the first attempt
        #[arg(long)]
        max_retries: Option<u32>,

        /// Fail if the unlock command is never acknowledged
        #[arg(long)]
        require_unlock_ack: bool,

        /// Fail if the flash mode request is never acknowledged
        #[arg(long)]
        require_mode_ack: bool,

        /// Write the JSON transfer report to this file
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Show how an image will be chunked, without touching the bus
    Inspect {
        /// Raw binary image
        file: PathBuf,

        /// Number of chunks to show
        #[arg(short = 'n', long, default_value = "10")]
        count: usize,

        /// How all-0xFF chunks are transmitted
        #[arg(long, value_enum)]
        sentinel: Option<SentinelArg>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();

    let ctx = OutputContext::new(cli.output, cli.no_color, cli.quiet);
    let file_config = config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Flash {
            file,
            interface,
            mock,
            pacing_ms,
            max_retries,
            require_unlock_ack,
            require_mode_ack,
            report,
        } => {
            let overrides = Overrides {
                interface,
                mock,
                pacing_ms,
                max_retries,
                require_unlock_ack,
                require_mode_ack,
            };
            let config = config::resolve(file_config, &overrides)?;
            commands::flash(config, &file, report.as_deref(), &ctx).await?;
        }

        Commands::Inspect {
            file,
            count,
            sentinel,
        } => {
            let mut chunking = file_config
                .map(|c| c.session.chunking)
                .unwrap_or_else(ChunkingConfig::default);
            if let Some(sentinel) = sentinel {
                chunking.sentinel = sentinel.into();
            }
            commands::inspect(&file, &chunking, count, &ctx)?;
        }
    }

    Ok(())
}
