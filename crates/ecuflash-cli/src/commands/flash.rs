//! Flash command - write an image to the ECU

use anyhow::{Context, Result};
use ecuflash_core::{transport, FlashConfig, FlashError, FlashSession};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::sync::Arc;

use super::read_image;
use crate::output::OutputContext;

/// Flash an image file to the configured ECU
pub async fn flash(
    config: FlashConfig,
    file_path: &Path,
    report_path: Option<&Path>,
    ctx: &OutputContext,
) -> Result<()> {
    ctx.info(&format!("Reading image from {}...", file_path.display()));
    let image = read_image(file_path)?;
    ctx.info(&format!("Image size: {} bytes", image.len()));

    let bus = transport::open(&config.transport)
        .await
        .map_err(FlashError::Connect)?;

    let mut session = FlashSession::new(Arc::clone(&bus), config.ecu, config.session)?;

    // Ctrl+C stops the transfer before the next chunk
    let cancel = session.cancel_handle();
    ctrlc::set_handler(move || cancel.cancel()).context("Failed to install Ctrl+C handler")?;

    let pb = if ctx.quiet {
        ProgressBar::hidden()
    } else {
        ProgressBar::new(0)
    };
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} chunks {msg}")?
            .progress_chars("=>-"),
    );

    let mut progress = session.progress();
    let bar = pb.clone();
    let progress_task = tokio::spawn(async move {
        while progress.changed().await.is_ok() {
            let snapshot = *progress.borrow_and_update();
            bar.set_length(snapshot.total_chunks as u64);
            bar.set_position(snapshot.chunks_done as u64);
            bar.set_message(snapshot.state.to_string());
        }
    });

    let result = session.begin(&image).await;
    drop(session);
    let _ = progress_task.await;

    if let Err(e) = bus.close().await {
        tracing::warn!(error = %e, "Failed to close CAN transport");
    }

    let report = match &result {
        Ok(report) => report,
        Err(failure) => &failure.report,
    };
    if let Some(path) = report_path {
        let json = serde_json::to_string_pretty(report)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write report: {}", path.display()))?;
    }

    match result {
        Ok(report) if report.is_success() => {
            pb.finish_with_message("Complete!");
            ctx.print_report(&report);
            ctx.success("\nFlash completed successfully");
            Ok(())
        }
        Ok(report) => {
            pb.abandon_with_message("Finished with errors");
            ctx.print_report(&report);
            anyhow::bail!(
                "Flash finished with {} unacknowledged chunk(s)",
                report.failed
            )
        }
        Err(failure) => {
            pb.abandon_with_message("Failed!");
            ctx.print_report(&failure.report);
            Err(failure.into())
        }
    }
}
