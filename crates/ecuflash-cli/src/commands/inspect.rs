//! Inspect command - preview how an image will be chunked

use anyhow::Result;
use ecuflash_core::config::ChunkingConfig;
use ecuflash_core::ImageChunker;
use std::path::Path;

use super::read_image;
use crate::output::{ChunkRow, OutputContext};

/// Print the first `count` chunks of an image without touching the bus
pub fn inspect(
    file_path: &Path,
    chunking: &ChunkingConfig,
    count: usize,
    ctx: &OutputContext,
) -> Result<()> {
    let image = read_image(file_path)?;
    let chunker = ImageChunker::new(&image, chunking)?;

    ctx.info(&format!(
        "{}: {} bytes, {} chunks of {} bytes",
        file_path.display(),
        chunker.image_len(),
        chunker.len(),
        chunker.chunk_size()
    ));

    let rows: Vec<ChunkRow> = chunker.iter().take(count).map(|c| ChunkRow::from(&c)).collect();
    ctx.print(&rows);

    let sentinels = chunker.iter().filter(|c| c.sentinel.is_some()).count();
    if sentinels > 0 {
        ctx.warn(&format!(
            "{} chunk(s) match the reserved sentinel pattern ({:?} policy)",
            sentinels, chunking.sentinel
        ));
    }

    Ok(())
}
