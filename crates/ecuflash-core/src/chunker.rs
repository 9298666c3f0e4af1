//! Image chunker
//!
//! Splits a calibration image into frame-sized chunks. Iteration is lazy and
//! borrows the image; calling [`ImageChunker::iter`] again restarts from the
//! first chunk.

use std::borrow::Cow;
use std::iter::FusedIterator;

use crate::codec::{SentinelAction, SentinelPolicy, MAX_PAYLOAD, SUBSTITUTE_PAYLOAD};
use crate::config::{ChunkingConfig, ConfigError, PaddingPolicy};

/// One frame-sized slice of the image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk<'a> {
    /// Zero-based position in the image
    pub sequence_index: usize,
    /// Last chunk of the image
    pub is_final: bool,
    /// Sentinel handling applied to this chunk, if it matched
    pub sentinel: Option<SentinelAction>,
    bytes: Cow<'a, [u8]>,
    data_len: usize,
}

impl<'a> Chunk<'a> {
    /// Raw chunk bytes, including fill bytes when padding is configured
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Image bytes carried by this chunk (padding stripped)
    pub fn data(&self) -> &[u8] {
        &self.bytes[..self.data_len]
    }

    /// Number of image bytes carried by this chunk
    pub fn data_len(&self) -> usize {
        self.data_len
    }

    /// Bytes to transmit after the sentinel policy, `None` when skipped
    pub fn payload(&self) -> Option<&[u8]> {
        match self.sentinel {
            None => Some(&self.bytes),
            Some(SentinelAction::Substituted) => Some(&SUBSTITUTE_PAYLOAD[..]),
            Some(SentinelAction::Skipped) => None,
        }
    }
}

/// Splits an image into [`Chunk`]s according to a [`ChunkingConfig`]
#[derive(Debug, Clone, Copy)]
pub struct ImageChunker<'a> {
    image: &'a [u8],
    chunk_size: usize,
    padding: PaddingPolicy,
    sentinel: SentinelPolicy,
}

impl<'a> ImageChunker<'a> {
    pub fn new(image: &'a [u8], config: &ChunkingConfig) -> Result<Self, ConfigError> {
        if config.chunk_size == 0 || config.chunk_size > MAX_PAYLOAD {
            return Err(ConfigError::InvalidChunkSize(config.chunk_size));
        }
        Ok(Self {
            image,
            chunk_size: config.chunk_size,
            padding: config.padding,
            sentinel: config.sentinel,
        })
    }

    /// Number of chunks the image splits into
    pub fn len(&self) -> usize {
        self.image.len().div_ceil(self.chunk_size)
    }

    pub fn is_empty(&self) -> bool {
        self.image.is_empty()
    }

    pub fn image_len(&self) -> usize {
        self.image.len()
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Iterate the chunks from the start of the image
    pub fn iter(&self) -> Chunks<'a> {
        Chunks {
            chunker: *self,
            next: 0,
        }
    }

    fn chunk_at(&self, index: usize) -> Chunk<'a> {
        let start = index * self.chunk_size;
        let end = (start + self.chunk_size).min(self.image.len());
        let raw = &self.image[start..end];
        let data_len = raw.len();

        let bytes = match self.padding {
            PaddingPolicy::Fill(byte) if data_len < self.chunk_size => {
                let mut padded = raw.to_vec();
                padded.resize(self.chunk_size, byte);
                Cow::Owned(padded)
            }
            _ => Cow::Borrowed(raw),
        };

        Chunk {
            sequence_index: index,
            is_final: end == self.image.len(),
            sentinel: self.sentinel.action_for(&bytes),
            bytes,
            data_len,
        }
    }
}

impl<'a, 'b> IntoIterator for &'b ImageChunker<'a> {
    type Item = Chunk<'a>;
    type IntoIter = Chunks<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over the chunks of an image
#[derive(Debug, Clone)]
pub struct Chunks<'a> {
    chunker: ImageChunker<'a>,
    next: usize,
}

impl<'a> Iterator for Chunks<'a> {
    type Item = Chunk<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.chunker.len() {
            return None;
        }
        let chunk = self.chunker.chunk_at(self.next);
        self.next += 1;
        Some(chunk)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.chunker.len().saturating_sub(self.next);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Chunks<'_> {}

impl FusedIterator for Chunks<'_> {}
