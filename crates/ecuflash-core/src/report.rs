//! Transfer report
//!
//! Per-chunk outcomes and aggregate counters for one flash session. The report
//! is the structured result of a run; logging is separate.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use uuid::Uuid;

use crate::chunker::Chunk;
use crate::codec::SentinelAction;
use crate::session::SessionState;

/// Final result of one chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkResult {
    Acked,
    TimedOut,
    Rejected,
    /// Not transmitted because of [`SentinelPolicy::Skip`](crate::codec::SentinelPolicy::Skip)
    Skipped,
}

impl ChunkResult {
    /// Whether this result counts toward a successful transfer
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Acked | Self::Skipped)
    }
}

/// Outcome of one chunk, including all of its retries
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkOutcome {
    pub sequence_index: usize,
    /// Every attempt, the first one included. Zero for skipped chunks.
    pub attempts: u32,
    pub result: ChunkResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sentinel: Option<SentinelAction>,
    /// Image bytes carried by the chunk
    pub data_len: usize,
}

impl ChunkOutcome {
    pub fn new(chunk: &Chunk<'_>, attempts: u32, result: ChunkResult) -> Self {
        Self {
            sequence_index: chunk.sequence_index,
            attempts,
            result,
            sentinel: chunk.sentinel,
            data_len: chunk.data_len(),
        }
    }
}

/// Aggregated result of a flash session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferReport {
    pub session_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub image_len: usize,
    pub total_chunks: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Attempts beyond the first, summed over all chunks
    pub retries: u32,
    /// Image bytes in acknowledged chunks
    pub bytes_sent: usize,
    pub substituted: usize,
    pub skipped: usize,
    #[serde(rename = "elapsed_ms", serialize_with = "serialize_millis")]
    pub elapsed: Duration,
    pub final_state: SessionState,
    pub outcomes: Vec<ChunkOutcome>,
}

fn serialize_millis<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(value.as_millis() as u64)
}

impl TransferReport {
    pub fn new(image_len: usize, total_chunks: usize) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            started_at: Utc::now(),
            image_len,
            total_chunks,
            succeeded: 0,
            failed: 0,
            retries: 0,
            bytes_sent: 0,
            substituted: 0,
            skipped: 0,
            elapsed: Duration::ZERO,
            final_state: SessionState::Idle,
            outcomes: Vec::with_capacity(total_chunks),
        }
    }

    /// Append the outcome of the next chunk
    pub fn record(&mut self, outcome: ChunkOutcome) {
        self.retries += outcome.attempts.saturating_sub(1);
        if outcome.sentinel == Some(SentinelAction::Substituted) {
            self.substituted += 1;
        }
        match outcome.result {
            ChunkResult::Acked => {
                self.succeeded += 1;
                self.bytes_sent += outcome.data_len;
            }
            ChunkResult::Skipped => {
                self.succeeded += 1;
                self.skipped += 1;
            }
            ChunkResult::TimedOut | ChunkResult::Rejected => self.failed += 1,
        }
        self.outcomes.push(outcome);
    }

    pub(crate) fn finish(&mut self, state: SessionState, elapsed: Duration) {
        self.final_state = state;
        self.elapsed = elapsed;
    }

    /// True iff the session closed and every chunk was acknowledged or skipped
    pub fn is_success(&self) -> bool {
        self.final_state == SessionState::Closed
            && self.outcomes.len() == self.total_chunks
            && self.outcomes.iter().all(|o| o.result.is_ok())
    }

    /// Outcome of the chunk at `index`, if it was reached
    pub fn outcome(&self, index: usize) -> Option<&ChunkOutcome> {
        self.outcomes.iter().find(|o| o.sequence_index == index)
    }

    /// One-line human readable summary
    pub fn summary(&self) -> String {
        format!(
            "{}: {}/{} chunks ok, {} failed, {} retries, {} of {} bytes sent, {} substituted, {} skipped in {:.2?}",
            self.final_state,
            self.succeeded,
            self.total_chunks,
            self.failed,
            self.retries,
            self.bytes_sent,
            self.image_len,
            self.substituted,
            self.skipped,
            self.elapsed
        )
    }
}
