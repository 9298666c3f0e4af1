//! Flash session state machine

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::{CancelHandle, Command, FlashProgress, SessionState};
use crate::chunker::{Chunk, ImageChunker};
use crate::codec::{self, CanFrame, EcuResponse, Rejection};
use crate::config::{EcuConfig, SessionConfig};
use crate::error::{FlashError, FlashFailure};
use crate::report::{ChunkOutcome, ChunkResult, TransferReport};
use crate::transport::BusHandle;

/// Answer to one request frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reply {
    Ack,
    Rejected(Rejection),
    Timeout,
}

/// One flash operation against one ECU
///
/// A session runs at most once: after [`begin`](Self::begin) returns it is
/// either `Closed` or `Failed`, and further calls fail with
/// [`FlashError::SessionNotIdle`].
pub struct FlashSession {
    bus: Arc<BusHandle>,
    ecu: EcuConfig,
    config: SessionConfig,
    state: SessionState,
    report: TransferReport,
    cancel: CancelHandle,
    progress: watch::Sender<FlashProgress>,
    last_frame_at: Option<Instant>,
}

impl FlashSession {
    pub fn new(
        bus: Arc<BusHandle>,
        ecu: EcuConfig,
        config: SessionConfig,
    ) -> Result<Self, FlashError> {
        ecu.validate()?;
        config.validate()?;

        let (progress, _) = watch::channel(FlashProgress::default());
        Ok(Self {
            bus,
            ecu,
            config,
            state: SessionState::Idle,
            report: TransferReport::new(0, 0),
            cancel: CancelHandle::default(),
            progress,
            last_frame_at: None,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Report of the current or last run
    pub fn report(&self) -> &TransferReport {
        &self.report
    }

    /// Handle that cancels this session from another task
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Subscribe to progress snapshots
    pub fn progress(&self) -> watch::Receiver<FlashProgress> {
        self.progress.subscribe()
    }

    /// Flash `image` to the ECU
    ///
    /// Holds the bus lease for the whole run. On failure the returned
    /// [`FlashFailure`] carries the state the session was in and the partial
    /// report.
    pub async fn begin(&mut self, image: &[u8]) -> Result<TransferReport, FlashFailure> {
        if self.state != SessionState::Idle {
            return Err(FlashFailure {
                error: FlashError::SessionNotIdle(self.state),
                state: self.state,
                report: self.report.clone(),
            });
        }

        let started = Instant::now();
        let chunker = ImageChunker::new(image, &self.config.chunking)
            .map_err(|e| self.fail(e.into(), started))?;

        self.report = TransferReport::new(chunker.image_len(), chunker.len());
        self.progress.send_replace(FlashProgress {
            total_chunks: chunker.len(),
            ..FlashProgress::default()
        });

        let bus = Arc::clone(&self.bus);
        let Some(_lease) = bus.try_lease() else {
            return Err(self.fail(FlashError::SessionAlreadyActive, started));
        };

        info!(
            session_id = %self.report.session_id,
            image_len = chunker.image_len(),
            chunks = chunker.len(),
            request_id = format!("0x{:03X}", self.ecu.request_id),
            "Starting flash session"
        );

        match self.run(&chunker).await {
            Ok(()) => {
                self.report.finish(self.state, started.elapsed());
                info!(
                    session_id = %self.report.session_id,
                    "Flash session complete: {}",
                    self.report.summary()
                );
                Ok(self.report.clone())
            }
            Err(error) => Err(self.fail(error, started)),
        }
    }

    async fn run(&mut self, chunker: &ImageChunker<'_>) -> Result<(), FlashError> {
        self.transition(SessionState::Unlocking);
        self.exchange_command(Command::Unlock).await?;

        self.transition(SessionState::ModeRequested);
        self.exchange_command(Command::FlashModeRequest).await?;

        self.transition(SessionState::Transferring);
        for chunk in chunker {
            self.check_cancelled(chunk.sequence_index)?;
            self.transfer_chunk(&chunk).await?;
        }

        self.transition(SessionState::Finalizing);
        info!(
            succeeded = self.report.succeeded,
            failed = self.report.failed,
            retries = self.report.retries,
            "Data transfer finished"
        );

        self.transition(SessionState::Resetting);
        let reset = codec::encode(self.ecu.request_id, &self.ecu.commands.reset)?;
        self.send_frame(&reset).await?;
        debug!("Reset sent, not waiting for acknowledgement");

        self.transition(SessionState::Closed);
        Ok(())
    }

    /// Send unlock or flash mode request and wait for the answer
    async fn exchange_command(&mut self, command: Command) -> Result<(), FlashError> {
        let (payload, required) = match command {
            Command::Unlock => (&self.ecu.commands.unlock, self.config.require_unlock_ack),
            Command::FlashModeRequest => (
                &self.ecu.commands.flash_mode_request,
                self.config.require_mode_ack,
            ),
            Command::Reset => (&self.ecu.commands.reset, false),
        };
        let frame = codec::encode(self.ecu.request_id, payload)?;

        let max_attempts = if required {
            self.config.max_retries + 1
        } else {
            1
        };

        for attempt in 1..=max_attempts {
            // Command retries follow the timeout directly; backoff is for chunks
            if attempt > 1 {
                self.check_cancelled(0)?;
            }

            self.send_frame(&frame).await?;
            match self.await_reply(self.config.command_timeout()).await? {
                Reply::Ack => {
                    debug!(%command, attempt, "Command acknowledged");
                    return Ok(());
                }
                Reply::Rejected(reason) => {
                    return Err(FlashError::CommandRejected { command, reason });
                }
                Reply::Timeout => {
                    warn!(%command, attempt, max_attempts, "No response to command");
                }
            }
        }

        match command {
            _ if !required => {
                warn!(%command, "Command not acknowledged, continuing");
                Ok(())
            }
            Command::Unlock => Err(FlashError::UnlockTimeout {
                attempts: max_attempts,
            }),
            _ => Err(FlashError::ModeRequestTimeout {
                attempts: max_attempts,
            }),
        }
    }

    /// Transmit one chunk, retrying on silence
    async fn transfer_chunk(&mut self, chunk: &Chunk<'_>) -> Result<(), FlashError> {
        let index = chunk.sequence_index;
        let Some(payload) = chunk.payload() else {
            debug!(index, "Skipping sentinel chunk");
            self.record(chunk, 0, ChunkResult::Skipped);
            return Ok(());
        };
        if chunk.sentinel.is_some() {
            debug!(index, "Sentinel chunk substituted");
        }

        let frame = codec::encode(self.ecu.request_id, payload)?;
        let max_attempts = self.config.max_retries + 1;
        let mut attempts = 0;

        loop {
            attempts += 1;
            self.send_frame(&frame).await?;

            match self.await_reply(self.config.per_chunk_timeout()).await? {
                Reply::Ack => {
                    self.record(chunk, attempts, ChunkResult::Acked);
                    return Ok(());
                }
                Reply::Rejected(reason) => {
                    self.record(chunk, attempts, ChunkResult::Rejected);
                    return Err(FlashError::ChunkRejected(index, reason));
                }
                Reply::Timeout if attempts < max_attempts => {
                    warn!(index, attempt = attempts, "Chunk not acknowledged, retrying");
                    self.check_cancelled(index)?;
                    tokio::time::sleep(self.config.backoff.delay_for(attempts)).await;
                }
                Reply::Timeout => {
                    self.record(chunk, attempts, ChunkResult::TimedOut);
                    if self.config.tolerate_chunk_timeouts {
                        warn!(index, attempts, "Chunk timed out, continuing");
                        return Ok(());
                    }
                    return Err(FlashError::ChunkTransferFailed(index));
                }
            }
        }
    }

    /// Wait for a reply from the ECU
    ///
    /// Frames outside the response id range are ignored. A "response pending"
    /// answer restarts the window, bounded by the response pending timeout.
    async fn await_reply(&self, timeout: Duration) -> Result<Reply, FlashError> {
        let start = Instant::now();
        let pending_limit = start + self.config.response_pending_timeout().max(timeout);
        let mut deadline = start + timeout;

        loop {
            let now = Instant::now();
            if now >= deadline {
                return Ok(Reply::Timeout);
            }

            let frame = match self
                .bus
                .transport()
                .receive(deadline - now)
                .await
                .map_err(FlashError::Receive)?
            {
                Some(frame) => frame,
                None => continue,
            };

            if !self.ecu.response_ids.contains(frame.id()) {
                warn!(
                    id = format!("0x{:03X}", frame.id()),
                    expected = %self.ecu.response_ids,
                    "Ignoring frame outside response id range"
                );
                continue;
            }

            debug!(
                id = format!("0x{:03X}", frame.id()),
                data = %hex::encode_upper(frame.data()),
                "RX"
            );

            match EcuResponse::classify(frame.data(), self.ecu.negative_response_sid) {
                EcuResponse::Positive => return Ok(Reply::Ack),
                EcuResponse::Negative { service_id, nrc } => {
                    return Ok(Reply::Rejected(Rejection { service_id, nrc }));
                }
                EcuResponse::Pending { service_id } => {
                    deadline = (Instant::now() + timeout).min(pending_limit).max(deadline);
                    debug!(
                        service_id = format!("0x{:02X}", service_id),
                        "Response pending, extending wait"
                    );
                }
            }
        }
    }

    /// Send a frame, keeping at least the pacing interval after the previous one
    async fn send_frame(&mut self, frame: &CanFrame) -> Result<(), FlashError> {
        if let Some(last) = self.last_frame_at {
            tokio::time::sleep_until(last + self.config.frame_pacing()).await;
        }
        self.drain_stale().await?;

        debug!(
            id = format!("0x{:03X}", frame.id()),
            data = %hex::encode_upper(frame.data()),
            "TX"
        );
        let result = self.bus.transport().send(frame).await;
        self.last_frame_at = Some(Instant::now());
        result.map_err(FlashError::Send)
    }

    /// Discard frames still queued from earlier requests
    ///
    /// Duplicate acknowledgements and answers that arrive after their window
    /// closed must not be taken as the reply to the next request.
    async fn drain_stale(&self) -> Result<(), FlashError> {
        while let Some(frame) = self
            .bus
            .transport()
            .receive(Duration::ZERO)
            .await
            .map_err(FlashError::Receive)?
        {
            debug!(
                id = format!("0x{:03X}", frame.id()),
                data = %hex::encode_upper(frame.data()),
                "Dropped stale frame"
            );
        }
        Ok(())
    }

    fn check_cancelled(&self, next_chunk: usize) -> Result<(), FlashError> {
        if self.cancel.is_cancelled() {
            info!(next_chunk, "Flash session cancelled");
            return Err(FlashError::Cancelled { next_chunk });
        }
        Ok(())
    }

    fn record(&mut self, chunk: &Chunk<'_>, attempts: u32, result: ChunkResult) {
        let outcome = ChunkOutcome::new(chunk, attempts, result);
        let data_len = outcome.data_len;
        self.report.record(outcome);
        self.progress.send_modify(|p| {
            p.chunks_done += 1;
            p.bytes_done += data_len;
        });
    }

    fn transition(&mut self, next: SessionState) {
        info!(from = %self.state, to = %next, "Session state transition");
        self.state = next;
        self.progress.send_modify(|p| p.state = next);
    }

    fn fail(&mut self, error: FlashError, started: Instant) -> FlashFailure {
        let state = self.state;
        error!(state = %state, error = %error, "Flash session failed");

        self.state = SessionState::Failed;
        self.progress.send_modify(|p| p.state = SessionState::Failed);
        self.report.finish(SessionState::Failed, started.elapsed());

        FlashFailure {
            error,
            state,
            report: self.report.clone(),
        }
    }
}
