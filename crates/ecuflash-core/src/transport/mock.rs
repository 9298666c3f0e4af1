//! Mock CAN transport for testing and dry runs
//!
//! Every sent frame consumes one scripted [`MockReply`]; once the script is
//! exhausted the default reply applies. Replies are queued and handed out by
//! `receive`, so the simulated ECU answers strictly in request order. Frames
//! injected from another task wake a pending `receive` immediately.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

use super::{CanTransport, TransportError};
use crate::codec::{self, CanFrame, DEFAULT_NEGATIVE_RESPONSE_SID};
use crate::config::MockConfig;

/// How the simulated ECU reacts to one sent frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockReply {
    /// Positive response (request SID + 0x40)
    Ack,
    /// No response at all
    Silent,
    /// Negative response with the given NRC
    Reject(u8),
    /// "Response pending" (NRC 0x78) followed by a positive response
    PendingThenAck,
    /// Deliver these frames verbatim
    Frames(Vec<CanFrame>),
    /// Fail the send itself
    FailSend,
}

/// Mock transport adapter for testing
pub struct MockTransport {
    config: MockConfig,
    open: AtomicBool,
    default_reply: Mutex<MockReply>,
    script: Mutex<VecDeque<MockReply>>,
    inbox: Mutex<VecDeque<CanFrame>>,
    arrived: Notify,
    sent: Mutex<Vec<CanFrame>>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new(&MockConfig::default())
    }
}

impl MockTransport {
    /// Mock that acknowledges every frame
    pub fn new(config: &MockConfig) -> Self {
        Self {
            config: config.clone(),
            open: AtomicBool::new(true),
            default_reply: Mutex::new(MockReply::Ack),
            script: Mutex::new(VecDeque::new()),
            inbox: Mutex::new(VecDeque::new()),
            arrived: Notify::new(),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Mock that never answers
    pub fn silent() -> Self {
        let mock = Self::default();
        mock.set_default_reply(MockReply::Silent);
        mock
    }

    /// Reply used once the script is exhausted
    pub fn set_default_reply(&self, reply: MockReply) {
        *self.default_reply.lock() = reply;
    }

    /// Append replies for the next sent frames, in order
    pub fn push_replies(&self, replies: impl IntoIterator<Item = MockReply>) {
        self.script.lock().extend(replies);
    }

    /// Queue an unsolicited frame for the next `receive`
    pub fn inject(&self, frame: CanFrame) {
        self.inbox.lock().push_back(frame);
        self.arrived.notify_one();
    }

    /// All frames sent so far
    pub fn sent_frames(&self) -> Vec<CanFrame> {
        self.sent.lock().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().len()
    }

    fn next_reply(&self) -> MockReply {
        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.default_reply.lock().clone())
    }

    fn reply_frame(&self, payload: &[u8]) -> Result<CanFrame, TransportError> {
        codec::encode(self.config.response_id, payload)
            .map_err(|e| TransportError::InvalidConfig(format!("Mock response frame: {}", e)))
    }

    fn queue_reply(&self, request: &CanFrame, reply: MockReply) -> Result<(), TransportError> {
        let sid = request.data().first().copied().unwrap_or(0);
        let frames = match reply {
            MockReply::Ack => vec![self.reply_frame(&[sid.wrapping_add(0x40)])?],
            MockReply::Silent | MockReply::FailSend => vec![],
            MockReply::Reject(nrc) => {
                vec![self.reply_frame(&[DEFAULT_NEGATIVE_RESPONSE_SID, sid, nrc])?]
            }
            MockReply::PendingThenAck => vec![
                self.reply_frame(&[DEFAULT_NEGATIVE_RESPONSE_SID, sid, 0x78])?,
                self.reply_frame(&[sid.wrapping_add(0x40)])?,
            ],
            MockReply::Frames(frames) => frames,
        };
        if !frames.is_empty() {
            self.inbox.lock().extend(frames);
            self.arrived.notify_one();
        }
        Ok(())
    }
}

#[async_trait]
impl CanTransport for MockTransport {
    async fn send(&self, frame: &CanFrame) -> Result<(), TransportError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed);
        }

        // Simulate latency
        if self.config.latency_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.latency_ms)).await;
        }

        let reply = self.next_reply();
        if reply == MockReply::FailSend {
            return Err(TransportError::SendFailed("Mock send failure".to_string()));
        }

        self.sent.lock().push(*frame);
        tracing::debug!(%frame, "Mock transport: sent frame");
        self.queue_reply(frame, reply)
    }

    async fn receive(&self, timeout: Duration) -> Result<Option<CanFrame>, TransportError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed);
        }

        let deadline = Instant::now() + timeout;
        loop {
            let queued = self.inbox.lock().pop_front();
            if queued.is_some() {
                return Ok(queued);
            }
            if tokio::time::timeout_at(deadline, self.arrived.notified())
                .await
                .is_err()
            {
                return Ok(None);
            }
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}
