//! Flash session tests against the mock transport
//!
//! Each test scripts the simulated ECU's replies in send order:
//! unlock, flash mode request, one entry per chunk attempt, reset.
//!
//! Run with: cargo test -p ecuflash-core --test session_test

use std::sync::Arc;
use std::time::{Duration, Instant};

use ecuflash_core::codec::{self, SENTINEL_PAYLOAD, SUBSTITUTE_PAYLOAD};
use ecuflash_core::config::RetryBackoff;
use ecuflash_core::{
    BusHandle, ChunkResult, EcuConfig, FlashError, FlashSession, MockReply, MockTransport,
    NegativeResponseCode, SentinelAction, SentinelPolicy, SessionConfig, SessionState,
};
use pretty_assertions::assert_eq;

const TIMEOUT_MS: u64 = 20;

/// Mock ECU plus the bus handle wrapping it
struct Harness {
    mock: Arc<MockTransport>,
    bus: Arc<BusHandle>,
}

impl Harness {
    fn new() -> Self {
        let mock = Arc::new(MockTransport::default());
        let bus = Arc::new(BusHandle::new(Arc::clone(&mock)));
        Self { mock, bus }
    }

    fn session(&self, config: SessionConfig) -> FlashSession {
        FlashSession::new(Arc::clone(&self.bus), EcuConfig::default(), config)
            .expect("valid session config")
    }

    fn sent_payloads(&self) -> Vec<Vec<u8>> {
        self.mock
            .sent_frames()
            .iter()
            .map(|f| f.data().to_vec())
            .collect()
    }
}

/// Short timeouts, no pacing, no backoff delay
fn fast_config() -> SessionConfig {
    let mut config = SessionConfig::new(Duration::ZERO);
    config.command_timeout_ms = TIMEOUT_MS;
    config.per_chunk_timeout_ms = TIMEOUT_MS;
    config.backoff = RetryBackoff::Fixed { delay_ms: 0 };
    config
}

fn image(len: usize) -> Vec<u8> {
    (0..len).map(|i| i as u8).collect()
}

#[tokio::test]
async fn test_always_ack_flashes_25_byte_image() {
    let harness = Harness::new();
    let mut session = harness.session(fast_config());

    let report = session.begin(&image(25)).await.unwrap();

    assert_eq!(session.state(), SessionState::Closed);
    assert_eq!(report.final_state, SessionState::Closed);
    assert_eq!(report.total_chunks, 4);
    assert_eq!(report.succeeded, 4);
    assert_eq!(report.bytes_sent, 25);
    assert!(report.is_success());
    assert!(report
        .outcomes
        .iter()
        .all(|o| o.result == ChunkResult::Acked && o.attempts == 1));

    let sent = harness.sent_payloads();
    // unlock, mode request, 4 chunks, reset
    assert_eq!(sent.len(), 7);
    assert_eq!(sent[0], vec![0x02, 0x27, 0x01]);
    assert_eq!(sent[1], vec![0x34, 0x56, 0x78, 0x9A, 0xBC, 0xDE, 0xF0, 0x12]);
    assert_eq!(sent[2], image(25)[..8].to_vec());
    assert_eq!(sent[5], vec![24]);
    assert_eq!(sent[6], vec![0x11, 0x01]);
    assert!(harness
        .mock
        .sent_frames()
        .iter()
        .all(|f| f.id() == 0x7E0));

    // The lease is released once the session ends
    assert!(!harness.bus.is_session_active());
}

#[tokio::test]
async fn test_silent_unlock_with_required_ack_times_out() {
    let harness = Harness::new();
    harness.mock.set_default_reply(MockReply::Silent);

    let mut config = fast_config();
    config.require_unlock_ack = true;
    config.max_retries = 3;
    let mut session = harness.session(config);

    let started = Instant::now();
    let failure = session.begin(&image(16)).await.unwrap_err();
    let elapsed = started.elapsed();

    assert!(matches!(
        failure.error,
        FlashError::UnlockTimeout { attempts: 4 }
    ));
    assert_eq!(failure.state, SessionState::Unlocking);
    assert_eq!(session.state(), SessionState::Failed);
    assert_eq!(failure.report.final_state, SessionState::Failed);
    assert!(failure.report.outcomes.is_empty());
    assert_eq!(harness.mock.sent_count(), 4);

    let bound = Duration::from_millis(TIMEOUT_MS * 4) + Duration::from_millis(500);
    assert!(elapsed >= Duration::from_millis(TIMEOUT_MS * 4));
    assert!(elapsed < bound, "took {:?}", elapsed);
}

#[tokio::test]
async fn test_command_retries_ignore_chunk_backoff() {
    let harness = Harness::new();
    harness.mock.set_default_reply(MockReply::Silent);

    let mut config = fast_config();
    config.require_unlock_ack = true;
    config.max_retries = 3;
    config.backoff = RetryBackoff::Fixed { delay_ms: 200 };
    let mut session = harness.session(config);

    let started = Instant::now();
    let failure = session.begin(&image(16)).await.unwrap_err();
    let elapsed = started.elapsed();

    assert!(matches!(
        failure.error,
        FlashError::UnlockTimeout { attempts: 4 }
    ));
    // Four timeouts back to back, none of the 200ms backoff
    assert!(elapsed < Duration::from_millis(TIMEOUT_MS * 4 + 150), "took {:?}", elapsed);
}

#[tokio::test]
async fn test_silent_commands_are_tolerated_without_required_ack() {
    let harness = Harness::new();
    harness
        .mock
        .push_replies([MockReply::Silent, MockReply::Silent]);

    let mut session = harness.session(fast_config());
    let report = session.begin(&image(8)).await.unwrap();

    assert!(report.is_success());
    // One attempt each for unlock and mode request, then chunk and reset
    assert_eq!(harness.mock.sent_count(), 4);
}

#[tokio::test]
async fn test_silent_mode_request_with_required_ack_times_out() {
    let harness = Harness::new();
    harness.mock.push_replies([MockReply::Ack]);
    harness.mock.set_default_reply(MockReply::Silent);

    let mut config = fast_config();
    config.require_mode_ack = true;
    config.max_retries = 1;
    let mut session = harness.session(config);

    let failure = session.begin(&image(8)).await.unwrap_err();
    assert!(matches!(
        failure.error,
        FlashError::ModeRequestTimeout { attempts: 2 }
    ));
    assert_eq!(failure.state, SessionState::ModeRequested);
    assert_eq!(harness.mock.sent_count(), 3);
}

#[tokio::test]
async fn test_rejected_unlock_is_not_retried() {
    let harness = Harness::new();
    harness.mock.push_replies([MockReply::Reject(0x35)]);

    let mut config = fast_config();
    config.require_unlock_ack = true;
    let mut session = harness.session(config);

    let failure = session.begin(&image(8)).await.unwrap_err();
    match failure.error {
        FlashError::CommandRejected { command, reason } => {
            assert_eq!(command, ecuflash_core::Command::Unlock);
            assert_eq!(reason.service_id, 0x02);
            assert_eq!(reason.nrc, NegativeResponseCode::InvalidKey);
        }
        other => panic!("Expected CommandRejected, got {:?}", other),
    }
    assert_eq!(harness.mock.sent_count(), 1);
}

#[tokio::test]
async fn test_chunk_retried_until_acked() {
    let harness = Harness::new();
    let mut config = fast_config();
    config.max_retries = 3;

    // unlock, mode, chunk 0, chunk 1, chunk 2 silent three times, then acked
    harness.mock.push_replies([
        MockReply::Ack,
        MockReply::Ack,
        MockReply::Ack,
        MockReply::Ack,
        MockReply::Silent,
        MockReply::Silent,
        MockReply::Silent,
    ]);

    let mut session = harness.session(config);
    let report = session.begin(&image(25)).await.unwrap();

    let chunk = report.outcome(2).unwrap();
    assert_eq!(chunk.attempts, 4);
    assert_eq!(chunk.result, ChunkResult::Acked);
    assert_eq!(report.retries, 3);
    assert!(report.is_success());

    let sent = harness.sent_payloads();
    assert_eq!(sent.len(), 2 + 4 + 3 + 1);
    assert!(sent[4..8].iter().all(|p| *p == image(25)[16..24].to_vec()));
}

#[tokio::test]
async fn test_chunk_exhausting_retries_fails() {
    let harness = Harness::new();
    harness.mock.push_replies([MockReply::Ack, MockReply::Ack]);
    harness.mock.set_default_reply(MockReply::Silent);

    let mut config = fast_config();
    config.max_retries = 2;
    let mut session = harness.session(config);

    let failure = session.begin(&image(16)).await.unwrap_err();
    assert!(matches!(failure.error, FlashError::ChunkTransferFailed(0)));
    assert_eq!(failure.state, SessionState::Transferring);

    let outcome = failure.report.outcome(0).unwrap();
    assert_eq!(outcome.result, ChunkResult::TimedOut);
    assert_eq!(outcome.attempts, 3);
    // No reset after a failed transfer
    assert_eq!(harness.mock.sent_count(), 2 + 3);
}

#[tokio::test]
async fn test_rejected_chunk_stops_transfer() {
    let harness = Harness::new();
    harness.mock.push_replies([
        MockReply::Ack,
        MockReply::Ack,
        MockReply::Ack,
        MockReply::Reject(0x72),
    ]);

    let mut session = harness.session(fast_config());
    let failure = session.begin(&image(32)).await.unwrap_err();

    match &failure.error {
        FlashError::ChunkRejected(index, reason) => {
            assert_eq!(*index, 1);
            assert_eq!(reason.nrc, NegativeResponseCode::GeneralProgrammingFailure);
        }
        other => panic!("Expected ChunkRejected, got {:?}", other),
    }
    assert_eq!(failure.state, SessionState::Transferring);
    assert_eq!(failure.report.outcomes.len(), 2);
    assert_eq!(failure.report.outcome(1).unwrap().result, ChunkResult::Rejected);
    assert_eq!(failure.report.outcome(1).unwrap().attempts, 1);
    assert!(!failure.report.is_success());

    // Nothing was sent after chunk 1
    assert_eq!(harness.mock.sent_count(), 4);
}

#[tokio::test]
async fn test_duplicate_ack_not_credited_to_next_chunk() {
    let harness = Harness::new();
    let ack = codec::encode(0x7E8, &[0x40]).unwrap();
    harness.mock.push_replies([
        MockReply::Ack,
        MockReply::Ack,
        MockReply::Frames(vec![ack, ack]),
        MockReply::Reject(0x72),
    ]);

    let mut session = harness.session(fast_config());
    let failure = session.begin(&image(16)).await.unwrap_err();

    assert!(matches!(failure.error, FlashError::ChunkRejected(1, _)));
    assert_eq!(session.state(), SessionState::Failed);
    assert_eq!(failure.report.outcome(0).unwrap().result, ChunkResult::Acked);
    assert_eq!(failure.report.outcome(1).unwrap().result, ChunkResult::Rejected);
    assert!(!failure.report.is_success());
}

#[tokio::test]
async fn test_late_ack_not_credited_to_retry() {
    let harness = Harness::new();
    let mut config = fast_config();
    config.max_retries = 1;
    config.backoff = RetryBackoff::Fixed { delay_ms: 60 };

    // chunk 0 silent once then acked, chunk 1 rejected
    harness.mock.push_replies([
        MockReply::Ack,
        MockReply::Ack,
        MockReply::Silent,
        MockReply::Ack,
        MockReply::Reject(0x72),
    ]);

    // The ECU answers the first attempt after its window closed
    let late_ack = codec::encode(0x7E8, &[0x40]).unwrap();
    let mock = Arc::clone(&harness.mock);
    let injector = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(35)).await;
        mock.inject(late_ack);
    });

    let mut session = harness.session(config);
    let failure = session.begin(&image(16)).await.unwrap_err();
    injector.await.unwrap();

    assert!(matches!(failure.error, FlashError::ChunkRejected(1, _)));
    let first = failure.report.outcome(0).unwrap();
    assert_eq!(first.result, ChunkResult::Acked);
    assert_eq!(first.attempts, 2);
    assert_eq!(failure.report.outcome(1).unwrap().result, ChunkResult::Rejected);
    assert!(!failure.report.is_success());
}

#[tokio::test]
async fn test_concurrent_begin_on_same_bus() {
    let harness = Harness::new();
    let mut config = fast_config();
    config.frame_pacing_ms = 5;

    let mut first = harness.session(config.clone());
    let mut second = harness.session(config);
    let img = image(16);

    let (first_result, second_result) = tokio::join!(first.begin(&img), second.begin(&img));

    let report = first_result.unwrap();
    assert!(report.is_success());

    let failure = second_result.unwrap_err();
    assert!(matches!(failure.error, FlashError::SessionAlreadyActive));
    assert_eq!(failure.state, SessionState::Idle);
    assert_eq!(second.state(), SessionState::Failed);

    // Only the first session touched the bus
    assert_eq!(harness.mock.sent_count(), 2 + 2 + 1);
}

#[tokio::test]
async fn test_begin_twice_fails_without_touching_bus() {
    let harness = Harness::new();
    let mut session = harness.session(fast_config());

    session.begin(&image(8)).await.unwrap();
    let sent = harness.mock.sent_count();

    let failure = session.begin(&image(8)).await.unwrap_err();
    assert!(matches!(
        failure.error,
        FlashError::SessionNotIdle(SessionState::Closed)
    ));
    assert_eq!(session.state(), SessionState::Closed);
    assert_eq!(harness.mock.sent_count(), sent);
}

#[tokio::test]
async fn test_sentinel_chunk_is_substituted() {
    let harness = Harness::new();
    let mut session = harness.session(fast_config());

    let mut img = image(8);
    img.extend_from_slice(&SENTINEL_PAYLOAD);
    img.extend_from_slice(&[0xFF; 4]);

    let report = session.begin(&img).await.unwrap();
    assert!(report.is_success());
    assert_eq!(report.substituted, 1);
    assert_eq!(
        report.outcome(1).unwrap().sentinel,
        Some(SentinelAction::Substituted)
    );
    assert_eq!(report.outcome(2).unwrap().sentinel, None);

    let sent = harness.sent_payloads();
    assert_eq!(sent[3], SUBSTITUTE_PAYLOAD.to_vec());
    // A short all-0xFF tail does not match the sentinel
    assert_eq!(sent[4], vec![0xFF; 4]);
}

#[tokio::test]
async fn test_sentinel_chunk_is_skipped() {
    let harness = Harness::new();
    let mut config = fast_config();
    config.chunking.sentinel = SentinelPolicy::Skip;
    let mut session = harness.session(config);

    let mut img = image(8);
    img.extend_from_slice(&SENTINEL_PAYLOAD);
    img.extend_from_slice(&image(8));

    let report = session.begin(&img).await.unwrap();
    assert!(report.is_success());
    assert_eq!(report.skipped, 1);
    assert_eq!(report.bytes_sent, 16);

    let skipped = report.outcome(1).unwrap();
    assert_eq!(skipped.result, ChunkResult::Skipped);
    assert_eq!(skipped.attempts, 0);

    // unlock, mode, chunk 0, chunk 2, reset
    let sent = harness.sent_payloads();
    assert_eq!(sent.len(), 5);
    assert!(!sent.contains(&SENTINEL_PAYLOAD.to_vec()));
}

#[tokio::test]
async fn test_frames_outside_response_range_are_ignored() {
    let harness = Harness::new();
    let foreign = codec::encode(0x123, &[0x7F, 0x36, 0x72]).unwrap();
    harness.mock.push_replies([
        MockReply::Ack,
        MockReply::Ack,
        MockReply::Frames(vec![foreign]),
    ]);

    let mut session = harness.session(fast_config());
    let report = session.begin(&image(8)).await.unwrap();

    // The foreign rejection was ignored; the chunk timed out once and was retried
    let outcome = report.outcome(0).unwrap();
    assert_eq!(outcome.result, ChunkResult::Acked);
    assert_eq!(outcome.attempts, 2);
}

#[tokio::test]
async fn test_response_pending_extends_wait() {
    let harness = Harness::new();
    let mut config = fast_config();
    config.per_chunk_timeout_ms = 100;
    config.response_pending_timeout_ms = 1000;
    config.max_retries = 0;

    harness
        .mock
        .push_replies([MockReply::Ack, MockReply::Ack, MockReply::Silent]);

    let pending = codec::encode(0x7E8, &[0x7F, 0x36, 0x78]).unwrap();
    let ack = codec::encode(0x7E8, &[0x76]).unwrap();
    let mock = Arc::clone(&harness.mock);
    let injector = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(60)).await;
        mock.inject(pending);
        tokio::time::sleep(Duration::from_millis(70)).await;
        mock.inject(ack);
    });

    let mut session = harness.session(config);
    let report = session.begin(&image(8)).await.unwrap();
    injector.await.unwrap();

    // The ack arrived after the plain chunk timeout but within the extended window
    let outcome = report.outcome(0).unwrap();
    assert_eq!(outcome.result, ChunkResult::Acked);
    assert_eq!(outcome.attempts, 1);
}

#[tokio::test]
async fn test_response_pending_then_ack() {
    let harness = Harness::new();
    harness.mock.push_replies([
        MockReply::PendingThenAck,
        MockReply::Ack,
        MockReply::PendingThenAck,
    ]);

    let mut config = fast_config();
    config.require_unlock_ack = true;
    let mut session = harness.session(config);
    let report = session.begin(&image(8)).await.unwrap();

    assert!(report.is_success());
    assert_eq!(report.retries, 0);
    assert_eq!(harness.mock.sent_count(), 4);
}

#[tokio::test]
async fn test_cancel_before_first_chunk() {
    let harness = Harness::new();
    let mut session = harness.session(fast_config());
    session.cancel_handle().cancel();

    let failure = session.begin(&image(16)).await.unwrap_err();
    assert!(matches!(
        failure.error,
        FlashError::Cancelled { next_chunk: 0 }
    ));
    assert_eq!(failure.state, SessionState::Transferring);
    // Unlock and mode request only, no chunk and no reset
    assert_eq!(harness.mock.sent_count(), 2);
}

#[tokio::test]
async fn test_cancel_before_retry() {
    let harness = Harness::new();
    harness.mock.push_replies([MockReply::Ack, MockReply::Ack, MockReply::Ack]);
    harness.mock.set_default_reply(MockReply::Silent);

    let mut config = fast_config();
    config.per_chunk_timeout_ms = 100;
    let mut session = harness.session(config);

    let cancel = session.cancel_handle();
    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(40)).await;
        cancel.cancel();
    });

    let failure = session.begin(&image(16)).await.unwrap_err();
    canceller.await.unwrap();

    assert!(matches!(
        failure.error,
        FlashError::Cancelled { next_chunk: 1 }
    ));
    assert_eq!(failure.report.outcomes.len(), 1);
    // unlock, mode, chunk 0, first attempt of chunk 1
    assert_eq!(harness.mock.sent_count(), 4);
}

#[tokio::test]
async fn test_send_failure_fails_immediately() {
    let harness = Harness::new();
    harness
        .mock
        .push_replies([MockReply::Ack, MockReply::Ack, MockReply::FailSend]);

    let mut session = harness.session(fast_config());
    let failure = session.begin(&image(16)).await.unwrap_err();

    assert!(matches!(failure.error, FlashError::Send(_)));
    assert_eq!(failure.state, SessionState::Transferring);
    assert!(failure.report.outcomes.is_empty());
    assert_eq!(harness.mock.sent_count(), 2);
}

#[tokio::test]
async fn test_tolerated_chunk_timeout_continues() {
    let harness = Harness::new();
    harness.mock.push_replies([
        MockReply::Ack,
        MockReply::Ack,
        MockReply::Ack,
        MockReply::Silent,
        MockReply::Silent,
    ]);

    let mut config = fast_config();
    config.max_retries = 1;
    config.tolerate_chunk_timeouts = true;
    let mut session = harness.session(config);

    let report = session.begin(&image(24)).await.unwrap();
    assert_eq!(report.final_state, SessionState::Closed);
    assert_eq!(report.outcome(1).unwrap().result, ChunkResult::TimedOut);
    assert_eq!(report.outcome(2).unwrap().result, ChunkResult::Acked);
    assert_eq!(report.failed, 1);
    assert!(!report.is_success());

    // Reset is still sent
    assert_eq!(harness.sent_payloads().last(), Some(&vec![0x11, 0x01]));
}

#[tokio::test]
async fn test_frame_pacing_is_respected() {
    let harness = Harness::new();
    let mut config = fast_config();
    config.frame_pacing_ms = 15;
    let mut session = harness.session(config);

    let started = Instant::now();
    session.begin(&image(24)).await.unwrap();

    // unlock, mode, 3 chunks, reset: five gaps between six frames
    assert_eq!(harness.mock.sent_count(), 6);
    assert!(started.elapsed() >= Duration::from_millis(15 * 5));
}
