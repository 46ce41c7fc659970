//! Tests for the protocol client's retry policy and bus timing over the mock port.

use heatmiser_rs::config::BusConfig;
use heatmiser_rs::error::{FrameError, HeatmiserError, ProtocolError, TransportError};
use heatmiser_rs::hmbus::frame::{Protocol, ReplyFrame};
use heatmiser_rs::{MockSerialPort, ProtocolClient, Transport};
use std::time::Duration;
use tokio::time::Instant;
use tokio_test::{assert_err, assert_ok};

fn client(mock: &MockSerialPort) -> ProtocolClient<MockSerialPort> {
    ProtocolClient::new(Transport::new(mock.clone(), BusConfig::default()))
}

/// Tests that a corrupted reply is retried and the retry succeeds.
#[tokio::test(start_paused = true)]
async fn test_corrupt_reply_retried() {
    let mock = MockSerialPort::new();
    let mut c = client(&mock);
    let mut bad = ReplyFrame::read_reply(4, 18, vec![20]).encode();
    bad[9] ^= 0x40;
    mock.queue_reply(bad);
    mock.queue_frame(&ReplyFrame::read_reply(4, 18, vec![20]));

    let data = assert_ok!(c.read(4, Protocol::V3, 18, 1).await);
    assert_eq!(data, vec![20]);
    assert_eq!(mock.sent_frames().len(), 2);
}

/// Tests that a write with no acknowledgement gives up after three attempts.
#[tokio::test(start_paused = true)]
async fn test_write_gives_up() {
    let mock = MockSerialPort::new();
    let mut c = client(&mock);
    for _ in 0..3 {
        mock.queue_silence();
    }

    let err = assert_err!(c.write(4, Protocol::V3, 21, &[1]).await);
    match err {
        HeatmiserError::Protocol(ProtocolError::Failed { attempts, last_cause }) => {
            assert_eq!(attempts, 3);
            assert!(matches!(*last_cause, HeatmiserError::Transport(TransportError::NoResponse)));
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(mock.sent_frames().len(), 3);
}

/// Tests that a reply from the wrong thermostat counts as a failed attempt.
#[tokio::test(start_paused = true)]
async fn test_wrong_source_retried() {
    let mock = MockSerialPort::new();
    let mut c = client(&mock);
    for _ in 0..3 {
        mock.queue_frame(&ReplyFrame::write_ack(5));
    }

    let err = c.write(4, Protocol::V3, 21, &[1]).await.unwrap_err();
    match err {
        HeatmiserError::Protocol(ProtocolError::Failed { last_cause, .. }) => assert!(matches!(
            *last_cause,
            HeatmiserError::Frame(FrameError::Mismatch { field: "source", .. })
        )),
        other => panic!("unexpected {other:?}"),
    }
}

/// Tests that a request waits for the bus to settle after a reply.
#[tokio::test(start_paused = true)]
async fn test_settle_time_between_transactions() {
    let mock = MockSerialPort::new();
    let mut c = client(&mock);
    mock.queue_frame(&ReplyFrame::write_ack(4));
    mock.queue_frame(&ReplyFrame::write_ack(4));

    c.write(4, Protocol::V3, 21, &[1]).await.unwrap();
    let after_first = Instant::now();
    c.write(4, Protocol::V3, 21, &[0]).await.unwrap();
    assert!(Instant::now() - after_first >= Duration::from_millis(100));
}

/// Tests that a broadcast holds off the next request for the broadcast idle time.
#[tokio::test(start_paused = true)]
async fn test_broadcast_idle_time() {
    let mock = MockSerialPort::new();
    let mut c = client(&mock);
    // the broadcast itself gets no reply
    mock.queue_silence();
    mock.queue_frame(&ReplyFrame::write_ack(4));

    let start = Instant::now();
    c.write(0xFF, Protocol::V3, 22, &[1]).await.unwrap();
    c.write(4, Protocol::V3, 22, &[0]).await.unwrap();
    assert!(Instant::now() - start >= Duration::from_millis(1000));
    assert_eq!(mock.sent_frames().len(), 2);
}
