//! Transport session tests

use bytes::Bytes;
use rootstream_client::{ClientContext, ClientError, ConnectionState, TransportSession};
use rootstream_core::{
    time::now_ms, CryptoError, InputEvent, PacketType, SecuritySession, StaticAuthBackend,
    StreamPacket,
};
use rootstream_discovery::Peer;
use rootstream_test_utils::{
    preshared_session, video_packet, wait_for_state, wait_until, ConnectOutcome, MockConnector,
    MockHost, ScriptedVideoDecoder, DEFAULT_TIMEOUT,
};
use std::sync::Arc;
use std::time::Duration;

fn peer() -> Peer {
    Peer::manual("Test Host", "127.0.0.1", 9000)
}

fn context(connector: &Arc<MockConnector>) -> ClientContext {
    ClientContext::new(preshared_session()).with_connector(connector.clone())
}

fn plain_session(connector: &Arc<MockConnector>) -> TransportSession {
    TransportSession::builder()
        .encrypt(false)
        .send_auth_token(false)
        .reconnect_interval(10)
        .build(&context(connector))
}

async fn wait_state(session: &TransportSession, pred: impl Fn(&ConnectionState) -> bool) -> bool {
    let mut states = session.subscribe_state();
    wait_for_state(&mut states, pred, DEFAULT_TIMEOUT).await
}

#[tokio::test]
async fn test_connect_reaches_connected() {
    let connector = Arc::new(MockConnector::new());
    let session = plain_session(&connector);
    assert_eq!(session.state(), ConnectionState::Disconnected);

    let states = session.connect(&peer()).await.unwrap();
    assert_eq!(*states.borrow(), ConnectionState::Connected);
    assert_eq!(session.state(), ConnectionState::Connected);

    let link = connector.latest().unwrap();
    assert_eq!(link.host(), "127.0.0.1");
    assert_eq!(link.port(), 9000);
    assert_eq!(session.peer().unwrap().port, 9000);
}

#[tokio::test]
async fn test_sequence_numbers_strictly_increase() {
    let connector = Arc::new(MockConnector::new());
    let session = plain_session(&connector);
    session.connect(&peer()).await.unwrap();

    let mut last = 0;
    for i in 0..10 {
        let seq = session.send(&InputEvent::mouse_move(i, -i)).await.unwrap();
        assert!(seq > last, "sequence {} after {}", seq, last);
        last = seq;
    }

    let sent = connector.latest().unwrap().sent_packets();
    assert_eq!(sent.len(), 10);
    assert!(sent.windows(2).all(|w| w[0].sequence() < w[1].sequence()));
    assert!(sent.iter().all(|p| p.packet_type() == PacketType::InputEvent));
}

#[tokio::test]
async fn test_send_requires_connection() {
    let connector = Arc::new(MockConnector::new());
    let session = plain_session(&connector);

    let err = session.send(&InputEvent::key(1, true)).await.unwrap_err();
    assert!(matches!(err, ClientError::NotConnected));
}

#[tokio::test]
async fn test_connect_rejected_while_connected() {
    let connector = Arc::new(MockConnector::new());
    let session = plain_session(&connector);
    session.connect(&peer()).await.unwrap();

    let err = session.connect(&peer()).await.unwrap_err();
    assert!(matches!(
        err,
        ClientError::ConnectRejected(ConnectionState::Connected)
    ));
    assert_eq!(connector.attempts(), 1);
}

#[tokio::test]
async fn test_single_connect_in_flight() {
    let connector = Arc::new(MockConnector::new());
    connector.set_delay(Duration::from_millis(200));
    let session = Arc::new(plain_session(&connector));

    let first = {
        let session = session.clone();
        tokio::spawn(async move { session.connect(&peer()).await.map(|_| ()) })
    };
    assert!(wait_state(&session, |s| *s == ConnectionState::Connecting).await);

    let err = session.connect(&peer()).await.unwrap_err();
    assert!(matches!(
        err,
        ClientError::ConnectRejected(ConnectionState::Connecting)
    ));

    first.await.unwrap().unwrap();
    assert_eq!(connector.attempts(), 1);
    assert_eq!(session.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn test_connect_failure_then_retry() {
    let connector = Arc::new(MockConnector::with_script([ConnectOutcome::Fail(
        "refused".into(),
    )]));
    let session = plain_session(&connector);

    let err = session.connect(&peer()).await.unwrap_err();
    assert!(matches!(err, ClientError::ConnectionFailed(_)));
    assert!(session.state().is_error());

    session.connect(&peer()).await.unwrap();
    assert_eq!(session.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn test_three_send_failures_force_reconnect() {
    let connector = Arc::new(MockConnector::new());
    let session = TransportSession::builder()
        .encrypt(false)
        .reconnect_interval(200)
        .build(&context(&connector));
    session.connect(&peer()).await.unwrap();

    let last_ok = session.send(&InputEvent::key(1, true)).await.unwrap();

    let link = connector.latest().unwrap();
    link.set_send_failing(true);

    for _ in 0..2 {
        let err = session.send(&InputEvent::key(2, true)).await.unwrap_err();
        assert!(matches!(err, ClientError::SendFailed(_)));
        assert_eq!(session.state(), ConnectionState::Connected);
    }

    assert!(session.send(&InputEvent::key(3, true)).await.is_err());
    assert_eq!(session.state(), ConnectionState::Reconnecting);
    assert!(wait_until(|| link.is_closed(), DEFAULT_TIMEOUT).await);

    assert!(connector.wait_for_links(2).await);
    assert!(wait_state(&session, |s| *s == ConnectionState::Connected).await);
    assert_eq!(session.stats().reconnect_attempts, 1);

    // The sequence space continues across the reconnect
    let seq = session.send(&InputEvent::key(4, true)).await.unwrap();
    assert!(seq > last_ok + 3);
}

#[tokio::test]
async fn test_interleaved_success_resets_failure_count() {
    let connector = Arc::new(MockConnector::new());
    let session = plain_session(&connector);
    session.connect(&peer()).await.unwrap();
    let link = connector.latest().unwrap();

    for _ in 0..3 {
        link.set_send_failing(true);
        assert!(session.send(&InputEvent::key(1, true)).await.is_err());
        assert!(session.send(&InputEvent::key(1, true)).await.is_err());
        link.set_send_failing(false);
        session.send(&InputEvent::key(1, false)).await.unwrap();
    }

    assert_eq!(session.state(), ConnectionState::Connected);
    assert_eq!(connector.attempts(), 1);
    assert_eq!(session.stats().send_failures, 6);
}

#[tokio::test]
async fn test_send_failures_without_auto_reconnect_end_in_error() {
    let connector = Arc::new(MockConnector::new());
    let session = TransportSession::builder()
        .encrypt(false)
        .auto_reconnect(false)
        .build(&context(&connector));
    session.connect(&peer()).await.unwrap();
    connector.latest().unwrap().set_send_failing(true);

    for _ in 0..3 {
        let _ = session.send(&InputEvent::key(1, true)).await;
    }

    assert!(session.state().is_error());
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(connector.attempts(), 1);
}

#[tokio::test]
async fn test_io_failure_reconnects() {
    let connector = Arc::new(MockConnector::new());
    let session = plain_session(&connector);
    session.connect(&peer()).await.unwrap();
    let mut transitions = session.subscribe_transitions();

    connector.latest().unwrap().fail("connection reset").await;

    let mut seen = Vec::new();
    while seen.last() != Some(&ConnectionState::Connected) {
        let state = tokio::time::timeout(DEFAULT_TIMEOUT, transitions.recv())
            .await
            .unwrap()
            .unwrap();
        seen.push(state);
    }
    assert_eq!(seen.len(), 3, "transitions: {:?}", seen);
    assert!(seen[0].is_error());
    assert_eq!(seen[1], ConnectionState::Reconnecting);
    assert_eq!(seen[2], ConnectionState::Connected);

    assert_eq!(connector.links().len(), 2);
    let first = connector.links()[0].clone();
    assert!(wait_until(|| first.is_closed(), DEFAULT_TIMEOUT).await);
}

#[tokio::test]
async fn test_reconnected_link_restarts_sequence_tracking() {
    let connector = Arc::new(MockConnector::new());
    let session = plain_session(&connector);
    session.connect(&peer()).await.unwrap();

    let first = connector.latest().unwrap();
    for seq in 1..=50 {
        first
            .inject_packet(&StreamPacket::new(PacketType::Control, now_ms(), seq, Bytes::new()))
            .await;
    }
    assert!(wait_until(|| session.metrics().packets_received == 50, DEFAULT_TIMEOUT).await);

    first.fail("connection reset").await;
    assert!(connector.wait_for_links(2).await);
    assert!(wait_state(&session, |s| *s == ConnectionState::Connected).await);

    // The host numbers the new connection from 1 again
    let second = connector.latest().unwrap();
    for seq in [1, 2, 3, 5] {
        second
            .inject_packet(&StreamPacket::new(PacketType::Control, now_ms(), seq, Bytes::new()))
            .await;
    }
    assert!(wait_until(|| session.metrics().packets_received == 54, DEFAULT_TIMEOUT).await);

    let metrics = session.metrics();
    assert_eq!(metrics.packets_reordered, 0);
    assert_eq!(metrics.packets_lost, 1);
}

#[tokio::test]
async fn test_failed_reconnect_ends_in_error() {
    let connector = Arc::new(MockConnector::with_script([
        ConnectOutcome::Link,
        ConnectOutcome::Fail("host unreachable".into()),
    ]));
    let session = plain_session(&connector);
    session.connect(&peer()).await.unwrap();

    connector.latest().unwrap().fail("connection reset").await;

    assert!(connector.wait_for_attempts(2).await);
    assert!(wait_state(&session, |s| s.is_error()).await);

    // A single outstanding reconnect: no further attempts
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(connector.attempts(), 2);

    session.connect(&peer()).await.unwrap();
    assert_eq!(session.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn test_disconnect_is_idempotent() {
    let connector = Arc::new(MockConnector::new());
    let decoder = ScriptedVideoDecoder::new();
    let security = preshared_session();
    let ctx = ClientContext::new(security.clone())
        .with_connector(connector.clone())
        .with_video_decoder(Arc::new(decoder.clone()));
    let session = TransportSession::builder().encrypt(false).build(&ctx);

    session.connect(&peer()).await.unwrap();
    let link = connector.latest().unwrap();
    link.inject_packet(&video_packet(1, now_ms(), 64, 64, b"frame"))
        .await;
    assert!(wait_until(|| decoder.decoded() == 1, DEFAULT_TIMEOUT).await);

    session.disconnect().await;
    session.disconnect().await;

    assert_eq!(session.state(), ConnectionState::Disconnected);
    assert_eq!(link.close_calls(), 1);
    assert_eq!(decoder.closed(), 1);
    assert!(!security.is_authenticated());
    assert!(session.frames().is_empty());
}

#[tokio::test]
async fn test_disconnect_cancels_pending_reconnect() {
    let connector = Arc::new(MockConnector::new());
    let session = TransportSession::builder()
        .encrypt(false)
        .reconnect_interval(200)
        .build(&context(&connector));
    session.connect(&peer()).await.unwrap();

    connector.latest().unwrap().fail("connection reset").await;
    assert!(wait_state(&session, |s| *s == ConnectionState::Reconnecting).await);

    session.disconnect().await;
    tokio::time::sleep(Duration::from_millis(400)).await;

    assert_eq!(connector.attempts(), 1);
    assert_eq!(session.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_connect_racing_disconnect_from_error() {
    let connector = Arc::new(MockConnector::new());
    let decoder = ScriptedVideoDecoder::new();
    let ctx = context(&connector).with_video_decoder(Arc::new(decoder.clone()));
    let session = TransportSession::builder()
        .encrypt(false)
        .send_auth_token(false)
        .auto_reconnect(false)
        .build(&ctx);
    session.connect(&peer()).await.unwrap();

    let first = connector.latest().unwrap();
    first
        .inject_packet(&video_packet(1, now_ms(), 64, 64, b"frame"))
        .await;
    assert!(wait_state(&session, |s| *s == ConnectionState::Streaming).await);
    first.fail("connection reset").await;
    assert!(wait_state(&session, |s| s.is_error()).await);

    let (_, connected) = tokio::join!(session.disconnect(), async {
        tokio::task::yield_now().await;
        session.connect(&peer()).await
    });

    // The connect waits for the teardown, then owns a live link
    connected.unwrap();
    assert_eq!(session.state(), ConnectionState::Connected);
    assert_eq!(connector.links().len(), 2);
    assert!(!connector.latest().unwrap().is_closed());
    session.send(&InputEvent::key(1, true)).await.unwrap();
    assert!(wait_until(|| first.is_closed(), DEFAULT_TIMEOUT).await);
}

#[tokio::test]
async fn test_disconnect_while_connecting() {
    let connector = Arc::new(MockConnector::new());
    connector.set_delay(Duration::from_millis(100));
    let session = Arc::new(plain_session(&connector));

    let attempt = {
        let session = session.clone();
        tokio::spawn(async move { session.connect(&peer()).await.map(|_| ()) })
    };
    assert!(wait_state(&session, |s| *s == ConnectionState::Connecting).await);
    session.disconnect().await;

    let err = attempt.await.unwrap().unwrap_err();
    assert!(matches!(err, ClientError::Cancelled));
    assert_eq!(session.state(), ConnectionState::Disconnected);
    assert!(connector.latest().unwrap().is_closed());
}

#[tokio::test]
async fn test_first_media_packet_starts_streaming() {
    let connector = Arc::new(MockConnector::new());
    let session = plain_session(&connector);
    session.connect(&peer()).await.unwrap();
    let link = connector.latest().unwrap();

    let control = StreamPacket::new(PacketType::Control, now_ms(), 1, Bytes::from_static(b"hi"));
    link.inject_packet(&control).await;
    assert!(wait_until(|| session.metrics().packets_received == 1, DEFAULT_TIMEOUT).await);
    assert_eq!(session.state(), ConnectionState::Connected);

    link.inject_packet(&video_packet(2, now_ms(), 320, 240, b"idr"))
        .await;
    assert!(wait_state(&session, |s| *s == ConnectionState::Streaming).await);

    let frame = tokio::time::timeout(DEFAULT_TIMEOUT, session.frames().pop())
        .await
        .unwrap();
    assert_eq!(frame.format.width, 320);
    assert_eq!(&frame.data[..], b"idr");
}

#[tokio::test]
async fn test_keepalive_is_echoed() {
    let connector = Arc::new(MockConnector::new());
    let session = plain_session(&connector);
    session.connect(&peer()).await.unwrap();
    let link = connector.latest().unwrap();

    let ping = StreamPacket::new(
        PacketType::KeepAlive,
        now_ms(),
        7,
        Bytes::from_static(b"ping-1"),
    );
    link.inject_packet(&ping).await;

    assert!(wait_until(|| session.stats().keepalives_echoed == 1, DEFAULT_TIMEOUT).await);
    let echoed: Vec<_> = link
        .sent_packets()
        .into_iter()
        .filter(|p| p.packet_type() == PacketType::KeepAlive)
        .collect();
    assert_eq!(echoed.len(), 1);
    assert_eq!(&echoed[0].payload()[..], b"ping-1");
}

#[tokio::test]
async fn test_malformed_messages_are_dropped() {
    let connector = Arc::new(MockConnector::new());
    let session = plain_session(&connector);
    session.connect(&peer()).await.unwrap();
    let mut control = session.subscribe_control();
    let link = connector.latest().unwrap();

    link.inject(Bytes::from_static(&[0x01, 0x02, 0x03])).await;
    link.inject(Bytes::from_static(&[0x7F; 20])).await;
    // Video packet whose sub-header is truncated
    link.inject_packet(&StreamPacket::new(
        PacketType::VideoFrame,
        now_ms(),
        1,
        Bytes::from_static(&[0x01, 0x00]),
    ))
    .await;
    link.inject_packet(&StreamPacket::new(
        PacketType::Control,
        now_ms(),
        2,
        Bytes::from_static(b"still alive"),
    ))
    .await;

    let packet = tokio::time::timeout(DEFAULT_TIMEOUT, control.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&packet.payload()[..], b"still alive");
    assert_eq!(session.stats().protocol_drops, 3);
    assert!(session.state().is_connected());
}

#[tokio::test]
async fn test_future_timestamp_is_clock_skew() {
    let connector = Arc::new(MockConnector::new());
    let session = plain_session(&connector);
    session.connect(&peer()).await.unwrap();
    let link = connector.latest().unwrap();

    let ahead = StreamPacket::new(PacketType::Control, now_ms() + 60_000, 1, Bytes::new());
    link.inject_packet(&ahead).await;

    assert!(wait_until(|| session.metrics().packets_received == 1, DEFAULT_TIMEOUT).await);
    let metrics = session.metrics();
    assert_eq!(metrics.latency_ms, 0);
    assert_eq!(metrics.clock_skew_anomalies, 1);
}

#[tokio::test]
async fn test_metrics_reset_on_fresh_connect() {
    let connector = Arc::new(MockConnector::new());
    let session = plain_session(&connector);
    session.connect(&peer()).await.unwrap();

    let link = connector.latest().unwrap();
    for seq in [1, 2, 5] {
        link.inject_packet(&StreamPacket::new(PacketType::Control, now_ms(), seq, Bytes::new()))
            .await;
    }
    assert!(wait_until(|| session.metrics().packets_received == 3, DEFAULT_TIMEOUT).await);
    assert_eq!(session.metrics().packets_lost, 2);

    session.disconnect().await;
    session.connect(&peer()).await.unwrap();
    assert_eq!(session.metrics().packets_received, 0);
    assert_eq!(session.metrics().packets_lost, 0);
}

#[tokio::test]
async fn test_encryption_requires_authentication() {
    let connector = Arc::new(MockConnector::new());
    let backend = Arc::new(StaticAuthBackend::new().with_user("alice", "hunter2"));
    let ctx = ClientContext::new(Arc::new(SecuritySession::new(backend)))
        .with_connector(connector.clone());
    let session = TransportSession::builder().build(&ctx);

    let err = session.connect(&peer()).await.unwrap_err();
    assert!(matches!(
        err,
        ClientError::Crypto(CryptoError::NotAuthenticated)
    ));
    assert!(session.state().is_error());
    assert_eq!(connector.attempts(), 0);
}

#[tokio::test]
async fn test_encrypted_stream_over_tcp() {
    let host = MockHost::start_encrypted().await;
    let ctx = ClientContext::new(preshared_session());
    let session = TransportSession::builder().build(&ctx);

    session.connect(&host.peer()).await.unwrap();
    assert!(host.wait_for_received(PacketType::Auth, 1).await);
    let auth = host.received_of(PacketType::Auth);
    assert_eq!(&auth[0].payload()[..], b"test-token");

    assert!(host
        .send_packet(&video_packet(1, now_ms(), 1280, 720, b"keyframe"))
        .await);
    assert!(wait_state(&session, |s| *s == ConnectionState::Streaming).await);

    session.send(&InputEvent::key(0x41, true)).await.unwrap();
    assert!(host.wait_for_received(PacketType::InputEvent, 1).await);
    let input = &host.received_of(PacketType::InputEvent)[0];
    assert_eq!(
        InputEvent::from_payload(input.payload()).unwrap(),
        InputEvent::key(0x41, true)
    );

    // Not sealed with the session key
    assert!(host.send_raw(Bytes::from(vec![0xAB; 40])).await);
    assert!(wait_until(|| session.stats().crypto_drops == 1, DEFAULT_TIMEOUT).await);
    assert!(session.state().is_connected());
    assert_eq!(host.undecodable(), 0);

    session.disconnect().await;
}

#[tokio::test]
async fn test_host_closing_triggers_reconnect_over_tcp() {
    let host = MockHost::start().await;
    let ctx = ClientContext::new(preshared_session());
    let session = TransportSession::builder()
        .encrypt(false)
        .reconnect_interval(20)
        .build(&ctx);

    session.connect(&host.peer()).await.unwrap();
    assert!(host.wait_for_connections(1).await);

    host.drop_connection().await;

    assert!(host.wait_for_connections(2).await);
    assert!(wait_state(&session, |s| *s == ConnectionState::Connected).await);
    session.disconnect().await;
}
