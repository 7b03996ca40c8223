//! Send credit, receive-window replenishment and flow-control violations

use std::time::Duration;

use h2_mux::{error_code, ConnectionConfig, Error, Frame};

use super::{client_with_raw_peer, request_headers};

const QUIET: Duration = Duration::from_millis(100);

#[tokio::test]
async fn test_large_body_waits_for_window_update() {
    let (local, mut peer) = client_with_raw_peer(ConnectionConfig::default()).await;
    let mut stream = local.handle.open_stream().await.unwrap();
    stream.send_headers(request_headers("/upload"), false).await.unwrap();

    let sender = tokio::spawn(async move {
        stream
            .send_data(vec![9u8; 100_000].into(), true)
            .await
            .map(|_| stream)
    });

    assert!(matches!(peer.recv().await, Frame::Headers { .. }));
    let mut received = 0;
    while received < 65535 {
        let frame = peer.recv().await;
        assert!(!frame.is_end_stream());
        received += frame.flow_len();
    }
    assert_eq!(received, 65535);
    assert!(peer.is_quiet(QUIET).await);
    assert!(!sender.is_finished());

    // Connection credit alone does not unblock the stream
    peer.send(Frame::window_update(0, 40000)).await;
    assert!(peer.is_quiet(QUIET).await);

    peer.send(Frame::window_update(1, 40000)).await;
    let rest = peer.recv_until(Frame::is_end_stream).await;
    let total: u32 = rest.iter().map(Frame::flow_len).sum();
    assert_eq!(total, 100_000 - 65535);

    let stream = sender.await.unwrap().unwrap();
    assert_eq!(stream.window().await.unwrap().peer_current_size(), 40000 - 34465);
}

#[tokio::test]
async fn test_connection_credit_unblocks_waiting_stream() {
    let (local, mut peer) = client_with_raw_peer(ConnectionConfig::default()).await;
    let mut first = local.handle.open_stream().await.unwrap();
    let mut second = local.handle.open_stream().await.unwrap();
    first.send_headers(request_headers("/a"), false).await.unwrap();
    second.send_headers(request_headers("/b"), false).await.unwrap();

    // Stream 1 spends the whole connection window
    first.send_data(vec![0u8; 65535].into(), false).await.unwrap();
    peer.recv_until(|frame| frame.stream_id() == 1 && frame.flow_len() == 16383).await;

    let sender = tokio::spawn(async move { second.send_data(vec![1u8; 100].into(), true).await });
    assert!(peer.is_quiet(QUIET).await);

    peer.send(Frame::window_update(0, 100)).await;
    let frame = peer.recv().await;
    assert_eq!((frame.stream_id(), frame.flow_len(), frame.is_end_stream()), (3, 100, true));
    sender.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_receive_windows_are_replenished() {
    let (mut local, mut peer) = client_with_raw_peer(ConnectionConfig::default()).await;

    peer.send(Frame::headers(2, request_headers("/push"), false)).await;
    for _ in 0..3 {
        peer.send(Frame::data(2, vec![0u8; 16384], false)).await;
    }

    assert_eq!(peer.recv().await, Frame::window_update(0, 49152));
    assert_eq!(peer.recv().await, Frame::window_update(2, 49152));

    let mut stream = local.handle.accept().await.unwrap();
    assert_eq!(stream.id(), 2);
    assert!(matches!(stream.recv_frame().await, Some(Frame::Headers { .. })));
    assert_eq!(stream.window().await.unwrap().current_size(), 65535);
}

#[tokio::test]
async fn test_no_stream_update_after_end_stream() {
    let (_local, mut peer) = client_with_raw_peer(ConnectionConfig::default()).await;

    peer.send(Frame::headers(2, request_headers("/"), false)).await;
    peer.send(Frame::data(2, vec![0u8; 16384], false)).await;
    peer.send(Frame::data(2, vec![0u8; 16384], false)).await;
    peer.send(Frame::data(2, vec![0u8; 16384], true)).await;

    assert_eq!(peer.recv().await, Frame::window_update(0, 49152));
    assert!(peer.is_quiet(QUIET).await);
}

#[tokio::test]
async fn test_stream_window_violation_resets_only_that_stream() {
    let config = ConnectionConfig::default().with_initial_window_size(1000);
    let (mut local, mut peer) = client_with_raw_peer(config).await;

    peer.send(Frame::headers(2, request_headers("/"), false)).await;
    peer.send(Frame::data(2, vec![0u8; 1001], false)).await;
    assert_eq!(peer.recv().await, Frame::rst_stream(2, error_code::FLOW_CONTROL_ERROR));

    let mut stream = local.handle.accept().await.unwrap();
    match stream.recv_request().await {
        Err(Error::StreamReset { stream_id, error_code }) => {
            assert_eq!(stream_id, 2);
            assert_eq!(error_code, error_code::FLOW_CONTROL_ERROR);
        }
        other => panic!("expected reset, got {other:?}"),
    }

    peer.send(Frame::Ping { ack: false, data: [3; 8] }).await;
    assert_eq!(peer.recv().await, Frame::ping_ack([3; 8]));
}

#[tokio::test]
async fn test_connection_window_overflow_is_goaway() {
    let (local, mut peer) = client_with_raw_peer(ConnectionConfig::default()).await;

    peer.send(Frame::window_update(0, 0x7FFF_FFFF)).await;

    let frames = peer.recv_to_end().await;
    assert_eq!(frames, vec![Frame::go_away(0, error_code::FLOW_CONTROL_ERROR)]);
    assert!(matches!(local.read_loop.await.unwrap(), Err(Error::FlowControl(_))));
}

#[tokio::test]
async fn test_connection_zero_increment_is_goaway() {
    let (_local, mut peer) = client_with_raw_peer(ConnectionConfig::default()).await;

    peer.send(Frame::window_update(0, 0)).await;

    let frames = peer.recv_to_end().await;
    assert_eq!(frames, vec![Frame::go_away(0, error_code::PROTOCOL_ERROR)]);
}

#[tokio::test]
async fn test_stream_window_overflow_resets_stream() {
    let (local, mut peer) = client_with_raw_peer(ConnectionConfig::default()).await;
    let mut stream = local.handle.open_stream().await.unwrap();
    stream.send_headers(request_headers("/"), false).await.unwrap();
    assert!(matches!(peer.recv().await, Frame::Headers { .. }));

    peer.send(Frame::window_update(1, 0x7FFF_FFFF)).await;
    assert_eq!(peer.recv().await, Frame::rst_stream(1, error_code::FLOW_CONTROL_ERROR));

    assert!(matches!(
        stream.recv_frame().await,
        Some(Frame::RstStream { error_code: error_code::FLOW_CONTROL_ERROR, .. })
    ));
    let err = stream.send_data(vec![1u8; 10].into(), true).await.unwrap_err();
    assert!(matches!(err, Error::StreamClosed(1)));
}

#[tokio::test]
async fn test_stream_zero_increment_resets_stream() {
    let (local, mut peer) = client_with_raw_peer(ConnectionConfig::default()).await;
    let mut stream = local.handle.open_stream().await.unwrap();
    stream.send_headers(request_headers("/"), false).await.unwrap();
    assert!(matches!(peer.recv().await, Frame::Headers { .. }));

    peer.send(Frame::window_update(1, 0)).await;
    assert_eq!(peer.recv().await, Frame::rst_stream(1, error_code::PROTOCOL_ERROR));
}

#[tokio::test]
async fn test_blocked_sender_fails_when_connection_closes() {
    let (local, mut peer) = client_with_raw_peer(ConnectionConfig::default()).await;
    let mut stream = local.handle.open_stream().await.unwrap();
    stream.send_headers(request_headers("/upload"), false).await.unwrap();

    let sender = tokio::spawn(async move { stream.send_data(vec![0u8; 70_000].into(), true).await });
    peer.recv_until(|frame| frame.flow_len() > 0 && frame.flow_len() < 16384).await;

    peer.send(Frame::go_away(0, error_code::NO_ERROR)).await;
    assert!(matches!(sender.await.unwrap(), Err(Error::StreamClosed(1))));
}
