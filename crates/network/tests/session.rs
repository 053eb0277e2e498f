//! Session behavior after the handshake: the single-session gate, heartbeat
//! echo, audio delivery, keepalive expiry, and decode-failure tolerance.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{mock_playback, pcm_params, server_config, start_server, wait_for};
use protocol::{Packet, PacketType, StreamParams};
use tokio::net::TcpStream;
use utils::ShutdownCoordinator;

async fn connect_and_handshake(addr: std::net::SocketAddr, params: &StreamParams) -> TcpStream {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    Packet::handshake(params).write_to(&mut stream).await.unwrap();
    let reply = Packet::read_from(&mut stream).await.unwrap();
    assert_eq!(reply.header.packet_type, PacketType::Handshake);
    stream
}

#[tokio::test]
async fn second_connection_is_closed_while_a_session_is_live() {
    let coordinator = Arc::new(ShutdownCoordinator::new());
    let (factory, _frames) = mock_playback();
    let (server, addr) = start_server(server_config(), coordinator, factory).await;

    let mut first = connect_and_handshake(addr, &pcm_params()).await;
    assert!(wait_for(|| server.is_connected(), Duration::from_secs(2)).await);

    // The latecomer completes the TCP handshake, then the server closes it
    // without ever reading a packet.
    let mut second = TcpStream::connect(addr).await.unwrap();
    let result = tokio::time::timeout(Duration::from_secs(3), Packet::read_from(&mut second)).await;
    assert!(result.expect("gate closed the connection").is_err());

    // The first session is unaffected.
    Packet::heartbeat().write_to(&mut first).await.unwrap();
    let echo = tokio::time::timeout(Duration::from_secs(2), Packet::read_from(&mut first))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(echo.header.packet_type, PacketType::Heartbeat);
}

#[tokio::test]
async fn heartbeats_are_mirrored_back() {
    let coordinator = Arc::new(ShutdownCoordinator::new());
    let (factory, _frames) = mock_playback();
    let (_server, addr) = start_server(server_config(), coordinator, factory).await;

    let mut stream = connect_and_handshake(addr, &pcm_params()).await;
    for _ in 0..3 {
        Packet::heartbeat().write_to(&mut stream).await.unwrap();
        let echo = tokio::time::timeout(Duration::from_secs(2), Packet::read_from(&mut stream))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(echo.header.packet_type, PacketType::Heartbeat);
        // 20-byte header, empty payload: exactly one header each way.
        assert_eq!(echo.wire_len(), protocol::HEADER_LEN);
    }
}

#[tokio::test]
async fn audio_frames_reach_playback_in_order() {
    let coordinator = Arc::new(ShutdownCoordinator::new());
    let (factory, frames) = mock_playback();
    let (_server, addr) = start_server(server_config(), coordinator, factory).await;

    let params = pcm_params();
    let mut stream = connect_and_handshake(addr, &params).await;

    let sent: Vec<Vec<u8>> = (0..5u8)
        .map(|i| vec![i; params.payload_len()])
        .collect();
    for (i, payload) in sent.iter().enumerate() {
        Packet::audio(payload.clone(), i as u32 + 1)
            .write_to(&mut stream)
            .await
            .unwrap();
    }

    assert!(
        wait_for(|| frames.lock().unwrap().len() == 5, Duration::from_secs(2)).await,
        "all frames delivered"
    );
    assert_eq!(*frames.lock().unwrap(), sent, "FIFO order preserved");
}

#[tokio::test]
async fn undecodable_audio_is_dropped_without_killing_the_session() {
    let coordinator = Arc::new(ShutdownCoordinator::new());
    let (factory, frames) = mock_playback();
    let (_server, addr) = start_server(server_config(), coordinator, factory).await;

    let params = pcm_params();
    let mut stream = connect_and_handshake(addr, &params).await;

    // Wrong payload size for the negotiated PCM geometry.
    Packet::audio(vec![0u8; 7], 1).write_to(&mut stream).await.unwrap();
    // A good frame afterwards still goes through.
    let good = vec![42u8; params.payload_len()];
    Packet::audio(good.clone(), 2).write_to(&mut stream).await.unwrap();

    assert!(wait_for(|| frames.lock().unwrap().len() == 1, Duration::from_secs(2)).await);
    assert_eq!(frames.lock().unwrap()[0], good);

    // And the session still answers heartbeats.
    Packet::heartbeat().write_to(&mut stream).await.unwrap();
    let echo = tokio::time::timeout(Duration::from_secs(2), Packet::read_from(&mut stream))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(echo.header.packet_type, PacketType::Heartbeat);
}

#[tokio::test]
async fn unknown_packet_types_are_skipped() {
    let coordinator = Arc::new(ShutdownCoordinator::new());
    let (factory, _frames) = mock_playback();
    let (_server, addr) = start_server(server_config(), coordinator, factory).await;

    let mut stream = connect_and_handshake(addr, &pcm_params()).await;

    Packet::new(PacketType::Unknown(9), vec![1, 2, 3])
        .write_to(&mut stream)
        .await
        .unwrap();

    Packet::heartbeat().write_to(&mut stream).await.unwrap();
    let echo = tokio::time::timeout(Duration::from_secs(2), Packet::read_from(&mut stream))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(echo.header.packet_type, PacketType::Heartbeat);
}

#[tokio::test(flavor = "multi_thread")]
async fn keepalive_expiry_closes_a_silent_session() {
    let coordinator = Arc::new(ShutdownCoordinator::new());
    let (factory, _frames) = mock_playback();
    let mut config = server_config();
    // Tight liveness settings: warn after 500 ms of silence, close after 1 s.
    // The monitor polls every 5 s, so closure lands at its first tick.
    config.timeouts.heartbeat = Duration::from_millis(500);
    config.timeouts.keepalive = Duration::from_secs(1);
    config.timeouts.read = Duration::from_secs(30);
    let (server, addr) = start_server(config, coordinator, factory).await;

    let mut stream = connect_and_handshake(addr, &pcm_params()).await;
    assert!(wait_for(|| server.is_connected(), Duration::from_secs(2)).await);

    // Stay completely silent and wait for the monitor to shut us down.
    let result =
        tokio::time::timeout(Duration::from_secs(10), Packet::read_from(&mut stream)).await;
    assert!(
        result.expect("session closed by keepalive monitor").is_err(),
        "server closed the silent connection"
    );

    // The listener returns to idle and accepts a fresh client.
    assert!(
        wait_for(|| !server.is_connected(), Duration::from_secs(5)).await,
        "session slot released"
    );
    let _fresh = connect_and_handshake(addr, &pcm_params()).await;
}
