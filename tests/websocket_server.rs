//! End-to-end tests against a running server, using an independent
//! WebSocket client implementation.

mod common;

use std::time::Duration;

use bytes::BytesMut;
use futures_util::{SinkExt, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use common::{raw_upgrade, read_head, read_to_eof, start_server, test_config};
use socket_pipe::channel::PackageEncoder;
use socket_pipe::config::SessionMode;
use socket_pipe::websocket::{accept_key, MaskedWebSocketEncoder, WebSocketPackage};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn recv(client: &mut Client) -> Message {
    tokio::time::timeout(Duration::from_secs(5), client.next())
        .await
        .expect("no message in time")
        .expect("stream ended")
        .expect("websocket error")
}

#[tokio::test]
async fn test_echo_text_and_binary() {
    let server = start_server(test_config()).await;
    let (mut client, _) = connect_async(server.url()).await.unwrap();

    client.send(Message::text("hello")).await.unwrap();
    assert_eq!(recv(&mut client).await, Message::text("hello"));

    let payload: Vec<u8> = (0..70_000u32).map(|i| (i % 251) as u8).collect();
    client.send(Message::binary(payload.clone())).await.unwrap();
    assert_eq!(recv(&mut client).await, Message::binary(payload));
}

#[tokio::test]
async fn test_ping_gets_pong() {
    let server = start_server(test_config()).await;
    let (mut client, _) = connect_async(server.url()).await.unwrap();

    client.send(Message::Ping(b"heartbeat".to_vec().into())).await.unwrap();
    assert_eq!(recv(&mut client).await, Message::Pong(b"heartbeat".to_vec().into()));
}

#[tokio::test]
async fn test_client_close_is_echoed() {
    let server = start_server(test_config()).await;
    let (mut client, _) = connect_async(server.url()).await.unwrap();
    server.wait_for_sessions(1).await;

    client.close(None).await.unwrap();
    let mut saw_close = false;
    while let Ok(Some(message)) = tokio::time::timeout(Duration::from_secs(5), client.next()).await {
        match message {
            Ok(Message::Close(_)) => saw_close = true,
            Ok(_) => {}
            Err(_) => break,
        }
    }
    assert!(saw_close);
    server.wait_for_sessions(0).await;
}

#[tokio::test]
async fn test_fragmented_replies_reassemble() {
    let mut config = test_config();
    config.websocket.max_fragment_size = Some(4);
    let server = start_server(config).await;
    let (mut client, _) = connect_async(server.url()).await.unwrap();

    client.send(Message::text("fragmented héllo wörld")).await.unwrap();
    assert_eq!(recv(&mut client).await, Message::text("fragmented héllo wörld"));
}

#[tokio::test]
async fn test_sub_protocol_negotiated() {
    let mut config = test_config();
    config.websocket.sub_protocols = vec!["chat".to_string()];
    let server = start_server(config).await;

    let mut request = server.url().into_client_request().unwrap();
    request
        .headers_mut()
        .insert("Sec-WebSocket-Protocol", "superchat, chat".parse().unwrap());
    let (_client, response) = connect_async(request).await.unwrap();

    assert_eq!(
        response
            .headers()
            .get("Sec-WebSocket-Protocol")
            .and_then(|v| v.to_str().ok()),
        Some("chat")
    );
}

#[tokio::test]
async fn test_broadcast_reaches_every_session() {
    let mut config = test_config();
    config.websocket.mode = SessionMode::Broadcast;
    let server = start_server(config).await;

    let (mut alice, _) = connect_async(server.url()).await.unwrap();
    let (mut bob, _) = connect_async(server.url()).await.unwrap();
    server.wait_for_sessions(2).await;

    alice.send(Message::text("hi all")).await.unwrap();
    assert_eq!(recv(&mut alice).await, Message::text("hi all"));
    assert_eq!(recv(&mut bob).await, Message::text("hi all"));
}

#[tokio::test]
async fn test_shutdown_sends_going_away() {
    let server = start_server(test_config()).await;
    let (mut client, _) = connect_async(server.url()).await.unwrap();
    server.wait_for_sessions(1).await;

    server.shutdown.trigger();
    match recv(&mut client).await {
        Message::Close(Some(frame)) => assert_eq!(u16::from(frame.code), 1001),
        other => panic!("expected close frame, got {other:?}"),
    }

    let result = tokio::time::timeout(Duration::from_secs(5), server.task)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_bad_upgrade_gets_400() {
    let server = start_server(test_config()).await;
    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    stream
        .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .await
        .unwrap();

    let head = read_head(&mut stream).await;
    assert!(head.starts_with("HTTP/1.1 400 Bad Request\r\n"));
    read_to_eof(&mut stream).await;
}

#[tokio::test]
async fn test_raw_handshake_accept_key() {
    let server = start_server(test_config()).await;
    let (_stream, head) = raw_upgrade(server.addr).await;

    assert!(head.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
    assert!(head.contains(&format!("Sec-WebSocket-Accept: {}\r\n", accept_key(common::KEY))));
}

#[tokio::test]
async fn test_oversized_package_closes_connection() {
    let mut config = test_config();
    // Large enough for the upgrade request, smaller than the frame below.
    config.channel.max_package_length = 512;
    config.channel.receive_buffer_size = 256;
    let server = start_server(config).await;

    let (mut stream, head) = raw_upgrade(server.addr).await;
    assert!(head.starts_with("HTTP/1.1 101"));
    server.wait_for_sessions(1).await;

    let mut frame = BytesMut::new();
    MaskedWebSocketEncoder::new()
        .encode(&mut frame, &WebSocketPackage::binary(vec![7u8; 2000]))
        .unwrap();
    // The server may close before the whole frame is written.
    let _ = stream.write_all(&frame).await;

    let rest = read_to_eof(&mut stream).await;
    assert!(rest.is_empty(), "no reply expected before close");
    server.wait_for_sessions(0).await;
}

#[tokio::test]
async fn test_unmasked_client_frame_closes_connection() {
    let server = start_server(test_config()).await;
    let (mut stream, _) = raw_upgrade(server.addr).await;
    server.wait_for_sessions(1).await;

    // FIN | Text, unmasked, 2 bytes.
    stream.write_all(&[0x81, 0x02, b'h', b'i']).await.unwrap();
    let rest = read_to_eof(&mut stream).await;
    assert!(rest.is_empty());
    server.wait_for_sessions(0).await;
}

#[tokio::test]
async fn test_config_update_applies_to_new_connections() {
    let server = start_server(test_config()).await;

    let mut config = test_config();
    config.websocket.mode = SessionMode::Broadcast;
    config.channel.max_package_length = 1024;
    server.config_tx.send(config).unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        while server.server.config().channel.max_package_length != 1024 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(server.server.config().websocket.mode, SessionMode::Broadcast);
}
