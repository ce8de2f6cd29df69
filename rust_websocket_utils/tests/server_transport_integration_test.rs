// rust_websocket_utils/tests/server_transport_integration_test.rs

use futures_util::{SinkExt, StreamExt};
use log::{LevelFilter, info};
use rust_websocket_utils::error::WsError;
use rust_websocket_utils::frame::encode_text_frame;
use rust_websocket_utils::message::WsMessage;
use rust_websocket_utils::server::transport::{CLOSE_NORMAL, WsConnection};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message as TungsteniteMessage};

// 辅助函数：初始化日志，仅用于测试，避免多次初始化
fn init_test_logger() {
    let _ = env_logger::builder().filter_level(LevelFilter::Info).is_test(true).try_init();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_standard_client_completes_handshake_and_exchanges_text() {
    init_test_logger();

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("无法绑定到随机端口");
    let addr = listener.local_addr().expect("无法获取本地监听地址");

    let server = tokio::spawn(async move {
        let (stream, peer) = listener.accept().await.expect("accept 失败");
        let connection = WsConnection::accept(stream, peer, 1024).await.expect("握手失败");
        assert_eq!(connection.request().path, "/station");
        let (mut reader, mut writer) = connection.split();

        // 客户端帧带掩码，读取端负责解掩码
        let first = reader.receive_message().await.expect("读取失败").expect("连接过早关闭");
        info!("[Test Server] 收到: {:?}", first);
        assert_eq!(first, WsMessage::Text(r#"{"request":"live"}"#.to_string()));

        writer
            .send_frame(&encode_text_frame(br#"{"temperature":21.5}"#))
            .await
            .expect("发送文本帧失败");

        match reader.receive_message().await.expect("读取失败") {
            Some(WsMessage::Ping(payload)) => writer.send_pong(&payload).await.expect("发送 Pong 失败"),
            other => panic!("期望 Ping，实际收到 {:?}", other),
        }

        writer.close(CLOSE_NORMAL).await;
        // 客户端回应关闭帧后断开
        let tail = reader.receive_message().await;
        assert!(matches!(tail, Ok(Some(WsMessage::Close(_))) | Ok(None) | Err(_)));
    });

    let url = format!("ws://{}/station", addr);
    let (mut client, response) = connect_async(url.as_str()).await.expect("客户端连接失败");
    assert_eq!(response.status().as_u16(), 101);

    client
        .send(TungsteniteMessage::Text(r#"{"request":"live"}"#.to_string()))
        .await
        .unwrap();

    let text = tokio::time::timeout(Duration::from_secs(5), client.next())
        .await
        .expect("等待服务端消息超时")
        .expect("流已结束")
        .expect("读取错误");
    assert_eq!(text, TungsteniteMessage::Text(r#"{"temperature":21.5}"#.to_string()));

    client.send(TungsteniteMessage::Ping(b"hb".to_vec())).await.unwrap();
    let pong = tokio::time::timeout(Duration::from_secs(5), client.next())
        .await
        .expect("等待 Pong 超时")
        .expect("流已结束")
        .expect("读取错误");
    assert_eq!(pong, TungsteniteMessage::Pong(b"hb".to_vec()));

    let close = tokio::time::timeout(Duration::from_secs(5), client.next())
        .await
        .expect("等待关闭帧超时");
    assert!(matches!(close, Some(Ok(TungsteniteMessage::Close(_))) | None));

    server.await.expect("服务端任务 panic");
}

#[tokio::test]
async fn test_request_without_key_is_rejected_with_400() {
    init_test_logger();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (stream, peer) = listener.accept().await.unwrap();
        WsConnection::accept(stream, peer, 1024).await
    });

    let mut raw = TcpStream::connect(addr).await.unwrap();
    raw.write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\r\n")
        .await
        .unwrap();

    let result = server.await.unwrap();
    assert!(matches!(result, Err(WsError::Handshake(_))));

    let mut response = Vec::new();
    let _ = tokio::time::timeout(Duration::from_secs(2), raw.read_to_end(&mut response)).await;
    assert!(String::from_utf8_lossy(&response).starts_with("HTTP/1.1 400"));
}

#[tokio::test]
async fn test_peer_eof_is_reported_as_none() {
    init_test_logger();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (stream, peer) = listener.accept().await.unwrap();
        let connection = WsConnection::accept(stream, peer, 1024).await.unwrap();
        let (mut reader, _writer) = connection.split();
        reader.receive_message().await
    });

    let mut raw = TcpStream::connect(addr).await.unwrap();
    raw.write_all(
        b"GET / HTTP/1.1\r\nHost: localhost\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\
Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\nSec-WebSocket-Version: 13\r\n\r\n",
    )
    .await
    .unwrap();
    let mut head = [0u8; 256];
    let n = raw.read(&mut head).await.unwrap();
    assert!(String::from_utf8_lossy(&head[..n]).contains("s3pPLMBiTxaQ9kYGzzhZRbK+xOo="));
    drop(raw);

    let received = server.await.unwrap();
    assert!(matches!(received, Ok(None)));
}
