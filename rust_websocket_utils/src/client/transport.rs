// rust_websocket_utils/src/client/transport.rs

//! 客户端 WebSocket 传输层。
//!
//! 客户端不需要手写协议，直接基于 `tokio-tungstenite` 建立连接、发送订阅请求、接收文本消息。

use common_models::ws_payloads::ClientRequest;
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use log::{debug, error, info};
use tokio_tungstenite::{
    WebSocketStream, connect_async,
    tungstenite::Error as TungsteniteError,
    tungstenite::protocol::Message,
};
use url::Url;

use crate::error::WsError;

/// 可能经过 TLS 的 TCP WebSocket 流，`connect_async` 成功后返回的流类型。
pub type ClientWsStream = WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// 一个活动的客户端连接，已拆分为发送端与接收端。
pub struct ClientConnection {
    pub ws_sender: SplitSink<ClientWsStream, Message>,
    pub ws_receiver: SplitStream<ClientWsStream>,
}

impl ClientConnection {
    /// 发送一条原始文本消息。
    pub async fn send_text(&mut self, text: String) -> Result<(), WsError> {
        debug!("客户端：准备发送消息: {}", text);
        self.ws_sender.send(Message::Text(text)).await?;
        Ok(())
    }

    /// 发送订阅请求 (`{"request": "live" | "history"}`)。
    pub async fn send_request(&mut self, request: &ClientRequest) -> Result<(), WsError> {
        let text = serde_json::to_string(request)
            .map_err(|e| WsError::SerializationError(format!("订阅请求序列化失败: {}", e)))?;
        self.send_text(text).await?;
        info!("客户端：已发送订阅请求: {}", request.request);
        Ok(())
    }

    /// 发送关闭帧。
    pub async fn close(&mut self) -> Result<(), WsError> {
        self.ws_sender.close().await?;
        Ok(())
    }
}

/// 异步连接到指定的 WebSocket 服务器。
pub async fn connect_client(url_str: &str) -> Result<ClientConnection, WsError> {
    info!("客户端：开始尝试连接到 WebSocket 服务器，URL: {}", url_str);
    let parsed_url = Url::parse(url_str)
        .map_err(|e| WsError::InvalidUrl(format!("无效的 WebSocket URL '{}': {}", url_str, e)))?;

    match connect_async(parsed_url.as_str()).await {
        Ok((ws_stream, response)) => {
            info!("客户端：已成功连接到 {} (HTTP 状态码: {})", url_str, response.status());
            let (ws_sender, ws_receiver) = ws_stream.split();
            Ok(ClientConnection { ws_sender, ws_receiver })
        }
        Err(e) => {
            error!("客户端：连接到 {} 失败，错误: {}", url_str, e);
            Err(WsError::WebSocketProtocolError(e))
        }
    }
}

/// 从接收端读取下一条文本消息，跳过 Ping/Pong 等控制帧。
///
/// # Returns
/// * `Some(Ok(text))` - 收到一条文本消息。
/// * `Some(Err(e))` - 收到二进制消息或发生底层错误。
/// * `None` - 连接已关闭。
pub async fn receive_text(ws_receiver: &mut SplitStream<ClientWsStream>) -> Option<Result<String, WsError>> {
    loop {
        match ws_receiver.next().await {
            Some(Ok(Message::Text(text))) => break Some(Ok(text)),
            Some(Ok(Message::Binary(bin))) => {
                break Some(Err(WsError::Message(format!(
                    "客户端收到了非预期的二进制消息 ({} 字节)",
                    bin.len()
                ))));
            }
            Some(Ok(Message::Close(close_frame))) => {
                debug!("客户端：收到 Close 控制帧: {:?}", close_frame);
                break None;
            }
            Some(Ok(_)) => continue,
            Some(Err(TungsteniteError::ConnectionClosed | TungsteniteError::AlreadyClosed)) => break None,
            Some(Err(e)) => {
                error!("客户端：从 WebSocket 流接收消息时发生底层错误: {}", e);
                break Some(Err(WsError::WebSocketProtocolError(e)));
            }
            None => break None,
        }
    }
}
