// rust_websocket_utils/src/client/mod.rs

//! WebSocket 客户端模块。
//!
//! - `transport`: 基于 `tokio-tungstenite` 的连接建立与文本收发。
//! - `reconnect`: 断线重连循环，按 `RetryPolicy` 重试，并通过事件通道通知上层。

pub mod reconnect;
pub mod transport;
