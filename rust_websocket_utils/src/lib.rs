//! `rust_websocket_utils` 提供气象站 WebSocket 通信所需的底层功能。
//!
//! 服务端不依赖第三方 WebSocket 实现，握手与帧编解码都在本 crate 中完成；
//! 客户端 (监视器) 则直接使用 `tokio-tungstenite`。
//!
//! 主要模块包括：
//! - `frame`: 帧编解码与 `Sec-WebSocket-Accept` 计算。
//! - `handshake`: HTTP 升级请求的解析与应答。
//! - `message`: 客户端消息 `WsMessage` 以及 JSON 负载的编码辅助函数。
//! - `error`: 库中使用的错误类型 `WsError`。
//! - `server`: 服务端传输层 (`WsConnection` / `WsReader` / `WsWriter`)。
//! - `client`: 客户端传输层与断线重连循环。

pub mod client;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod message;
pub mod server;

pub use error::WsError;
pub use message::WsMessage;
