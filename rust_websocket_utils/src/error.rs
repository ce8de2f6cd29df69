// rust_websocket_utils/src/error.rs

//! 定义 WebSocket 工具库相关的错误类型。

use thiserror::Error;

/// WebSocket 工具库的统一错误类型。
#[derive(Error, Debug)]
pub enum WsError {
    /// 当 serde 序列化失败时返回。
    #[error("序列化错误: {0}")]
    SerializationError(String),

    /// 当 serde 反序列化失败时返回。
    #[error("反序列化错误: {0}")]
    DeserializationError(String),

    /// 客户端传输层 (tokio-tungstenite) 报告的协议错误。
    #[error("WebSocket协议错误: {0}")]
    WebSocketProtocolError(#[from] tokio_tungstenite::tungstenite::Error),

    /// 底层 I/O 错误。
    #[error("I/O错误: {0}")]
    IoError(#[from] std::io::Error),

    /// 握手请求缺少必需的头部，或请求在一次读取中没有完整到达。
    /// 对该连接尝试而言是终结性的，不会重试。
    #[error("握手失败: {0}")]
    Handshake(String),

    /// 服务端解码客户端帧时发现的协议违例 (例如分片帧、超长控制帧)。
    #[error("帧协议错误: {0}")]
    Protocol(String),

    /// 对端已关闭连接。
    #[error("连接已关闭")]
    ConnectionClosed,

    /// 连接超时错误。
    #[error("连接超时")]
    ConnectionTimeout,

    /// 无效的 URL 格式。
    #[error("无效的URL: {0}")]
    InvalidUrl(String),

    /// 未连接错误，当尝试在未建立连接时进行操作。
    #[error("未连接")]
    NotConnected,

    /// 通用消息错误，用于其他未明确分类的错误。
    #[error("消息错误: {0}")]
    Message(String),
}

impl WsError {
    /// 是否表示对端已经不可达，调用方应当结束该连接。
    pub fn is_connection_lost(&self) -> bool {
        matches!(
            self,
            WsError::IoError(_) | WsError::ConnectionClosed | WsError::Protocol(_)
        )
    }
}
