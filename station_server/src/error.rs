use common_models::ModelError;
use rust_websocket_utils::error::WsError;
use thiserror::Error;

/// 应用的主要错误类型
///
/// 单个连接内部的错误 (握手失败、读写失败) 在连接处理任务内消化，不会出现在这里；
/// 真正需要交给调用方处理的只有绑定失败这类启动期错误，以及配置与存储错误。
#[derive(Error, Debug)]
pub enum AppError {
    #[error("无法绑定监听地址 {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("配置错误: {0}")]
    ConfigError(String),

    #[error("历史存储错误: {0}")]
    Storage(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("采样数据无效: {0}")]
    Model(#[from] ModelError),

    #[error("WebSocket 服务错误: {0}")]
    WebSocket(#[from] WsError),
}

impl AppError {
    pub fn bind(addr: impl Into<String>, source: std::io::Error) -> Self {
        AppError::Bind {
            addr: addr.into(),
            source,
        }
    }
}

