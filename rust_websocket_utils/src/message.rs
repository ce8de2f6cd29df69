// rust_websocket_utils/src/message.rs

//! 服务端从客户端收到的消息，以及 JSON 负载与文本帧之间的转换辅助函数。

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::WsError;
use crate::frame::{Frame, Opcode, encode_text_frame};

/// 客户端发来的一条完整消息 (已解掩码)。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsMessage {
    Text(String),
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    /// 关闭帧，携带可选的状态码。
    Close(Option<u16>),
}

impl WsMessage {
    /// 把解码后的帧转换成消息。续帧在解码阶段就已被拒绝。
    pub fn from_frame(frame: Frame) -> Result<WsMessage, WsError> {
        match frame.opcode {
            Opcode::Text => String::from_utf8(frame.payload)
                .map(WsMessage::Text)
                .map_err(|e| WsError::Protocol(format!("文本帧不是合法的 UTF-8: {}", e))),
            Opcode::Binary => Ok(WsMessage::Binary(frame.payload)),
            Opcode::Ping => Ok(WsMessage::Ping(frame.payload)),
            Opcode::Pong => Ok(WsMessage::Pong(frame.payload)),
            Opcode::Close => {
                let code = (frame.payload.len() >= 2)
                    .then(|| u16::from_be_bytes([frame.payload[0], frame.payload[1]]));
                Ok(WsMessage::Close(code))
            }
            Opcode::Continuation => Err(WsError::Protocol("意外的续帧".to_string())),
        }
    }

    /// 将文本消息的内容反序列化为目标类型 `T`。非文本消息直接返回错误。
    pub fn parse_json<T: DeserializeOwned>(&self) -> Result<T, WsError> {
        match self {
            WsMessage::Text(text) => serde_json::from_str(text).map_err(|e| {
                WsError::DeserializationError(format!("消息反序列化失败: {}, 原始文本: '{}'", e, text))
            }),
            other => Err(WsError::DeserializationError(format!(
                "期望文本消息，实际收到: {:?}",
                other
            ))),
        }
    }
}

/// 把任意可序列化的负载编码为 JSON 并封装成一个文本帧。
pub fn encode_json_frame<T: Serialize>(payload: &T) -> Result<Vec<u8>, WsError> {
    let json = serde_json::to_string(payload)
        .map_err(|e| WsError::SerializationError(format!("序列化载荷失败: {}", e)))?;
    Ok(encode_text_frame(json.as_bytes()))
}
