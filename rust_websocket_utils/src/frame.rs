// rust_websocket_utils/src/frame.rs

//! 手写的 RFC6455 帧编解码。
//!
//! 服务端发往客户端的帧总是单帧、不分片、不加掩码；
//! 客户端发来的帧按协议带掩码，这里负责解掩码，但不做分片重组。

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64_STANDARD};
use sha1::{Digest, Sha1};

use crate::error::WsError;

/// RFC6455 规定的固定 GUID，用于计算 `Sec-WebSocket-Accept`。
pub const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// 控制帧负载的最大长度。
pub const MAX_CONTROL_PAYLOAD: usize = 125;

/// 帧操作码。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    Continuation = 0x0,
    Text = 0x1,
    Binary = 0x2,
    Close = 0x8,
    Ping = 0x9,
    Pong = 0xA,
}

impl Opcode {
    fn from_bits(bits: u8) -> Option<Opcode> {
        match bits {
            0x0 => Some(Opcode::Continuation),
            0x1 => Some(Opcode::Text),
            0x2 => Some(Opcode::Binary),
            0x8 => Some(Opcode::Close),
            0x9 => Some(Opcode::Ping),
            0xA => Some(Opcode::Pong),
            _ => None,
        }
    }

    pub fn is_control(self) -> bool {
        (self as u8) & 0x8 != 0
    }
}

/// 一个已解码 (已解掩码) 的完整帧。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    pub opcode: Opcode,
    pub payload: Vec<u8>,
}

/// `decode_frame` 的结果。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameParse {
    /// 缓冲区中有一个完整的帧，`consumed` 为它占用的字节数。
    Complete { frame: Frame, consumed: usize },
    /// 缓冲区中的数据还不足以构成一个帧。
    Incomplete,
}

/// 把文本负载编码为单个、未分片、未加掩码的文本帧 (首字节 `0x81`)。
///
/// 长度字段按 RFC6455 的可变长度规则编码：
/// 小于 126 直接写入第二个字节；小于 65536 写入标记 126 加 2 字节大端长度；
/// 否则写入标记 127 加 8 字节大端长度。
pub fn encode_text_frame(payload: &[u8]) -> Vec<u8> {
    encode_frame(Opcode::Text, payload)
}

/// 编码服务端的控制帧 (关闭、Pong 等)。负载超过 125 字节的部分会被截断。
pub fn encode_control_frame(opcode: Opcode, payload: &[u8]) -> Vec<u8> {
    let end = payload.len().min(MAX_CONTROL_PAYLOAD);
    encode_frame(opcode, &payload[..end])
}

/// 编码带状态码的关闭帧。
pub fn encode_close_frame(code: u16) -> Vec<u8> {
    encode_control_frame(Opcode::Close, &code.to_be_bytes())
}

fn encode_frame(opcode: Opcode, payload: &[u8]) -> Vec<u8> {
    let len = payload.len();
    let mut frame = Vec::with_capacity(len + 10);
    frame.push(0x80 | opcode as u8);
    if len < 126 {
        frame.push(len as u8);
    } else if len < 65536 {
        frame.push(126);
        frame.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        frame.push(127);
        frame.extend_from_slice(&(len as u64).to_be_bytes());
    }
    frame.extend_from_slice(payload);
    frame
}

/// 根据客户端提供的 `Sec-WebSocket-Key` 计算 `Sec-WebSocket-Accept`。
///
/// `base64(sha1(key + GUID))`，纯函数。
pub fn compute_accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(WEBSOCKET_GUID.as_bytes());
    BASE64_STANDARD.encode(hasher.finalize())
}

/// 从缓冲区头部解码一个帧。
///
/// 带掩码的帧 (客户端发来的帧) 会被解掩码；不带掩码的帧原样返回，
/// 这样同一个函数也能用来检查服务端自己编码出来的帧。
///
/// 分片帧 (FIN=0 或续帧操作码) 与设置了 RSV 位的帧直接视为协议错误。
pub fn decode_frame(buf: &[u8], max_payload: usize) -> Result<FrameParse, WsError> {
    if buf.len() < 2 {
        return Ok(FrameParse::Incomplete);
    }
    let first = buf[0];
    let second = buf[1];

    if first & 0x70 != 0 {
        return Err(WsError::Protocol("帧设置了未协商的 RSV 位".to_string()));
    }
    let fin = first & 0x80 != 0;
    let opcode = Opcode::from_bits(first & 0x0F)
        .ok_or_else(|| WsError::Protocol(format!("未知的操作码: {:#x}", first & 0x0F)))?;
    let masked = second & 0x80 != 0;

    let (declared_len, mut offset) = match second & 0x7F {
        126 => {
            if buf.len() < 4 {
                return Ok(FrameParse::Incomplete);
            }
            (u16::from_be_bytes([buf[2], buf[3]]) as u64, 4)
        }
        127 => {
            if buf.len() < 10 {
                return Ok(FrameParse::Incomplete);
            }
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&buf[2..10]);
            (u64::from_be_bytes(raw), 10)
        }
        short => (short as u64, 2),
    };

    if opcode.is_control() && (declared_len > MAX_CONTROL_PAYLOAD as u64 || !fin) {
        return Err(WsError::Protocol("控制帧过长或被分片".to_string()));
    }
    if !fin || opcode == Opcode::Continuation {
        return Err(WsError::Protocol("不支持分片帧".to_string()));
    }
    if declared_len > max_payload as u64 {
        return Err(WsError::Protocol(format!(
            "帧负载 {} 字节超过上限 {} 字节",
            declared_len, max_payload
        )));
    }
    let len = declared_len as usize;

    let mask = if masked {
        if buf.len() < offset + 4 {
            return Ok(FrameParse::Incomplete);
        }
        let key = [buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]];
        offset += 4;
        Some(key)
    } else {
        None
    };

    if buf.len() < offset + len {
        return Ok(FrameParse::Incomplete);
    }
    let mut payload = buf[offset..offset + len].to_vec();
    if let Some(key) = mask {
        for (i, byte) in payload.iter_mut().enumerate() {
            *byte ^= key[i % 4];
        }
    }

    Ok(FrameParse::Complete {
        frame: Frame { fin, opcode, payload },
        consumed: offset + len,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 按客户端规则构造一个带掩码的帧。
    fn masked_client_frame(opcode: Opcode, payload: &[u8], key: [u8; 4]) -> Vec<u8> {
        let mut frame = encode_frame(opcode, payload);
        let header_len = frame.len() - payload.len();
        frame[1] |= 0x80;
        let mut masked = frame[..header_len].to_vec();
        masked.extend_from_slice(&key);
        masked.extend(payload.iter().enumerate().map(|(i, b)| b ^ key[i % 4]));
        masked
    }

    /// 按 RFC6455 规则从帧头读出长度字段。
    fn declared_length(frame: &[u8]) -> (u64, usize) {
        match frame[1] & 0x7F {
            126 => (u16::from_be_bytes([frame[2], frame[3]]) as u64, 4),
            127 => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&frame[2..10]);
                (u64::from_be_bytes(raw), 10)
            }
            short => (short as u64, 2),
        }
    }

    #[test]
    fn test_length_field_boundaries() {
        for len in [0usize, 1, 125, 126, 127, 65535, 65536] {
            let payload = vec![b'x'; len];
            let frame = encode_text_frame(&payload);
            assert_eq!(frame[0], 0x81, "长度 {} 的帧首字节错误", len);
            assert_eq!(frame[1] & 0x80, 0, "服务端帧不应带掩码");
            let (declared, header_len) = declared_length(&frame);
            assert_eq!(declared, len as u64, "长度 {} 的长度字段解码结果不一致", len);
            let expected_header = if len < 126 { 2 } else if len < 65536 { 4 } else { 10 };
            assert_eq!(header_len, expected_header);
            assert_eq!(frame.len(), header_len + len);
            assert_eq!(&frame[header_len..], payload.as_slice());
        }
    }

    #[test]
    fn test_accept_key_matches_rfc_vector() {
        assert_eq!(
            compute_accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn test_decode_masked_client_text_frame() {
        let text = br#"{"request":"history"}"#;
        let frame = masked_client_frame(Opcode::Text, text, [0x37, 0xfa, 0x21, 0x3d]);
        match decode_frame(&frame, 1024).unwrap() {
            FrameParse::Complete { frame: decoded, consumed } => {
                assert_eq!(consumed, frame.len());
                assert_eq!(decoded.opcode, Opcode::Text);
                assert_eq!(decoded.payload, text.to_vec());
            }
            FrameParse::Incomplete => panic!("完整的帧被判定为不完整"),
        }
    }

    #[test]
    fn test_decode_reports_incomplete_and_leaves_remainder() {
        let frame = masked_client_frame(Opcode::Text, b"hello", [1, 2, 3, 4]);
        assert_eq!(decode_frame(&frame[..frame.len() - 1], 1024).unwrap(), FrameParse::Incomplete);
        assert_eq!(decode_frame(&frame[..1], 1024).unwrap(), FrameParse::Incomplete);

        let mut two = frame.clone();
        two.extend_from_slice(&masked_client_frame(Opcode::Ping, b"p", [9, 9, 9, 9]));
        match decode_frame(&two, 1024).unwrap() {
            FrameParse::Complete { consumed, .. } => assert_eq!(consumed, frame.len()),
            FrameParse::Incomplete => panic!("第一个帧应当完整"),
        }
    }

    #[test]
    fn test_decode_rejects_fragments_and_oversized_frames() {
        let mut fragment = masked_client_frame(Opcode::Text, b"part", [1, 1, 1, 1]);
        fragment[0] &= 0x7F;
        assert!(matches!(decode_frame(&fragment, 1024), Err(WsError::Protocol(_))));

        let big = masked_client_frame(Opcode::Text, &[b'a'; 300], [1, 1, 1, 1]);
        assert!(matches!(decode_frame(&big, 256), Err(WsError::Protocol(_))));
    }

    #[test]
    fn test_close_frame_carries_status_code() {
        let frame = encode_close_frame(1001);
        assert_eq!(frame, vec![0x88, 0x02, 0x03, 0xE9]);
        let pong = encode_control_frame(Opcode::Pong, &[0u8; 200]);
        assert_eq!(pong[1] as usize, MAX_CONTROL_PAYLOAD);
    }
}
