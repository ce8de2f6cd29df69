// rust_websocket_utils/src/server/transport.rs

//! 服务端传输层：在原始 `TcpStream` 上完成握手，并把连接拆分为读、写两半。
//!
//! 读半部分 (`WsReader`) 由连接处理任务独占，写半部分 (`WsWriter`) 由该连接唯一的发送任务独占，
//! 两半都被丢弃时底层套接字随之关闭。

use log::debug;
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

use crate::error::WsError;
use crate::frame::{FrameParse, Opcode, decode_frame, encode_close_frame, encode_control_frame};
use crate::handshake::{self, HandshakeRequest};
use crate::message::WsMessage;

/// 正常关闭时使用的状态码。
pub const CLOSE_NORMAL: u16 = 1000;
/// 服务端下线时使用的状态码。
pub const CLOSE_GOING_AWAY: u16 = 1001;

/// 一个已完成握手的服务端 WebSocket 连接。
#[derive(Debug)]
pub struct WsConnection {
    peer_addr: SocketAddr,
    request: HandshakeRequest,
    reader: WsReader,
    writer: WsWriter,
}

impl WsConnection {
    /// 在刚接受的 TCP 流上执行握手。
    ///
    /// 失败时流被丢弃 (套接字关闭)，返回 `WsError::Handshake` 或 I/O 错误。
    pub async fn accept(
        mut stream: TcpStream,
        peer_addr: SocketAddr,
        buffer_size: usize,
    ) -> Result<WsConnection, WsError> {
        let (request, leftover) = handshake::negotiate(&mut stream, buffer_size).await?;
        let (read_half, write_half) = stream.into_split();
        debug!("[传输层] 与 {} 的握手完成，路径: {}", peer_addr, request.path);
        Ok(WsConnection {
            peer_addr,
            request,
            reader: WsReader::new(read_half, leftover, buffer_size),
            writer: WsWriter::new(write_half),
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn request(&self) -> &HandshakeRequest {
        &self.request
    }

    /// 拆分为读、写两半，分别交给不同的任务。
    pub fn split(self) -> (WsReader, WsWriter) {
        (self.reader, self.writer)
    }
}

/// 连接的读半部分，负责把字节流解码为 `WsMessage`。
#[derive(Debug)]
pub struct WsReader {
    half: OwnedReadHalf,
    buf: Vec<u8>,
    read_chunk: usize,
    max_payload: usize,
}

impl WsReader {
    fn new(half: OwnedReadHalf, leftover: Vec<u8>, buffer_size: usize) -> Self {
        Self {
            half,
            buf: leftover,
            read_chunk: buffer_size,
            max_payload: buffer_size,
        }
    }

    /// 读取下一条消息。
    ///
    /// # Returns
    /// * `Ok(Some(message))` - 收到一条完整消息。
    /// * `Ok(None)` - 对端关闭了 TCP 流 (读到 EOF)。
    /// * `Err(e)` - I/O 错误或协议违例，调用方应当结束该连接。
    pub async fn receive_message(&mut self) -> Result<Option<WsMessage>, WsError> {
        loop {
            match decode_frame(&self.buf, self.max_payload)? {
                FrameParse::Complete { frame, consumed } => {
                    self.buf.drain(..consumed);
                    return WsMessage::from_frame(frame).map(Some);
                }
                FrameParse::Incomplete => {
                    self.buf.reserve(self.read_chunk);
                    let read = self.half.read_buf(&mut self.buf).await?;
                    if read == 0 {
                        return Ok(None);
                    }
                }
            }
        }
    }
}

/// 连接的写半部分。`close` 消耗自身，保证关闭只发生一次。
#[derive(Debug)]
pub struct WsWriter {
    half: OwnedWriteHalf,
}

impl WsWriter {
    fn new(half: OwnedWriteHalf) -> Self {
        Self { half }
    }

    /// 写出一个已经编码好的帧。
    pub async fn send_frame(&mut self, frame: &[u8]) -> Result<(), WsError> {
        self.half.write_all(frame).await?;
        Ok(())
    }

    /// 回应客户端的 Ping。
    pub async fn send_pong(&mut self, payload: &[u8]) -> Result<(), WsError> {
        self.send_frame(&encode_control_frame(Opcode::Pong, payload)).await
    }

    /// 尽力发送关闭帧并关闭写方向。对端可能已经不可达，因此忽略写错误。
    pub async fn close(mut self, code: u16) {
        let _ = self.half.write_all(&encode_close_frame(code)).await;
        let _ = self.half.shutdown().await;
    }
}
