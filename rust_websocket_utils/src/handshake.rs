// rust_websocket_utils/src/handshake.rs

//! 服务端 WebSocket 握手协商。
//!
//! 只读取一次 (最多 `buffer_size` 字节)，不做请求头的流式重组：
//! 一个被拆成多次到达的请求会被视为握手失败。失败对本次连接尝试是终结性的。

use log::{debug, warn};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::WsError;
use crate::frame::compute_accept_key;

/// 握手失败时尽力回写给客户端的响应。
const BAD_REQUEST_RESPONSE: &[u8] =
    b"HTTP/1.1 400 Bad Request\r\nConnection: close\r\nContent-Length: 0\r\n\r\n";

/// 从升级请求中提取出的信息。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeRequest {
    /// 请求行中的路径，缺省为 `/`。
    pub path: String,
    /// 客户端提供的 `Sec-WebSocket-Key`。
    pub key: String,
}

/// 解析原始的 HTTP 升级请求。
///
/// # Returns
/// * `Ok((request, consumed))` - `consumed` 为请求头 (含结尾空行) 占用的字节数，
///   其后的字节属于帧数据流。
/// * `Err(WsError::Handshake)` - 请求头不完整、缺少 `Sec-WebSocket-Key`，或没有 `Upgrade: websocket`。
pub fn parse_upgrade_request(raw: &[u8]) -> Result<(HandshakeRequest, usize), WsError> {
    let head_end = raw
        .windows(4)
        .position(|window| window == b"\r\n\r\n")
        .ok_or_else(|| WsError::Handshake("请求头不完整 (一次读取内未收到结尾空行)".to_string()))?;
    let head = std::str::from_utf8(&raw[..head_end])
        .map_err(|e| WsError::Handshake(format!("请求头不是合法的 UTF-8: {}", e)))?;

    let mut lines = head.split("\r\n");
    let path = lines
        .next()
        .and_then(|request_line| request_line.split_whitespace().nth(1))
        .unwrap_or("/")
        .to_string();

    let mut key = None;
    let mut upgrade_to_websocket = false;
    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let name = name.trim();
        let value = value.trim();
        if name.eq_ignore_ascii_case("Sec-WebSocket-Key") {
            if !value.is_empty() {
                key = Some(value.to_string());
            }
        } else if name.eq_ignore_ascii_case("Upgrade") {
            upgrade_to_websocket = value
                .split(',')
                .any(|token| token.trim().eq_ignore_ascii_case("websocket"));
        }
    }

    if !upgrade_to_websocket {
        return Err(WsError::Handshake("缺少 `Upgrade: websocket` 头".to_string()));
    }
    let key = key.ok_or_else(|| WsError::Handshake("缺少 `Sec-WebSocket-Key` 头".to_string()))?;

    Ok((HandshakeRequest { path, key }, head_end + 4))
}

/// 构造 HTTP 101 响应。
pub fn build_accept_response(client_key: &str) -> String {
    format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n\r\n",
        compute_accept_key(client_key)
    )
}

/// 在刚接受的流上完成握手。
///
/// 成功时返回解析出的请求，以及读取时多收到的、属于帧数据流的字节。
/// 失败时尽力回写 400 响应，由调用方关闭套接字。
pub async fn negotiate<S>(
    stream: &mut S,
    buffer_size: usize,
) -> Result<(HandshakeRequest, Vec<u8>), WsError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; buffer_size];
    let read = stream.read(&mut buf).await?;
    if read == 0 {
        return Err(WsError::ConnectionClosed);
    }

    let (request, consumed) = match parse_upgrade_request(&buf[..read]) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!("[握手] 拒绝升级请求: {}", e);
            // 对端可能已经断开，写失败无需处理
            let _ = stream.write_all(BAD_REQUEST_RESPONSE).await;
            return Err(e);
        }
    };

    stream.write_all(build_accept_response(&request.key).as_bytes()).await?;
    stream.flush().await?;
    debug!("[握手] 升级成功，路径: {}，多读取字节: {}", request.path, read - consumed);

    Ok((request, buf[consumed..read].to_vec()))
}
