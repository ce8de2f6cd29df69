//! 单个连接的处理流程：握手 → 分类 → 初始快照 → 空闲，直到连接关闭。
//!
//! 每个连接对应一个处理任务 (持有读半部分) 和一个发送任务 (持有写半部分)。
//! 无论从哪条路径退出 (包括 panic 与任务被取消)，`RegistrationGuard` 都会把会话从注册表中移除。

use common_models::ws_payloads::ClientRequest;
use common_models::SubscriptionKind;
use log::{debug, info, warn};
use rust_websocket_utils::frame::{encode_control_frame, Opcode};
use rust_websocket_utils::message::WsMessage;
use rust_websocket_utils::server::transport::{WsConnection, WsReader, WsWriter, CLOSE_GOING_AWAY, CLOSE_NORMAL};
use rust_websocket_utils::WsError;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::WebSocketConfig;
use crate::ws_server::broadcast_dispatcher::BroadcastDispatcher;
use crate::ws_server::client_session::{ClientSession, OutboundFrame};
use crate::ws_server::connection_registry::ConnectionRegistry;

/// 发送关闭帧的最长等待时间，对端不再读取时不至于卡住。
const CLOSE_FRAME_TIMEOUT: Duration = Duration::from_millis(500);

/// 连接处理任务共享的依赖。
#[derive(Clone)]
pub struct HandlerContext {
    pub registry: Arc<ConnectionRegistry>,
    pub dispatcher: Arc<BroadcastDispatcher>,
    pub config: Arc<WebSocketConfig>,
    /// 服务的根关闭令牌，每个连接的关闭信号都是它的子令牌
    pub shutdown: CancellationToken,
}

/// 析构时注销会话并触发其关闭信号。
struct RegistrationGuard {
    registry: Arc<ConnectionRegistry>,
    session: Arc<ClientSession>,
}

impl Drop for RegistrationGuard {
    fn drop(&mut self) {
        self.session.close();
        self.registry.remove(&self.session.client_id);
    }
}

/// 分类阶段的结果。
enum Classification {
    Kind(SubscriptionKind),
    /// 分类期间连接已关闭或出错
    Closed,
}

/// 处理一个刚被接受的 TCP 连接，直到它关闭。
///
/// 连接的关闭信号是服务根令牌的子令牌：服务停止或分发器判定写入失败时都会触发它。
pub async fn handle_connection(stream: TcpStream, peer: SocketAddr, ctx: HandlerContext) {
    let config = Arc::clone(&ctx.config);
    let close_signal = ctx.shutdown.child_token();

    let accepted = tokio::select! {
        _ = close_signal.cancelled() => {
            debug!("[连接处理] 服务停止，放弃与 {} 的握手", peer);
            return;
        }
        result = tokio::time::timeout(
            config.handshake_timeout(),
            WsConnection::accept(stream, peer, config.read_buffer_size),
        ) => result,
    };
    let connection = match accepted {
        Ok(Ok(connection)) => connection,
        Ok(Err(e)) => {
            warn!("[握手] 与 {} 的握手失败，关闭连接: {}", peer, e);
            return;
        }
        Err(_) => {
            warn!("[握手] 与 {} 的握手在 {:?} 内未完成，关闭连接", peer, config.handshake_timeout());
            return;
        }
    };

    let (mut reader, writer) = connection.split();
    let (tx, rx) = mpsc::channel::<OutboundFrame>(config.outbound_queue_capacity.max(1));
    let session = Arc::new(ClientSession::new(peer, tx, close_signal.clone()));
    ctx.registry.add(Arc::clone(&session));
    let _guard = RegistrationGuard {
        registry: Arc::clone(&ctx.registry),
        session: Arc::clone(&session),
    };

    let writer_task = tokio::spawn(run_writer(writer, rx, Arc::clone(&session), ctx.shutdown.clone()));

    let kind = match classify(&mut reader, &session, config.classification_timeout()).await {
        Classification::Kind(kind) => kind,
        Classification::Closed => {
            finish(&session, writer_task).await;
            return;
        }
    };

    // 先入队初始快照再设置订阅类型，保证快照一定排在后续广播之前
    let activated = match kind {
        SubscriptionKind::Live => ctx.dispatcher.activate_live(&session).await,
        SubscriptionKind::History => activate_history(&session, &ctx).await,
    };
    if let Err(e) = activated {
        warn!("[连接处理] 客户端 {} 的初始快照入队失败: {}", session.client_id, e);
        finish(&session, writer_task).await;
        return;
    }
    info!("[连接处理] 客户端 {} ({}) 已分类为 {}", session.client_id, peer, kind);

    run_idle(&mut reader, &session, &ctx).await;
    finish(&session, writer_task).await;
}

/// `history` 连接的初始快照：最近的历史记录或 `unavailable` 标记。
async fn activate_history(session: &ClientSession, ctx: &HandlerContext) -> Result<(), WsError> {
    match ctx.dispatcher.history_snapshot_frame().await {
        Ok(frame) => session.try_enqueue(frame)?,
        Err(e) => warn!("[连接处理] 无法为 {} 生成历史快照: {}", session.addr, e),
    }
    session.set_kind(SubscriptionKind::History);
    Ok(())
}

/// 等待第一条应用消息来确定订阅类型。
///
/// Ping/Pong 不算应用消息：Ping 立即回复 Pong，两者都不结束分类。
/// 截止时间从进入分类时固定，超时、格式错误或二进制消息一律按 `live` 处理。
async fn classify(reader: &mut WsReader, session: &ClientSession, timeout: Duration) -> Classification {
    let deadline = Instant::now() + timeout;
    loop {
        let received = tokio::select! {
            _ = session.close_signal().cancelled() => return Classification::Closed,
            received = tokio::time::timeout_at(deadline, reader.receive_message()) => received,
        };

        match received {
            Err(_) => {
                debug!("[连接处理] 客户端 {} 在 {:?} 内未发送订阅请求，按 live 处理", session.client_id, timeout);
                return Classification::Kind(SubscriptionKind::Live);
            }
            Ok(Ok(Some(message @ WsMessage::Text(_)))) => {
                return match message.parse_json::<ClientRequest>() {
                    Ok(request) => Classification::Kind(request.request),
                    Err(e) => {
                        debug!("[连接处理] 客户端 {} 的订阅请求无法解析 ({})，按 live 处理", session.client_id, e);
                        Classification::Kind(SubscriptionKind::Live)
                    }
                };
            }
            Ok(Ok(Some(WsMessage::Binary(_)))) => {
                debug!("[连接处理] 客户端 {} 的首条消息是二进制，按 live 处理", session.client_id);
                return Classification::Kind(SubscriptionKind::Live);
            }
            Ok(Ok(Some(WsMessage::Ping(payload)))) => {
                if let Err(e) = session.try_enqueue(Arc::from(encode_control_frame(Opcode::Pong, &payload))) {
                    warn!("[连接处理] 分类期间向客户端 {} 回复 Pong 失败: {}", session.client_id, e);
                    return Classification::Closed;
                }
            }
            Ok(Ok(Some(WsMessage::Pong(_)))) => {}
            Ok(Ok(Some(WsMessage::Close(code)))) => {
                debug!("[连接处理] 客户端 {} 在分类前发送了关闭帧: {:?}", session.client_id, code);
                return Classification::Closed;
            }
            Ok(Ok(None)) => {
                debug!("[连接处理] 客户端 {} 在分类前断开", session.client_id);
                return Classification::Closed;
            }
            Ok(Err(e)) => {
                warn!("[连接处理] 读取客户端 {} 的订阅请求失败: {}", session.client_id, e);
                return Classification::Closed;
            }
        }
    }
}

/// 分类之后的空闲阶段：回应 Ping，按需补发历史或最近采样，直到连接关闭。
async fn run_idle(reader: &mut WsReader, session: &ClientSession, ctx: &HandlerContext) {
    loop {
        let received = tokio::select! {
            _ = session.close_signal().cancelled() => {
                debug!("[连接处理] 客户端 {} 收到关闭信号", session.client_id);
                return;
            }
            received = reader.receive_message() => received,
        };

        let reply = match received {
            Ok(Some(message @ WsMessage::Text(_))) => match message.parse_json::<ClientRequest>() {
                Ok(ClientRequest { request: SubscriptionKind::History }) => {
                    match ctx.dispatcher.history_snapshot_frame().await {
                        Ok(frame) => Some(frame),
                        Err(e) => {
                            warn!("[连接处理] 无法为客户端 {} 生成历史记录: {}", session.client_id, e);
                            None
                        }
                    }
                }
                Ok(ClientRequest { request: SubscriptionKind::Live }) => ctx.dispatcher.live_snapshot_frame().await,
                Err(e) => {
                    debug!("[连接处理] 忽略客户端 {} 的无法识别的消息: {}", session.client_id, e);
                    None
                }
            },
            Ok(Some(WsMessage::Ping(payload))) => Some(Arc::from(encode_control_frame(Opcode::Pong, &payload))),
            Ok(Some(WsMessage::Pong(_))) | Ok(Some(WsMessage::Binary(_))) => None,
            Ok(Some(WsMessage::Close(code))) => {
                info!("[连接处理] 客户端 {} 主动关闭连接: {:?}", session.client_id, code);
                return;
            }
            Ok(None) => {
                info!("[连接处理] 客户端 {} 的连接已被对端关闭", session.client_id);
                return;
            }
            Err(e) => {
                warn!("[连接处理] 读取客户端 {} 失败，结束连接: {}", session.client_id, e);
                return;
            }
        };

        if let Some(frame) = reply {
            if let Err(e) = session.try_enqueue(frame) {
                warn!("[连接处理] 向客户端 {} 回复失败，结束连接: {}", session.client_id, e);
                return;
            }
        }
    }
}

/// 触发关闭信号并等待发送任务结束；发送任务退出时写半部分被丢弃，套接字随之关闭。
async fn finish(session: &ClientSession, writer_task: tokio::task::JoinHandle<()>) {
    session.close();
    if let Err(e) = writer_task.await {
        warn!("[连接处理] 客户端 {} 的发送任务异常结束: {}", session.client_id, e);
    }
}

/// 发送任务：按 FIFO 顺序写出队列中的帧。写入失败时触发会话的关闭信号。
async fn run_writer(
    mut writer: WsWriter,
    mut rx: mpsc::Receiver<OutboundFrame>,
    session: Arc<ClientSession>,
    server_shutdown: CancellationToken,
) {
    let mut failed = false;
    loop {
        let frame = tokio::select! {
            biased;
            _ = session.close_signal().cancelled() => break,
            frame = rx.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };
        let written = tokio::select! {
            _ = session.close_signal().cancelled() => break,
            written = writer.send_frame(&frame) => written,
        };
        if let Err(e) = written {
            warn!("[发送任务] 向客户端 {} 写入失败: {}", session.client_id, e);
            failed = true;
            session.close();
            break;
        }
    }

    if !failed {
        let code = if server_shutdown.is_cancelled() {
            CLOSE_GOING_AWAY
        } else {
            CLOSE_NORMAL
        };
        let _ = tokio::time::timeout(CLOSE_FRAME_TIMEOUT, writer.close(code)).await;
    }
    debug!("[发送任务] 客户端 {} 的发送任务已结束", session.client_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::MemoryHistoryStore;
    use crate::state::LastKnownSample;
    use common_models::{Condition, Sample};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    const UPGRADE_REQUEST: &[u8] = b"GET / HTTP/1.1\r\nHost: station\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\
Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\nSec-WebSocket-Version: 13\r\n\r\n";

    #[allow(deprecated)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_write_error_after_peer_reset_leads_to_deregistration() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (stream, peer) = listener.accept().await.unwrap();
            (WsConnection::accept(stream, peer, 1024).await.unwrap(), peer)
        });

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(UPGRADE_REQUEST).await.unwrap();
        let mut response = [0u8; 512];
        let n = client.read(&mut response).await.unwrap();
        assert!(response[..n].starts_with(b"HTTP/1.1 101"));
        let (connection, peer) = server.await.unwrap();
        // 读半部分保持存活且不读取，只让发送任务观察到对端复位
        let (_reader, writer) = connection.split();

        // SO_LINGER 为 0 时关闭套接字会发送 RST
        client.set_linger(Some(Duration::ZERO)).unwrap();
        drop(client);

        let registry = Arc::new(ConnectionRegistry::new());
        let dispatcher = BroadcastDispatcher::new(
            Arc::clone(&registry),
            LastKnownSample::new(),
            Arc::new(MemoryHistoryStore::new(4)),
            10,
        );
        let (tx, rx) = mpsc::channel(8);
        let session = Arc::new(ClientSession::new(peer, tx, CancellationToken::new()));
        session.set_kind(SubscriptionKind::Live);
        registry.add(Arc::clone(&session));
        let writer_task = tokio::spawn(run_writer(writer, rx, Arc::clone(&session), CancellationToken::new()));

        // 写入失败后发送任务退出，之后的一次发布发现队列已关闭并注销该连接
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut temperature = 10.0;
        while registry.count() > 0 && Instant::now() < deadline {
            dispatcher
                .publish_sample(Sample::new(temperature, 50.0, 1010.0, Condition::NormalDay))
                .await
                .unwrap();
            temperature += 0.1;
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        assert_eq!(registry.count(), 0);
        assert!(session.is_closing());
        tokio::time::timeout(Duration::from_secs(1), writer_task)
            .await
            .expect("发送任务应在写入失败后结束")
            .unwrap();
    }
}
