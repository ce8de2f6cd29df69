use chrono::{DateTime, Utc};
use common_models::SubscriptionKind;
use rust_websocket_utils::error::WsError;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// 已编码好的出站帧。同一轮广播只编码一次，各连接共享同一份字节。
pub type OutboundFrame = Arc<[u8]>;

/// 代表一个已完成握手的 WebSocket 客户端的会话状态及相关句柄。
///
/// 套接字本身不在这里：读半部分归连接处理任务独占，写半部分归该连接的发送任务独占。
/// 其他模块 (广播分发器) 只能通过 `sender` 把帧放入发送队列，队列由唯一的发送任务按 FIFO 顺序写出，
/// 因此同一连接上的消息顺序与发布顺序一致。
#[derive(Debug)]
pub struct ClientSession {
    /// 服务端在会话创建时生成的唯一标识符 (UUID v4)。
    pub client_id: Uuid,

    /// 客户端的源网络地址。
    pub addr: SocketAddr,

    /// 会话创建时间 (UTC)。
    pub creation_time: DateTime<Utc>,

    /// 订阅类型，只在分类阶段设置一次，之后不再改变。未设置时不参与任何广播。
    kind: OnceLock<SubscriptionKind>,

    /// 发送队列。
    sender: mpsc::Sender<OutboundFrame>,

    /// 关闭信号。触发后连接处理任务与发送任务都会尽快退出，套接字随之关闭。
    close_signal: CancellationToken,
}

impl ClientSession {
    pub fn new(addr: SocketAddr, sender: mpsc::Sender<OutboundFrame>, close_signal: CancellationToken) -> Self {
        Self {
            client_id: Uuid::new_v4(),
            addr,
            creation_time: Utc::now(),
            kind: OnceLock::new(),
            sender,
            close_signal,
        }
    }

    pub fn kind(&self) -> Option<SubscriptionKind> {
        self.kind.get().copied()
    }

    /// 设置订阅类型；已经设置过时返回 `false` 并保持原值。
    pub fn set_kind(&self, kind: SubscriptionKind) -> bool {
        self.kind.set(kind).is_ok()
    }

    /// 非阻塞地把一帧放入发送队列。
    ///
    /// 队列已满 (客户端读得太慢) 或已关闭 (发送任务已退出) 都视为该连接的写入失败。
    pub fn try_enqueue(&self, frame: OutboundFrame) -> Result<(), WsError> {
        self.sender.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => WsError::Message(format!("客户端 {} 的发送队列已满", self.client_id)),
            TrySendError::Closed(_) => WsError::ConnectionClosed,
        })
    }

    /// 请求关闭该连接。可重复调用。
    pub fn close(&self) {
        self.close_signal.cancel();
    }

    pub fn is_closing(&self) -> bool {
        self.close_signal.is_cancelled()
    }

    pub fn close_signal(&self) -> &CancellationToken {
        &self.close_signal
    }
}
