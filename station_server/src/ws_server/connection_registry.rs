//! WebSocket 连接注册表。
//!
//! 注册表中恰好是当前打开且已完成握手的连接，每个连接最多出现一次。
//! 广播总是在某一时刻的快照上进行：先收集 `Arc<ClientSession>`，释放分片锁之后再入队，
//! 因此并发的注册/注销既不会阻塞广播，也不会被慢客户端阻塞。

use common_models::SubscriptionKind;
use dashmap::DashMap;
use log::{debug, info};
use std::sync::Arc;
use uuid::Uuid;

use crate::ws_server::client_session::ClientSession;

/// 管理所有活动的 WebSocket 客户端会话
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    /// Key: client_id，Value: 会话的共享引用
    clients: DashMap<Uuid, Arc<ClientSession>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册一个刚完成握手的会话。
    pub fn add(&self, session: Arc<ClientSession>) {
        info!(
            "[连接注册表] 新客户端连接: id={}, addr={}",
            session.client_id, session.addr
        );
        self.clients.insert(session.client_id, session);
        debug!("[连接注册表] 当前活动客户端总数: {}", self.clients.len());
    }

    /// 移除一个会话。幂等：会话不存在时返回 `None`。
    pub fn remove(&self, client_id: &Uuid) -> Option<Arc<ClientSession>> {
        match self.clients.remove(client_id) {
            Some((_id, session)) => {
                info!(
                    "[连接注册表] 客户端断开连接: id={}, addr={}, 订阅类型={}",
                    session.client_id,
                    session.addr,
                    session.kind().map(|k| k.to_string()).unwrap_or_else(|| "未分类".to_string())
                );
                debug!("[连接注册表] 移除后当前活动客户端总数: {}", self.clients.len());
                Some(session)
            }
            None => {
                debug!("[连接注册表] 客户端 {} 已不在注册表中", client_id);
                None
            }
        }
    }

    pub fn get(&self, client_id: &Uuid) -> Option<Arc<ClientSession>> {
        self.clients.get(client_id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, client_id: &Uuid) -> bool {
        self.clients.contains_key(client_id)
    }

    /// 所有会话的快照。
    pub fn snapshot(&self) -> Vec<Arc<ClientSession>> {
        self.clients.iter().map(|entry| Arc::clone(entry.value())).collect()
    }

    /// 某一订阅类型下所有会话的快照。尚未分类的会话不包含在内。
    pub fn snapshot_of_kind(&self, kind: SubscriptionKind) -> Vec<Arc<ClientSession>> {
        self.clients
            .iter()
            .filter(|entry| entry.value().kind() == Some(kind))
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// 在快照上对某一订阅类型的每个会话执行 `f`，执行期间不持有任何锁。
    pub fn for_each_of_kind<F>(&self, kind: SubscriptionKind, mut f: F)
    where
        F: FnMut(&Arc<ClientSession>),
    {
        for session in self.snapshot_of_kind(kind) {
            f(&session);
        }
    }

    pub fn count(&self) -> usize {
        self.clients.len()
    }

    pub fn count_of_kind(&self, kind: SubscriptionKind) -> usize {
        self.clients
            .iter()
            .filter(|entry| entry.value().kind() == Some(kind))
            .count()
    }

    /// 移除并关闭所有会话，返回关闭的数量。服务停止时使用。
    pub fn close_all(&self) -> usize {
        let ids: Vec<Uuid> = self.clients.iter().map(|entry| *entry.key()).collect();
        let mut closed = 0;
        for id in ids {
            if let Some((_id, session)) = self.clients.remove(&id) {
                session.close();
                closed += 1;
            }
        }
        if closed > 0 {
            info!("[连接注册表] 已关闭全部 {} 个客户端连接", closed);
        }
        closed
    }
}
