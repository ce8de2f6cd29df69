//! 广播分发器：把实时读数推送给所有 `live` 连接，把历史记录推送给所有 `history` 连接。
//!
//! 每一轮广播只编码一次帧，然后在注册表快照上逐个 `try_enqueue`。
//! 某个连接入队失败只影响它自己：该连接被注销并触发关闭信号，本轮继续发给其余连接。

use common_models::ws_payloads::{HistoryData, HistoryResponse, LiveUpdate};
use common_models::{Sample, SubscriptionKind};
use log::{debug, error, warn};
use rust_websocket_utils::message::encode_json_frame;
use rust_websocket_utils::WsError;
use std::sync::Arc;

use crate::error::AppError;
use crate::history::HistoryStore;
use crate::state::LastKnownSample;
use crate::ws_server::client_session::{ClientSession, OutboundFrame};
use crate::ws_server::connection_registry::ConnectionRegistry;

/// 一轮广播的结果。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// 成功放入发送队列的连接数
    pub delivered: usize,
    /// 入队失败并因此被注销的连接数
    pub failed: usize,
}

pub struct BroadcastDispatcher {
    registry: Arc<ConnectionRegistry>,
    last_known: LastKnownSample,
    history: Arc<dyn HistoryStore>,
    history_length: usize,
}

impl BroadcastDispatcher {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        last_known: LastKnownSample,
        history: Arc<dyn HistoryStore>,
        history_length: usize,
    ) -> Self {
        Self {
            registry,
            last_known,
            history,
            history_length,
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn last_known(&self) -> &LastKnownSample {
        &self.last_known
    }

    /// 发布一条新采样。
    ///
    /// 读数无效或序列化失败时记录日志并跳过本轮，最近采样也不会被更新。
    pub async fn publish_sample(&self, sample: Sample) -> Result<BroadcastReport, AppError> {
        if let Err(e) = sample.validate() {
            warn!("[广播] 采样无效，跳过本轮广播: {}", e);
            return Err(AppError::Model(e));
        }
        let frame = encode_json_frame(&LiveUpdate::from(&sample)).map_err(|e| {
            error!("[广播] 实时读数序列化失败，跳过本轮广播: {}", e);
            AppError::Serialization(e.to_string())
        })?;
        // 写锁覆盖更新与广播，正在激活的 live 连接不会错过这条采样
        let frame: OutboundFrame = Arc::from(frame);
        let report = self
            .last_known
            .store_and(sample, |_| self.broadcast(SubscriptionKind::Live, frame))
            .await;
        debug!(
            "[广播] 实时读数已分发: 成功 {}，失败 {}",
            report.delivered, report.failed
        );
        Ok(report)
    }

    /// 把一份历史记录推送给所有 `history` 连接。
    pub fn publish_history(&self, data: &HistoryData) -> Result<BroadcastReport, AppError> {
        let frame = Self::encode_history(data)?;
        let report = self.broadcast(SubscriptionKind::History, frame);
        debug!(
            "[广播] 历史记录已分发: 成功 {}，失败 {}",
            report.delivered, report.failed
        );
        Ok(report)
    }

    /// 读取最近的历史并推送给所有 `history` 连接。
    pub async fn refresh_history(&self) -> Result<BroadcastReport, AppError> {
        if self.registry.count_of_kind(SubscriptionKind::History) == 0 {
            return Ok(BroadcastReport::default());
        }
        let data = self.read_history().await;
        self.publish_history(&data)
    }

    /// 激活一个刚分类为 `live` 的连接：入队最近采样 (若有) 后设置订阅类型。
    ///
    /// 两步都在最近采样的读锁内完成，与 `publish_sample` 互斥：
    /// 并发发布的采样要么已包含在快照里，要么在类型设置之后广播给该连接。
    pub async fn activate_live(&self, session: &ClientSession) -> Result<(), WsError> {
        self.last_known
            .with_current(|current| -> Result<(), WsError> {
                if let Some(sample) = current {
                    match encode_json_frame(&LiveUpdate::from(sample)) {
                        Ok(frame) => session.try_enqueue(Arc::from(frame))?,
                        Err(e) => error!("[广播] 最近采样序列化失败: {}", e),
                    }
                }
                session.set_kind(SubscriptionKind::Live);
                Ok(())
            })
            .await
    }

    /// 最近一次采样的帧，尚无采样时返回 `None`。
    pub async fn live_snapshot_frame(&self) -> Option<OutboundFrame> {
        let sample = self.last_known.get().await?;
        match encode_json_frame(&LiveUpdate::from(&sample)) {
            Ok(frame) => Some(Arc::from(frame)),
            Err(e) => {
                error!("[广播] 最近采样序列化失败: {}", e);
                None
            }
        }
    }

    /// `history` 连接的快照：最近 `history_length` 条记录或 `unavailable` 标记。
    pub async fn history_snapshot_frame(&self) -> Result<OutboundFrame, AppError> {
        let data = self.read_history().await;
        Self::encode_history(&data)
    }

    /// 历史存储可能涉及文件读写，放到阻塞线程池中执行。
    async fn read_history(&self) -> HistoryData {
        let store = Arc::clone(&self.history);
        let n = self.history_length;
        match tokio::task::spawn_blocking(move || store.read_recent(n)).await {
            Ok(data) => data,
            Err(e) => {
                error!("[广播] 读取历史存储的任务异常结束: {}", e);
                HistoryData::unavailable()
            }
        }
    }

    fn encode_history(data: &HistoryData) -> Result<OutboundFrame, AppError> {
        let response = HistoryResponse {
            history: data.clone(),
        };
        encode_json_frame(&response)
            .map(Arc::from)
            .map_err(|e| AppError::Serialization(e.to_string()))
    }

    fn broadcast(&self, kind: SubscriptionKind, frame: OutboundFrame) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        self.registry.for_each_of_kind(kind, |session| {
            match session.try_enqueue(Arc::clone(&frame)) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!(
                        "[广播] 向客户端 {} ({}) 发送失败，注销该连接: {}",
                        session.client_id, session.addr, e
                    );
                    self.registry.remove(&session.client_id);
                    session.close();
                    report.failed += 1;
                }
            }
        });
        report
    }
}
