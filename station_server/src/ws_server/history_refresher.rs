//! 历史刷新器。
//!
//! 按独立于采样周期的固定间隔，把最近的历史记录重新推送给所有 `history` 客户端。
//! 客户端也可以随时发送 `{"request":"history"}` 主动索取，两者互不依赖。

use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::ws_server::broadcast_dispatcher::BroadcastDispatcher;

pub struct HistoryRefresher {
    dispatcher: Arc<BroadcastDispatcher>,
    /// 刷新间隔；为零时刷新器不运行。
    interval: Duration,
}

impl HistoryRefresher {
    pub fn new(dispatcher: Arc<BroadcastDispatcher>, interval: Duration) -> Self {
        info!("[历史刷新器] 已创建，刷新周期: {:?}", interval);
        Self { dispatcher, interval }
    }

    /// 运行刷新循环，直到 `shutdown` 被取消。
    pub async fn run(self, shutdown: CancellationToken) {
        if self.interval.is_zero() {
            info!("[历史刷新器] 刷新周期为 0，定时刷新已禁用，仅响应客户端请求。");
            return;
        }
        info!("[历史刷新器] 后台刷新循环已启动。");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
            match self.dispatcher.refresh_history().await {
                Ok(report) => debug!(
                    "[历史刷新器] 本轮刷新完成: 成功 {}，失败 {}",
                    report.delivered, report.failed
                ),
                Err(e) => warn!("[历史刷新器] 本轮刷新失败: {}", e),
            }
        }
        info!("[历史刷新器] 刷新循环已停止。");
    }
}
