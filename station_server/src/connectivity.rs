//! 网络连通性看门狗。
//!
//! 网络接入本身 (Wi-Fi 关联等) 由外部负责，这里只订阅一个 `watch` 通道：
//! 连通时启动 WebSocket 服务，断开时停止服务，重新连通后再次启动。

use log::{error, info};
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::ws_server::service::WsService;

/// 根据连通性变化启动或停止服务，直到 `shutdown` 被取消或发送端被丢弃。
pub async fn run_connectivity_watchdog(
    service: Arc<WsService>,
    mut connectivity: watch::Receiver<bool>,
    shutdown: CancellationToken,
) {
    loop {
        let online = *connectivity.borrow_and_update();
        if online {
            match service.start().await {
                Ok(addr) => info!("[连通性] 网络已连通，服务监听于 {}", addr),
                Err(e) => error!("[连通性] 网络已连通，但服务启动失败: {}", e),
            }
        } else {
            info!("[连通性] 网络已断开，停止服务");
            service.stop().await;
        }

        tokio::select! {
            _ = shutdown.cancelled() => break,
            changed = connectivity.changed() => {
                if changed.is_err() {
                    info!("[连通性] 连通性信号源已关闭，看门狗退出");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WebSocketConfig;
    use crate::history::MemoryHistoryStore;
    use crate::state::LastKnownSample;
    use crate::ws_server::broadcast_dispatcher::BroadcastDispatcher;
    use crate::ws_server::connection_registry::ConnectionRegistry;
    use crate::ws_server::service::ServiceState;
    use std::time::Duration;

    async fn wait_for_state(service: &WsService, expected: ServiceState) {
        for _ in 0..200 {
            if service.state().await == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("服务未进入 {} 状态", expected);
    }

    #[tokio::test]
    async fn test_service_follows_connectivity() {
        let dispatcher = Arc::new(BroadcastDispatcher::new(
            Arc::new(ConnectionRegistry::new()),
            LastKnownSample::new(),
            Arc::new(MemoryHistoryStore::new(4)),
            10,
        ));
        let config = WebSocketConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            ..WebSocketConfig::default()
        };
        let service = Arc::new(WsService::new(config, dispatcher));
        let (tx, rx) = watch::channel(false);
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(run_connectivity_watchdog(Arc::clone(&service), rx, shutdown.clone()));

        wait_for_state(&service, ServiceState::Stopped).await;
        tx.send(true).unwrap();
        wait_for_state(&service, ServiceState::Running).await;
        tx.send(false).unwrap();
        wait_for_state(&service, ServiceState::Stopped).await;

        shutdown.cancel();
        task.await.unwrap();
    }
}
