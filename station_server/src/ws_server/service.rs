//! WebSocket 服务端核心服务：监听、接受连接、派生连接处理任务，以及幂等的启动与停止。

use log::{debug, error, info, warn};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::config::WebSocketConfig;
use crate::error::AppError;
use crate::ws_server::broadcast_dispatcher::BroadcastDispatcher;
use crate::ws_server::connection_handler::{handle_connection, HandlerContext};
use crate::ws_server::connection_registry::ConnectionRegistry;

/// 服务的生命周期状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServiceState::Stopped => "Stopped",
            ServiceState::Starting => "Starting",
            ServiceState::Running => "Running",
            ServiceState::Stopping => "Stopping",
        };
        f.write_str(name)
    }
}

struct ServiceInner {
    state: ServiceState,
    local_addr: Option<SocketAddr>,
    shutdown: Option<CancellationToken>,
    accept_task: Option<JoinHandle<()>>,
}

/// WebSocket 服务结构体，封装了配置、连接注册表与广播分发器。
pub struct WsService {
    config: Arc<WebSocketConfig>,
    registry: Arc<ConnectionRegistry>,
    dispatcher: Arc<BroadcastDispatcher>,
    inner: Mutex<ServiceInner>,
}

impl WsService {
    /// 创建一个新的 WsService 实例，初始状态为 `Stopped`。
    pub fn new(config: WebSocketConfig, dispatcher: Arc<BroadcastDispatcher>) -> Self {
        info!("[WsService] New instance created.");
        Self {
            config: Arc::new(config),
            registry: Arc::clone(dispatcher.registry()),
            dispatcher,
            inner: Mutex::new(ServiceInner {
                state: ServiceState::Stopped,
                local_addr: None,
                shutdown: None,
                accept_task: None,
            }),
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn dispatcher(&self) -> &Arc<BroadcastDispatcher> {
        &self.dispatcher
    }

    pub async fn state(&self) -> ServiceState {
        self.inner.lock().await.state
    }

    /// 运行中时返回实际绑定的地址 (端口配置为 0 时由系统分配)。
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.lock().await.local_addr
    }

    /// 启动 WebSocket 服务端。
    ///
    /// 已经在运行时直接返回当前地址；绑定失败时回到 `Stopped` 并返回 `AppError::Bind`。
    pub async fn start(&self) -> Result<SocketAddr, AppError> {
        let mut inner = self.inner.lock().await;
        if inner.state == ServiceState::Running {
            if let Some(addr) = inner.local_addr {
                debug!("[WsService] Already running on {}, start() is a no-op.", addr);
                return Ok(addr);
            }
        }

        inner.state = ServiceState::Starting;
        let listen_addr = self.config.listen_addr();
        info!("[WsService] Starting WebSocket service on {}...", listen_addr);

        let bound = match TcpListener::bind(&listen_addr).await {
            Ok(listener) => listener.local_addr().map(|addr| (listener, addr)),
            Err(e) => Err(e),
        };
        let (listener, local_addr) = match bound {
            Ok(bound) => bound,
            Err(e) => {
                error!("[WsService] Failed to bind {}: {}", listen_addr, e);
                inner.state = ServiceState::Stopped;
                return Err(AppError::bind(listen_addr, e));
            }
        };

        let shutdown = CancellationToken::new();
        let ctx = HandlerContext {
            registry: Arc::clone(&self.registry),
            dispatcher: Arc::clone(&self.dispatcher),
            config: Arc::clone(&self.config),
            shutdown: shutdown.clone(),
        };
        let accept_task = tokio::spawn(run_accept_loop(listener, ctx));

        inner.local_addr = Some(local_addr);
        inner.shutdown = Some(shutdown);
        inner.accept_task = Some(accept_task);
        inner.state = ServiceState::Running;
        info!("[WsService] WebSocket service is listening on {}", local_addr);
        Ok(local_addr)
    }

    /// 停止服务：关闭所有连接并结束 accept 循环。从未启动或已停止时什么也不做。
    pub async fn stop(&self) {
        let mut inner = self.inner.lock().await;
        if inner.state == ServiceState::Stopped {
            debug!("[WsService] stop() called while already stopped.");
            self.registry.close_all();
            return;
        }

        inner.state = ServiceState::Stopping;
        info!("[WsService] Stopping WebSocket service...");
        if let Some(shutdown) = inner.shutdown.take() {
            shutdown.cancel();
        }
        self.registry.close_all();

        if let Some(accept_task) = inner.accept_task.take() {
            if let Err(e) = accept_task.await {
                error!("[WsService] Accept loop ended abnormally: {}", e);
            }
        }
        // 被中止的任务在析构时已自行注销，这里再兜底一次
        self.registry.close_all();

        inner.local_addr = None;
        inner.state = ServiceState::Stopped;
        info!("[WsService] WebSocket service stopped.");
    }
}

/// accept 循环：每个新连接派生一个独立的处理任务，循环本身从不等待任何单个连接。
async fn run_accept_loop(listener: TcpListener, ctx: HandlerContext) {
    let shutdown = ctx.shutdown.clone();
    let backoff = ctx.config.accept_backoff();
    let grace = ctx.config.shutdown_grace();
    let mut handlers = JoinSet::new();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!("[WsService] Accepted TCP connection from {}", peer);
                    handlers.spawn(handle_connection(stream, peer, ctx.clone()));
                }
                Err(e) => {
                    // 例如文件描述符耗尽，稍后再试
                    warn!("[WsService] accept() failed: {}. Retrying after {:?}.", e, backoff);
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
            },
            Some(joined) = handlers.join_next(), if !handlers.is_empty() => {
                if let Err(e) = joined {
                    if e.is_panic() {
                        error!("[WsService] A connection handler panicked: {}", e);
                    }
                }
            }
        }
    }
    drop(listener);

    let remaining = handlers.len();
    if remaining > 0 {
        debug!("[WsService] Waiting up to {:?} for {} connection handler(s) to finish.", grace, remaining);
        let drained = tokio::time::timeout(grace, async {
            while handlers.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(
                "[WsService] {} connection handler(s) did not finish within {:?}, aborting.",
                handlers.len(),
                grace
            );
            handlers.shutdown().await;
        }
    }
    info!("[WsService] Accept loop stopped.");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::MemoryHistoryStore;
    use crate::state::LastKnownSample;

    fn local_service() -> WsService {
        let registry = Arc::new(ConnectionRegistry::new());
        let dispatcher = Arc::new(BroadcastDispatcher::new(
            registry,
            LastKnownSample::new(),
            Arc::new(MemoryHistoryStore::new(16)),
            10,
        ));
        let config = WebSocketConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            ..WebSocketConfig::default()
        };
        WsService::new(config, dispatcher)
    }

    #[tokio::test]
    async fn test_stop_before_start_is_noop() {
        let service = local_service();
        service.stop().await;
        service.stop().await;
        assert_eq!(service.state().await, ServiceState::Stopped);
        assert!(service.local_addr().await.is_none());
    }

    #[tokio::test]
    async fn test_start_is_idempotent_and_restartable() {
        let service = local_service();
        let first = service.start().await.unwrap();
        let second = service.start().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(service.state().await, ServiceState::Running);

        service.stop().await;
        assert_eq!(service.state().await, ServiceState::Stopped);

        let restarted = service.start().await.unwrap();
        assert_eq!(service.local_addr().await, Some(restarted));
        service.stop().await;
    }

    #[tokio::test]
    async fn test_bind_failure_is_reported_and_state_resets() {
        let occupied = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = occupied.local_addr().unwrap().port();

        let registry = Arc::new(ConnectionRegistry::new());
        let dispatcher = Arc::new(BroadcastDispatcher::new(
            registry,
            LastKnownSample::new(),
            Arc::new(MemoryHistoryStore::new(16)),
            10,
        ));
        let config = WebSocketConfig {
            host: "127.0.0.1".to_string(),
            port,
            ..WebSocketConfig::default()
        };
        let service = WsService::new(config, dispatcher);

        let result = service.start().await;
        assert!(matches!(result, Err(AppError::Bind { .. })));
        assert_eq!(service.state().await, ServiceState::Stopped);
        service.stop().await;
    }
}
