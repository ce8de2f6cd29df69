use anyhow::Context;
use log::{error, info, LevelFilter};
use station_server::connectivity::run_connectivity_watchdog;
use station_server::history::open_history_store;
use station_server::sensor::{run_sampling_loop, seed_from_history, SimulatedSensor};
use station_server::state::LastKnownSample;
use station_server::ws_server::broadcast_dispatcher::BroadcastDispatcher;
use station_server::ws_server::connection_registry::ConnectionRegistry;
use station_server::ws_server::history_refresher::HistoryRefresher;
use station_server::ws_server::service::WsService;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志记录器，RUST_LOG 可覆盖默认级别
    env_logger::Builder::new()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .format_timestamp_millis()
        .init();
    info!("[主程序] 日志系统已成功初始化 (env_logger)，默认级别: Info。");

    let app_config = station_server::config::init_config();
    info!(
        "[主程序] 应用配置已加载。WebSocket 服务地址: {}",
        app_config.websocket.listen_addr()
    );

    // 历史存储：CSV 目录缺失时报告不可用，目录出现后自动重新挂载
    let history_store = open_history_store(&app_config.station);

    let registry = Arc::new(ConnectionRegistry::new());
    info!("[主程序] WebSocket 连接注册表 (ConnectionRegistry) 已创建。");

    let dispatcher = Arc::new(BroadcastDispatcher::new(
        Arc::clone(&registry),
        LastKnownSample::new(),
        Arc::clone(&history_store),
        app_config.station.history_length,
    ));

    // 从最后一条历史记录恢复最近采样与上一次气压
    let previous_pressure = seed_from_history(Arc::clone(&history_store), dispatcher.last_known()).await;

    let ws_service = Arc::new(WsService::new(app_config.websocket.clone(), Arc::clone(&dispatcher)));
    let shutdown = CancellationToken::new();

    // 先同步启动一次，绑定失败时直接退出
    let addr = ws_service
        .start()
        .await
        .context("启动 WebSocket 服务失败")?;
    info!("[主程序] WebSocket 服务已启动，监听于 {}", addr);

    // 本机没有独立的网络管理，连通性信号始终为 true；外部可通过 sender 驱动启停
    let (_connectivity_tx, connectivity_rx) = watch::channel(true);
    let watchdog = tokio::spawn(run_connectivity_watchdog(
        Arc::clone(&ws_service),
        connectivity_rx,
        shutdown.clone(),
    ));

    let refresher = HistoryRefresher::new(
        Arc::clone(&dispatcher),
        Duration::from_secs(app_config.station.history_refresh_interval_seconds),
    );
    let refresher_task = tokio::spawn(refresher.run(shutdown.clone()));
    info!("[主程序] 历史刷新器 (HistoryRefresher) 已派生到后台异步执行。");

    let sampling_task = tokio::spawn(run_sampling_loop(
        SimulatedSensor::new(),
        Arc::clone(&dispatcher),
        history_store,
        app_config.station.clone(),
        previous_pressure,
        shutdown.clone(),
    ));
    info!("[主程序] 采样循环已派生到后台异步执行。");

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("[主程序] 监听退出信号失败: {}", e);
    }
    info!("[主程序] 收到退出信号，正在关闭...");

    shutdown.cancel();
    for (name, task) in [
        ("采样循环", sampling_task),
        ("历史刷新器", refresher_task),
        ("连通性看门狗", watchdog),
    ] {
        if let Err(e) = task.await {
            error!("[主程序] {} 异常结束: {}", name, e);
        }
    }
    ws_service.stop().await;
    info!("[主程序] 已退出。");
    Ok(())
}
