//! 气象站监视器：连接服务端、订阅实时读数或历史记录，并把收到的数据写入日志。
//!
//! 用法: `station_monitor [ws://host:port] [live|history]`

use common_models::ws_payloads::{ClientRequest, HistoryData, ServerMessage};
use common_models::SubscriptionKind;
use log::{error, info, warn, LevelFilter};
use rust_websocket_utils::client::reconnect::{run_client_loop, ClientEvent, RetryPolicy};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const DEFAULT_URL: &str = "ws://127.0.0.1:8765";

fn parse_kind(arg: Option<String>) -> anyhow::Result<SubscriptionKind> {
    match arg.as_deref() {
        None | Some("live") => Ok(SubscriptionKind::Live),
        Some("history") => Ok(SubscriptionKind::History),
        Some(other) => anyhow::bail!("未知的订阅类型 '{}'，应为 live 或 history", other),
    }
}

fn log_server_message(text: &str) {
    match serde_json::from_str::<ServerMessage>(text) {
        Ok(ServerMessage::Live(update)) => info!(
            "[监视器] 实时读数: 温度 {:.1}°C, 湿度 {:.0}%, 气压 {:.1} hPa, 天气 {}",
            update.temperature, update.humidity, update.pressure, update.condition
        ),
        Ok(ServerMessage::History(response)) => match response.history {
            HistoryData::Records(records) => {
                info!("[监视器] 历史记录 {} 条:", records.len());
                for record in records {
                    info!(
                        "[监视器]   {} 温度 {:.1}°C, 气压 {:.1} hPa, 湿度 {:.0}%",
                        record.hour, record.temperature, record.pressure, record.humidity
                    );
                }
            }
            HistoryData::Status(_) => warn!("[监视器] 服务端的历史存储不可用"),
        },
        Err(e) => warn!("[监视器] 无法解析服务端消息 ({}): {}", e, text),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::new()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .format_timestamp_millis()
        .init();

    let mut args = std::env::args().skip(1);
    let url = args.next().unwrap_or_else(|| DEFAULT_URL.to_string());
    let kind = parse_kind(args.next())?;
    info!("[监视器] 连接到 {}，订阅类型: {}", url, kind);

    let (events_tx, mut events_rx) = mpsc::channel::<ClientEvent>(64);
    let shutdown = CancellationToken::new();
    let policy = RetryPolicy::Exponential {
        initial: Duration::from_secs(1),
        max: Duration::from_secs(30),
        factor: 2,
        max_attempts: None,
    };
    let client_task = tokio::spawn(run_client_loop(url, Some(ClientRequest::new(kind)), policy, events_tx, shutdown.clone()));

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    error!("[监视器] 监听退出信号失败: {}", e);
                }
                break;
            }
            event = events_rx.recv() => match event {
                Some(ClientEvent::Connected) => info!("[监视器] 已连接"),
                Some(ClientEvent::Text(text)) => log_server_message(&text),
                Some(ClientEvent::Disconnected { reason }) => warn!("[监视器] 连接断开: {}", reason),
                Some(ClientEvent::GaveUp { attempts }) => {
                    error!("[监视器] 连续 {} 次连接失败，放弃", attempts);
                    break;
                }
                None => break,
            }
        }
    }

    shutdown.cancel();
    let _ = client_task.await;
    Ok(())
}
