// rust_websocket_utils/src/client/reconnect.rs

//! 客户端的断线重连循环。
//!
//! 连接状态与收到的消息通过 `mpsc` 通道以 `ClientEvent` 的形式交给上层 (界面或日志)，
//! 重连节奏由显式的 `RetryPolicy` 决定。

use common_models::ws_payloads::ClientRequest;
use log::{info, warn};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::client::transport::{self, ClientConnection};

/// 重连策略。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryPolicy {
    /// 每次失败后等待固定时长。
    Fixed {
        delay: Duration,
        max_attempts: Option<u32>,
    },
    /// 等待时长按 `factor` 倍增，不超过 `max`。
    Exponential {
        initial: Duration,
        max: Duration,
        factor: u32,
        max_attempts: Option<u32>,
    },
}

impl Default for RetryPolicy {
    /// 固定 5 秒、无限重试。
    fn default() -> Self {
        RetryPolicy::Fixed {
            delay: Duration::from_secs(5),
            max_attempts: None,
        }
    }
}

impl RetryPolicy {
    /// 第 `attempt` 次连续失败 (从 1 开始) 之后应等待的时长；返回 `None` 表示放弃。
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        match self {
            RetryPolicy::Fixed { delay, max_attempts } => {
                if max_attempts.is_some_and(|max| attempt > max) {
                    return None;
                }
                Some(*delay)
            }
            RetryPolicy::Exponential { initial, max, factor, max_attempts } => {
                if max_attempts.is_some_and(|limit| attempt > limit) {
                    return None;
                }
                let exponent = attempt.saturating_sub(1);
                let multiplier = factor.checked_pow(exponent).unwrap_or(u32::MAX);
                Some(initial.saturating_mul(multiplier).min(*max))
            }
        }
    }
}

/// 重连循环发给上层的事件。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Connected,
    /// 服务端推送的一条文本消息 (JSON)。
    Text(String),
    Disconnected { reason: String },
    /// 连续失败次数超过策略上限，循环结束。
    GaveUp { attempts: u32 },
}

/// 持续连接到 `url`，每次连上后先发送订阅请求 `subscribe` (如果有)，然后把收到的文本转发给 `events`。
///
/// 在 `shutdown` 被取消、放弃重连、或 `events` 的接收端被丢弃时返回。
pub async fn run_client_loop(
    url: String,
    subscribe: Option<ClientRequest>,
    policy: RetryPolicy,
    events: mpsc::Sender<ClientEvent>,
    shutdown: CancellationToken,
) {
    let mut failures: u32 = 0;
    loop {
        let connected = tokio::select! {
            _ = shutdown.cancelled() => return,
            result = transport::connect_client(&url) => result,
        };

        let reason = match connected {
            Ok(mut connection) => {
                failures = 0;
                if events.send(ClientEvent::Connected).await.is_err() {
                    return;
                }
                match pump_messages(&mut connection, subscribe, &events, &shutdown).await {
                    PumpOutcome::Stop => {
                        let _ = connection.close().await;
                        return;
                    }
                    PumpOutcome::Lost(reason) => reason,
                }
            }
            Err(e) => e.to_string(),
        };

        failures += 1;
        if events
            .send(ClientEvent::Disconnected { reason: reason.clone() })
            .await
            .is_err()
        {
            return;
        }

        let Some(delay) = policy.delay_for(failures) else {
            warn!("[重连] 连续失败 {} 次，放弃重连: {}", failures, reason);
            let _ = events.send(ClientEvent::GaveUp { attempts: failures }).await;
            return;
        };
        info!("[重连] 连接中断 ({})，{:?} 后重试 (第 {} 次)", reason, delay, failures);

        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

enum PumpOutcome {
    /// 上层要求停止 (关闭信号或事件接收端已丢弃)。
    Stop,
    /// 连接丢失，附带原因。
    Lost(String),
}

async fn pump_messages(
    connection: &mut ClientConnection,
    subscribe: Option<ClientRequest>,
    events: &mpsc::Sender<ClientEvent>,
    shutdown: &CancellationToken,
) -> PumpOutcome {
    if let Some(request) = subscribe {
        if let Err(e) = connection.send_request(&request).await {
            return PumpOutcome::Lost(e.to_string());
        }
    }
    loop {
        let received = tokio::select! {
            _ = shutdown.cancelled() => return PumpOutcome::Stop,
            received = transport::receive_text(&mut connection.ws_receiver) => received,
        };
        match received {
            Some(Ok(text)) => {
                if events.send(ClientEvent::Text(text)).await.is_err() {
                    return PumpOutcome::Stop;
                }
            }
            Some(Err(e)) => return PumpOutcome::Lost(e.to_string()),
            None => return PumpOutcome::Lost("服务端关闭了连接".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_policy_respects_attempt_limit() {
        let policy = RetryPolicy::Fixed {
            delay: Duration::from_millis(250),
            max_attempts: Some(2),
        };
        assert_eq!(policy.delay_for(1), Some(Duration::from_millis(250)));
        assert_eq!(policy.delay_for(2), Some(Duration::from_millis(250)));
        assert_eq!(policy.delay_for(3), None);
        assert_eq!(RetryPolicy::default().delay_for(1_000), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_exponential_policy_doubles_until_cap() {
        let policy = RetryPolicy::Exponential {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(1),
            factor: 2,
            max_attempts: None,
        };
        assert_eq!(policy.delay_for(1), Some(Duration::from_millis(100)));
        assert_eq!(policy.delay_for(2), Some(Duration::from_millis(200)));
        assert_eq!(policy.delay_for(4), Some(Duration::from_millis(800)));
        assert_eq!(policy.delay_for(5), Some(Duration::from_secs(1)));
        assert_eq!(policy.delay_for(64), Some(Duration::from_secs(1)));
    }

    #[tokio::test]
    async fn test_loop_gives_up_when_server_is_unreachable() {
        // 先绑定再释放，得到一个大概率无人监听的端口
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (tx, mut rx) = mpsc::channel(16);
        let policy = RetryPolicy::Fixed {
            delay: Duration::from_millis(10),
            max_attempts: Some(2),
        };
        run_client_loop(format!("ws://{}", addr), None, policy, tx, CancellationToken::new()).await;

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        let disconnects = events
            .iter()
            .filter(|e| matches!(e, ClientEvent::Disconnected { .. }))
            .count();
        assert_eq!(disconnects, 3);
        assert_eq!(events.last(), Some(&ClientEvent::GaveUp { attempts: 3 }));
    }

    #[tokio::test]
    async fn test_loop_stops_on_shutdown() {
        let (tx, _rx) = mpsc::channel(16);
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        tokio::time::timeout(
            Duration::from_secs(1),
            run_client_loop("ws://127.0.0.1:9".to_string(), None, RetryPolicy::default(), tx, shutdown),
        )
        .await
        .expect("关闭信号发出后循环应立即返回");
    }
}
