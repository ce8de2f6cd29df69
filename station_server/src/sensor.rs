//! 采样来源与采样循环。
//!
//! 真实传感器的寄存器读取不在本 crate 范围内，只通过 `SampleSource` 接入；
//! 默认使用 `SimulatedSensor` 生成随机游走的读数。

use chrono::{Local, Timelike};
use common_models::{Condition, Sample};
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::StationConfig;
use crate::error::AppError;
use crate::history::HistoryStore;
use crate::state::LastKnownSample;
use crate::ws_server::broadcast_dispatcher::BroadcastDispatcher;

/// 一次原始读数，压力单位为 hPa。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub temperature: f64,
    pub humidity: f64,
    pub pressure: f64,
}

/// 采样来源。
pub trait SampleSource: Send {
    fn read(&mut self) -> Result<Reading, AppError>;
}

/// 模拟传感器：在合理范围内做随机游走。
#[derive(Debug)]
pub struct SimulatedSensor {
    rng: StdRng,
    current: Reading,
}

impl SimulatedSensor {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// 固定种子，便于复现。
    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            rng,
            current: Reading {
                temperature: 21.0,
                humidity: 55.0,
                pressure: 1012.0,
            },
        }
    }
}

impl Default for SimulatedSensor {
    fn default() -> Self {
        Self::new()
    }
}

impl SampleSource for SimulatedSensor {
    fn read(&mut self) -> Result<Reading, AppError> {
        let next = Reading {
            temperature: (self.current.temperature + self.rng.gen_range(-0.5..=0.5)).clamp(-10.0, 45.0),
            humidity: (self.current.humidity + self.rng.gen_range(-2.0..=2.0)).clamp(5.0, 100.0),
            pressure: (self.current.pressure + self.rng.gen_range(-1.5..=1.5)).clamp(960.0, 1050.0),
        };
        self.current = next;
        Ok(next)
    }
}

/// 由读数和上一次的气压构造一条采样，天气状况按当地时间分类。
pub fn build_sample(reading: Reading, previous_pressure: Option<f64>) -> Sample {
    let condition = Condition::classify(
        reading.temperature,
        reading.humidity,
        reading.pressure,
        previous_pressure,
        Local::now().hour(),
    );
    Sample::new(reading.temperature, reading.humidity, reading.pressure, condition)
}

/// 启动时用历史存储中的最后一条记录恢复最近采样，返回该记录的气压作为上一次气压。
///
/// 存储不可用、没有记录或记录无效时返回 `None`，最近采样保持为空。
pub async fn seed_from_history(store: Arc<dyn HistoryStore>, last_known: &LastKnownSample) -> Option<f64> {
    let data = match tokio::task::spawn_blocking(move || store.read_recent(1)).await {
        Ok(data) => data,
        Err(e) => {
            warn!("[采样] 读取最后一条历史记录的任务异常结束: {}", e);
            return None;
        }
    };
    let record = data.records()?.last()?;
    let reading = Reading {
        temperature: record.temperature,
        humidity: record.humidity,
        pressure: record.pressure,
    };
    let sample = build_sample(reading, None);
    if let Err(e) = sample.validate() {
        warn!("[采样] 最后一条历史记录无效，忽略: {}", e);
        return None;
    }
    info!("[采样] 已从历史记录恢复最近采样: {:?} ({})", reading, sample.condition());
    last_known.store(sample).await;
    Some(reading.pressure)
}

/// 采样循环：每个采样周期读取一次并发布，每个记录周期向历史存储追加一次。
///
/// `previous_pressure` 是启动前最后一次已知的气压，用于第一轮的气压变化判断。
/// 读取失败或发布失败只影响当前这一轮。
pub async fn run_sampling_loop<S: SampleSource>(
    mut source: S,
    dispatcher: Arc<BroadcastDispatcher>,
    store: Arc<dyn HistoryStore>,
    config: StationConfig,
    mut previous_pressure: Option<f64>,
    shutdown: CancellationToken,
) {
    let sample_interval = Duration::from_secs(config.sample_interval_seconds.max(1));
    let log_interval = Duration::from_secs(config.history_log_interval_seconds);
    let mut ticker = tokio::time::interval(sample_interval);
    let mut last_logged: Option<Instant> = None;
    info!("[采样] 采样循环已启动，周期 {:?}，历史记录周期 {:?}", sample_interval, log_interval);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let reading = match source.read() {
            Ok(reading) => reading,
            Err(e) => {
                warn!("[采样] 读取传感器失败: {}", e);
                continue;
            }
        };
        let sample = build_sample(reading, previous_pressure);
        previous_pressure = Some(reading.pressure);

        match dispatcher.publish_sample(sample.clone()).await {
            Ok(report) => debug!(
                "[采样] {:?} 已发布给 {} 个客户端 (失败 {})",
                reading, report.delivered, report.failed
            ),
            Err(e) => {
                warn!("[采样] 本轮采样未发布: {}", e);
                continue;
            }
        }

        if last_logged.map_or(true, |at| at.elapsed() >= log_interval) {
            let store = Arc::clone(&store);
            let appended = tokio::task::spawn_blocking(move || store.append(&sample)).await;
            match appended {
                Ok(Ok(())) => last_logged = Some(Instant::now()),
                Ok(Err(e)) => warn!("[采样] 写入历史存储失败: {}", e),
                Err(e) => warn!("[采样] 写入历史存储的任务异常结束: {}", e),
            }
        }
    }
    info!("[采样] 采样循环已停止。");
}
