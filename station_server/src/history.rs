//! 历史记录存储。
//!
//! 存储不可用 (例如存储卡未插入) 时读取返回 `unavailable` 标记，而不是报错或返回空列表，
//! 客户端据此区分“没有数据”与“没有存储”。

use chrono::{Local, NaiveDate};
use common_models::ws_payloads::{HistoryData, HistoryRecord};
use common_models::Sample;
use log::{debug, info, warn};
use std::collections::VecDeque;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::config::{HistoryBackend, StationConfig};
use crate::error::AppError;

/// CSV 文件的表头，列顺序与 `HistoryRecord` 一致。
pub const CSV_HEADER: &str = "hour,temperature,pressure,humidity";

/// 历史存储的抽象，服务端只通过这个接口读写历史。
pub trait HistoryStore: Send + Sync {
    /// 追加一条采样。
    fn append(&self, sample: &Sample) -> Result<(), AppError>;

    /// 读取最近的 `n` 条记录，按时间顺序排列 (最旧的在前)。
    fn read_recent(&self, n: usize) -> HistoryData;
}

/// 取序列末尾的 `n` 条，保持原有顺序。
fn tail<T: Clone>(items: impl ExactSizeIterator<Item = T>, n: usize) -> Vec<T> {
    let skip = items.len().saturating_sub(n);
    items.skip(skip).collect()
}

/// 保存在内存中的有界历史，超出容量时丢弃最旧的记录。
#[derive(Debug)]
pub struct MemoryHistoryStore {
    records: Mutex<VecDeque<HistoryRecord>>,
    capacity: usize,
    available: AtomicBool,
}

impl MemoryHistoryStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: Mutex::new(VecDeque::with_capacity(capacity.min(4096))),
            capacity: capacity.max(1),
            available: AtomicBool::new(true),
        }
    }

    /// 模拟存储被拔出或重新插入。
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// 直接追加一条历史记录 (例如从旧数据导入)。
    pub fn push_record(&self, record: HistoryRecord) {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        if records.len() == self.capacity {
            records.pop_front();
        }
        records.push_back(record);
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl HistoryStore for MemoryHistoryStore {
    fn append(&self, sample: &Sample) -> Result<(), AppError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(AppError::Storage("内存历史存储当前不可用".to_string()));
        }
        self.push_record(HistoryRecord::from_sample(sample));
        Ok(())
    }

    fn read_recent(&self, n: usize) -> HistoryData {
        if !self.available.load(Ordering::SeqCst) {
            return HistoryData::unavailable();
        }
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        HistoryData::Records(tail(records.iter().cloned(), n))
    }
}

/// 按天分文件的 CSV 历史存储，文件名形如 `readings_2025-06-01.csv`。
///
/// `dir` 相当于存储卡的挂载点：目录不存在时视为未挂载。写入失败会把存储标记为未挂载，
/// 下一次读写时重新尝试挂载。
#[derive(Debug)]
pub struct CsvHistoryStore {
    dir: PathBuf,
    mounted: AtomicBool,
    // 串行化同一进程内的文件读写
    io_lock: Mutex<()>,
}

impl CsvHistoryStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let store = Self {
            dir: dir.into(),
            mounted: AtomicBool::new(false),
            io_lock: Mutex::new(()),
        };
        store.try_mount();
        store
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted.load(Ordering::SeqCst)
    }

    /// 目录存在即视为挂载成功。
    fn try_mount(&self) -> bool {
        let mounted = self.dir.is_dir();
        let was_mounted = self.mounted.swap(mounted, Ordering::SeqCst);
        if mounted && !was_mounted {
            info!("[历史存储] 存储目录 {:?} 已挂载", self.dir);
        } else if !mounted {
            debug!("[历史存储] 存储目录 {:?} 不存在，存储不可用", self.dir);
        }
        mounted
    }

    fn ensure_mounted(&self) -> bool {
        self.is_mounted() || self.try_mount()
    }

    pub fn file_for(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(format!("readings_{}.csv", date.format("%Y-%m-%d")))
    }

    fn today_file(&self) -> PathBuf {
        self.file_for(Local::now().date_naive())
    }

    fn mark_unmounted(&self, reason: &str) {
        warn!("[历史存储] {}，存储标记为未挂载", reason);
        self.mounted.store(false, Ordering::SeqCst);
    }

    fn write_line(path: &Path, line: &str) -> std::io::Result<()> {
        let is_new = !path.exists();
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        if is_new {
            writeln!(file, "{}", CSV_HEADER)?;
        }
        writeln!(file, "{}", line)
    }
}

/// 解析一行 CSV，格式错误时返回 `None`。
fn parse_csv_line(line: &str) -> Option<HistoryRecord> {
    let mut fields = line.trim().split(',');
    let hour = fields.next()?.to_string();
    let temperature = fields.next()?.trim().parse().ok()?;
    let pressure = fields.next()?.trim().parse().ok()?;
    let humidity = fields.next()?.trim().parse().ok()?;
    if fields.next().is_some() {
        return None;
    }
    Some(HistoryRecord {
        hour,
        temperature,
        pressure,
        humidity,
    })
}

impl HistoryStore for CsvHistoryStore {
    fn append(&self, sample: &Sample) -> Result<(), AppError> {
        if !self.ensure_mounted() {
            return Err(AppError::Storage(format!("存储目录 {:?} 未挂载", self.dir)));
        }
        let record = HistoryRecord::from_sample(sample);
        let line = format!(
            "{},{},{},{}",
            record.hour, record.temperature, record.pressure, record.humidity
        );
        let path = self.today_file();
        let _guard = self.io_lock.lock().unwrap_or_else(|e| e.into_inner());
        match Self::write_line(&path, &line) {
            Ok(()) => {
                debug!("[历史存储] 已写入 {:?}: {}", path, line);
                Ok(())
            }
            Err(e) => {
                self.mark_unmounted(&format!("写入 {:?} 失败: {}", path, e));
                Err(AppError::Storage(format!("写入历史文件失败: {}", e)))
            }
        }
    }

    fn read_recent(&self, n: usize) -> HistoryData {
        if !self.ensure_mounted() {
            return HistoryData::unavailable();
        }
        let path = self.today_file();
        let _guard = self.io_lock.lock().unwrap_or_else(|e| e.into_inner());
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && self.dir.is_dir() => {
                // 今天还没有记录
                return HistoryData::Records(Vec::new());
            }
            Err(e) => {
                self.mark_unmounted(&format!("读取 {:?} 失败: {}", path, e));
                return HistoryData::unavailable();
            }
        };

        let records: Vec<HistoryRecord> = content
            .lines()
            .skip(1)
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| {
                let parsed = parse_csv_line(line);
                if parsed.is_none() {
                    warn!("[历史存储] 跳过无法解析的行: {:?}", line);
                }
                parsed
            })
            .collect();
        HistoryData::Records(tail(records.into_iter(), n))
    }
}

/// 按配置打开历史存储。
///
/// CSV 后端在目录缺失时照常返回，此时读取报告 `unavailable`，目录出现后自动重新挂载。
pub fn open_history_store(config: &StationConfig) -> Arc<dyn HistoryStore> {
    match config.history_backend {
        HistoryBackend::Csv => {
            let store = CsvHistoryStore::new(&config.history_dir);
            if store.is_mounted() {
                info!("[历史存储] 使用 CSV 历史存储: {:?}", store.dir());
            } else {
                warn!("[历史存储] 存储目录 {:?} 尚未挂载，历史暂不可用", store.dir());
            }
            Arc::new(store)
        }
        HistoryBackend::Memory => {
            info!("[历史存储] 使用内存历史存储 (容量 {})", config.history_capacity);
            Arc::new(MemoryHistoryStore::new(config.history_capacity))
        }
    }
}
