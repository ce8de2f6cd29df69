use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

/// 配置文件名
pub const CONFIG_FILE_NAME: &str = "station_settings.json";
/// WebSocket 服务的默认主机地址
pub const DEFAULT_WS_HOST: &str = "0.0.0.0";
/// WebSocket 服务的默认端口号 (气象站固件使用的端口)
pub const DEFAULT_WS_PORT: u16 = 8765;

/// WebSocket 服务端详细配置结构体
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct WebSocketConfig {
    /// WebSocket 服务绑定的主机地址
    pub host: String,
    /// WebSocket 服务监听的端口号，0 表示由系统分配
    pub port: u16,
    /// 握手与读帧时单次读取的缓冲区大小 (字节)，同时也是客户端单帧负载的上限
    pub read_buffer_size: usize,
    /// 握手整体超时（单位：毫秒）
    pub handshake_timeout_ms: u64,
    /// 等待客户端订阅请求的超时（单位：毫秒），超时按 `live` 处理
    pub classification_timeout_ms: u64,
    /// 每个连接的发送队列容量，队列满视为该客户端写入失败
    pub outbound_queue_capacity: usize,
    /// accept 出现瞬时错误后的退避时间（单位：毫秒）
    pub accept_backoff_ms: u64,
    /// 停止服务时等待连接任务退出的宽限期（单位：毫秒）
    pub shutdown_grace_ms: u64,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_WS_HOST.to_string(),
            port: DEFAULT_WS_PORT,
            read_buffer_size: 1024,
            handshake_timeout_ms: 3000,
            classification_timeout_ms: 2000,
            outbound_queue_capacity: 32,
            accept_backoff_ms: 50,
            shutdown_grace_ms: 1000,
        }
    }
}

impl WebSocketConfig {
    /// `host:port` 形式的监听地址。
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn classification_timeout(&self) -> Duration {
        Duration::from_millis(self.classification_timeout_ms)
    }

    pub fn accept_backoff(&self) -> Duration {
        Duration::from_millis(self.accept_backoff_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

/// 历史存储后端
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HistoryBackend {
    /// `history_dir` 下按天划分的 CSV 文件，目录不存在时报告不可用
    #[default]
    Csv,
    /// 只保存在内存中，重启后丢失 (开发调试用)
    Memory,
}

/// 站点采样与历史记录相关配置
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct StationConfig {
    /// 采样并推送实时读数的周期（单位：秒）
    pub sample_interval_seconds: u64,
    /// 推送给 `history` 客户端的记录条数
    pub history_length: usize,
    /// 服务端主动刷新历史的周期（单位：秒），0 表示只在客户端请求时发送
    pub history_refresh_interval_seconds: u64,
    /// 写入历史存储的周期（单位：秒）
    pub history_log_interval_seconds: u64,
    /// 历史存储后端，默认 CSV
    pub history_backend: HistoryBackend,
    /// CSV 历史文件所在目录 (相当于存储卡的挂载点)
    pub history_dir: PathBuf,
    /// 内存历史存储最多保留的记录数
    pub history_capacity: usize,
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            sample_interval_seconds: 15,
            history_length: 10,
            history_refresh_interval_seconds: 60,
            history_log_interval_seconds: 600,
            history_backend: HistoryBackend::Csv,
            history_dir: PathBuf::from("./history"),
            history_capacity: 1440,
        }
    }
}

/// 应用的主配置结构体
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// WebSocket 服务的相关配置
    pub websocket: WebSocketConfig,
    /// 采样与历史记录配置
    pub station: StationConfig,
}

// 全局静态应用配置实例
static APP_CONFIG: OnceLock<AppConfig> = OnceLock::new();

/// 从指定路径加载配置；文件不存在或损坏时使用默认配置并尝试写回。
pub fn load_or_create_config(config_file_path: &Path) -> AppConfig {
    match fs::read_to_string(config_file_path) {
        Ok(content) => match serde_json::from_str::<AppConfig>(&content) {
            Ok(config) => {
                info!("[配置模块] 已成功从配置文件 {:?} 加载应用配置。", config_file_path);
                config
            }
            Err(e) => {
                warn!(
                    "[配置模块] 警告：从 {:?} 反序列化配置失败: {}. 文件可能已损坏。将使用默认配置并尝试覆盖。",
                    config_file_path, e
                );
                let default_config = AppConfig::default();
                save_config(&default_config, config_file_path);
                default_config
            }
        },
        Err(e) => {
            info!(
                "[配置模块] 未在 {:?} 找到配置文件或读取时发生错误 (错误: {}). 将使用默认配置并尝试创建新文件。",
                config_file_path, e
            );
            let default_config = AppConfig::default();
            save_config(&default_config, config_file_path);
            default_config
        }
    }
}

/// 获取配置文件路径：优先当前目录，当前目录不可写时退回 `$HOME/.config/station_server/`。
pub fn get_config_file_path() -> PathBuf {
    let current_dir = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let config_file_path = current_dir.join(CONFIG_FILE_NAME);

    let current_dir_writable = fs::metadata(&current_dir)
        .map(|m| !m.permissions().readonly())
        .unwrap_or(false);
    if config_file_path.exists() || current_dir_writable {
        return config_file_path;
    }

    if let Ok(home) = env::var("HOME") {
        let home_config = PathBuf::from(home).join(".config").join("station_server");
        if !home_config.exists() {
            let _ = fs::create_dir_all(&home_config);
        }
        return home_config.join(CONFIG_FILE_NAME);
    }

    // 最后返回当前目录的配置文件路径，即使可能写入失败
    config_file_path
}

/// 保存配置到文件
pub fn save_config(config: &AppConfig, path: &Path) {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            if let Err(e) = fs::create_dir_all(parent) {
                warn!("[配置模块] 错误：创建配置目录 {:?} 失败: {}", parent, e);
                return;
            }
        }
    }

    match serde_json::to_string_pretty(config) {
        Ok(content) => {
            if let Err(e) = fs::write(path, content) {
                warn!("[配置模块] 错误：将配置写入文件 {:?} 时失败: {}", path, e);
            } else {
                info!("[配置模块] 已成功将当前配置保存到 {:?}.", path);
            }
        }
        Err(e) => {
            warn!("[配置模块] 错误：序列化配置信息以便保存时失败: {}", e);
        }
    }
}

/// 初始化全局应用配置
pub fn init_config() -> &'static AppConfig {
    let loaded_config = load_or_create_config(&get_config_file_path());
    if APP_CONFIG.set(loaded_config).is_err() {
        warn!("[配置模块] 全局应用配置 APP_CONFIG 已被初始化，本次 init_config 调用未覆盖已有配置。请检查初始化流程。");
    }
    info!("[配置模块] 应用配置已成功初始化完毕。");
    get_config()
}

/// 获取已加载的全局应用配置；尚未初始化时按默认路径加载一次。
pub fn get_config() -> &'static AppConfig {
    APP_CONFIG.get_or_init(|| load_or_create_config(&get_config_file_path()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_station_firmware() {
        let config = AppConfig::default();
        assert_eq!(config.websocket.listen_addr(), "0.0.0.0:8765");
        assert_eq!(config.websocket.read_buffer_size, 1024);
        assert_eq!(config.station.history_length, 10);
        assert_eq!(config.station.sample_interval_seconds, 15);
    }

    #[test]
    fn test_missing_file_is_created_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE_NAME);
        let config = load_or_create_config(&path);
        assert_eq!(config, AppConfig::default());
        assert!(path.exists());
        let reloaded = load_or_create_config(&path);
        assert_eq!(reloaded, config);
    }

    #[test]
    fn test_partial_file_fills_missing_fields_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        fs::write(&path, r#"{"websocket":{"port":9000},"station":{"history_length":5}}"#).unwrap();
        let config = load_or_create_config(&path);
        assert_eq!(config.websocket.port, 9000);
        assert_eq!(config.websocket.host, DEFAULT_WS_HOST);
        assert_eq!(config.station.history_length, 5);
        assert_eq!(config.station.history_capacity, 1440);
        assert_eq!(config.station.history_backend, HistoryBackend::Csv);
    }

    #[test]
    fn test_history_backend_is_lowercase_in_file() {
        let station: StationConfig = serde_json::from_str(r#"{"history_backend":"memory"}"#).unwrap();
        assert_eq!(station.history_backend, HistoryBackend::Memory);
        let json = serde_json::to_value(StationConfig::default()).unwrap();
        assert_eq!(json["history_backend"], "csv");
    }

    #[test]
    fn test_corrupt_file_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        fs::write(&path, "{ not json").unwrap();
        let config = load_or_create_config(&path);
        assert_eq!(config, AppConfig::default());
        let rewritten = fs::read_to_string(&path).unwrap();
        assert!(serde_json::from_str::<AppConfig>(&rewritten).is_ok());
    }
}
