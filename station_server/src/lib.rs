//! `station_server` 气象站服务端核心库。
//!
//! 通过手写的 WebSocket 服务向客户端推送实时读数 (`live`) 与历史记录 (`history`)。
//!
//! 主要模块包括：
//! - `config`: 管理应用的配置信息加载与访问。
//! - `connectivity`: 根据网络连通性启动或停止服务。
//! - `error`: 定义应用特定的错误类型。
//! - `history`: 历史记录存储 (内存与按天 CSV 文件)。
//! - `sensor`: 采样来源与采样循环。
//! - `state`: 进程内共享状态 (最近一次采样)。
//! - `ws_server`: WebSocket 服务端，处理客户端连接、分类与广播。

pub mod config;
pub mod connectivity;
pub mod error;
pub mod history;
pub mod sensor;
pub mod state;
pub mod ws_server;
