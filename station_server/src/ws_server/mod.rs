//! WebSocket 服务端模块。
//!
//! - `client_session`: 单个连接的会话状态与发送队列。
//! - `connection_registry`: 活动连接注册表。
//! - `connection_handler`: 每个连接的处理流程 (握手、分类、初始快照、空闲)。
//! - `broadcast_dispatcher`: 实时读数与历史记录的扇出。
//! - `history_refresher`: 定时向 `history` 客户端推送历史。
//! - `service`: 监听与 accept 循环，以及服务的启动与停止。

pub mod broadcast_dispatcher;
pub mod client_session;
pub mod connection_handler;
pub mod connection_registry;
pub mod history_refresher;
pub mod service;
