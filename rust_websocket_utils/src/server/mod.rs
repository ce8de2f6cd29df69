// rust_websocket_utils/src/server/mod.rs

//! WebSocket 服务端模块。
//!
//! `transport` 子模块在原始 TCP 流上完成握手，提供按帧读写的 `WsReader` / `WsWriter`。
//! 连接的注册、广播与生命周期管理由上层服务 (`station_server`) 负责。

pub mod transport;
