//! `common_models` 公共模型库 crate。
//!
//! 本 crate 集中定义了气象站项目各个 Rust 组件（`station_server` 服务端、
//! `rust_websocket_utils` 工具库以及 `station_monitor` 等客户端）之间共享的核心数据结构和枚举类型。
//!
//! 主要包含以下类型的模型：
//! - **通用枚举 (`enums`)**: 订阅类型 (`SubscriptionKind`) 与天气状况 (`Condition`)。
//! - **采样数据 (`sample`)**: 传感器产生的一次读数 `Sample`，以及读数校验错误 `ModelError`。
//! - **WebSocket 消息负载 (`ws_payloads`)**: 客户端订阅请求、实时更新、历史记录响应等 JSON 结构体。
//!
//! 所有在线上传输的模型都派生 `Serialize`/`Deserialize`，并派生 `Debug`/`Clone` 以方便调试与复制。

pub mod enums;
pub mod sample;
pub mod ws_payloads;

pub use enums::{Condition, SubscriptionKind};
pub use sample::{ModelError, Sample};
