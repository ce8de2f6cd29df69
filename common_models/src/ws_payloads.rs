// common_models/src/ws_payloads.rs

//! 包含 WebSocket 通信中使用的各种 Payload 结构体定义。
//!
//! 线上格式全部为 JSON 文本，放在单个 WebSocket 文本帧内：
//! - 客户端订阅请求：`{"request": "live"}` 或 `{"request": "history"}`
//! - 服务端实时更新：`{"temperature": .., "humidity": .., "pressure": .., "condition": ".."}`
//! - 服务端历史响应：`{"history": [ {"hour": .., "temperature": .., "pressure": .., "humidity": ..}, ... ]}`，
//!   存储不可用时为 `{"history": "unavailable"}`

use chrono::Local;
use serde::{Deserialize, Serialize};

use crate::enums::{Condition, SubscriptionKind};
use crate::sample::Sample;

/// 客户端在握手完成后发送的订阅请求。
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientRequest {
    pub request: SubscriptionKind,
}

impl ClientRequest {
    pub fn new(request: SubscriptionKind) -> Self {
        Self { request }
    }
}

/// 推送给 `live` 客户端的一次实时更新。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LiveUpdate {
    pub temperature: f64,
    pub humidity: f64,
    pub pressure: f64,
    pub condition: Condition,
}

impl From<&Sample> for LiveUpdate {
    fn from(sample: &Sample) -> Self {
        Self {
            temperature: sample.temperature(),
            humidity: sample.humidity(),
            pressure: sample.pressure(),
            condition: sample.condition(),
        }
    }
}

/// 历史记录中的一行，字段顺序与站点 CSV 文件的列顺序一致。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct HistoryRecord {
    /// 记录时刻的当地时间，格式 `HH:MM:SS`。
    pub hour: String,
    pub temperature: f64,
    pub pressure: f64,
    pub humidity: f64,
}

impl HistoryRecord {
    /// 用采样时刻的当地时间构造一条历史记录。
    pub fn from_sample(sample: &Sample) -> Self {
        Self {
            hour: sample
                .timestamp()
                .with_timezone(&Local)
                .format("%H:%M:%S")
                .to_string(),
            temperature: sample.temperature(),
            pressure: sample.pressure(),
            humidity: sample.humidity(),
        }
    }
}

/// 存储状态标记，目前只有 `unavailable` 一种取值。
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageStatus {
    Unavailable,
}

/// 历史存储的读取结果。
///
/// 必须区分“没有数据”（空列表）与“没有存储”（`unavailable` 标记）。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum HistoryData {
    /// 按时间顺序排列的记录，最旧的在前。
    Records(Vec<HistoryRecord>),
    /// 后备存储未挂载或不可读。
    Status(StorageStatus),
}

impl HistoryData {
    pub fn unavailable() -> Self {
        HistoryData::Status(StorageStatus::Unavailable)
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, HistoryData::Status(StorageStatus::Unavailable))
    }

    /// 返回记录切片；存储不可用时返回 `None`。
    pub fn records(&self) -> Option<&[HistoryRecord]> {
        match self {
            HistoryData::Records(records) => Some(records),
            HistoryData::Status(_) => None,
        }
    }
}

/// 推送给 `history` 客户端的历史响应。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct HistoryResponse {
    pub history: HistoryData,
}

/// 客户端侧用来解析任意服务端消息的枚举。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum ServerMessage {
    History(HistoryResponse),
    Live(LiveUpdate),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    #[test]
    fn test_client_request_wire_format() {
        let parsed: ClientRequest = serde_json::from_str(r#"{"request":"history"}"#).unwrap();
        assert_eq!(parsed.request, SubscriptionKind::History);
        assert_eq!(
            serde_json::to_string(&ClientRequest::new(SubscriptionKind::Live)).unwrap(),
            r#"{"request":"live"}"#
        );
        assert!(serde_json::from_str::<ClientRequest>(r#"{"solicitud":"real"}"#).is_err());
    }

    #[test]
    fn test_live_update_matches_wire_shape() {
        let sample = Sample::new(22.5, 55.0, 1012.25, Condition::Cloudy);
        let value = serde_json::to_value(LiveUpdate::from(&sample)).unwrap();
        assert_eq!(
            value,
            json!({"temperature": 22.5, "humidity": 55.0, "pressure": 1012.25, "condition": "cloudy"})
        );
    }

    #[test]
    fn test_unavailable_history_is_not_an_empty_list() {
        let response = HistoryResponse { history: HistoryData::unavailable() };
        let value: Value = serde_json::to_value(&response).unwrap();
        assert_eq!(value, json!({"history": "unavailable"}));

        let empty = HistoryResponse { history: HistoryData::Records(Vec::new()) };
        assert_eq!(serde_json::to_value(&empty).unwrap(), json!({"history": []}));

        let parsed: HistoryResponse = serde_json::from_value(value).unwrap();
        assert!(parsed.history.is_unavailable());
        assert!(parsed.history.records().is_none());
    }

    #[test]
    fn test_server_message_distinguishes_live_and_history() {
        let live: ServerMessage = serde_json::from_str(
            r#"{"temperature":20.0,"humidity":40.0,"pressure":1015.0,"condition":"clear"}"#,
        )
        .unwrap();
        assert!(matches!(live, ServerMessage::Live(ref update) if update.condition == Condition::Clear));

        let history: ServerMessage = serde_json::from_str(
            r#"{"history":[{"hour":"10:00:00","temperature":20.0,"pressure":1015.0,"humidity":40.0}]}"#,
        )
        .unwrap();
        match history {
            ServerMessage::History(response) => {
                assert_eq!(response.history.records().map(|r| r.len()), Some(1));
            }
            other => panic!("预期历史响应，实际得到: {:?}", other),
        }
    }

    #[test]
    fn test_history_record_hour_format() {
        let sample = Sample::new(19.0, 61.0, 1009.0, Condition::Cloudy);
        let record = HistoryRecord::from_sample(&sample);
        assert_eq!(record.hour.len(), 8);
        assert_eq!(record.hour.matches(':').count(), 2);
        assert_eq!(record.pressure, 1009.0);
    }
}
