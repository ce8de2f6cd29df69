//! 通用枚举模块。
//!
//! 本模块定义了在气象站项目中多个组件之间共享的通用枚举类型：
//! 客户端的订阅类型，以及根据读数推断出的天气状况。

use serde::{Deserialize, Serialize};
use std::fmt;

/// 表示 WebSocket 客户端的订阅类型。
///
/// 订阅类型在连接建立后由客户端发送的第一条应用层消息确定，之后不再改变。
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionKind {
    /// 实时订阅：每产生一个新的 `Sample` 就推送一次。
    #[default]
    Live,
    /// 历史订阅：按需（以及按较慢的刷新周期）接收最近若干条记录。
    History,
}

impl fmt::Display for SubscriptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubscriptionKind::Live => write!(f, "live"),
            SubscriptionKind::History => write!(f, "history"),
        }
    }
}

/// 根据温度、湿度、气压推断出的天气状况。
///
/// 序列化为 snake_case 字符串，客户端直接用它来选择图标与背景配色。
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    Rain,
    Cloudy,
    Clear,
    Hot,
    Cold,
    Windy,
    NormalNight,
    NormalDay,
}

/// 两次读数之间气压变化超过此值 (hPa) 视为有风。
const WIND_PRESSURE_GRADIENT_HPA: f64 = 5.0;

impl Condition {
    /// 按固定顺序逐条匹配规则，返回第一条命中的天气状况。
    ///
    /// # Arguments
    /// * `temperature` - 温度 (°C)。
    /// * `humidity` - 相对湿度 (%)。
    /// * `pressure` - 气压 (hPa)。
    /// * `previous_pressure` - 上一次读数的气压，没有时为 `None`，此时跳过风力判断。
    /// * `local_hour` - 当地时间的小时数 (0-23)，用于区分白天与夜晚。
    pub fn classify(
        temperature: f64,
        humidity: f64,
        pressure: f64,
        previous_pressure: Option<f64>,
        local_hour: u32,
    ) -> Condition {
        let gradient = previous_pressure.map(|previous| previous - pressure);

        if humidity >= 80.0 && pressure <= 1005.0 {
            Condition::Rain
        } else if (60.0..80.0).contains(&humidity) && (1006.0..=1015.0).contains(&pressure) {
            Condition::Cloudy
        } else if humidity < 60.0 && pressure >= 1015.0 && temperature >= 20.0 {
            Condition::Clear
        } else if temperature > 30.0 {
            Condition::Hot
        } else if temperature < 10.0 {
            Condition::Cold
        } else if gradient.is_some_and(|g| g.abs() > WIND_PRESSURE_GRADIENT_HPA) {
            Condition::Windy
        } else if local_hour >= 18 || local_hour < 6 {
            Condition::NormalNight
        } else {
            Condition::NormalDay
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Condition::Rain => "rain",
            Condition::Cloudy => "cloudy",
            Condition::Clear => "clear",
            Condition::Hot => "hot",
            Condition::Cold => "cold",
            Condition::Windy => "windy",
            Condition::NormalNight => "normal_night",
            Condition::NormalDay => "normal_day",
        };
        f.write_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscription_kind_wire_format() {
        assert_eq!(serde_json::to_string(&SubscriptionKind::Live).unwrap(), "\"live\"");
        assert_eq!(serde_json::to_string(&SubscriptionKind::History).unwrap(), "\"history\"");
        let parsed: SubscriptionKind = serde_json::from_str("\"history\"").unwrap();
        assert_eq!(parsed, SubscriptionKind::History);
        // 未知的订阅类型应当反序列化失败，由调用方回退为 live
        assert!(serde_json::from_str::<SubscriptionKind>("\"hourly\"").is_err());
        assert_eq!(SubscriptionKind::default(), SubscriptionKind::Live);
    }

    #[test]
    fn test_condition_rules_follow_declared_order() {
        // 湿度高且气压低：即使温度很高也优先判定为降雨
        assert_eq!(Condition::classify(35.0, 85.0, 1000.0, None, 12), Condition::Rain);
        assert_eq!(Condition::classify(18.0, 70.0, 1010.0, None, 12), Condition::Cloudy);
        assert_eq!(Condition::classify(24.0, 40.0, 1020.0, None, 12), Condition::Clear);
        assert_eq!(Condition::classify(33.0, 50.0, 1010.0, None, 12), Condition::Hot);
        assert_eq!(Condition::classify(5.0, 50.0, 1010.0, None, 12), Condition::Cold);
        assert_eq!(Condition::classify(15.0, 50.0, 1010.0, Some(1017.0), 12), Condition::Windy);
        assert_eq!(Condition::classify(15.0, 50.0, 1010.0, Some(1012.0), 12), Condition::NormalDay);
        assert_eq!(Condition::classify(15.0, 50.0, 1010.0, None, 22), Condition::NormalNight);
        assert_eq!(Condition::classify(15.0, 50.0, 1010.0, None, 3), Condition::NormalNight);
    }

    #[test]
    fn test_condition_serializes_as_snake_case() {
        assert_eq!(serde_json::to_string(&Condition::NormalNight).unwrap(), "\"normal_night\"");
        assert_eq!(Condition::NormalDay.to_string(), "normal_day");
    }
}
