//! 传感器采样数据模型。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::enums::Condition;

/// 模型校验错误。
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    /// 读数不是有限数值 (NaN 或无穷大)，无法编码为 JSON 数字。
    #[error("读数字段 {field} 不是有限数值: {value}")]
    NonFiniteReading { field: &'static str, value: f64 },
}

/// 一次完整的气象读数。
///
/// 由外部的采样任务按固定周期构造，构造后不可修改。
/// `timestamp` 在构造时自动记录，不会出现在实时推送的线上格式中。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Sample {
    temperature: f64,
    humidity: f64,
    pressure: f64,
    condition: Condition,
    timestamp: DateTime<Utc>,
}

impl Sample {
    pub fn new(temperature: f64, humidity: f64, pressure: f64, condition: Condition) -> Self {
        Self {
            temperature,
            humidity,
            pressure,
            condition,
            timestamp: Utc::now(),
        }
    }

    pub fn temperature(&self) -> f64 {
        self.temperature
    }

    pub fn humidity(&self) -> f64 {
        self.humidity
    }

    pub fn pressure(&self) -> f64 {
        self.pressure
    }

    pub fn condition(&self) -> Condition {
        self.condition
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// 检查所有读数是否为有限数值。
    ///
    /// `serde_json` 会把 NaN 静默编码成 `null`，所以广播前必须先调用此方法。
    pub fn validate(&self) -> Result<(), ModelError> {
        for (field, value) in [
            ("temperature", self.temperature),
            ("humidity", self.humidity),
            ("pressure", self.pressure),
        ] {
            if !value.is_finite() {
                return Err(ModelError::NonFiniteReading { field, value });
            }
        }
        Ok(())
    }
}
