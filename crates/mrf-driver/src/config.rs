//! dongle 配置
//!
//! TOML 文件 + 环境变量覆盖。环境变量里的数字按 C 风格前缀解析：
//! `0x` 十六进制，前导 `0` 八进制，其余十进制。

use crate::error::ConfigError;
use mrf_protocol::RadioConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// dongle 运行配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DongleConfig {
    /// USB 序列号过滤，None 表示第一个匹配的设备
    pub serial: Option<String>,
    /// 同时在途的非可靠消息上限，超出时丢弃最旧的
    pub unreliable_in_flight_limit: usize,
    /// 事件队列容量
    pub event_queue_capacity: usize,
    /// 视觉队列容量
    pub vision_queue_capacity: usize,
    /// 每 N 帧视觉数据转发一次相机消息
    pub camera_relay_divisor: u32,
    /// 反馈超时（毫秒）
    pub feedback_timeout_ms: u64,
    /// 单次 USB 传输超时（毫秒）
    pub transfer_timeout_ms: u64,
    /// 无线参数
    pub radio: RadioConfig,
}

impl Default for DongleConfig {
    fn default() -> Self {
        Self {
            serial: None,
            unreliable_in_flight_limit: 32,
            event_queue_capacity: 256,
            vision_queue_capacity: 16,
            camera_relay_divisor: 3,
            feedback_timeout_ms: 3000,
            transfer_timeout_ms: 100,
            radio: RadioConfig::default(),
        }
    }
}

impl DongleConfig {
    /// 从 TOML 文本解析，缺省字段取默认值
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: DongleConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// 从文件加载
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        debug!("Loaded dongle config from {}", path.display());
        Self::from_toml_str(&text)
    }

    /// 应用进程环境变量覆盖
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_from(|var| std::env::var(var).ok())
    }

    /// 用给定的查找函数应用覆盖（`MRF_CHANNEL`、`MRF_SYMBOL_RATE`、`MRF_PAN`、`MRF_SERIAL`）
    pub fn apply_env_from(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(value) = lookup("MRF_CHANNEL") {
            self.radio.channel = parse_number(&value, "MRF_CHANNEL", u8::MAX as u64)? as u8;
        }
        if let Some(value) = lookup("MRF_SYMBOL_RATE") {
            self.radio.symbol_rate =
                parse_number(&value, "MRF_SYMBOL_RATE", u32::MAX as u64)? as u32;
        }
        if let Some(value) = lookup("MRF_PAN") {
            self.radio.pan_id = parse_number(&value, "MRF_PAN", u16::MAX as u64)? as u16;
        }
        if let Some(value) = lookup("MRF_SERIAL") {
            self.serial = (!value.is_empty()).then_some(value);
        }
        self.validate()
    }

    /// 校验取值范围
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.radio.validate()?;
        let positive = [
            ("unreliable_in_flight_limit", self.unreliable_in_flight_limit as u64),
            ("event_queue_capacity", self.event_queue_capacity as u64),
            ("vision_queue_capacity", self.vision_queue_capacity as u64),
            ("camera_relay_divisor", self.camera_relay_divisor as u64),
            ("feedback_timeout_ms", self.feedback_timeout_ms),
            ("transfer_timeout_ms", self.transfer_timeout_ms),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    reason: "must be greater than zero".to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn feedback_timeout(&self) -> Duration {
        Duration::from_millis(self.feedback_timeout_ms)
    }

    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_millis(self.transfer_timeout_ms)
    }
}

/// C 风格整数解析
fn parse_number(value: &str, var: &str, max: u64) -> Result<u64, ConfigError> {
    let trimmed = value.trim();
    let parsed = if let Some(hex) = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        u64::from_str_radix(hex, 16)
    } else if trimmed.len() > 1 && trimmed.starts_with('0') {
        u64::from_str_radix(&trimmed[1..], 8)
    } else {
        trimmed.parse::<u64>()
    };

    match parsed {
        Ok(n) if n <= max => Ok(n),
        _ => Err(ConfigError::InvalidNumber {
            var: var.to_string(),
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = DongleConfig::default();
        assert_eq!(config.radio.channel, 20);
        assert_eq!(config.radio.pan_id, 0x1846);
        assert_eq!(config.unreliable_in_flight_limit, 32);
        assert_eq!(config.vision_queue_capacity, 16);
        assert_eq!(config.camera_relay_divisor, 3);
        assert_eq!(config.feedback_timeout(), Duration::from_secs(3));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml_partial() {
        let config = DongleConfig::from_toml_str(
            r#"
            serial = "ABC123"
            camera_relay_divisor = 5

            [radio]
            channel = 25
            "#,
        )
        .unwrap();
        assert_eq!(config.serial.as_deref(), Some("ABC123"));
        assert_eq!(config.camera_relay_divisor, 5);
        assert_eq!(config.radio.channel, 25);
        // 未写的字段保持默认
        assert_eq!(config.radio.symbol_rate, 250);
        assert_eq!(config.event_queue_capacity, 256);
    }

    #[test]
    fn test_from_toml_rejects_bad_channel() {
        let err = DongleConfig::from_toml_str("[radio]\nchannel = 5\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidRadio(_)));
    }

    #[test]
    fn test_from_toml_rejects_zero_capacity() {
        let err = DongleConfig::from_toml_str("event_queue_capacity = 0").unwrap_err();
        assert!(err.to_string().contains("event_queue_capacity"));
    }

    #[test]
    fn test_env_overrides_with_radix() {
        let mut config = DongleConfig::default();
        config
            .apply_env_from(env(&[
                ("MRF_CHANNEL", "0x19"),
                ("MRF_SYMBOL_RATE", "625"),
                ("MRF_PAN", "0x1234"),
                ("MRF_SERIAL", "DONGLE7"),
            ]))
            .unwrap();
        assert_eq!(config.radio.channel, 25);
        assert_eq!(config.radio.symbol_rate, 625);
        assert_eq!(config.radio.pan_id, 0x1234);
        assert_eq!(config.serial.as_deref(), Some("DONGLE7"));
    }

    #[test]
    fn test_env_octal() {
        let mut config = DongleConfig::default();
        config.apply_env_from(env(&[("MRF_CHANNEL", "013")])).unwrap();
        assert_eq!(config.radio.channel, 11);
    }

    #[test]
    fn test_env_out_of_range() {
        let mut config = DongleConfig::default();
        let err = config
            .apply_env_from(env(&[("MRF_CHANNEL", "27")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidRadio(_)));

        let mut config = DongleConfig::default();
        let err = config
            .apply_env_from(env(&[("MRF_PAN", "0x10000")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidNumber { .. }));

        let mut config = DongleConfig::default();
        let err = config
            .apply_env_from(env(&[("MRF_SYMBOL_RATE", "fast")]))
            .unwrap_err();
        assert!(err.to_string().contains("MRF_SYMBOL_RATE"));
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = DongleConfig {
            serial: Some("X".to_string()),
            ..Default::default()
        };
        let text = toml::to_string(&config).unwrap();
        assert_eq!(DongleConfig::from_toml_str(&text).unwrap(), config);
    }
}
