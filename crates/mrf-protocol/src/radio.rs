//! 无线参数与 USB 控制请求
//!
//! dongle 在配置 1 下接收无线参数（信道、符号率、PAN ID、MAC 地址），
//! 切换到配置 2 后开始收发。

use crate::ProtocolError;

/// dongle 的 USB Vendor ID
pub const DONGLE_VID: u16 = 0x0483;

/// dongle 的 USB Product ID
pub const DONGLE_PID: u16 = 0x497C;

/// 可用的 IEEE 802.15.4 信道范围
pub const CHANNEL_RANGE: std::ops::RangeInclusive<u8> = 11..=26;

/// PAN ID 上限（0xFFFF 为广播地址，不可用）
pub const MAX_PAN_ID: u16 = 0xFFFE;

/// 厂商控制请求码
#[derive(Debug, Clone, Copy, PartialEq, Eq, num_enum::IntoPrimitive)]
#[repr(u8)]
pub enum ControlRequest {
    SetChannel = 0x01,
    SetSymbolRate = 0x03,
    SetPanId = 0x05,
    SetMacAddress = 0x07,
    /// 蜂鸣，`value` 为毫秒数
    Beep = 0x0D,
}

/// 符号率
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SymbolRate {
    /// 250 kb/s（标准速率）
    #[default]
    Standard,
    /// 625 kb/s（MRF24J40 专有 turbo 模式）
    Turbo,
}

impl SymbolRate {
    /// 从 kb/s 数值构造，只接受 250 和 625
    pub fn from_kbps(kbps: u32) -> Result<Self, ProtocolError> {
        match kbps {
            250 => Ok(SymbolRate::Standard),
            625 => Ok(SymbolRate::Turbo),
            other => Err(ProtocolError::InvalidValue {
                field: "symbol_rate".to_string(),
                value: other,
            }),
        }
    }

    pub fn kbps(self) -> u32 {
        match self {
            SymbolRate::Standard => 250,
            SymbolRate::Turbo => 625,
        }
    }

    /// 控制请求中的 `wValue`
    pub fn control_value(self) -> u16 {
        match self {
            SymbolRate::Standard => 0,
            SymbolRate::Turbo => 1,
        }
    }
}

/// 无线参数
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct RadioConfig {
    /// 信道（11-26）
    pub channel: u8,
    /// 符号率（kb/s，250 或 625）
    pub symbol_rate: u32,
    /// PAN ID（0x0000-0xFFFE）
    pub pan_id: u16,
    /// dongle 的 64 位 MAC 地址
    pub mac_address: u64,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            channel: 20,
            symbol_rate: 250,
            pan_id: 0x1846,
            mac_address: 0x20cb_13bd_834a_b817,
        }
    }
}

impl RadioConfig {
    /// 校验所有参数
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if !CHANNEL_RANGE.contains(&self.channel) {
            return Err(ProtocolError::InvalidValue {
                field: "channel".to_string(),
                value: self.channel as u32,
            });
        }
        SymbolRate::from_kbps(self.symbol_rate)?;
        if self.pan_id > MAX_PAN_ID {
            return Err(ProtocolError::InvalidValue {
                field: "pan_id".to_string(),
                value: self.pan_id as u32,
            });
        }
        Ok(())
    }

    /// 按发送顺序生成配置阶段的控制请求：`(request, value, data)`
    pub fn control_requests(&self) -> Result<Vec<(ControlRequest, u16, Vec<u8>)>, ProtocolError> {
        self.validate()?;
        let rate = SymbolRate::from_kbps(self.symbol_rate)?;
        Ok(vec![
            (ControlRequest::SetChannel, self.channel as u16, Vec::new()),
            (ControlRequest::SetSymbolRate, rate.control_value(), Vec::new()),
            (ControlRequest::SetPanId, self.pan_id, Vec::new()),
            (
                ControlRequest::SetMacAddress,
                0,
                self.mac_address.to_le_bytes().to_vec(),
            ),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = RadioConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.channel, 20);
        assert_eq!(config.pan_id, 0x1846);
    }

    #[test]
    fn test_channel_range() {
        for channel in [10u8, 27] {
            let config = RadioConfig {
                channel,
                ..Default::default()
            };
            let err = config.validate().unwrap_err();
            assert!(err.to_string().contains("channel"));
        }
        for channel in [11u8, 26] {
            let config = RadioConfig {
                channel,
                ..Default::default()
            };
            assert!(config.validate().is_ok());
        }
    }

    #[test]
    fn test_symbol_rate() {
        assert_eq!(SymbolRate::from_kbps(625).unwrap(), SymbolRate::Turbo);
        assert_eq!(SymbolRate::Turbo.control_value(), 1);
        assert!(SymbolRate::from_kbps(500).is_err());
    }

    #[test]
    fn test_pan_broadcast_rejected() {
        let config = RadioConfig {
            pan_id: 0xFFFF,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_control_requests_order() {
        let requests = RadioConfig::default().control_requests().unwrap();
        let codes: Vec<u8> = requests.iter().map(|(r, _, _)| u8::from(*r)).collect();
        assert_eq!(codes, vec![0x01, 0x03, 0x05, 0x07]);
        assert_eq!(requests[0].1, 20);
        assert_eq!(requests[2].1, 0x1846);
        assert_eq!(requests[3].2, 0x20cb_13bd_834a_b817u64.to_le_bytes().to_vec());
    }
}
