//! 机器人上行消息解析
//!
//! IN interrupt 端点 2 的每次传输格式为 `[robot_index][message...][lqi][rssi]`，
//! `message` 的首字节为消息类型。

use crate::{ProtocolError, RobotIndex, u16_from_le, u32_from_le};
use bilge::prelude::*;
use bytes::Bytes;

/// 上行消息类型字节
pub mod inbound_code {
    /// 周期性状态报告
    pub const GENERAL_STATUS: u8 = 0x00;
    /// 自动踢球已触发
    pub const AUTOKICK_FIRED: u8 = 0x01;
    /// 固件/FPGA 构建 ID
    pub const BUILD_IDS: u8 = 0x02;
    /// 固件操作应答
    pub const FIRMWARE_RESPONSE: u8 = 0x03;
    /// 球进入红外对射区
    pub const BALL_IN_BEAM: u8 = 0x04;
    /// 球离开红外对射区
    pub const BALL_OUT_OF_BEAM: u8 = 0x05;
}

/// 状态报告负载长度（不含类型字节）
pub const GENERAL_STATUS_LEN: usize = 9;

/// 构建 ID 负载长度（不含类型字节）
pub const BUILD_IDS_LEN: usize = 8;

/// 状态位（状态报告最后一个字节）
///
/// - Bit 0-5: 保留（记录器状态，主机侧不使用）
/// - Bit 6: 电容已充满
/// - Bit 7: 球在对射区内
#[bitsize(8)]
#[derive(FromBits, DebugBits, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusBits {
    pub reserved: u6,
    pub capacitor_charged: bool,
    pub ball_in_beam: bool,
}

/// 周期性状态报告 (0x00)
///
/// 保存 ADC 原始计数，物理量通过方法换算：
/// - 电池电压：0.001 V
/// - 电容电压：0.01 V
/// - 对射读数：0.001
/// - 盘带器温度：0.01 ℃
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeneralStatus {
    pub battery_raw: u16,
    pub capacitor_raw: u16,
    pub break_beam_raw: u16,
    pub temperature_raw: u16,
    pub status: StatusBits,
}

impl GeneralStatus {
    /// 从类型字节之后的负载解析，长度必须恰好为 9
    pub fn parse(payload: &[u8]) -> Result<Self, ProtocolError> {
        if payload.len() != GENERAL_STATUS_LEN {
            return Err(ProtocolError::InvalidLength {
                expected: GENERAL_STATUS_LEN,
                actual: payload.len(),
            });
        }
        Ok(Self {
            battery_raw: u16_from_le(&payload[0..2]),
            capacitor_raw: u16_from_le(&payload[2..4]),
            break_beam_raw: u16_from_le(&payload[4..6]),
            temperature_raw: u16_from_le(&payload[6..8]),
            status: StatusBits::from(u8::new(payload[8])),
        })
    }

    /// 电池电压（V）
    pub fn battery_voltage(&self) -> f64 {
        self.battery_raw as f64 / 1000.0
    }

    /// 电容电压（V）
    pub fn capacitor_voltage(&self) -> f64 {
        self.capacitor_raw as f64 / 100.0
    }

    /// 对射读数
    pub fn break_beam_reading(&self) -> f64 {
        self.break_beam_raw as f64 / 1000.0
    }

    /// 盘带器温度（℃）
    pub fn dribbler_temperature(&self) -> f64 {
        self.temperature_raw as f64 / 100.0
    }
}

/// 解析后的上行消息
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    GeneralStatus(GeneralStatus),
    AutokickFired,
    BuildIds { firmware: u32, fpga: u32 },
    /// 固件操作应答：`request` 为对应请求码，`payload` 为其余字节
    FirmwareResponse { request: u8, payload: Bytes },
    /// 球进入 (true) 或离开 (false) 对射区
    BallInBeam(bool),
}

impl InboundMessage {
    /// 解析 `message` 部分（首字节为类型）
    pub fn parse(message: &[u8]) -> Result<Self, ProtocolError> {
        let Some((&code, payload)) = message.split_first() else {
            return Err(ProtocolError::Truncated {
                minimum: 1,
                actual: 0,
            });
        };

        match code {
            inbound_code::GENERAL_STATUS => {
                Ok(InboundMessage::GeneralStatus(GeneralStatus::parse(payload)?))
            },
            inbound_code::AUTOKICK_FIRED => {
                expect_empty(payload)?;
                Ok(InboundMessage::AutokickFired)
            },
            inbound_code::BUILD_IDS => {
                if payload.len() != BUILD_IDS_LEN {
                    return Err(ProtocolError::InvalidLength {
                        expected: BUILD_IDS_LEN,
                        actual: payload.len(),
                    });
                }
                Ok(InboundMessage::BuildIds {
                    firmware: u32_from_le(&payload[0..4]),
                    fpga: u32_from_le(&payload[4..8]),
                })
            },
            inbound_code::FIRMWARE_RESPONSE => {
                let Some((&request, rest)) = payload.split_first() else {
                    return Err(ProtocolError::Truncated {
                        minimum: 1,
                        actual: 0,
                    });
                };
                Ok(InboundMessage::FirmwareResponse {
                    request,
                    payload: Bytes::copy_from_slice(rest),
                })
            },
            inbound_code::BALL_IN_BEAM => {
                expect_empty(payload)?;
                Ok(InboundMessage::BallInBeam(true))
            },
            inbound_code::BALL_OUT_OF_BEAM => {
                expect_empty(payload)?;
                Ok(InboundMessage::BallInBeam(false))
            },
            other => Err(ProtocolError::UnknownMessageType { code: other }),
        }
    }
}

fn expect_empty(payload: &[u8]) -> Result<(), ProtocolError> {
    if payload.is_empty() {
        Ok(())
    } else {
        Err(ProtocolError::InvalidLength {
            expected: 0,
            actual: payload.len(),
        })
    }
}

/// 一次 IN 传输：机器人索引、消息字节和链路质量尾部
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RobotFrame {
    pub robot: RobotIndex,
    pub message: Bytes,
    /// 链路质量指示（0-255）
    pub lqi: u8,
    /// 接收信号强度原始值（0-255）
    pub rssi: u8,
}

impl RobotFrame {
    /// 拆分帧头和尾部，`message` 部分留给 [`InboundMessage::parse`]
    pub fn parse(data: &[u8]) -> Result<Self, ProtocolError> {
        if data.len() < 3 {
            return Err(ProtocolError::Truncated {
                minimum: 3,
                actual: data.len(),
            });
        }
        let robot = RobotIndex::new(data[0])?;
        let trailer = data.len() - 2;
        Ok(Self {
            robot,
            message: Bytes::copy_from_slice(&data[1..trailer]),
            lqi: data[trailer],
            rssi: data[trailer + 1],
        })
    }

    /// 链路质量（0.0-1.0）
    pub fn link_quality(&self) -> f64 {
        self.lqi as f64 / 255.0
    }

    /// 信号强度（dBm）
    pub fn rssi_dbm(&self) -> i8 {
        rssi_to_dbm(self.rssi)
    }
}

/// MRF24J40 RSSI 原始值到 dBm 的查找表（降序）
const RSSI_TABLE: [(u8, i8); 56] = [
    (255, -35),
    (254, -36),
    (253, -37),
    (250, -38),
    (245, -39),
    (239, -40),
    (233, -41),
    (228, -42),
    (225, -43),
    (221, -44),
    (216, -45),
    (212, -46),
    (207, -47),
    (203, -48),
    (198, -49),
    (193, -50),
    (188, -51),
    (183, -52),
    (176, -53),
    (170, -54),
    (165, -55),
    (159, -56),
    (153, -57),
    (148, -58),
    (143, -59),
    (138, -60),
    (133, -61),
    (129, -62),
    (125, -63),
    (121, -64),
    (117, -65),
    (111, -66),
    (107, -67),
    (100, -68),
    (95, -69),
    (89, -70),
    (83, -71),
    (78, -72),
    (73, -73),
    (68, -74),
    (63, -75),
    (58, -76),
    (53, -77),
    (48, -78),
    (43, -79),
    (37, -80),
    (32, -81),
    (27, -82),
    (23, -83),
    (18, -84),
    (13, -85),
    (9, -86),
    (5, -87),
    (2, -88),
    (1, -89),
    (0, -90),
];

/// 查表换算 RSSI：取第一个原始值严格小于 `rssi` 的表项
pub fn rssi_to_dbm(rssi: u8) -> i8 {
    RSSI_TABLE
        .iter()
        .find(|&&(raw, _)| raw < rssi)
        .map(|&(_, db)| db)
        .unwrap_or(-90)
}

/// dongle 急停开关状态（IN interrupt 端点 3）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, num_enum::TryFromPrimitive)]
#[repr(u8)]
pub enum EStopState {
    /// 急停按下
    Stop = 0,
    /// 正常运行
    Run = 1,
    /// 急停开关断线或读数异常
    #[default]
    Broken = 2,
}

impl EStopState {
    /// 解析状态字节，未知值返回错误
    pub fn parse(data: &[u8]) -> Result<Self, ProtocolError> {
        if data.len() != 1 {
            return Err(ProtocolError::InvalidLength {
                expected: 1,
                actual: data.len(),
            });
        }
        EStopState::try_from(data[0]).map_err(|_| ProtocolError::InvalidValue {
            field: "EStopState".to_string(),
            value: data[0] as u32,
        })
    }
}
