//! # MRF Protocol
//!
//! MRF24J40 无线 dongle 的线上数据格式定义（无硬件依赖）
//!
//! ## 模块
//!
//! - `drive`: 驱动帧（8 个机器人 × 4 个 16 位字）编码/解码
//! - `message`: 非可靠/可靠消息封帧、踢球指令
//! - `report`: 消息投递报告（MDR）
//! - `inbound`: 机器人上行消息解析（状态、自动踢球、构建 ID、固件应答）
//! - `firmware`: 固件烧写请求与运行参数块
//! - `radio`: 无线参数与 USB 控制请求
//!
//! ## 字节序
//!
//! 所有多字节字段均为小端（LSB 在前）。

pub mod drive;
pub mod firmware;
pub mod inbound;
pub mod message;
pub mod radio;
pub mod report;

// 重新导出常用类型
pub use drive::*;
pub use firmware::*;
pub use inbound::*;
pub use message::*;
pub use radio::*;
pub use report::*;

use thiserror::Error;

/// 单个 dongle 可寻址的机器人数量
pub const ROBOT_COUNT: usize = 8;

/// 机器人索引（0..=7）
///
/// 所有按机器人划分的表都以它为键。构造时校验范围，
/// 之后的访问不再需要边界检查。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RobotIndex(u8);

impl RobotIndex {
    /// 创建机器人索引，超出范围返回错误
    pub fn new(index: u8) -> Result<Self, ProtocolError> {
        if (index as usize) < ROBOT_COUNT {
            Ok(Self(index))
        } else {
            Err(ProtocolError::InvalidRobotIndex { index })
        }
    }

    /// 原始索引值
    pub fn get(self) -> u8 {
        self.0
    }

    /// 作为数组下标使用
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }

    /// 遍历全部机器人索引
    pub fn all() -> impl Iterator<Item = RobotIndex> {
        (0..ROBOT_COUNT as u8).map(RobotIndex)
    }
}

impl TryFrom<u8> for RobotIndex {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl std::fmt::Display for RobotIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 协议解析错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Invalid frame length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("Frame too short: need at least {minimum} bytes, got {actual}")]
    Truncated { minimum: usize, actual: usize },

    #[error("Invalid robot index: {index}")]
    InvalidRobotIndex { index: u8 },

    #[error("Unknown message type: 0x{code:02X}")]
    UnknownMessageType { code: u8 },

    #[error("Invalid value for field {field}: {value}")]
    InvalidValue { field: String, value: u32 },

    #[error("Payload too large: {len} bytes (max {max})")]
    PayloadTooLarge { len: usize, max: usize },
}

/// 小端字节序转 u16
pub fn u16_from_le(bytes: &[u8]) -> u16 {
    u16::from_le_bytes([bytes[0], bytes[1]])
}

/// 小端字节序转 u32
pub fn u32_from_le(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}
