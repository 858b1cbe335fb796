//! 驱动层错误类型定义

use crate::firmware::UploadStep;
use mrf_protocol::ProtocolError;
use mrf_usb::TransferError;
use thiserror::Error;

/// 驱动层错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    /// 协议编码错误（负载过长等）
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// 传输层错误
    #[error("Transfer error: {0}")]
    Transfer(#[from] TransferError),

    /// 消息 ID 分配错误
    #[error("Message ID error: {0}")]
    MessageIds(#[from] MessageIdError),
}

/// 消息 ID 池错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MessageIdError {
    /// 256 个 ID 全部在用：同时在途的可靠消息过多
    #[error("Out of reliable message IDs (256 in flight)")]
    Exhausted,

    /// 释放了未分配的 ID（重复释放）
    #[error("Message ID {0} released but not allocated")]
    NotAllocated(u8),
}

/// 可靠消息的失败原因
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReliableError {
    /// OUT 传输本身失败，消息未到达 dongle
    #[error("Reliable message transfer failed: {0}")]
    Transport(TransferError),

    #[error("Message sent to robot that is not associated")]
    NotAssociated,

    #[error("Message sent to robot not acknowledged")]
    NotAcknowledged,

    #[error("Message sent to robot failed to find clear channel")]
    ClearChannel,

    /// dongle 上报了未知的投递状态码
    #[error("Unknown delivery status 0x{0:02X}")]
    UnknownStatus(u8),

    /// 操作尚未完成
    #[error("Reliable message still pending")]
    Incomplete,
}

impl ReliableError {
    /// 协议语义失败（未关联/未确认/信道繁忙），区别于传输失败
    pub fn is_delivery_failure(&self) -> bool {
        matches!(
            self,
            ReliableError::NotAssociated
                | ReliableError::NotAcknowledged
                | ReliableError::ClearChannel
        )
    }
}

/// 固件烧写失败
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UploadError {
    /// 镜像为空
    #[error("Firmware image is empty")]
    EmptyImage,

    /// 镜像超出 24 位地址空间
    #[error("Firmware image too large: {len} bytes (max {max})")]
    ImageTooLarge { len: usize, max: usize },

    /// 无法发出某一步的请求
    #[error("Failed to start {step}: {source}")]
    Start {
        step: UploadStep,
        source: DriverError,
    },

    /// 某一步的可靠消息失败
    #[error("{step} failed: {source}")]
    Step {
        step: UploadStep,
        source: ReliableError,
    },

    /// 机器人应答格式错误
    #[error("Bad response to {step}: {source}")]
    BadResponse {
        step: UploadStep,
        source: ProtocolError,
    },

    /// 块 CRC 不一致，后续内容不可信
    #[error("Block {block} CRC mismatch: expected 0x{expected:04X}, got 0x{actual:04X}")]
    CrcMismatch { block: usize, expected: u16, actual: u16 },
}

/// 配置加载错误
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid number in {var}: {value:?}")]
    InvalidNumber { var: String, value: String },

    #[error("Invalid radio configuration: {0}")]
    InvalidRadio(#[from] ProtocolError),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

/// 打开 USB dongle 失败
#[cfg(feature = "usb")]
#[derive(Error, Debug)]
pub enum OpenError {
    #[error(transparent)]
    Usb(#[from] mrf_usb::UsbError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
