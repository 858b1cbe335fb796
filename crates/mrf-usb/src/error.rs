//! USB 传输错误类型

use thiserror::Error;

/// 单次传输的失败原因
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransferError {
    #[error("Transfer timed out")]
    Timeout,

    #[error("Endpoint stalled")]
    Stall,

    #[error("Transfer cancelled")]
    Cancelled,

    #[error("Device disconnected")]
    NoDevice,

    #[error("Transfer I/O error: {0}")]
    Io(String),

    #[error("Transfer already submitted")]
    AlreadySubmitted,

    #[error("Transfer not yet complete")]
    Incomplete,

    #[error("Transport queue full")]
    Busy,

    #[error("Transport closed")]
    Closed,
}

impl TransferError {
    /// 设备已不可用，后续传输都会失败
    pub fn is_fatal(&self) -> bool {
        matches!(self, TransferError::NoDevice | TransferError::Closed)
    }
}

#[cfg(feature = "usb")]
impl From<rusb::Error> for TransferError {
    fn from(err: rusb::Error) -> Self {
        match err {
            rusb::Error::Timeout => TransferError::Timeout,
            rusb::Error::Pipe => TransferError::Stall,
            rusb::Error::NoDevice => TransferError::NoDevice,
            other => TransferError::Io(other.to_string()),
        }
    }
}

/// 设备打开/配置阶段的错误
#[cfg(feature = "usb")]
#[derive(Error, Debug)]
pub enum UsbError {
    /// USB 错误（来自 rusb）
    #[error("USB error: {0}")]
    Usb(#[from] rusb::Error),

    /// 设备未找到
    #[error("Dongle not found (VID {vid:04X}, PID {pid:04X}, serial {serial:?})")]
    DeviceNotFound {
        vid: u16,
        pid: u16,
        serial: Option<String>,
    },

    /// 控制传输失败
    #[error("Control request 0x{request:02X} failed: {source}")]
    ControlTransfer { request: u8, source: rusb::Error },

    /// 无线参数非法
    #[error("Invalid radio configuration: {0}")]
    InvalidRadioConfig(#[from] mrf_protocol::ProtocolError),

    /// 工作线程创建失败
    #[error("Failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}
