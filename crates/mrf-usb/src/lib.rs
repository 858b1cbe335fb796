//! # MRF USB Transport
//!
//! dongle 的 USB 传输抽象层。所有 OUT 传输都是异步的：`submit` 立即返回，
//! 结果以 [`TransportEvent::Completed`] 事件送回，每个传输恰好完成一次。
//! IN 端点由后端持续读取，数据以 [`TransportEvent::Received`] 事件送回。
//!
//! 本层不做任何重试，重试策略完全由上层决定。

use bytes::Bytes;
use std::time::Duration;

pub mod error;
pub mod transfer;

#[cfg(feature = "usb")]
pub mod device;

#[cfg(feature = "usb")]
pub mod usb;

#[cfg(feature = "mock")]
pub mod mock;

pub use error::TransferError;
pub use transfer::{AsyncTransfer, TransferState};

#[cfg(feature = "usb")]
pub use device::MrfDevice;

#[cfg(feature = "usb")]
pub use error::UsbError;

#[cfg(feature = "usb")]
pub use usb::UsbTransport;

#[cfg(feature = "mock")]
pub use mock::{MockTransport, Submission};

/// OUT interrupt 端点
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutEndpoint {
    /// 驱动帧（同一时刻最多一帧在途）
    Drive = 1,
    /// 可靠消息
    Reliable = 2,
    /// 非可靠消息
    Unreliable = 3,
}

impl OutEndpoint {
    pub const ALL: [OutEndpoint; 3] = [
        OutEndpoint::Drive,
        OutEndpoint::Reliable,
        OutEndpoint::Unreliable,
    ];

    /// USB 端点地址
    pub fn address(self) -> u8 {
        self as u8
    }
}

/// IN 端点
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InEndpoint {
    /// bulk 1：消息投递报告
    DeliveryReports,
    /// interrupt 2：机器人上行消息
    Messages,
    /// interrupt 3：dongle 状态（急停）
    Status,
}

impl InEndpoint {
    pub const ALL: [InEndpoint; 3] = [
        InEndpoint::DeliveryReports,
        InEndpoint::Messages,
        InEndpoint::Status,
    ];

    /// USB 端点地址（含方向位）
    pub fn address(self) -> u8 {
        match self {
            InEndpoint::DeliveryReports => 0x81,
            InEndpoint::Messages => 0x82,
            InEndpoint::Status => 0x83,
        }
    }

    /// 单次读取的最大长度
    pub fn max_packet(self) -> usize {
        match self {
            InEndpoint::DeliveryReports => 8,
            InEndpoint::Messages => 103,
            InEndpoint::Status => 1,
        }
    }

    /// 是否为 bulk 端点（否则为 interrupt）
    pub fn is_bulk(self) -> bool {
        matches!(self, InEndpoint::DeliveryReports)
    }
}

/// 传输标识，由提交方分配，在完成事件中原样返回
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransferId(pub u64);

impl std::fmt::Display for TransferId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "T{}", self.0)
    }
}

/// 待提交的 OUT 传输
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutTransfer {
    /// interrupt OUT 传输
    Interrupt { endpoint: OutEndpoint, data: Bytes },
    /// 厂商控制请求（OUT 方向）
    Control { request: u8, value: u16, data: Bytes },
}

impl OutTransfer {
    /// 目标 OUT 端点，控制传输返回 None
    pub fn endpoint(&self) -> Option<OutEndpoint> {
        match self {
            OutTransfer::Interrupt { endpoint, .. } => Some(*endpoint),
            OutTransfer::Control { .. } => None,
        }
    }

    pub fn data(&self) -> &Bytes {
        match self {
            OutTransfer::Interrupt { data, .. } | OutTransfer::Control { data, .. } => data,
        }
    }
}

/// 传输层事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// OUT 传输完成（成功、失败或取消）
    Completed {
        id: TransferId,
        result: Result<(), TransferError>,
    },
    /// IN 端点收到数据
    Received { endpoint: InEndpoint, data: Bytes },
    /// IN 端点读取失败
    ReceiveFailed {
        endpoint: InEndpoint,
        error: TransferError,
    },
}

/// 传输后端
///
/// 事件循环单线程驱动：`submit`/`cancel` 不阻塞，
/// `poll_event` 最多阻塞 `timeout`。
pub trait Transport {
    /// 提交 OUT 传输；同一 `id` 仍在途时返回 [`TransferError::AlreadySubmitted`]
    fn submit(&mut self, id: TransferId, transfer: OutTransfer) -> Result<(), TransferError>;

    /// 请求取消尚未开始的传输
    ///
    /// 返回 true 表示取消生效，该传输随后以 [`TransferError::Cancelled`] 完成。
    fn cancel(&mut self, id: TransferId) -> bool;

    /// 获取下一个事件
    fn poll_event(&mut self, timeout: Duration) -> Option<TransportEvent>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn submit(&mut self, id: TransferId, transfer: OutTransfer) -> Result<(), TransferError> {
        (**self).submit(id, transfer)
    }

    fn cancel(&mut self, id: TransferId) -> bool {
        (**self).cancel(id)
    }

    fn poll_event(&mut self, timeout: Duration) -> Option<TransportEvent> {
        (**self).poll_event(timeout)
    }
}
