//! MRF dongle 驱动层
//!
//! 在 USB 传输之上提供：
//! - 驱动表复用（8 个机器人共享一个驱动帧，最多一帧在途，脏标记重发）
//! - 非可靠消息（踢球、相机转发）
//! - 可靠消息（消息 ID 池 + 投递报告匹配）
//! - 上行消息路由、遥测与反馈看门狗
//! - 固件烧写状态机
//! - 视觉数据接入
//!
//! # 线程模型
//!
//! [`Dongle`] 是单线程事件循环：所有状态只在调用 [`Dongle::poll`] 的线程上改变。
//! 事件通过有界通道交给其他线程，视觉接收在独立线程上运行。

pub mod config;
mod dongle;
pub mod drive;
mod error;
pub mod events;
pub mod firmware;
pub mod message_id;
pub mod metrics;
pub mod reliable;
mod robot;
pub mod router;
pub mod scheduler;
pub mod telemetry;
pub mod unreliable;
pub mod vision;
pub mod watchdog;

pub use config::DongleConfig;
pub use dongle::Dongle;
pub use drive::DriveMultiplexer;
pub use error::{ConfigError, DriverError, MessageIdError, ReliableError, UploadError};
pub use events::DongleEvent;
pub use firmware::{FirmwareTarget, FirmwareUpload, UploadProgress, UploadStep};
pub use message_id::MessageIdPool;
pub use metrics::{DongleMetrics, MetricsSnapshot};
pub use reliable::{OperationState, ReliableOperation};
pub use robot::Robot;
pub use scheduler::{IdleScheduler, IdleTask};
pub use telemetry::{RobotAlerts, Telemetry};
pub use vision::{
    CameraRelay, DetectionQueue, DetectionSource, RobotDetection, VisionFrame, VisionWorker,
};
pub use watchdog::FeedbackWatchdog;

#[cfg(feature = "usb")]
pub use error::OpenError;

// 下层 crate
pub use mrf_protocol as protocol;
pub use mrf_usb as usb;
