//! 驱动状态复用器
//!
//! 8 个机器人的驱动字合成一个 64 字节帧，经 OUT 端点 1 发送：
//! - 修改只改内存中的表并置脏，从不阻塞调用方
//! - 同一时刻最多一个驱动帧在途，帧不会乱序或重复
//! - 在途期间的修改在完成后合并为恰好一个新帧
//! - 失败只记录日志，下一帧照常发送完整状态

use crate::dongle::TransferIds;
use crate::metrics::DongleMetrics;
use mrf_protocol::{DriveFrame, DriveWord, RobotIndex};
use mrf_usb::{AsyncTransfer, OutEndpoint, OutTransfer, TransferError, TransferId, Transport};
use tracing::{error, trace, warn};

/// 驱动状态复用器
#[derive(Debug, Default)]
pub struct DriveMultiplexer {
    frame: DriveFrame,
    /// 自上次序列化以来表被修改过
    dirty: bool,
    /// 已排程一次提交，尚未执行
    armed: bool,
    in_flight: Option<AsyncTransfer>,
}

impl DriveMultiplexer {
    pub fn new() -> Self {
        Self::default()
    }

    /// 修改一个机器人的驱动字并置脏
    ///
    /// 返回 true 表示调用方需要排程一次提交；已排程时返回 false，
    /// 因此连续修改只会排程一次。
    pub fn mutate(&mut self, robot: RobotIndex, f: impl FnOnce(&mut DriveWord)) -> bool {
        f(&mut self.frame.words[robot.as_usize()]);
        self.dirty = true;
        if self.armed {
            return false;
        }
        self.armed = true;
        true
    }

    /// 执行排程的提交
    ///
    /// 有帧在途时什么都不做，脏标志留给完成回调处理。
    pub(crate) fn run_scheduled<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        ids: &mut TransferIds,
        metrics: &DongleMetrics,
    ) {
        self.armed = false;
        if self.in_flight.is_none() && self.dirty {
            self.submit_frame(transport, ids, metrics);
        }
    }

    /// 处理完成事件，返回 false 表示该传输不属于复用器
    pub(crate) fn on_complete<T: Transport + ?Sized>(
        &mut self,
        id: TransferId,
        result: Result<(), TransferError>,
        transport: &mut T,
        ids: &mut TransferIds,
        metrics: &DongleMetrics,
    ) -> bool {
        let Some(transfer) = self.in_flight.as_mut().filter(|t| t.id() == id) else {
            return false;
        };
        if !transfer.complete(result) {
            return true;
        }
        if let Err(e) = transfer.result() {
            DongleMetrics::inc(&metrics.drive_frames_failed);
            error!("Drive frame {} failed: {}", id, e);
        }
        self.in_flight = None;

        if self.dirty {
            self.submit_frame(transport, ids, metrics);
        }
        true
    }

    fn submit_frame<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        ids: &mut TransferIds,
        metrics: &DongleMetrics,
    ) {
        debug_assert!(self.in_flight.is_none());
        // 序列化时刻清除脏标志
        let data = self.frame.to_bytes();
        self.dirty = false;

        let mut transfer = AsyncTransfer::new(ids.next());
        match transfer.submit(
            transport,
            OutTransfer::Interrupt {
                endpoint: OutEndpoint::Drive,
                data,
            },
        ) {
            Ok(()) => {
                DongleMetrics::inc(&metrics.drive_frames_submitted);
                trace!("Drive frame {} submitted", transfer.id());
                self.in_flight = Some(transfer);
            },
            Err(e) => {
                // 帧未发出，下次修改时重发
                self.dirty = true;
                DongleMetrics::inc(&metrics.drive_frames_failed);
                warn!("Drive frame rejected by transport: {}", e);
            },
        }
    }

    /// 表中某个机器人的当前驱动字
    pub fn word(&self, robot: RobotIndex) -> DriveWord {
        *self.frame.robot(robot)
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn in_flight(&self) -> Option<TransferId> {
        self.in_flight.as_ref().map(|t| t.id())
    }
}
