//! 非可靠消息队列
//!
//! 尽力而为：立即提交，完成后从在途集合中移除，失败只记日志。
//! 在途数量有上限，超出时取消并丢弃最旧的一条。

use crate::dongle::TransferIds;
use crate::metrics::DongleMetrics;
use mrf_protocol::{ProtocolError, RobotIndex, encode_unreliable};
use mrf_usb::{AsyncTransfer, OutEndpoint, OutTransfer, TransferError, TransferId, Transport};
use std::collections::VecDeque;
use tracing::{debug, trace, warn};

#[derive(Debug)]
struct Pending {
    transfer: AsyncTransfer,
    robot: RobotIndex,
}

/// 非可靠消息队列
#[derive(Debug)]
pub struct UnreliableQueue {
    in_flight: VecDeque<Pending>,
    limit: usize,
}

impl UnreliableQueue {
    pub fn new(limit: usize) -> Self {
        Self {
            in_flight: VecDeque::with_capacity(limit),
            limit: limit.max(1),
        }
    }

    /// 组帧并立即提交
    ///
    /// 只有组帧错误（负载过长）返回给调用方，传输失败只记录日志。
    pub(crate) fn send<T: Transport + ?Sized>(
        &mut self,
        robot: RobotIndex,
        payload: &[u8],
        transport: &mut T,
        ids: &mut TransferIds,
        metrics: &DongleMetrics,
    ) -> Result<(), ProtocolError> {
        let data = encode_unreliable(robot, payload)?;

        while self.in_flight.len() >= self.limit {
            let Some(oldest) = self.in_flight.pop_front() else {
                break;
            };
            let id = oldest.transfer.id();
            if !transport.cancel(id) {
                trace!("Unreliable transfer {} already running, not cancelled", id);
            }
            DongleMetrics::inc(&metrics.unreliable_dropped);
            warn!(
                "Unreliable queue full ({}), dropping oldest message to robot {}",
                self.limit, oldest.robot
            );
        }

        let mut transfer = AsyncTransfer::new(ids.next());
        match transfer.submit(
            transport,
            OutTransfer::Interrupt {
                endpoint: OutEndpoint::Unreliable,
                data,
            },
        ) {
            Ok(()) => {
                DongleMetrics::inc(&metrics.unreliable_sent);
                self.in_flight.push_back(Pending { transfer, robot });
            },
            Err(e) => {
                DongleMetrics::inc(&metrics.unreliable_failed);
                warn!("Unreliable message to robot {} rejected: {}", robot, e);
            },
        }
        Ok(())
    }

    /// 处理完成事件，返回 false 表示该传输不属于本队列
    pub(crate) fn on_complete(
        &mut self,
        id: TransferId,
        result: Result<(), TransferError>,
        metrics: &DongleMetrics,
    ) -> bool {
        let Some(pos) = self.in_flight.iter().position(|p| p.transfer.id() == id) else {
            return false;
        };
        let Some(mut pending) = self.in_flight.remove(pos) else {
            return false;
        };
        pending.transfer.complete(result);
        match pending.transfer.result() {
            Ok(()) => {},
            Err(TransferError::Cancelled) => {
                debug!("Unreliable message to robot {} cancelled", pending.robot);
            },
            Err(e) => {
                DongleMetrics::inc(&metrics.unreliable_failed);
                warn!("Unreliable message to robot {} failed: {}", pending.robot, e);
            },
        }
        true
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }
}
