//! 可靠消息
//!
//! 每次发送分配一个消息 ID，帧格式 `[robot][message_id][payload...]`，
//! 经 OUT 端点 2 提交。之后：
//! - OUT 传输失败：操作立即以 [`ReliableError::Transport`] 结束
//! - 传输成功：等待携带相同 ID 的投递报告，状态码一一映射为结果
//!
//! 无论哪条路径先到，ID 只在终态时释放一次。本层不重试、不超时。

use crate::dongle::TransferIds;
use crate::error::{DriverError, ReliableError};
use crate::message_id::MessageIdPool;
use crate::metrics::DongleMetrics;
use crossbeam_channel::{Receiver, Sender, TryRecvError};
use mrf_protocol::{DeliveryReport, DeliveryStatus, MessageId, RobotIndex, encode_reliable};
use mrf_usb::{AsyncTransfer, OutEndpoint, OutTransfer, TransferError, TransferId, Transport};
use std::collections::HashMap;
use tracing::{debug, trace, warn};

pub type Outcome = Result<(), ReliableError>;

/// 可靠操作状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    /// 已提交，等待投递报告
    Submitted,
    CompletedOk,
    FailedTransport,
    FailedNotAssociated,
    FailedNotAcknowledged,
    FailedClearChannel,
    /// dongle 上报了未知状态码
    FailedUnknownStatus,
}

impl OperationState {
    fn from_outcome(outcome: &Outcome) -> Self {
        match outcome {
            Ok(()) => OperationState::CompletedOk,
            Err(ReliableError::Transport(_)) => OperationState::FailedTransport,
            Err(ReliableError::NotAssociated) => OperationState::FailedNotAssociated,
            Err(ReliableError::NotAcknowledged) => OperationState::FailedNotAcknowledged,
            Err(ReliableError::ClearChannel) => OperationState::FailedClearChannel,
            Err(ReliableError::UnknownStatus(_)) => OperationState::FailedUnknownStatus,
            Err(ReliableError::Incomplete) => OperationState::Submitted,
        }
    }

    pub fn is_terminal(self) -> bool {
        self != OperationState::Submitted
    }
}

/// 一次可靠发送的句柄
///
/// 结果通过容量为 1 的通道送达，`poll` 不阻塞。丢弃句柄不会泄漏 ID：
/// 投递报告到达时照常释放。
#[derive(Debug)]
pub struct ReliableOperation {
    robot: RobotIndex,
    message_id: MessageId,
    rx: Receiver<Outcome>,
    outcome: Option<Outcome>,
}

impl ReliableOperation {
    pub fn robot(&self) -> RobotIndex {
        self.robot
    }

    pub fn message_id(&self) -> MessageId {
        self.message_id
    }

    /// 检查是否已完成，完成后结果被缓存
    pub fn poll(&mut self) -> Option<&Outcome> {
        if self.outcome.is_none() {
            match self.rx.try_recv() {
                Ok(outcome) => self.outcome = Some(outcome),
                Err(TryRecvError::Empty) => {},
                Err(TryRecvError::Disconnected) => {
                    // 发送端在送达前被销毁（dongle 已关闭）
                    self.outcome = Some(Err(ReliableError::Transport(TransferError::Closed)));
                },
            }
        }
        self.outcome.as_ref()
    }

    pub fn is_done(&mut self) -> bool {
        self.poll().is_some()
    }

    pub fn state(&mut self) -> OperationState {
        match self.poll() {
            Some(outcome) => OperationState::from_outcome(outcome),
            None => OperationState::Submitted,
        }
    }

    /// 结果：成功、具体失败原因，或尚未完成时的 [`ReliableError::Incomplete`]
    pub fn result(&mut self) -> Outcome {
        match self.poll() {
            Some(outcome) => outcome.clone(),
            None => Err(ReliableError::Incomplete),
        }
    }
}

#[derive(Debug)]
struct Outstanding {
    robot: RobotIndex,
    transfer: AsyncTransfer,
    completion: Sender<Outcome>,
}

/// 在途可靠操作表
#[derive(Debug, Default)]
pub struct ReliableChannel {
    outstanding: HashMap<MessageId, Outstanding>,
    by_transfer: HashMap<TransferId, MessageId>,
}

impl ReliableChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// 分配 ID、组帧并提交
    ///
    /// ID 耗尽或组帧失败时返回错误且不占用 ID。传输同步拒绝时返回的
    /// 句柄已处于 `FailedTransport`。
    pub(crate) fn send<T: Transport + ?Sized>(
        &mut self,
        robot: RobotIndex,
        payload: &[u8],
        pool: &mut MessageIdPool,
        transport: &mut T,
        ids: &mut TransferIds,
        metrics: &DongleMetrics,
    ) -> Result<ReliableOperation, DriverError> {
        let message_id = pool.allocate()?;
        let data = match encode_reliable(robot, message_id, payload) {
            Ok(data) => data,
            Err(e) => {
                let _ = pool.release(message_id);
                return Err(e.into());
            },
        };

        let (tx, rx) = crossbeam_channel::bounded(1);
        let operation = ReliableOperation {
            robot,
            message_id,
            rx,
            outcome: None,
        };

        let mut transfer = AsyncTransfer::new(ids.next());
        DongleMetrics::inc(&metrics.reliable_sent);
        match transfer.submit(
            transport,
            OutTransfer::Interrupt {
                endpoint: OutEndpoint::Reliable,
                data,
            },
        ) {
            Ok(()) => {
                trace!(
                    "Reliable message {} to robot {} submitted as {}",
                    message_id,
                    robot,
                    transfer.id()
                );
                self.by_transfer.insert(transfer.id(), message_id);
                self.outstanding.insert(
                    message_id,
                    Outstanding {
                        robot,
                        transfer,
                        completion: tx,
                    },
                );
            },
            Err(e) => {
                warn!("Reliable message {} to robot {} rejected: {}", message_id, robot, e);
                let _ = pool.release(message_id);
                DongleMetrics::inc(&metrics.reliable_failed);
                let _ = tx.send(Err(ReliableError::Transport(e)));
            },
        }
        Ok(operation)
    }

    /// OUT 传输完成
    ///
    /// 成功时继续等待投递报告；失败时立即结束操作并释放 ID。
    /// 返回 false 表示该传输不属于本表。
    pub(crate) fn on_transfer_complete(
        &mut self,
        id: TransferId,
        result: Result<(), TransferError>,
        pool: &mut MessageIdPool,
        metrics: &DongleMetrics,
    ) -> bool {
        let Some(message_id) = self.by_transfer.remove(&id) else {
            return false;
        };
        let Some(entry) = self.outstanding.get_mut(&message_id) else {
            return true;
        };
        entry.transfer.complete(result);
        if let Err(e) = entry.transfer.result()
            && let Some(entry) = self.outstanding.remove(&message_id)
        {
            warn!(
                "Reliable message {} to robot {} transfer failed: {}",
                message_id, entry.robot, e
            );
            let _ = pool.release(message_id);
            DongleMetrics::inc(&metrics.reliable_failed);
            let _ = entry.completion.send(Err(ReliableError::Transport(e)));
        }
        true
    }

    /// 投递报告到达
    ///
    /// 没有对应在途操作的报告被丢弃（操作已因传输失败结束）。
    pub(crate) fn on_delivery_report(
        &mut self,
        report: DeliveryReport,
        pool: &mut MessageIdPool,
        metrics: &DongleMetrics,
    ) -> bool {
        let Some(entry) = self.outstanding.remove(&report.message_id) else {
            DongleMetrics::inc(&metrics.delivery_reports_unmatched);
            trace!("Dropping delivery report for unknown message {}", report.message_id);
            return false;
        };
        // 报告可能先于 OUT 完成事件到达
        self.by_transfer.remove(&entry.transfer.id());
        let _ = pool.release(report.message_id);

        let outcome = translate_status(report.status);
        match &outcome {
            Ok(()) => {
                DongleMetrics::inc(&metrics.reliable_ok);
                trace!("Reliable message {} to robot {} delivered", report.message_id, entry.robot);
            },
            Err(e) => {
                DongleMetrics::inc(&metrics.reliable_failed);
                debug!(
                    "Reliable message {} to robot {} failed: {}",
                    report.message_id, entry.robot, e
                );
            },
        }
        if entry.completion.send(outcome).is_err() {
            trace!("Reliable message {} handle dropped", report.message_id);
        }
        true
    }

    /// 当前在途的可靠操作数量
    pub fn outstanding(&self) -> usize {
        self.outstanding.len()
    }
}

/// 投递状态码到结果的一一映射
pub fn translate_status(status: u8) -> Outcome {
    match DeliveryStatus::try_from(status) {
        Ok(DeliveryStatus::Ok) => Ok(()),
        Ok(DeliveryStatus::NotAssociated) => Err(ReliableError::NotAssociated),
        Ok(DeliveryStatus::NotAcknowledged) => Err(ReliableError::NotAcknowledged),
        Ok(DeliveryStatus::ClearChannel) => Err(ReliableError::ClearChannel),
        Err(_) => Err(ReliableError::UnknownStatus(status)),
    }
}
