//! dongle 运行指标
//!
//! 原子计数器，可以在任何线程读取，不引入锁竞争。

use std::sync::atomic::{AtomicU64, Ordering};

/// dongle 实时指标
#[derive(Debug, Default)]
pub struct DongleMetrics {
    /// 已提交的驱动帧
    pub drive_frames_submitted: AtomicU64,
    /// 失败的驱动帧（同步拒绝或异步失败）
    pub drive_frames_failed: AtomicU64,
    /// 帧在途或已排程时被合并的修改次数
    pub drive_mutations_coalesced: AtomicU64,

    /// 已提交的非可靠消息
    pub unreliable_sent: AtomicU64,
    /// 失败的非可靠消息
    pub unreliable_failed: AtomicU64,
    /// 因在途上限被丢弃的非可靠消息
    pub unreliable_dropped: AtomicU64,

    /// 已发出的可靠消息
    pub reliable_sent: AtomicU64,
    /// 投递成功的可靠消息
    pub reliable_ok: AtomicU64,
    /// 失败的可靠消息（传输或投递）
    pub reliable_failed: AtomicU64,
    /// 找不到对应操作的投递报告
    pub delivery_reports_unmatched: AtomicU64,

    /// 收到的机器人上行帧
    pub inbound_frames: AtomicU64,
    /// 格式错误被丢弃的上行帧（含投递报告和状态帧）
    pub inbound_malformed: AtomicU64,
    /// IN 端点读取失败次数
    pub receive_errors: AtomicU64,

    /// 事件队列满被丢弃的事件
    pub events_dropped: AtomicU64,
    /// 视觉队列满被丢弃的最旧帧
    pub vision_frames_dropped: AtomicU64,
}

impl DongleMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// 获取指标快照
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            drive_frames_submitted: self.drive_frames_submitted.load(Ordering::Relaxed),
            drive_frames_failed: self.drive_frames_failed.load(Ordering::Relaxed),
            drive_mutations_coalesced: self.drive_mutations_coalesced.load(Ordering::Relaxed),
            unreliable_sent: self.unreliable_sent.load(Ordering::Relaxed),
            unreliable_failed: self.unreliable_failed.load(Ordering::Relaxed),
            unreliable_dropped: self.unreliable_dropped.load(Ordering::Relaxed),
            reliable_sent: self.reliable_sent.load(Ordering::Relaxed),
            reliable_ok: self.reliable_ok.load(Ordering::Relaxed),
            reliable_failed: self.reliable_failed.load(Ordering::Relaxed),
            delivery_reports_unmatched: self.delivery_reports_unmatched.load(Ordering::Relaxed),
            inbound_frames: self.inbound_frames.load(Ordering::Relaxed),
            inbound_malformed: self.inbound_malformed.load(Ordering::Relaxed),
            receive_errors: self.receive_errors.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            vision_frames_dropped: self.vision_frames_dropped.load(Ordering::Relaxed),
        }
    }
}

/// 指标快照
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub drive_frames_submitted: u64,
    pub drive_frames_failed: u64,
    pub drive_mutations_coalesced: u64,
    pub unreliable_sent: u64,
    pub unreliable_failed: u64,
    pub unreliable_dropped: u64,
    pub reliable_sent: u64,
    pub reliable_ok: u64,
    pub reliable_failed: u64,
    pub delivery_reports_unmatched: u64,
    pub inbound_frames: u64,
    pub inbound_malformed: u64,
    pub receive_errors: u64,
    pub events_dropped: u64,
    pub vision_frames_dropped: u64,
}

impl MetricsSnapshot {
    /// 可靠消息成功率（百分比），没有已完成的消息时返回 100
    pub fn reliable_success_rate(&self) -> f64 {
        let finished = self.reliable_ok + self.reliable_failed;
        if finished == 0 {
            return 100.0;
        }
        self.reliable_ok as f64 / finished as f64 * 100.0
    }
}
