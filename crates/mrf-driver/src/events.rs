//! dongle 广播事件
//!
//! 事件通过有界 crossbeam 通道发出，事件循环从不阻塞。没有订阅者时事件直接丢弃；
//! 订阅者跟不上时丢弃并计数，每段连续溢出只告警一次。

use crate::metrics::DongleMetrics;
use bytes::Bytes;
use crossbeam_channel::{Receiver, Sender, TrySendError};
use mrf_protocol::{EStopState, RobotIndex};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

/// dongle 事件
#[derive(Debug, Clone, PartialEq)]
pub enum DongleEvent {
    /// 机器人自动踢球已触发（一次性）
    AutokickFired { robot: RobotIndex },
    /// 机器人遥测已更新
    TelemetryUpdated { robot: RobotIndex },
    /// 机器人存活状态变化
    AliveChanged { robot: RobotIndex, alive: bool },
    /// 固件操作应答
    FirmwareResponse {
        robot: RobotIndex,
        request: u8,
        payload: Bytes,
    },
    /// 急停开关状态变化
    EStopChanged(EStopState),
}

/// 事件发送端
#[derive(Debug)]
pub(crate) struct EventSink {
    tx: Option<Sender<DongleEvent>>,
    capacity: usize,
    overflowing: AtomicBool,
    metrics: Arc<DongleMetrics>,
}

impl EventSink {
    pub(crate) fn new(capacity: usize, metrics: Arc<DongleMetrics>) -> Self {
        Self {
            tx: None,
            capacity,
            overflowing: AtomicBool::new(false),
            metrics,
        }
    }

    /// 创建新的订阅通道，替换之前的订阅者
    pub(crate) fn subscribe(&mut self) -> Receiver<DongleEvent> {
        let (tx, rx) = crossbeam_channel::bounded(self.capacity);
        self.tx = Some(tx);
        self.overflowing.store(false, Ordering::Relaxed);
        rx
    }

    /// 发送事件，不阻塞
    pub(crate) fn emit(&self, event: DongleEvent) {
        let Some(tx) = &self.tx else {
            return;
        };
        match tx.try_send(event) {
            Ok(()) => {
                if self.overflowing.swap(false, Ordering::Relaxed) {
                    debug!("Event queue drained");
                }
            },
            Err(TrySendError::Full(event)) => {
                DongleMetrics::inc(&self.metrics.events_dropped);
                if !self.overflowing.swap(true, Ordering::Relaxed) {
                    warn!("Event queue full, dropping {:?} and later events", event);
                }
            },
            Err(TrySendError::Disconnected(_)) => {},
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn robot(i: u8) -> RobotIndex {
        RobotIndex::new(i).unwrap()
    }

    #[test]
    fn test_full_queue_drops_and_counts() {
        let metrics = Arc::new(DongleMetrics::new());
        let mut sink = EventSink::new(1, metrics.clone());
        let rx = sink.subscribe();

        sink.emit(DongleEvent::AutokickFired { robot: robot(2) });
        sink.emit(DongleEvent::TelemetryUpdated { robot: robot(2) });
        sink.emit(DongleEvent::TelemetryUpdated { robot: robot(3) });

        assert_eq!(rx.try_recv().unwrap(), DongleEvent::AutokickFired { robot: robot(2) });
        assert!(rx.try_recv().is_err());
        assert_eq!(metrics.snapshot().events_dropped, 2);
    }

    #[test]
    fn test_no_subscriber_is_silent() {
        let metrics = Arc::new(DongleMetrics::new());
        let sink = EventSink::new(1, metrics.clone());
        for _ in 0..10 {
            sink.emit(DongleEvent::TelemetryUpdated { robot: robot(0) });
        }
        assert_eq!(metrics.snapshot().events_dropped, 0);
    }

    #[test]
    fn test_dropped_subscriber_is_silent() {
        let metrics = Arc::new(DongleMetrics::new());
        let mut sink = EventSink::new(1, metrics.clone());
        drop(sink.subscribe());
        for _ in 0..10 {
            sink.emit(DongleEvent::TelemetryUpdated { robot: robot(0) });
        }
        assert_eq!(metrics.snapshot().events_dropped, 0);
    }

    #[test]
    fn test_resubscribe_replaces_previous_receiver() {
        let metrics = Arc::new(DongleMetrics::new());
        let mut sink = EventSink::new(4, metrics);
        let old = sink.subscribe();
        let new = sink.subscribe();
        sink.emit(DongleEvent::AutokickFired { robot: robot(1) });

        assert!(old.try_recv().is_err());
        assert_eq!(new.try_recv().unwrap(), DongleEvent::AutokickFired { robot: robot(1) });
    }
}
