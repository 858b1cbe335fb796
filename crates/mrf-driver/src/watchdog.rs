//! 反馈看门狗
//!
//! 记录每个机器人最近一次状态反馈的时间，超时的机器人只报告一次，
//! 直到再次收到反馈。时间由调用方传入。

use mrf_protocol::{ROBOT_COUNT, RobotIndex};
use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct FeedbackWatchdog {
    timeout: Duration,
    last_seen: [Option<Instant>; ROBOT_COUNT],
}

impl FeedbackWatchdog {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            last_seen: [None; ROBOT_COUNT],
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// 记录一次反馈
    pub fn feed(&mut self, robot: RobotIndex, now: Instant) {
        self.last_seen[robot.as_usize()] = Some(now);
    }

    /// 返回超时的机器人并停止跟踪它们
    pub fn expired(&mut self, now: Instant) -> Vec<RobotIndex> {
        let mut expired = Vec::new();
        for robot in RobotIndex::all() {
            let slot = &mut self.last_seen[robot.as_usize()];
            if let Some(last) = *slot
                && now.saturating_duration_since(last) > self.timeout
            {
                *slot = None;
                expired.push(robot);
            }
        }
        expired
    }

    pub fn is_tracking(&self, robot: RobotIndex) -> bool {
        self.last_seen[robot.as_usize()].is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expiry_reported_once() {
        let mut watchdog = FeedbackWatchdog::new(Duration::from_secs(3));
        let start = Instant::now();
        let r1 = RobotIndex::new(1).unwrap();
        let r6 = RobotIndex::new(6).unwrap();
        watchdog.feed(r1, start);
        watchdog.feed(r6, start + Duration::from_secs(2));

        assert!(watchdog.expired(start + Duration::from_secs(3)).is_empty());
        assert_eq!(
            watchdog.expired(start + Duration::from_millis(3_500)),
            vec![r1]
        );
        assert!(!watchdog.is_tracking(r1));
        assert!(watchdog.expired(start + Duration::from_millis(4_000)).is_empty());
        assert_eq!(watchdog.expired(start + Duration::from_secs(6)), vec![r6]);
    }

    #[test]
    fn test_feed_resets_timer() {
        let mut watchdog = FeedbackWatchdog::new(Duration::from_millis(100));
        let start = Instant::now();
        let r0 = RobotIndex::new(0).unwrap();
        watchdog.feed(r0, start);
        watchdog.feed(r0, start + Duration::from_millis(90));
        assert!(watchdog.expired(start + Duration::from_millis(150)).is_empty());
    }

    #[test]
    fn test_never_seen_robot_not_reported() {
        let mut watchdog = FeedbackWatchdog::new(Duration::from_millis(1));
        assert!(
            watchdog
                .expired(Instant::now() + Duration::from_secs(10))
                .is_empty()
        );
    }
}
