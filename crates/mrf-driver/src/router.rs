//! 上行消息路由
//!
//! 按机器人索引和类型字节分发 IN 帧。格式错误的帧记录一次错误后丢弃，
//! 不会部分更新遥测，也不会影响其他机器人。

use crate::events::{DongleEvent, EventSink};
use crate::metrics::DongleMetrics;
use crate::telemetry::{Telemetry, majority};
use bytes::Bytes;
use mrf_protocol::{EStopState, InboundMessage, ROBOT_COUNT, RobotFrame, RobotIndex};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// 构建 ID 请求间隔
pub const BUILD_ID_REQUEST_INTERVAL: Duration = Duration::from_millis(500);
/// 构建 ID 请求次数上限
pub const BUILD_ID_REQUEST_ATTEMPTS: u8 = 7;

/// 每个机器人最多缓存的固件应答
const FIRMWARE_INBOX_LIMIT: usize = 16;

#[derive(Debug)]
struct RobotState {
    telemetry: Telemetry,
    build_id_requests_left: u8,
    last_build_id_request: Option<Instant>,
    firmware_inbox: VecDeque<(u8, Bytes)>,
}

impl Default for RobotState {
    fn default() -> Self {
        Self {
            telemetry: Telemetry::default(),
            build_id_requests_left: BUILD_ID_REQUEST_ATTEMPTS,
            last_build_id_request: None,
            firmware_inbox: VecDeque::new(),
        }
    }
}

/// 路由结果中需要 dongle 执行的动作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RouteAction {
    /// 无需动作
    None,
    /// 该机器人刚收到状态反馈，喂看门狗
    Feed(RobotIndex),
    /// 喂看门狗并向该机器人发送构建 ID 请求
    FeedAndRequestBuildIds(RobotIndex),
}

/// 上行消息路由器，持有全部机器人的遥测
#[derive(Debug, Default)]
pub struct InboundRouter {
    robots: [RobotState; ROBOT_COUNT],
    estop: EStopState,
}

impl InboundRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn telemetry(&self, robot: RobotIndex) -> &Telemetry {
        &self.robots[robot.as_usize()].telemetry
    }

    pub fn estop(&self) -> EStopState {
        self.estop
    }

    /// 处理机器人消息端点上的一帧
    pub(crate) fn handle_message(
        &mut self,
        data: &[u8],
        now: Instant,
        events: &EventSink,
        metrics: &DongleMetrics,
    ) -> RouteAction {
        DongleMetrics::inc(&metrics.inbound_frames);
        let frame = match RobotFrame::parse(data) {
            Ok(frame) => frame,
            Err(e) => {
                DongleMetrics::inc(&metrics.inbound_malformed);
                error!("Discarding malformed robot frame {:02X?}: {}", data, e);
                return RouteAction::None;
            },
        };
        let robot = frame.robot;
        let message = match InboundMessage::parse(&frame.message) {
            Ok(message) => message,
            Err(e) => {
                DongleMetrics::inc(&metrics.inbound_malformed);
                error!("Discarding message from robot {}: {}", robot, e);
                return RouteAction::None;
            },
        };

        let state = &mut self.robots[robot.as_usize()];
        state.telemetry.link_quality = frame.link_quality();
        state.telemetry.rssi_dbm = frame.rssi_dbm();

        match message {
            InboundMessage::GeneralStatus(status) => {
                state.telemetry.apply_status(&status);
                if !state.telemetry.alive {
                    state.telemetry.alive = true;
                    info!("Robot {} is alive", robot);
                    events.emit(DongleEvent::AliveChanged { robot, alive: true });
                }
                events.emit(DongleEvent::TelemetryUpdated { robot });
                if self.build_id_request_due(robot, now) {
                    RouteAction::FeedAndRequestBuildIds(robot)
                } else {
                    RouteAction::Feed(robot)
                }
            },
            InboundMessage::AutokickFired => {
                events.emit(DongleEvent::AutokickFired { robot });
                RouteAction::None
            },
            InboundMessage::BuildIds { firmware, fpga } => {
                debug!(
                    "Robot {} build IDs: firmware 0x{:08X}, FPGA 0x{:08X}",
                    robot, firmware, fpga
                );
                state.telemetry.build_ids_valid = true;
                state.telemetry.firmware_build_id = firmware;
                state.telemetry.fpga_build_id = fpga;
                state.telemetry.alerts.build_id_fetch_error = false;
                self.check_build_id_majority();
                events.emit(DongleEvent::TelemetryUpdated { robot });
                RouteAction::None
            },
            InboundMessage::FirmwareResponse { request, payload } => {
                if state.firmware_inbox.len() >= FIRMWARE_INBOX_LIMIT {
                    state.firmware_inbox.pop_front();
                    warn!("Robot {} firmware inbox full, dropping oldest response", robot);
                }
                state.firmware_inbox.push_back((request, payload.clone()));
                events.emit(DongleEvent::FirmwareResponse {
                    robot,
                    request,
                    payload,
                });
                RouteAction::None
            },
            InboundMessage::BallInBeam(in_beam) => {
                state.telemetry.ball_in_beam = in_beam;
                events.emit(DongleEvent::TelemetryUpdated { robot });
                RouteAction::None
            },
        }
    }

    /// 处理状态端点上的急停字节，返回新状态（有变化时）
    pub(crate) fn handle_status(
        &mut self,
        data: &[u8],
        events: &EventSink,
        metrics: &DongleMetrics,
    ) -> Option<EStopState> {
        let state = match EStopState::parse(data) {
            Ok(state) => state,
            Err(e) => {
                DongleMetrics::inc(&metrics.inbound_malformed);
                error!("Bad dongle status {:02X?}: {}", data, e);
                EStopState::Broken
            },
        };
        if state == self.estop {
            return None;
        }
        info!("E-stop state changed: {:?} -> {:?}", self.estop, state);
        self.estop = state;
        events.emit(DongleEvent::EStopChanged(state));
        Some(state)
    }

    /// 机器人失去联系
    pub(crate) fn mark_dead(&mut self, robot: RobotIndex, events: &EventSink) {
        let state = &mut self.robots[robot.as_usize()];
        let was_alive = state.telemetry.alive;
        state.telemetry.mark_dead();
        state.build_id_requests_left = BUILD_ID_REQUEST_ATTEMPTS;
        state.last_build_id_request = None;
        if was_alive {
            warn!("Robot {} lost", robot);
            events.emit(DongleEvent::AliveChanged { robot, alive: false });
        }
    }

    /// 取出该机器人最早一条匹配请求码的固件应答
    pub fn take_firmware_response(&mut self, robot: RobotIndex, request: u8) -> Option<Bytes> {
        let inbox = &mut self.robots[robot.as_usize()].firmware_inbox;
        let pos = inbox.iter().position(|(r, _)| *r == request)?;
        inbox.remove(pos).map(|(_, payload)| payload)
    }

    /// 清除该机器人缓存的某种固件应答
    pub fn discard_firmware_responses(&mut self, robot: RobotIndex, request: u8) {
        self.robots[robot.as_usize()]
            .firmware_inbox
            .retain(|(r, _)| *r != request);
    }

    /// 状态反馈到达时判断是否该请求构建 ID
    ///
    /// 每 0.5 秒最多一次，用完次数后置 `build_id_fetch_error`。
    fn build_id_request_due(&mut self, robot: RobotIndex, now: Instant) -> bool {
        let state = &mut self.robots[robot.as_usize()];
        if state.telemetry.build_ids_valid {
            return false;
        }
        if let Some(last) = state.last_build_id_request
            && now.saturating_duration_since(last) < BUILD_ID_REQUEST_INTERVAL
        {
            return false;
        }
        state.last_build_id_request = Some(now);
        if state.build_id_requests_left > 0 {
            state.build_id_requests_left -= 1;
            true
        } else {
            if !state.telemetry.alerts.build_id_fetch_error {
                warn!("Robot {} did not report build IDs", robot);
            }
            state.telemetry.alerts.build_id_fetch_error = true;
            false
        }
    }

    /// 与多数机器人比较构建 ID，更新不一致告警
    fn check_build_id_majority(&mut self) {
        let valid = || {
            self.robots
                .iter()
                .map(|s| &s.telemetry)
                .filter(|t| t.build_ids_valid)
        };
        let firmware = majority(valid().map(|t| t.firmware_build_id));
        let fpga = majority(valid().map(|t| t.fpga_build_id));

        for state in self.robots.iter_mut() {
            let telemetry = &mut state.telemetry;
            if !telemetry.build_ids_valid {
                continue;
            }
            telemetry.alerts.firmware_build_id_mismatch =
                firmware.is_some_and(|m| m != telemetry.firmware_build_id);
            telemetry.alerts.fpga_build_id_mismatch =
                fpga.is_some_and(|m| m != telemetry.fpga_build_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::Receiver;
    use std::sync::Arc;

    fn setup() -> (InboundRouter, EventSink, Receiver<DongleEvent>, Arc<DongleMetrics>) {
        let metrics = Arc::new(DongleMetrics::new());
        let mut sink = EventSink::new(64, metrics.clone());
        let rx = sink.subscribe();
        (InboundRouter::new(), sink, rx, metrics)
    }

    fn robot(i: u8) -> RobotIndex {
        RobotIndex::new(i).unwrap()
    }

    fn status_frame(robot: u8, capacitor_raw: u16) -> Vec<u8> {
        let mut data = vec![robot, 0x00];
        data.extend_from_slice(&16_000u16.to_le_bytes());
        data.extend_from_slice(&capacitor_raw.to_le_bytes());
        data.extend_from_slice(&500u16.to_le_bytes());
        data.extend_from_slice(&2_500u16.to_le_bytes());
        data.push(0b0100_0000);
        data.extend_from_slice(&[255, 0xF0]);
        data
    }

    fn build_ids_frame(robot: u8, firmware: u32, fpga: u32) -> Vec<u8> {
        let mut data = vec![robot, 0x02];
        data.extend_from_slice(&firmware.to_le_bytes());
        data.extend_from_slice(&fpga.to_le_bytes());
        data.extend_from_slice(&[200, 100]);
        data
    }

    #[test]
    fn test_general_status_updates_telemetry() {
        let (mut router, sink, rx, metrics) = setup();
        let now = Instant::now();
        let action = router.handle_message(&status_frame(2, 20_000), now, &sink, &metrics);
        assert_eq!(action, RouteAction::FeedAndRequestBuildIds(robot(2)));

        let t = router.telemetry(robot(2));
        assert!(t.alive);
        assert!((t.battery_voltage - 16.0).abs() < 1e-9);
        assert!((t.capacitor_voltage - 200.0).abs() < 1e-9);
        assert!(t.capacitor_charged);
        assert!(!t.ball_in_beam);
        assert!((t.link_quality - 1.0).abs() < 1e-9);
        assert!(!t.alerts.low_capacitor);

        assert_eq!(
            rx.try_recv().unwrap(),
            DongleEvent::AliveChanged {
                robot: robot(2),
                alive: true
            }
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            DongleEvent::TelemetryUpdated { robot: robot(2) }
        );
    }

    #[test]
    fn test_low_capacitor_alert() {
        let (mut router, sink, _rx, metrics) = setup();
        router.handle_message(&status_frame(0, 300), Instant::now(), &sink, &metrics);
        assert!(router.telemetry(robot(0)).alerts.low_capacitor);
    }

    #[test]
    fn test_wrong_length_status_discarded() {
        let (mut router, sink, rx, metrics) = setup();
        let mut data = status_frame(1, 20_000);
        data.remove(3);
        let before = *router.telemetry(robot(1));
        let action = router.handle_message(&data, Instant::now(), &sink, &metrics);
        assert_eq!(action, RouteAction::None);
        assert_eq!(*router.telemetry(robot(1)), before);
        assert_eq!(metrics.snapshot().inbound_malformed, 1);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_unknown_type_discarded() {
        let (mut router, sink, _rx, metrics) = setup();
        router.handle_message(&[3, 0x7E, 1, 2], Instant::now(), &sink, &metrics);
        assert_eq!(metrics.snapshot().inbound_malformed, 1);
    }

    #[test]
    fn test_invalid_robot_index_discarded() {
        let (mut router, sink, _rx, metrics) = setup();
        router.handle_message(&[9, 0x01, 1, 2], Instant::now(), &sink, &metrics);
        assert_eq!(metrics.snapshot().inbound_malformed, 1);
    }

    #[test]
    fn test_autokick_event() {
        let (mut router, sink, rx, metrics) = setup();
        router.handle_message(&[6, 0x01, 0, 0], Instant::now(), &sink, &metrics);
        assert_eq!(
            rx.try_recv().unwrap(),
            DongleEvent::AutokickFired { robot: robot(6) }
        );
    }

    #[test]
    fn test_ball_beam_messages() {
        let (mut router, sink, _rx, metrics) = setup();
        router.handle_message(&[4, 0x04, 0, 0], Instant::now(), &sink, &metrics);
        assert!(router.telemetry(robot(4)).ball_in_beam);
        router.handle_message(&[4, 0x05, 0, 0], Instant::now(), &sink, &metrics);
        assert!(!router.telemetry(robot(4)).ball_in_beam);
    }

    #[test]
    fn test_build_id_request_throttle() {
        let (mut router, sink, _rx, metrics) = setup();
        let start = Instant::now();
        let mut requests = 0;
        // 每 100ms 一次状态反馈，持续 5 秒
        for i in 0..50u64 {
            let now = start + Duration::from_millis(i * 100);
            if let RouteAction::FeedAndRequestBuildIds(_) =
                router.handle_message(&status_frame(3, 20_000), now, &sink, &metrics)
            {
                requests += 1;
            }
        }
        assert_eq!(requests, BUILD_ID_REQUEST_ATTEMPTS as usize);
        assert!(router.telemetry(robot(3)).alerts.build_id_fetch_error);
    }

    #[test]
    fn test_build_ids_stop_requests() {
        let (mut router, sink, _rx, metrics) = setup();
        let now = Instant::now();
        router.handle_message(&build_ids_frame(0, 1, 2), now, &sink, &metrics);
        let action = router.handle_message(&status_frame(0, 20_000), now, &sink, &metrics);
        assert_eq!(action, RouteAction::Feed(robot(0)));
        let t = router.telemetry(robot(0));
        assert!(t.build_ids_valid);
        assert_eq!(t.firmware_build_id, 1);
        assert_eq!(t.fpga_build_id, 2);
    }

    #[test]
    fn test_build_id_majority() {
        let (mut router, sink, _rx, metrics) = setup();
        let now = Instant::now();
        router.handle_message(&build_ids_frame(0, 0xAA, 0x11), now, &sink, &metrics);
        router.handle_message(&build_ids_frame(1, 0xAA, 0x11), now, &sink, &metrics);
        router.handle_message(&build_ids_frame(2, 0xBB, 0x11), now, &sink, &metrics);

        assert!(!router.telemetry(robot(0)).alerts.firmware_build_id_mismatch);
        assert!(!router.telemetry(robot(1)).alerts.firmware_build_id_mismatch);
        assert!(router.telemetry(robot(2)).alerts.firmware_build_id_mismatch);
        assert!(!router.telemetry(robot(2)).alerts.fpga_build_id_mismatch);
        // 没有构建 ID 的机器人不参与比较
        assert!(!router.telemetry(robot(3)).alerts.firmware_build_id_mismatch);
    }

    #[test]
    fn test_mark_dead() {
        let (mut router, sink, rx, metrics) = setup();
        let now = Instant::now();
        router.handle_message(&status_frame(5, 300), now, &sink, &metrics);
        router.handle_message(&build_ids_frame(5, 1, 1), now, &sink, &metrics);
        while rx.try_recv().is_ok() {}

        router.mark_dead(robot(5), &sink);
        let t = router.telemetry(robot(5));
        assert!(!t.alive);
        assert!(!t.build_ids_valid);
        assert!(!t.alerts.any());
        assert_eq!(
            rx.try_recv().unwrap(),
            DongleEvent::AliveChanged {
                robot: robot(5),
                alive: false
            }
        );

        // 再次标记不重复发事件
        router.mark_dead(robot(5), &sink);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_firmware_inbox() {
        let (mut router, sink, _rx, metrics) = setup();
        router.handle_message(&[1, 0x03, 0x13, 9, 8, 0, 0], Instant::now(), &sink, &metrics);
        assert!(router.take_firmware_response(robot(1), 0x14).is_none());
        assert_eq!(
            router.take_firmware_response(robot(1), 0x13).unwrap().as_ref(),
            &[9, 8]
        );
        assert!(router.take_firmware_response(robot(1), 0x13).is_none());
    }

    #[test]
    fn test_estop_status() {
        let (mut router, sink, rx, metrics) = setup();
        assert_eq!(router.estop(), EStopState::Broken);
        assert_eq!(router.handle_status(&[1], &sink, &metrics), Some(EStopState::Run));
        assert_eq!(router.handle_status(&[1], &sink, &metrics), None);
        assert_eq!(
            rx.try_recv().unwrap(),
            DongleEvent::EStopChanged(EStopState::Run)
        );

        // 未知值视为断线
        assert_eq!(
            router.handle_status(&[7], &sink, &metrics),
            Some(EStopState::Broken)
        );
        assert_eq!(metrics.snapshot().inbound_malformed, 1);
    }
}
