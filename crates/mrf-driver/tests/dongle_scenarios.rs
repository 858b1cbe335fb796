//! dongle 端到端场景测试（Mock 传输）
//!
//! 覆盖驱动表复用、可靠消息 ID 生命周期、上行消息路由和急停状态。

use mrf_driver::protocol::{DriveFrame, EStopState, MessageId, RobotIndex};
use mrf_driver::usb::{InEndpoint, MockTransport, OutEndpoint, TransferError};
use mrf_driver::{
    Dongle, DongleConfig, DongleEvent, DriverError, MessageIdError, OperationState, ReliableError,
};
use proptest::prelude::*;
use rand::SeedableRng;
use rand::seq::SliceRandom;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn dongle() -> Dongle<MockTransport> {
    Dongle::new(MockTransport::new(), DongleConfig::default()).unwrap()
}

fn robot(i: u8) -> RobotIndex {
    RobotIndex::new(i).unwrap()
}

/// 机器人上行帧：`[robot][message...][lqi][rssi]`
fn robot_frame(robot: u8, message: &[u8]) -> Vec<u8> {
    let mut frame = vec![robot];
    frame.extend_from_slice(message);
    frame.extend_from_slice(&[200, 180]);
    frame
}

fn general_status(battery_raw: u16) -> Vec<u8> {
    let mut message = vec![0x00];
    message.extend_from_slice(&battery_raw.to_le_bytes());
    message.extend_from_slice(&2500u16.to_le_bytes());
    message.extend_from_slice(&1000u16.to_le_bytes());
    message.extend_from_slice(&2200u16.to_le_bytes());
    message.push(0x40);
    message
}

fn deliver(dongle: &mut Dongle<MockTransport>, id: MessageId, status: u8) {
    dongle
        .transport_mut()
        .inject(InEndpoint::DeliveryReports, vec![id.get(), status]);
    dongle.poll(Duration::ZERO);
}

#[test]
fn test_drive_frame_layout_for_single_robot() {
    let mut dongle = dongle();
    dongle.robot(robot(3)).drive([100, -100, 100, -100], true);
    dongle.poll(Duration::ZERO);

    let drive = dongle.transport().submissions_to(OutEndpoint::Drive);
    assert_eq!(drive.len(), 1);
    let data = drive[0].data();
    assert_eq!(data.len(), 64);
    assert_eq!(
        &data[24..32],
        &[0x64, 0x60, 0x64, 0x04, 0x64, 0x00, 0x64, 0x04]
    );
    assert!(data[..24].iter().all(|&b| b == 0));
    assert!(data[32..].iter().all(|&b| b == 0));
}

#[test]
fn test_dirty_resend_carries_latest_values() {
    let mut dongle = dongle();
    dongle.robot(robot(0)).drive([1, 1, 1, 1], true);
    dongle.poll(Duration::ZERO);
    assert!(dongle.drive_in_flight().is_some());

    // 在途期间的两次修改
    dongle.robot(robot(0)).drive([2, 2, 2, 2], true);
    dongle.robot(robot(0)).drive([3, 3, 3, 3], true);
    dongle.poll(Duration::ZERO);
    assert_eq!(dongle.transport().submissions_to(OutEndpoint::Drive).len(), 1);

    dongle
        .transport_mut()
        .complete_next(OutEndpoint::Drive, Ok(()));
    dongle.poll(Duration::ZERO);
    let drive = dongle.transport().submissions_to(OutEndpoint::Drive);
    assert_eq!(drive.len(), 2);
    let frame = DriveFrame::parse(drive[1].data()).unwrap();
    assert_eq!(frame.robot(robot(0)).wheels, [3, 3, 3, 3]);

    // 无新修改时不再发送
    dongle
        .transport_mut()
        .complete_next(OutEndpoint::Drive, Ok(()));
    dongle.poll(Duration::ZERO);
    assert_eq!(dongle.transport().submissions_to(OutEndpoint::Drive).len(), 2);
    assert!(dongle.drive_in_flight().is_none());
}

#[test]
fn test_failed_drive_frame_does_not_stall_updates() {
    let mut dongle = dongle();
    dongle.robot(robot(1)).drive([10, 10, 10, 10], false);
    dongle.poll(Duration::ZERO);
    dongle.robot(robot(1)).dribble(true);

    dongle
        .transport_mut()
        .complete_next(OutEndpoint::Drive, Err(TransferError::Stall));
    dongle.poll(Duration::ZERO);

    let drive = dongle.transport().submissions_to(OutEndpoint::Drive);
    assert_eq!(drive.len(), 2);
    assert!(DriveFrame::parse(drive[1].data()).unwrap().robot(robot(1)).dribbler);
    assert_eq!(dongle.metrics().snapshot().drive_frames_failed, 1);
}

#[test]
fn test_not_acknowledged_releases_id() {
    let mut dongle = dongle();
    let mut op = dongle.robot(robot(0)).spi_chip_erase().unwrap();
    assert_eq!(op.state(), OperationState::Submitted);

    dongle
        .transport_mut()
        .complete_next(OutEndpoint::Reliable, Ok(()));
    dongle.poll(Duration::ZERO);
    assert!(!op.is_done());

    deliver(&mut dongle, op.message_id(), 0x02);
    assert_eq!(op.result(), Err(ReliableError::NotAcknowledged));
    assert_eq!(op.state(), OperationState::FailedNotAcknowledged);
    assert_eq!(dongle.message_ids_available(), 256);

    // 全部 256 个 ID 都能再次分配
    let mut ops = Vec::new();
    for _ in 0..256 {
        ops.push(dongle.send_reliable(robot(1), &[0x10]).unwrap());
    }
    assert_eq!(
        dongle.send_reliable(robot(1), &[0x10]).unwrap_err(),
        DriverError::MessageIds(MessageIdError::Exhausted)
    );
}

#[test]
fn test_reused_id_routes_to_new_operation() {
    let mut dongle = dongle();
    let mut first = dongle.send_reliable(robot(2), &[0x10]).unwrap();
    assert_eq!(first.message_id(), MessageId(0));
    dongle
        .transport_mut()
        .complete_next(OutEndpoint::Reliable, Ok(()));
    deliver(&mut dongle, MessageId(0), 0x00);
    assert_eq!(first.result(), Ok(()));

    // ID 池按 FIFO 轮转，第 257 次发送重新拿到 ID 0
    let mut held = Vec::new();
    for _ in 0..255 {
        held.push(dongle.send_reliable(robot(2), &[0x10]).unwrap());
    }
    let mut second = dongle.send_reliable(robot(5), &[0x10]).unwrap();
    assert_eq!(second.message_id(), MessageId(0));

    dongle.transport_mut().complete_all(Ok(()));
    dongle.poll(Duration::ZERO);
    deliver(&mut dongle, MessageId(0), 0x01);
    assert_eq!(second.result(), Err(ReliableError::NotAssociated));
    assert_eq!(second.robot(), robot(5));
    assert_eq!(first.result(), Ok(()));
    assert!(held.iter_mut().all(|op| !op.is_done()));

    // 重复的报告不再匹配任何操作
    deliver(&mut dongle, MessageId(0), 0x00);
    assert_eq!(dongle.metrics().snapshot().delivery_reports_unmatched, 1);
}

#[test]
fn test_delivery_status_translation() {
    let cases = [
        (0x00, Ok(())),
        (0x01, Err(ReliableError::NotAssociated)),
        (0x02, Err(ReliableError::NotAcknowledged)),
        (0x03, Err(ReliableError::ClearChannel)),
        (0x7F, Err(ReliableError::UnknownStatus(0x7F))),
    ];
    let mut dongle = dongle();
    for (status, expected) in cases {
        let mut op = dongle.send_reliable(robot(4), &[0x08]).unwrap();
        dongle
            .transport_mut()
            .complete_next(OutEndpoint::Reliable, Ok(()));
        deliver(&mut dongle, op.message_id(), status);
        assert_eq!(op.result(), expected, "status 0x{:02X}", status);
    }
    assert_eq!(dongle.reliable_outstanding(), 0);
    assert_eq!(dongle.message_ids_available(), 256);
}

#[test]
fn test_transport_failure_then_late_report() {
    let mut dongle = dongle();
    let mut op = dongle.send_reliable(robot(0), &[0x08]).unwrap();
    dongle
        .transport_mut()
        .complete_next(OutEndpoint::Reliable, Err(TransferError::Timeout));
    dongle.poll(Duration::ZERO);
    assert_eq!(
        op.result(),
        Err(ReliableError::Transport(TransferError::Timeout))
    );
    assert_eq!(op.state(), OperationState::FailedTransport);

    deliver(&mut dongle, op.message_id(), 0x00);
    assert_eq!(
        op.result(),
        Err(ReliableError::Transport(TransferError::Timeout))
    );
    assert_eq!(dongle.metrics().snapshot().delivery_reports_unmatched, 1);
}

#[test]
fn test_reports_in_any_order_complete_matching_operations() {
    let mut dongle = dongle();
    let mut ops: Vec<_> = (0..200)
        .map(|i| dongle.send_reliable(robot((i % 8) as u8), &[0x08]).unwrap())
        .collect();
    dongle.transport_mut().complete_all(Ok(()));
    dongle.poll(Duration::ZERO);

    // 奇数 ID 报告未确认，其余成功，按随机顺序到达
    let mut ids: Vec<u8> = ops.iter().map(|op| op.message_id().get()).collect();
    ids.shuffle(&mut rand::rngs::StdRng::seed_from_u64(7));
    for chunk in ids.chunks(16) {
        let data: Vec<u8> = chunk
            .iter()
            .flat_map(|&id| [id, if id % 2 == 1 { 0x02 } else { 0x00 }])
            .collect();
        dongle
            .transport_mut()
            .inject(InEndpoint::DeliveryReports, data);
    }
    dongle.poll(Duration::ZERO);

    for op in &mut ops {
        let expected = if op.message_id().get() % 2 == 1 {
            Err(ReliableError::NotAcknowledged)
        } else {
            Ok(())
        };
        assert_eq!(op.result(), expected);
    }
    assert_eq!(dongle.message_ids_available(), 256);
    let snapshot = dongle.metrics().snapshot();
    assert_eq!(snapshot.reliable_ok, 100);
    assert_eq!(snapshot.reliable_failed, 100);
}

#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[test]
fn test_malformed_status_leaves_telemetry_untouched() {
    let mut dongle = dongle();
    dongle
        .transport_mut()
        .inject(InEndpoint::Messages, robot_frame(6, &general_status(15_000)));
    dongle.poll(Duration::ZERO);
    let before = *dongle.telemetry(robot(6));
    assert!(before.alive);
    assert!((before.battery_voltage - 15.0).abs() < 1e-9);

    let logs = CapturedLogs::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::ERROR)
        .finish();

    // 少一个字节的状态报告
    let mut truncated = general_status(9_000);
    truncated.pop();
    tracing::subscriber::with_default(subscriber, || {
        dongle
            .transport_mut()
            .inject(InEndpoint::Messages, robot_frame(6, &truncated));
        dongle.poll(Duration::ZERO);
    });

    assert_eq!(*dongle.telemetry(robot(6)), before);
    assert_eq!(dongle.metrics().snapshot().inbound_malformed, 1);
    let output = logs.contents();
    assert_eq!(output.lines().filter(|l| l.contains("ERROR")).count(), 1);
}

fn flood_status_frames(dongle: &mut Dongle<MockTransport>, count: usize) -> String {
    let logs = CapturedLogs::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::WARN)
        .finish();
    tracing::subscriber::with_default(subscriber, || {
        for _ in 0..count {
            dongle
                .transport_mut()
                .inject(InEndpoint::Messages, robot_frame(1, &general_status(15_000)));
        }
        dongle.poll(Duration::ZERO);
    });
    logs.contents()
}

#[test]
fn test_unsubscribed_events_are_discarded_quietly() {
    let mut dongle = dongle();
    let output = flood_status_frames(&mut dongle, 1000);

    assert_eq!(output.lines().filter(|l| l.contains("WARN")).count(), 0);
    assert_eq!(dongle.metrics().snapshot().events_dropped, 0);
    assert!(dongle.telemetry(robot(1)).alive);
}

#[test]
fn test_slow_subscriber_overflow_warns_once() {
    let mut dongle = dongle();
    let events = dongle.events();
    let output = flood_status_frames(&mut dongle, 1000);

    // 1 次存活变化 + 1000 次遥测更新，队列容量 256
    assert_eq!(output.lines().filter(|l| l.contains("WARN")).count(), 1);
    assert_eq!(dongle.metrics().snapshot().events_dropped, 1001 - 256);
    assert_eq!(events.try_iter().count(), 256);
}

#[test]
fn test_inbound_events() {
    let mut dongle = dongle();
    let events = dongle.events();
    dongle
        .transport_mut()
        .inject(InEndpoint::Messages, robot_frame(2, &general_status(15_000)));
    dongle
        .transport_mut()
        .inject(InEndpoint::Messages, robot_frame(2, &[0x01]));
    dongle.transport_mut().inject(InEndpoint::Status, vec![1u8]);
    dongle.poll(Duration::ZERO);

    let received: Vec<DongleEvent> = events.try_iter().collect();
    assert_eq!(
        received,
        vec![
            DongleEvent::AliveChanged {
                robot: robot(2),
                alive: true
            },
            DongleEvent::TelemetryUpdated { robot: robot(2) },
            DongleEvent::AutokickFired { robot: robot(2) },
            DongleEvent::EStopChanged(EStopState::Run),
        ]
    );
    assert_eq!(dongle.estop(), EStopState::Run);

    // 未知的急停值按断线处理
    dongle.transport_mut().inject(InEndpoint::Status, vec![9u8]);
    dongle.poll(Duration::ZERO);
    assert_eq!(dongle.estop(), EStopState::Broken);
}

#[derive(Debug, Clone)]
enum Action {
    Drive(u8, i16),
    Complete(bool),
    Poll,
}

fn action() -> impl Strategy<Value = Action> {
    prop_oneof![
        (0u8..8, -1023i16..=1023).prop_map(|(r, w)| Action::Drive(r, w)),
        any::<bool>().prop_map(Action::Complete),
        Just(Action::Poll),
    ]
}

proptest! {
    #[test]
    fn prop_single_drive_frame_in_flight(actions in prop::collection::vec(action(), 1..64)) {
        let mut dongle = dongle();
        for action in actions {
            match action {
                Action::Drive(r, w) => dongle.robot(robot(r)).drive([w as i32; 4], true),
                Action::Complete(ok) => {
                    let result = if ok { Ok(()) } else { Err(TransferError::Stall) };
                    dongle.transport_mut().complete_next(OutEndpoint::Drive, result);
                },
                Action::Poll => {
                    dongle.poll(Duration::ZERO);
                },
            }
            prop_assert!(dongle.transport().in_flight(OutEndpoint::Drive).len() <= 1);
        }

        // 收尾：最后发出的帧必须等于当前驱动表
        dongle.poll(Duration::ZERO);
        while dongle
            .transport_mut()
            .complete_next(OutEndpoint::Drive, Ok(()))
            .is_some()
        {
            dongle.poll(Duration::ZERO);
        }
        if let Some(last) = dongle.transport().last_submission(OutEndpoint::Drive) {
            let frame = DriveFrame::parse(last.data()).unwrap();
            for r in RobotIndex::all() {
                prop_assert_eq!(*frame.robot(r), dongle.drive_word(r));
            }
        }
    }
}
