//! dongle 事件循环
//!
//! `Dongle` 拥有传输后端和全部核心状态，单线程运行：
//! - `poll` 取出传输事件按 `TransferId` 或 IN 端点分发，然后执行空闲任务
//! - 所有发送操作立即返回，不等待 IO
//! - 可靠消息的结果通过 [`ReliableOperation`] 句柄非阻塞地查询

use crate::config::DongleConfig;
use crate::drive::DriveMultiplexer;
use crate::error::{ConfigError, DriverError};
use crate::events::{DongleEvent, EventSink};
use crate::message_id::MessageIdPool;
use crate::metrics::DongleMetrics;
use crate::reliable::{ReliableChannel, ReliableOperation};
use crate::robot::Robot;
use crate::router::{InboundRouter, RouteAction};
use crate::scheduler::{IdleScheduler, IdleTask};
use crate::telemetry::Telemetry;
use crate::unreliable::UnreliableQueue;
use crate::vision::{CameraRelay, DetectionQueue};
use crate::watchdog::FeedbackWatchdog;
use bytes::Bytes;
use crossbeam_channel::Receiver;
use mrf_protocol::{
    ControlRequest, DriveWord, EStopState, RobotIndex, build_ids_request_payload,
    parse_delivery_reports,
};
use mrf_usb::{
    AsyncTransfer, InEndpoint, OutTransfer, TransferError, TransferId, Transport, TransportEvent,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, trace, warn};

/// 递增的传输 ID 分配器
#[derive(Debug, Default)]
pub(crate) struct TransferIds {
    next: u64,
}

impl TransferIds {
    pub(crate) fn next(&mut self) -> TransferId {
        let id = TransferId(self.next);
        self.next = self.next.wrapping_add(1);
        id
    }
}

/// 蜂鸣合并：最多一个控制传输在途，其间的请求只保留最长的
#[derive(Debug, Default)]
struct BeepState {
    in_flight: Option<AsyncTransfer>,
    pending_ms: u16,
}

/// MRF dongle
pub struct Dongle<T: Transport> {
    transport: T,
    config: DongleConfig,
    ids: TransferIds,
    message_ids: MessageIdPool,
    drive: DriveMultiplexer,
    unreliable: UnreliableQueue,
    reliable: ReliableChannel,
    router: InboundRouter,
    scheduler: IdleScheduler,
    watchdog: FeedbackWatchdog,
    beep: BeepState,
    events: EventSink,
    metrics: Arc<DongleMetrics>,
}

impl<T: Transport> Dongle<T> {
    /// 在已打开的传输后端上创建 dongle
    pub fn new(transport: T, config: DongleConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let metrics = Arc::new(DongleMetrics::new());
        let events = EventSink::new(config.event_queue_capacity, metrics.clone());
        Ok(Self {
            transport,
            ids: TransferIds::default(),
            message_ids: MessageIdPool::new(),
            drive: DriveMultiplexer::new(),
            unreliable: UnreliableQueue::new(config.unreliable_in_flight_limit),
            reliable: ReliableChannel::new(),
            router: InboundRouter::new(),
            scheduler: IdleScheduler::new(),
            watchdog: FeedbackWatchdog::new(config.feedback_timeout()),
            beep: BeepState::default(),
            events,
            metrics,
            config,
        })
    }

    /// 获取某个机器人的命令接口
    pub fn robot(&mut self, index: RobotIndex) -> Robot<'_, T> {
        Robot::new(self, index)
    }

    /// 机器人遥测（只读）
    pub fn telemetry(&self, index: RobotIndex) -> &Telemetry {
        self.router.telemetry(index)
    }

    /// 当前驱动表中的驱动字
    pub fn drive_word(&self, index: RobotIndex) -> DriveWord {
        self.drive.word(index)
    }

    /// 订阅事件，替换之前的订阅者；订阅之前的事件不会保留
    pub fn events(&mut self) -> Receiver<DongleEvent> {
        self.events.subscribe()
    }

    pub fn metrics(&self) -> Arc<DongleMetrics> {
        self.metrics.clone()
    }

    /// 按配置容量创建视觉队列，丢帧计入本 dongle 的指标
    pub fn vision_queue(&self) -> Arc<DetectionQueue> {
        Arc::new(DetectionQueue::from_config(&self.config, self.metrics.clone()))
    }

    /// 按配置分频创建相机转发器
    pub fn camera_relay(&self) -> CameraRelay {
        CameraRelay::from_config(&self.config)
    }

    pub fn config(&self) -> &DongleConfig {
        &self.config
    }

    pub fn estop(&self) -> EStopState {
        self.router.estop()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// 可用的可靠消息 ID 数量
    pub fn message_ids_available(&self) -> usize {
        self.message_ids.available()
    }

    /// 在途的可靠操作数量
    pub fn reliable_outstanding(&self) -> usize {
        self.reliable.outstanding()
    }

    /// 在途的非可靠消息数量
    pub fn unreliable_in_flight(&self) -> usize {
        self.unreliable.in_flight()
    }

    /// 在途的驱动帧
    pub fn drive_in_flight(&self) -> Option<TransferId> {
        self.drive.in_flight()
    }

    /// 处理传输事件
    ///
    /// 第一个事件最多等待 `timeout`，之后取空已就绪的事件，最后执行空闲任务。
    /// 返回处理的事件数。
    pub fn poll(&mut self, timeout: Duration) -> usize {
        let mut handled = 0;
        let mut wait = timeout;
        while let Some(event) = self.transport.poll_event(wait) {
            self.dispatch(event);
            handled += 1;
            wait = Duration::ZERO;
        }
        self.run_idle();
        handled
    }

    /// 执行排程的空闲任务
    pub fn run_idle(&mut self) {
        for task in self.scheduler.take() {
            match task {
                IdleTask::SubmitDrive => {
                    self.drive
                        .run_scheduled(&mut self.transport, &mut self.ids, &self.metrics);
                },
            }
        }
    }

    fn dispatch(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Completed { id, result } => self.on_completed(id, result),
            TransportEvent::Received { endpoint, data } => self.on_received(endpoint, data),
            TransportEvent::ReceiveFailed { endpoint, error } => {
                DongleMetrics::inc(&self.metrics.receive_errors);
                if error.is_fatal() {
                    error!("IN endpoint {:?} failed: {}", endpoint, error);
                } else {
                    warn!("IN endpoint {:?} read error: {}", endpoint, error);
                }
            },
        }
    }

    fn on_completed(&mut self, id: TransferId, result: Result<(), TransferError>) {
        if self.drive.on_complete(
            id,
            result.clone(),
            &mut self.transport,
            &mut self.ids,
            &self.metrics,
        ) {
            return;
        }
        if self
            .reliable
            .on_transfer_complete(id, result.clone(), &mut self.message_ids, &self.metrics)
        {
            return;
        }
        if self.unreliable.on_complete(id, result.clone(), &self.metrics) {
            return;
        }
        if let Some(transfer) = self.beep.in_flight.as_mut()
            && transfer.id() == id
        {
            transfer.complete(result);
            if let Err(e) = transfer.result() {
                warn!("Beep request failed: {}", e);
            }
            self.beep.in_flight = None;
            self.flush_beep();
            return;
        }
        trace!("Completion for unknown transfer {}", id);
    }

    fn on_received(&mut self, endpoint: InEndpoint, data: Bytes) {
        match endpoint {
            InEndpoint::DeliveryReports => match parse_delivery_reports(&data) {
                Ok(reports) => {
                    for report in reports {
                        self.reliable.on_delivery_report(
                            report,
                            &mut self.message_ids,
                            &self.metrics,
                        );
                    }
                },
                Err(e) => {
                    DongleMetrics::inc(&self.metrics.inbound_malformed);
                    error!("Discarding delivery reports {:02X?}: {}", data.as_ref(), e);
                },
            },
            InEndpoint::Messages => {
                let now = Instant::now();
                match self
                    .router
                    .handle_message(&data, now, &self.events, &self.metrics)
                {
                    RouteAction::None => {},
                    RouteAction::Feed(robot) => self.watchdog.feed(robot, now),
                    RouteAction::FeedAndRequestBuildIds(robot) => {
                        self.watchdog.feed(robot, now);
                        trace!("Requesting build IDs from robot {}", robot);
                        self.send_unreliable_logged(robot, &build_ids_request_payload());
                    },
                }
            },
            InEndpoint::Status => {
                self.router
                    .handle_status(&data, &self.events, &self.metrics);
            },
        }
    }

    /// 修改驱动表，必要时排程一次提交
    pub(crate) fn mutate_drive(&mut self, robot: RobotIndex, f: impl FnOnce(&mut DriveWord)) {
        if self.drive.mutate(robot, f) {
            self.scheduler.schedule(IdleTask::SubmitDrive);
        } else {
            DongleMetrics::inc(&self.metrics.drive_mutations_coalesced);
        }
    }

    /// 发送非可靠消息，传输失败不返回给调用方
    pub fn send_unreliable(&mut self, robot: RobotIndex, payload: &[u8]) -> Result<(), DriverError> {
        self.unreliable.send(
            robot,
            payload,
            &mut self.transport,
            &mut self.ids,
            &self.metrics,
        )?;
        Ok(())
    }

    fn send_unreliable_logged(&mut self, robot: RobotIndex, payload: &[u8]) {
        if let Err(e) = self.send_unreliable(robot, payload) {
            error!("Failed to frame message for robot {}: {}", robot, e);
        }
    }

    /// 发送可靠消息
    pub fn send_reliable(
        &mut self,
        robot: RobotIndex,
        payload: &[u8],
    ) -> Result<ReliableOperation, DriverError> {
        self.reliable.send(
            robot,
            payload,
            &mut self.message_ids,
            &mut self.transport,
            &mut self.ids,
            &self.metrics,
        )
    }

    /// 蜂鸣 `ms` 毫秒，与在途的蜂鸣合并
    pub fn beep(&mut self, ms: u16) {
        self.beep.pending_ms = self.beep.pending_ms.max(ms);
        self.flush_beep();
    }

    /// 仍有蜂鸣请求在途或等待发送
    pub fn beep_pending(&self) -> bool {
        self.beep.in_flight.is_some() || self.beep.pending_ms > 0
    }

    fn flush_beep(&mut self) {
        if self.beep.in_flight.is_some() || self.beep.pending_ms == 0 {
            return;
        }
        let ms = std::mem::take(&mut self.beep.pending_ms);
        let mut transfer = AsyncTransfer::new(self.ids.next());
        match transfer.submit(
            &mut self.transport,
            OutTransfer::Control {
                request: ControlRequest::Beep.into(),
                value: ms,
                data: Bytes::new(),
            },
        ) {
            Ok(()) => {
                trace!("Beep {} ms submitted", ms);
                self.beep.in_flight = Some(transfer);
            },
            Err(e) => warn!("Beep request rejected: {}", e),
        }
    }

    /// 检查反馈超时，超时的机器人被标记为失联
    pub fn check_feedback(&mut self, now: Instant) -> Vec<RobotIndex> {
        let expired = self.watchdog.expired(now);
        for &robot in &expired {
            self.router.mark_dead(robot, &self.events);
        }
        expired
    }

    /// 标记机器人失联：清除存活标志、构建 ID 和全部告警
    pub fn mark_dead(&mut self, robot: RobotIndex) {
        self.router.mark_dead(robot, &self.events);
    }

    /// 取出机器人的固件应答
    pub fn take_firmware_response(&mut self, robot: RobotIndex, request: u8) -> Option<Bytes> {
        self.router.take_firmware_response(robot, request)
    }

    pub(crate) fn discard_firmware_responses(&mut self, robot: RobotIndex, request: u8) {
        self.router.discard_firmware_responses(robot, request);
    }
}

#[cfg(feature = "usb")]
impl Dongle<mrf_usb::UsbTransport> {
    /// 打开 USB dongle 并按配置设置无线参数
    pub fn open(config: DongleConfig) -> Result<Self, crate::error::OpenError> {
        let transport = mrf_usb::UsbTransport::open(
            &config.radio,
            config.serial.as_deref(),
            config.transfer_timeout(),
        )?;
        tracing::info!(
            "Dongle {} opened on channel {}",
            transport.serial_number().unwrap_or("<no serial>"),
            config.radio.channel
        );
        Ok(Self::new(transport, config)?)
    }
}
