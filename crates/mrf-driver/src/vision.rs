//! 视觉数据接入
//!
//! 视觉接收跑在独立线程上（接收调用会阻塞），解码后的帧放进有界队列，
//! 由事件循环线程取出并经非可靠通道转发给机器人。队列满时丢弃最旧的帧，
//! 生产者从不阻塞。

use crate::config::DongleConfig;
use crate::dongle::Dongle;
use crate::metrics::DongleMetrics;
use mrf_protocol::{CameraPayload, RobotIndex};
use mrf_usb::Transport;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use tracing::{debug, error, info, warn};

/// 一个机器人的检测结果（米、弧度）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RobotDetection {
    pub robot: RobotIndex,
    pub x: f64,
    pub y: f64,
    pub orientation: f64,
}

/// 一帧视觉数据
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VisionFrame {
    pub robots: Vec<RobotDetection>,
    /// 球位置（米），未检测到时为 None
    pub ball: Option<(f64, f64)>,
}

/// 有界的视觉帧队列
#[derive(Debug)]
pub struct DetectionQueue {
    frames: Mutex<VecDeque<VisionFrame>>,
    capacity: usize,
    metrics: Arc<DongleMetrics>,
}

impl DetectionQueue {
    pub fn new(capacity: usize, metrics: Arc<DongleMetrics>) -> Self {
        let capacity = capacity.max(1);
        Self {
            frames: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            metrics,
        }
    }

    /// 按 `vision_queue_capacity` 创建
    pub fn from_config(config: &DongleConfig, metrics: Arc<DongleMetrics>) -> Self {
        Self::new(config.vision_queue_capacity, metrics)
    }

    /// 放入一帧，满时丢弃最旧的
    pub fn push(&self, frame: VisionFrame) {
        let mut frames = self.frames.lock();
        if frames.len() >= self.capacity {
            frames.pop_front();
            DongleMetrics::inc(&self.metrics.vision_frames_dropped);
            warn!("Vision queue full ({}), dropping oldest frame", self.capacity);
        }
        frames.push_back(frame);
    }

    /// 取出全部帧（按到达顺序）
    pub fn drain(&self) -> Vec<VisionFrame> {
        self.frames.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.frames.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// 视觉数据源，`recv` 阻塞直到下一帧，返回 None 表示数据源结束
pub trait DetectionSource: Send + 'static {
    fn recv(&mut self) -> Option<VisionFrame>;
}

/// 视觉接收线程
pub struct VisionWorker {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl VisionWorker {
    /// 启动接收线程
    pub fn spawn<S: DetectionSource>(
        mut source: S,
        queue: Arc<DetectionQueue>,
    ) -> std::io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let handle = std::thread::Builder::new()
            .name("mrf-vision".into())
            .spawn(move || {
                info!("Vision worker started");
                while !stop_flag.load(Ordering::Acquire) {
                    match source.recv() {
                        Some(frame) => queue.push(frame),
                        None => {
                            debug!("Vision source ended");
                            break;
                        },
                    }
                }
                info!("Vision worker stopped");
            })?;
        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(|h| h.is_finished())
    }

    /// 请求停止并等待线程退出（会等待当前的 `recv` 返回）
    pub fn join(mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            error!("Vision worker panicked");
        }
    }
}

impl Drop for VisionWorker {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        // 阻塞在 recv 中的线程无法打断，未结束时分离
        if let Some(handle) = self.handle.take()
            && handle.is_finished()
            && handle.join().is_err()
        {
            error!("Vision worker panicked");
        }
    }
}

/// 相机数据转发：每 N 帧向帧中每个机器人发送一次位置
#[derive(Debug)]
pub struct CameraRelay {
    divisor: u32,
    counter: u32,
}

impl CameraRelay {
    pub fn new(divisor: u32) -> Self {
        Self {
            divisor: divisor.max(1),
            counter: 0,
        }
    }

    /// 按 `camera_relay_divisor` 创建
    pub fn from_config(config: &DongleConfig) -> Self {
        Self::new(config.camera_relay_divisor)
    }

    /// 处理一批帧，返回发出的相机消息数
    pub fn relay<T: Transport>(
        &mut self,
        dongle: &mut Dongle<T>,
        frames: impl IntoIterator<Item = VisionFrame>,
    ) -> usize {
        let mut sent = 0;
        for frame in frames {
            self.counter = (self.counter + 1) % self.divisor;
            if self.counter != 0 {
                continue;
            }
            let ball_mm = frame.ball.map(|(x, y)| (to_milli(x), to_milli(y)));
            for detection in &frame.robots {
                let payload = CameraPayload {
                    x_mm: to_milli(detection.x),
                    y_mm: to_milli(detection.y),
                    theta_mrad: to_milli(detection.orientation),
                    ball_mm,
                };
                match dongle.send_unreliable(detection.robot, &payload.encode()) {
                    Ok(()) => sent += 1,
                    Err(e) => error!("Camera relay to robot {} failed: {}", detection.robot, e),
                }
            }
        }
        sent
    }
}

/// 米/弧度转千分单位，饱和到 i16，避开无球哨兵值
fn to_milli(value: f64) -> i16 {
    if value.is_nan() {
        return 0;
    }
    (value * 1000.0)
        .round()
        .clamp(CameraPayload::NO_BALL as f64 + 1.0, i16::MAX as f64) as i16
}
