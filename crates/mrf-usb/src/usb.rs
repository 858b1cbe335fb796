//! 基于 rusb 的传输后端
//!
//! 线程模型：
//! - 每个 OUT 端点一个工作线程，外加一个控制请求线程，
//!   驱动帧、可靠消息和非可靠消息互不排队
//! - 每个 IN 端点一个读取线程
//!
//! 所有线程通过同一个事件通道把结果送回事件循环。

use crate::device::MrfDevice;
use crate::error::UsbError;
use crate::{InEndpoint, OutEndpoint, OutTransfer, TransferError, TransferId, Transport, TransportEvent};
use bytes::Bytes;
use crossbeam_channel::{Receiver, Sender, TrySendError, bounded, unbounded};
use mrf_protocol::RadioConfig;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// 每个工作线程的待发送队列深度
const JOB_QUEUE_DEPTH: usize = 64;

/// 队列中传输的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobState {
    Queued,
    Running,
    Cancelled,
}

type JobTable = Arc<Mutex<HashMap<TransferId, JobState>>>;

struct Job {
    id: TransferId,
    transfer: OutTransfer,
}

/// 工作线程的共享上下文
#[derive(Clone)]
struct WorkerContext {
    device: Arc<MrfDevice>,
    jobs: JobTable,
    events: Sender<TransportEvent>,
    running: Arc<AtomicBool>,
    timeout: Duration,
}

/// 真实硬件传输后端
pub struct UsbTransport {
    device: Arc<MrfDevice>,
    jobs: JobTable,
    out_queues: HashMap<OutEndpoint, Sender<Job>>,
    control_queue: Option<Sender<Job>>,
    events: Receiver<TransportEvent>,
    running: Arc<AtomicBool>,
    threads: Vec<JoinHandle<()>>,
}

impl UsbTransport {
    /// 打开并配置 dongle，启动全部工作线程
    ///
    /// `timeout` 是单次 USB 传输的超时，同时决定读取线程检查退出标志的间隔。
    pub fn open(
        radio: &RadioConfig,
        serial: Option<&str>,
        timeout: Duration,
    ) -> Result<Self, UsbError> {
        let mut device = MrfDevice::open(serial)?;
        device.configure_radio(radio)?;
        let device = Arc::new(device);

        let jobs: JobTable = Arc::new(Mutex::new(HashMap::new()));
        let (event_tx, event_rx) = unbounded();
        let running = Arc::new(AtomicBool::new(true));
        let ctx = WorkerContext {
            device: device.clone(),
            jobs: jobs.clone(),
            events: event_tx,
            running: running.clone(),
            timeout,
        };

        let mut threads = Vec::new();
        let mut out_queues = HashMap::new();
        for endpoint in OutEndpoint::ALL {
            let (tx, rx) = bounded(JOB_QUEUE_DEPTH);
            let worker_ctx = ctx.clone();
            let handle = std::thread::Builder::new()
                .name(format!("mrf_out_{}", endpoint.address()))
                .spawn(move || out_worker(worker_ctx, rx))?;
            threads.push(handle);
            out_queues.insert(endpoint, tx);
        }

        let (control_tx, control_rx) = bounded(JOB_QUEUE_DEPTH);
        let worker_ctx = ctx.clone();
        threads.push(
            std::thread::Builder::new()
                .name("mrf_control".to_string())
                .spawn(move || out_worker(worker_ctx, control_rx))?,
        );

        for endpoint in InEndpoint::ALL {
            let reader_ctx = ctx.clone();
            threads.push(
                std::thread::Builder::new()
                    .name(format!("mrf_in_{:02x}", endpoint.address()))
                    .spawn(move || in_reader(reader_ctx, endpoint))?,
            );
        }

        info!("USB transport started with {} threads", threads.len());
        Ok(Self {
            device,
            jobs,
            out_queues,
            control_queue: Some(control_tx),
            events: event_rx,
            running,
            threads,
        })
    }

    /// dongle 序列号
    pub fn serial_number(&self) -> Option<&str> {
        self.device.serial_number()
    }
}

impl Transport for UsbTransport {
    fn submit(&mut self, id: TransferId, transfer: OutTransfer) -> Result<(), TransferError> {
        let queue = match transfer.endpoint() {
            Some(endpoint) => self.out_queues.get(&endpoint),
            None => self.control_queue.as_ref(),
        }
        .ok_or(TransferError::Closed)?;

        {
            let mut jobs = self.jobs.lock();
            if jobs.contains_key(&id) {
                return Err(TransferError::AlreadySubmitted);
            }
            jobs.insert(id, JobState::Queued);
        }

        match queue.try_send(Job { id, transfer }) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.jobs.lock().remove(&id);
                match e {
                    TrySendError::Full(_) => Err(TransferError::Busy),
                    TrySendError::Disconnected(_) => Err(TransferError::Closed),
                }
            },
        }
    }

    fn cancel(&mut self, id: TransferId) -> bool {
        let mut jobs = self.jobs.lock();
        if let Some(state) = jobs.get_mut(&id)
            && *state == JobState::Queued
        {
            *state = JobState::Cancelled;
            return true;
        }
        false
    }

    fn poll_event(&mut self, timeout: Duration) -> Option<TransportEvent> {
        self.events.recv_timeout(timeout).ok()
    }
}

impl Drop for UsbTransport {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        // 关闭队列，让 OUT 工作线程退出
        self.out_queues.clear();
        self.control_queue = None;
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                error!("USB worker thread panicked");
            }
        }
        debug!("USB transport stopped");
    }
}

/// OUT 工作线程：串行执行本端点的传输
fn out_worker(ctx: WorkerContext, queue: Receiver<Job>) {
    while let Ok(Job { id, transfer }) = queue.recv() {
        let cancelled = {
            let mut jobs = ctx.jobs.lock();
            match jobs.get_mut(&id) {
                Some(JobState::Cancelled) => true,
                Some(state) => {
                    *state = JobState::Running;
                    false
                },
                None => true,
            }
        };

        let result = if cancelled {
            Err(TransferError::Cancelled)
        } else if !ctx.running.load(Ordering::Acquire) {
            Err(TransferError::Closed)
        } else {
            execute(&ctx, &transfer)
        };

        ctx.jobs.lock().remove(&id);
        if let Err(e) = &result {
            trace!("Transfer {} failed: {}", id, e);
        }
        if ctx.events.send(TransportEvent::Completed { id, result }).is_err() {
            break;
        }
    }
}

fn execute(ctx: &WorkerContext, transfer: &OutTransfer) -> Result<(), TransferError> {
    match transfer {
        OutTransfer::Interrupt { endpoint, data } => {
            let written = ctx.device.write_interrupt(endpoint.address(), data, ctx.timeout)?;
            if written != data.len() {
                return Err(TransferError::Io(format!(
                    "short write: {} of {} bytes",
                    written,
                    data.len()
                )));
            }
            Ok(())
        },
        OutTransfer::Control {
            request,
            value,
            data,
        } => Ok(ctx.device.control_out(*request, *value, data, ctx.timeout)?),
    }
}

/// IN 读取线程：持续读取直到退出或设备断开
fn in_reader(ctx: WorkerContext, endpoint: InEndpoint) {
    let mut buf = vec![0u8; endpoint.max_packet()];
    while ctx.running.load(Ordering::Acquire) {
        let event = match ctx
            .device
            .read(endpoint.address(), endpoint.is_bulk(), &mut buf, ctx.timeout)
        {
            Ok(len) => TransportEvent::Received {
                endpoint,
                data: Bytes::copy_from_slice(&buf[..len]),
            },
            Err(rusb::Error::Timeout) => continue,
            Err(e) => {
                let error = TransferError::from(e);
                warn!("Read from {:?} failed: {}", endpoint, error);
                let fatal = error.is_fatal();
                let _ = ctx.events.send(TransportEvent::ReceiveFailed { endpoint, error });
                if fatal {
                    break;
                }
                continue;
            },
        };

        if ctx.events.send(event).is_err() {
            break;
        }
    }
    trace!("Reader for {:?} exiting", endpoint);
}
