//! 固件烧写流程
//!
//! 严格按顺序推进，上一步的可靠消息成功后才发下一步：
//!
//! 1. 整片擦除
//! 2. 每个 256 字节页：分块（≤60 字节）填充页缓冲区，再带页 CRC 编程
//! 3. 每个 16 KiB 块：请求块 CRC，与本地 CRC16/XMODEM 比较
//! 4. 读运行参数，改写 `flash_contents` 后写回并提交
//! 5. 重启
//!
//! 任何一步失败都终止整个流程，错误中带有失败的步骤。`step` 从不阻塞，
//! 调用方在两次 `step` 之间驱动 `Dongle::poll`。

use crate::dongle::Dongle;
use crate::error::UploadError;
use crate::reliable::ReliableOperation;
use mrf_protocol::{
    BlockCrcResponse, CRC_BLOCK_SIZE, FILL_CHUNK_SIZE, FirmwareRequest, FlashContents,
    OPERATIONAL_PARAMETERS_LEN, OperationalParameters, PAGE_SIZE, ProtocolError, RobotIndex,
    crc16,
};
use mrf_usb::Transport;
use std::fmt;
use tracing::{debug, info};

/// 24 位 Flash 地址空间
pub const MAX_IMAGE_SIZE: usize = 1 << 24;

/// 烧写目标，决定启动时加载的 Flash 内容
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirmwareTarget {
    Fpga,
    Pic,
}

impl FirmwareTarget {
    pub fn flash_contents(self) -> FlashContents {
        match self {
            FirmwareTarget::Fpga => FlashContents::Fpga,
            FirmwareTarget::Pic => FlashContents::Pic,
        }
    }
}

/// 烧写步骤
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStep {
    ChipErase,
    FillPage { page: u16, offset: u8 },
    ProgramPage { page: u16 },
    BlockCrc { block: usize },
    ReadParameters,
    WriteParameters,
    CommitParameters,
    Reboot,
}

impl fmt::Display for UploadStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadStep::ChipErase => write!(f, "chip erase"),
            UploadStep::FillPage { page, offset } => {
                write!(f, "page {} fill at offset {}", page, offset)
            },
            UploadStep::ProgramPage { page } => write!(f, "page {} program", page),
            UploadStep::BlockCrc { block } => write!(f, "block {} CRC check", block),
            UploadStep::ReadParameters => write!(f, "read operational parameters"),
            UploadStep::WriteParameters => write!(f, "write operational parameters"),
            UploadStep::CommitParameters => write!(f, "commit operational parameters"),
            UploadStep::Reboot => write!(f, "reboot"),
        }
    }
}

impl UploadStep {
    /// 需要等待固件应答的步骤对应的请求码
    fn response_code(self) -> Option<u8> {
        match self {
            UploadStep::BlockCrc { .. } => Some(FirmwareRequest::BlockCrc.into()),
            UploadStep::ReadParameters => Some(FirmwareRequest::ReadOperationalParameters.into()),
            _ => None,
        }
    }
}

/// `step` 的返回值
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadProgress {
    /// 当前步骤仍在进行
    Waiting(UploadStep),
    /// 该步骤刚刚完成
    Advanced(UploadStep),
    /// 全部完成
    Done,
}

/// 固件烧写状态机
#[derive(Debug)]
pub struct FirmwareUpload {
    robot: RobotIndex,
    target: FirmwareTarget,
    image: Vec<u8>,
    /// 补齐前的镜像长度
    image_len: usize,
    current: Option<UploadStep>,
    pending: Option<ReliableOperation>,
    awaiting_response: bool,
    params: Option<OperationalParameters>,
    failed: Option<UploadError>,
}

impl FirmwareUpload {
    /// 准备烧写，镜像按页补齐 0xFF
    pub fn new(
        robot: RobotIndex,
        image: &[u8],
        target: FirmwareTarget,
    ) -> Result<Self, UploadError> {
        if image.is_empty() {
            return Err(UploadError::EmptyImage);
        }
        if image.len() > MAX_IMAGE_SIZE {
            return Err(UploadError::ImageTooLarge {
                len: image.len(),
                max: MAX_IMAGE_SIZE,
            });
        }
        let mut padded = image.to_vec();
        padded.resize(image.len().div_ceil(PAGE_SIZE) * PAGE_SIZE, 0xFF);

        Ok(Self {
            robot,
            target,
            image: padded,
            image_len: image.len(),
            current: Some(UploadStep::ChipErase),
            pending: None,
            awaiting_response: false,
            params: None,
            failed: None,
        })
    }

    pub fn robot(&self) -> RobotIndex {
        self.robot
    }

    pub fn total_pages(&self) -> usize {
        self.image.len() / PAGE_SIZE
    }

    pub fn total_blocks(&self) -> usize {
        self.image_len.div_ceil(CRC_BLOCK_SIZE)
    }

    /// 当前步骤，完成后为 None
    pub fn current_step(&self) -> Option<UploadStep> {
        self.current
    }

    pub fn is_done(&self) -> bool {
        self.current.is_none() && self.failed.is_none()
    }

    /// 推进一次，不阻塞
    pub fn step<T: Transport>(
        &mut self,
        dongle: &mut Dongle<T>,
    ) -> Result<UploadProgress, UploadError> {
        if let Some(err) = &self.failed {
            return Err(err.clone());
        }
        let result = self.step_inner(dongle);
        if let Err(e) = &result {
            self.failed = Some(e.clone());
            self.pending = None;
        }
        result
    }

    fn step_inner<T: Transport>(
        &mut self,
        dongle: &mut Dongle<T>,
    ) -> Result<UploadProgress, UploadError> {
        let Some(step) = self.current else {
            return Ok(UploadProgress::Done);
        };

        if let Some(op) = self.pending.as_mut() {
            let Some(outcome) = op.poll().cloned() else {
                return Ok(UploadProgress::Waiting(step));
            };
            self.pending = None;
            if let Err(source) = outcome {
                return Err(UploadError::Step { step, source });
            }
            if step.response_code().is_none() {
                self.advance(step);
                return Ok(UploadProgress::Advanced(step));
            }
            self.awaiting_response = true;
        }

        if self.awaiting_response {
            let Some(code) = step.response_code() else {
                self.awaiting_response = false;
                return Ok(UploadProgress::Waiting(step));
            };
            let Some(payload) = dongle.take_firmware_response(self.robot, code) else {
                return Ok(UploadProgress::Waiting(step));
            };
            self.awaiting_response = false;
            self.handle_response(step, &payload)?;
            self.advance(step);
            return Ok(UploadProgress::Advanced(step));
        }

        if let Some(code) = step.response_code() {
            dongle.discard_firmware_responses(self.robot, code);
        }
        let op = self
            .issue(dongle, step)
            .map_err(|source| UploadError::Start { step, source })?;
        debug!("Robot {} upload: {} started", self.robot, step);
        self.pending = Some(op);
        Ok(UploadProgress::Waiting(step))
    }

    fn issue<T: Transport>(
        &self,
        dongle: &mut Dongle<T>,
        step: UploadStep,
    ) -> Result<ReliableOperation, crate::error::DriverError> {
        let mut robot = dongle.robot(self.robot);
        match step {
            UploadStep::ChipErase => robot.spi_chip_erase(),
            UploadStep::FillPage { page, offset } => {
                let start = page as usize * PAGE_SIZE + offset as usize;
                let end = (start + FILL_CHUNK_SIZE).min((page as usize + 1) * PAGE_SIZE);
                robot.spi_fill_page_buffer(offset, &self.image[start..end])
            },
            UploadStep::ProgramPage { page } => {
                robot.spi_page_program(page, crc16(self.page(page)))
            },
            UploadStep::BlockCrc { block } => {
                let (address, data) = self.block(block);
                robot.spi_block_crc(address as u32, data.len() as u16)
            },
            UploadStep::ReadParameters => robot.read_operational_parameters(),
            UploadStep::WriteParameters => {
                let params = self.params.ok_or(ProtocolError::InvalidLength {
                    expected: OPERATIONAL_PARAMETERS_LEN,
                    actual: 0,
                })?;
                robot.write_operational_parameters(&params)
            },
            UploadStep::CommitParameters => robot.commit_operational_parameters(),
            UploadStep::Reboot => robot.reboot(),
        }
    }

    fn handle_response(&mut self, step: UploadStep, payload: &[u8]) -> Result<(), UploadError> {
        match step {
            UploadStep::BlockCrc { block } => {
                let response = BlockCrcResponse::parse(payload)
                    .map_err(|source| UploadError::BadResponse { step, source })?;
                let expected = crc16(self.block(block).1);
                if response.crc != expected {
                    return Err(UploadError::CrcMismatch {
                        block,
                        expected,
                        actual: response.crc,
                    });
                }
                info!("Robot {} block {} verified", self.robot, block);
            },
            UploadStep::ReadParameters => {
                let mut params = OperationalParameters::parse(payload)
                    .map_err(|source| UploadError::BadResponse { step, source })?;
                params.flash_contents = self.target.flash_contents();
                self.params = Some(params);
            },
            _ => {},
        }
        Ok(())
    }

    fn page(&self, page: u16) -> &[u8] {
        let start = page as usize * PAGE_SIZE;
        &self.image[start..start + PAGE_SIZE]
    }

    /// 块 CRC 只覆盖镜像实际内容，不含末尾补齐
    fn block(&self, block: usize) -> (usize, &[u8]) {
        let start = block * CRC_BLOCK_SIZE;
        let end = (start + CRC_BLOCK_SIZE).min(self.image_len);
        (start, &self.image[start..end])
    }

    fn advance(&mut self, step: UploadStep) {
        let pages = self.total_pages();
        self.current = match step {
            UploadStep::ChipErase => Some(UploadStep::FillPage { page: 0, offset: 0 }),
            UploadStep::FillPage { page, offset } => {
                let next = offset as usize + FILL_CHUNK_SIZE;
                if next < PAGE_SIZE {
                    Some(UploadStep::FillPage {
                        page,
                        offset: next as u8,
                    })
                } else {
                    Some(UploadStep::ProgramPage { page })
                }
            },
            UploadStep::ProgramPage { page } => {
                if (page as usize) + 1 < pages {
                    Some(UploadStep::FillPage {
                        page: page + 1,
                        offset: 0,
                    })
                } else {
                    Some(UploadStep::BlockCrc { block: 0 })
                }
            },
            UploadStep::BlockCrc { block } => {
                if block + 1 < self.total_blocks() {
                    Some(UploadStep::BlockCrc { block: block + 1 })
                } else {
                    Some(UploadStep::ReadParameters)
                }
            },
            UploadStep::ReadParameters => Some(UploadStep::WriteParameters),
            UploadStep::WriteParameters => Some(UploadStep::CommitParameters),
            UploadStep::CommitParameters => Some(UploadStep::Reboot),
            UploadStep::Reboot => {
                info!("Robot {} upload complete", self.robot);
                None
            },
        };
    }
}
