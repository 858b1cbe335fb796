//! 单个机器人的命令接口
//!
//! 战术代码通过它控制机器人：
//! - 驱动、盘带、充电器：只改驱动表，不等待 IO
//! - 踢球：走非可靠通道，丢失时下一周期再发
//! - 固件操作：每个调用返回一个可靠操作句柄，由调用方按顺序推进
//!
//! `Robot` 可变借用 `Dongle`，同一时刻每个索引只有一个命令入口。

use crate::dongle::Dongle;
use crate::error::DriverError;
use crate::reliable::ReliableOperation;
use crate::telemetry::Telemetry;
use mrf_protocol::{
    ChargerState, FirmwareRequest, KickCommand, OperationalParameters, RobotIndex, WHEEL_LIMIT,
    build_ids_request_payload,
};
use mrf_usb::Transport;
use tracing::warn;

/// 机器人命令接口
pub struct Robot<'a, T: Transport> {
    dongle: &'a mut Dongle<T>,
    index: RobotIndex,
}

impl<'a, T: Transport> Robot<'a, T> {
    pub(crate) fn new(dongle: &'a mut Dongle<T>, index: RobotIndex) -> Self {
        Self { dongle, index }
    }

    pub fn index(&self) -> RobotIndex {
        self.index
    }

    /// 设置四个轮子的设定值
    ///
    /// 超出 ±1023 的值被饱和并告警，调用本身不会失败。
    pub fn drive(&mut self, wheels: [i32; 4], controlled: bool) {
        let limit = WHEEL_LIMIT as i32;
        let mut clamped = [0i16; 4];
        for (slot, &wheel) in clamped.iter_mut().zip(wheels.iter()) {
            if !(-limit..=limit).contains(&wheel) {
                warn!(
                    "Robot {} wheel setpoint {} out of range, clamping to ±{}",
                    self.index, wheel, limit
                );
            }
            *slot = wheel.clamp(-limit, limit) as i16;
        }
        self.dongle.mutate_drive(self.index, |word| {
            word.present = true;
            word.controlled = controlled;
            word.wheels = clamped;
        });
    }

    /// 停止驱动（电机断电，不再受控）
    pub fn disable_drive(&mut self) {
        self.dongle.mutate_drive(self.index, |word| {
            word.present = false;
            word.controlled = false;
            word.wheels = [0; 4];
        });
    }

    pub fn dribble(&mut self, active: bool) {
        self.dongle
            .mutate_drive(self.index, |word| word.dribbler = active);
    }

    pub fn set_charger_state(&mut self, state: ChargerState) {
        self.dongle
            .mutate_drive(self.index, |word| word.charger = state);
    }

    /// 立即踢球
    pub fn kick(&mut self, chip: bool, pulse_width: u16) -> Result<(), DriverError> {
        self.send_kick(KickCommand::Kick { chip, pulse_width })
    }

    /// 自动踢球，`pulse_width == 0` 关闭
    pub fn autokick(&mut self, chip: bool, pulse_width: u16) -> Result<(), DriverError> {
        self.send_kick(KickCommand::Autokick { chip, pulse_width })
    }

    fn send_kick(&mut self, command: KickCommand) -> Result<(), DriverError> {
        self.dongle.send_unreliable(self.index, &command.payload())
    }

    /// 立即请求构建 ID（不受自动请求节流限制）
    pub fn request_build_ids(&mut self) -> Result<(), DriverError> {
        self.dongle
            .send_unreliable(self.index, &build_ids_request_payload())
    }

    pub fn spi_chip_erase(&mut self) -> Result<ReliableOperation, DriverError> {
        self.reliable(&FirmwareRequest::chip_erase())
    }

    /// 向页缓冲区 `offset` 处写入最多 60 字节
    pub fn spi_fill_page_buffer(
        &mut self,
        offset: u8,
        data: &[u8],
    ) -> Result<ReliableOperation, DriverError> {
        let payload = FirmwareRequest::fill_page_buffer(offset, data)?;
        self.reliable(&payload)
    }

    /// 把页缓冲区写入 `page`，机器人用 `crc` 校验缓冲区内容
    pub fn spi_page_program(
        &mut self,
        page: u16,
        crc: u16,
    ) -> Result<ReliableOperation, DriverError> {
        self.reliable(&FirmwareRequest::page_program(page, crc))
    }

    /// 请求计算一段 Flash 的 CRC，结果以固件应答返回
    pub fn spi_block_crc(
        &mut self,
        address: u32,
        length: u16,
    ) -> Result<ReliableOperation, DriverError> {
        let payload = FirmwareRequest::block_crc(address, length)?;
        self.reliable(&payload)
    }

    pub fn read_operational_parameters(&mut self) -> Result<ReliableOperation, DriverError> {
        self.reliable(&FirmwareRequest::read_operational_parameters())
    }

    pub fn write_operational_parameters(
        &mut self,
        params: &OperationalParameters,
    ) -> Result<ReliableOperation, DriverError> {
        self.reliable(&FirmwareRequest::write_operational_parameters(params))
    }

    pub fn commit_operational_parameters(&mut self) -> Result<ReliableOperation, DriverError> {
        self.reliable(&FirmwareRequest::commit_operational_parameters())
    }

    pub fn reboot(&mut self) -> Result<ReliableOperation, DriverError> {
        self.reliable(&FirmwareRequest::reboot())
    }

    fn reliable(&mut self, payload: &[u8]) -> Result<ReliableOperation, DriverError> {
        self.dongle.send_reliable(self.index, payload)
    }

    /// 遥测（只读）
    pub fn telemetry(&self) -> &Telemetry {
        self.dongle.telemetry(self.index)
    }
}
