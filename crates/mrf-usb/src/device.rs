//! dongle 设备操作
//!
//! 负责设备扫描、无线参数配置和原始 USB 读写。
//! 配置完成后 `MrfDevice` 以 `Arc` 共享给各工作线程，
//! 依赖 `rusb::DeviceHandle` 的 `Sync` 特性并发访问不同端点。

use crate::error::UsbError;
use mrf_protocol::{DONGLE_PID, DONGLE_VID, RadioConfig};
use rusb::{DeviceHandle, Direction, GlobalContext, Recipient, RequestType};
use std::time::Duration;
use tracing::{debug, info, trace};

const INTERFACE: u8 = 0;
const CONFIG_SETUP: u8 = 1;
const CONFIG_RADIO: u8 = 2;
const CONTROL_TIMEOUT: Duration = Duration::from_millis(1000);

/// dongle 设备句柄
pub struct MrfDevice {
    handle: DeviceHandle<GlobalContext>,
    serial_number: Option<String>,
    interface_claimed: bool,
}

impl MrfDevice {
    /// 打开 dongle，可选地按序列号过滤
    ///
    /// 序列号匹配大小写敏感；提供过滤器时，读不到序列号的设备被跳过。
    pub fn open(serial_number_filter: Option<&str>) -> Result<Self, UsbError> {
        for device in rusb::devices()?.iter() {
            let desc = match device.device_descriptor() {
                Ok(desc) => desc,
                Err(_) => continue,
            };
            if desc.vendor_id() != DONGLE_VID || desc.product_id() != DONGLE_PID {
                continue;
            }

            let handle = match device.open() {
                Ok(handle) => handle,
                Err(e) => {
                    debug!("Skipping dongle that failed to open: {}", e);
                    continue;
                },
            };

            let serial_number = match desc.serial_number_string_index() {
                Some(idx) if idx != 0 => handle.read_string_descriptor_ascii(idx).ok(),
                _ => None,
            };

            if let Some(filter) = serial_number_filter
                && serial_number.as_deref() != Some(filter)
            {
                continue;
            }

            info!("Opened dongle (serial {:?})", serial_number);
            return Ok(Self {
                handle,
                serial_number,
                interface_claimed: false,
            });
        }

        Err(UsbError::DeviceNotFound {
            vid: DONGLE_VID,
            pid: DONGLE_PID,
            serial: serial_number_filter.map(str::to_string),
        })
    }

    /// 获取设备序列号
    pub fn serial_number(&self) -> Option<&str> {
        self.serial_number.as_deref()
    }

    /// 写入无线参数并进入收发配置
    ///
    /// 顺序：配置 1 → claim → 信道/符号率/PAN/MAC → release → 配置 2 → claim。
    pub fn configure_radio(&mut self, radio: &RadioConfig) -> Result<(), UsbError> {
        let requests = radio.control_requests()?;

        self.release_interface();
        self.handle.set_active_configuration(CONFIG_SETUP)?;
        self.claim_interface()?;

        for (request, value, data) in requests {
            self.control_out(request.into(), value, &data, CONTROL_TIMEOUT)
                .map_err(|source| UsbError::ControlTransfer {
                    request: request.into(),
                    source,
                })?;
        }

        self.release_interface();
        self.handle.set_active_configuration(CONFIG_RADIO)?;
        self.claim_interface()?;

        info!(
            "Radio configured: channel {}, {} kb/s, PAN 0x{:04X}",
            radio.channel, radio.symbol_rate, radio.pan_id
        );
        Ok(())
    }

    fn claim_interface(&mut self) -> Result<(), UsbError> {
        if self.interface_claimed {
            return Ok(());
        }

        #[cfg(any(target_os = "linux", target_os = "macos"))]
        {
            if self.handle.kernel_driver_active(INTERFACE).unwrap_or(false) {
                self.handle.detach_kernel_driver(INTERFACE)?;
            }
        }

        self.handle.claim_interface(INTERFACE)?;
        self.interface_claimed = true;
        Ok(())
    }

    /// 释放接口（交还给操作系统）
    fn release_interface(&mut self) {
        if self.interface_claimed {
            let _ = self.handle.release_interface(INTERFACE);
            self.interface_claimed = false;
            trace!("USB interface released");
        }
    }

    /// interrupt OUT 写入
    pub fn write_interrupt(
        &self,
        endpoint: u8,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize, rusb::Error> {
        self.handle.write_interrupt(endpoint, data, timeout)
    }

    /// IN 读取（按端点类型选择 bulk 或 interrupt）
    pub fn read(
        &self,
        endpoint: u8,
        bulk: bool,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, rusb::Error> {
        if bulk {
            self.handle.read_bulk(endpoint, buf, timeout)
        } else {
            self.handle.read_interrupt(endpoint, buf, timeout)
        }
    }

    /// 厂商控制 OUT 请求
    pub fn control_out(
        &self,
        request: u8,
        value: u16,
        data: &[u8],
        timeout: Duration,
    ) -> Result<(), rusb::Error> {
        let request_type = rusb::request_type(Direction::Out, RequestType::Vendor, Recipient::Device);
        self.handle
            .write_control(request_type, request, value, 0, data, timeout)?;
        Ok(())
    }
}

impl Drop for MrfDevice {
    fn drop(&mut self) {
        self.release_interface();
        // 回到配置 1，让下次打开时重新写入无线参数
        if let Err(e) = self.handle.set_active_configuration(CONFIG_SETUP) {
            trace!("Failed to restore configuration 1: {}", e);
        }
    }
}
