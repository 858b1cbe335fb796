//! 固件烧写请求
//!
//! 所有请求通过可靠通道发送，负载首字节为请求码。
//! 需要数据应答的请求（块 CRC、读运行参数）由机器人以 0x03 上行消息回复。

use crate::{ProtocolError, u16_from_le};
use bytes::{BufMut, Bytes, BytesMut};

/// SPI Flash 页大小
pub const PAGE_SIZE: usize = 256;

/// 块 CRC 校验粒度
pub const CRC_BLOCK_SIZE: usize = 16 * 1024;

/// 单次填充页缓冲区的最大数据长度
pub const FILL_CHUNK_SIZE: usize = 60;

/// 运行参数块长度
pub const OPERATIONAL_PARAMETERS_LEN: usize = 5;

/// 块 CRC 应答负载长度（`[addr:3][len:2][crc:2]`）
pub const BLOCK_CRC_RESPONSE_LEN: usize = 7;

const CRC16: crc::Crc<u16> = crc::Crc::<u16>::new(&crc::CRC_16_XMODEM);

/// 计算 CRC16/XMODEM
pub fn crc16(data: &[u8]) -> u16 {
    CRC16.checksum(data)
}

/// 固件请求码
#[derive(Debug, Clone, Copy, PartialEq, Eq, num_enum::TryFromPrimitive, num_enum::IntoPrimitive)]
#[repr(u8)]
pub enum FirmwareRequest {
    Reboot = 0x08,
    ChipErase = 0x10,
    FillPageBuffer = 0x11,
    PageProgram = 0x12,
    BlockCrc = 0x13,
    ReadOperationalParameters = 0x14,
    WriteOperationalParameters = 0x15,
    CommitOperationalParameters = 0x17,
}

impl FirmwareRequest {
    fn bare(self) -> Bytes {
        Bytes::copy_from_slice(&[self.into()])
    }

    /// 整片擦除
    pub fn chip_erase() -> Bytes {
        Self::ChipErase.bare()
    }

    /// 向页缓冲区 `offset` 处写入数据
    pub fn fill_page_buffer(offset: u8, data: &[u8]) -> Result<Bytes, ProtocolError> {
        if data.len() > FILL_CHUNK_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                len: data.len(),
                max: FILL_CHUNK_SIZE,
            });
        }
        if offset as usize + data.len() > PAGE_SIZE {
            return Err(ProtocolError::InvalidValue {
                field: "fill offset".to_string(),
                value: offset as u32,
            });
        }
        let mut buf = BytesMut::with_capacity(2 + data.len());
        buf.put_u8(Self::FillPageBuffer.into());
        buf.put_u8(offset);
        buf.put_slice(data);
        Ok(buf.freeze())
    }

    /// 将页缓冲区写入第 `page` 页，机器人用 `crc` 校验缓冲区内容
    pub fn page_program(page: u16, crc: u16) -> Bytes {
        let mut buf = BytesMut::with_capacity(5);
        buf.put_u8(Self::PageProgram.into());
        buf.put_u16_le(page);
        buf.put_u16_le(crc);
        buf.freeze()
    }

    /// 请求计算 `[address, address + length)` 的 CRC
    pub fn block_crc(address: u32, length: u16) -> Result<Bytes, ProtocolError> {
        if address > 0x00FF_FFFF {
            return Err(ProtocolError::InvalidValue {
                field: "block address".to_string(),
                value: address,
            });
        }
        let mut buf = BytesMut::with_capacity(6);
        buf.put_u8(Self::BlockCrc.into());
        buf.put_slice(&address.to_le_bytes()[..3]);
        buf.put_u16_le(length);
        Ok(buf.freeze())
    }

    pub fn read_operational_parameters() -> Bytes {
        Self::ReadOperationalParameters.bare()
    }

    pub fn write_operational_parameters(params: &OperationalParameters) -> Bytes {
        let mut buf = BytesMut::with_capacity(1 + OPERATIONAL_PARAMETERS_LEN);
        buf.put_u8(Self::WriteOperationalParameters.into());
        buf.put_slice(&params.encode());
        buf.freeze()
    }

    pub fn commit_operational_parameters() -> Bytes {
        Self::CommitOperationalParameters.bare()
    }

    pub fn reboot() -> Bytes {
        Self::Reboot.bare()
    }
}

/// 启动时加载的 Flash 内容
#[derive(Debug, Clone, Copy, PartialEq, Eq, num_enum::TryFromPrimitive, num_enum::IntoPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum FlashContents {
    /// FPGA 比特流
    Fpga = 0,
    /// PIC 固件
    Pic = 1,
    /// 空
    None = 2,
}

/// 机器人运行参数块
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationalParameters {
    pub flash_contents: FlashContents,
    /// 两个无线信道
    pub channels: [u8; 2],
    pub robot_number: u8,
    pub dribble_power: u8,
}

impl OperationalParameters {
    pub fn encode(&self) -> [u8; OPERATIONAL_PARAMETERS_LEN] {
        [
            self.flash_contents.into(),
            self.channels[0],
            self.channels[1],
            self.robot_number,
            self.dribble_power,
        ]
    }

    /// 从读参数应答负载解析
    pub fn parse(payload: &[u8]) -> Result<Self, ProtocolError> {
        if payload.len() != OPERATIONAL_PARAMETERS_LEN {
            return Err(ProtocolError::InvalidLength {
                expected: OPERATIONAL_PARAMETERS_LEN,
                actual: payload.len(),
            });
        }
        let flash_contents =
            FlashContents::try_from(payload[0]).map_err(|_| ProtocolError::InvalidValue {
                field: "flash_contents".to_string(),
                value: payload[0] as u32,
            })?;
        Ok(Self {
            flash_contents,
            channels: [payload[1], payload[2]],
            robot_number: payload[3],
            dribble_power: payload[4],
        })
    }
}

/// 块 CRC 应答
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockCrcResponse {
    pub address: u32,
    pub length: u16,
    pub crc: u16,
}

impl BlockCrcResponse {
    pub fn parse(payload: &[u8]) -> Result<Self, ProtocolError> {
        if payload.len() != BLOCK_CRC_RESPONSE_LEN {
            return Err(ProtocolError::InvalidLength {
                expected: BLOCK_CRC_RESPONSE_LEN,
                actual: payload.len(),
            });
        }
        Ok(Self {
            address: u32::from_le_bytes([payload[0], payload[1], payload[2], 0]),
            length: u16_from_le(&payload[3..5]),
            crc: u16_from_le(&payload[5..7]),
        })
    }
}
