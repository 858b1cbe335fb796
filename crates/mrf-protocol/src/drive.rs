//! 驱动帧编码
//!
//! 每个机器人占 4 个 16 位小端字，8 个机器人共 64 字节，一次 OUT 传输发送全部。
//!
//! ```text
//! word0: bit 14 present | bit 13 controlled | bit 12 dribbler | bit 10 sign | bit 0-9 wheel0
//! word1: bit 14-15 charger                                    | bit 10 sign | bit 0-9 wheel1
//! word2:                                                        bit 10 sign | bit 0-9 wheel2
//! word3:                                                        bit 10 sign | bit 0-9 wheel3
//! ```

use crate::{ProtocolError, ROBOT_COUNT, RobotIndex, u16_from_le};
use bytes::{BufMut, Bytes, BytesMut};

/// 轮速设定值的绝对值上限
pub const WHEEL_LIMIT: i16 = 1023;

/// 单个机器人驱动字的字节数
pub const DRIVE_WORD_BYTES: usize = 8;

/// 完整驱动帧的字节数
pub const DRIVE_FRAME_BYTES: usize = DRIVE_WORD_BYTES * ROBOT_COUNT;

const MAGNITUDE_MASK: u16 = 0x03FF;
const SIGN_BIT: u16 = 1 << 10;
const PRESENT_BIT: u16 = 1 << 14;
const CONTROLLED_BIT: u16 = 1 << 13;
const DRIBBLER_BIT: u16 = 1 << 12;
const CHARGER_SHIFT: u16 = 14;

/// 电容充电器状态（2 位）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, num_enum::TryFromPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum ChargerState {
    /// 既不充电也不放电
    #[default]
    Float = 0b00,
    /// 放电
    Discharge = 0b01,
    /// 充电
    Charge = 0b10,
}

/// 单个机器人的驱动字
///
/// 最近一次请求的状态，按字段组"后写覆盖"。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DriveWord {
    /// 机器人受驱动（电机上电）
    pub present: bool,
    /// 闭环控制（false 为滑行/开环）
    pub controlled: bool,
    /// 盘带器开启
    pub dribbler: bool,
    /// 充电器状态
    pub charger: ChargerState,
    /// 四个轮子的设定值，范围 ±1023
    pub wheels: [i16; 4],
}

impl DriveWord {
    /// 编码为 4 个 16 位字
    ///
    /// 超出范围的轮速在这里饱和到 ±1023，保证位域不会溢出到标志位。
    pub fn encode(&self) -> [u16; 4] {
        let mut words = [0u16; 4];
        for (word, &wheel) in words.iter_mut().zip(self.wheels.iter()) {
            let clamped = wheel.clamp(-WHEEL_LIMIT, WHEEL_LIMIT);
            *word = clamped.unsigned_abs() & MAGNITUDE_MASK;
            if clamped < 0 {
                *word |= SIGN_BIT;
            }
        }

        if self.present {
            words[0] |= PRESENT_BIT;
        }
        if self.controlled {
            words[0] |= CONTROLLED_BIT;
        }
        if self.dribbler {
            words[0] |= DRIBBLER_BIT;
        }
        words[1] |= (self.charger as u16) << CHARGER_SHIFT;
        words
    }

    /// 从 4 个 16 位字解码
    pub fn decode(words: [u16; 4]) -> Result<Self, ProtocolError> {
        let mut wheels = [0i16; 4];
        for (wheel, &word) in wheels.iter_mut().zip(words.iter()) {
            let magnitude = (word & MAGNITUDE_MASK) as i16;
            *wheel = if word & SIGN_BIT != 0 {
                -magnitude
            } else {
                magnitude
            };
        }

        let charger_bits = (words[1] >> CHARGER_SHIFT) as u8;
        let charger =
            ChargerState::try_from(charger_bits).map_err(|_| ProtocolError::InvalidValue {
                field: "ChargerState".to_string(),
                value: charger_bits as u32,
            })?;

        Ok(Self {
            present: words[0] & PRESENT_BIT != 0,
            controlled: words[0] & CONTROLLED_BIT != 0,
            dribbler: words[0] & DRIBBLER_BIT != 0,
            charger,
            wheels,
        })
    }
}

/// 8 个机器人的驱动字表
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DriveFrame {
    pub words: [DriveWord; ROBOT_COUNT],
}

impl DriveFrame {
    /// 序列化为 64 字节的 OUT 帧
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(DRIVE_FRAME_BYTES);
        for word in &self.words {
            for w in word.encode() {
                buf.put_u16_le(w);
            }
        }
        buf.freeze()
    }

    /// 从 64 字节的 OUT 帧解析（用于测试和抓包分析）
    pub fn parse(data: &[u8]) -> Result<Self, ProtocolError> {
        if data.len() != DRIVE_FRAME_BYTES {
            return Err(ProtocolError::InvalidLength {
                expected: DRIVE_FRAME_BYTES,
                actual: data.len(),
            });
        }

        let mut frame = DriveFrame::default();
        for (slot, chunk) in frame
            .words
            .iter_mut()
            .zip(data.chunks_exact(DRIVE_WORD_BYTES))
        {
            let words = [
                u16_from_le(&chunk[0..2]),
                u16_from_le(&chunk[2..4]),
                u16_from_le(&chunk[4..6]),
                u16_from_le(&chunk[6..8]),
            ];
            *slot = DriveWord::decode(words)?;
        }
        Ok(frame)
    }

    /// 获取某个机器人的驱动字
    pub fn robot(&self, index: RobotIndex) -> &DriveWord {
        &self.words[index.as_usize()]
    }
}
