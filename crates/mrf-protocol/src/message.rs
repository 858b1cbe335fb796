//! 出站消息封帧
//!
//! - 非可靠消息：`[robot_index][payload...]`，OUT 端点 3
//! - 可靠消息：`[robot_index][message_id][payload...]`，OUT 端点 2
//!
//! 单次 OUT 传输最大 64 字节。

use crate::{ProtocolError, RobotIndex};
use bytes::{BufMut, Bytes, BytesMut};

/// 单次 OUT 传输的最大字节数
pub const MAX_OUT_TRANSFER: usize = 64;

/// 非可靠消息负载的最大字节数
pub const MAX_UNRELIABLE_PAYLOAD: usize = MAX_OUT_TRANSFER - 1;

/// 可靠消息负载的最大字节数
pub const MAX_RELIABLE_PAYLOAD: usize = MAX_OUT_TRANSFER - 2;

/// 非可靠消息类型字节
pub mod unreliable_code {
    /// 立即踢球
    pub const KICK: u8 = 0x00;
    /// 启用自动踢球
    pub const AUTOKICK: u8 = 0x01;
    /// 关闭自动踢球
    pub const AUTOKICK_DISABLE: u8 = 0x02;
    /// 请求构建 ID
    pub const REQUEST_BUILD_IDS: u8 = 0x0D;
    /// 相机数据转发
    pub const CAMERA: u8 = 0x20;
}

/// 可靠消息的关联 ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MessageId(pub u8);

impl MessageId {
    pub fn get(self) -> u8 {
        self.0
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// 封装非可靠消息帧
pub fn encode_unreliable(robot: RobotIndex, payload: &[u8]) -> Result<Bytes, ProtocolError> {
    if payload.len() > MAX_UNRELIABLE_PAYLOAD {
        return Err(ProtocolError::PayloadTooLarge {
            len: payload.len(),
            max: MAX_UNRELIABLE_PAYLOAD,
        });
    }
    let mut buf = BytesMut::with_capacity(1 + payload.len());
    buf.put_u8(robot.get());
    buf.put_slice(payload);
    Ok(buf.freeze())
}

/// 封装可靠消息帧
pub fn encode_reliable(
    robot: RobotIndex,
    message_id: MessageId,
    payload: &[u8],
) -> Result<Bytes, ProtocolError> {
    if payload.len() > MAX_RELIABLE_PAYLOAD {
        return Err(ProtocolError::PayloadTooLarge {
            len: payload.len(),
            max: MAX_RELIABLE_PAYLOAD,
        });
    }
    let mut buf = BytesMut::with_capacity(2 + payload.len());
    buf.put_u8(robot.get());
    buf.put_u8(message_id.get());
    buf.put_slice(payload);
    Ok(buf.freeze())
}

/// 踢球指令
///
/// `pulse_width == 0` 的自动踢球表示关闭自动踢球。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KickCommand {
    /// 立即踢球
    Kick { chip: bool, pulse_width: u16 },
    /// 自动踢球（检测到球时触发）
    Autokick { chip: bool, pulse_width: u16 },
}

impl KickCommand {
    /// 编码为非可靠消息负载
    pub fn payload(&self) -> Bytes {
        match *self {
            KickCommand::Kick { chip, pulse_width } => {
                kick_payload(unreliable_code::KICK, chip, pulse_width)
            },
            KickCommand::Autokick { pulse_width: 0, .. } => {
                Bytes::from_static(&[unreliable_code::AUTOKICK_DISABLE])
            },
            KickCommand::Autokick { chip, pulse_width } => {
                kick_payload(unreliable_code::AUTOKICK, chip, pulse_width)
            },
        }
    }
}

fn kick_payload(code: u8, chip: bool, pulse_width: u16) -> Bytes {
    let mut buf = BytesMut::with_capacity(4);
    buf.put_u8(code);
    buf.put_u8(chip as u8);
    buf.put_u16_le(pulse_width);
    buf.freeze()
}

/// 构建 ID 请求负载
pub fn build_ids_request_payload() -> Bytes {
    Bytes::from_static(&[unreliable_code::REQUEST_BUILD_IDS])
}

/// 相机转发数据
///
/// 坐标单位为毫米，朝向单位为毫弧度。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CameraPayload {
    pub x_mm: i16,
    pub y_mm: i16,
    pub theta_mrad: i16,
    /// 球位置，未检测到球时为 None
    pub ball_mm: Option<(i16, i16)>,
}

impl CameraPayload {
    /// 未检测到球时填充的哨兵值
    pub const NO_BALL: i16 = i16::MIN;

    pub fn encode(&self) -> Bytes {
        let (ball_x, ball_y) = self.ball_mm.unwrap_or((Self::NO_BALL, Self::NO_BALL));
        let mut buf = BytesMut::with_capacity(11);
        buf.put_u8(unreliable_code::CAMERA);
        buf.put_i16_le(self.x_mm);
        buf.put_i16_le(self.y_mm);
        buf.put_i16_le(self.theta_mrad);
        buf.put_i16_le(ball_x);
        buf.put_i16_le(ball_y);
        buf.freeze()
    }
}

const MAX_KICK_SPEED: f64 = 8.0;
const MAX_CHIP_DISTANCE: f64 = 2.0;

/// 将踢球力度转换为电磁铁脉冲宽度
///
/// 平踢：`power` 为球速（m/s），限制在 ±8；
/// 挑射：`power` 为落点距离（m），限制在 ±2。
pub fn chicker_power_to_pulse_width(power: f64, chip: bool) -> u16 {
    let power = if power.is_nan() { 0.0 } else { power };
    let width = if chip {
        let p = power.clamp(-MAX_CHIP_DISTANCE, MAX_CHIP_DISTANCE);
        835.0 * p * p + 469.2 * p + 1118.5
    } else {
        let p = power.clamp(-MAX_KICK_SPEED, MAX_KICK_SPEED);
        p * 332.7 + 219.8
    };
    width.clamp(0.0, u16::MAX as f64) as u16
}
