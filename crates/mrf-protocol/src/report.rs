//! 消息投递报告（MDR）
//!
//! dongle 通过 IN bulk 端点 1 批量上报可靠消息的投递结果，
//! 每条报告 2 字节：`[message_id][status]`。

use crate::{MessageId, ProtocolError};

/// 投递状态码
#[derive(Debug, Clone, Copy, PartialEq, Eq, num_enum::TryFromPrimitive, num_enum::IntoPrimitive)]
#[repr(u8)]
pub enum DeliveryStatus {
    /// 对方已确认
    Ok = 0x00,
    /// 目标机器人未关联
    NotAssociated = 0x01,
    /// 对方未确认
    NotAcknowledged = 0x02,
    /// 信道始终繁忙
    ClearChannel = 0x03,
}

/// 单条投递报告
///
/// `status` 保留原始字节，未知状态码交给上层决定如何处理。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReport {
    pub message_id: MessageId,
    pub status: u8,
}

impl DeliveryReport {
    /// 已知状态码解析结果，未知返回 None
    pub fn known_status(&self) -> Option<DeliveryStatus> {
        DeliveryStatus::try_from(self.status).ok()
    }
}

/// 解析一次 bulk 传输中的全部报告
///
/// 长度为奇数的帧整体丢弃。
pub fn parse_delivery_reports(data: &[u8]) -> Result<Vec<DeliveryReport>, ProtocolError> {
    if data.len() % 2 != 0 {
        return Err(ProtocolError::InvalidLength {
            expected: data.len() + 1,
            actual: data.len(),
        });
    }
    Ok(data
        .chunks_exact(2)
        .map(|pair| DeliveryReport {
            message_id: MessageId(pair[0]),
            status: pair[1],
        })
        .collect())
}
