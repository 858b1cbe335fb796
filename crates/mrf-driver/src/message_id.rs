//! 可靠消息 ID 池
//!
//! 256 个一字节 ID，FIFO 分配，刚释放的 ID 排到队尾，
//! 尽量推迟复用，降低迟到报告误投的概率。

use crate::error::MessageIdError;
use mrf_protocol::MessageId;
use std::collections::VecDeque;
use tracing::error;

const POOL_SIZE: usize = 256;

/// 消息 ID 池
#[derive(Debug)]
pub struct MessageIdPool {
    free: VecDeque<u8>,
    allocated: [bool; POOL_SIZE],
}

impl Default for MessageIdPool {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageIdPool {
    /// 创建满的 ID 池（0..=255 依次排队）
    pub fn new() -> Self {
        Self {
            free: (0..=u8::MAX).collect(),
            allocated: [false; POOL_SIZE],
        }
    }

    /// 分配一个 ID，池空时返回 [`MessageIdError::Exhausted`]
    pub fn allocate(&mut self) -> Result<MessageId, MessageIdError> {
        let id = self.free.pop_front().ok_or(MessageIdError::Exhausted)?;
        self.allocated[id as usize] = true;
        Ok(MessageId(id))
    }

    /// 归还 ID
    ///
    /// 重复释放是调用方的 bug：记录错误并拒绝，不会让同一个 ID 在池中出现两次。
    pub fn release(&mut self, id: MessageId) -> Result<(), MessageIdError> {
        let slot = &mut self.allocated[id.get() as usize];
        if !*slot {
            error!("Message ID {} released twice", id);
            return Err(MessageIdError::NotAllocated(id.get()));
        }
        *slot = false;
        self.free.push_back(id.get());
        Ok(())
    }

    /// 可用 ID 数量
    pub fn available(&self) -> usize {
        self.free.len()
    }

    pub fn is_allocated(&self, id: MessageId) -> bool {
        self.allocated[id.get() as usize]
    }
}
