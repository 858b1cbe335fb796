//! 空闲任务调度
//!
//! 事件循环每轮处理完 IO 事件后执行排队的任务。同一个任务在执行前
//! 重复排程只会保留一份。

use std::collections::VecDeque;

/// 延迟执行的任务
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdleTask {
    /// 序列化并提交驱动帧
    SubmitDrive,
}

/// 去重的任务队列
#[derive(Debug, Default)]
pub struct IdleScheduler {
    queue: VecDeque<IdleTask>,
}

impl IdleScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// 排程任务，已在队列中时返回 false
    pub fn schedule(&mut self, task: IdleTask) -> bool {
        if self.queue.contains(&task) {
            return false;
        }
        self.queue.push_back(task);
        true
    }

    /// 取出全部待执行任务
    pub fn take(&mut self) -> Vec<IdleTask> {
        self.queue.drain(..).collect()
    }

    pub fn is_scheduled(&self, task: IdleTask) -> bool {
        self.queue.contains(&task)
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
