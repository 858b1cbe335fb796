//! 单个异步 OUT 传输
//!
//! `AsyncTransfer` 记录一次传输从提交到完成的生命周期，保证：
//! - 只能提交一次
//! - 完成通知只生效一次，重复的完成事件被忽略
//! - 完成后 `result()` 返回成功或捕获的错误

use crate::{OutTransfer, TransferError, TransferId, Transport};
use tracing::trace;

/// 传输状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferState {
    /// 尚未提交
    Idle,
    /// 已提交，等待完成
    Submitted,
    /// 已完成
    Done(Result<(), TransferError>),
}

/// 单个 OUT 传输对象
#[derive(Debug)]
pub struct AsyncTransfer {
    id: TransferId,
    state: TransferState,
}

impl AsyncTransfer {
    /// 创建新的传输对象
    pub fn new(id: TransferId) -> Self {
        Self {
            id,
            state: TransferState::Idle,
        }
    }

    pub fn id(&self) -> TransferId {
        self.id
    }

    pub fn state(&self) -> &TransferState {
        &self.state
    }

    /// 提交到传输后端
    ///
    /// 重复提交返回 [`TransferError::AlreadySubmitted`]。后端同步拒绝时传输
    /// 直接进入完成状态，错误同时返回给调用方。
    pub fn submit<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        transfer: OutTransfer,
    ) -> Result<(), TransferError> {
        if self.state != TransferState::Idle {
            return Err(TransferError::AlreadySubmitted);
        }
        match transport.submit(self.id, transfer) {
            Ok(()) => {
                self.state = TransferState::Submitted;
                trace!("Transfer {} submitted", self.id);
                Ok(())
            },
            Err(e) => {
                self.state = TransferState::Done(Err(e.clone()));
                Err(e)
            },
        }
    }

    /// 记录完成结果，返回 false 表示这是重复的完成通知
    pub fn complete(&mut self, result: Result<(), TransferError>) -> bool {
        match self.state {
            TransferState::Submitted => {
                trace!("Transfer {} completed: {:?}", self.id, result);
                self.state = TransferState::Done(result);
                true
            },
            _ => false,
        }
    }

    pub fn is_submitted(&self) -> bool {
        self.state == TransferState::Submitted
    }

    pub fn is_done(&self) -> bool {
        matches!(self.state, TransferState::Done(_))
    }

    pub fn succeeded(&self) -> bool {
        self.state == TransferState::Done(Ok(()))
    }

    /// 完成结果；未完成时返回 [`TransferError::Incomplete`]
    pub fn result(&self) -> Result<(), TransferError> {
        match &self.state {
            TransferState::Done(result) => result.clone(),
            _ => Err(TransferError::Incomplete),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{OutEndpoint, TransportEvent};
    use bytes::Bytes;
    use std::time::Duration;

    /// 只记录提交次数的最小后端
    struct CountingTransport {
        submitted: usize,
        reject: Option<TransferError>,
    }

    impl Transport for CountingTransport {
        fn submit(&mut self, _id: TransferId, _t: OutTransfer) -> Result<(), TransferError> {
            if let Some(e) = self.reject.take() {
                return Err(e);
            }
            self.submitted += 1;
            Ok(())
        }

        fn cancel(&mut self, _id: TransferId) -> bool {
            false
        }

        fn poll_event(&mut self, _timeout: Duration) -> Option<TransportEvent> {
            None
        }
    }

    fn frame() -> OutTransfer {
        OutTransfer::Interrupt {
            endpoint: OutEndpoint::Drive,
            data: Bytes::from_static(&[0u8; 64]),
        }
    }

    #[test]
    fn test_submit_once() {
        let mut transport = CountingTransport {
            submitted: 0,
            reject: None,
        };
        let mut transfer = AsyncTransfer::new(TransferId(1));
        assert_eq!(transfer.result(), Err(TransferError::Incomplete));

        transfer.submit(&mut transport, frame()).unwrap();
        assert!(transfer.is_submitted());
        assert_eq!(
            transfer.submit(&mut transport, frame()),
            Err(TransferError::AlreadySubmitted)
        );
        assert_eq!(transport.submitted, 1);
    }

    #[test]
    fn test_complete_exactly_once() {
        let mut transport = CountingTransport {
            submitted: 0,
            reject: None,
        };
        let mut transfer = AsyncTransfer::new(TransferId(2));
        transfer.submit(&mut transport, frame()).unwrap();

        assert!(transfer.complete(Err(TransferError::Stall)));
        assert!(!transfer.complete(Ok(())));
        assert_eq!(transfer.result(), Err(TransferError::Stall));
        assert!(!transfer.succeeded());
    }

    #[test]
    fn test_complete_before_submit_ignored() {
        let mut transfer = AsyncTransfer::new(TransferId(3));
        assert!(!transfer.complete(Ok(())));
        assert_eq!(transfer.state(), &TransferState::Idle);
    }

    #[test]
    fn test_synchronous_rejection() {
        let mut transport = CountingTransport {
            submitted: 0,
            reject: Some(TransferError::Busy),
        };
        let mut transfer = AsyncTransfer::new(TransferId(4));
        assert_eq!(
            transfer.submit(&mut transport, frame()),
            Err(TransferError::Busy)
        );
        assert!(transfer.is_done());
        assert_eq!(transfer.result(), Err(TransferError::Busy));
        // 已完成的传输不能再次提交
        assert_eq!(
            transfer.submit(&mut transport, frame()),
            Err(TransferError::AlreadySubmitted)
        );
    }
}
