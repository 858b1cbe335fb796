//! Mock 传输后端（无硬件依赖）
//!
//! 记录所有提交的传输，由测试代码决定何时、以何种结果完成它们，
//! 以及向 IN 端点注入数据。`poll_event` 不会阻塞。

use crate::{InEndpoint, OutEndpoint, OutTransfer, TransferError, TransferId, Transport, TransportEvent};
use bytes::Bytes;
use std::collections::VecDeque;
use std::time::Duration;

/// 一次提交记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub id: TransferId,
    pub transfer: OutTransfer,
}

impl Submission {
    pub fn endpoint(&self) -> Option<OutEndpoint> {
        self.transfer.endpoint()
    }

    pub fn data(&self) -> &Bytes {
        self.transfer.data()
    }
}

/// Mock 传输后端
#[derive(Debug, Default)]
pub struct MockTransport {
    submissions: Vec<Submission>,
    in_flight: Vec<Submission>,
    events: VecDeque<TransportEvent>,
    fail_next_submit: Option<TransferError>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// 全部提交记录（按提交顺序）
    pub fn submissions(&self) -> &[Submission] {
        &self.submissions
    }

    /// 发往某个端点的提交记录
    pub fn submissions_to(&self, endpoint: OutEndpoint) -> Vec<&Submission> {
        self.submissions
            .iter()
            .filter(|s| s.endpoint() == Some(endpoint))
            .collect()
    }

    /// 发往某个端点的最后一次提交
    pub fn last_submission(&self, endpoint: OutEndpoint) -> Option<&Submission> {
        self.submissions
            .iter()
            .rev()
            .find(|s| s.endpoint() == Some(endpoint))
    }

    /// 控制请求提交记录
    pub fn control_submissions(&self) -> Vec<&Submission> {
        self.submissions
            .iter()
            .filter(|s| s.endpoint().is_none())
            .collect()
    }

    /// 清空提交记录（在途状态不变）
    pub fn clear_submissions(&mut self) {
        self.submissions.clear();
    }

    /// 某个端点当前在途的传输（按提交顺序）
    pub fn in_flight(&self, endpoint: OutEndpoint) -> Vec<TransferId> {
        self.in_flight
            .iter()
            .filter(|s| s.endpoint() == Some(endpoint))
            .map(|s| s.id)
            .collect()
    }

    /// 在途控制请求
    pub fn in_flight_control(&self) -> Vec<TransferId> {
        self.in_flight
            .iter()
            .filter(|s| s.endpoint().is_none())
            .map(|s| s.id)
            .collect()
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// 完成一个在途传输，返回 false 表示该传输不在途
    pub fn complete(&mut self, id: TransferId, result: Result<(), TransferError>) -> bool {
        match self.in_flight.iter().position(|s| s.id == id) {
            Some(pos) => {
                self.in_flight.remove(pos);
                self.events.push_back(TransportEvent::Completed { id, result });
                true
            },
            None => false,
        }
    }

    /// 完成某个端点最早的在途传输
    pub fn complete_next(
        &mut self,
        endpoint: OutEndpoint,
        result: Result<(), TransferError>,
    ) -> Option<TransferId> {
        let id = self.in_flight(endpoint).first().copied()?;
        self.complete(id, result);
        Some(id)
    }

    /// 完成最早的在途控制请求
    pub fn complete_next_control(&mut self, result: Result<(), TransferError>) -> Option<TransferId> {
        let id = self.in_flight_control().first().copied()?;
        self.complete(id, result);
        Some(id)
    }

    /// 以相同结果完成全部在途传输
    pub fn complete_all(&mut self, result: Result<(), TransferError>) -> usize {
        let ids: Vec<TransferId> = self.in_flight.iter().map(|s| s.id).collect();
        for id in &ids {
            self.complete(*id, result.clone());
        }
        ids.len()
    }

    /// 向 IN 端点注入数据
    pub fn inject(&mut self, endpoint: InEndpoint, data: impl Into<Bytes>) {
        self.events.push_back(TransportEvent::Received {
            endpoint,
            data: data.into(),
        });
    }

    /// 注入 IN 端点读取错误
    pub fn inject_receive_error(&mut self, endpoint: InEndpoint, error: TransferError) {
        self.events
            .push_back(TransportEvent::ReceiveFailed { endpoint, error });
    }

    /// 让下一次 `submit` 同步失败
    pub fn fail_next_submit(&mut self, error: TransferError) {
        self.fail_next_submit = Some(error);
    }

    /// 尚未被取走的事件数量
    pub fn pending_events(&self) -> usize {
        self.events.len()
    }
}

impl Transport for MockTransport {
    fn submit(&mut self, id: TransferId, transfer: OutTransfer) -> Result<(), TransferError> {
        if let Some(e) = self.fail_next_submit.take() {
            return Err(e);
        }
        if self.in_flight.iter().any(|s| s.id == id) {
            return Err(TransferError::AlreadySubmitted);
        }
        let submission = Submission { id, transfer };
        self.submissions.push(submission.clone());
        self.in_flight.push(submission);
        Ok(())
    }

    fn cancel(&mut self, id: TransferId) -> bool {
        self.complete(id, Err(TransferError::Cancelled))
    }

    fn poll_event(&mut self, _timeout: Duration) -> Option<TransportEvent> {
        self.events.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn interrupt(endpoint: OutEndpoint, byte: u8) -> OutTransfer {
        OutTransfer::Interrupt {
            endpoint,
            data: Bytes::copy_from_slice(&[byte]),
        }
    }

    #[test]
    fn test_submit_and_complete() {
        let mut mock = MockTransport::new();
        mock.submit(TransferId(1), interrupt(OutEndpoint::Drive, 1))
            .unwrap();
        mock.submit(TransferId(2), interrupt(OutEndpoint::Unreliable, 2))
            .unwrap();
        assert_eq!(mock.in_flight(OutEndpoint::Drive), vec![TransferId(1)]);
        assert_eq!(mock.in_flight_count(), 2);

        assert_eq!(
            mock.complete_next(OutEndpoint::Drive, Ok(())),
            Some(TransferId(1))
        );
        assert_eq!(
            mock.poll_event(Duration::ZERO),
            Some(TransportEvent::Completed {
                id: TransferId(1),
                result: Ok(())
            })
        );
        assert!(mock.poll_event(Duration::ZERO).is_none());
        assert!(!mock.complete(TransferId(1), Ok(())));
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let mut mock = MockTransport::new();
        mock.submit(TransferId(7), interrupt(OutEndpoint::Reliable, 0))
            .unwrap();
        assert_eq!(
            mock.submit(TransferId(7), interrupt(OutEndpoint::Reliable, 0)),
            Err(TransferError::AlreadySubmitted)
        );
    }

    #[test]
    fn test_cancel_completes_with_cancelled() {
        let mut mock = MockTransport::new();
        mock.submit(TransferId(3), interrupt(OutEndpoint::Unreliable, 0))
            .unwrap();
        assert!(mock.cancel(TransferId(3)));
        assert!(!mock.cancel(TransferId(3)));
        assert_eq!(
            mock.poll_event(Duration::ZERO),
            Some(TransportEvent::Completed {
                id: TransferId(3),
                result: Err(TransferError::Cancelled)
            })
        );
    }

    #[test]
    fn test_fail_next_submit() {
        let mut mock = MockTransport::new();
        mock.fail_next_submit(TransferError::NoDevice);
        assert_eq!(
            mock.submit(TransferId(1), interrupt(OutEndpoint::Drive, 0)),
            Err(TransferError::NoDevice)
        );
        assert!(mock.submissions().is_empty());
        assert!(
            mock.submit(TransferId(1), interrupt(OutEndpoint::Drive, 0))
                .is_ok()
        );
    }

    #[test]
    fn test_inject() {
        let mut mock = MockTransport::new();
        mock.inject(InEndpoint::Status, vec![1u8]);
        assert_eq!(
            mock.poll_event(Duration::ZERO),
            Some(TransportEvent::Received {
                endpoint: InEndpoint::Status,
                data: Bytes::from_static(&[1])
            })
        );
    }
}
