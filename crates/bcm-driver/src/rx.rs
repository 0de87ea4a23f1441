//! 接收管线（Receive Pipeline）
//!
//! 任意时刻恰好有一个接收操作在途。每次完成后（无论成功、畸形数据报还是
//! 传输错误）都会无条件重新投递下一次接收，直到管线被关闭。
//!
//! ```text
//! Idle ──arm──▶ AwaitingDatagram ──complete──▶ Validating ──arm──▶ AwaitingDatagram
//!                                                  │
//!                                  close ──────────┴──────────▶ Closed
//! ```
//!
//! 校验规则：
//! - 长度不足一个 `bcm_msg_head` 的数据报直接丢弃（记一条警告）
//! - 头部可读但总长度与 `nframes` 推算值不符的数据报丢弃
//! - 只有通过校验的消息才交给 handler

use crate::handler::{BcmHandler, Severity};
use crate::metrics::ConnectorMetrics;
use bcm_protocol::{BCM_HEAD_SIZE, BCM_MAX_MESSAGE_SIZE, codec};
use bcm_socket::DatagramTransport;
use std::io;
use tracing::{error, trace, warn};

/// 接收管线状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReceiveState {
    #[default]
    Idle,
    /// 接收已投递，等待数据报
    AwaitingDatagram,
    /// 正在校验 / 分发刚收到的数据报
    Validating,
    /// 连接器关闭，不再投递接收
    Closed,
}

/// 一次接收完成的处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveOutcome {
    /// 消息已交给 handler
    Dispatched,
    /// 数据报结构校验失败，已丢弃
    Discarded,
    /// 接收系统调用失败
    TransportError,
    /// 管线已关闭，结果被忽略
    Ignored,
}

/// 单缓冲区接收管线
///
/// 缓冲区按最大 BCM 消息（头部 + 256 个 CAN FD 帧）分配，创建后复用。
#[derive(Debug)]
pub struct ReceivePipeline {
    state: ReceiveState,
    buf: Box<[u8]>,
}

impl Default for ReceivePipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl ReceivePipeline {
    pub fn new() -> Self {
        Self {
            state: ReceiveState::Idle,
            buf: vec![0u8; BCM_MAX_MESSAGE_SIZE].into_boxed_slice(),
        }
    }

    pub fn state(&self) -> ReceiveState {
        self.state
    }

    /// 投递下一次接收
    ///
    /// 已关闭的管线保持关闭。
    pub fn arm(&mut self, metrics: &ConnectorMetrics) {
        if self.state == ReceiveState::Closed {
            return;
        }
        self.state = ReceiveState::AwaitingDatagram;
        ConnectorMetrics::incr(&metrics.rx_arms);
    }

    /// 处理一次接收完成，随后重新投递接收
    ///
    /// # 参数
    /// - `result`: 接收系统调用的结果（成功时为数据报长度，数据位于内部缓冲区）
    pub fn complete<H>(
        &mut self,
        result: io::Result<usize>,
        handler: &mut H,
        metrics: &ConnectorMetrics,
    ) -> ReceiveOutcome
    where
        H: BcmHandler + ?Sized,
    {
        if self.state == ReceiveState::Closed {
            return ReceiveOutcome::Ignored;
        }
        self.state = ReceiveState::Validating;

        let outcome = match result {
            Ok(len) => {
                ConnectorMetrics::incr(&metrics.rx_datagrams);
                self.validate_and_dispatch(len, handler, metrics)
            },
            Err(e) => {
                ConnectorMetrics::incr(&metrics.rx_transport_errors);
                error!("BCM receive failed: {}", e);
                handler.on_error(Severity::Error, &format!("BCM receive failed: {}", e));
                ReceiveOutcome::TransportError
            },
        };

        self.arm(metrics);
        outcome
    }

    fn validate_and_dispatch<H>(
        &self,
        len: usize,
        handler: &mut H,
        metrics: &ConnectorMetrics,
    ) -> ReceiveOutcome
    where
        H: BcmHandler + ?Sized,
    {
        let datagram = &self.buf[..len.min(self.buf.len())];

        if datagram.len() < BCM_HEAD_SIZE {
            ConnectorMetrics::incr(&metrics.rx_discarded);
            warn!(
                "Discarding runt BCM datagram: {} bytes (head is {} bytes)",
                datagram.len(),
                BCM_HEAD_SIZE
            );
            handler.on_error(
                Severity::Warning,
                &format!("runt BCM datagram ({} bytes)", datagram.len()),
            );
            return ReceiveOutcome::Discarded;
        }

        match codec::decode(datagram) {
            Ok(message) => {
                ConnectorMetrics::incr(&metrics.rx_dispatched);
                trace!(
                    "{} can_id=0x{:X} nframes={}",
                    message.opcode(),
                    message.can_id(),
                    message.head.nframes
                );
                handler.on_message(&message);
                ReceiveOutcome::Dispatched
            },
            Err(e) => {
                ConnectorMetrics::incr(&metrics.rx_discarded);
                warn!("Discarding malformed BCM datagram ({} bytes): {}", datagram.len(), e);
                handler.on_error(
                    Severity::Warning,
                    &format!("malformed BCM datagram ({} bytes): {}", datagram.len(), e),
                );
                ReceiveOutcome::Discarded
            },
        }
    }

    /// 读出当前可读的全部数据报
    ///
    /// 直到 `WouldBlock` 或一次传输错误为止；返回处理的完成数。
    /// 传输错误后停止本轮读取，下一次唤醒时继续。
    pub fn drain<T, H>(&mut self, transport: &T, handler: &mut H, metrics: &ConnectorMetrics) -> usize
    where
        T: DatagramTransport + ?Sized,
        H: BcmHandler + ?Sized,
    {
        let mut completed = 0;
        while self.state == ReceiveState::AwaitingDatagram {
            let result = match transport.recv(&mut self.buf) {
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                result => result,
            };
            completed += 1;
            if self.complete(result, handler, metrics) == ReceiveOutcome::TransportError {
                break;
            }
        }
        completed
    }

    /// 关闭管线，此后不再投递接收
    pub fn close(&mut self) {
        self.state = ReceiveState::Closed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::SendCompletion;
    use bcm_protocol::{BcmMessage, CanFdFrame, CanFrame, Frame, Opcode};
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::os::fd::{AsRawFd, RawFd};

    /// 按脚本返回数据报的传输层
    struct ScriptedTransport {
        script: RefCell<VecDeque<io::Result<Vec<u8>>>>,
    }

    impl ScriptedTransport {
        fn new(script: Vec<io::Result<Vec<u8>>>) -> Self {
            Self {
                script: RefCell::new(script.into()),
            }
        }
    }

    impl AsRawFd for ScriptedTransport {
        fn as_raw_fd(&self) -> RawFd {
            -1
        }
    }

    impl DatagramTransport for ScriptedTransport {
        fn send(&self, buf: &[u8]) -> io::Result<usize> {
            Ok(buf.len())
        }

        fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
            match self.script.borrow_mut().pop_front() {
                Some(Ok(datagram)) => {
                    buf[..datagram.len()].copy_from_slice(&datagram);
                    Ok(datagram.len())
                },
                Some(Err(e)) => Err(e),
                None => Err(io::ErrorKind::WouldBlock.into()),
            }
        }

        fn set_nonblocking(&self, _nonblocking: bool) -> io::Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingHandler {
        messages: Vec<BcmMessage>,
        warnings: usize,
        errors: usize,
    }

    impl BcmHandler for RecordingHandler {
        fn on_message(&mut self, message: &BcmMessage) {
            self.messages.push(message.clone());
        }

        fn on_send_complete(&mut self, _completion: &SendCompletion) {}

        fn on_error(&mut self, severity: Severity, _message: &str) {
            match severity {
                Severity::Error => self.errors += 1,
                _ => self.warnings += 1,
            }
        }
    }

    fn classic_send(can_id: u32) -> Vec<u8> {
        let frame: Frame = CanFrame::from_raw_id(can_id, &[0x11, 0x22]).unwrap().into();
        codec::encode_send(&frame)
    }

    #[test]
    fn test_arm_from_idle() {
        let metrics = ConnectorMetrics::new();
        let mut rx = ReceivePipeline::new();
        assert_eq!(rx.state(), ReceiveState::Idle);
        rx.arm(&metrics);
        assert_eq!(rx.state(), ReceiveState::AwaitingDatagram);
        assert_eq!(metrics.snapshot().rx_arms, 1);
    }

    #[test]
    fn test_runt_datagram_discarded_and_rearmed_once() {
        let transport = ScriptedTransport::new(vec![Ok(vec![1, 2, 3, 4, 5])]);
        let mut handler = RecordingHandler::default();
        let metrics = ConnectorMetrics::new();
        let mut rx = ReceivePipeline::new();
        rx.arm(&metrics);

        assert_eq!(rx.drain(&transport, &mut handler, &metrics), 1);

        assert!(handler.messages.is_empty());
        assert_eq!(handler.warnings, 1);
        assert_eq!(rx.state(), ReceiveState::AwaitingDatagram);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.rx_discarded, 1);
        // 初次投递 + 完成后恰好一次重新投递
        assert_eq!(snapshot.rx_arms, 2);
    }

    #[test]
    fn test_valid_message_dispatched() {
        let frame: Frame = CanFdFrame::from_raw_id(0x567, &[0xAB; 12]).unwrap().into();
        let transport = ScriptedTransport::new(vec![
            Ok(classic_send(0x123)),
            Ok(codec::encode_send(&frame)),
        ]);
        let mut handler = RecordingHandler::default();
        let metrics = ConnectorMetrics::new();
        let mut rx = ReceivePipeline::new();
        rx.arm(&metrics);

        assert_eq!(rx.drain(&transport, &mut handler, &metrics), 2);

        assert_eq!(handler.messages.len(), 2);
        assert_eq!(handler.messages[0].can_id(), 0x123);
        assert!(!handler.messages[0].is_fd());
        assert_eq!(handler.messages[1].opcode(), Opcode::TxSend);
        assert!(handler.messages[1].is_fd());
        assert_eq!(handler.messages[1].frames.get(0), Some(frame));
        assert_eq!(metrics.snapshot().rx_dispatched, 2);
    }

    #[test]
    fn test_size_mismatch_discarded() {
        let mut datagram = classic_send(0x42);
        datagram.push(0);
        let transport = ScriptedTransport::new(vec![Ok(datagram), Ok(classic_send(0x43))]);
        let mut handler = RecordingHandler::default();
        let metrics = ConnectorMetrics::new();
        let mut rx = ReceivePipeline::new();
        rx.arm(&metrics);

        rx.drain(&transport, &mut handler, &metrics);

        // 畸形数据报不影响后续消息
        assert_eq!(handler.messages.len(), 1);
        assert_eq!(handler.messages[0].can_id(), 0x43);
        assert_eq!(metrics.snapshot().rx_discarded, 1);
    }

    #[test]
    fn test_transport_error_reported_and_rearmed() {
        let transport = ScriptedTransport::new(vec![
            Err(io::Error::other("network is down")),
            Ok(classic_send(0x1)),
        ]);
        let mut handler = RecordingHandler::default();
        let metrics = ConnectorMetrics::new();
        let mut rx = ReceivePipeline::new();
        rx.arm(&metrics);

        // 错误后本轮停止
        assert_eq!(rx.drain(&transport, &mut handler, &metrics), 1);
        assert_eq!(handler.errors, 1);
        assert_eq!(rx.state(), ReceiveState::AwaitingDatagram);

        // 下一轮继续接收
        assert_eq!(rx.drain(&transport, &mut handler, &metrics), 1);
        assert_eq!(handler.messages.len(), 1);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.rx_transport_errors, 1);
        assert_eq!(snapshot.rx_arms, 3);
    }

    #[test]
    fn test_closed_pipeline_ignores_completion() {
        let mut handler = RecordingHandler::default();
        let metrics = ConnectorMetrics::new();
        let mut rx = ReceivePipeline::new();
        rx.arm(&metrics);
        rx.close();

        assert_eq!(rx.complete(Ok(0), &mut handler, &metrics), ReceiveOutcome::Ignored);
        rx.arm(&metrics);
        assert_eq!(rx.state(), ReceiveState::Closed);
        assert_eq!(metrics.snapshot().rx_arms, 1);

        let transport = ScriptedTransport::new(vec![Ok(classic_send(0x1))]);
        assert_eq!(rx.drain(&transport, &mut handler, &metrics), 0);
        assert!(handler.messages.is_empty());
    }
}
