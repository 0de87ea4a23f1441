//! 回调边界（Handler）
//!
//! 连接器只负责把解码后的消息、发送完成通知和可恢复错误交给调用方，
//! 不推断任何业务语义。
//!
//! # 线程模型
//!
//! 所有回调都在 reactor 线程上**串行**执行，因此 handler 以 `&mut self`
//! 接收回调，内部状态无需加锁。回调应尽快返回：回调期间 reactor 不处理 I/O。
//! 需要跨线程消费时使用 [`ChannelHandler`]（`try_send`，满则丢弃并计数）。

use crate::error::TransportError;
use bcm_protocol::{BcmMessage, Opcode};
use bytes::Bytes;
use crossbeam_channel::{Receiver, Sender, TrySendError};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, error, info, trace, warn};

/// 每次提交分配的请求 ID（单调递增）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub(crate) u64);

impl RequestId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// 单次发送的完成通知
///
/// `bytes` 就是提交时的那块缓冲区；通知回调返回后缓冲区随之释放。
#[derive(Debug)]
pub struct SendCompletion {
    pub id: RequestId,
    pub opcode: Opcode,
    pub can_id: u32,
    pub bytes: Bytes,
    /// 成功时为写入的字节数
    pub result: Result<usize, TransportError>,
}

impl SendCompletion {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.result, Err(TransportError::Cancelled))
    }
}

/// 错误汇报的严重程度
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Error,
}

/// 连接器回调接口
///
/// # 示例
///
/// ```rust
/// use bcm_driver::{BcmHandler, Severity};
/// use bcm_protocol::BcmMessage;
///
/// struct Counter {
///     messages: usize,
/// }
///
/// impl BcmHandler for Counter {
///     fn on_message(&mut self, message: &BcmMessage) {
///         self.messages += 1;
///         let _ = message;
///     }
/// }
/// ```
pub trait BcmHandler: Send {
    /// 每条成功解码的入站消息（`message.head` / `message.frames` / `message.is_fd()`）
    fn on_message(&mut self, message: &BcmMessage);

    /// 每个发送操作完成时调用（成功、失败或被取消）
    ///
    /// 默认为空操作。
    fn on_send_complete(&mut self, completion: &SendCompletion) {
        let _ = completion;
    }

    /// 可恢复错误（传输失败、畸形数据报等）
    ///
    /// 默认转发到 `tracing`。
    fn on_error(&mut self, severity: Severity, message: &str) {
        match severity {
            Severity::Debug => debug!("{}", message),
            Severity::Info => info!("{}", message),
            Severity::Warning => warn!("{}", message),
            Severity::Error => error!("{}", message),
        }
    }
}

/// 闭包形式的 handler（只处理入站消息）
impl<F> BcmHandler for F
where
    F: FnMut(&BcmMessage) + Send,
{
    fn on_message(&mut self, message: &BcmMessage) {
        self(message)
    }
}

/// 只记录日志的 handler
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHandler;

impl BcmHandler for LoggingHandler {
    fn on_message(&mut self, message: &BcmMessage) {
        info!(
            "{} can_id=0x{:X} nframes={} fd={}",
            message.opcode(),
            message.can_id(),
            message.head.nframes,
            message.is_fd()
        );
        for frame in message.frames.iter() {
            trace!("  0x{:X} [{}] {:02X?}", frame.raw_id(), frame.len(), frame.data());
        }
    }

    fn on_send_complete(&mut self, completion: &SendCompletion) {
        match &completion.result {
            Ok(written) => trace!(
                "{} {} can_id=0x{:X} sent ({} bytes)",
                completion.id, completion.opcode, completion.can_id, written
            ),
            Err(e) => warn!(
                "{} {} can_id=0x{:X} failed: {}",
                completion.id, completion.opcode, completion.can_id, e
            ),
        }
    }
}

/// 把入站消息转发到有界 channel 的 handler
///
/// channel 满时丢弃消息（不阻塞 reactor），丢弃数可通过 [`DropCounter`] 读取。
///
/// # 示例
///
/// ```rust
/// use bcm_driver::ChannelHandler;
///
/// let (handler, rx, dropped) = ChannelHandler::new(64);
/// assert!(rx.is_empty());
/// assert_eq!(dropped.get(), 0);
/// # drop(handler);
/// ```
pub struct ChannelHandler {
    sender: Sender<BcmMessage>,
    dropped: DropCounter,
}

impl ChannelHandler {
    pub fn new(capacity: usize) -> (Self, Receiver<BcmMessage>, DropCounter) {
        let (sender, receiver) = crossbeam_channel::bounded(capacity);
        let dropped = DropCounter::default();
        (
            Self {
                sender,
                dropped: dropped.clone(),
            },
            receiver,
            dropped,
        )
    }
}

impl BcmHandler for ChannelHandler {
    fn on_message(&mut self, message: &BcmMessage) {
        match self.sender.try_send(message.clone()) {
            Ok(()) => {},
            Err(TrySendError::Full(_)) => {
                let dropped = self.dropped.0.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped.is_power_of_two() {
                    warn!("Inbound channel full, {} messages dropped so far", dropped);
                }
            },
            Err(TrySendError::Disconnected(_)) => {
                self.dropped.0.fetch_add(1, Ordering::Relaxed);
            },
        }
    }
}

/// 丢弃计数（可跨线程共享读取）
#[derive(Debug, Clone, Default)]
pub struct DropCounter(Arc<AtomicU64>);

impl DropCounter {
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}
