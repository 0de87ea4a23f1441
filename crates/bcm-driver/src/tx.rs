//! 发送管线（Transmit Pipeline）
//!
//! 每个出站消息是一条 [`PendingSend`]：编码得到的 `Vec<u8>` 被移动（不拷贝）
//! 进 `Bytes`，由在途表独占，直到完成通知回调返回后随记录一起释放。
//!
//! 在途表以 [`RequestId`] 为键，按提交顺序写入 socket。
//! 写入遇到 `WouldBlock` 时保留剩余记录，等待下一次可写事件；
//! 任何其他错误只影响该条记录，上报一次，不重试。

use crate::error::TransportError;
use crate::handler::{BcmHandler, RequestId, SendCompletion, Severity};
use crate::metrics::ConnectorMetrics;
use bcm_protocol::Opcode;
use bcm_socket::DatagramTransport;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::io;
use tracing::{error, trace};

/// 一条待发送的 BCM 消息
#[derive(Debug)]
pub struct PendingSend {
    pub id: RequestId,
    pub opcode: Opcode,
    pub can_id: u32,
    pub bytes: Bytes,
}

/// 一次 flush 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// 在途表已清空
    Drained,
    /// socket 暂不可写，仍有记录在途
    WouldBlock,
}

/// 在途发送表
#[derive(Debug, Default)]
pub struct TransmitPipeline {
    pending: BTreeMap<RequestId, PendingSend>,
}

impl TransmitPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记一条待发送消息
    pub fn enqueue(&mut self, send: PendingSend) {
        trace!("{} {} queued ({} bytes)", send.id, send.opcode, send.bytes.len());
        self.pending.insert(send.id, send);
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// 按请求 ID 顺序写出在途消息，直到清空或 socket 不可写
    pub fn flush<T, H>(&mut self, transport: &T, handler: &mut H, metrics: &ConnectorMetrics) -> FlushOutcome
    where
        T: DatagramTransport + ?Sized,
        H: BcmHandler + ?Sized,
    {
        while let Some(entry) = self.pending.first_entry() {
            let expected = entry.get().bytes.len();
            let result = match transport.send(&entry.get().bytes) {
                Ok(written) if written == expected => Ok(written),
                Ok(written) => Err(TransportError::ShortWrite { written, expected }),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    ConnectorMetrics::incr(&metrics.tx_would_block);
                    return FlushOutcome::WouldBlock;
                },
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => Err(TransportError::Io(e)),
            };
            complete(entry.remove(), result, handler, metrics);
        }
        FlushOutcome::Drained
    }

    /// 把所有在途消息以 `Cancelled` 完成（关闭流程）
    pub fn cancel_all<H>(&mut self, handler: &mut H, metrics: &ConnectorMetrics) -> usize
    where
        H: BcmHandler + ?Sized,
    {
        let cancelled = self.pending.len();
        while let Some((_, send)) = self.pending.pop_first() {
            complete(send, Err(TransportError::Cancelled), handler, metrics);
        }
        cancelled
    }
}

/// 投递完成通知并释放缓冲区
fn complete<H>(
    send: PendingSend,
    result: Result<usize, TransportError>,
    handler: &mut H,
    metrics: &ConnectorMetrics,
) where
    H: BcmHandler + ?Sized,
{
    match &result {
        Ok(written) => {
            ConnectorMetrics::incr(&metrics.tx_completed);
            trace!("{} {} can_id=0x{:X} sent ({} bytes)", send.id, send.opcode, send.can_id, written);
        },
        Err(TransportError::Cancelled) => {
            ConnectorMetrics::incr(&metrics.tx_cancelled);
        },
        Err(e) => {
            ConnectorMetrics::incr(&metrics.tx_failed);
            error!("{} {} can_id=0x{:X} failed: {}", send.id, send.opcode, send.can_id, e);
            handler.on_error(
                Severity::Error,
                &format!("{} can_id=0x{:X} send failed: {}", send.opcode, send.can_id, e),
            );
        },
    }

    let completion = SendCompletion {
        id: send.id,
        opcode: send.opcode,
        can_id: send.can_id,
        bytes: send.bytes,
        result,
    };
    handler.on_send_complete(&completion);
}
