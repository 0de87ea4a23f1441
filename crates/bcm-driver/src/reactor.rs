//! Reactor 线程
//!
//! 单线程事件循环：socket 以边沿触发注册 READABLE | WRITABLE，
//! 提交线程通过 [`Command`] 通道投递工作并用 `Waker` 唤醒 `poll`。
//!
//! 每轮循环依次：
//! 1. 取出全部命令（Submit 登记进发送管线，Shutdown 结束循环）
//! 2. flush 发送管线
//! 3. 读空接收管线
//!
//! `poll` 带超时（`poll_interval_ms`），即使错过边沿事件也会定期重试，
//! 因此发送 WouldBlock 和接收传输错误之后不需要额外的重试调度。
//!
//! 所有 handler 回调都在本线程执行，天然串行。

use crate::config::ConnectorConfig;
use crate::handler::{BcmHandler, Severity};
use crate::metrics::ConnectorMetrics;
use crate::rx::ReceivePipeline;
use crate::tx::{FlushOutcome, PendingSend, TransmitPipeline};
use bcm_socket::DatagramTransport;
use crossbeam_channel::{Receiver, TryRecvError};
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token, Waker};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

const SOCKET: Token = Token(0);
const WAKER: Token = Token(1);

/// 提交线程 → reactor 的命令
#[derive(Debug)]
pub(crate) enum Command {
    Submit(PendingSend),
    Shutdown,
}

pub(crate) struct Reactor<T, H> {
    poll: Poll,
    events: Events,
    transport: T,
    handler: H,
    commands: Receiver<Command>,
    metrics: Arc<ConnectorMetrics>,
    tx: TransmitPipeline,
    rx: ReceivePipeline,
    poll_interval: Duration,
}

impl<T, H> Reactor<T, H>
where
    T: DatagramTransport,
    H: BcmHandler,
{
    /// 创建 reactor 并注册 socket
    ///
    /// 返回的 `Waker` 由连接器持有，用于在提交或关闭时唤醒 `poll`。
    pub(crate) fn new(
        transport: T,
        handler: H,
        commands: Receiver<Command>,
        metrics: Arc<ConnectorMetrics>,
        config: &ConnectorConfig,
    ) -> io::Result<(Self, Arc<Waker>)> {
        let poll = Poll::new()?;
        let fd = transport.as_raw_fd();
        poll.registry()
            .register(&mut SourceFd(&fd), SOCKET, Interest::READABLE | Interest::WRITABLE)?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER)?);

        let reactor = Self {
            poll,
            events: Events::with_capacity(config.event_capacity),
            transport,
            handler,
            commands,
            metrics,
            tx: TransmitPipeline::new(),
            rx: ReceivePipeline::new(),
            poll_interval: config.poll_interval(),
        };
        Ok((reactor, waker))
    }

    /// 事件循环主体（在 reactor 线程上运行，直到收到 Shutdown）
    pub(crate) fn run(mut self) {
        debug!("BCM reactor started (fd {})", self.transport.as_raw_fd());
        self.rx.arm(&self.metrics);

        loop {
            if let Err(e) = self.poll.poll(&mut self.events, Some(self.poll_interval)) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                error!("BCM reactor poll failed: {}", e);
                self.handler
                    .on_error(Severity::Error, &format!("reactor poll failed: {}", e));
                break;
            }

            for event in self.events.iter() {
                trace!(
                    "event token={:?} readable={} writable={}",
                    event.token(),
                    event.is_readable(),
                    event.is_writable()
                );
            }

            let stop = self.drain_commands();

            if self.tx.flush(&self.transport, &mut self.handler, &self.metrics)
                == FlushOutcome::WouldBlock
            {
                trace!("{} sends waiting for socket space", self.tx.len());
            }
            self.rx.drain(&self.transport, &mut self.handler, &self.metrics);

            if stop {
                break;
            }
        }

        self.finish();
    }

    /// 取出所有排队的命令，返回是否应结束循环
    fn drain_commands(&mut self) -> bool {
        loop {
            match self.commands.try_recv() {
                Ok(Command::Submit(send)) => self.tx.enqueue(send),
                Ok(Command::Shutdown) => {
                    debug!("BCM reactor received shutdown");
                    return true;
                },
                Err(TryRecvError::Empty) => return false,
                Err(TryRecvError::Disconnected) => {
                    warn!("Command channel disconnected, stopping BCM reactor");
                    return true;
                },
            }
        }
    }

    /// 关闭流程：最后一次 flush，取消剩余发送，关闭接收管线
    fn finish(mut self) {
        if self.tx.flush(&self.transport, &mut self.handler, &self.metrics)
            == FlushOutcome::WouldBlock
        {
            let cancelled = self.tx.cancel_all(&mut self.handler, &self.metrics);
            debug!("{} pending sends cancelled by shutdown", cancelled);
        }
        self.rx.close();

        let fd = self.transport.as_raw_fd();
        if let Err(e) = self.poll.registry().deregister(&mut SourceFd(&fd)) {
            warn!("Failed to deregister BCM socket: {}", e);
        }

        let snapshot = self.metrics.snapshot();
        info!(
            "BCM reactor stopped: tx completed={} failed={} cancelled={}, rx dispatched={} discarded={}",
            snapshot.tx_completed,
            snapshot.tx_failed,
            snapshot.tx_cancelled,
            snapshot.rx_dispatched,
            snapshot.rx_discarded
        );
    }
}
