//! BCM 连接器
//!
//! 持有 socket 与 reactor 线程，对外提供线程安全的提交接口。
//!
//! # 提交路径
//!
//! 调用线程只做三件事：编码（错误同步返回，不触发任何 I/O）、
//! 分配 [`RequestId`]、把 [`Command::Submit`] 放进命令通道并唤醒 reactor。
//! 系统调用全部发生在 reactor 线程上。
//!
//! # 关闭
//!
//! [`Connector::shutdown`] 在写锁下把状态切到 Stopping（此后的提交立即返回
//! `NotRunning`），然后发送 Shutdown 并 join reactor 线程。返回时：
//! - 不会再有任何回调被调用
//! - 未发出的发送都已以 `Cancelled` 完成
//! - socket 已关闭（内核随之删除该 socket 的所有周期任务和订阅）

use crate::config::ConnectorConfig;
use crate::error::ConnectorError;
use crate::handler::{BcmHandler, RequestId};
use crate::metrics::{ConnectorMetrics, MetricsSnapshot};
use crate::reactor::{Command, Reactor};
use crate::state::ConnectorState;
use crate::tx::PendingSend;
use bcm_protocol::{BcmFrames, BcmTimeval, Frame, FrameKind, Opcode, codec};
use bcm_socket::DatagramTransport;
use bytes::Bytes;
use crossbeam_channel::Sender;
use mio::Waker;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[cfg(target_os = "linux")]
use bcm_socket::{BcmSocket, SocketDeviceError, SocketDeviceErrorKind, SocketError, resolve_interface};

/// 客户端认为处于活动状态的周期发送任务
///
/// 仅用于诊断：内核才是权威，这里的记录不参与任何协议决策。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CyclicTask {
    pub can_id: u32,
    pub kind: FrameKind,
}

/// BCM 连接器
///
/// # 示例
///
/// ```no_run
/// use bcm_driver::{Connector, ConnectorConfig, LoggingHandler};
/// use bcm_protocol::{CanFrame, Frame};
/// use std::time::Duration;
///
/// let connector = Connector::open(ConnectorConfig::for_interface("vcan0"), LoggingHandler)?;
///
/// let frame: Frame = CanFrame::new_standard(0x123, &[0x01, 0x02]).unwrap().into();
/// connector.tx_send_single(frame, false)?;
///
/// // 每 100ms 发送一次，由内核调度
/// connector.tx_setup_cyclic(&[frame], 0, Duration::ZERO, Duration::from_millis(100), false)?;
/// connector.tx_delete_cyclic(0x123, false)?;
///
/// connector.shutdown()?;
/// # Ok::<(), bcm_driver::ConnectorError>(())
/// ```
pub struct Connector {
    cmd_tx: Sender<Command>,
    waker: Arc<Waker>,
    /// 生命周期门：提交持读锁检查 Running，关闭持写锁切换状态
    state: RwLock<ConnectorState>,
    reactor: Mutex<Option<JoinHandle<()>>>,
    metrics: Arc<ConnectorMetrics>,
    next_id: AtomicU64,
    cyclic_tasks: Mutex<BTreeSet<CyclicTask>>,
    max_frames: usize,
    interface: Option<String>,
}

impl Connector {
    /// 打开接口上的 BCM socket 并启动 reactor
    ///
    /// # 参数
    /// - `config`: 连接器配置（会先校验）
    /// - `handler`: 入站消息 / 发送完成 / 错误回调
    ///
    /// # 错误
    /// - `ConnectorError::Config`: 配置越界
    /// - `ConnectorError::Setup`: 接口不存在、未 UP（`require_interface_up`）、
    ///   权限不足或内核不支持 CAN_BCM
    /// - `ConnectorError::ReactorThread`: 无法创建 reactor 线程
    #[cfg(target_os = "linux")]
    pub fn open<H>(config: ConnectorConfig, handler: H) -> Result<Self, ConnectorError>
    where
        H: BcmHandler + 'static,
    {
        config.validate()?;
        debug!("Connector constructing on '{}'", config.interface);

        let info = resolve_interface(&config.interface)?;
        if config.require_interface_up && !info.is_up {
            return Err(SocketError::from(SocketDeviceError::new(
                SocketDeviceErrorKind::InterfaceDown,
                format!(
                    "Interface '{}' is down (try: sudo ip link set {} up)",
                    config.interface, config.interface
                ),
            ))
            .into());
        }

        let socket = BcmSocket::open_index(info.index)?;
        let mut connector = Self::start(socket, &config, handler)?;
        connector.interface = Some(config.interface.clone());
        info!(
            "Connector running on '{}' (index {}, up={})",
            config.interface, info.index, info.is_up
        );
        Ok(connector)
    }

    /// 使用已建立的数据报传输启动连接器
    ///
    /// 传输层会被切换为非阻塞。测试中可传入 `UnixDatagram::pair()` 的一端
    /// 代替内核 BCM socket。
    pub fn with_transport<T, H>(
        transport: T,
        config: ConnectorConfig,
        handler: H,
    ) -> Result<Self, ConnectorError>
    where
        T: DatagramTransport + 'static,
        H: BcmHandler + 'static,
    {
        config.validate()?;
        transport.set_nonblocking(true)?;
        let connector = Self::start(transport, &config, handler)?;
        debug!("Connector running on custom transport");
        Ok(connector)
    }

    fn start<T, H>(transport: T, config: &ConnectorConfig, handler: H) -> Result<Self, ConnectorError>
    where
        T: DatagramTransport + 'static,
        H: BcmHandler + 'static,
    {
        let metrics = Arc::new(ConnectorMetrics::new());
        let (cmd_tx, cmd_rx) = crossbeam_channel::unbounded();
        let (reactor, waker) = Reactor::new(transport, handler, cmd_rx, metrics.clone(), config)?;

        let handle = thread::Builder::new()
            .name(config.thread_name.clone())
            .spawn(move || reactor.run())
            .map_err(|e| ConnectorError::ReactorThread(format!("failed to spawn reactor: {}", e)))?;

        Ok(Self {
            cmd_tx,
            waker,
            state: RwLock::new(ConnectorState::Running),
            reactor: Mutex::new(Some(handle)),
            metrics,
            next_id: AtomicU64::new(1),
            cyclic_tasks: Mutex::new(BTreeSet::new()),
            max_frames: config.max_frames,
            interface: None,
        })
    }

    /// 发送单帧（TX_SEND）
    ///
    /// # 参数
    /// - `frame`: 待发送的帧
    /// - `is_fd`: 目标帧类型；与 `frame` 不同时显式转换
    ///   （FD → Classic 超过 8 字节返回 `Frame(LossyConversion)`）
    ///
    /// # 错误
    /// - `ConnectorError::Frame`: 帧类型转换失败
    /// - `ConnectorError::NotRunning`: 连接器已停止或正在停止
    pub fn tx_send_single(&self, frame: Frame, is_fd: bool) -> Result<RequestId, ConnectorError> {
        let frame = frame.into_kind(FrameKind::from_fd(is_fd))?;
        self.submit(Opcode::TxSend, frame.raw_id(), codec::encode_send(&frame))
    }

    /// 逐帧发送（N 条独立的 TX_SEND）
    ///
    /// 所有帧先全部完成转换，任何一帧失败则一条都不提交。
    /// 提交后各条消息互相独立，不保证整批原子送达。
    pub fn tx_send_multiple(&self, frames: &[Frame], is_fd: bool) -> Result<Vec<RequestId>, ConnectorError> {
        let kind = FrameKind::from_fd(is_fd);
        let frames = frames
            .iter()
            .map(|f| f.into_kind(kind))
            .collect::<Result<Vec<_>, _>>()?;

        frames
            .iter()
            .map(|frame| self.submit(Opcode::TxSend, frame.raw_id(), codec::encode_send(frame)))
            .collect()
    }

    /// 建立（或替换）周期发送任务（TX_SETUP）
    ///
    /// 内核先以 `ival1` 发送 `count` 次，然后以 `ival2` 无限循环；
    /// `count = 0` 时直接使用 `ival2`。任务以第一帧的 CAN ID 标识。
    ///
    /// # 错误
    /// - `ConnectorError::TooManyFrames`: 帧数超过配置的 `max_frames`
    /// - `ConnectorError::Protocol`: 空帧序列或混合帧类型
    /// - `ConnectorError::Frame`: 帧类型转换失败
    /// - `ConnectorError::NotRunning`: 连接器已停止或正在停止
    pub fn tx_setup_cyclic(
        &self,
        frames: &[Frame],
        count: u32,
        ival1: Duration,
        ival2: Duration,
        is_fd: bool,
    ) -> Result<RequestId, ConnectorError> {
        if frames.len() > self.max_frames {
            return Err(ConnectorError::TooManyFrames {
                count: frames.len(),
                max: self.max_frames,
            });
        }

        let kind = FrameKind::from_fd(is_fd);
        let frames = BcmFrames::from_frames(frames, kind)?;
        let bytes = codec::encode_setup(&frames, count, ival1.into(), ival2.into())?;
        let task = CyclicTask {
            can_id: frames.get(0).map(|f| f.raw_id()).unwrap_or_default(),
            kind,
        };

        let id = self.submit(Opcode::TxSetup, task.can_id, bytes)?;
        self.cyclic_tasks.lock().insert(task);
        Ok(id)
    }

    /// 删除周期发送任务（TX_DELETE）
    ///
    /// FD 任务与 Classic 任务在内核中分开登记，`is_fd` 必须与建立时一致。
    /// 删除不存在的任务时内核以 EINVAL 拒绝，体现为发送完成的失败结果。
    pub fn tx_delete_cyclic(&self, can_id: u32, is_fd: bool) -> Result<RequestId, ConnectorError> {
        let kind = FrameKind::from_fd(is_fd);
        let id = self.submit(Opcode::TxDelete, can_id, codec::encode_delete(can_id, kind))?;
        self.cyclic_tasks.lock().remove(&CyclicTask { can_id, kind });
        Ok(id)
    }

    /// 订阅 `can_id` 的入站帧（RX_SETUP）
    ///
    /// BCM socket 只投递已订阅 ID 的帧。内核在内容变化时发送 RX_CHANGED；
    /// `timeout` 非零时超时未收到帧发送 RX_TIMEOUT；`throttle` 限制通知频率。
    pub fn rx_setup_filter(
        &self,
        can_id: u32,
        is_fd: bool,
        timeout: Duration,
        throttle: Duration,
    ) -> Result<RequestId, ConnectorError> {
        let bytes = codec::encode_rx_setup(
            can_id,
            FrameKind::from_fd(is_fd),
            BcmTimeval::from(timeout),
            BcmTimeval::from(throttle),
        );
        self.submit(Opcode::RxSetup, can_id, bytes)
    }

    /// 取消入站订阅（RX_DELETE）
    pub fn rx_delete_filter(&self, can_id: u32, is_fd: bool) -> Result<RequestId, ConnectorError> {
        let bytes = codec::encode_rx_delete(can_id, FrameKind::from_fd(is_fd));
        self.submit(Opcode::RxDelete, can_id, bytes)
    }

    /// 把编码好的消息交给 reactor
    fn submit(&self, opcode: Opcode, can_id: u32, bytes: Vec<u8>) -> Result<RequestId, ConnectorError> {
        let state = self.state.read();
        if !state.accepts_work() {
            return Err(ConnectorError::NotRunning { state: *state });
        }

        let id = RequestId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let send = PendingSend {
            id,
            opcode,
            can_id,
            bytes: Bytes::from(bytes),
        };
        self.cmd_tx
            .send(Command::Submit(send))
            .map_err(|_| ConnectorError::ChannelClosed)?;
        ConnectorMetrics::incr(&self.metrics.tx_submitted);
        drop(state);

        if let Err(e) = self.waker.wake() {
            // poll 超时后仍会处理该提交
            warn!("Failed to wake BCM reactor: {}", e);
        }
        Ok(id)
    }

    /// 停止连接器并等待 reactor 线程退出
    ///
    /// 幂等：重复调用或并发调用都会阻塞到 reactor 线程 join 完成后返回。
    ///
    /// # 错误
    /// - `ConnectorError::ReactorThread`: reactor 线程 panic，或在 handler
    ///   回调内（reactor 线程上）调用了本方法
    pub fn shutdown(&self) -> Result<(), ConnectorError> {
        {
            let mut state = self.state.write();
            if *state == ConnectorState::Running {
                *state = ConnectorState::Stopping;
                debug!("Connector stopping");
            }
        }

        let mut reactor = self.reactor.lock();
        let Some(handle) = reactor.take() else {
            return Ok(());
        };

        // 不论 reactor 是否已退出，发送都只会失败于通道断开
        let _ = self.cmd_tx.send(Command::Shutdown);
        if let Err(e) = self.waker.wake() {
            warn!("Failed to wake BCM reactor for shutdown: {}", e);
        }

        if handle.thread().id() == thread::current().id() {
            *reactor = Some(handle);
            return Err(ConnectorError::ReactorThread(
                "shutdown called from the reactor thread".to_string(),
            ));
        }

        let result = handle.join();
        *self.state.write() = ConnectorState::Stopped;
        self.cyclic_tasks.lock().clear();

        match result {
            Ok(()) => {
                info!("Connector stopped");
                Ok(())
            },
            Err(_) => {
                error!("BCM reactor thread panicked");
                Err(ConnectorError::ReactorThread("reactor thread panicked".to_string()))
            },
        }
    }

    pub fn state(&self) -> ConnectorState {
        *self.state.read()
    }

    pub fn is_running(&self) -> bool {
        self.state().accepts_work()
    }

    /// 获取指标快照
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// 重置所有指标计数器
    pub fn reset_metrics(&self) {
        self.metrics.reset();
    }

    /// 客户端记录的活动周期任务（按 CAN ID 排序）
    ///
    /// 只反映本连接器提交过的 TX_SETUP / TX_DELETE，不查询内核。
    pub fn active_cyclic_tasks(&self) -> Vec<CyclicTask> {
        self.cyclic_tasks.lock().iter().copied().collect()
    }

    /// 接口名（自定义传输时为 `None`）
    pub fn interface(&self) -> Option<&str> {
        self.interface.as_deref()
    }

    pub fn max_frames(&self) -> usize {
        self.max_frames
    }
}

impl Drop for Connector {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            error!("Connector shutdown on drop failed: {}", e);
        }
    }
}

impl std::fmt::Debug for Connector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connector")
            .field("state", &self.state())
            .field("interface", &self.interface)
            .field("max_frames", &self.max_frames)
            .finish_non_exhaustive()
    }
}
