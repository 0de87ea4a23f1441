//! Builder 模式实现
//!
//! 提供链式构造 `Connector` 实例的便捷方式。

use crate::config::ConnectorConfig;
use crate::connector::Connector;
use crate::error::ConnectorError;
use crate::handler::BcmHandler;
use bcm_socket::DatagramTransport;
use std::time::Duration;

/// Connector Builder（链式构造）
///
/// # Example
///
/// ```no_run
/// use bcm_driver::{ConnectorBuilder, LoggingHandler};
/// use std::time::Duration;
///
/// let connector = ConnectorBuilder::new()
///     .interface("can0")
///     .max_frames(32)
///     .poll_interval(Duration::from_millis(10))
///     .build(LoggingHandler)
///     .unwrap();
/// ```
#[derive(Debug, Clone, Default)]
pub struct ConnectorBuilder {
    config: ConnectorConfig,
}

impl ConnectorBuilder {
    /// 创建新的 Builder（默认配置）
    pub fn new() -> Self {
        Self::default()
    }

    /// 以现有配置（例如从 TOML 加载的）为起点
    pub fn from_config(config: ConnectorConfig) -> Self {
        Self { config }
    }

    /// 设置 CAN 接口（默认 `vcan0`）
    pub fn interface(mut self, interface: impl Into<String>) -> Self {
        self.config.interface = interface.into();
        self
    }

    /// 设置单条 TX_SETUP 的最大帧数（默认 256）
    pub fn max_frames(mut self, max_frames: usize) -> Self {
        self.config.max_frames = max_frames;
        self
    }

    /// 接口未 UP 时是否拒绝启动（默认 true）
    pub fn require_interface_up(mut self, require: bool) -> Self {
        self.config.require_interface_up = require;
        self
    }

    /// 设置 reactor 轮询超时（毫秒精度，默认 50ms）
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity;
        self
    }

    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.config.thread_name = name.into();
        self
    }

    /// 当前配置
    pub fn config(&self) -> &ConnectorConfig {
        &self.config
    }

    /// 打开配置的接口并启动连接器
    ///
    /// # 错误
    /// 同 [`Connector::open`]
    #[cfg(target_os = "linux")]
    pub fn build<H>(self, handler: H) -> Result<Connector, ConnectorError>
    where
        H: BcmHandler + 'static,
    {
        Connector::open(self.config, handler)
    }

    /// 在给定传输层上启动连接器（忽略 `interface` 相关配置）
    pub fn build_with_transport<T, H>(self, transport: T, handler: H) -> Result<Connector, ConnectorError>
    where
        T: DatagramTransport + 'static,
        H: BcmHandler + 'static,
    {
        Connector::with_transport(transport, self.config, handler)
    }
}
