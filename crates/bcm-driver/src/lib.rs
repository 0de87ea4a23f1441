//! 连接器层模块
//!
//! 本模块把 BCM 协议编解码与 socket 组合成一个可在任意线程调用的连接器：
//! - reactor 线程（mio 事件循环，独占 socket）
//! - 发送管线：每条消息一块独占缓冲区，完成通知后释放，失败不重试
//! - 接收管线：恰好一个接收在途，每次完成后无条件重新投递
//! - 生命周期：Constructing → Running → Stopping → Stopped
//! - 回调边界：[`BcmHandler`]，所有回调在 reactor 线程上串行执行
//!
//! # 使用场景
//!
//! ```no_run
//! use bcm_driver::{ChannelHandler, Connector, ConnectorConfig};
//! use std::time::Duration;
//!
//! let (handler, messages, _dropped) = ChannelHandler::new(256);
//! let connector = Connector::open(ConnectorConfig::for_interface("can0"), handler)?;
//! connector.rx_setup_filter(0x123, false, Duration::ZERO, Duration::ZERO)?;
//!
//! for message in messages.iter().take(10) {
//!     println!("{} 0x{:X}", message.opcode(), message.can_id());
//! }
//! # Ok::<(), bcm_driver::ConnectorError>(())
//! ```

mod builder;
mod config;
mod connector;
mod error;
pub mod handler;
pub mod metrics;
mod reactor;
pub mod rx;
pub mod state;
pub mod tx;

pub use builder::ConnectorBuilder;
pub use config::ConnectorConfig;
pub use connector::{Connector, CyclicTask};
pub use error::{ConnectorError, TransportError};
pub use handler::{
    BcmHandler, ChannelHandler, DropCounter, LoggingHandler, RequestId, SendCompletion, Severity,
};
pub use metrics::{ConnectorMetrics, MetricsSnapshot};
pub use rx::{ReceiveOutcome, ReceivePipeline, ReceiveState};
pub use state::ConnectorState;
pub use tx::{FlushOutcome, PendingSend, TransmitPipeline};
