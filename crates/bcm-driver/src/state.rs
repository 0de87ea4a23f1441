//! 连接器生命周期状态
//!
//! ```text
//! Constructing ──▶ Running ──▶ Stopping ──▶ Stopped
//! ```
//!
//! 只有 Running 状态接受新的提交；其余状态下的调用立即返回
//! `ConnectorError::NotRunning`，不会静默丢弃。

use std::fmt;

/// 连接器生命周期状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum ConnectorState {
    /// 正在获取 socket、启动 reactor
    #[default]
    Constructing = 0,
    /// reactor 运行中，接受提交
    Running = 1,
    /// 已拒绝新提交，reactor 正在排空在途操作
    Stopping = 2,
    /// reactor 线程已 join，socket 已释放
    Stopped = 3,
}

impl ConnectorState {
    /// 是否接受新的提交
    pub fn accepts_work(self) -> bool {
        self == Self::Running
    }

    /// 是否已进入关闭流程（Stopping 或 Stopped）
    pub fn is_shutting_down(self) -> bool {
        matches!(self, Self::Stopping | Self::Stopped)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Constructing => "Constructing",
            Self::Running => "Running",
            Self::Stopping => "Stopping",
            Self::Stopped => "Stopped",
        }
    }
}

impl fmt::Display for ConnectorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
