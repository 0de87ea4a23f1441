//! # BCM Socket Layer
//!
//! Linux CAN Broadcast Manager socket 的系统调用封装。
//!
//! - `interface_check`: 接口名 → 接口索引，并读取 UP 状态
//! - `bcm`: `PF_CAN / SOCK_DGRAM / CAN_BCM` socket 的创建与连接
//! - `transport`: 数据报传输抽象，reactor 只依赖该 trait
//!
//! BCM socket 只存在于 Linux；`transport` 在所有 Unix 平台可用，
//! 测试中用 `UnixDatagram::pair()` 代替内核。

use thiserror::Error;

#[cfg(target_os = "linux")]
mod bcm;
#[cfg(target_os = "linux")]
mod interface_check;
mod transport;

#[cfg(target_os = "linux")]
pub use bcm::BcmSocket;
#[cfg(target_os = "linux")]
pub use interface_check::{InterfaceInfo, resolve_interface};
pub use transport::DatagramTransport;

/// Socket 层统一错误类型
#[derive(Error, Debug)]
pub enum SocketError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Device Error: {0}")]
    Device(#[from] SocketDeviceError),
}

impl SocketError {
    /// 是否为不可重试的错误（接口不存在、权限不足、内核不支持 BCM）
    pub fn is_fatal(&self) -> bool {
        match self {
            SocketError::Device(e) => e.is_fatal(),
            SocketError::Io(e) => e.kind() == std::io::ErrorKind::PermissionDenied,
        }
    }
}

/// 设备错误的结构化分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketDeviceErrorKind {
    Unknown,
    /// 接口不存在
    NotFound,
    /// 接口存在但未 UP
    InterfaceDown,
    /// 接口名过长或包含 NUL
    InvalidName,
    AccessDenied,
    /// 内核未加载 can-bcm 模块
    Unsupported,
}

/// 结构化设备错误
#[derive(Error, Debug, Clone)]
#[error("{kind:?}: {message}")]
pub struct SocketDeviceError {
    pub kind: SocketDeviceErrorKind,
    pub message: String,
}

impl SocketDeviceError {
    pub fn new(kind: SocketDeviceErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind,
            SocketDeviceErrorKind::NotFound
                | SocketDeviceErrorKind::InvalidName
                | SocketDeviceErrorKind::AccessDenied
                | SocketDeviceErrorKind::Unsupported
        )
    }
}

impl From<String> for SocketDeviceError {
    fn from(message: String) -> Self {
        Self::new(SocketDeviceErrorKind::Unknown, message)
    }
}

impl From<&str> for SocketDeviceError {
    fn from(message: &str) -> Self {
        Self::new(SocketDeviceErrorKind::Unknown, message)
    }
}
