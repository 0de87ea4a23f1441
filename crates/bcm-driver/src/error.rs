//! 连接器错误类型定义

use crate::state::ConnectorState;
use bcm_protocol::{FrameError, ProtocolError};
use bcm_socket::SocketError;
use std::io;
use thiserror::Error;

/// 连接器错误类型
///
/// 除 `Setup` 外都不会让连接器退出运行状态：编码错误在任何 I/O 之前同步返回，
/// 连接器本身保持可用。
#[derive(Error, Debug)]
pub enum ConnectorError {
    /// 接口解析 / socket 创建 / 连接失败，连接器不会进入 Running
    #[error("Setup error: {0}")]
    Setup(#[from] SocketError),

    /// 出站消息无法构建（空帧序列、混合帧类型等）
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// 帧转换失败（FD → Classic 超过 8 字节）
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    /// 连接器已停止或正在停止
    #[error("Connector is not running (state: {state})")]
    NotRunning { state: ConnectorState },

    /// 命令通道已关闭（reactor 线程已退出）
    #[error("Command channel closed")]
    ChannelClosed,

    /// 帧数超过配置的 `max_frames`
    #[error("Too many frames: {count} (max {max})")]
    TooManyFrames { count: usize, max: usize },

    /// reactor 线程启动失败或 panic
    #[error("Reactor thread error: {0}")]
    ReactorThread(String),

    /// 配置无效
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl From<io::Error> for ConnectorError {
    fn from(err: io::Error) -> Self {
        ConnectorError::Setup(SocketError::Io(err))
    }
}

/// 单次发送的失败原因（随 `SendCompletion` 上报，不重试）
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("IO Error: {0}")]
    Io(#[from] io::Error),

    /// 内核只接受了部分字节（BCM 不应出现）
    #[error("Short write: {written} of {expected} bytes")]
    ShortWrite { written: usize, expected: usize },

    /// 连接器关闭时仍未发出
    #[error("Cancelled by shutdown")]
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;
    use bcm_socket::{SocketDeviceError, SocketDeviceErrorKind};

    #[test]
    fn test_connector_error_display() {
        let err = ConnectorError::NotRunning {
            state: ConnectorState::Stopped,
        };
        assert_eq!(err.to_string(), "Connector is not running (state: Stopped)");

        let err = ConnectorError::TooManyFrames { count: 300, max: 256 };
        assert_eq!(err.to_string(), "Too many frames: 300 (max 256)");

        let err = ConnectorError::ChannelClosed;
        assert_eq!(err.to_string(), "Command channel closed");
    }

    #[test]
    fn test_from_socket_error() {
        let socket_error = SocketError::Device(SocketDeviceError::new(
            SocketDeviceErrorKind::NotFound,
            "no such interface",
        ));
        let err: ConnectorError = socket_error.into();
        match err {
            ConnectorError::Setup(SocketError::Device(e)) => {
                assert_eq!(e.kind, SocketDeviceErrorKind::NotFound)
            },
            other => panic!("Expected Setup variant, got {:?}", other),
        }
    }

    #[test]
    fn test_from_protocol_error() {
        let err: ConnectorError = ProtocolError::EmptyFrames.into();
        assert!(matches!(err, ConnectorError::Protocol(ProtocolError::EmptyFrames)));
        assert!(err.to_string().contains("at least one frame"));
    }

    #[test]
    fn test_transport_error_display() {
        assert_eq!(TransportError::Cancelled.to_string(), "Cancelled by shutdown");
        let err = TransportError::ShortWrite {
            written: 10,
            expected: 72,
        };
        assert_eq!(err.to_string(), "Short write: 10 of 72 bytes");
    }
}
