//! # BCM Protocol
//!
//! Linux CAN Broadcast Manager (BCM) 协议定义（无硬件依赖）
//!
//! ## 模块
//!
//! - `constants`: 内核头文件中的常量（CAN ID 标志位、BCM 标志位、帧尺寸）
//! - `frame`: CAN 2.0 / CAN FD 帧模型及其相互转换
//! - `message`: `bcm_msg_head` 与同类型帧序列
//! - `codec`: TX_SEND / TX_SETUP / TX_DELETE / RX_SETUP / RX_DELETE 编码与入站消息解码
//!
//! ## 字节序
//!
//! BCM 是本机内核 ABI，所有整数都使用主机原生字节序（`to_ne_bytes`），
//! 头部布局随 C `long` 的宽度变化（见 [`message`] 模块文档）。
//!
//! ## 示例
//!
//! ```rust
//! use bcm_protocol::{CanFrame, Frame, Opcode, codec};
//!
//! let frame: Frame = CanFrame::new_standard(0x123, &[0xDE, 0xAD]).unwrap().into();
//! let bytes = codec::encode_send(&frame);
//!
//! let message = codec::decode(&bytes).unwrap();
//! assert_eq!(message.opcode(), Opcode::TxSend);
//! assert_eq!(message.frames.get(0), Some(frame));
//! ```

pub mod codec;
pub mod constants;
pub mod frame;
pub mod message;

// 重新导出常用类型
pub use codec::{
    decode, encode, encode_delete, encode_rx_delete, encode_rx_setup, encode_send, encode_setup,
};
pub use constants::*;
pub use frame::{CanFdFrame, CanFrame, Frame, FrameError, FrameKind};
pub use message::{
    BCM_HEAD_SIZE, BCM_MAX_MESSAGE_SIZE, BcmFrames, BcmMessage, BcmMsgHead, BcmTimeval, Opcode,
    message_size,
};

use thiserror::Error;

/// 协议编解码错误类型
///
/// 入站方向全部可恢复（丢弃该数据报并继续接收）；
/// 出站方向表示调用方违反约定，消息不会被构建。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Truncated message: {actual} bytes, need at least {min}")]
    Truncated { actual: usize, min: usize },

    #[error("Size mismatch: header declares {expected} bytes, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },

    #[error("Unknown BCM opcode: {0}")]
    UnknownOpcode(u32),

    #[error("Too many frames: {nframes} (max {max})")]
    TooManyFrames { nframes: usize, max: usize },

    #[error("Invalid length {len} in frame #{index}")]
    InvalidFrameLength { index: usize, len: usize },

    #[error("Mixed frame kinds: frame #{index} differs from frame #0")]
    MixedFrameKinds { index: usize },

    #[error("TX_SETUP requires at least one frame")]
    EmptyFrames,

    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),
}

/// 原生字节序读取 u32（调用方保证 `bytes.len() >= 4`）
pub(crate) fn read_u32_ne(bytes: &[u8]) -> u32 {
    u32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_u32_ne() {
        let bytes = 0x1234_5678u32.to_ne_bytes();
        assert_eq!(read_u32_ne(&bytes), 0x1234_5678);
    }

    #[test]
    fn test_read_u32_ne_ignores_tail() {
        let mut bytes = 7u32.to_ne_bytes().to_vec();
        bytes.extend_from_slice(&[0xFF, 0xFF]);
        assert_eq!(read_u32_ne(&bytes), 7);
    }

    #[test]
    fn test_error_display() {
        let err = ProtocolError::SizeMismatch {
            expected: 72,
            actual: 71,
        };
        assert_eq!(err.to_string(), "Size mismatch: header declares 72 bytes, got 71");

        let err: ProtocolError = FrameError::InvalidFdLength(13).into();
        assert!(matches!(err, ProtocolError::Frame(FrameError::InvalidFdLength(13))));
    }
}
