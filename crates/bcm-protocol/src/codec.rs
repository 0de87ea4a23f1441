//! BCM 消息编解码
//!
//! 出站：每个客户端操作对应一个 `encode_*` 函数，返回可直接写入 BCM socket
//! 的完整字节序列。调用方违反约定（空帧序列、帧数超限）时在任何 I/O 之前返回错误。
//!
//! 入站：[`decode`] 做结构校验。数据报是可靠的本地通道，没有校验和，
//! 唯一的完整性保证是「实际长度 == 头部声明的长度」。

use crate::constants::*;
use crate::frame::{CanFdFrame, CanFrame, Frame, FrameKind};
use crate::message::{
    BCM_HEAD_SIZE, BcmFrames, BcmMessage, BcmMsgHead, BcmTimeval, Opcode, message_size,
};
use crate::{ProtocolError, read_u32_ne};

fn kind_flag(kind: FrameKind) -> u32 {
    if kind.is_fd() { CAN_FD_FRAME } else { 0 }
}

fn encode_classic_frame(frame: &CanFrame, buf: &mut [u8]) {
    buf[0..4].copy_from_slice(&frame.raw_id().to_ne_bytes());
    buf[4] = frame.len() as u8;
    // __pad / __res0 / len8_dlc
    buf[5..8].fill(0);
    buf[8..CAN_MTU].copy_from_slice(frame.padded_data());
}

fn encode_fd_frame(frame: &CanFdFrame, buf: &mut [u8]) {
    buf[0..4].copy_from_slice(&frame.raw_id().to_ne_bytes());
    buf[4] = frame.len() as u8;
    buf[5] = frame.flags();
    // __res0 / __res1
    buf[6..8].fill(0);
    buf[8..CANFD_MTU].copy_from_slice(frame.padded_data());
}

/// 写出头部 + 帧序列，`nframes` 与 FD 标志位取自 `frames`
fn encode_with_frames(mut head: BcmMsgHead, frames: &BcmFrames) -> Vec<u8> {
    let kind = frames.kind();
    head.nframes = frames.len() as u32;
    head.flags = (head.flags & !CAN_FD_FRAME) | kind_flag(kind);

    let mut buf = vec![0u8; message_size(kind, frames.len())];
    head.encode(&mut buf);

    let body = &mut buf[BCM_HEAD_SIZE..];
    match frames {
        BcmFrames::Classic(frames) => {
            for (frame, slot) in frames.iter().zip(body.chunks_exact_mut(CAN_MTU)) {
                encode_classic_frame(frame, slot);
            }
        }
        BcmFrames::Fd(frames) => {
            for (frame, slot) in frames.iter().zip(body.chunks_exact_mut(CANFD_MTU)) {
                encode_fd_frame(frame, slot);
            }
        }
    }
    buf
}

/// TX_SEND：单帧立即发送
///
/// `nframes = 1`，无定时器标志；FD 帧设置 CAN_FD_FRAME。
/// `can_id` 取帧自身的原始 ID（内核对 TX_SEND 忽略该字段）。
pub fn encode_send(frame: &Frame) -> Vec<u8> {
    let head = BcmMsgHead::new(Opcode::TxSend, frame.raw_id());
    let frames = match *frame {
        Frame::Classic(f) => BcmFrames::Classic(vec![f]),
        Frame::Fd(f) => BcmFrames::Fd(vec![f]),
    };
    encode_with_frames(head, &frames)
}

/// TX_SETUP：创建或替换以 `can_id` 标识的周期发送任务
///
/// 内核先以 `ival1` 为间隔发送 `count` 轮帧序列，随后以 `ival2` 为周期持续发送。
/// `count = 0` 时跳过第一阶段，`ival1` 在线上写 0。
/// 任务 ID 取第一帧的原始 can_id。
///
/// # 错误
/// - `EmptyFrames`: 帧序列为空
/// - `TooManyFrames`: 超过 256 帧
///
/// # 示例
///
/// ```rust
/// use bcm_protocol::{BcmFrames, BcmTimeval, CanFrame, codec};
///
/// let frames = BcmFrames::Classic(vec![CanFrame::new_standard(0x100, &[1, 2]).unwrap()]);
/// let bytes = codec::encode_setup(&frames, 0, BcmTimeval::ZERO, BcmTimeval::new(0, 100_000)).unwrap();
/// let message = codec::decode(&bytes).unwrap();
/// assert_eq!(message.head.can_id, 0x100);
/// ```
pub fn encode_setup(
    frames: &BcmFrames,
    count: u32,
    ival1: BcmTimeval,
    ival2: BcmTimeval,
) -> Result<Vec<u8>, ProtocolError> {
    if frames.is_empty() {
        return Err(ProtocolError::EmptyFrames);
    }
    if frames.len() > MAX_NFRAMES {
        return Err(ProtocolError::TooManyFrames {
            nframes: frames.len(),
            max: MAX_NFRAMES,
        });
    }

    let can_id = frames.get(0).map(|f| f.raw_id()).unwrap_or_default();
    let mut head = BcmMsgHead::new(Opcode::TxSetup, can_id);
    head.flags = SETTIMER | STARTTIMER;
    head.count = count;
    head.ival1 = if count == 0 { BcmTimeval::ZERO } else { ival1 };
    head.ival2 = ival2;

    Ok(encode_with_frames(head, frames))
}

/// TX_DELETE：删除周期发送任务（仅头部）
///
/// FD 任务在内核中与 Classic 任务分开登记，删除时必须携带相同的 FD 标志。
pub fn encode_delete(can_id: u32, kind: FrameKind) -> Vec<u8> {
    encode_with_frames(BcmMsgHead::new(Opcode::TxDelete, can_id), &BcmFrames::empty(kind))
}

/// RX_SETUP：订阅 `can_id` 的入站帧（仅按 ID 过滤）
///
/// - `timeout` 非零时，超过该时间未收到帧内核会发 RX_TIMEOUT
/// - `throttle` 非零时，RX_CHANGED 通知的最小间隔
///
/// 两者都为零时不设置定时器标志。
pub fn encode_rx_setup(
    can_id: u32,
    kind: FrameKind,
    timeout: BcmTimeval,
    throttle: BcmTimeval,
) -> Vec<u8> {
    let mut head = BcmMsgHead::new(Opcode::RxSetup, can_id);
    head.flags = RX_FILTER_ID;
    if !timeout.is_zero() || !throttle.is_zero() {
        head.flags |= SETTIMER | STARTTIMER;
    }
    head.ival1 = timeout;
    head.ival2 = throttle;
    encode_with_frames(head, &BcmFrames::empty(kind))
}

/// RX_DELETE：取消 `can_id` 的入站订阅
pub fn encode_rx_delete(can_id: u32, kind: FrameKind) -> Vec<u8> {
    encode_with_frames(BcmMsgHead::new(Opcode::RxDelete, can_id), &BcmFrames::empty(kind))
}

/// 通用编码：按 `message.frames` 改写 `nframes` 与 CAN_FD_FRAME 后输出
///
/// 主要用于构造内核方向的通知（例如测试中模拟 RX_CHANGED）。
pub fn encode(message: &BcmMessage) -> Result<Vec<u8>, ProtocolError> {
    if message.frames.len() > MAX_NFRAMES {
        return Err(ProtocolError::TooManyFrames {
            nframes: message.frames.len(),
            max: MAX_NFRAMES,
        });
    }
    Ok(encode_with_frames(message.head, &message.frames))
}

fn decode_classic_frame(index: usize, buf: &[u8]) -> Result<CanFrame, ProtocolError> {
    let len = buf[4] as usize;
    if len > CAN_MAX_DLEN {
        return Err(ProtocolError::InvalidFrameLength { index, len });
    }
    CanFrame::from_raw_id(read_u32_ne(buf), &buf[8..8 + len])
        .map_err(|_| ProtocolError::InvalidFrameLength { index, len })
}

fn decode_fd_frame(index: usize, buf: &[u8]) -> Result<CanFdFrame, ProtocolError> {
    let len = buf[4] as usize;
    if len > CANFD_MAX_DLEN {
        return Err(ProtocolError::InvalidFrameLength { index, len });
    }
    CanFdFrame::from_raw_id(read_u32_ne(buf), &buf[8..8 + len])
        .map(|frame| frame.with_flags(buf[5]))
        .map_err(|_| ProtocolError::InvalidFrameLength { index, len })
}

/// 解码一条入站 BCM 消息
///
/// 校验顺序：
/// 1. 长度不足头部 → `Truncated`
/// 2. 未知操作码 → `UnknownOpcode`
/// 3. `nframes > 256` → `TooManyFrames`
/// 4. 长度 != 头部 + `nframes × 帧大小`（帧大小由 CAN_FD_FRAME 决定）→ `SizeMismatch`
/// 5. 帧 `len` 超出容量 → `InvalidFrameLength`
///
/// 成功时帧按线上顺序返回，`len` 之后的字节一律清零。
pub fn decode(buf: &[u8]) -> Result<BcmMessage, ProtocolError> {
    let head = BcmMsgHead::decode(buf)?;

    let nframes = head.nframes as usize;
    if nframes > MAX_NFRAMES {
        return Err(ProtocolError::TooManyFrames {
            nframes,
            max: MAX_NFRAMES,
        });
    }

    let expected = head.expected_size();
    if buf.len() != expected {
        return Err(ProtocolError::SizeMismatch {
            expected,
            actual: buf.len(),
        });
    }

    let body = &buf[BCM_HEAD_SIZE..];
    let frames = match head.frame_kind() {
        FrameKind::Classic => BcmFrames::Classic(
            body.chunks_exact(CAN_MTU)
                .enumerate()
                .map(|(index, slot)| decode_classic_frame(index, slot))
                .collect::<Result<_, _>>()?,
        ),
        FrameKind::Fd => BcmFrames::Fd(
            body.chunks_exact(CANFD_MTU)
                .enumerate()
                .map(|(index, slot)| decode_fd_frame(index, slot))
                .collect::<Result<_, _>>()?,
        ),
    };

    Ok(BcmMessage { head, frames })
}
