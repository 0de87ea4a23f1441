//! BCM 消息结构
//!
//! 对应内核 `struct bcm_msg_head` 及其后的帧数组。
//!
//! ## 内存布局
//!
//! 头部字段为 C 结构体的原生布局：`ival1` / `ival2` 是 `struct bcm_timeval`
//! （两个 C `long`），帧数组按 8 字节对齐。因此：
//!
//! | 字段 | 64 位偏移 | 32 位偏移 |
//! |---|---|---|
//! | opcode | 0 | 0 |
//! | flags | 4 | 4 |
//! | count | 8 | 8 |
//! | ival1 | 16 | 12 |
//! | ival2 | 32 | 20 |
//! | can_id | 48 | 28 |
//! | nframes | 52 | 32 |
//! | frames | 56 | 40 |

use crate::constants::{CAN_FD_FRAME, SETTIMER, STARTTIMER};
use crate::frame::{CanFdFrame, CanFrame, Frame, FrameKind};
use crate::{ProtocolError, read_u32_ne};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use std::ffi::c_long;
use std::fmt;
use std::time::Duration;

// ============================================================================
// Layout
// ============================================================================

const LONG_SIZE: usize = std::mem::size_of::<c_long>();

const fn align_up(offset: usize, align: usize) -> usize {
    (offset + align - 1) / align * align
}

/// `struct bcm_timeval` 的大小
pub const BCM_TIMEVAL_SIZE: usize = 2 * LONG_SIZE;

pub(crate) const OPCODE_OFFSET: usize = 0;
pub(crate) const FLAGS_OFFSET: usize = 4;
pub(crate) const COUNT_OFFSET: usize = 8;
pub(crate) const IVAL1_OFFSET: usize = align_up(COUNT_OFFSET + 4, LONG_SIZE);
pub(crate) const IVAL2_OFFSET: usize = IVAL1_OFFSET + BCM_TIMEVAL_SIZE;
pub(crate) const CAN_ID_OFFSET: usize = IVAL2_OFFSET + BCM_TIMEVAL_SIZE;
pub(crate) const NFRAMES_OFFSET: usize = CAN_ID_OFFSET + 4;

/// `struct bcm_msg_head` 的大小（含帧数组前的对齐填充）
pub const BCM_HEAD_SIZE: usize = align_up(NFRAMES_OFFSET + 4, 8);

/// 接收缓冲区容量：头部 + 256 个 FD 帧
pub const BCM_MAX_MESSAGE_SIZE: usize =
    BCM_HEAD_SIZE + crate::constants::MAX_NFRAMES * crate::constants::CANFD_MTU;

/// 给定帧类型和帧数时的线上大小
pub fn message_size(kind: FrameKind, nframes: usize) -> usize {
    BCM_HEAD_SIZE + nframes * kind.frame_size()
}

// ============================================================================
// Opcode
// ============================================================================

/// BCM 操作码（数值与 `linux/can/bcm.h` 一致）
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Opcode {
    // 用户 → 内核
    TxSetup = 1,  // 创建/替换周期发送任务
    TxDelete = 2, // 删除周期发送任务
    TxRead = 3,   // 读取周期发送任务属性
    TxSend = 4,   // 单次发送一帧
    RxSetup = 5,  // 创建接收过滤订阅
    RxDelete = 6, // 删除接收过滤订阅
    RxRead = 7,   // 读取接收订阅属性

    // 内核 → 用户
    TxStatus = 8,   // TX_READ 的应答
    TxExpired = 9,  // count 计数结束通知
    RxStatus = 10,  // RX_READ 的应答
    RxTimeout = 11, // 周期接收超时
    RxChanged = 12, // 接收数据发生变化
}

impl Opcode {
    /// 是否为内核发往用户的通知
    pub fn is_notification(self) -> bool {
        matches!(
            self,
            Opcode::TxStatus
                | Opcode::TxExpired
                | Opcode::RxStatus
                | Opcode::RxTimeout
                | Opcode::RxChanged
        )
    }

    /// 内核头文件中的名字
    pub fn name(self) -> &'static str {
        match self {
            Opcode::TxSetup => "TX_SETUP",
            Opcode::TxDelete => "TX_DELETE",
            Opcode::TxRead => "TX_READ",
            Opcode::TxSend => "TX_SEND",
            Opcode::RxSetup => "RX_SETUP",
            Opcode::RxDelete => "RX_DELETE",
            Opcode::RxRead => "RX_READ",
            Opcode::TxStatus => "TX_STATUS",
            Opcode::TxExpired => "TX_EXPIRED",
            Opcode::RxStatus => "RX_STATUS",
            Opcode::RxTimeout => "RX_TIMEOUT",
            Opcode::RxChanged => "RX_CHANGED",
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Timeval
// ============================================================================

/// `struct bcm_timeval`（秒 + 微秒）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BcmTimeval {
    pub tv_sec: i64,
    pub tv_usec: i64,
}

impl BcmTimeval {
    pub const ZERO: Self = Self {
        tv_sec: 0,
        tv_usec: 0,
    };

    pub const fn new(tv_sec: i64, tv_usec: i64) -> Self {
        Self { tv_sec, tv_usec }
    }

    pub fn is_zero(&self) -> bool {
        self.tv_sec == 0 && self.tv_usec == 0
    }

    /// 转换为 `Duration`，负值返回 `None`
    pub fn to_duration(&self) -> Option<Duration> {
        if self.tv_sec < 0 || self.tv_usec < 0 {
            return None;
        }
        Some(Duration::from_secs(self.tv_sec as u64) + Duration::from_micros(self.tv_usec as u64))
    }

    fn write_to(&self, buf: &mut [u8]) {
        buf[..LONG_SIZE].copy_from_slice(&saturate_long(self.tv_sec).to_ne_bytes());
        buf[LONG_SIZE..BCM_TIMEVAL_SIZE].copy_from_slice(&saturate_long(self.tv_usec).to_ne_bytes());
    }

    fn read_from(buf: &[u8]) -> Self {
        Self {
            tv_sec: read_long_ne(&buf[..LONG_SIZE]),
            tv_usec: read_long_ne(&buf[LONG_SIZE..BCM_TIMEVAL_SIZE]),
        }
    }
}

impl From<Duration> for BcmTimeval {
    /// 微秒以下精度被舍去，秒数超出 `i64` 时饱和
    fn from(duration: Duration) -> Self {
        Self {
            tv_sec: i64::try_from(duration.as_secs()).unwrap_or(i64::MAX),
            tv_usec: duration.subsec_micros() as i64,
        }
    }
}

fn saturate_long(value: i64) -> c_long {
    c_long::try_from(value).unwrap_or(if value < 0 { c_long::MIN } else { c_long::MAX })
}

fn read_long_ne(bytes: &[u8]) -> i64 {
    let mut raw = [0u8; LONG_SIZE];
    raw.copy_from_slice(bytes);
    c_long::from_ne_bytes(raw) as i64
}

// ============================================================================
// Message Head
// ============================================================================

/// BCM 消息头（`struct bcm_msg_head`）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BcmMsgHead {
    pub opcode: Opcode,
    pub flags: u32,
    /// 以 `ival1` 为间隔的重复次数
    pub count: u32,
    pub ival1: BcmTimeval,
    /// 稳态周期
    pub ival2: BcmTimeval,
    pub can_id: u32,
    pub nframes: u32,
}

impl BcmMsgHead {
    /// 创建空消息头（无标志位、无定时器、无帧）
    pub fn new(opcode: Opcode, can_id: u32) -> Self {
        Self {
            opcode,
            flags: 0,
            count: 0,
            ival1: BcmTimeval::ZERO,
            ival2: BcmTimeval::ZERO,
            can_id,
            nframes: 0,
        }
    }

    /// 由 CAN_FD_FRAME 标志位决定的帧类型
    pub fn frame_kind(&self) -> FrameKind {
        FrameKind::from_fd(self.flags & CAN_FD_FRAME != 0)
    }

    pub fn is_fd(&self) -> bool {
        self.frame_kind().is_fd()
    }

    /// 是否同时设置了 SETTIMER | STARTTIMER
    pub fn starts_timer(&self) -> bool {
        self.flags & (SETTIMER | STARTTIMER) == (SETTIMER | STARTTIMER)
    }

    /// 头部声明的完整消息大小
    pub fn expected_size(&self) -> usize {
        message_size(self.frame_kind(), self.nframes as usize)
    }

    /// 编码到缓冲区头部（`buf.len() >= BCM_HEAD_SIZE`，填充字节写 0）
    pub fn encode(&self, buf: &mut [u8]) {
        buf[..BCM_HEAD_SIZE].fill(0);
        buf[OPCODE_OFFSET..OPCODE_OFFSET + 4].copy_from_slice(&u32::from(self.opcode).to_ne_bytes());
        buf[FLAGS_OFFSET..FLAGS_OFFSET + 4].copy_from_slice(&self.flags.to_ne_bytes());
        buf[COUNT_OFFSET..COUNT_OFFSET + 4].copy_from_slice(&self.count.to_ne_bytes());
        self.ival1.write_to(&mut buf[IVAL1_OFFSET..IVAL1_OFFSET + BCM_TIMEVAL_SIZE]);
        self.ival2.write_to(&mut buf[IVAL2_OFFSET..IVAL2_OFFSET + BCM_TIMEVAL_SIZE]);
        buf[CAN_ID_OFFSET..CAN_ID_OFFSET + 4].copy_from_slice(&self.can_id.to_ne_bytes());
        buf[NFRAMES_OFFSET..NFRAMES_OFFSET + 4].copy_from_slice(&self.nframes.to_ne_bytes());
    }

    /// 从缓冲区头部解码
    ///
    /// # 错误
    /// - `Truncated`: 缓冲区小于 `BCM_HEAD_SIZE`
    /// - `UnknownOpcode`: 操作码不在内核定义范围内
    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        if buf.len() < BCM_HEAD_SIZE {
            return Err(ProtocolError::Truncated {
                actual: buf.len(),
                min: BCM_HEAD_SIZE,
            });
        }

        let raw_opcode = read_u32_ne(&buf[OPCODE_OFFSET..]);
        let opcode =
            Opcode::try_from(raw_opcode).map_err(|_| ProtocolError::UnknownOpcode(raw_opcode))?;

        Ok(Self {
            opcode,
            flags: read_u32_ne(&buf[FLAGS_OFFSET..]),
            count: read_u32_ne(&buf[COUNT_OFFSET..]),
            ival1: BcmTimeval::read_from(&buf[IVAL1_OFFSET..IVAL1_OFFSET + BCM_TIMEVAL_SIZE]),
            ival2: BcmTimeval::read_from(&buf[IVAL2_OFFSET..IVAL2_OFFSET + BCM_TIMEVAL_SIZE]),
            can_id: read_u32_ne(&buf[CAN_ID_OFFSET..]),
            nframes: read_u32_ne(&buf[NFRAMES_OFFSET..]),
        })
    }
}

// ============================================================================
// Frames
// ============================================================================

/// 同类型帧序列（全部 Classic 或全部 FD，不允许混合）
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BcmFrames {
    Classic(Vec<CanFrame>),
    Fd(Vec<CanFdFrame>),
}

impl BcmFrames {
    /// 空序列
    pub fn empty(kind: FrameKind) -> Self {
        match kind {
            FrameKind::Classic => Self::Classic(Vec::new()),
            FrameKind::Fd => Self::Fd(Vec::new()),
        }
    }

    /// 由帧数组构建同类型序列
    ///
    /// 输入必须本身是同类型的；若与 `kind` 不同，按 [`Frame::into_kind`]
    /// 的规则逐帧显式转换。
    ///
    /// # 错误
    /// - `MixedFrameKinds`: 输入同时包含 Classic 和 FD 帧
    /// - `Frame(LossyConversion)`: FD → Classic 转换时数据超过 8 字节
    pub fn from_frames(frames: &[Frame], kind: FrameKind) -> Result<Self, ProtocolError> {
        if let Some(first) = frames.first() {
            let first_kind = first.kind();
            if let Some(index) = frames.iter().position(|f| f.kind() != first_kind) {
                return Err(ProtocolError::MixedFrameKinds { index });
            }
        }

        match kind {
            FrameKind::Classic => frames
                .iter()
                .map(|f| f.into_classic())
                .collect::<Result<Vec<_>, _>>()
                .map(Self::Classic)
                .map_err(ProtocolError::from),
            FrameKind::Fd => Ok(Self::Fd(frames.iter().map(|f| f.into_fd()).collect())),
        }
    }

    pub fn kind(&self) -> FrameKind {
        match self {
            Self::Classic(_) => FrameKind::Classic,
            Self::Fd(_) => FrameKind::Fd,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Classic(frames) => frames.len(),
            Self::Fd(frames) => frames.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 第 `index` 帧（标签联合形式）
    pub fn get(&self, index: usize) -> Option<Frame> {
        match self {
            Self::Classic(frames) => frames.get(index).copied().map(Frame::Classic),
            Self::Fd(frames) => frames.get(index).copied().map(Frame::Fd),
        }
    }

    /// 按线上顺序迭代
    pub fn iter(&self) -> impl Iterator<Item = Frame> + '_ {
        (0..self.len()).filter_map(move |i| self.get(i))
    }
}

impl From<Vec<CanFrame>> for BcmFrames {
    fn from(frames: Vec<CanFrame>) -> Self {
        Self::Classic(frames)
    }
}

impl From<Vec<CanFdFrame>> for BcmFrames {
    fn from(frames: Vec<CanFdFrame>) -> Self {
        Self::Fd(frames)
    }
}

/// 一条完整的 BCM 消息：头部 + `nframes` 个同类型帧
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BcmMessage {
    pub head: BcmMsgHead,
    pub frames: BcmFrames,
}

impl BcmMessage {
    pub fn opcode(&self) -> Opcode {
        self.head.opcode
    }

    pub fn can_id(&self) -> u32 {
        self.head.can_id
    }

    pub fn is_fd(&self) -> bool {
        self.frames.kind().is_fd()
    }
}
