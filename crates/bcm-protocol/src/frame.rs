//! CAN / CAN FD 帧模型
//!
//! `CanFrame` 对应内核 `struct can_frame`（最多 8 字节），`CanFdFrame` 对应
//! `struct canfd_frame`（最多 64 字节，带 flags 字节）。两者通过 [`Frame`]
//! 标签联合统一表示，编解码按标签分派。
//!
//! # 不变量
//!
//! - `len` 永远不超过对应类型的容量，构造函数在越界时直接返回错误
//! - `len` 之后的数据字节恒为 0，因此可以直接按值比较
//!
//! # 转换
//!
//! - Classic → FD：无损，数据区补零，flags 为 0
//! - FD → Classic：有损（FD flags 被丢弃），`len > 8` 时返回
//!   [`FrameError::LossyConversion`]，绝不静默截断

use crate::constants::*;
use thiserror::Error;

/// 帧构造/转换错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("Data too long: {len} bytes (max {max})")]
    DataTooLong { len: usize, max: usize },

    #[error("Invalid CAN FD data length: {0} (valid: 0-8, 12, 16, 20, 24, 32, 48, 64)")]
    InvalidFdLength(usize),

    #[error("Invalid standard ID: 0x{0:X} (max 0x7FF)")]
    InvalidStandardId(u32),

    #[error("Invalid extended ID: 0x{0:X} (max 0x1FFFFFFF)")]
    InvalidExtendedId(u32),

    #[error("Lossy conversion: CAN FD frame carries {len} bytes, classic frames hold at most 8")]
    LossyConversion { len: usize },
}

/// 帧类型标签
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FrameKind {
    /// CAN 2.0（最多 8 字节）
    Classic,
    /// CAN FD（最多 64 字节）
    Fd,
}

impl FrameKind {
    /// 由 `is_fd` 布尔值得到帧类型
    pub fn from_fd(is_fd: bool) -> Self {
        if is_fd { Self::Fd } else { Self::Classic }
    }

    pub fn is_fd(self) -> bool {
        self == Self::Fd
    }

    /// 单帧在 BCM 消息中的线上大小
    pub fn frame_size(self) -> usize {
        match self {
            Self::Classic => CAN_MTU,
            Self::Fd => CANFD_MTU,
        }
    }

    /// 数据区容量
    pub fn max_len(self) -> usize {
        match self {
            Self::Classic => CAN_MAX_DLEN,
            Self::Fd => CANFD_MAX_DLEN,
        }
    }
}

/// 检查长度是否为合法的 CAN FD 数据长度
pub fn is_valid_fd_length(len: usize) -> bool {
    CANFD_VALID_LENGTHS.contains(&len)
}

/// 向上取整到下一个合法的 CAN FD 数据长度，超过 64 时返回 `None`
pub fn fd_length_round_up(len: usize) -> Option<usize> {
    CANFD_VALID_LENGTHS.iter().copied().find(|&valid| valid >= len)
}

fn standard_raw_id(id: u16) -> Result<u32, FrameError> {
    let id = id as u32;
    if id > CAN_SFF_MASK {
        return Err(FrameError::InvalidStandardId(id));
    }
    Ok(id)
}

fn extended_raw_id(id: u32) -> Result<u32, FrameError> {
    if id > CAN_EFF_MASK {
        return Err(FrameError::InvalidExtendedId(id));
    }
    Ok(id | CAN_EFF_FLAG)
}

/// 从原始 can_id 中剥离标志位，得到 11/29 位标识符
fn masked_id(raw_id: u32) -> u32 {
    if raw_id & CAN_EFF_FLAG != 0 {
        raw_id & CAN_EFF_MASK
    } else {
        raw_id & CAN_SFF_MASK
    }
}

fn copy_data<const N: usize>(data: &[u8]) -> [u8; N] {
    let mut fixed = [0u8; N];
    fixed[..data.len()].copy_from_slice(data);
    fixed
}

/// CAN 2.0 帧（`struct can_frame`）
///
/// # 示例
///
/// ```rust
/// use bcm_protocol::CanFrame;
///
/// let frame = CanFrame::new_standard(0x123, &[1, 2, 3, 4]).unwrap();
/// assert_eq!(frame.id(), 0x123);
/// assert_eq!(frame.data(), &[1, 2, 3, 4]);
///
/// // 超过 8 字节直接失败
/// assert!(CanFrame::new_standard(0x123, &[0; 9]).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(into = "serde_repr::ClassicRepr", try_from = "serde_repr::ClassicRepr")
)]
pub struct CanFrame {
    /// 原始 can_id（含 EFF/RTR/ERR 标志位）
    id: u32,
    /// 有效数据长度 (0-8)
    len: u8,
    /// 帧数据（固定 8 字节，未使用部分为 0）
    data: [u8; CAN_MAX_DLEN],
}

impl CanFrame {
    /// 创建标准帧（11-bit ID）
    pub fn new_standard(id: u16, data: &[u8]) -> Result<Self, FrameError> {
        Self::from_raw_id(standard_raw_id(id)?, data)
    }

    /// 创建扩展帧（29-bit ID，自动设置 EFF 标志）
    pub fn new_extended(id: u32, data: &[u8]) -> Result<Self, FrameError> {
        Self::from_raw_id(extended_raw_id(id)?, data)
    }

    /// 创建远程帧（RTR），`len` 为请求的数据长度
    pub fn new_remote(raw_id: u32, len: u8) -> Result<Self, FrameError> {
        if len as usize > CAN_MAX_DLEN {
            return Err(FrameError::DataTooLong {
                len: len as usize,
                max: CAN_MAX_DLEN,
            });
        }
        Ok(Self {
            id: raw_id | CAN_RTR_FLAG,
            len,
            data: [0; CAN_MAX_DLEN],
        })
    }

    /// 以原始 can_id 创建帧（标志位原样保留）
    pub fn from_raw_id(raw_id: u32, data: &[u8]) -> Result<Self, FrameError> {
        if data.len() > CAN_MAX_DLEN {
            return Err(FrameError::DataTooLong {
                len: data.len(),
                max: CAN_MAX_DLEN,
            });
        }
        Ok(Self {
            id: raw_id,
            len: data.len() as u8,
            data: copy_data(data),
        })
    }

    /// 原始 can_id（含标志位）
    pub fn raw_id(&self) -> u32 {
        self.id
    }

    /// 去除标志位后的标识符
    pub fn id(&self) -> u32 {
        masked_id(self.id)
    }

    pub fn is_extended(&self) -> bool {
        self.id & CAN_EFF_FLAG != 0
    }

    pub fn is_remote(&self) -> bool {
        self.id & CAN_RTR_FLAG != 0
    }

    pub fn is_error(&self) -> bool {
        self.id & CAN_ERR_FLAG != 0
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// 有效数据切片
    ///
    /// 远程帧的 `len` 表示请求长度，数据区全为 0。
    pub fn data(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }

    /// 完整数据区（固定 8 字节）
    pub fn padded_data(&self) -> &[u8; CAN_MAX_DLEN] {
        &self.data
    }
}

/// CAN FD 帧（`struct canfd_frame`）
///
/// # 示例
///
/// ```rust
/// use bcm_protocol::{CanFdFrame, CANFD_BRS};
///
/// let frame = CanFdFrame::new_standard(0x567, &[0xAB; 16]).unwrap().with_flags(CANFD_BRS);
/// assert_eq!(frame.len(), 16);
/// assert!(frame.is_brs());
///
/// // 13 不是合法的 FD 长度
/// assert!(CanFdFrame::new_standard(0x567, &[0; 13]).is_err());
/// // new_padded 会补零到 16
/// assert_eq!(CanFdFrame::new_padded(0x567, &[0; 13]).unwrap().len(), 16);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(into = "serde_repr::FdRepr", try_from = "serde_repr::FdRepr")
)]
pub struct CanFdFrame {
    /// 原始 can_id（含 EFF/ERR 标志位）
    id: u32,
    /// 有效数据长度（合法 FD 长度之一）
    len: u8,
    /// CANFD_BRS / CANFD_ESI / CANFD_FDF
    flags: u8,
    data: [u8; CANFD_MAX_DLEN],
}

impl CanFdFrame {
    /// 创建标准帧（11-bit ID）
    pub fn new_standard(id: u16, data: &[u8]) -> Result<Self, FrameError> {
        Self::from_raw_id(standard_raw_id(id)?, data)
    }

    /// 创建扩展帧（29-bit ID，自动设置 EFF 标志）
    pub fn new_extended(id: u32, data: &[u8]) -> Result<Self, FrameError> {
        Self::from_raw_id(extended_raw_id(id)?, data)
    }

    /// 以原始 can_id 创建帧
    ///
    /// # 错误
    /// - `DataTooLong`: 超过 64 字节
    /// - `InvalidFdLength`: 长度不在合法 DLC 映射表内
    pub fn from_raw_id(raw_id: u32, data: &[u8]) -> Result<Self, FrameError> {
        if data.len() > CANFD_MAX_DLEN {
            return Err(FrameError::DataTooLong {
                len: data.len(),
                max: CANFD_MAX_DLEN,
            });
        }
        if !is_valid_fd_length(data.len()) {
            return Err(FrameError::InvalidFdLength(data.len()));
        }
        Ok(Self {
            id: raw_id,
            len: data.len() as u8,
            flags: 0,
            data: copy_data(data),
        })
    }

    /// 以原始 can_id 创建帧，长度向上补齐到合法 FD 长度（补 0）
    pub fn new_padded(raw_id: u32, data: &[u8]) -> Result<Self, FrameError> {
        let padded_len = fd_length_round_up(data.len()).ok_or(FrameError::DataTooLong {
            len: data.len(),
            max: CANFD_MAX_DLEN,
        })?;
        Ok(Self {
            id: raw_id,
            len: padded_len as u8,
            flags: 0,
            data: copy_data(data),
        })
    }

    /// 设置 FD flags（CANFD_BRS / CANFD_ESI / CANFD_FDF）
    pub fn with_flags(mut self, flags: u8) -> Self {
        self.flags = flags;
        self
    }

    pub fn raw_id(&self) -> u32 {
        self.id
    }

    pub fn id(&self) -> u32 {
        masked_id(self.id)
    }

    pub fn is_extended(&self) -> bool {
        self.id & CAN_EFF_FLAG != 0
    }

    pub fn flags(&self) -> u8 {
        self.flags
    }

    /// 是否启用波特率切换
    pub fn is_brs(&self) -> bool {
        self.flags & CANFD_BRS != 0
    }

    /// 发送节点是否处于错误被动状态
    pub fn is_esi(&self) -> bool {
        self.flags & CANFD_ESI != 0
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn data(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }

    pub fn padded_data(&self) -> &[u8; CANFD_MAX_DLEN] {
        &self.data
    }
}

impl From<CanFrame> for CanFdFrame {
    /// 无损转换：can_id 原样保留，数据区补零，flags 为 0
    fn from(frame: CanFrame) -> Self {
        Self {
            id: frame.id,
            len: frame.len,
            flags: 0,
            data: copy_data(frame.data()),
        }
    }
}

impl TryFrom<CanFdFrame> for CanFrame {
    type Error = FrameError;

    /// 有损转换：FD flags 被丢弃；`len > 8` 时返回错误而不是截断
    fn try_from(frame: CanFdFrame) -> Result<Self, Self::Error> {
        if frame.len() > CAN_MAX_DLEN {
            return Err(FrameError::LossyConversion { len: frame.len() });
        }
        Ok(Self {
            id: frame.id,
            len: frame.len,
            data: copy_data(frame.data()),
        })
    }
}

/// 帧标签联合
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Frame {
    Classic(CanFrame),
    Fd(CanFdFrame),
}

impl Frame {
    pub fn kind(&self) -> FrameKind {
        match self {
            Self::Classic(_) => FrameKind::Classic,
            Self::Fd(_) => FrameKind::Fd,
        }
    }

    pub fn raw_id(&self) -> u32 {
        match self {
            Self::Classic(f) => f.raw_id(),
            Self::Fd(f) => f.raw_id(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Classic(f) => f.len(),
            Self::Fd(f) => f.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn data(&self) -> &[u8] {
        match self {
            Self::Classic(f) => f.data(),
            Self::Fd(f) => f.data(),
        }
    }

    /// 显式转换到目标类型（规则见模块文档）
    pub fn into_kind(self, kind: FrameKind) -> Result<Frame, FrameError> {
        match (self, kind) {
            (Self::Classic(f), FrameKind::Fd) => Ok(Self::Fd(f.into())),
            (Self::Fd(f), FrameKind::Classic) => Ok(Self::Classic(CanFrame::try_from(f)?)),
            (same, _) => Ok(same),
        }
    }

    pub fn into_classic(self) -> Result<CanFrame, FrameError> {
        match self {
            Self::Classic(f) => Ok(f),
            Self::Fd(f) => CanFrame::try_from(f),
        }
    }

    pub fn into_fd(self) -> CanFdFrame {
        match self {
            Self::Classic(f) => f.into(),
            Self::Fd(f) => f,
        }
    }
}

impl From<CanFrame> for Frame {
    fn from(frame: CanFrame) -> Self {
        Self::Classic(frame)
    }
}

impl From<CanFdFrame> for Frame {
    fn from(frame: CanFdFrame) -> Self {
        Self::Fd(frame)
    }
}

/// serde 中间表示：定长数组换成 `Vec<u8>`，反序列化时走构造函数校验
#[cfg(feature = "serde")]
mod serde_repr {
    use super::{CanFdFrame, CanFrame, FrameError};

    #[derive(serde::Serialize, serde::Deserialize)]
    pub struct ClassicRepr {
        pub id: u32,
        pub data: Vec<u8>,
    }

    #[derive(serde::Serialize, serde::Deserialize)]
    pub struct FdRepr {
        pub id: u32,
        #[serde(default)]
        pub flags: u8,
        pub data: Vec<u8>,
    }

    impl From<CanFrame> for ClassicRepr {
        fn from(frame: CanFrame) -> Self {
            Self {
                id: frame.raw_id(),
                data: frame.data().to_vec(),
            }
        }
    }

    impl TryFrom<ClassicRepr> for CanFrame {
        type Error = FrameError;

        fn try_from(repr: ClassicRepr) -> Result<Self, Self::Error> {
            CanFrame::from_raw_id(repr.id, &repr.data)
        }
    }

    impl From<CanFdFrame> for FdRepr {
        fn from(frame: CanFdFrame) -> Self {
            Self {
                id: frame.raw_id(),
                flags: frame.flags(),
                data: frame.data().to_vec(),
            }
        }
    }

    impl TryFrom<FdRepr> for CanFdFrame {
        type Error = FrameError;

        fn try_from(repr: FdRepr) -> Result<Self, Self::Error> {
            Ok(CanFdFrame::from_raw_id(repr.id, &repr.data)?.with_flags(repr.flags))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classic_standard_frame() {
        let frame = CanFrame::new_standard(0x123, &[1, 2, 3]).unwrap();
        assert_eq!(frame.raw_id(), 0x123);
        assert_eq!(frame.id(), 0x123);
        assert_eq!(frame.len(), 3);
        assert_eq!(frame.data(), &[1, 2, 3]);
        assert_eq!(frame.padded_data(), &[1, 2, 3, 0, 0, 0, 0, 0]);
        assert!(!frame.is_extended());
        assert!(!frame.is_remote());
    }

    #[test]
    fn test_classic_extended_frame_sets_eff_flag() {
        let frame = CanFrame::new_extended(0x1234_5678, &[0xAA]).unwrap();
        assert_eq!(frame.raw_id(), 0x1234_5678 | CAN_EFF_FLAG);
        assert_eq!(frame.id(), 0x1234_5678);
        assert!(frame.is_extended());
    }

    #[test]
    fn test_classic_rejects_out_of_range() {
        assert_eq!(
            CanFrame::new_standard(0x123, &[0; 9]),
            Err(FrameError::DataTooLong { len: 9, max: 8 })
        );
        assert_eq!(
            CanFrame::new_standard(0x800, &[]),
            Err(FrameError::InvalidStandardId(0x800))
        );
        assert_eq!(
            CanFrame::new_extended(0x2000_0000, &[]),
            Err(FrameError::InvalidExtendedId(0x2000_0000))
        );
        assert!(CanFrame::new_remote(0x100, 9).is_err());
    }

    #[test]
    fn test_remote_frame() {
        let frame = CanFrame::new_remote(0x100, 4).unwrap();
        assert!(frame.is_remote());
        assert_eq!(frame.id(), 0x100);
        assert_eq!(frame.len(), 4);
        assert_eq!(frame.data(), &[0, 0, 0, 0]);
    }

    #[test]
    fn test_fd_valid_lengths() {
        for len in 0..=64usize {
            let result = CanFdFrame::new_standard(0x10, &vec![0x5A; len]);
            assert_eq!(result.is_ok(), is_valid_fd_length(len), "len={}", len);
        }
        assert_eq!(
            CanFdFrame::new_standard(0x10, &[0; 65]),
            Err(FrameError::DataTooLong { len: 65, max: 64 })
        );
    }

    #[test]
    fn test_fd_length_round_up() {
        assert_eq!(fd_length_round_up(0), Some(0));
        assert_eq!(fd_length_round_up(8), Some(8));
        assert_eq!(fd_length_round_up(9), Some(12));
        assert_eq!(fd_length_round_up(33), Some(48));
        assert_eq!(fd_length_round_up(64), Some(64));
        assert_eq!(fd_length_round_up(65), None);
    }

    #[test]
    fn test_fd_padded_zero_fills() {
        let frame = CanFdFrame::new_padded(0x10, &[0xFF; 9]).unwrap();
        assert_eq!(frame.len(), 12);
        assert_eq!(&frame.data()[..9], &[0xFF; 9]);
        assert_eq!(&frame.data()[9..], &[0, 0, 0]);
    }

    #[test]
    fn test_fd_flags() {
        let frame = CanFdFrame::new_standard(0x10, &[1])
            .unwrap()
            .with_flags(CANFD_BRS | CANFD_ESI);
        assert!(frame.is_brs());
        assert!(frame.is_esi());
        assert_eq!(frame.flags(), CANFD_BRS | CANFD_ESI);
    }

    #[test]
    fn test_classic_to_fd_is_lossless() {
        let classic = CanFrame::new_extended(0x1ABC, &[1, 2, 3, 4, 5]).unwrap();
        let fd = CanFdFrame::from(classic);
        assert_eq!(fd.raw_id(), classic.raw_id());
        assert_eq!(fd.data(), classic.data());
        assert_eq!(fd.flags(), 0);
        assert_eq!(CanFrame::try_from(fd), Ok(classic));
    }

    #[test]
    fn test_fd_to_classic_rejects_long_payload() {
        let fd = CanFdFrame::new_standard(0x10, &[0; 12]).unwrap();
        assert_eq!(
            CanFrame::try_from(fd),
            Err(FrameError::LossyConversion { len: 12 })
        );
    }

    #[test]
    fn test_fd_to_classic_drops_flags() {
        let fd = CanFdFrame::new_standard(0x10, &[9, 8])
            .unwrap()
            .with_flags(CANFD_BRS);
        let classic = CanFrame::try_from(fd).unwrap();
        assert_eq!(classic.data(), &[9, 8]);
        assert_eq!(classic.raw_id(), 0x10);
    }

    #[test]
    fn test_frame_into_kind() {
        let classic: Frame = CanFrame::new_standard(0x7FF, &[1]).unwrap().into();
        assert_eq!(classic.kind(), FrameKind::Classic);

        let fd = classic.into_kind(FrameKind::Fd).unwrap();
        assert_eq!(fd.kind(), FrameKind::Fd);
        assert_eq!(fd.data(), &[1]);

        let back = fd.into_kind(FrameKind::Classic).unwrap();
        assert_eq!(back, classic);

        let long: Frame = CanFdFrame::new_standard(0x1, &[0; 64]).unwrap().into();
        assert!(long.into_kind(FrameKind::Classic).is_err());
        assert_eq!(long.into_kind(FrameKind::Fd), Ok(long));
    }

    #[test]
    fn test_frame_kind_sizes() {
        assert_eq!(FrameKind::Classic.frame_size(), 16);
        assert_eq!(FrameKind::Fd.frame_size(), 72);
        assert_eq!(FrameKind::from_fd(true), FrameKind::Fd);
        assert!(!FrameKind::from_fd(false).is_fd());
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_serde_validates_on_deserialize() {
        let frame = CanFdFrame::new_standard(0x567, &[0xDE; 16]).unwrap();
        let json = serde_json::to_string(&frame).unwrap();
        let back: CanFdFrame = serde_json::from_str(&json).unwrap();
        assert_eq!(back, frame);

        let bad = r#"{"id":291,"data":[0,0,0,0,0,0,0,0,0]}"#;
        assert!(serde_json::from_str::<CanFrame>(bad).is_err());
    }
}
