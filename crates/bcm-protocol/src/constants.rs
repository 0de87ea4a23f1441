//! 协议常量定义
//!
//! 数值与 Linux 内核头文件 `linux/can.h`、`linux/can/bcm.h` 保持一致。

// ============================================================================
// CAN ID Flags (in CAN frame identifier)
// ============================================================================

/// Extended frame format flag (29-bit ID)
pub const CAN_EFF_FLAG: u32 = 0x8000_0000;
/// Remote transmission request flag
pub const CAN_RTR_FLAG: u32 = 0x4000_0000;
/// Error message frame flag
pub const CAN_ERR_FLAG: u32 = 0x2000_0000;

// ============================================================================
// CAN ID Masks
// ============================================================================

/// Standard frame format mask (11-bit ID)
pub const CAN_SFF_MASK: u32 = 0x0000_07FF;
/// Extended frame format mask (29-bit ID)
pub const CAN_EFF_MASK: u32 = 0x1FFF_FFFF;

// ============================================================================
// Frame Constants
// ============================================================================

/// Maximum data length for classic CAN
pub const CAN_MAX_DLEN: usize = 8;
/// Maximum data length for CAN FD
pub const CANFD_MAX_DLEN: usize = 64;

/// `struct can_frame` 的线上大小
pub const CAN_MTU: usize = 16;
/// `struct canfd_frame` 的线上大小
pub const CANFD_MTU: usize = 72;

/// CAN FD 合法的数据长度（DLC 0-15 对应的字节数）
pub const CANFD_VALID_LENGTHS: [usize; 16] = [0, 1, 2, 3, 4, 5, 6, 7, 8, 12, 16, 20, 24, 32, 48, 64];

// ============================================================================
// CAN FD Frame Flags (canfd_frame.flags)
// ============================================================================

/// Bit rate switch (second bitrate for payload data)
pub const CANFD_BRS: u8 = 0x01;
/// Error state indicator of the transmitting node
pub const CANFD_ESI: u8 = 0x02;
/// Mark CAN FD for dual use of struct canfd_frame
pub const CANFD_FDF: u8 = 0x04;

// ============================================================================
// BCM Message Flags (bcm_msg_head.flags)
// ============================================================================

/// 设置 ival1 / ival2 / count
pub const SETTIMER: u32 = 0x0001;
/// 立即按当前定时器参数启动（TX_SETUP）
pub const STARTTIMER: u32 = 0x0002;
/// count 计数结束时产生 TX_EXPIRED 通知
pub const TX_COUNTEVT: u32 = 0x0004;
/// 数据变化时立即发送一次
pub const TX_ANNOUNCE: u32 = 0x0008;
/// 用 msg_head 的 can_id 覆盖帧内 can_id
pub const TX_CP_CAN_ID: u32 = 0x0010;
/// 只按 can_id 过滤（不做内容比较）
pub const RX_FILTER_ID: u32 = 0x0020;
/// 比较 DLC 变化
pub const RX_CHECK_DLC: u32 = 0x0040;
/// 超时后不自动重启定时器
pub const RX_NO_AUTOTIMER: u32 = 0x0080;
/// 超时恢复后发送 RX_CHANGED
pub const RX_ANNOUNCE_RESUME: u32 = 0x0100;
/// 重置多帧发送索引
pub const TX_RESET_MULTI_IDX: u32 = 0x0200;
/// 以 RTR 帧应答
pub const RX_RTR_FRAME: u32 = 0x0400;
/// 帧数组为 `struct canfd_frame`
pub const CAN_FD_FRAME: u32 = 0x0800;

// ============================================================================
// BCM Limits
// ============================================================================

/// 单条 BCM 消息最多携带的帧数（内核 TX_SETUP 多帧序列上限）
pub const MAX_NFRAMES: usize = 256;
