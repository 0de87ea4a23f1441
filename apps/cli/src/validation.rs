//! 输入验证模块
//!
//! CAN ID / 数据的解析与帧构建

use anyhow::{Context, Result};
use bcm_protocol::{
    CAN_EFF_FLAG, CAN_EFF_MASK, CAN_SFF_MASK, CANFD_BRS, CanFdFrame, CanFrame, Frame,
};

/// 解析十六进制 CAN ID（可带 `0x` 前缀）
pub fn parse_can_id(input: &str) -> Result<u32> {
    let digits = input
        .trim()
        .trim_start_matches("0x")
        .trim_start_matches("0X");
    if digits.is_empty() {
        anyhow::bail!("CAN ID 不能为空");
    }
    u32::from_str_radix(digits, 16).with_context(|| format!("无效的 CAN ID: '{}'", input))
}

/// 解析十六进制数据
///
/// 允许用空格、`:`、`.`、`-` 分隔字节，例如 `DEADBEEF`、`de:ad:be:ef`。
pub fn parse_data(input: &str) -> Result<Vec<u8>> {
    let compact: String = input
        .chars()
        .filter(|c| !matches!(c, ' ' | ':' | '.' | '-'))
        .collect();
    hex::decode(&compact).with_context(|| format!("无效的十六进制数据: '{}'", input))
}

/// 帧构建参数
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameSpec {
    /// 29-bit 扩展帧
    pub extended: bool,
    /// CAN FD 帧
    pub fd: bool,
    /// FD 比特率切换
    pub brs: bool,
}

/// 构建帧
///
/// FD 帧的数据长度不是合法 DLC 长度时向上补 0。
///
/// # 错误
/// - ID 超出 11-bit / 29-bit 范围
/// - 数据超过 8 字节（Classic）或 64 字节（FD）
pub fn build_frame(id: u32, data: &[u8], spec: FrameSpec) -> Result<Frame> {
    let raw_id = if spec.extended {
        if id > CAN_EFF_MASK {
            anyhow::bail!("扩展帧 ID 0x{:X} 超出 29-bit 范围", id);
        }
        id | CAN_EFF_FLAG
    } else {
        if id > CAN_SFF_MASK {
            anyhow::bail!("标准帧 ID 0x{:X} 超出 11-bit 范围（扩展帧请加 --extended）", id);
        }
        id
    };

    let frame = if spec.fd {
        let flags = if spec.brs { CANFD_BRS } else { 0 };
        Frame::Fd(CanFdFrame::new_padded(raw_id, data)?.with_flags(flags))
    } else {
        if spec.brs {
            anyhow::bail!("--brs 只能用于 CAN FD 帧（请加 --fd）");
        }
        Frame::Classic(CanFrame::from_raw_id(raw_id, data)?)
    };
    Ok(frame)
}
