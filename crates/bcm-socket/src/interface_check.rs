//! CAN 接口解析
//!
//! `if_nametoindex()` 取得接口索引，`ioctl(SIOCGIFFLAGS)` 读取管理态 UP 标志。
//! 只做读取，不需要 root 或 CAP_NET_ADMIN。

use crate::{SocketDeviceError, SocketDeviceErrorKind, SocketError};
use libc::{AF_INET, IFF_UP, SIOCGIFFLAGS, SOCK_DGRAM, if_nametoindex, ifreq};
use std::ffi::CString;
use std::io;
use tracing::trace;

/// ifr_name 为 IFNAMSIZ = 16 字节（含结尾 NUL）
const MAX_IFACE_NAME_LEN: usize = libc::IFNAMSIZ - 1;

/// 接口解析结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterfaceInfo {
    /// 内核接口索引（`sockaddr_can.can_ifindex`）
    pub index: u32,
    /// IFF_UP 是否置位
    pub is_up: bool,
}

struct FdGuard(libc::c_int);

impl Drop for FdGuard {
    fn drop(&mut self) {
        if self.0 >= 0 {
            unsafe { libc::close(self.0) };
        }
    }
}

/// 把接口名解析为索引并读取 UP 状态
///
/// # 参数
/// - `interface`: 接口名称（如 "can0"、"vcan0"）
///
/// # 错误
/// - `SocketError::Device(InvalidName)`: 名称超过 15 字符或包含 NUL
/// - `SocketError::Device(NotFound)`: 接口不存在
/// - `SocketError::Io`: socket/ioctl 失败
pub fn resolve_interface(interface: &str) -> Result<InterfaceInfo, SocketError> {
    // 长度必须在调用 if_nametoindex 之前检查
    if interface.is_empty() || interface.len() > MAX_IFACE_NAME_LEN {
        return Err(SocketDeviceError::new(
            SocketDeviceErrorKind::InvalidName,
            format!(
                "Interface name '{}' must be 1..={} characters",
                interface, MAX_IFACE_NAME_LEN
            ),
        )
        .into());
    }

    let c_iface = CString::new(interface).map_err(|e| {
        SocketDeviceError::new(
            SocketDeviceErrorKind::InvalidName,
            format!("Invalid interface name: {}", e),
        )
    })?;

    let index = unsafe { if_nametoindex(c_iface.as_ptr()) };
    if index == 0 {
        let errno = io::Error::last_os_error();
        return Err(SocketDeviceError::new(
            SocketDeviceErrorKind::NotFound,
            format!(
                "CAN interface '{}' does not exist ({}). Please create it first:\n  sudo ip link add dev {} type vcan",
                interface, errno, interface
            ),
        )
        .into());
    }

    let mut ifr: ifreq = unsafe { std::mem::zeroed() };
    let name_bytes = c_iface.as_bytes_with_nul();
    for (dst, &src) in ifr.ifr_name.iter_mut().zip(name_bytes) {
        *dst = src as libc::c_char;
    }

    let sockfd = unsafe { libc::socket(AF_INET, SOCK_DGRAM | libc::SOCK_CLOEXEC, 0) };
    if sockfd < 0 {
        return Err(SocketError::Io(io::Error::last_os_error()));
    }
    let _guard = FdGuard(sockfd);

    let result = unsafe { libc::ioctl(sockfd, SIOCGIFFLAGS, &mut ifr as *mut _ as *mut libc::c_void) };
    if result < 0 {
        return Err(SocketError::Io(io::Error::last_os_error()));
    }

    // ifru_flags 是 ifr_ifru union 的第一个字段（c_short）
    let flags = unsafe { *(std::ptr::addr_of!(ifr.ifr_ifru) as *const libc::c_short) };
    let is_up = (flags as i32 & IFF_UP) != 0;

    trace!(
        "Interface '{}' resolved: index={}, {}",
        interface,
        index,
        if is_up { "UP" } else { "DOWN" }
    );
    Ok(InterfaceInfo { index, is_up })
}
