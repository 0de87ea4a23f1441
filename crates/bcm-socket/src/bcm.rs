//! CAN_BCM socket
//!
//! `PF_CAN / SOCK_DGRAM / CAN_BCM`，创建时即为非阻塞 + close-on-exec，
//! 通过 `connect()` 绑定到单个接口。一次 `send` 写入一条完整的 BCM 消息，
//! 一次 `recv` 读出一条完整的内核通知，不存在半条消息。
//!
//! BCM socket 不需要 `CAN_RAW_FD_FRAMES` 之类的选项：帧类型由每条消息
//! 头部的 `CAN_FD_FRAME` 标志决定。

use crate::interface_check::resolve_interface;
use crate::transport::DatagramTransport;
use crate::{SocketDeviceError, SocketDeviceErrorKind, SocketError};
use nix::errno::Errno;
use nix::sys::socket::{AddressFamily, SockFlag, SockProtocol, SockType, socket};
use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};
use tracing::{debug, trace};

/// 已连接到接口的 BCM socket
///
/// # 示例
///
/// ```no_run
/// use bcm_socket::{BcmSocket, DatagramTransport};
///
/// let socket = BcmSocket::open("vcan0").unwrap();
/// // socket.send(&bytes) 写入一条完整的 BCM 消息
/// ```
#[derive(Debug)]
pub struct BcmSocket {
    fd: OwnedFd,
    ifindex: u32,
    interface: Option<String>,
}

impl BcmSocket {
    /// 按接口名打开 BCM socket
    ///
    /// 只解析接口索引，不检查 UP 状态（由调用方按配置决定）。
    ///
    /// # 错误
    /// - `SocketError::Device`: 接口名无效 / 接口不存在 / 内核不支持 CAN_BCM
    /// - `SocketError::Io`: socket/connect 失败
    pub fn open(interface: &str) -> Result<Self, SocketError> {
        let info = resolve_interface(interface)?;
        let mut socket = Self::open_index(info.index)?;
        socket.interface = Some(interface.to_string());
        debug!("BCM socket connected to '{}' (index {})", interface, info.index);
        Ok(socket)
    }

    /// 按接口索引打开 BCM socket
    pub fn open_index(ifindex: u32) -> Result<Self, SocketError> {
        let fd = socket(
            AddressFamily::Can,
            SockType::Datagram,
            SockFlag::SOCK_NONBLOCK | SockFlag::SOCK_CLOEXEC,
            SockProtocol::CanBcm,
        )
        .map_err(socket_error)?;

        let mut addr: libc::sockaddr_can = unsafe { std::mem::zeroed() };
        addr.can_family = libc::AF_CAN as libc::sa_family_t;
        addr.can_ifindex = ifindex as libc::c_int;

        let ret = unsafe {
            libc::connect(
                fd.as_raw_fd(),
                &addr as *const libc::sockaddr_can as *const libc::sockaddr,
                std::mem::size_of::<libc::sockaddr_can>() as libc::socklen_t,
            )
        };
        if ret < 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::ENODEV) {
                return Err(SocketDeviceError::new(
                    SocketDeviceErrorKind::NotFound,
                    format!("No CAN interface with index {}", ifindex),
                )
                .into());
            }
            return Err(SocketError::Io(err));
        }

        trace!("BCM socket fd={} connected to ifindex {}", fd.as_raw_fd(), ifindex);
        Ok(Self {
            fd,
            ifindex,
            interface: None,
        })
    }

    /// 接口索引
    pub fn interface_index(&self) -> u32 {
        self.ifindex
    }

    /// 接口名称（`open_index` 打开时为 `None`）
    pub fn interface(&self) -> Option<&str> {
        self.interface.as_deref()
    }
}

fn socket_error(errno: Errno) -> SocketError {
    match errno {
        Errno::EAFNOSUPPORT | Errno::EPROTONOSUPPORT => SocketDeviceError::new(
            SocketDeviceErrorKind::Unsupported,
            format!(
                "CAN_BCM sockets are not supported ({}). Load the module first:\n  sudo modprobe can-bcm",
                errno
            ),
        )
        .into(),
        Errno::EACCES | Errno::EPERM => SocketDeviceError::new(
            SocketDeviceErrorKind::AccessDenied,
            format!("Permission denied while creating CAN_BCM socket ({})", errno),
        )
        .into(),
        other => SocketError::Io(io::Error::from(other)),
    }
}

impl AsRawFd for BcmSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl AsFd for BcmSocket {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl DatagramTransport for BcmSocket {
    fn send(&self, buf: &[u8]) -> io::Result<usize> {
        let ret = unsafe {
            libc::send(
                self.fd.as_raw_fd(),
                buf.as_ptr() as *const libc::c_void,
                buf.len(),
                libc::MSG_NOSIGNAL,
            )
        };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(ret as usize)
    }

    fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        let ret = unsafe {
            libc::recv(
                self.fd.as_raw_fd(),
                buf.as_mut_ptr() as *mut libc::c_void,
                buf.len(),
                0,
            )
        };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(ret as usize)
    }

    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        let mut flag: libc::c_int = nonblocking as libc::c_int;
        let ret = unsafe { libc::ioctl(self.fd.as_raw_fd(), libc::FIONBIO, &mut flag) };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

impl Drop for BcmSocket {
    fn drop(&mut self) {
        trace!("[Auto-Drop] BCM socket on ifindex {} closed", self.ifindex);
    }
}
