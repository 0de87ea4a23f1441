//! 数据报传输抽象
//!
//! reactor 只需要「整条发送 / 整条接收 / 非阻塞」三个能力，外加一个可注册到
//! poll 的 fd。内核 BCM socket 和 `UnixDatagram` 都满足这一约定，
//! 后者在测试里扮演内核。

use std::io;
use std::os::fd::AsRawFd;
use std::os::unix::net::UnixDatagram;

/// 面向消息的非阻塞传输
///
/// 语义约定：
/// - `send` 一次写入一条完整数据报，返回写入的字节数
/// - `recv` 一次读出一条完整数据报；缓冲区不足时超出部分被内核丢弃
/// - 非阻塞模式下没有数据时返回 `io::ErrorKind::WouldBlock`
pub trait DatagramTransport: AsRawFd + Send {
    fn send(&self, buf: &[u8]) -> io::Result<usize>;
    fn recv(&self, buf: &mut [u8]) -> io::Result<usize>;
    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()>;
}

impl DatagramTransport for UnixDatagram {
    fn send(&self, buf: &[u8]) -> io::Result<usize> {
        UnixDatagram::send(self, buf)
    }

    fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        UnixDatagram::recv(self, buf)
    }

    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        UnixDatagram::set_nonblocking(self, nonblocking)
    }
}
