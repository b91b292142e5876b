//! Socket abstraction under a [`Channel`](crate::channel::Channel).
//!
//! The channel only needs non-blocking read/write, its addresses and the ability
//! to update or drop its readiness registration. [`SocketIo`] captures exactly
//! that, so the write path can be driven by an in-memory socket as well as by a
//! registered `mio` stream.

use crate::configuration::SocketOptions;

use mio::net::TcpStream;
use mio::{Interest, Registry, Token};
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr};
use std::sync::Arc;

/// Non-blocking byte transport owned by one channel.
pub trait SocketIo: Send {
    /// Reads into `buf`; `Ok(0)` means the peer closed. `WouldBlock` means no data.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Writes from `buf`; `WouldBlock` means the send buffer is full.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    fn local_addr(&self) -> io::Result<SocketAddr>;

    fn peer_addr(&self) -> io::Result<SocketAddr>;

    /// Replaces the readiness interest of this socket's registration.
    fn reregister(&mut self, _token: Token, _interest: Interest) -> io::Result<()> {
        Ok(())
    }

    /// Removes this socket from its readiness registry.
    fn deregister(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// Shuts down both directions before the socket is dropped.
    fn shutdown(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A `mio` stream together with the registry it is registered on.
pub(crate) struct MioSocket {
    stream: TcpStream,
    registry: Arc<Registry>,
}

impl MioSocket {
    pub(crate) fn new(stream: TcpStream, registry: Arc<Registry>) -> Self {
        Self { stream, registry }
    }
}

impl SocketIo for MioSocket {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.stream.local_addr()
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.stream.peer_addr()
    }

    fn reregister(&mut self, token: Token, interest: Interest) -> io::Result<()> {
        self.registry.reregister(&mut self.stream, token, interest)
    }

    fn deregister(&mut self) -> io::Result<()> {
        self.registry.deregister(&mut self.stream)
    }

    fn shutdown(&mut self) -> io::Result<()> {
        self.stream.shutdown(Shutdown::Both)
    }
}

/// Applies the configured options to a freshly accepted or connected stream.
pub(crate) fn apply_socket_options(stream: &TcpStream, options: &SocketOptions) -> io::Result<()> {
    stream.set_nodelay(options.nodelay)?;

    #[cfg(unix)]
    {
        use std::os::unix::io::AsRawFd;

        let fd = stream.as_raw_fd();
        if let Some(size) = options.send_buffer_size {
            sys::set_buffer_size(fd, libc::SO_SNDBUF, size)?;
        }
        if let Some(size) = options.recv_buffer_size {
            sys::set_buffer_size(fd, libc::SO_RCVBUF, size)?;
        }
    }

    Ok(())
}

/// Returns the kernel send buffer size (`SO_SNDBUF`) of a socket.
#[cfg(unix)]
pub fn send_buffer_size(fd: std::os::unix::io::RawFd) -> io::Result<usize> {
    sys::buffer_size(fd, libc::SO_SNDBUF)
}

/// Returns the kernel receive buffer size (`SO_RCVBUF`) of a socket.
#[cfg(unix)]
pub fn recv_buffer_size(fd: std::os::unix::io::RawFd) -> io::Result<usize> {
    sys::buffer_size(fd, libc::SO_RCVBUF)
}

#[cfg(unix)]
mod sys {
    use libc::{SOL_SOCKET, c_int, c_void, getsockopt, setsockopt, socklen_t};
    use std::io;
    use std::mem;
    use std::os::unix::io::RawFd;

    pub(super) fn set_buffer_size(fd: RawFd, option: c_int, size: usize) -> io::Result<()> {
        let value = c_int::try_from(size).unwrap_or(c_int::MAX);

        let ret = unsafe {
            setsockopt(
                fd,
                SOL_SOCKET,
                option,
                &value as *const c_int as *const c_void,
                mem::size_of::<c_int>() as socklen_t,
            )
        };

        if ret < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(())
    }

    pub(super) fn buffer_size(fd: RawFd, option: c_int) -> io::Result<usize> {
        let mut value: c_int = 0;
        let mut length = mem::size_of::<c_int>() as socklen_t;

        let ret = unsafe {
            getsockopt(
                fd,
                SOL_SOCKET,
                option,
                &mut value as *mut c_int as *mut c_void,
                &mut length,
            )
        };

        if ret < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(value.max(0) as usize)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::io::AsRawFd;

    #[test]
    fn applies_buffer_sizes_and_nodelay() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let std_stream = std::net::TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        std_stream.set_nonblocking(true).unwrap();
        let stream = TcpStream::from_std(std_stream);

        let options = SocketOptions {
            nodelay: true,
            send_buffer_size: Some(64 * 1024),
            recv_buffer_size: Some(32 * 1024),
        };
        apply_socket_options(&stream, &options).unwrap();

        assert!(stream.nodelay().unwrap());
        // Kernels may round or double the requested size.
        assert!(send_buffer_size(stream.as_raw_fd()).unwrap() >= 64 * 1024);
        assert!(recv_buffer_size(stream.as_raw_fd()).unwrap() >= 32 * 1024);
    }
}
