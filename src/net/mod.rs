//! Network entry points.
//!
//! - [`acceptor`]: Listening side, spreading accepted sockets over several loops
//! - [`connector`]: Outbound side, one session per connector
//! - [`waiter`]: Completion signal for asynchronous closes

pub mod acceptor;
pub mod connector;
pub mod waiter;

pub use acceptor::SocketAcceptor;
pub use connector::SocketConnector;
pub use waiter::CloseWaiter;

use std::io::{self, ErrorKind};
use std::net::{SocketAddr, ToSocketAddrs};

/// Resolves `host:port` to the first address it names.
pub(crate) fn resolve(address: &str) -> io::Result<SocketAddr> {
    address.to_socket_addrs()?.next().ok_or_else(|| {
        io::Error::new(
            ErrorKind::InvalidInput,
            format!("{address} does not resolve to any address"),
        )
    })
}
