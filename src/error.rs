//! Error taxonomy shared by every layer of the engine.
//!
//! Channel-local failures never leave the event loop: they are logged once and
//! resolved into a close of the offending channel. Connect and close failures are
//! returned to the caller. Write failures are reported through the write task's
//! own callback, never through the return value of `flush`.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

/// Errors produced by the reactor, its channels and its connectors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The channel is closing or already closed.
    #[error("channel closed")]
    ClosedChannel,

    /// A connect attempt did not complete within its bound.
    #[error("connect to {addr} timed out after {timeout:?}")]
    ConnectTimeout { addr: SocketAddr, timeout: Duration },

    /// A close did not complete within its bound. This points at a stuck drain.
    #[error("close did not complete within {0:?}")]
    CloseTimeout(Duration),

    /// A write task could not be enqueued.
    #[error("write rejected: {0}")]
    Rejected(&'static str),

    /// Transport failure on the underlying socket.
    #[error("i/o failure: {0}")]
    Io(#[from] io::Error),

    /// The protocol decoder or encoder refused the data.
    #[error("protocol failure: {0}")]
    Protocol(String),

    /// An application handler failed or panicked while processing a frame.
    #[error("handler failure: {0}")]
    Handler(String),
}

impl Error {
    /// Returns true for the error that marks an operation on a closed channel.
    ///
    /// Close-like callers treat it as "already done".
    pub fn is_closed_channel(&self) -> bool {
        matches!(self, Error::ClosedChannel)
    }
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;
