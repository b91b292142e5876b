//! Engine configuration.
//!
//! [`ServerConfiguration`] is a plain value with sensible defaults. Build one with
//! [`ConfigurationBuilder`](crate::builder::ConfigurationBuilder) or start from
//! `ServerConfiguration::default()` and tweak fields directly.

use std::time::Duration;

/// Default grace period before a stalled channel is flagged network-weak.
pub const DEFAULT_NETWORK_WEAK_GRACE: Duration = Duration::from_millis(64);

/// Default pending-write threshold that triggers the backpressure policy.
pub const DEFAULT_WRITE_THRESHOLD: usize = 10 * 1024 * 1024;

/// Default bound on bytes buffered for a frame that has not been decoded yet.
pub const DEFAULT_MAX_READ_BUFFER: usize = 16 * 1024 * 1024;

/// What a channel does once its pending write length exceeds the threshold.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackpressurePolicy {
    /// Keep accepting writes and reading; only expose the pending length.
    Ignore,
    /// Stop reading from the peer until the queue drains below half the threshold.
    PauseReads,
    /// Reject new write tasks with [`Error::Rejected`](crate::Error::Rejected).
    RejectWrites,
}

/// Socket options applied to every accepted or connected stream.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SocketOptions {
    pub nodelay: bool,
    pub send_buffer_size: Option<usize>,
    pub recv_buffer_size: Option<usize>,
}

/// Configuration shared by acceptors, connectors and their event loops.
#[derive(Clone, Debug)]
pub struct ServerConfiguration {
    /// Host to bind (acceptor) or to connect to (connector).
    pub host: String,
    /// Port to bind or connect to. `0` lets the OS choose when binding.
    pub port: u16,
    /// Number of selector event loops an acceptor runs.
    pub selector_loops: usize,
    /// Maximum readiness events handled per poll.
    pub events_capacity: usize,
    /// Size of each pooled receive buffer.
    pub read_buffer_size: usize,
    /// Bytes a channel may buffer without decoding a frame before it is closed.
    pub max_read_buffer: usize,
    /// Maximum number of idle buffers kept by each loop's pool.
    pub buffer_pool_capacity: usize,
    /// Upper bound on the poll timeout; also the liveness sweep period.
    pub liveness_interval: Duration,
    /// Grace period before a stalled channel is marked network-weak.
    pub network_weak_grace: Duration,
    /// Pending write length that triggers `backpressure`.
    pub write_threshold: usize,
    pub backpressure: BackpressurePolicy,
    /// Bound on a connector's connect attempt.
    pub connect_timeout: Duration,
    /// Bound on a connector's blocking close.
    pub close_timeout: Duration,
    pub socket: SocketOptions,
}

impl ServerConfiguration {
    /// Returns `host:port` as used for binding and connecting.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfiguration {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            selector_loops: 1,
            events_capacity: 256,
            read_buffer_size: 8 * 1024,
            max_read_buffer: DEFAULT_MAX_READ_BUFFER,
            buffer_pool_capacity: 64,
            liveness_interval: Duration::from_millis(16),
            network_weak_grace: DEFAULT_NETWORK_WEAK_GRACE,
            write_threshold: DEFAULT_WRITE_THRESHOLD,
            backpressure: BackpressurePolicy::PauseReads,
            connect_timeout: Duration::from_millis(3000),
            close_timeout: Duration::from_millis(3000),
            socket: SocketOptions {
                nodelay: true,
                send_buffer_size: None,
                recv_buffer_size: None,
            },
        }
    }
}
