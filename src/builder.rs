//! Fluent builder for [`ServerConfiguration`] construction.
//!
//! Provides a builder pattern interface for creating configurations without
//! spelling out every field.

use crate::configuration::{BackpressurePolicy, ServerConfiguration};

use std::time::Duration;

/// Builder for constructing [`ServerConfiguration`] instances with a fluent API.
///
/// Every setter consumes and returns the builder. Unset fields keep the values of
/// `ServerConfiguration::default()`.
///
/// # Example
/// ```ignore
/// let config = ConfigurationBuilder::new()
///     .host("0.0.0.0")
///     .port(8300)
///     .selector_loops(4)
///     .build();
/// ```
pub struct ConfigurationBuilder {
    config: ServerConfiguration,
}

impl Default for ConfigurationBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigurationBuilder {
    /// Creates a new builder seeded with default values.
    pub fn new() -> Self {
        Self {
            config: ServerConfiguration::default(),
        }
    }

    /// Sets the host to bind or connect to.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    /// Sets the port to bind or connect to.
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Sets the number of selector event loops; clamped to at least one.
    pub fn selector_loops(mut self, loops: usize) -> Self {
        self.config.selector_loops = loops.max(1);
        self
    }

    /// Sets how many readiness events one poll may return.
    pub fn events_capacity(mut self, capacity: usize) -> Self {
        self.config.events_capacity = capacity.max(1);
        self
    }

    /// Sets the size of each pooled receive buffer.
    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.config.read_buffer_size = size.max(1);
        self
    }

    /// Caps the bytes a channel buffers while no frame can be decoded.
    pub fn max_read_buffer(mut self, size: usize) -> Self {
        self.config.max_read_buffer = size.max(1);
        self
    }

    /// Sets how many idle receive buffers each loop keeps.
    pub fn buffer_pool_capacity(mut self, capacity: usize) -> Self {
        self.config.buffer_pool_capacity = capacity;
        self
    }

    /// Sets the liveness sweep interval, which also bounds every poll.
    pub fn liveness_interval(mut self, interval: Duration) -> Self {
        self.config.liveness_interval = interval;
        self
    }

    /// Sets the grace period before a stalled channel is flagged network-weak.
    pub fn network_weak_grace(mut self, grace: Duration) -> Self {
        self.config.network_weak_grace = grace;
        self
    }

    /// Sets the pending write threshold and the policy applied above it.
    ///
    /// # Arguments
    /// * `threshold` - Pending bytes per channel before `policy` kicks in
    /// * `policy` - What the channel does once the threshold is exceeded
    pub fn backpressure(mut self, threshold: usize, policy: BackpressurePolicy) -> Self {
        self.config.write_threshold = threshold;
        self.config.backpressure = policy;
        self
    }

    /// Sets the connect timeout used by connectors.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Sets the bound on a connector's blocking close.
    pub fn close_timeout(mut self, timeout: Duration) -> Self {
        self.config.close_timeout = timeout;
        self
    }

    /// Enables or disables `TCP_NODELAY` on every stream.
    pub fn nodelay(mut self, nodelay: bool) -> Self {
        self.config.socket.nodelay = nodelay;
        self
    }

    /// Requests a kernel send buffer size (`SO_SNDBUF`) for every stream.
    pub fn send_buffer_size(mut self, size: usize) -> Self {
        self.config.socket.send_buffer_size = Some(size);
        self
    }

    /// Requests a kernel receive buffer size (`SO_RCVBUF`) for every stream.
    pub fn recv_buffer_size(mut self, size: usize) -> Self {
        self.config.socket.recv_buffer_size = Some(size);
        self
    }

    /// Builds and returns the configuration.
    pub fn build(self) -> ServerConfiguration {
        self.config
    }
}
