//! Everything an acceptor or connector shares with the loops it runs.
//!
//! # Usage
//!
//! ```ignore
//! let context = ChannelContext::new(config, LineProtocol, EchoHandler)
//!     .with_listener(LoggingLifeCycleListener);
//!
//! let acceptor = SocketAcceptor::new(Arc::new(context));
//! acceptor.bind()?;
//! ```

use crate::configuration::ServerConfiguration;
use crate::error::{Error, Result};
use crate::lifecycle::{LifeCycleContext, LifeCycleListener};
use crate::protocol::{ProtocolEncoder, ProtocolFactory};
use crate::session::{Session, SessionRegistry};

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Application callbacks, invoked on the executor thread of a loop.
///
/// Frames of one session are delivered in decode order.
pub trait IoEventHandler<F>: Send + Sync + 'static {
    /// Handles one decoded frame. An error closes the session.
    fn accept(&self, session: &Session<F>, frame: F) -> Result<()>;

    fn session_opened(&self, _session: &Session<F>) {}

    fn session_closed(&self, _session: &Session<F>) {}

    /// Called once for the error that made the loop close the session.
    fn exception_caught(&self, _session: &Session<F>, _error: &Error) {}
}

/// Configuration, protocol, handler and registry of one acceptor or connector.
pub struct ChannelContext<P: ProtocolFactory> {
    config: ServerConfiguration,
    factory: P,
    encoder: Arc<dyn ProtocolEncoder<Frame = P::Frame>>,
    handler: Arc<dyn IoEventHandler<P::Frame>>,
    sessions: SessionRegistry<P::Frame>,
    listeners: Vec<Arc<dyn LifeCycleListener>>,
    next_id: AtomicU64,
}

impl<P: ProtocolFactory> ChannelContext<P> {
    /// Creates a context.
    ///
    /// # Arguments
    /// * `config` - Engine configuration
    /// * `factory` - Source of per-channel decoders and the shared encoder
    /// * `handler` - Receives decoded frames and session events
    pub fn new(
        config: ServerConfiguration,
        factory: P,
        handler: impl IoEventHandler<P::Frame>,
    ) -> Self {
        let encoder: Arc<dyn ProtocolEncoder<Frame = P::Frame>> = Arc::new(factory.encoder());

        Self {
            config,
            factory,
            encoder,
            handler: Arc::new(handler),
            sessions: SessionRegistry::new(),
            listeners: Vec::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Adds a lifecycle listener, keeping listeners ordered by sort index.
    pub fn with_listener(mut self, listener: impl LifeCycleListener + 'static) -> Self {
        self.listeners.push(Arc::new(listener));
        self.listeners.sort_by_key(|listener| listener.sort_index());
        self
    }

    pub fn config(&self) -> &ServerConfiguration {
        &self.config
    }

    pub fn factory(&self) -> &P {
        &self.factory
    }

    pub fn sessions(&self) -> &SessionRegistry<P::Frame> {
        &self.sessions
    }

    pub(crate) fn handler(&self) -> &Arc<dyn IoEventHandler<P::Frame>> {
        &self.handler
    }

    pub(crate) fn encoder(&self) -> Arc<dyn ProtocolEncoder<Frame = P::Frame>> {
        Arc::clone(&self.encoder)
    }

    pub(crate) fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn fire_started(&self, context: &LifeCycleContext) {
        for listener in &self.listeners {
            listener.started(context);
        }
    }

    pub(crate) fn fire_stopping(&self, context: &LifeCycleContext) {
        for listener in &self.listeners {
            listener.stopping(context);
        }
    }

    pub(crate) fn fire_stopped(&self, context: &LifeCycleContext) {
        for listener in &self.listeners {
            listener.stopped(context);
        }
    }

    pub(crate) fn fire_failure(&self, context: &LifeCycleContext, err: &Error) {
        for listener in &self.listeners {
            listener.failure(context, err);
        }
    }
}
