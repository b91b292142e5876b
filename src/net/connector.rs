//! Outbound connections.
//!
//! A [`SocketConnector`] owns one selector loop, started on the first connect,
//! and at most one live session. When that session's channel is physically
//! closed the connector closes itself: its loop stops and its close waiter is
//! signalled. A later `connect` starts a fresh loop.
//!
//! # Usage
//!
//! ```ignore
//! let connector = SocketConnector::new(Arc::new(context));
//! let session = connector.connect("127.0.0.1:8300".parse()?)?;
//!
//! session.write("ping".to_string())?;
//! connector.close()?;
//! ```

use crate::channel::ChannelService;
use crate::context::ChannelContext;
use crate::error::{Error, Result};
use crate::net::resolve;
use crate::net::waiter::CloseWaiter;
use crate::protocol::ProtocolFactory;
use crate::reactor::{ConnectRequest, LoopShared, Request, SelectorLoop};
use crate::session::Session;

use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Extra time the caller waits past the connect timeout for the loop's own verdict.
const REPLY_GRACE: Duration = Duration::from_millis(500);

static CONNECTORS: AtomicUsize = AtomicUsize::new(0);

/// Client side of the engine.
pub struct SocketConnector<P: ProtocolFactory> {
    inner: Arc<Inner<P>>,
}

struct Inner<P: ProtocolFactory> {
    context: Arc<ChannelContext<P>>,
    name: String,
    link: Mutex<Link<P>>,
    timeout: Mutex<Duration>,
}

/// One loop lifetime: the loop, the session it carries and the waiter told
/// when both are gone. Closing retires the link and starts the next generation.
struct Link<P: ProtocolFactory> {
    generation: u64,
    selector: Option<SelectorLoop<P>>,
    session: Option<Session<P::Frame>>,
    waiter: CloseWaiter,
}

/// What a closed generation leaves behind to shut down.
struct Retired<P: ProtocolFactory> {
    selector: Option<SelectorLoop<P>>,
    waiter: CloseWaiter,
}

/// Close hook attached to the channel of one generation.
struct GenerationClose<P: ProtocolFactory> {
    inner: Weak<Inner<P>>,
    generation: u64,
}

impl<P: ProtocolFactory> SocketConnector<P> {
    pub fn new(context: Arc<ChannelContext<P>>) -> Self {
        let timeout = context.config().connect_timeout;
        let name = format!("connector-{}", CONNECTORS.fetch_add(1, Ordering::Relaxed));

        Self {
            inner: Arc::new(Inner {
                context,
                name,
                link: Mutex::new(Link {
                    generation: 0,
                    selector: None,
                    session: None,
                    waiter: CloseWaiter::new(),
                }),
                timeout: Mutex::new(timeout),
            }),
        }
    }

    /// Connects to the configured `host:port`.
    pub fn connect_configured(&self) -> Result<Session<P::Frame>> {
        let addr = resolve(&self.inner.context.config().address())?;
        self.connect(addr)
    }

    /// Connects to `addr`, waiting at most the connect timeout.
    ///
    /// Returns the existing session when one is still open. A session that is
    /// still closing is retired along with its loop, and the connect runs on a
    /// fresh one. A failed or timed out attempt leaves the connector usable for
    /// another attempt.
    ///
    /// # Arguments
    /// * `addr` - Remote address to connect to
    ///
    /// # Returns
    /// The new session, an `Io` error, or `ConnectTimeout`
    pub fn connect(&self, addr: SocketAddr) -> Result<Session<P::Frame>> {
        let timeout = self.timeout();
        let (reply, response) = mpsc::channel();

        let (shared, generation) = {
            let mut link = self.inner.link.lock();

            if let Some(session) = &link.session {
                if session.is_open() {
                    return Ok(session.clone());
                }

                let retired = link.retire();
                self.inner.finish_detached(retired)?;
            }

            let shared = self.inner.ensure_selector(&mut link)?;
            (shared, link.generation)
        };

        let service: Arc<dyn ChannelService> = Arc::new(GenerationClose {
            inner: Arc::downgrade(&self.inner),
            generation,
        });
        shared.submit(Request::Connect(ConnectRequest {
            addr,
            timeout,
            reply,
            service: Some(service),
        }));

        let session = match response.recv_timeout(timeout + REPLY_GRACE) {
            Ok(Ok(session)) => session,
            Ok(Err(err)) => return Err(err),
            Err(RecvTimeoutError::Timeout) => return Err(Error::ConnectTimeout { addr, timeout }),
            Err(RecvTimeoutError::Disconnected) => return Err(Error::ClosedChannel),
        };

        let mut link = self.inner.link.lock();
        if link.generation != generation {
            // Closed while the connect was in flight.
            drop(link);
            session.close();
            return Err(Error::ClosedChannel);
        }

        info!(
            connector = %self.inner.name,
            session = session.id(),
            peer = %addr,
            "Connected"
        );
        link.session = Some(session.clone());
        Ok(session)
    }

    /// True while the connector holds an open session.
    pub fn is_connected(&self) -> bool {
        self.session().is_some_and(|session| session.is_open())
    }

    pub fn session(&self) -> Option<Session<P::Frame>> {
        self.inner.link.lock().session.clone()
    }

    /// Current connect timeout.
    pub fn timeout(&self) -> Duration {
        *self.inner.timeout.lock()
    }

    pub fn set_timeout(&self, timeout: Duration) {
        *self.inner.timeout.lock() = timeout;
    }

    /// Starts closing and returns the waiter that resolves once closed.
    ///
    /// With an open session the close goes through the session, and the
    /// connector follows once its channel is gone. Without one the connector is
    /// closed right away.
    pub fn asynchronous_close(&self) -> CloseWaiter {
        let (session, waiter) = {
            let link = self.inner.link.lock();
            (link.session.clone(), link.waiter.clone())
        };

        match session {
            Some(session) if !session.is_closed() => session.close(),
            _ => self.inner.do_physical_close(),
        }

        waiter
    }

    /// Closes and waits up to the configured close timeout.
    ///
    /// Do not call this from a handler of this connector's own session: use
    /// [`asynchronous_close`](Self::asynchronous_close) there.
    pub fn close(&self) -> Result<()> {
        let timeout = self.inner.context.config().close_timeout;

        if self.asynchronous_close().wait(timeout) {
            return Ok(());
        }

        error!(connector = %self.inner.name, timeout = ?timeout, "Connector close timed out");
        Err(Error::CloseTimeout(timeout))
    }

    /// Tears the connector down without going through the session.
    pub fn physical_close(&self) -> Result<()> {
        self.inner.do_physical_close();
        Ok(())
    }
}

impl<P: ProtocolFactory> Drop for SocketConnector<P> {
    fn drop(&mut self) {
        self.inner.do_physical_close();
    }
}

impl<P: ProtocolFactory> Link<P> {
    /// Detaches the current generation and opens the next one.
    fn retire(&mut self) -> Retired<P> {
        self.generation += 1;
        self.session = None;

        Retired {
            selector: self.selector.take(),
            waiter: std::mem::take(&mut self.waiter),
        }
    }
}

impl<P: ProtocolFactory> Retired<P> {
    fn on_loop_thread(&self) -> bool {
        self.selector
            .as_ref()
            .is_some_and(|selector| selector.shared().in_loop())
    }

    fn finish(self) {
        if let Some(selector) = self.selector {
            selector.shutdown();
        }

        self.waiter.signal();
    }
}

impl<P: ProtocolFactory> Inner<P> {
    fn ensure_selector(&self, link: &mut Link<P>) -> Result<Arc<LoopShared<P::Frame>>> {
        if let Some(selector) = link.selector.as_ref() {
            return Ok(Arc::clone(selector.shared()));
        }

        let started = SelectorLoop::start(
            format!("{}-{}", self.name, link.generation),
            Arc::clone(&self.context),
        )?;
        let shared = Arc::clone(started.shared());
        link.selector = Some(started);

        debug!(connector = %self.name, generation = link.generation, "Connector loop started");
        Ok(shared)
    }

    /// Retires the current generation and shuts it down. Idempotent.
    fn do_physical_close(&self) {
        let retired = self.link.lock().retire();

        if retired.on_loop_thread() {
            if let Err(err) = self.finish_detached(retired) {
                warn!(connector = %self.name, error = %err, "Failed to spawn close thread");
            }
            return;
        }

        retired.finish();
        debug!(connector = %self.name, "Connector closed");
    }

    /// Shuts a retired generation down on its own thread.
    fn finish_detached(&self, retired: Retired<P>) -> Result<()> {
        if retired.selector.is_none() {
            retired.finish();
            return Ok(());
        }

        thread::Builder::new()
            .name(format!("{}-close", self.name))
            .spawn(move || retired.finish())?;

        Ok(())
    }
}

impl<P: ProtocolFactory> ChannelService for GenerationClose<P> {
    fn physical_close(self: Arc<Self>) -> Result<()> {
        let Some(inner) = self.inner.upgrade() else {
            return Ok(());
        };

        let retired = {
            let mut link = inner.link.lock();

            // A newer generation owns the connector now.
            if link.generation != self.generation {
                return Ok(());
            }

            link.retire()
        };

        // The loop cannot join itself.
        inner.finish_detached(retired)
    }
}
