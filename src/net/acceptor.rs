//! Listening side of the engine.
//!
//! Binding starts `selector_loops` selector loops. The listener lives on the
//! first one, which hands accepted sockets to all of them in turn.
//!
//! # Usage
//!
//! ```ignore
//! let acceptor = SocketAcceptor::new(Arc::new(context));
//! let addr = acceptor.bind()?;
//! println!("Listening on {addr}");
//!
//! // ...
//! acceptor.unbind();
//! ```

use crate::context::ChannelContext;
use crate::error::Result;
use crate::lifecycle::LifeCycleContext;
use crate::net::resolve;
use crate::protocol::ProtocolFactory;
use crate::reactor::{Request, SelectorLoop};

use mio::net::TcpListener;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// A server bound to one address.
pub struct SocketAcceptor<P: ProtocolFactory> {
    context: Arc<ChannelContext<P>>,
    bound: Mutex<Option<Bound<P>>>,
}

struct Bound<P: ProtocolFactory> {
    loops: Vec<SelectorLoop<P>>,
    local: SocketAddr,
    lifecycle: LifeCycleContext,
}

impl<P: ProtocolFactory> SocketAcceptor<P> {
    pub fn new(context: Arc<ChannelContext<P>>) -> Self {
        Self {
            context,
            bound: Mutex::new(None),
        }
    }

    /// Binds the configured `host:port` and starts the selector loops.
    ///
    /// Binding an already bound acceptor returns its address. Listeners are
    /// told `started` on success and `failure` otherwise.
    ///
    /// # Returns
    /// The local address actually bound, useful with port `0`
    pub fn bind(&self) -> Result<SocketAddr> {
        let mut bound = self.bound.lock();

        if let Some(bound) = bound.as_ref() {
            return Ok(bound.local);
        }

        match self.start() {
            Ok(started) => {
                info!(
                    addr = %started.local,
                    loops = started.loops.len(),
                    "Acceptor bound"
                );
                self.context.fire_started(&started.lifecycle);

                let local = started.local;
                *bound = Some(started);
                Ok(local)
            }
            Err(err) => {
                let lifecycle = LifeCycleContext {
                    port: self.context.config().port,
                    started_at: Instant::now(),
                };
                self.context.fire_failure(&lifecycle, &err);
                Err(err)
            }
        }
    }

    fn start(&self) -> Result<Bound<P>> {
        let config = self.context.config();
        let addr = resolve(&config.address())?;

        let listener = TcpListener::bind(addr)?;
        let local = listener.local_addr()?;

        let loops = (0..config.selector_loops.max(1))
            .map(|index| {
                SelectorLoop::start(
                    format!("selector-{}-{index}", local.port()),
                    Arc::clone(&self.context),
                )
            })
            .collect::<std::io::Result<Vec<_>>>()?;

        let targets = loops.iter().map(|selector| Arc::clone(selector.shared())).collect();
        loops[0].shared().submit(Request::Listen(listener, targets));

        Ok(Bound {
            loops,
            local,
            lifecycle: LifeCycleContext {
                port: local.port(),
                started_at: Instant::now(),
            },
        })
    }

    /// Stops accepting, closes every channel and joins the loops.
    pub fn unbind(&self) {
        let Some(bound) = self.bound.lock().take() else {
            return;
        };

        self.context.fire_stopping(&bound.lifecycle);

        for selector in &bound.loops {
            selector.shutdown();
        }

        info!(addr = %bound.local, "Acceptor unbound");
        self.context.fire_stopped(&bound.lifecycle);
    }

    pub fn is_bound(&self) -> bool {
        self.bound.lock().is_some()
    }

    pub fn local_address(&self) -> Option<SocketAddr> {
        self.bound.lock().as_ref().map(|bound| bound.local)
    }

    pub fn context(&self) -> &Arc<ChannelContext<P>> {
        &self.context
    }
}

impl<P: ProtocolFactory> Drop for SocketAcceptor<P> {
    fn drop(&mut self) {
        self.unbind();
    }
}
