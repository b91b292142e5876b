//! Cross-thread side of a selector loop.
//!
//! Anything that wants the loop to do something from another thread goes through
//! [`LoopShared`]: it queues a [`Request`] (or a dispatched token) and wakes the
//! poll. Channels hold it as their [`WriteDispatcher`].

use crate::channel::{ChannelService, WriteDispatcher};
use crate::error::Result;
use crate::session::Session;

use mio::net::{TcpListener, TcpStream};
use mio::{Poll, Registry, Token, Waker};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io;
use std::mem;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, OnceLock};
use std::thread::{self, ThreadId};
use std::time::Duration;
use tracing::warn;

/// Token reserved for the loop's own waker.
pub(crate) const WAKE_TOKEN: Token = Token(usize::MAX);

/// An outbound connect handed to a loop.
pub(crate) struct ConnectRequest<F> {
    pub(crate) addr: SocketAddr,
    pub(crate) timeout: Duration,
    pub(crate) reply: Sender<Result<Session<F>>>,
    pub(crate) service: Option<Arc<dyn ChannelService>>,
}

pub(crate) enum Request<F> {
    /// Start accepting on `listener`, spreading sockets over the given loops.
    Listen(TcpListener, Vec<Arc<LoopShared<F>>>),
    /// Adopt an accepted socket.
    Register(TcpStream),
    Connect(ConnectRequest<F>),
    /// Run the physical close of a channel that asked to be closed.
    Close(Token),
    Shutdown,
}

pub(crate) struct LoopShared<F> {
    name: String,
    pub(crate) registry: Arc<Registry>,
    waker: Waker,
    requests: Mutex<VecDeque<Request<F>>>,
    dispatched: Mutex<Vec<Token>>,
    shutdown: AtomicBool,
    thread: OnceLock<ThreadId>,
}

impl<F> LoopShared<F> {
    pub(crate) fn new(name: String, poll: &Poll) -> io::Result<Self> {
        Ok(Self {
            name,
            registry: Arc::new(poll.registry().try_clone()?),
            waker: Waker::new(poll.registry(), WAKE_TOKEN)?,
            requests: Mutex::new(VecDeque::new()),
            dispatched: Mutex::new(Vec::new()),
            shutdown: AtomicBool::new(false),
            thread: OnceLock::new(),
        })
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    /// Records the calling thread as the loop thread.
    pub(crate) fn enter(&self) {
        let _ = self.thread.set(thread::current().id());
    }

    /// True when called from the loop thread.
    pub(crate) fn in_loop(&self) -> bool {
        self.thread.get() == Some(&thread::current().id())
    }

    pub(crate) fn submit(&self, request: Request<F>) {
        self.requests.lock().push_back(request);

        if !self.in_loop() {
            self.wake();
        }
    }

    pub(crate) fn take_requests(&self) -> VecDeque<Request<F>> {
        mem::take(&mut *self.requests.lock())
    }

    pub(crate) fn take_dispatched(&self) -> Vec<Token> {
        mem::take(&mut *self.dispatched.lock())
    }

    pub(crate) fn has_dispatched(&self) -> bool {
        !self.dispatched.lock().is_empty()
    }

    pub(crate) fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.submit(Request::Shutdown);
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    fn wake(&self) {
        if let Err(err) = self.waker.wake() {
            warn!(selector = %self.name, error = %err, "Failed to wake selector");
        }
    }
}

impl<F: Send + 'static> WriteDispatcher for LoopShared<F> {
    fn dispatch(&self, token: Token) {
        let first = {
            let mut dispatched = self.dispatched.lock();
            dispatched.push(token);
            dispatched.len() == 1
        };

        if first && !self.in_loop() {
            self.wake();
        }
    }

    fn close(&self, token: Token) {
        self.submit(Request::Close(token));
    }
}
