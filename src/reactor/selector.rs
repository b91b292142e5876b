//! The selector event loop.
//!
//! One thread owns a `mio::Poll`, every socket registered on it and the decoders
//! of its channels. Each turn it:
//!
//! 1. polls, bounded by the liveness interval and the next deferred deadline;
//! 2. accepts, completes connects, reads and decodes, or resumes blocked writes;
//! 3. drains requests queued by other threads;
//! 4. flushes dispatched channels, healthy ones before network-weak ones;
//! 5. fires due deferred work;
//! 6. on every liveness tick, sweeps channels for progress and stalls.
//!
//! Decoded frames go to the loop's executor thread in batches. One failing
//! channel is closed; the loop itself keeps running.

use crate::buffer::ByteBufferPool;
use crate::channel::socket::{MioSocket, apply_socket_options};
use crate::channel::{Channel, ChannelService, ChannelSettings, FlushProgress, WriteDispatcher};
use crate::configuration::BackpressurePolicy;
use crate::context::ChannelContext;
use crate::error::{Error, Result};
use crate::protocol::{ProtocolDecoder, ProtocolFactory};
use crate::reactor::handle::{ConnectRequest, LoopShared, Request, WAKE_TOKEN};
use crate::reactor::timer::TimerQueue;
use crate::runtime::ExecutorEventLoop;
use crate::session::Session;
use crate::utils::slab::Slab;

use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};
use parking_lot::Mutex;
use std::any::Any;
use std::io::{self, ErrorKind};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::mpsc::SendError;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

/// Reads served per readiness event before yielding to other channels.
const READS_PER_TURN: usize = 16;

type Frame<P> = <P as ProtocolFactory>::Frame;

/// A running selector loop and its thread.
pub(crate) struct SelectorLoop<P: ProtocolFactory> {
    shared: Arc<LoopShared<Frame<P>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl<P: ProtocolFactory> SelectorLoop<P> {
    /// Creates the poll and starts the loop thread along with its executor.
    ///
    /// # Arguments
    /// * `name` - Thread name of the loop
    /// * `context` - Configuration, protocol and handler shared with the caller
    pub(crate) fn start(name: String, context: Arc<ChannelContext<P>>) -> io::Result<Self> {
        let poll = Poll::new()?;
        let shared = Arc::new(LoopShared::new(name.clone(), &poll)?);
        let executor = ExecutorEventLoop::start(format!("{name}-executor"))?;

        let config = context.config();
        let selector = Selector {
            shared: shared.clone(),
            events: Events::with_capacity(config.events_capacity.max(1)),
            entries: Slab::new(64),
            pool: Arc::new(ByteBufferPool::new(
                config.read_buffer_size,
                config.buffer_pool_capacity,
            )),
            settings: ChannelSettings::from(config),
            liveness: config.liveness_interval.max(Duration::from_millis(1)),
            read_limit: config.read_buffer_size.max(1) * READS_PER_TURN,
            executor,
            timers: TimerQueue::new(),
            pending_reads: Vec::new(),
            attempts: 0,
            poll,
            context,
        };

        let thread = thread::Builder::new()
            .name(name)
            .spawn(move || selector.run())?;

        Ok(Self {
            shared,
            thread: Mutex::new(Some(thread)),
        })
    }

    pub(crate) fn shared(&self) -> &Arc<LoopShared<Frame<P>>> {
        &self.shared
    }

    /// Stops the loop and waits for its teardown, unless called from the loop itself.
    pub(crate) fn shutdown(&self) {
        self.shared.shutdown();

        let Some(thread) = self.thread.lock().take() else {
            return;
        };

        if thread.thread().id() == thread::current().id() {
            return;
        }

        if thread.join().is_err() {
            error!(selector = %self.shared.name(), "Selector thread panicked");
        }
    }
}

impl<P: ProtocolFactory> Drop for SelectorLoop<P> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

enum Entry<P: ProtocolFactory> {
    Listener(ListenerEntry<Frame<P>>),
    Connecting(PendingConnect<Frame<P>>),
    Channel(ChannelEntry<P>),
}

struct ListenerEntry<F> {
    listener: TcpListener,
    targets: Vec<Arc<LoopShared<F>>>,
    next: usize,
}

struct PendingConnect<F> {
    stream: TcpStream,
    request: ConnectRequest<F>,
    attempt: u64,
}

struct ChannelEntry<P: ProtocolFactory> {
    channel: Arc<Channel>,
    session: Session<Frame<P>>,
    decoder: P::Decoder,
    interest: Interest,
}

enum Deferred {
    ExpireConnect { token: Token, attempt: u64 },
}

#[derive(Clone, Copy)]
struct Readiness {
    token: Token,
    readable: bool,
    writable: bool,
}

enum ConnectState {
    Pending,
    Connected,
    Failed(io::Error),
}

struct Selector<P: ProtocolFactory> {
    shared: Arc<LoopShared<Frame<P>>>,
    context: Arc<ChannelContext<P>>,
    poll: Poll,
    events: Events,
    entries: Slab<Entry<P>>,
    pool: Arc<ByteBufferPool>,
    settings: ChannelSettings,
    liveness: Duration,
    read_limit: usize,
    executor: ExecutorEventLoop,
    timers: TimerQueue<Deferred>,
    pending_reads: Vec<Token>,
    attempts: u64,
}

impl<P: ProtocolFactory> Selector<P> {
    fn run(mut self) {
        self.shared.enter();
        debug!(selector = %self.shared.name(), "Selector loop started");

        let mut next_sweep = Instant::now() + self.liveness;

        while !self.shared.is_shutdown() {
            if let Err(err) = self.turn() {
                error!(selector = %self.shared.name(), error = %err, "Selector poll failed");
                break;
            }

            let now = Instant::now();
            if now >= next_sweep {
                self.sweep(now);
                next_sweep = now + self.liveness;
            }
        }

        self.teardown();
        debug!(selector = %self.shared.name(), "Selector loop stopped");
    }

    fn turn(&mut self) -> io::Result<()> {
        let timeout = self.poll_timeout(Instant::now());

        match self.poll.poll(&mut self.events, Some(timeout)) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::Interrupted => return Ok(()),
            Err(err) => return Err(err),
        }

        let pending_reads = std::mem::take(&mut self.pending_reads);
        let ready: Vec<Readiness> = self
            .events
            .iter()
            .filter(|event| event.token() != WAKE_TOKEN)
            .map(|event| Readiness {
                token: event.token(),
                readable: event.is_readable() || event.is_read_closed() || event.is_error(),
                writable: event.is_writable() || event.is_write_closed(),
            })
            .collect();

        for readiness in ready {
            self.ready(readiness);
        }

        for token in pending_reads {
            self.read_ready(token);
        }

        self.process_requests();
        self.process_dispatched();
        self.process_timers(Instant::now());

        Ok(())
    }

    fn poll_timeout(&self, now: Instant) -> Duration {
        if !self.pending_reads.is_empty() || self.shared.has_dispatched() {
            return Duration::ZERO;
        }

        match self.timers.next_remaining(now) {
            Some(remaining) => remaining.min(self.liveness),
            None => self.liveness,
        }
    }

    fn ready(&mut self, readiness: Readiness) {
        let token = readiness.token;

        match self.entries.get(token.0) {
            None => {}
            Some(Entry::Listener(_)) => self.accept(token),
            Some(Entry::Connecting(_)) => self.finish_connect(token),
            Some(Entry::Channel(_)) => {
                if readiness.readable {
                    self.read_ready(token);
                }
                if readiness.writable {
                    self.flush_channel(token);
                }
            }
        }
    }

    fn listen(&mut self, mut listener: TcpListener, targets: Vec<Arc<LoopShared<Frame<P>>>>) {
        let token = Token(self.entries.vacant_key());

        if let Err(err) = self
            .shared
            .registry
            .register(&mut listener, token, Interest::READABLE)
        {
            error!(selector = %self.shared.name(), error = %err, "Failed to register listener");
            return;
        }

        if let Ok(addr) = listener.local_addr() {
            info!(selector = %self.shared.name(), addr = %addr, "Listening");
        }

        self.entries.insert(Entry::Listener(ListenerEntry {
            listener,
            targets,
            next: 0,
        }));
    }

    fn accept(&mut self, token: Token) {
        loop {
            let Some(Entry::Listener(entry)) = self.entries.get_mut(token.0) else {
                return;
            };

            match entry.listener.accept() {
                Ok((stream, peer)) => {
                    let target = if entry.targets.is_empty() {
                        None
                    } else {
                        let target = Arc::clone(&entry.targets[entry.next % entry.targets.len()]);
                        entry.next = entry.next.wrapping_add(1);
                        Some(target)
                    };

                    debug!(peer = %peer, "Accepted connection");

                    match target {
                        Some(target) if !Arc::ptr_eq(&target, &self.shared) => {
                            target.submit(Request::Register(stream));
                        }
                        _ => {
                            if let Err(err) = self.open_channel(stream, None) {
                                warn!(peer = %peer, error = %err, "Failed to register accepted socket");
                            }
                        }
                    }
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => return,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    warn!(selector = %self.shared.name(), error = %err, "Accept failed");
                    return;
                }
            }
        }
    }

    /// Registers a connected socket and creates its channel and session.
    fn open_channel(
        &mut self,
        mut stream: TcpStream,
        service: Option<Arc<dyn ChannelService>>,
    ) -> Result<Session<Frame<P>>> {
        if let Err(err) = apply_socket_options(&stream, &self.context.config().socket) {
            warn!(error = %err, "Failed to apply socket options");
        }

        let token = Token(self.entries.vacant_key());
        self.shared
            .registry
            .register(&mut stream, token, Interest::READABLE)?;

        let socket = MioSocket::new(stream, Arc::clone(&self.shared.registry));
        let dispatcher: Arc<dyn WriteDispatcher> = self.shared.clone();
        let mut channel = Channel::new(
            self.context.next_id(),
            token,
            Box::new(socket),
            dispatcher,
            Arc::clone(&self.pool),
            self.settings,
        );
        if let Some(service) = service {
            channel = channel.with_service(service);
        }

        let channel = Arc::new(channel);
        let session = Session::new(Arc::clone(&channel), self.context.encoder());

        debug!(
            session = session.id(),
            token = token.0,
            peer = %channel.remote_address(),
            "Channel opened"
        );

        self.entries.insert(Entry::Channel(ChannelEntry {
            channel,
            session: session.clone(),
            decoder: self.context.factory().decoder(),
            interest: Interest::READABLE,
        }));
        self.context.sessions().insert(session.clone());

        let handler = Arc::clone(self.context.handler());
        let opened = session.clone();
        self.executor.execute(move || handler.session_opened(&opened));

        Ok(session)
    }

    fn connect(&mut self, request: ConnectRequest<Frame<P>>) {
        let mut stream = match TcpStream::connect(request.addr) {
            Ok(stream) => stream,
            Err(err) => {
                let _ = request.reply.send(Err(err.into()));
                return;
            }
        };

        let token = Token(self.entries.vacant_key());
        if let Err(err) = self
            .shared
            .registry
            .register(&mut stream, token, Interest::WRITABLE)
        {
            let _ = request.reply.send(Err(err.into()));
            return;
        }

        self.attempts += 1;
        let attempt = self.attempts;

        debug!(addr = %request.addr, token = token.0, "Connecting");
        self.timers.register(
            Instant::now() + request.timeout,
            Deferred::ExpireConnect { token, attempt },
        );
        self.entries.insert(Entry::Connecting(PendingConnect {
            stream,
            request,
            attempt,
        }));
    }

    fn finish_connect(&mut self, token: Token) {
        let state = match self.entries.get(token.0) {
            Some(Entry::Connecting(pending)) => connect_state(&pending.stream),
            _ => return,
        };

        if matches!(state, ConnectState::Pending) {
            return;
        }

        let Some(Entry::Connecting(mut pending)) = self.entries.remove(token.0) else {
            return;
        };
        let _ = self.shared.registry.deregister(&mut pending.stream);

        let ConnectRequest {
            addr,
            reply,
            service,
            ..
        } = pending.request;

        let result = match state {
            ConnectState::Failed(err) => {
                debug!(addr = %addr, error = %err, "Connect failed");
                Err(Error::Io(err))
            }
            _ => self.open_channel(pending.stream, service),
        };

        if let Err(SendError(Ok(session))) = reply.send(result) {
            debug!(session = session.id(), "Connect caller gone, closing");
            session.close();
        }
    }

    fn expire_connect(&mut self, token: Token, attempt: u64) {
        match self.entries.get(token.0) {
            Some(Entry::Connecting(pending)) if pending.attempt == attempt => {}
            _ => return,
        }

        let Some(Entry::Connecting(mut pending)) = self.entries.remove(token.0) else {
            return;
        };
        let _ = self.shared.registry.deregister(&mut pending.stream);

        let request = pending.request;
        warn!(addr = %request.addr, timeout = ?request.timeout, "Connect timed out");

        let _ = request.reply.send(Err(Error::ConnectTimeout {
            addr: request.addr,
            timeout: request.timeout,
        }));
    }

    fn read_ready(&mut self, token: Token) {
        let read_limit = self.read_limit;
        let Some(Entry::Channel(entry)) = self.entries.get_mut(token.0) else {
            return;
        };

        if entry.channel.reads_paused() {
            return;
        }

        let mut frames = Vec::new();
        let outcome = entry.channel.fill_read_buffer(read_limit);
        let decoded = match &outcome {
            Ok(_) => {
                let decoder = &mut entry.decoder;
                entry
                    .channel
                    .decode_with(|buffer| decoder.decode(buffer), &mut frames)
            }
            Err(_) => Ok(()),
        };
        let session = entry.session.clone();

        if !frames.is_empty() {
            trace!(session = session.id(), frames = frames.len(), "Frames decoded");
            self.deliver(session, frames);
        }

        match (outcome, decoded) {
            (Err(err), _) | (Ok(_), Err(err)) => self.close_channel(token, Some(err)),
            (Ok(outcome), Ok(())) if outcome.eof => {
                debug!(token = token.0, "Peer closed");
                self.close_channel(token, None);
            }
            (Ok(outcome), Ok(())) => {
                if outcome.more {
                    self.pending_reads.push(token);
                }
            }
        }
    }

    fn deliver(&self, session: Session<Frame<P>>, frames: Vec<Frame<P>>) {
        let handler = Arc::clone(self.context.handler());

        self.executor.execute(move || {
            for frame in frames {
                if !session.is_open() {
                    trace!(session = session.id(), "Dropping frame for closing session");
                    break;
                }

                let result =
                    panic::catch_unwind(AssertUnwindSafe(|| handler.accept(&session, frame)));

                let err = match result {
                    Ok(Ok(())) => continue,
                    Ok(Err(err)) => err,
                    Err(panic) => Error::Handler(panic_message(panic.as_ref())),
                };

                error!(session = session.id(), error = %err, "Handler failed, closing session");
                handler.exception_caught(&session, &err);
                session.close();
                break;
            }
        });
    }

    /// Writes until the channel is idle or blocked, then adjusts its interest.
    fn flush_channel(&mut self, token: Token) {
        let Some(Entry::Channel(entry)) = self.entries.get(token.0) else {
            return;
        };
        let channel = Arc::clone(&entry.channel);

        loop {
            match channel.fire_event() {
                Ok(FlushProgress::Completed) => continue,
                Ok(FlushProgress::Idle) | Ok(FlushProgress::Blocked) => break,
                Err(Error::ClosedChannel) => return,
                Err(err) => {
                    self.close_channel(token, Some(err));
                    return;
                }
            }
        }

        self.update_interest(token);
    }

    /// Derives the wanted interest from pending writes and the backpressure policy.
    fn update_interest(&mut self, token: Token) {
        let Some(Entry::Channel(entry)) = self.entries.get_mut(token.0) else {
            return;
        };
        let channel = &entry.channel;

        if self.settings.backpressure == BackpressurePolicy::PauseReads {
            let length = channel.write_future_length();
            let threshold = self.settings.write_threshold;

            if !channel.reads_paused() && length > threshold {
                debug!(session = channel.id(), pending = length, "Pausing reads");
                channel.set_reads_paused(true);
            } else if channel.reads_paused() && length <= threshold / 2 {
                debug!(session = channel.id(), pending = length, "Resuming reads");
                channel.set_reads_paused(false);
            }
        }

        let readable = !channel.reads_paused();
        let writable = !channel.is_complete();
        let interest = match (readable, writable) {
            (true, true) => Interest::READABLE | Interest::WRITABLE,
            (false, true) => Interest::WRITABLE,
            _ => Interest::READABLE,
        };

        if interest == entry.interest {
            return;
        }

        match channel.update_interest(interest) {
            Ok(()) => entry.interest = interest,
            Err(err) => {
                self.close_channel(token, Some(err.into()));
            }
        }
    }

    fn process_requests(&mut self) {
        for request in self.shared.take_requests() {
            match request {
                Request::Listen(listener, targets) => self.listen(listener, targets),
                Request::Register(stream) => {
                    if let Err(err) = self.open_channel(stream, None) {
                        warn!(error = %err, "Failed to register accepted socket");
                    }
                }
                Request::Connect(request) => self.connect(request),
                Request::Close(token) => {
                    // The token may belong to a newer channel by now.
                    if let Some(Entry::Channel(entry)) = self.entries.get(token.0)
                        && !entry.channel.is_open()
                    {
                        self.close_channel(token, None);
                    }
                }
                Request::Shutdown => {}
            }
        }
    }

    fn process_dispatched(&mut self) {
        let mut tokens = self.shared.take_dispatched();
        if tokens.is_empty() {
            return;
        }

        tokens.sort_unstable();
        tokens.dedup();

        let mut channels: Vec<(Token, bool)> = tokens
            .into_iter()
            .filter_map(|token| match self.entries.get(token.0) {
                Some(Entry::Channel(entry)) => Some((token, entry.channel.is_positive())),
                _ => None,
            })
            .collect();
        channels.sort_by_key(|(_, positive)| !positive);

        for (token, _) in channels {
            self.flush_channel(token);
        }
    }

    fn process_timers(&mut self, now: Instant) {
        for deferred in self.timers.expired(now) {
            match deferred {
                Deferred::ExpireConnect { token, attempt } => self.expire_connect(token, attempt),
            }
        }
    }

    /// Liveness sweep: progress clears the weak flag, stalls with pending writes
    /// arm or trip it, and channels closed from other threads are reaped.
    fn sweep(&mut self, now: Instant) {
        for key in self.entries.keys() {
            let token = Token(key);
            let Some(Entry::Channel(entry)) = self.entries.get(key) else {
                continue;
            };
            let channel = Arc::clone(&entry.channel);

            if !channel.is_open() {
                self.close_channel(token, None);
                continue;
            }

            if channel.take_progress() {
                channel.up_network_state();
            } else if !channel.is_complete() {
                channel.down_network_state_at(now);
            }

            self.update_interest(token);
        }
    }

    fn close_channel(&mut self, token: Token, cause: Option<Error>) {
        let Some(Entry::Channel(entry)) = self.entries.remove(token.0) else {
            return;
        };
        let ChannelEntry {
            channel, session, ..
        } = entry;

        if let Some(err) = &cause {
            warn!(session = session.id(), error = %err, "Closing channel after failure");
        }

        channel.physical_close();
        self.context.sessions().remove(session.id());

        let handler = Arc::clone(self.context.handler());
        self.executor.execute(move || {
            if let Some(err) = cause {
                handler.exception_caught(&session, &err);
            }
            handler.session_closed(&session);
        });
    }

    fn teardown(&mut self) {
        for request in self.shared.take_requests() {
            if let Request::Connect(request) = request {
                let _ = request.reply.send(Err(Error::ClosedChannel));
            }
        }

        for key in self.entries.keys() {
            match self.entries.get(key) {
                Some(Entry::Channel(_)) => self.close_channel(Token(key), None),
                Some(Entry::Connecting(_)) => {
                    if let Some(Entry::Connecting(mut pending)) = self.entries.remove(key) {
                        let _ = self.shared.registry.deregister(&mut pending.stream);
                        let _ = pending.request.reply.send(Err(Error::ClosedChannel));
                    }
                }
                Some(Entry::Listener(_)) => {
                    if let Some(Entry::Listener(mut entry)) = self.entries.remove(key) {
                        let _ = self.shared.registry.deregister(&mut entry.listener);
                    }
                }
                None => {}
            }
        }

        let backlog = self.executor.backlog();
        if backlog > 0 {
            debug!(selector = %self.shared.name(), backlog, "Draining executor");
        }
        self.executor.shutdown();
    }
}

fn connect_state(stream: &TcpStream) -> ConnectState {
    match stream.take_error() {
        Ok(Some(err)) | Err(err) => return ConnectState::Failed(err),
        Ok(None) => {}
    }

    match stream.peer_addr() {
        Ok(_) => ConnectState::Connected,
        Err(err) if err.kind() == ErrorKind::NotConnected => ConnectState::Pending,
        #[cfg(unix)]
        Err(err) if err.raw_os_error() == Some(libc::EINPROGRESS) => ConnectState::Pending,
        Err(err) => ConnectState::Failed(err),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        return (*message).to_string();
    }

    if let Some(message) = panic.downcast_ref::<String>() {
        return message.clone();
    }

    "handler panicked".to_string()
}
