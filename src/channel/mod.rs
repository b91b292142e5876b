//! Channels: the engine's handle over one socket.
//!
//! A [`Channel`] owns its socket, its write queue, its pooled read buffer and its
//! open/closing/closed state. Two kinds of threads touch it:
//!
//! - the owning event loop thread, which reads, drives [`Channel::fire_event`] and
//!   runs the physical close;
//! - any producer thread, which only calls [`Channel::flush`] (and `close`).
//!
//! Producers only ever take the queue lock. The loop takes the in-flight lock and
//! then, briefly, the queue lock. Callbacks never run while either is held.
//!
//! # State machine
//!
//! ```text
//! OPEN ──close()──▶ CLOSING ──physical_close()──▶ CLOSED
//!   └──────────────physical_close()─────────────────▲
//! ```
//!
//! `CLOSED` is terminal; repeated physical closes collapse into the first one.

mod network;
pub mod socket;
mod write;

pub use socket::SocketIo;
pub use write::{WriteCallback, WriteTask};

use crate::buffer::ByteBufferPool;
use crate::configuration::{BackpressurePolicy, ServerConfiguration};
use crate::error::{Error, Result};
use network::NetworkState;
use write::WriteQueue;

use bytes::BytesMut;
use mio::{Interest, Token};
use parking_lot::Mutex;
use std::fmt;
use std::io::{self, ErrorKind};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tracing::{debug, error, trace};

/// Address reported when the socket cannot resolve its own.
pub const ERROR_SOCKET_ADDRESS: SocketAddr =
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0));

const OPEN: u8 = 0;
const CLOSING: u8 = 1;
const CLOSED: u8 = 2;

/// Lifecycle state of a channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelState {
    Open,
    Closing,
    Closed,
}

/// Result of one [`Channel::fire_event`] call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlushProgress {
    /// Nothing was queued.
    Idle,
    /// The socket stopped accepting bytes; the task stays in flight.
    Blocked,
    /// One task was fully written and its callback has run.
    Completed,
}

/// Outcome of draining the socket into the read buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct ReadOutcome {
    pub(crate) bytes: usize,
    pub(crate) eof: bool,
    /// The read limit was hit before the socket ran dry.
    pub(crate) more: bool,
}

/// Hands channel work to the thread that owns the channel.
pub trait WriteDispatcher: Send + Sync {
    /// Asks the owner to attempt a flush of `token` on its next iteration.
    fn dispatch(&self, token: Token);

    /// Asks the owner to run the physical close of `token` on its thread.
    fn close(&self, token: Token);
}

/// Closeable-service capability of whatever created the channel.
///
/// Connectors implement it to tear themselves down once their only channel is
/// gone. The channel calls it last in its physical close.
pub trait ChannelService: Send + Sync {
    fn physical_close(self: Arc<Self>) -> Result<()>;
}

/// Per-channel knobs derived from the configuration.
#[derive(Clone, Copy, Debug)]
pub struct ChannelSettings {
    pub write_threshold: usize,
    pub backpressure: BackpressurePolicy,
    pub network_weak_grace: Duration,
    pub max_read_buffer: usize,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        ChannelSettings::from(&ServerConfiguration::default())
    }
}

impl From<&ServerConfiguration> for ChannelSettings {
    fn from(config: &ServerConfiguration) -> Self {
        Self {
            write_threshold: config.write_threshold,
            backpressure: config.backpressure,
            network_weak_grace: config.network_weak_grace,
            max_read_buffer: config.max_read_buffer,
        }
    }
}

/// One live or recently-live socket.
pub struct Channel {
    id: u64,
    token: Token,
    state: AtomicU8,
    close_once: AtomicBool,
    local: OnceLock<SocketAddr>,
    remote: OnceLock<SocketAddr>,
    socket: Mutex<Option<Box<dyn SocketIo>>>,
    queue: Mutex<WriteQueue>,
    in_flight: Mutex<Option<WriteTask>>,
    network: Mutex<NetworkState>,
    progress: AtomicBool,
    reads_paused: AtomicBool,
    read_buffer: Mutex<Option<BytesMut>>,
    pool: Arc<ByteBufferPool>,
    dispatcher: Arc<dyn WriteDispatcher>,
    service: Option<Arc<dyn ChannelService>>,
    settings: ChannelSettings,
}

impl Channel {
    /// Creates an open channel over `socket`.
    ///
    /// # Arguments
    /// * `id` - Identifier shared with the channel's session
    /// * `token` - Readiness token of the socket on its event loop
    /// * `socket` - The non-blocking transport
    /// * `dispatcher` - Handle of the owning event loop
    /// * `pool` - Pool the read buffer is taken from and returned to
    /// * `settings` - Backpressure and network-weak settings
    pub fn new(
        id: u64,
        token: Token,
        socket: Box<dyn SocketIo>,
        dispatcher: Arc<dyn WriteDispatcher>,
        pool: Arc<ByteBufferPool>,
        settings: ChannelSettings,
    ) -> Self {
        let read_buffer = pool.acquire();

        Self {
            id,
            token,
            state: AtomicU8::new(OPEN),
            close_once: AtomicBool::new(false),
            local: OnceLock::new(),
            remote: OnceLock::new(),
            socket: Mutex::new(Some(socket)),
            queue: Mutex::new(WriteQueue::default()),
            in_flight: Mutex::new(None),
            network: Mutex::new(NetworkState::default()),
            progress: AtomicBool::new(false),
            reads_paused: AtomicBool::new(false),
            read_buffer: Mutex::new(Some(read_buffer)),
            pool,
            dispatcher,
            service: None,
            settings,
        }
    }

    /// Attaches the closeable service invoked at the end of the physical close.
    pub fn with_service(mut self, service: Arc<dyn ChannelService>) -> Self {
        self.service = Some(service);
        self
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn token(&self) -> Token {
        self.token
    }

    pub fn state(&self) -> ChannelState {
        match self.state.load(Ordering::Acquire) {
            OPEN => ChannelState::Open,
            CLOSING => ChannelState::Closing,
            _ => ChannelState::Closed,
        }
    }

    pub fn is_open(&self) -> bool {
        self.state.load(Ordering::Acquire) == OPEN
    }

    pub fn is_closing(&self) -> bool {
        self.state.load(Ordering::Acquire) == CLOSING
    }

    pub fn is_closed(&self) -> bool {
        self.state.load(Ordering::Acquire) == CLOSED
    }

    /// Local address, resolved on first use and cached.
    pub fn local_address(&self) -> SocketAddr {
        *self.local.get_or_init(|| {
            self.socket
                .lock()
                .as_ref()
                .and_then(|socket| socket.local_addr().ok())
                .unwrap_or(ERROR_SOCKET_ADDRESS)
        })
    }

    /// Remote address, resolved on first use and cached.
    pub fn remote_address(&self) -> SocketAddr {
        *self.remote.get_or_init(|| {
            self.socket
                .lock()
                .as_ref()
                .and_then(|socket| socket.peer_addr().ok())
                .unwrap_or(ERROR_SOCKET_ADDRESS)
        })
    }

    /// Enqueues a write task. Callable from any thread.
    ///
    /// Failures are reported through the task's callback, never returned:
    /// `ClosedChannel` when the channel is not open, `Rejected` when it closed
    /// concurrently or the backpressure policy refuses more bytes.
    pub fn flush(&self, task: WriteTask) {
        if !self.is_open() {
            task.complete(Err(Error::ClosedChannel));
            return;
        }

        let mut queue = self.queue.lock();

        if !self.is_open() {
            drop(queue);
            task.complete(Err(Error::Rejected("channel closed concurrently")));
            return;
        }

        if self.settings.backpressure == BackpressurePolicy::RejectWrites
            && queue.length + task.len() > self.settings.write_threshold
        {
            let pending = queue.length;
            drop(queue);
            debug!(
                channel = self.id,
                pending,
                threshold = self.settings.write_threshold,
                "Write rejected above threshold"
            );
            task.complete(Err(Error::Rejected("pending write threshold exceeded")));
            return;
        }

        let first = queue.push(task);
        drop(queue);

        if first {
            self.dispatcher.dispatch(self.token);
        }
    }

    /// Writes the in-flight task, popping the next one first when none is in flight.
    ///
    /// Only the owning event loop calls this (and the final pass of the physical
    /// close). A task that cannot be fully written stays in flight and is resumed
    /// on the next call.
    pub fn fire_event(&self) -> Result<FlushProgress> {
        if self.is_closed() {
            return Err(Error::ClosedChannel);
        }

        let mut in_flight = self.in_flight.lock();

        if in_flight.is_none() {
            *in_flight = self.queue.lock().pop();
        }

        let progress = {
            let Some(task) = in_flight.as_mut() else {
                return Ok(FlushProgress::Idle);
            };

            let mut socket = self.socket.lock();
            let Some(socket) = socket.as_mut() else {
                return Err(Error::ClosedChannel);
            };

            task.write_to(&mut **socket)?
        };

        if progress.written > 0 {
            self.mark_progress();
        }

        if !progress.complete {
            return Ok(FlushProgress::Blocked);
        }

        let Some(task) = in_flight.take() else {
            return Ok(FlushProgress::Idle);
        };
        self.queue.lock().settle(task.len());
        drop(in_flight);

        trace!(channel = self.id, length = task.len(), "Write completed");
        task.complete(Ok(()));

        Ok(FlushProgress::Completed)
    }

    /// Non-blocking read passthrough.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let mut socket = self.socket.lock();
        let socket = socket.as_mut().ok_or(Error::ClosedChannel)?;

        Ok(socket.read(buf)?)
    }

    /// Non-blocking write passthrough.
    pub fn write(&self, buf: &[u8]) -> Result<usize> {
        let mut socket = self.socket.lock();
        let socket = socket.as_mut().ok_or(Error::ClosedChannel)?;

        Ok(socket.write(buf)?)
    }

    /// Drains the socket into the pooled read buffer, reading at most `limit` bytes.
    pub(crate) fn fill_read_buffer(&self, limit: usize) -> Result<ReadOutcome> {
        let mut buffer = self.read_buffer.lock();
        let buffer = buffer.as_mut().ok_or(Error::ClosedChannel)?;
        let mut socket = self.socket.lock();
        let socket = socket.as_mut().ok_or(Error::ClosedChannel)?;

        let chunk = self.pool.buffer_size().max(1);
        let mut outcome = ReadOutcome {
            bytes: 0,
            eof: false,
            more: false,
        };

        while outcome.bytes < limit {
            let start = buffer.len();
            buffer.resize(start + chunk, 0);

            match socket.read(&mut buffer[start..]) {
                Ok(0) => {
                    buffer.truncate(start);
                    outcome.eof = true;
                    break;
                }
                Ok(n) => {
                    buffer.truncate(start + n);
                    outcome.bytes += n;
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => {
                    buffer.truncate(start);
                    break;
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => {
                    buffer.truncate(start);
                }
                Err(err) => {
                    buffer.truncate(start);
                    return Err(err.into());
                }
            }
        }

        outcome.more = !outcome.eof && outcome.bytes >= limit;
        if outcome.bytes > 0 {
            self.mark_progress();
        }

        Ok(outcome)
    }

    /// Runs `decode` over the read buffer until it yields no more frames.
    ///
    /// Fails with `Protocol` when the undecoded remainder outgrows
    /// `max_read_buffer`.
    pub(crate) fn decode_with<F>(
        &self,
        mut decode: impl FnMut(&mut BytesMut) -> io::Result<Option<F>>,
        frames: &mut Vec<F>,
    ) -> Result<()> {
        let mut buffer = self.read_buffer.lock();
        let buffer = buffer.as_mut().ok_or(Error::ClosedChannel)?;

        while let Some(frame) =
            decode(&mut *buffer).map_err(|err| Error::Protocol(err.to_string()))?
        {
            frames.push(frame);
        }

        if buffer.len() > self.settings.max_read_buffer {
            return Err(Error::Protocol(format!(
                "{} undecoded bytes exceed the read buffer limit of {}",
                buffer.len(),
                self.settings.max_read_buffer
            )));
        }

        Ok(())
    }

    /// Requests a close. The physical close runs later on the owning loop.
    pub fn close(&self) {
        if self
            .state
            .compare_exchange(OPEN, CLOSING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            debug!(channel = self.id, "Close requested");
            self.dispatcher.close(self.token);
        }
    }

    /// Terminal, idempotent teardown.
    ///
    /// Runs one bounded final flush, releases the read buffer, fails every
    /// unfinished write task with `ClosedChannel`, drops the readiness
    /// registration and the socket, then invokes the closeable service hook.
    pub fn physical_close(&self) {
        if self.close_once.swap(true, Ordering::AcqRel) {
            return;
        }

        let _ = self
            .state
            .compare_exchange(OPEN, CLOSING, Ordering::AcqRel, Ordering::Acquire);

        self.final_flush();

        self.state.store(CLOSED, Ordering::Release);

        if let Some(buffer) = self.read_buffer.lock().take() {
            self.pool.release(buffer);
        }

        self.release_write_futures();

        if let Some(mut socket) = self.socket.lock().take() {
            let _ = socket.deregister();
            let _ = socket.shutdown();
        }

        debug!(channel = self.id, token = self.token.0, "Channel closed");

        if let Some(service) = &self.service
            && let Err(err) = Arc::clone(service).physical_close()
        {
            error!(channel = self.id, error = %err, "Service close failed");
        }
    }

    // One pass over what was queued when the close started.
    fn final_flush(&self) {
        let budget = self.write_future_size() + 1;

        for _ in 0..budget {
            match self.fire_event() {
                Ok(FlushProgress::Completed) => continue,
                _ => break,
            }
        }
    }

    fn release_write_futures(&self) {
        let tasks: Vec<WriteTask> = {
            let mut in_flight = self.in_flight.lock();
            let mut queue = self.queue.lock();

            in_flight.take().into_iter().chain(queue.drain()).collect()
        };

        if !tasks.is_empty() {
            debug!(channel = self.id, discarded = tasks.len(), "Discarding unsent writes");
        }

        for task in tasks {
            task.complete(Err(Error::ClosedChannel));
        }
    }

    /// Clears the weak flag after observed progress.
    pub fn up_network_state(&self) {
        self.network.lock().up();
    }

    /// Records a liveness poll without progress.
    pub fn down_network_state(&self) {
        self.down_network_state_at(Instant::now());
    }

    /// Same as [`down_network_state`](Self::down_network_state) with an explicit clock.
    ///
    /// When the channel turns weak a synthetic write attempt is dispatched.
    pub fn down_network_state_at(&self, now: Instant) {
        let tripped = self
            .network
            .lock()
            .down(now, self.settings.network_weak_grace);

        if tripped {
            debug!(channel = self.id, "Channel marked network-weak");
            self.dispatcher.dispatch(self.token);
        }
    }

    pub fn is_network_weak(&self) -> bool {
        self.network.lock().is_weak()
    }

    /// Healthy channels are served before weak ones.
    pub fn is_positive(&self) -> bool {
        !self.is_network_weak()
    }

    /// True when nothing is in flight and nothing is queued.
    pub fn is_complete(&self) -> bool {
        if !self.queue.lock().pending.is_empty() {
            return false;
        }

        self.in_flight.lock().is_none()
    }

    /// True when tasks are waiting behind the in-flight one.
    pub fn need_flush(&self) -> bool {
        !self.queue.lock().pending.is_empty()
    }

    /// Accumulated byte length of the in-flight and queued tasks.
    pub fn write_future_length(&self) -> usize {
        self.queue.lock().length
    }

    /// Number of queued tasks, excluding the in-flight one.
    pub fn write_future_size(&self) -> usize {
        self.queue.lock().pending.len()
    }

    pub fn settings(&self) -> &ChannelSettings {
        &self.settings
    }

    pub(crate) fn mark_progress(&self) {
        self.progress.store(true, Ordering::Release);
    }

    pub(crate) fn take_progress(&self) -> bool {
        self.progress.swap(false, Ordering::AcqRel)
    }

    /// True while backpressure keeps the loop from reading this channel.
    pub fn reads_paused(&self) -> bool {
        self.reads_paused.load(Ordering::Acquire)
    }

    pub(crate) fn set_reads_paused(&self, paused: bool) {
        self.reads_paused.store(paused, Ordering::Release);
    }

    pub(crate) fn update_interest(&self, interest: Interest) -> io::Result<()> {
        match self.socket.lock().as_mut() {
            Some(socket) => socket.reregister(self.token, interest),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("token", &self.token)
            .field("state", &self.state())
            .finish()
    }
}
