//! Sessions: the application's handle over one channel.
//!
//! A [`Session`] is cheap to clone and safe to use from any thread. Writing goes
//! through the shared protocol encoder and then into the channel's write queue.
//! The event loop removes a session from its [`SessionRegistry`] once the channel
//! is physically closed.

use crate::channel::{Channel, WriteTask};
use crate::error::{Error, Result};
use crate::protocol::ProtocolEncoder;

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

/// Identifier shared by a session and its channel.
pub type SessionId = u64;

struct Inner<F> {
    id: SessionId,
    channel: Arc<Channel>,
    encoder: Arc<dyn ProtocolEncoder<Frame = F>>,
}

/// Handle over one channel, typed by the frames of its protocol.
pub struct Session<F> {
    inner: Arc<Inner<F>>,
}

impl<F: Send + 'static> Session<F> {
    pub(crate) fn new(channel: Arc<Channel>, encoder: Arc<dyn ProtocolEncoder<Frame = F>>) -> Self {
        Self {
            inner: Arc::new(Inner {
                id: channel.id(),
                channel,
                encoder,
            }),
        }
    }

    pub fn id(&self) -> SessionId {
        self.inner.id
    }

    pub fn channel(&self) -> &Arc<Channel> {
        &self.inner.channel
    }

    /// Encodes `frame` and enqueues it without waiting for the outcome.
    ///
    /// Encoding failures are returned; transmission failures are only logged by
    /// the channel.
    pub fn write(&self, frame: F) -> Result<()> {
        let task = self.encode(frame)?;
        self.inner.channel.flush(task);

        Ok(())
    }

    /// Encodes `frame` and enqueues it, reporting the outcome to `callback`.
    pub fn write_with(
        &self,
        frame: F,
        callback: impl FnOnce(Result<()>) + Send + 'static,
    ) -> Result<()> {
        let task = self.encode(frame)?.on_complete(callback);
        self.inner.channel.flush(task);

        Ok(())
    }

    /// Enqueues an already encoded task.
    pub fn flush(&self, task: WriteTask) {
        self.inner.channel.flush(task);
    }

    /// Requests a close; the channel is torn down on its event loop.
    pub fn close(&self) {
        self.inner.channel.close();
    }

    pub fn is_open(&self) -> bool {
        self.inner.channel.is_open()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.channel.is_closed()
    }

    pub fn local_address(&self) -> SocketAddr {
        self.inner.channel.local_address()
    }

    pub fn remote_address(&self) -> SocketAddr {
        self.inner.channel.remote_address()
    }

    /// Bytes accepted for writing but not yet transmitted.
    pub fn pending_write_length(&self) -> usize {
        self.inner.channel.write_future_length()
    }

    fn encode(&self, frame: F) -> Result<WriteTask> {
        if !self.inner.channel.is_open() {
            return Err(Error::ClosedChannel);
        }

        self.inner
            .encoder
            .encode(frame)
            .map_err(|err| Error::Protocol(err.to_string()))
    }
}

impl<F> Clone for Session<F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<F> fmt::Debug for Session<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("channel", &self.inner.channel)
            .finish()
    }
}

/// Open sessions of a context, keyed by id.
pub struct SessionRegistry<F> {
    sessions: Mutex<HashMap<SessionId, Session<F>>>,
}

impl<F> SessionRegistry<F> {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn insert(&self, session: Session<F>) {
        self.sessions.lock().insert(session.inner.id, session);
    }

    pub(crate) fn remove(&self, id: SessionId) -> Option<Session<F>> {
        self.sessions.lock().remove(&id)
    }

    pub fn get(&self, id: SessionId) -> Option<Session<F>> {
        self.sessions.lock().get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }

    /// Snapshot of the currently open sessions.
    pub fn sessions(&self) -> Vec<Session<F>> {
        self.sessions.lock().values().cloned().collect()
    }
}

impl<F> Default for SessionRegistry<F> {
    fn default() -> Self {
        Self::new()
    }
}
