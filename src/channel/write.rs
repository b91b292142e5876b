//! Write tasks and the per-channel pending queue.
//!
//! A [`WriteTask`] is one encoded frame plus its completion callback. Once handed
//! to a channel it belongs to that channel until it either finishes transmitting
//! (callback gets `Ok(())`) or the channel closes (callback gets an error). The
//! callback runs exactly once: it is stored in an `Option` and taken on
//! completion, and a task dropped without completing reports `ClosedChannel`.

use crate::channel::socket::SocketIo;
use crate::error::{Error, Result};

use bytes::{Buf, Bytes};
use std::collections::VecDeque;
use std::fmt;
use std::io::{self, ErrorKind};

/// Completion callback of a write task.
pub type WriteCallback = Box<dyn FnOnce(Result<()>) + Send + 'static>;

/// One outbound frame awaiting transmission.
///
/// The payload may span several chunks; a cursor over them lets a partially
/// written task resume where the socket stopped accepting bytes.
///
/// # Example
/// ```ignore
/// let task = WriteTask::new(&b"hello\n"[..]).on_complete(|result| {
///     if let Err(err) = result {
///         eprintln!("write failed: {err}");
///     }
/// });
/// session.flush(task);
/// ```
pub struct WriteTask {
    chunks: VecDeque<Bytes>,
    length: usize,
    written: usize,
    callback: Option<WriteCallback>,
}

/// Outcome of one attempt at pushing a task's bytes into the socket.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct WriteProgress {
    pub(crate) written: usize,
    pub(crate) complete: bool,
}

impl WriteTask {
    /// Creates a task from a single buffer.
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self::from_chunks([payload.into()])
    }

    /// Creates a task from several buffers written back to back.
    pub fn from_chunks(chunks: impl IntoIterator<Item = Bytes>) -> Self {
        let chunks: VecDeque<Bytes> = chunks.into_iter().filter(|c| !c.is_empty()).collect();
        let length = chunks.iter().map(Bytes::len).sum();

        Self {
            chunks,
            length,
            written: 0,
            callback: None,
        }
    }

    /// Attaches the completion callback, replacing any previous one.
    pub fn on_complete(mut self, callback: impl FnOnce(Result<()>) + Send + 'static) -> Self {
        self.callback = Some(Box::new(callback));
        self
    }

    /// Serialized byte length declared when the task was built.
    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Bytes not yet accepted by the socket.
    pub fn remaining(&self) -> usize {
        self.length - self.written
    }

    /// Writes as much of the remaining payload as the socket accepts.
    ///
    /// Stops at `WouldBlock` without error. A socket that accepts zero bytes for a
    /// non-empty buffer is reported as `WriteZero`.
    pub(crate) fn write_to(&mut self, socket: &mut dyn SocketIo) -> io::Result<WriteProgress> {
        let mut written = 0;

        loop {
            let Some(chunk) = self.chunks.front_mut() else {
                return Ok(WriteProgress {
                    written,
                    complete: true,
                });
            };

            if chunk.is_empty() {
                self.chunks.pop_front();
                continue;
            }

            match socket.write(chunk) {
                Ok(0) => {
                    return Err(io::Error::new(
                        ErrorKind::WriteZero,
                        "socket accepted zero bytes",
                    ));
                }
                Ok(n) => {
                    chunk.advance(n);
                    self.written += n;
                    written += n;
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => {
                    return Ok(WriteProgress {
                        written,
                        complete: false,
                    });
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }
    }

    /// Releases the payload and reports the terminal result.
    pub(crate) fn complete(mut self, result: Result<()>) {
        self.chunks.clear();

        if let Some(callback) = self.callback.take() {
            callback(result);
        }
    }
}

impl Drop for WriteTask {
    fn drop(&mut self) {
        if let Some(callback) = self.callback.take() {
            callback(Err(Error::ClosedChannel));
        }
    }
}

impl fmt::Debug for WriteTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteTask")
            .field("length", &self.length)
            .field("written", &self.written)
            .field("chunks", &self.chunks.len())
            .finish()
    }
}

/// Pending tasks plus the accumulated byte length of everything not yet sent,
/// including the in-flight task.
#[derive(Debug, Default)]
pub(crate) struct WriteQueue {
    pub(crate) pending: VecDeque<WriteTask>,
    pub(crate) length: usize,
}

impl WriteQueue {
    /// Appends a task and returns true when the queue was empty before.
    pub(crate) fn push(&mut self, task: WriteTask) -> bool {
        self.length += task.len();
        self.pending.push_back(task);

        self.pending.len() == 1
    }

    pub(crate) fn pop(&mut self) -> Option<WriteTask> {
        self.pending.pop_front()
    }

    /// Subtracts a finished task's length.
    pub(crate) fn settle(&mut self, length: usize) {
        self.length = self.length.saturating_sub(length);
    }

    /// Removes every pending task and resets the length.
    pub(crate) fn drain(&mut self) -> Vec<WriteTask> {
        self.length = 0;
        self.pending.drain(..).collect()
    }
}
