//! Reusable receive buffers.
//!
//! Each selector event loop owns one [`ByteBufferPool`] and hands it to the channels
//! it creates. A channel acquires its read buffer when it is registered and gives it
//! back exactly once, during its physical close.

use bytes::BytesMut;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A bounded free list of [`BytesMut`] buffers.
///
/// Buffers smaller than `buffer_size` after use are not kept, so the pool never
/// hands out undersized buffers.
#[derive(Debug)]
pub struct ByteBufferPool {
    buffer_size: usize,
    capacity: usize,
    free: Mutex<Vec<BytesMut>>,
    allocated: AtomicUsize,
    released: AtomicUsize,
}

impl ByteBufferPool {
    /// Creates a pool of `buffer_size`-byte buffers keeping at most `capacity` idle.
    pub fn new(buffer_size: usize, capacity: usize) -> Self {
        Self {
            buffer_size,
            capacity,
            free: Mutex::new(Vec::with_capacity(capacity)),
            allocated: AtomicUsize::new(0),
            released: AtomicUsize::new(0),
        }
    }

    /// Returns an empty buffer with at least `buffer_size` bytes of capacity.
    pub fn acquire(&self) -> BytesMut {
        if let Some(buffer) = self.free.lock().pop() {
            return buffer;
        }

        self.allocated.fetch_add(1, Ordering::Relaxed);
        BytesMut::with_capacity(self.buffer_size)
    }

    /// Gives a buffer back to the pool.
    pub fn release(&self, mut buffer: BytesMut) {
        self.released.fetch_add(1, Ordering::Relaxed);
        buffer.clear();

        if buffer.capacity() < self.buffer_size {
            return;
        }

        let mut free = self.free.lock();
        if free.len() < self.capacity {
            free.push(buffer);
        }
    }

    /// Size of the buffers this pool hands out.
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Number of idle buffers currently held.
    pub fn idle(&self) -> usize {
        self.free.lock().len()
    }

    /// Number of buffers allocated because the free list was empty.
    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }

    /// Number of `release` calls served so far.
    pub fn released(&self) -> usize {
        self.released.load(Ordering::Relaxed)
    }
}
