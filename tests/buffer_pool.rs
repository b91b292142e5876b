use bytes::BufMut;
use netreactor::ByteBufferPool;

#[test]
fn released_buffers_are_reused_empty() {
    let pool = ByteBufferPool::new(64, 2);

    let mut buffer = pool.acquire();
    assert!(buffer.capacity() >= 64);
    buffer.put_slice(b"leftover");
    pool.release(buffer);

    assert_eq!(pool.idle(), 1);
    let buffer = pool.acquire();
    assert!(buffer.is_empty());
    assert_eq!(pool.allocated(), 1);
    assert_eq!(pool.idle(), 0);
}

#[test]
fn keeps_at_most_capacity_idle_buffers() {
    let pool = ByteBufferPool::new(32, 2);
    let buffers: Vec<_> = (0..4).map(|_| pool.acquire()).collect();
    assert_eq!(pool.allocated(), 4);

    for buffer in buffers {
        pool.release(buffer);
    }

    assert_eq!(pool.idle(), 2);
    assert_eq!(pool.released(), 4);
}

#[test]
fn undersized_buffers_are_dropped() {
    let pool = ByteBufferPool::new(32, 4);
    let mut buffer = pool.acquire();
    let capacity = buffer.capacity();
    buffer.put_bytes(0, capacity);

    // Splitting hands the whole capacity to the frame.
    let _frame = buffer.split_to(capacity);
    pool.release(buffer);

    assert_eq!(pool.idle(), 0);
    assert_eq!(pool.released(), 1);
}
