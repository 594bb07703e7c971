//! Pooled Read Buffers
//!
//! A concurrency-safe pool of fixed-capacity byte buffers shared by the
//! repair readers. Buffers are recycled across repair iterations to avoid
//! re-allocating the read working set on every pass, and the pool tracks
//! outstanding checkouts so a cancelled repair can assert everything came
//! back.

use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::BytesMut;
use parking_lot::Mutex;

/// A bounded pool of reusable read buffers.
pub struct BufferPool {
    /// Capacity of each pooled buffer
    buffer_size: usize,

    /// Maximum number of idle buffers retained
    max_pooled: usize,

    /// Idle buffers
    free: Mutex<Vec<BytesMut>>,

    /// Buffers currently checked out
    outstanding: AtomicUsize,
}

impl BufferPool {
    /// Create a pool of `buffer_size`-byte buffers, pre-allocating
    /// `prealloc` of them and retaining at most `max_pooled` idle buffers.
    pub fn new(buffer_size: usize, prealloc: usize, max_pooled: usize) -> Self {
        let free = (0..prealloc.min(max_pooled))
            .map(|_| BytesMut::with_capacity(buffer_size))
            .collect();
        Self {
            buffer_size,
            max_pooled,
            free: Mutex::new(free),
            outstanding: AtomicUsize::new(0),
        }
    }

    /// Capacity of the buffers this pool hands out.
    #[inline]
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Check out an empty buffer.
    pub fn get(&self) -> BytesMut {
        self.outstanding.fetch_add(1, Ordering::AcqRel);
        let mut buf = self
            .free
            .lock()
            .pop()
            .unwrap_or_else(|| BytesMut::with_capacity(self.buffer_size));
        buf.clear();
        buf
    }

    /// Check out a buffer filled with `len` zero bytes.
    pub fn get_zeroed(&self, len: usize) -> BytesMut {
        let mut buf = self.get();
        buf.resize(len, 0);
        buf
    }

    /// Return a buffer to the pool. Excess buffers beyond the retention
    /// limit are dropped.
    pub fn put(&self, buf: BytesMut) {
        let prev = self.outstanding.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "buffer returned twice");
        let mut free = self.free.lock();
        if free.len() < self.max_pooled {
            free.push(buf);
        }
    }

    /// Number of buffers currently checked out.
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    /// Number of idle buffers currently retained.
    pub fn idle(&self) -> usize {
        self.free.lock().len()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_put_cycle() {
        let pool = BufferPool::new(1024, 2, 4);
        assert_eq!(pool.idle(), 2);
        assert_eq!(pool.outstanding(), 0);

        let a = pool.get();
        let b = pool.get();
        let c = pool.get(); // beyond prealloc, freshly allocated
        assert_eq!(pool.outstanding(), 3);
        assert_eq!(pool.idle(), 0);

        pool.put(a);
        pool.put(b);
        pool.put(c);
        assert_eq!(pool.outstanding(), 0);
        assert_eq!(pool.idle(), 3);
    }

    #[test]
    fn test_retention_limit() {
        let pool = BufferPool::new(64, 0, 1);
        let a = pool.get();
        let b = pool.get();
        pool.put(a);
        pool.put(b);
        assert_eq!(pool.idle(), 1);
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn test_zeroed_buffers() {
        let pool = BufferPool::new(64, 1, 2);
        let mut buf = pool.get();
        buf.extend_from_slice(&[0xff; 32]);
        pool.put(buf);

        // A recycled buffer must come back empty and zero-fill on demand.
        let buf = pool.get_zeroed(16);
        assert_eq!(buf.len(), 16);
        assert!(buf.iter().all(|&b| b == 0));
        pool.put(buf);
    }
}
