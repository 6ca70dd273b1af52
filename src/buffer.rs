//! Shared byte-buffer pool
//!
//! UDP relaying touches one buffer per datagram in each direction; renting
//! from a bounded free list keeps that off the allocator. Rented buffers
//! are single-owner and return to the pool on drop.

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};

/// Size of each pooled segment, large enough for a maximum UDP datagram
pub const SEGMENT_SIZE: usize = 64 * 1024;

/// Maximum number of idle segments kept for reuse
const MAX_IDLE_SEGMENTS: usize = 64;

/// Bounded pool of reusable byte buffers
pub struct BufferPool {
    free: Mutex<Vec<Vec<u8>>>,
    segment_size: usize,
    max_idle: usize,
}

impl BufferPool {
    /// Create a pool handing out `segment_size`-byte buffers
    pub fn new(segment_size: usize, max_idle: usize) -> Arc<Self> {
        Arc::new(BufferPool {
            free: Mutex::new(Vec::new()),
            segment_size,
            max_idle,
        })
    }

    /// Create a pool with the default segment size and idle bound
    pub fn with_defaults() -> Arc<Self> {
        Self::new(SEGMENT_SIZE, MAX_IDLE_SEGMENTS)
    }

    /// Rent a zero-filled buffer of the pool's segment size
    ///
    /// The buffer's length always equals the segment size on acquisition,
    /// so it can be handed straight to `recv_from`. Callers building
    /// frames clear it first.
    pub fn acquire(self: &Arc<Self>) -> PooledBuf {
        let reused = self.free.lock().unwrap_or_else(|e| e.into_inner()).pop();
        let mut buf = reused.unwrap_or_else(|| Vec::with_capacity(self.segment_size));
        buf.clear();
        buf.resize(self.segment_size, 0);

        PooledBuf {
            buf: Some(buf),
            pool: Arc::clone(self),
        }
    }

    fn release(&self, buf: Vec<u8>) {
        let mut free = self.free.lock().unwrap_or_else(|e| e.into_inner());
        if free.len() < self.max_idle {
            free.push(buf);
        }
    }

    #[cfg(test)]
    fn idle_count(&self) -> usize {
        self.free.lock().unwrap().len()
    }
}

/// A buffer rented from a [`BufferPool`]
///
/// Dereferences to `Vec<u8>`; returns to the pool when dropped.
pub struct PooledBuf {
    buf: Option<Vec<u8>>,
    pool: Arc<BufferPool>,
}

impl Deref for PooledBuf {
    type Target = Vec<u8>;

    fn deref(&self) -> &Vec<u8> {
        self.buf.as_ref().expect("buffer present until drop")
    }
}

impl DerefMut for PooledBuf {
    fn deref_mut(&mut self) -> &mut Vec<u8> {
        self.buf.as_mut().expect("buffer present until drop")
    }
}

impl Drop for PooledBuf {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.release(buf);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_full_length() {
        let pool = BufferPool::new(1024, 4);
        let buf = pool.acquire();
        assert_eq!(buf.len(), 1024);
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_buffer_returns_on_drop() {
        let pool = BufferPool::new(1024, 4);
        assert_eq!(pool.idle_count(), 0);

        let buf = pool.acquire();
        drop(buf);

        assert_eq!(pool.idle_count(), 1);
    }

    #[test]
    fn test_reuse_clears_previous_contents() {
        let pool = BufferPool::new(16, 4);

        let mut buf = pool.acquire();
        buf.clear();
        buf.extend_from_slice(b"leftover");
        drop(buf);

        let buf = pool.acquire();
        assert_eq!(buf.len(), 16);
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_idle_bound() {
        let pool = BufferPool::new(64, 2);

        let a = pool.acquire();
        let b = pool.acquire();
        let c = pool.acquire();
        drop(a);
        drop(b);
        drop(c);

        assert_eq!(pool.idle_count(), 2);
    }

    #[test]
    fn test_defaults() {
        let pool = BufferPool::with_defaults();
        let buf = pool.acquire();
        assert_eq!(buf.len(), SEGMENT_SIZE);
    }
}
