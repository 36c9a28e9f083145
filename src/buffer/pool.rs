//! # Buffer Pool
//!
//! Object pool for message buffers to reduce allocation overhead when many
//! short-lived streams are opened per connection.
//!
//! Streams acquire a buffer on open and must release it on close, on every
//! exit path. A decode stream and an associated encode stream may end up
//! sharing one buffer (a reply reusing the request's storage); the
//! [`PooledBuffer::detach`] handshake keeps exactly one owner so the buffer
//! is returned to the pool once, not twice.
//!
//! ## Usage
//! ```rust
//! use cdr_wire::buffer::pool::BufferPool;
//!
//! let pool = BufferPool::new(16);
//! let mut buffer = pool.acquire();
//! buffer.as_mut().extend_from_slice(b"payload");
//! // Buffer automatically returned to pool on drop
//! ```

use bytes::BytesMut;
use std::sync::{Arc, Mutex};

/// Maximum buffer capacity eligible for pooling (64KB)
const MAX_POOLED_BUFFER_SIZE: usize = 64 * 1024;

/// Default buffer capacity
const DEFAULT_BUFFER_CAPACITY: usize = 1024;

/// A pooled buffer that returns itself to the pool when dropped.
///
/// The inner storage is an `Option` so ownership can be detached exactly
/// once; a detached buffer never reaches the pool a second time.
pub struct PooledBuffer {
    buffer: Option<BytesMut>,
    pool: Arc<Mutex<Vec<BytesMut>>>,
}

impl PooledBuffer {
    /// Get a mutable reference to the underlying buffer.
    #[allow(clippy::should_implement_trait)]
    pub fn as_mut(&mut self) -> &mut BytesMut {
        self.buffer.as_mut().unwrap_or_else(|| unreachable!())
    }

    /// Get an immutable reference to the underlying buffer.
    #[allow(clippy::should_implement_trait)]
    pub fn as_ref(&self) -> &BytesMut {
        self.buffer.as_ref().unwrap_or_else(|| unreachable!())
    }

    /// Take the storage out of this lease without returning it to the pool.
    ///
    /// Used when a second stream takes over ownership of a shared buffer:
    /// the original holder detaches, the new holder's lease becomes the one
    /// that releases.
    pub fn detach(mut self) -> BytesMut {
        self.buffer.take().unwrap_or_else(|| unreachable!())
    }

    /// Re-wrap storage previously taken with [`PooledBuffer::detach`] so it
    /// is again released to `pool` on drop.
    pub fn reattach(pool: &BufferPool, buffer: BytesMut) -> Self {
        PooledBuffer {
            buffer: Some(buffer),
            pool: pool.pool.clone(),
        }
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        let Some(mut buffer) = self.buffer.take() else {
            return; // detached, another owner releases
        };
        if buffer.capacity() <= MAX_POOLED_BUFFER_SIZE {
            buffer.clear();
            if let Ok(mut pool) = self.pool.lock() {
                pool.push(buffer);
            }
        }
        // Oversized buffers are simply deallocated
    }
}

/// Thread-safe pool of message buffers.
pub struct BufferPool {
    pool: Arc<Mutex<Vec<BytesMut>>>,
    initial_capacity: usize,
}

impl BufferPool {
    /// Create a new buffer pool with `pool_size` pre-allocated buffers.
    pub fn new(pool_size: usize) -> Self {
        let mut pool = Vec::with_capacity(pool_size);

        for _ in 0..pool_size {
            pool.push(BytesMut::with_capacity(DEFAULT_BUFFER_CAPACITY));
        }

        Self {
            pool: Arc::new(Mutex::new(pool)),
            initial_capacity: DEFAULT_BUFFER_CAPACITY,
        }
    }

    /// Acquire a buffer from the pool (or allocate a new one if pool is empty).
    pub fn acquire(&self) -> PooledBuffer {
        let buffer = if let Ok(mut pool) = self.pool.lock() {
            pool.pop()
                .unwrap_or_else(|| BytesMut::with_capacity(self.initial_capacity))
        } else {
            BytesMut::with_capacity(self.initial_capacity)
        };

        PooledBuffer {
            buffer: Some(buffer),
            pool: self.pool.clone(),
        }
    }

    /// Get the current number of available buffers in the pool.
    pub fn available(&self) -> usize {
        self.pool.lock().map(|p| p.len()).unwrap_or(0)
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(16)
    }
}

impl Clone for BufferPool {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            initial_capacity: self.initial_capacity,
        }
    }
}
