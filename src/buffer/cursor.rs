//! Byte cursors over message buffers.
//!
//! A cursor couples a buffer with a position, a declared length, and a
//! fragment offset: the cumulative count of bytes consumed from prior
//! fragments of the same message. The *logical* offset (`fragment offset +
//! position`) is what alignment, chunk boundaries, and indirection targets
//! are computed against, so all three survive fragmentation.
//!
//! A cursor is replaced wholesale when a fragment boundary is crossed; see
//! [`ReadCursor::splice`].

use bytes::{Bytes, BytesMut};

/// Number of padding bytes needed to bring `offset` up to an `align`-byte
/// boundary. `align` must be a power of two.
#[inline]
pub fn align_gap(offset: u64, align: usize) -> usize {
    if align > 1 {
        let incr = (offset & (align as u64 - 1)) as usize;
        if incr != 0 {
            return align - incr;
        }
    }
    0
}

/// Read-side cursor over one fragment of an incoming message.
#[derive(Debug, Clone)]
pub struct ReadCursor {
    buf: Bytes,
    pos: usize,
    limit: usize,
    fragment_offset: u64,
}

impl ReadCursor {
    /// Wrap a complete fragment; the declared length is the fragment length.
    pub fn new(buf: Bytes) -> Self {
        let limit = buf.len();
        ReadCursor {
            buf,
            pos: 0,
            limit,
            fragment_offset: 0,
        }
    }

    /// Offset within the whole message, independent of fragmentation.
    #[inline]
    pub fn logical_offset(&self) -> u64 {
        self.fragment_offset + self.pos as u64
    }

    /// Unread bytes left in the current fragment.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.limit - self.pos
    }

    /// Borrow the next `n` unread bytes. Callers must have checked
    /// `remaining() >= n`.
    #[inline]
    pub fn peek(&self, n: usize) -> &[u8] {
        &self.buf[self.pos..self.pos + n]
    }

    #[inline]
    pub fn advance(&mut self, n: usize) {
        debug_assert!(self.pos + n <= self.limit);
        self.pos += n;
    }

    /// Step the position back by `n` bytes within the current fragment.
    /// Returns false when the bytes have already been surrendered to a prior
    /// fragment and the rewind is impossible.
    #[inline]
    pub fn rewind(&mut self, n: usize) -> bool {
        if self.pos < n {
            return false;
        }
        self.pos -= n;
        true
    }

    /// Position within the current fragment.
    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    #[inline]
    pub fn set_position(&mut self, pos: usize) {
        debug_assert!(pos <= self.limit);
        self.pos = pos;
    }

    /// Cumulative bytes consumed from prior fragments.
    #[inline]
    pub fn fragment_offset(&self) -> u64 {
        self.fragment_offset
    }

    /// Cross a fragment boundary: the unread tail of the current fragment is
    /// carried over in front of `next`, and the fragment offset advances by
    /// the bytes consumed from the prior range. The logical offset is
    /// unchanged.
    pub fn splice(&mut self, next: Bytes) {
        let mut joined = BytesMut::with_capacity(self.remaining() + next.len());
        joined.extend_from_slice(&self.buf[self.pos..self.limit]);
        joined.extend_from_slice(&next);
        self.fragment_offset += self.pos as u64;
        self.buf = joined.freeze();
        self.pos = 0;
        self.limit = self.buf.len();
    }
}

/// Write-side cursor over one outgoing buffer. The write position is always
/// the end of the buffer except for explicit back-patches.
#[derive(Debug)]
pub struct WriteCursor {
    buf: BytesMut,
    fragment_offset: u64,
}

impl WriteCursor {
    pub fn new(buf: BytesMut) -> Self {
        WriteCursor {
            buf,
            fragment_offset: 0,
        }
    }

    #[inline]
    pub fn logical_offset(&self) -> u64 {
        self.fragment_offset + self.buf.len() as u64
    }

    /// Bytes written into the current buffer.
    #[inline]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    #[inline]
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Append `n` zero padding bytes.
    #[inline]
    pub fn pad(&mut self, n: usize) {
        for _ in 0..n {
            self.buf.extend_from_slice(&[0]);
        }
    }

    /// Overwrite 4 previously written bytes at buffer index `at`.
    #[inline]
    pub fn patch4(&mut self, at: usize, bytes: [u8; 4]) {
        self.buf[at..at + 4].copy_from_slice(&bytes);
    }

    /// Discard the last `n` written bytes (end-tag compaction).
    #[inline]
    pub fn truncate_back(&mut self, n: usize) {
        let len = self.buf.len();
        debug_assert!(n <= len);
        self.buf.truncate(len - n);
    }

    /// Detach everything written so far as an immutable fragment, leaving the
    /// cursor ready for further writes with the fragment offset advanced.
    pub fn take_fragment(&mut self) -> Bytes {
        self.fragment_offset += self.buf.len() as u64;
        self.buf.split().freeze()
    }

    /// Consume the cursor, yielding the written bytes and the emptied
    /// storage for return to a pool.
    pub fn into_parts(mut self) -> (Bytes, BytesMut) {
        let data = self.buf.split().freeze();
        (data, self.buf)
    }
}
