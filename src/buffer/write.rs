//! Write-side buffer management.
//!
//! On overflow the manager either grows the buffer in place or hands the
//! full buffer to the transport as a fragment and starts a new one. The
//! strategy is selected per stream from configuration.

use crate::buffer::cursor::WriteCursor;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Consumer of outgoing byte ranges. Implemented by the transport.
pub trait FragmentSink {
    fn consume(&mut self, fragment: Bytes);
}

/// A sink that collects fragments in memory, for tests and loopback use.
#[derive(Default)]
pub struct VecSink {
    pub fragments: Vec<Bytes>,
}

impl FragmentSink for VecSink {
    fn consume(&mut self, fragment: Bytes) {
        self.fragments.push(fragment);
    }
}

/// Overflow strategy for outgoing buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteStrategy {
    /// Keep one buffer and let it grow to the message size.
    #[default]
    Grow,
    /// Hand full buffers to the sink and continue in a fresh one.
    Stream,
}

/// Write-side buffer manager.
pub struct BufferManagerWrite {
    strategy: WriteStrategy,
    sink: Option<Box<dyn FragmentSink>>,
    flush_threshold: usize,
}

impl BufferManagerWrite {
    pub fn growing() -> Self {
        BufferManagerWrite {
            strategy: WriteStrategy::Grow,
            sink: None,
            flush_threshold: usize::MAX,
        }
    }

    pub fn streaming(sink: Box<dyn FragmentSink>, flush_threshold: usize) -> Self {
        BufferManagerWrite {
            strategy: WriteStrategy::Stream,
            sink: Some(sink),
            flush_threshold,
        }
    }

    /// Called before each primitive write. `pinned` is set while a chunk
    /// length placeholder awaits back-patching; a pinned buffer must not be
    /// flushed, so it grows instead regardless of strategy.
    pub fn before_write(&mut self, cursor: &mut WriteCursor, needed: usize, pinned: bool) {
        if self.strategy != WriteStrategy::Stream || pinned {
            return;
        }
        if cursor.len() + needed > self.flush_threshold && !cursor.is_empty() {
            let fragment = cursor.take_fragment();
            trace!(len = fragment.len(), "flushing full write buffer");
            if let Some(sink) = self.sink.as_mut() {
                sink.consume(fragment);
            }
        }
    }

    /// Flush whatever remains in the cursor at end of message. Only
    /// meaningful for the streaming strategy.
    pub fn flush_remaining(&mut self, cursor: &mut WriteCursor) {
        if self.strategy != WriteStrategy::Stream {
            return;
        }
        if !cursor.is_empty() {
            let fragment = cursor.take_fragment();
            if let Some(sink) = self.sink.as_mut() {
                sink.consume(fragment);
            }
        }
    }
}
