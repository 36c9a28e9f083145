//! Chunk protocol state.
//!
//! One [`ChunkState`] lives per stream per message. `block_end` is the
//! logical offset where the active chunk ends, or `None` outside a chunk.
//! The two nesting counters exist because peers disagree on which enclosing
//! values an end tag counts: the legacy convention counts every enclosing
//! value, the current one only the chunked ones. Both move only on entering
//! or leaving a value.

/// Per-message chunking state, copied into snapshots and duplicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkState {
    /// Logical end offset of the active chunk, `None` when not in a chunk.
    pub(crate) block_end: Option<u64>,
    /// Nesting depth over all enclosing values (legacy end-tag convention);
    /// grows downward, so the outermost value sits at -1.
    pub(crate) end_level: i32,
    /// Nesting depth over enclosing chunked values only (current convention).
    pub(crate) chunked_level: i32,
    /// Whether the value currently being processed is chunked.
    pub(crate) in_chunked_value: bool,
}

impl ChunkState {
    pub fn new() -> Self {
        ChunkState {
            block_end: None,
            end_level: 0,
            chunked_level: 0,
            in_chunked_value: false,
        }
    }

    /// Entering a value body: both counters deepen, the chunked one only for
    /// chunked values.
    pub(crate) fn enter_value(&mut self) {
        self.end_level -= 1;
        if self.in_chunked_value {
            self.chunked_level -= 1;
        }
    }

    /// Leaving a value body; mirrors [`ChunkState::enter_value`].
    pub(crate) fn leave_value(&mut self) {
        if self.in_chunked_value {
            self.chunked_level += 1;
        }
        self.end_level += 1;
    }
}

impl Default for ChunkState {
    fn default() -> Self {
        Self::new()
    }
}
