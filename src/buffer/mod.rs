//! # Buffer Management
//!
//! Buffer growth, fragmentation, and pooling for both stream directions.
//!
//! ## Components
//! - **Cursor**: position + declared length + fragment offset over one buffer
//! - **Read manager**: splices continuation fragments on underflow
//! - **Write manager**: grows in place or hands full buffers to the sink
//! - **Pool**: reusable message buffers with single-release bookkeeping
//!
//! The managers exclusively own buffer lifetime; streams acquire on open and
//! release on close, on every exit path.

pub mod cursor;
pub mod pool;
pub mod read;
pub mod write;

pub use cursor::{align_gap, ReadCursor, WriteCursor};
pub use pool::{BufferPool, PooledBuffer};
pub use read::{BufferManagerRead, FragmentSource, SliceSource};
pub use write::{BufferManagerWrite, FragmentSink, VecSink, WriteStrategy};
