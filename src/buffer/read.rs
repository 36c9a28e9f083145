//! Read-side buffer management.
//!
//! On underflow the manager asks a [`FragmentSource`] for the next byte
//! range of the message and splices it into the cursor. A read that needs
//! more bytes than every remaining fragment can supply is fatal.

use crate::buffer::cursor::ReadCursor;
use crate::error::{CdrError, Result};
use bytes::Bytes;
use tracing::trace;

/// Supplier of successive byte ranges of one message. Implemented by the
/// transport; `None` means the message has no further fragments.
pub trait FragmentSource {
    fn next_fragment(&mut self) -> Option<Bytes>;
}

/// A source over a pre-collected list of fragments. Useful for tests and
/// for transports that buffer whole messages up front.
pub struct SliceSource {
    fragments: std::vec::IntoIter<Bytes>,
}

impl SliceSource {
    pub fn new(fragments: Vec<Bytes>) -> Self {
        SliceSource {
            fragments: fragments.into_iter(),
        }
    }
}

impl FragmentSource for SliceSource {
    fn next_fragment(&mut self) -> Option<Bytes> {
        self.fragments.next()
    }
}

/// Read-side buffer manager: owns the continuation source and performs the
/// splice-on-underflow protocol.
pub struct BufferManagerRead {
    source: Option<Box<dyn FragmentSource>>,
}

impl BufferManagerRead {
    /// A manager with no continuation: the first fragment is the whole
    /// message, and underflow is immediately fatal.
    pub fn without_continuation() -> Self {
        BufferManagerRead { source: None }
    }

    pub fn with_source(source: Box<dyn FragmentSource>) -> Self {
        BufferManagerRead {
            source: Some(source),
        }
    }

    /// Ensure `needed` contiguous bytes are available at the cursor,
    /// splicing in further fragments as required.
    pub fn underflow(&mut self, cursor: &mut ReadCursor, needed: usize) -> Result<()> {
        while cursor.remaining() < needed {
            let fragment = self
                .source
                .as_mut()
                .and_then(|s| s.next_fragment())
                .ok_or(CdrError::TruncatedInput {
                    offset: cursor.logical_offset(),
                    needed: needed - cursor.remaining(),
                })?;
            trace!(
                len = fragment.len(),
                logical = cursor.logical_offset(),
                "splicing continuation fragment"
            );
            cursor.splice(fragment);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn underflow_splices_until_satisfied() {
        let mut cursor = ReadCursor::new(Bytes::from_static(&[1]));
        let mut mgr = BufferManagerRead::with_source(Box::new(SliceSource::new(vec![
            Bytes::from_static(&[2]),
            Bytes::from_static(&[3, 4]),
        ])));

        mgr.underflow(&mut cursor, 4).unwrap();
        assert_eq!(cursor.peek(4), &[1, 2, 3, 4]);
    }

    #[test]
    fn underflow_without_continuation_is_fatal() {
        let mut cursor = ReadCursor::new(Bytes::from_static(&[1, 2]));
        cursor.advance(1);
        let mut mgr = BufferManagerRead::without_continuation();

        let err = mgr.underflow(&mut cursor, 4).unwrap_err();
        match err {
            CdrError::TruncatedInput { offset, needed } => {
                assert_eq!(offset, 1);
                assert_eq!(needed, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
