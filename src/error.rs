//! # Error Types
//!
//! Comprehensive error handling for the CDR codec.
//!
//! This module defines all error variants that can occur while marshaling or
//! unmarshaling, from low-level buffer exhaustion to protocol violations in
//! the valuetype chunk protocol.
//!
//! ## Error Categories
//! - **Format Errors**: malformed tags, lengths, nibbles, chunk boundaries
//! - **Truncation**: input ended mid-primitive with no continuation available
//! - **Indirection Errors**: back-references to offsets never seen
//! - **Version Errors**: features used under a wire revision that forbids them
//! - **Type Errors**: identifiers with no registered codec and no fallback
//! - **CodeSet Errors**: no mutually understood text encoding
//!
//! All errors implement `std::error::Error` for interoperability. Decoding is
//! all-or-nothing: after any error the stream position is undefined for reuse.

use crate::protocol::version::GiopVersion;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
/// Static strings are borrowed, avoiding heap allocations for common error cases.
pub mod constants {
    /// Valuetype tag and chunk protocol errors
    pub const ERR_POSITIVE_END_TAG: &str = "End tag must be negative";
    pub const ERR_CHUNK_OVERFLOW: &str = "Read past the end of the current chunk";
    pub const ERR_BAD_CHUNK_LENGTH: &str = "Chunk length points behind the current position";
    pub const ERR_COULD_NOT_SKIP: &str = "Expected end tag, value tag, or null while skipping";
    pub const ERR_UNEXPECTED_ENCLOSING: &str = "End tag deeper than enclosing chunked values";
    pub const ERR_NO_TYPE_INFO: &str =
        "Value carries no type identifier and no expected type was supplied";

    /// String and primitive errors
    pub const ERR_NEGATIVE_STRING_LENGTH: &str = "Negative string length";
    pub const ERR_BAD_FIXED_NIBBLE: &str = "Invalid terminal nibble in fixed-point value";
    pub const ERR_FIXED_DIGIT_MISMATCH: &str =
        "Fixed-point digit count differs from declared digits";

    /// Custom-marshal body span errors
    pub const ERR_CUSTOM_INDIRECTION: &str = "Indirection where a custom body tag was expected";
    pub const ERR_CUSTOM_CODEBASE: &str = "Custom body tag must not carry a codebase";
    pub const ERR_CUSTOM_TYPE_INFO: &str = "Custom body tag must carry a single type identifier";

    /// Snapshot errors
    pub const ERR_SNAPSHOT_FRAGMENT: &str = "Snapshot refers to a fragment no longer buffered";
}

/// Primary error type for all codec operations.
#[derive(Error, Debug)]
pub enum CdrError {
    /// Malformed wire data: bad tag, bad length, bad nibble, chunk boundary
    /// violations. Always fatal.
    #[error("Format error at offset {offset}: {detail}")]
    Format { offset: u64, detail: String },

    /// The input ended in the middle of a primitive and the buffer manager
    /// had no further fragment to splice in.
    #[error("Truncated input: needed {needed} more bytes at offset {offset}")]
    TruncatedInput { offset: u64, needed: usize },

    /// An indirection pointed at an offset with no cached entry. Fatal under
    /// the strict policy; the deferred policy patches a placeholder instead.
    #[error("Unresolved indirection to offset {offset}")]
    UnresolvedIndirection { offset: u64 },

    /// A wire feature was used under a version profile that forbids it.
    #[error("{feature} is not supported under GIOP {version}")]
    UnsupportedFeature {
        version: GiopVersion,
        feature: &'static str,
    },

    /// No codec registered for any of the value's type identifiers, and the
    /// type locator (if any) could not supply one.
    #[error("Unknown value type: {type_id}")]
    UnknownType { type_id: String },

    /// Codeset negotiation found no mutually understood encoding. Fatal at
    /// connection setup, never per message.
    #[error("No mutually understood {kind} codeset between peers")]
    CodeSetMismatch { kind: &'static str },

    /// A read was attempted inside a custom body span that the sender left
    /// empty (null tag at open).
    #[error("No optional data available in custom body")]
    NoOptionalData,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl CdrError {
    /// Shorthand for a [`CdrError::Format`] with an owned detail message.
    pub fn format(offset: u64, detail: impl Into<String>) -> Self {
        CdrError::Format {
            offset,
            detail: detail.into(),
        }
    }
}

/// Type alias for Results using CdrError
pub type Result<T> = std::result::Result<T, CdrError>;
