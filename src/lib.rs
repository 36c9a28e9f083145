//! # cdr-wire
//!
//! Versioned CDR value-marshaling codec.
//!
//! Encodes and decodes primitives, strings, arrays, and polymorphic,
//! possibly-chunked, possibly cyclic or shared valuetypes to and from a
//! flat byte stream, across three GIOP wire revisions, under buffer
//! fragmentation and negotiated text encodings.
//!
//! ## Architecture
//! - [`buffer`]: growth, fragmentation, and pooling for both directions
//! - [`core`]: aligned, endian-aware primitive codec
//! - [`codeset`]: narrow/wide text encoding negotiation and conversion
//! - [`protocol`]: value tags, chunk state machine, indirection tables,
//!   type resolution, per-revision rules
//! - [`codec`]: per-connection facade with encode/decode entry points
//!
//! ## Example
//! ```rust
//! use cdr_wire::codec::Codec;
//! use cdr_wire::config::CodecConfig;
//! use cdr_wire::protocol::{FieldKind, TypeRegistry, Value, ValueBody};
//! use std::sync::Arc;
//!
//! let mut registry = TypeRegistry::new();
//! registry.register_struct("IDL:Point:1.0", vec![FieldKind::Long, FieldKind::Long]);
//! let codec = Codec::new(CodecConfig::default(), Arc::new(registry)).unwrap();
//!
//! let point = Value::from(
//!     ValueBody::new("IDL:Point:1.0")
//!         .with_fields(vec![Value::Long(3), Value::Long(4)]),
//! );
//! let bytes = codec.encode(&point).unwrap();
//! let back = codec.decode(&bytes, None).unwrap();
//! assert_eq!(back, point);
//! ```
//!
//! ## Scope
//! The codec consumes a byte-range supplier/consumer and a type resolver;
//! connection lifecycle, object-reference naming, and transport security
//! belong to the surrounding service and transport layers.

pub mod buffer;
pub mod codec;
pub mod codeset;
pub mod config;
pub mod core;
pub mod error;
pub mod protocol;

pub use codec::Codec;
pub use config::CodecConfig;
pub use error::{CdrError, Result};
pub use protocol::{
    FieldKind, GiopVersion, IndirectionPolicy, TypeRegistry, Value, ValueBody, ValueReader,
    ValueWriter,
};
