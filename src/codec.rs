//! # Codec Facade
//!
//! Per-connection composition of the codec stack: version profile, codeset
//! context, type registry, buffer pool, and indirection policy, with
//! one-call encode/decode entry points.
//!
//! Messages produced by [`Codec::encode`] are self-contained: the first
//! octet is the endian flag, consumed once by [`Codec::decode`] and applied
//! to every later multi-byte field.

use crate::buffer::{
    BufferManagerRead, BufferManagerWrite, BufferPool, FragmentSink, FragmentSource,
};
use crate::codeset::{self, CodeSetComponentInfo, CodeSetContext};
use crate::config::CodecConfig;
use crate::core::{CdrReader, CdrWriter};
use crate::error::Result;
use crate::protocol::de::ValueReader;
use crate::protocol::registry::{FieldKind, TypeRegistry};
use crate::protocol::ser::ValueWriter;
use crate::protocol::value::Value;
use bytes::Bytes;
use std::sync::Arc;

/// A connection's codec: resolved once, then used for every message the
/// connection carries.
pub struct Codec {
    config: CodecConfig,
    registry: Arc<TypeRegistry>,
    codesets: CodeSetContext,
    pool: BufferPool,
}

impl Codec {
    pub fn new(config: CodecConfig, registry: Arc<TypeRegistry>) -> Result<Self> {
        config.validate_strict()?;
        let pool = BufferPool::new(config.buffers.pool_size);
        Ok(Codec {
            config,
            registry,
            codesets: CodeSetContext::bootstrap(),
            pool,
        })
    }

    pub fn config(&self) -> &CodecConfig {
        &self.config
    }

    /// Run codeset negotiation against the peer's advertised descriptors.
    /// Happens once per connection; the result is immutable afterwards.
    pub fn negotiate_codesets(&mut self, remote: &CodeSetComponentInfo) -> Result<()> {
        let local = CodeSetComponentInfo::local_default();
        let (narrow, wide) = codeset::negotiate(&local, remote)?;
        self.codesets.apply_negotiation(narrow, wide);
        Ok(())
    }

    /// A chunk-aware decoder over a complete message.
    pub fn reader(&self, data: Bytes) -> ValueReader {
        let mut inner = CdrReader::new(data, self.config.version);
        inner.set_codesets(self.codesets.clone());
        ValueReader::with_policy(inner, self.registry.clone(), self.config.indirection_policy)
    }

    /// A chunk-aware decoder over the first fragment of a message, with a
    /// continuation source for the rest.
    pub fn fragmented_reader(&self, first: Bytes, source: Box<dyn FragmentSource>) -> ValueReader {
        let mgr = BufferManagerRead::with_source(source);
        let mut inner = CdrReader::with_manager(first, mgr, self.config.version);
        inner.set_codesets(self.codesets.clone());
        ValueReader::with_policy(inner, self.registry.clone(), self.config.indirection_policy)
    }

    /// A chunk-aware encoder over pooled storage, growing in place.
    pub fn writer(&self) -> ValueWriter {
        let mut inner = CdrWriter::pooled(&self.pool, self.config.version);
        inner.set_little_endian(self.config.little_endian);
        inner.set_codesets(self.codesets.clone());
        ValueWriter::new(inner, self.registry.clone())
    }

    /// A chunk-aware encoder that hands full buffers to `sink` instead of
    /// growing, per the configured flush threshold.
    pub fn streaming_writer(&self, sink: Box<dyn FragmentSink>) -> ValueWriter {
        let mut inner = CdrWriter::pooled(&self.pool, self.config.version);
        inner.set_manager(BufferManagerWrite::streaming(
            sink,
            self.config.buffers.flush_threshold,
        ));
        inner.set_little_endian(self.config.little_endian);
        inner.set_codesets(self.codesets.clone());
        ValueWriter::new(inner, self.registry.clone())
    }

    /// Encode one value (a valuetype graph or a bare field) into a
    /// self-contained message.
    pub fn encode(&self, value: &Value) -> Result<Bytes> {
        let mut writer = self.writer();
        writer.write_endian_flag()?;
        writer.write_field(value)?;
        Ok(writer.finish())
    }

    /// Decode a self-contained message holding one valuetype graph.
    /// `expected` supplies the type when the wire carries no identifier.
    pub fn decode(&self, bytes: &[u8], expected: Option<&str>) -> Result<Value> {
        let mut reader = self.reader(Bytes::copy_from_slice(bytes));
        reader.consume_endian()?;
        reader.read_value(expected)
    }

    /// Decode a self-contained message holding one field of a known shape.
    pub fn decode_field(&self, bytes: &[u8], kind: &FieldKind) -> Result<Value> {
        let mut reader = self.reader(Bytes::copy_from_slice(bytes));
        reader.consume_endian()?;
        reader.read_field(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::value::ValueBody;

    fn codec_with(registry: TypeRegistry) -> Codec {
        Codec::new(CodecConfig::default(), Arc::new(registry)).unwrap()
    }

    #[test]
    fn field_round_trip() {
        let codec = codec_with(TypeRegistry::new());
        let bytes = codec.encode(&Value::Long(-12)).unwrap();
        let back = codec.decode_field(&bytes, &FieldKind::Long).unwrap();
        assert_eq!(back, Value::Long(-12));
    }

    #[test]
    fn value_round_trip() {
        let mut registry = TypeRegistry::new();
        registry.register_struct(
            "IDL:Point:1.0",
            vec![FieldKind::Long, FieldKind::Long],
        );
        let codec = codec_with(registry);

        let point = Value::from(
            ValueBody::new("IDL:Point:1.0").with_fields(vec![Value::Long(3), Value::Long(4)]),
        );
        let bytes = codec.encode(&point).unwrap();
        let back = codec.decode(&bytes, None).unwrap();
        assert_eq!(back, point);
    }
}
