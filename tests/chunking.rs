//! Chunk protocol tests: chunked bodies, forward-compatible partial reads,
//! end-tag compaction, custom body spans, and fragmented input.

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use cdr_wire::buffer::SliceSource;
use cdr_wire::codec::Codec;
use cdr_wire::config::CodecConfig;
use cdr_wire::error::{CdrError, Result};
use cdr_wire::protocol::{
    FieldKind, TypeRegistry, Value, ValueBody, ValueReader, ValueRef, ValueTypeCodec, ValueWriter,
};
use bytes::Bytes;
use std::sync::Arc;

fn codec(registry: TypeRegistry) -> Codec {
    Codec::new(CodecConfig::default(), Arc::new(registry)).expect("valid config")
}

fn chunked(type_id: &str, fields: Vec<Value>) -> Value {
    Value::Ref(ValueBody::new(type_id).chunked(true).with_fields(fields).into_ref())
}

#[test]
fn chunked_value_round_trips() {
    let mut registry = TypeRegistry::new();
    registry.register_struct("IDL:Point:1.0", vec![FieldKind::Long, FieldKind::Long]);
    let codec = codec(registry);

    let value = chunked("IDL:Point:1.0", vec![Value::Long(3), Value::Long(4)]);
    let bytes = codec.encode(&value).expect("encode");
    assert_eq!(codec.decode(&bytes, None).expect("decode"), value);
}

#[test]
fn nested_chunked_values_round_trip() {
    let mut registry = TypeRegistry::new();
    registry.register_struct("IDL:A:1.0", vec![FieldKind::Long, FieldKind::Value]);
    registry.register_struct("IDL:B:1.0", vec![FieldKind::Long, FieldKind::Value]);
    registry.register_struct("IDL:C:1.0", vec![FieldKind::Long]);
    let codec = codec(registry);

    let c = chunked("IDL:C:1.0", vec![Value::Long(3)]);
    let b = chunked("IDL:B:1.0", vec![Value::Long(2), c]);
    let a = chunked("IDL:A:1.0", vec![Value::Long(1), b]);

    let bytes = codec.encode(&a).expect("encode");
    assert_eq!(codec.decode(&bytes, None).expect("decode"), a);
}

#[test]
fn compacted_and_separate_end_tags_decode_identically() {
    let mut registry = TypeRegistry::new();
    registry.register_struct("IDL:A:1.0", vec![FieldKind::Long, FieldKind::Value]);
    registry.register_struct("IDL:B:1.0", vec![FieldKind::Long, FieldKind::Value]);
    registry.register_struct("IDL:C:1.0", vec![FieldKind::Long]);
    let codec = codec(registry);

    let c = chunked("IDL:C:1.0", vec![Value::Long(3)]);
    let b = chunked("IDL:B:1.0", vec![Value::Long(2), c]);
    let a = chunked("IDL:A:1.0", vec![Value::Long(1), b]);

    let compacted = codec.encode(&a).expect("encode");

    // All three values end together, so the encoder compacts their end tags
    // into one -1.
    assert_eq!(&compacted[compacted.len() - 4..], (-1i32).to_be_bytes());

    // Expand the single tag into the three separate ones a non-compacting
    // peer would send: -3, -2, -1.
    let mut separate = compacted[..compacted.len() - 4].to_vec();
    for tag in [-3i32, -2, -1] {
        separate.extend_from_slice(&tag.to_be_bytes());
    }

    let from_compacted = codec.decode(&compacted, None).expect("decode compacted");
    let from_separate = codec.decode(&separate, None).expect("decode separate");
    assert_eq!(from_compacted, a);
    assert_eq!(from_separate, a);
}

#[test]
fn partial_body_decoder_lands_on_next_sibling_field() {
    // Sender's schema has two fields; the receiver only understands one.
    let send_codec = codec(TypeRegistry::new());
    let mut recv_registry = TypeRegistry::new();
    recv_registry.register_struct("IDL:Grown:1.0", vec![FieldKind::Long]);
    let recv_codec = codec(recv_registry);

    let value = chunked("IDL:Grown:1.0", vec![Value::Long(11), Value::Long(22)]);
    let mut writer = send_codec.writer();
    writer.write_endian_flag().unwrap();
    writer.write_field(&value).unwrap();
    writer.write_field(&Value::Long(77)).unwrap();
    let bytes = writer.finish();

    let mut reader = recv_codec.reader(bytes);
    reader.consume_endian().unwrap();
    let decoded = reader.read_value(None).expect("decode with skip-forward");

    let Value::Ref(node) = decoded else {
        panic!("expected a value node")
    };
    assert_eq!(node.borrow().fields, vec![Value::Long(11)]);

    // The unread trailing field was skipped; the cursor sits at the sibling.
    assert_eq!(
        reader.read_field(&FieldKind::Long).expect("sibling field"),
        Value::Long(77)
    );
}

#[test]
fn fragmented_message_decodes_across_splices() {
    let mut registry = TypeRegistry::new();
    registry.register_struct("IDL:Point:1.0", vec![FieldKind::Long, FieldKind::Long]);
    let codec = codec(registry);

    let value = chunked("IDL:Point:1.0", vec![Value::Long(3), Value::Long(4)]);
    let bytes = codec.encode(&value).expect("encode");

    // Split inside the type identifier so several primitives straddle
    // fragment boundaries.
    let first = Bytes::copy_from_slice(&bytes[..10]);
    let rest = vec![
        Bytes::copy_from_slice(&bytes[10..11]),
        Bytes::copy_from_slice(&bytes[11..]),
    ];

    let mut reader = codec.fragmented_reader(first, Box::new(SliceSource::new(rest)));
    reader.consume_endian().unwrap();
    assert_eq!(reader.read_value(None).expect("decode"), value);
}

#[test]
fn streamed_fragments_decode_back() {
    use cdr_wire::buffer::FragmentSink;
    use cdr_wire::config::BufferConfig;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Clone, Default)]
    struct SharedSink(Rc<RefCell<Vec<Bytes>>>);

    impl FragmentSink for SharedSink {
        fn consume(&mut self, fragment: Bytes) {
            self.0.borrow_mut().push(fragment);
        }
    }

    let mut registry = TypeRegistry::new();
    registry.register_struct(
        "IDL:Blob:1.0",
        vec![FieldKind::Octets, FieldKind::Str, FieldKind::Long],
    );
    let config = CodecConfig::default_with_overrides(|c| {
        c.buffers = BufferConfig {
            write_strategy: cdr_wire::buffer::WriteStrategy::Stream,
            flush_threshold: 64,
            ..BufferConfig::default()
        };
    });
    let codec = Codec::new(config, Arc::new(registry)).expect("valid config");

    let value = chunked(
        "IDL:Blob:1.0",
        vec![
            Value::Octets(vec![7; 100]),
            Value::String("streamed".into()),
            Value::Long(5),
        ],
    );

    let sink = SharedSink::default();
    let mut writer = codec.streaming_writer(Box::new(sink.clone()));
    writer.write_endian_flag().unwrap();
    writer.write_field(&value).unwrap();
    writer.finish_streaming();

    let mut fragments = sink.0.borrow_mut().drain(..).collect::<Vec<_>>();
    assert!(fragments.len() > 1, "expected the 64-byte threshold to split");
    let first = fragments.remove(0);

    let mut reader = codec.fragmented_reader(first, Box::new(SliceSource::new(fragments)));
    reader.consume_endian().unwrap();
    assert_eq!(reader.read_value(None).expect("decode"), value);
}

// A value type with a base field plus a custom-marshaled optional region.
struct StampCodec {
    write_optional: bool,
}

impl ValueTypeCodec for StampCodec {
    fn decode_body(&self, reader: &mut ValueReader, target: &ValueRef) -> Result<()> {
        let base = reader.read_i32()?;
        target.borrow_mut().fields.push(Value::Long(base));

        reader.open_custom_body()?;
        let extra = match reader.read_i32() {
            Ok(v) => v,
            Err(CdrError::NoOptionalData) => 0,
            Err(e) => return Err(e),
        };
        reader.close_custom_body()?;
        target.borrow_mut().fields.push(Value::Long(extra));
        Ok(())
    }

    fn encode_body(&self, writer: &mut ValueWriter, body: &ValueBody) -> Result<()> {
        let Value::Long(base) = &body.fields[0] else {
            panic!("stamp base field must be a long")
        };
        writer.write_i32(*base)?;
        writer.open_custom_body("IDL:Stamp:1.0", self.write_optional)?;
        if self.write_optional {
            let Value::Long(extra) = &body.fields[1] else {
                panic!("stamp extra field must be a long")
            };
            writer.write_i32(*extra)?;
        }
        writer.close_custom_body()
    }
}

#[test]
fn custom_body_span_round_trips() {
    let mut registry = TypeRegistry::new();
    registry.register("IDL:Stamp:1.0", Arc::new(StampCodec { write_optional: true }));
    let codec = codec(registry);

    let value = chunked("IDL:Stamp:1.0", vec![Value::Long(7), Value::Long(99)]);
    let bytes = codec.encode(&value).expect("encode");
    assert_eq!(codec.decode(&bytes, None).expect("decode"), value);
}

#[test]
fn empty_custom_body_yields_no_optional_data() {
    let mut registry = TypeRegistry::new();
    registry.register("IDL:Stamp:1.0", Arc::new(StampCodec { write_optional: false }));
    let codec = codec(registry);

    // The decoder's read inside the empty span fails with NoOptionalData
    // and the codec falls back to a default.
    let value = chunked("IDL:Stamp:1.0", vec![Value::Long(7), Value::Long(99)]);
    let bytes = codec.encode(&value).expect("encode");
    let expected = chunked("IDL:Stamp:1.0", vec![Value::Long(7), Value::Long(0)]);
    assert_eq!(codec.decode(&bytes, None).expect("decode"), expected);
}
