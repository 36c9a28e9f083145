//! Round-trip tests over the full codec stack: primitives, struct values,
//! shared references, and cyclic graphs.

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use cdr_wire::codec::Codec;
use cdr_wire::config::CodecConfig;
use cdr_wire::core::{CdrReader, CdrWriter, Fixed};
use cdr_wire::protocol::{FieldKind, GiopVersion, TypeRegistry, Value, ValueBody};
use std::rc::Rc;
use std::sync::Arc;

fn codec(registry: TypeRegistry) -> Codec {
    Codec::new(CodecConfig::default(), Arc::new(registry)).expect("valid config")
}

#[test]
fn every_primitive_round_trips() {
    let codec = codec(TypeRegistry::new());
    let cases: Vec<(Value, FieldKind)> = vec![
        (Value::Bool(true), FieldKind::Bool),
        (Value::Octet(0xa5), FieldKind::Octet),
        (Value::Short(-1234), FieldKind::Short),
        (Value::UShort(56789), FieldKind::UShort),
        (Value::Long(-123_456_789), FieldKind::Long),
        (Value::ULong(3_000_000_000), FieldKind::ULong),
        (Value::LongLong(-9_000_000_000_000), FieldKind::LongLong),
        (Value::ULongLong(18_000_000_000_000_000_000), FieldKind::ULongLong),
        (Value::Float(3.5), FieldKind::Float),
        (Value::Double(-2.25e100), FieldKind::Double),
        (Value::Char('k'), FieldKind::Char),
        (Value::WChar('\u{2603}'), FieldKind::WChar),
        (Value::String("hello".into()), FieldKind::Str),
        (Value::WString("wide \u{1f600}".into()), FieldKind::WStr),
        (Value::Octets(vec![1, 2, 3, 4, 5]), FieldKind::Octets),
        (
            Value::Fixed(Fixed::new(true, vec![9, 8, 7], 1)),
            FieldKind::Fixed { digits: 3, scale: 1 },
        ),
        (
            Value::Sequence(vec![Value::Long(1), Value::Long(2), Value::Long(3)]),
            FieldKind::Sequence(Box::new(FieldKind::Long)),
        ),
    ];

    for (value, kind) in cases {
        let bytes = codec.encode(&value).expect("encode");
        let back = codec.decode_field(&bytes, &kind).expect("decode");
        assert_eq!(back, value);
    }
}

#[test]
fn alignment_places_wide_field_on_its_boundary() {
    let cases: Vec<(usize, fn(&mut CdrWriter))> = vec![
        (2, |w| w.write_u16(7).unwrap()),
        (4, |w| w.write_u32(7).unwrap()),
        (8, |w| w.write_u64(7).unwrap()),
    ];
    for (width, write) in cases {
        let mut w = CdrWriter::new(GiopVersion::V1_2);
        w.write_octet(1).unwrap();
        write(&mut w);
        let bytes = w.finish();
        assert_eq!(bytes.len(), width * 2);
        // padding between the octet and the wide field is zero-filled
        assert!(bytes[1..width].iter().all(|&b| b == 0));
        let mut r = CdrReader::new(bytes, GiopVersion::V1_2);
        assert_eq!(r.read_octet().unwrap(), 1);
        assert_eq!(r.logical_position(), 1);
    }
}

#[test]
fn struct_value_round_trips() {
    let mut registry = TypeRegistry::new();
    registry.register_struct(
        "IDL:Sample:1.0",
        vec![
            FieldKind::Long,
            FieldKind::Str,
            FieldKind::Double,
            FieldKind::Sequence(Box::new(FieldKind::Short)),
        ],
    );
    let codec = codec(registry);

    let value = Value::from(ValueBody::new("IDL:Sample:1.0").with_fields(vec![
        Value::Long(42),
        Value::String("payload".into()),
        Value::Double(1.5),
        Value::Sequence(vec![Value::Short(1), Value::Short(-2)]),
    ]));
    let bytes = codec.encode(&value).expect("encode");
    let back = codec.decode(&bytes, None).expect("decode");
    assert_eq!(back, value);
}

#[test]
fn shared_value_encodes_once_and_decodes_shared() {
    let mut registry = TypeRegistry::new();
    registry.register_struct("IDL:S:1.0", vec![FieldKind::Long]);
    registry.register_struct("IDL:Pair:1.0", vec![FieldKind::Value, FieldKind::Value]);
    let codec = codec(registry);

    let shared = ValueBody::new("IDL:S:1.0")
        .with_fields(vec![Value::Long(9)])
        .into_ref();
    let pair = Value::from(ValueBody::new("IDL:Pair:1.0").with_fields(vec![
        Value::Ref(shared.clone()),
        Value::Ref(shared),
    ]));

    let bytes = codec.encode(&pair).expect("encode");

    // Exactly one full encoding: the shared type id appears once on the wire
    let needle = b"IDL:S:1.0";
    let occurrences = bytes
        .windows(needle.len())
        .filter(|w| w == needle)
        .count();
    assert_eq!(occurrences, 1);

    let back = codec.decode(&bytes, None).expect("decode");
    assert_eq!(back, pair);

    // Both occurrences resolve to one shared instance
    let Value::Ref(outer) = back else {
        panic!("expected a value node")
    };
    let outer = outer.borrow();
    let (Value::Ref(a), Value::Ref(b)) = (&outer.fields[0], &outer.fields[1]) else {
        panic!("expected two value fields")
    };
    assert!(Rc::ptr_eq(a, b));
}

#[test]
fn cyclic_graph_round_trips_to_a_real_cycle() {
    let mut registry = TypeRegistry::new();
    registry.register_struct("IDL:Node:1.0", vec![FieldKind::Long, FieldKind::Value]);
    let codec = codec(registry);

    // a references b references a
    let a = ValueBody::new("IDL:Node:1.0").into_ref();
    let b = ValueBody::new("IDL:Node:1.0").into_ref();
    a.borrow_mut().fields = vec![Value::Long(1), Value::Ref(b.clone())];
    b.borrow_mut().fields = vec![Value::Long(2), Value::Ref(a.clone())];

    let bytes = codec.encode(&Value::Ref(a.clone())).expect("encode");
    let back = codec.decode(&bytes, None).expect("decode");
    assert_eq!(back, Value::Ref(a));

    let Value::Ref(decoded_a) = back else {
        panic!("expected a value node")
    };
    let decoded_b = match &decoded_a.borrow().fields[1] {
        Value::Ref(n) => n.clone(),
        other => panic!("expected nested node, got {other:?}"),
    };
    match &decoded_b.borrow().fields[1] {
        Value::Ref(back_to_a) => assert!(Rc::ptr_eq(back_to_a, &decoded_a)),
        other => panic!("expected cycle back, got {other:?}"),
    };
}

#[test]
fn null_fields_round_trip() {
    let mut registry = TypeRegistry::new();
    registry.register_struct("IDL:Opt:1.0", vec![FieldKind::Value, FieldKind::Long]);
    let codec = codec(registry);

    let value = Value::from(
        ValueBody::new("IDL:Opt:1.0").with_fields(vec![Value::Null, Value::Long(5)]),
    );
    let bytes = codec.encode(&value).expect("encode");
    assert_eq!(codec.decode(&bytes, None).expect("decode"), value);
}

#[test]
fn duplicate_shares_the_indirection_space() {
    let mut registry = TypeRegistry::new();
    registry.register_struct("IDL:S:1.0", vec![FieldKind::Long]);
    let codec = codec(registry);

    // Two top-level occurrences of one value: a direct body then an
    // indirection.
    let shared = ValueBody::new("IDL:S:1.0")
        .with_fields(vec![Value::Long(3)])
        .into_ref();
    let mut writer = codec.writer();
    writer.write_endian_flag().unwrap();
    writer.write_value(&Value::Ref(shared.clone())).unwrap();
    writer.write_value(&Value::Ref(shared)).unwrap();
    let bytes = writer.finish();

    let mut reader = codec.reader(bytes);
    reader.consume_endian().unwrap();
    let first = reader.read_value(None).expect("direct value");

    // The nested body decoder reads the indirection through a duplicate
    // sharing the same offset space.
    let mut dup = reader.duplicate();
    let second = dup.read_value(None).expect("indirection via duplicate");

    let (Value::Ref(a), Value::Ref(b)) = (&first, &second) else {
        panic!("expected value nodes")
    };
    assert!(Rc::ptr_eq(a, b));
}

#[test]
fn snapshot_restore_rewinds_a_value_reader() {
    let codec = codec(TypeRegistry::new());
    let bytes = codec.encode(&Value::Long(31)).expect("encode");

    let mut reader = codec.reader(bytes);
    reader.consume_endian().unwrap();
    let snap = reader.snapshot();
    assert_eq!(reader.read_field(&FieldKind::Long).unwrap(), Value::Long(31));
    reader.restore(snap).expect("restore");
    assert_eq!(reader.read_field(&FieldKind::Long).unwrap(), Value::Long(31));
}
