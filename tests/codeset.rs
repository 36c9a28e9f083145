//! Codeset negotiation: wire format, converter selection, and the
//! bootstrap-then-invalidate sequence.

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use cdr_wire::codec::Codec;
use cdr_wire::codeset::{ids, CodeSetComponent, CodeSetComponentInfo};
use cdr_wire::config::CodecConfig;
use cdr_wire::core::{CdrReader, CdrWriter};
use cdr_wire::error::CdrError;
use cdr_wire::protocol::{FieldKind, GiopVersion, TypeRegistry, Value};
use std::sync::Arc;

#[test]
fn component_info_wire_round_trip() {
    let info = CodeSetComponentInfo {
        narrow: CodeSetComponent::new(ids::ISO_8859_1, vec![ids::UTF_8, ids::ISO_646]),
        wide: CodeSetComponent::new(ids::UTF_16, vec![ids::UCS_2]),
    };

    let mut writer = CdrWriter::new(GiopVersion::V1_2);
    info.write(&mut writer).expect("write");
    let bytes = writer.finish();

    // 2 kinds x (native + count) + 3 fallback ids, 4 bytes each
    assert_eq!(bytes.len(), 4 * 7);

    let mut reader = CdrReader::new(bytes, GiopVersion::V1_2);
    let back = CodeSetComponentInfo::read(&mut reader).expect("read");
    assert_eq!(back, info);
}

#[test]
fn negotiated_utf8_carries_non_latin_text() {
    let mut codec = Codec::new(CodecConfig::default(), Arc::new(TypeRegistry::new()))
        .expect("valid config");

    // Latin-1 cannot carry this string
    assert!(matches!(
        codec.encode(&Value::String("\u{65e5}\u{672c}".into())),
        Err(CdrError::Format { .. })
    ));

    // The peer's native narrow codeset is UTF-8, which we list as a
    // fallback; negotiation lands on it and invalidates the bootstrap
    // converter.
    let remote = CodeSetComponentInfo {
        narrow: CodeSetComponent::new(ids::UTF_8, vec![]),
        wide: CodeSetComponent::new(ids::UTF_16, vec![]),
    };
    codec.negotiate_codesets(&remote).expect("negotiate");

    let bytes = codec
        .encode(&Value::String("\u{65e5}\u{672c}".into()))
        .expect("encode after negotiation");
    assert_eq!(
        codec.decode_field(&bytes, &FieldKind::Str).expect("decode"),
        Value::String("\u{65e5}\u{672c}".into())
    );
}

#[test]
fn negotiation_without_common_ground_fails_at_setup() {
    let mut codec = Codec::new(CodecConfig::default(), Arc::new(TypeRegistry::new()))
        .expect("valid config");

    let remote = CodeSetComponentInfo {
        // An id this implementation has never heard of, with no fallbacks
        narrow: CodeSetComponent::new(0x0001_0002, vec![]),
        wide: CodeSetComponent::new(ids::UTF_16, vec![]),
    };
    assert!(matches!(
        codec.negotiate_codesets(&remote),
        Err(CdrError::CodeSetMismatch { kind: "narrow" })
    ));
}

#[test]
fn negotiation_is_applied_once() {
    let mut codec = Codec::new(CodecConfig::default(), Arc::new(TypeRegistry::new()))
        .expect("valid config");

    let utf8_peer = CodeSetComponentInfo {
        narrow: CodeSetComponent::new(ids::UTF_8, vec![]),
        wide: CodeSetComponent::new(ids::UTF_16, vec![]),
    };
    codec.negotiate_codesets(&utf8_peer).expect("negotiate");

    // A second negotiation attempt is ignored: the context is sealed.
    let latin_peer = CodeSetComponentInfo {
        narrow: CodeSetComponent::new(ids::ISO_8859_1, vec![]),
        wide: CodeSetComponent::new(ids::UTF_16, vec![]),
    };
    codec.negotiate_codesets(&latin_peer).expect("second negotiate");

    // Still UTF-8: multibyte text continues to round-trip.
    let bytes = codec
        .encode(&Value::String("\u{00e9}\u{65e5}".into()))
        .expect("encode");
    assert_eq!(
        codec.decode_field(&bytes, &FieldKind::Str).expect("decode"),
        Value::String("\u{00e9}\u{65e5}".into())
    );
}
