//! Value tag bit rules and wire-range classification.
//!
//! Every value position starts with a 4-byte tag drawn from disjoint ranges:
//! `0` is null, all-ones is an indirection, `0x7fffff00..=0x7fffffff` are
//! value tags, small positive numbers below `0x7fffff00` are chunk lengths,
//! and negative numbers are end tags. A value tag's low bits encode the
//! presence of a type-location string, the count of inline type identifiers,
//! and whether the body is chunked.

use crate::error::{CdrError, Result};

pub const NULL_TAG: u32 = 0;
pub const INDIRECTION_TAG: u32 = 0xffff_ffff;

/// Base of the value-tag range; also the exclusive upper bound for chunk
/// lengths, so lengths and tags never collide.
pub const VALUE_TAG_BASE: u32 = 0x7fff_ff00;

/// Chunk lengths occupy `1..MAX_CHUNK_LENGTH`.
pub const MAX_CHUNK_LENGTH: u32 = VALUE_TAG_BASE;

const CODEBASE_BIT: u32 = 0x1;
const TYPE_INFO_MASK: u32 = 0x6;
const TYPE_INFO_NONE: u32 = 0x0;
const TYPE_INFO_SINGLE: u32 = 0x2;
const TYPE_INFO_LIST: u32 = 0x6;
const CHUNK_BIT: u32 = 0x8;

/// How many type identifiers follow the tag inline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeInfo {
    None,
    Single,
    List,
}

#[inline]
pub fn is_value_tag(tag: u32) -> bool {
    (VALUE_TAG_BASE..=0x7fff_ffff).contains(&tag)
}

#[inline]
pub fn has_codebase(tag: u32) -> bool {
    tag & CODEBASE_BIT != 0
}

#[inline]
pub fn is_chunked(tag: u32) -> bool {
    tag & CHUNK_BIT != 0
}

pub fn type_info(offset: u64, tag: u32) -> Result<TypeInfo> {
    match tag & TYPE_INFO_MASK {
        TYPE_INFO_NONE => Ok(TypeInfo::None),
        TYPE_INFO_SINGLE => Ok(TypeInfo::Single),
        TYPE_INFO_LIST => Ok(TypeInfo::List),
        bits => Err(CdrError::format(
            offset,
            format!("invalid type information bits {bits:#x} in value tag {tag:#010x}"),
        )),
    }
}

pub fn make_value_tag(codebase: bool, info: TypeInfo, chunked: bool) -> u32 {
    let mut tag = VALUE_TAG_BASE;
    if codebase {
        tag |= CODEBASE_BIT;
    }
    tag |= match info {
        TypeInfo::None => TYPE_INFO_NONE,
        TypeInfo::Single => TYPE_INFO_SINGLE,
        TypeInfo::List => TYPE_INFO_LIST,
    };
    if chunked {
        tag |= CHUNK_BIT;
    }
    tag
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranges_are_disjoint() {
        assert!(!is_value_tag(NULL_TAG));
        assert!(!is_value_tag(INDIRECTION_TAG));
        assert!(!is_value_tag(MAX_CHUNK_LENGTH - 1));
        assert!(is_value_tag(VALUE_TAG_BASE));
        assert!(is_value_tag(0x7fff_ffff));
        // end tags are negative as i32
        assert!((INDIRECTION_TAG as i32) < 0);
        assert!((MAX_CHUNK_LENGTH - 1) as i32 > 0);
    }

    #[test]
    fn tag_bits_round_trip() {
        for codebase in [false, true] {
            for info in [TypeInfo::None, TypeInfo::Single, TypeInfo::List] {
                for chunked in [false, true] {
                    let tag = make_value_tag(codebase, info, chunked);
                    assert!(is_value_tag(tag));
                    assert_eq!(has_codebase(tag), codebase);
                    assert_eq!(type_info(0, tag).unwrap(), info);
                    assert_eq!(is_chunked(tag), chunked);
                }
            }
        }
    }

    #[test]
    fn reserved_type_info_bits_rejected() {
        assert!(type_info(0, VALUE_TAG_BASE | 0x4).is_err());
    }
}
