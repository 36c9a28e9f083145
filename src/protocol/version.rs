//! Wire-format revisions and the per-revision rules they imply.
//!
//! A connection resolves its [`GiopVersion`] once; the derived
//! [`VersionProfile`] is immutable thereafter and is consulted by the
//! primitive codec (wide text, header padding) and by the chunk protocol
//! (end-tag counting convention).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Supported GIOP revisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub enum GiopVersion {
    #[serde(rename = "1.0")]
    V1_0,
    #[serde(rename = "1.1")]
    V1_1,
    #[default]
    #[serde(rename = "1.2")]
    V1_2,
}

impl fmt::Display for GiopVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GiopVersion::V1_0 => f.write_str("1.0"),
            GiopVersion::V1_1 => f.write_str("1.1"),
            GiopVersion::V1_2 => f.write_str("1.2"),
        }
    }
}

/// How wide characters travel on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WideCharRule {
    /// 1.0 forbids wchar/wstring entirely.
    Forbidden,
    /// 1.1 restricts wide text to fixed 2-byte units with no byte-order
    /// marker, big-endian unless the message endian flag says otherwise.
    FixedTwoByte,
    /// 1.2 lifts the restriction: each wchar is length-prefixed and encoded
    /// per the negotiated wide codeset, byte-order markers permitted.
    Negotiated,
}

/// Which enclosing values an end tag counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndTagConvention {
    /// Legacy convention: every enclosing value, chunked or not.
    AllValues,
    /// Current convention: only enclosing chunked values.
    ChunkedOnly,
}

/// The per-revision rule set.
#[derive(Debug, Clone, Copy)]
pub struct VersionProfile {
    pub version: GiopVersion,
    pub wide_char: WideCharRule,
    pub end_tag: EndTagConvention,
    /// 1.2 request/reply bodies start on an 8-byte boundary; requesting the
    /// padding under older revisions is an error.
    pub header_padding: bool,
    /// Tolerate legacy peers that emit alignment padding which would fall at
    /// a fragment boundary: alignment is applied only while bytes remain in
    /// the current fragment.
    pub lenient_fragment_padding: bool,
}

impl GiopVersion {
    pub fn profile(self) -> VersionProfile {
        match self {
            GiopVersion::V1_0 => VersionProfile {
                version: self,
                wide_char: WideCharRule::Forbidden,
                end_tag: EndTagConvention::AllValues,
                header_padding: false,
                lenient_fragment_padding: false,
            },
            GiopVersion::V1_1 => VersionProfile {
                version: self,
                wide_char: WideCharRule::FixedTwoByte,
                end_tag: EndTagConvention::AllValues,
                header_padding: false,
                lenient_fragment_padding: false,
            },
            GiopVersion::V1_2 => VersionProfile {
                version: self,
                wide_char: WideCharRule::Negotiated,
                end_tag: EndTagConvention::ChunkedOnly,
                header_padding: true,
                lenient_fragment_padding: true,
            },
        }
    }
}
