//! Byte-to-char converters for the negotiated codesets.
//!
//! Converters are deliberately tiny `Copy` values; the per-stream cache in
//! [`crate::codeset::CodeSetContext`] hands out copies rather than borrows.
//! Conversion failures carry a static message; the stream layer attaches the
//! offending offset.

use crate::codeset::ids;

/// Narrow (char) text converter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NarrowConverter {
    Latin1,
    Ascii,
    Utf8,
}

impl NarrowConverter {
    pub fn for_id(id: u32) -> Option<Self> {
        match id {
            ids::ISO_8859_1 => Some(NarrowConverter::Latin1),
            ids::ISO_646 => Some(NarrowConverter::Ascii),
            ids::UTF_8 => Some(NarrowConverter::Utf8),
            _ => None,
        }
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<String, &'static str> {
        match self {
            NarrowConverter::Latin1 => Ok(bytes.iter().map(|&b| b as char).collect()),
            NarrowConverter::Ascii => {
                if bytes.iter().any(|&b| b > 0x7f) {
                    Err("non-ASCII byte in ISO 646 text")
                } else {
                    Ok(bytes.iter().map(|&b| b as char).collect())
                }
            }
            NarrowConverter::Utf8 => std::str::from_utf8(bytes)
                .map(str::to_owned)
                .map_err(|_| "invalid UTF-8 in narrow text"),
        }
    }

    pub fn encode(&self, text: &str) -> Result<Vec<u8>, &'static str> {
        match self {
            NarrowConverter::Latin1 => text
                .chars()
                .map(|c| {
                    let cp = c as u32;
                    if cp > 0xff {
                        Err("character outside ISO 8859-1")
                    } else {
                        Ok(cp as u8)
                    }
                })
                .collect(),
            NarrowConverter::Ascii => text
                .chars()
                .map(|c| {
                    let cp = c as u32;
                    if cp > 0x7f {
                        Err("character outside ISO 646")
                    } else {
                        Ok(cp as u8)
                    }
                })
                .collect(),
            NarrowConverter::Utf8 => Ok(text.as_bytes().to_vec()),
        }
    }
}

/// Wide (wchar) text converter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WideConverter {
    /// UTF-16; byte-order markers honored on decode, big-endian produced on
    /// encode without a marker.
    Utf16,
    /// Fixed 2-byte units, no markers, no surrogate pairs.
    Ucs2,
}

impl WideConverter {
    pub fn for_id(id: u32) -> Option<Self> {
        match id {
            ids::UTF_16 => Some(WideConverter::Utf16),
            ids::UCS_2 => Some(WideConverter::Ucs2),
            _ => None,
        }
    }

    /// Decode a run of encoded wide text. `little_endian` is the default
    /// byte order when no marker is present.
    pub fn decode(&self, bytes: &[u8], little_endian: bool) -> Result<String, &'static str> {
        if bytes.len() % 2 != 0 {
            return Err("odd byte count in wide text");
        }
        let (bytes, little_endian) = match self {
            WideConverter::Utf16 => match bytes {
                [0xfe, 0xff, rest @ ..] => (rest, false),
                [0xff, 0xfe, rest @ ..] => (rest, true),
                _ => (bytes, little_endian),
            },
            WideConverter::Ucs2 => (bytes, little_endian),
        };
        let units: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|pair| {
                if little_endian {
                    u16::from_le_bytes([pair[0], pair[1]])
                } else {
                    u16::from_be_bytes([pair[0], pair[1]])
                }
            })
            .collect();
        match self {
            WideConverter::Utf16 => {
                String::from_utf16(&units).map_err(|_| "unpaired surrogate in UTF-16 text")
            }
            WideConverter::Ucs2 => units
                .into_iter()
                .map(|u| char::from_u32(u as u32).ok_or("surrogate unit in UCS-2 text"))
                .collect(),
        }
    }

    /// Encode wide text without a byte-order marker, big-endian.
    pub fn encode(&self, text: &str) -> Result<Vec<u8>, &'static str> {
        let mut out = Vec::with_capacity(text.len() * 2);
        for c in text.chars() {
            match self {
                WideConverter::Utf16 => {
                    let mut units = [0u16; 2];
                    for unit in c.encode_utf16(&mut units) {
                        out.extend_from_slice(&unit.to_be_bytes());
                    }
                }
                WideConverter::Ucs2 => {
                    let cp = c as u32;
                    if cp > 0xffff {
                        return Err("character outside the UCS-2 plane");
                    }
                    out.extend_from_slice(&(cp as u16).to_be_bytes());
                }
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latin1_round_trip() {
        let conv = NarrowConverter::Latin1;
        let bytes = conv.encode("caf\u{e9}").unwrap();
        assert_eq!(bytes, b"caf\xe9");
        assert_eq!(conv.decode(&bytes).unwrap(), "caf\u{e9}");
    }

    #[test]
    fn ascii_rejects_high_bytes() {
        let conv = NarrowConverter::Ascii;
        assert!(conv.decode(&[0x80]).is_err());
        assert!(conv.encode("\u{e9}").is_err());
    }

    #[test]
    fn utf16_decode_honors_bom() {
        let conv = WideConverter::Utf16;
        // 'A' little-endian behind an LE marker
        assert_eq!(conv.decode(&[0xff, 0xfe, 0x41, 0x00], false).unwrap(), "A");
        // no marker: default order applies
        assert_eq!(conv.decode(&[0x00, 0x41], false).unwrap(), "A");
    }

    #[test]
    fn utf16_surrogate_pairs() {
        let conv = WideConverter::Utf16;
        let bytes = conv.encode("\u{1f600}").unwrap();
        assert_eq!(bytes.len(), 4);
        assert_eq!(conv.decode(&bytes, false).unwrap(), "\u{1f600}");
    }

    #[test]
    fn ucs2_rejects_astral_plane() {
        assert!(WideConverter::Ucs2.encode("\u{1f600}").is_err());
    }
}
