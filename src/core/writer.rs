//! The primitive CDR encoder, mirroring [`crate::core::reader::CdrReader`].
//!
//! Alignment padding is zero-filled and computed from the logical offset.
//! Chunk lengths are written as reserved slots and back-patched once the
//! chunk's byte count is known; the buffer holding an unpatched slot is
//! pinned against flushing.

use crate::buffer::{align_gap, BufferManagerWrite, BufferPool, PooledBuffer, WriteCursor};
use crate::codeset::CodeSetContext;
use crate::core::fixed::{Fixed, SIGN_NEGATIVE, SIGN_NON_NEGATIVE};
use crate::error::{CdrError, Result};
use crate::protocol::version::{GiopVersion, VersionProfile, WideCharRule};
use bytes::{Bytes, BytesMut};

/// A reserved 4-byte cell awaiting back-patch.
#[derive(Debug, Clone, Copy)]
pub struct PatchSlot {
    index: usize,
    pub logical: u64,
}

/// Aligned, endian-aware writer for one outgoing message.
pub struct CdrWriter {
    cursor: WriteCursor,
    mgr: BufferManagerWrite,
    little_endian: bool,
    profile: VersionProfile,
    codesets: CodeSetContext,
    pinned: bool,
    pool: Option<BufferPool>,
}

impl CdrWriter {
    /// Growing writer over a fresh private buffer.
    pub fn new(version: GiopVersion) -> Self {
        CdrWriter {
            cursor: WriteCursor::new(BytesMut::new()),
            mgr: BufferManagerWrite::growing(),
            little_endian: false,
            profile: version.profile(),
            codesets: CodeSetContext::default(),
            pinned: false,
            pool: None,
        }
    }

    /// Writer over pooled storage; the storage returns to `pool` when the
    /// message is finished (or the writer dropped) unless ownership is
    /// transferred to a reader first.
    pub fn pooled(pool: &BufferPool, version: GiopVersion) -> Self {
        let storage = pool.acquire().detach();
        CdrWriter {
            cursor: WriteCursor::new(storage),
            mgr: BufferManagerWrite::growing(),
            little_endian: false,
            profile: version.profile(),
            codesets: CodeSetContext::default(),
            pinned: false,
            pool: Some(pool.clone()),
        }
    }

    pub fn set_manager(&mut self, mgr: BufferManagerWrite) {
        self.mgr = mgr;
    }

    pub fn set_codesets(&mut self, codesets: CodeSetContext) {
        self.codesets = codesets;
    }

    pub fn set_little_endian(&mut self, little_endian: bool) {
        self.little_endian = little_endian;
    }

    pub fn profile(&self) -> &VersionProfile {
        &self.profile
    }

    #[inline]
    pub fn logical_position(&self) -> u64 {
        self.cursor.logical_offset()
    }

    /// Pin or unpin the current buffer against flushing (open chunk slot).
    pub fn set_pinned(&mut self, pinned: bool) {
        self.pinned = pinned;
    }

    fn align_reserve(&mut self, align: usize, size: usize) {
        let gap = align_gap(self.cursor.logical_offset(), align);
        self.mgr
            .before_write(&mut self.cursor, gap + size, self.pinned);
        self.cursor.pad(gap);
    }

    fn put(&mut self, bytes: &[u8]) {
        self.cursor.push(bytes);
    }

    /// Write the per-message endian flag matching this writer's byte order.
    pub fn write_endian_flag(&mut self) -> Result<()> {
        self.write_octet(self.little_endian as u8)
    }

    pub fn write_octet(&mut self, v: u8) -> Result<()> {
        self.align_reserve(1, 1);
        self.put(&[v]);
        Ok(())
    }

    pub fn write_bool(&mut self, v: bool) -> Result<()> {
        self.write_octet(v as u8)
    }

    pub fn write_i16(&mut self, v: i16) -> Result<()> {
        self.align_reserve(2, 2);
        let b = if self.little_endian {
            v.to_le_bytes()
        } else {
            v.to_be_bytes()
        };
        self.put(&b);
        Ok(())
    }

    pub fn write_u16(&mut self, v: u16) -> Result<()> {
        self.write_i16(v as i16)
    }

    pub fn write_i32(&mut self, v: i32) -> Result<()> {
        self.align_reserve(4, 4);
        let b = if self.little_endian {
            v.to_le_bytes()
        } else {
            v.to_be_bytes()
        };
        self.put(&b);
        Ok(())
    }

    pub fn write_u32(&mut self, v: u32) -> Result<()> {
        self.write_i32(v as i32)
    }

    pub fn write_i64(&mut self, v: i64) -> Result<()> {
        self.align_reserve(8, 8);
        let b = if self.little_endian {
            v.to_le_bytes()
        } else {
            v.to_be_bytes()
        };
        self.put(&b);
        Ok(())
    }

    pub fn write_u64(&mut self, v: u64) -> Result<()> {
        self.write_i64(v as i64)
    }

    pub fn write_f32(&mut self, v: f32) -> Result<()> {
        self.write_u32(v.to_bits())
    }

    pub fn write_f64(&mut self, v: f64) -> Result<()> {
        self.write_u64(v.to_bits())
    }

    pub fn write_octets(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        self.align_reserve(1, bytes.len());
        self.put(bytes);
        Ok(())
    }

    pub fn write_char(&mut self, c: char) -> Result<()> {
        let offset = self.logical_position();
        let conv = self.codesets.narrow()?;
        let bytes = conv
            .encode(&c.to_string())
            .map_err(|m| CdrError::format(offset, m))?;
        if bytes.len() != 1 {
            return Err(CdrError::format(
                offset,
                "narrow character is not one byte in the negotiated codeset",
            ));
        }
        self.write_octet(bytes[0])
    }

    pub fn write_wchar(&mut self, c: char) -> Result<()> {
        match self.profile.wide_char {
            WideCharRule::Forbidden => Err(CdrError::UnsupportedFeature {
                version: self.profile.version,
                feature: "wide characters",
            }),
            WideCharRule::FixedTwoByte => {
                let cp = c as u32;
                if cp > 0xffff {
                    return Err(CdrError::format(
                        self.logical_position(),
                        "character outside the fixed 2-byte plane",
                    ));
                }
                self.write_u16(cp as u16)
            }
            WideCharRule::Negotiated => {
                let offset = self.logical_position();
                let conv = self.codesets.wide()?;
                let bytes = conv
                    .encode(&c.to_string())
                    .map_err(|m| CdrError::format(offset, m))?;
                self.write_octet(bytes.len() as u8)?;
                self.write_octets(&bytes)
            }
        }
    }

    /// Length-prefixed narrow string; the length includes the 1-byte NUL.
    pub fn write_string(&mut self, s: &str) -> Result<()> {
        let offset = self.logical_position();
        let conv = self.codesets.narrow()?;
        let bytes = conv.encode(s).map_err(|m| CdrError::format(offset, m))?;
        self.write_i32(bytes.len() as i32 + 1)?;
        self.write_octets(&bytes)?;
        self.write_octet(0)
    }

    pub fn write_wstring(&mut self, s: &str) -> Result<()> {
        match self.profile.wide_char {
            WideCharRule::Forbidden => Err(CdrError::UnsupportedFeature {
                version: self.profile.version,
                feature: "wide strings",
            }),
            WideCharRule::FixedTwoByte => {
                let count = s.chars().count() as i32;
                self.write_i32(count + 1)?;
                for c in s.chars() {
                    self.write_wchar(c)?;
                }
                self.write_u16(0) // 2-byte terminator
            }
            WideCharRule::Negotiated => {
                let offset = self.logical_position();
                let conv = self.codesets.wide()?;
                let bytes = conv.encode(s).map_err(|m| CdrError::format(offset, m))?;
                self.write_i32(bytes.len() as i32)?;
                self.write_octets(&bytes)
            }
        }
    }

    /// Packed-BCD fixed-point decimal.
    pub fn write_fixed(&mut self, fixed: &Fixed) -> Result<()> {
        let sign = if fixed.is_negative() {
            SIGN_NEGATIVE
        } else {
            SIGN_NON_NEGATIVE
        };
        let mut nibbles: Vec<u8> = Vec::with_capacity(fixed.digits().len() + 2);
        if fixed.digits().len() % 2 == 0 {
            nibbles.push(0); // leading pad so the sign lands in a low nibble
        }
        nibbles.extend_from_slice(fixed.digits());
        nibbles.push(sign);
        let octets: Vec<u8> = nibbles
            .chunks_exact(2)
            .map(|pair| (pair[0] << 4) | pair[1])
            .collect();
        self.write_octets(&octets)
    }

    /// Reserve an aligned 4-byte cell (chunk length placeholder).
    pub fn reserve_u32_slot(&mut self) -> PatchSlot {
        self.align_reserve(4, 4);
        let index = self.cursor.len();
        self.cursor.push(&[0, 0, 0, 0]);
        PatchSlot {
            index,
            logical: self.cursor.logical_offset() - 4,
        }
    }

    /// Back-patch a previously reserved cell.
    pub fn patch_u32(&mut self, slot: PatchSlot, value: u32) {
        let bytes = if self.little_endian {
            value.to_le_bytes()
        } else {
            value.to_be_bytes()
        };
        self.cursor.patch4(slot.index, bytes);
    }

    /// Discard the last 4 written bytes (end-tag compaction).
    pub fn truncate_last_u32(&mut self) {
        self.cursor.truncate_back(4);
    }

    /// Align the message body start, 1.2-style header padding. Requesting it
    /// under a revision without header padding is an error.
    pub fn pad_header(&mut self, boundary: usize) -> Result<()> {
        if !self.profile.header_padding {
            return Err(CdrError::UnsupportedFeature {
                version: self.profile.version,
                feature: "header padding",
            });
        }
        let gap = align_gap(self.cursor.logical_offset(), boundary);
        self.cursor.pad(gap);
        Ok(())
    }

    fn take_cursor(&mut self) -> WriteCursor {
        std::mem::replace(&mut self.cursor, WriteCursor::new(BytesMut::new()))
    }

    /// Finish the message and return its bytes (the whole message under the
    /// grow strategy; the unflushed tail under the streaming one).
    pub fn finish(mut self) -> Bytes {
        let (data, storage) = self.take_cursor().into_parts();
        if let Some(pool) = self.pool.take() {
            drop(PooledBuffer::reattach(&pool, storage));
        }
        data
    }

    /// Finish a streaming message: everything, including the tail, goes to
    /// the sink.
    pub fn finish_streaming(mut self) {
        let mut cursor = self.take_cursor();
        self.mgr.flush_remaining(&mut cursor);
        let (_, storage) = cursor.into_parts();
        if let Some(pool) = self.pool.take() {
            drop(PooledBuffer::reattach(&pool, storage));
        }
    }

    /// Finish and hand the message plus the pool bookkeeping to a reader
    /// over the same storage: the reader's close is then the single release.
    pub fn finish_into_reader(mut self) -> crate::core::reader::CdrReader {
        let version = self.profile.version;
        let codesets = self.codesets.clone();
        let (data, storage) = self.take_cursor().into_parts();
        let pool = self.pool.take();
        let mut reader = crate::core::reader::CdrReader::new(data, version);
        reader.set_codesets(codesets);
        if let Some(pool) = pool {
            reader.set_lease(PooledBuffer::reattach(&pool, storage));
        }
        reader
    }
}

impl Drop for CdrWriter {
    fn drop(&mut self) {
        // Pooled storage is released on every exit path, including failure
        // mid-encode.
        if let Some(pool) = self.pool.take() {
            let (_, storage) = self.take_cursor().into_parts();
            drop(PooledBuffer::reattach(&pool, storage));
        }
    }
}
