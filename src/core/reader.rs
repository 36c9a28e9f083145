//! The primitive CDR decoder.
//!
//! Every multi-byte primitive aligns to its own width, computed from the
//! *logical* offset so alignment survives fragmentation. Endianness is a
//! per-message flag consumed once; wide-text rules come from the version
//! profile; narrow/wide text goes through the negotiated converters.

use crate::buffer::{align_gap, BufferManagerRead, PooledBuffer, ReadCursor};
use crate::codeset::CodeSetContext;
use crate::core::fixed::{Fixed, SIGN_NEGATIVE, SIGN_NON_NEGATIVE};
use crate::error::{constants, CdrError, Result};
use crate::protocol::version::{GiopVersion, VersionProfile, WideCharRule};
use bytes::Bytes;
use tracing::trace;

/// Immutable snapshot of a reader's restorable position state. Plain data:
/// it never aliases the live cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSnapshot {
    pub(crate) position: usize,
    pub(crate) fragment_offset: u64,
    pub(crate) little_endian: bool,
}

/// Aligned, endian-aware reader over one incoming message.
pub struct CdrReader {
    cursor: ReadCursor,
    mgr: BufferManagerRead,
    little_endian: bool,
    profile: VersionProfile,
    codesets: CodeSetContext,
    lease: Option<PooledBuffer>,
}

impl CdrReader {
    /// Reader over a complete, unfragmented message.
    pub fn new(data: Bytes, version: GiopVersion) -> Self {
        CdrReader {
            cursor: ReadCursor::new(data),
            mgr: BufferManagerRead::without_continuation(),
            little_endian: false,
            profile: version.profile(),
            codesets: CodeSetContext::default(),
            lease: None,
        }
    }

    /// Reader over the first fragment of a possibly fragmented message.
    pub fn with_manager(data: Bytes, mgr: BufferManagerRead, version: GiopVersion) -> Self {
        CdrReader {
            cursor: ReadCursor::new(data),
            mgr,
            little_endian: false,
            profile: version.profile(),
            codesets: CodeSetContext::default(),
            lease: None,
        }
    }

    /// Replace the codeset context (e.g. with the connection's negotiated one).
    pub fn set_codesets(&mut self, codesets: CodeSetContext) {
        self.codesets = codesets;
    }

    pub fn codesets_mut(&mut self) -> &mut CodeSetContext {
        &mut self.codesets
    }

    /// Attach a pooled buffer lease released by [`CdrReader::close`].
    pub fn set_lease(&mut self, lease: PooledBuffer) {
        self.lease = Some(lease);
    }

    pub fn profile(&self) -> &VersionProfile {
        &self.profile
    }

    pub fn is_little_endian(&self) -> bool {
        self.little_endian
    }

    pub fn set_little_endian(&mut self, little_endian: bool) {
        self.little_endian = little_endian;
    }

    /// Fragmentation-independent offset from message start.
    #[inline]
    pub fn logical_position(&self) -> u64 {
        self.cursor.logical_offset()
    }

    /// Align to `align` and guarantee `size` contiguous bytes, splicing
    /// continuation fragments on underflow.
    fn align_and_ensure(&mut self, align: usize, size: usize) -> Result<()> {
        let gap = align_gap(self.cursor.logical_offset(), align);
        self.mgr.underflow(&mut self.cursor, gap + size)?;
        self.cursor.advance(gap);
        Ok(())
    }

    fn take<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(self.cursor.peek(N));
        self.cursor.advance(N);
        out
    }

    /// Consume the per-message endian flag; applies to all later
    /// multi-byte fields.
    pub fn consume_endian(&mut self) -> Result<()> {
        let flag = self.read_octet()?;
        self.little_endian = flag & 1 == 1;
        Ok(())
    }

    pub fn read_octet(&mut self) -> Result<u8> {
        self.align_and_ensure(1, 1)?;
        let b = self.cursor.peek(1)[0];
        self.cursor.advance(1);
        Ok(b)
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_octet()? != 0)
    }

    pub fn read_i16(&mut self) -> Result<i16> {
        self.align_and_ensure(2, 2)?;
        let b = self.take::<2>();
        Ok(if self.little_endian {
            i16::from_le_bytes(b)
        } else {
            i16::from_be_bytes(b)
        })
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(self.read_i16()? as u16)
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        self.align_and_ensure(4, 4)?;
        let b = self.take::<4>();
        Ok(if self.little_endian {
            i32::from_le_bytes(b)
        } else {
            i32::from_be_bytes(b)
        })
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(self.read_i32()? as u32)
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        self.align_and_ensure(8, 8)?;
        let b = self.take::<8>();
        Ok(if self.little_endian {
            i64::from_le_bytes(b)
        } else {
            i64::from_be_bytes(b)
        })
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        Ok(self.read_i64()? as u64)
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        Ok(f32::from_bits(self.read_u32()?))
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        Ok(f64::from_bits(self.read_u64()?))
    }

    /// Bulk octet read, spanning fragments as needed.
    pub fn read_octets_into(&mut self, out: &mut [u8]) -> Result<()> {
        if out.is_empty() {
            return Ok(());
        }
        self.align_and_ensure(1, 1)?;
        let mut filled = 0;
        while filled < out.len() {
            if self.cursor.remaining() == 0 {
                self.mgr.underflow(&mut self.cursor, 1)?;
            }
            let step = (out.len() - filled).min(self.cursor.remaining());
            out[filled..filled + step].copy_from_slice(self.cursor.peek(step));
            self.cursor.advance(step);
            filled += step;
        }
        Ok(())
    }

    pub fn read_octets(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut out = vec![0u8; len];
        self.read_octets_into(&mut out)?;
        Ok(out)
    }

    /// Narrow char via the negotiated converter.
    pub fn read_char(&mut self) -> Result<char> {
        let offset = self.logical_position();
        let byte = [self.read_octet()?];
        let conv = self.codesets.narrow()?;
        let s = conv.decode(&byte).map_err(|m| CdrError::format(offset, m))?;
        s.chars()
            .next()
            .ok_or_else(|| CdrError::format(offset, "empty narrow character"))
    }

    /// Wide char per the version profile's rule.
    pub fn read_wchar(&mut self) -> Result<char> {
        match self.profile.wide_char {
            WideCharRule::Forbidden => Err(CdrError::UnsupportedFeature {
                version: self.profile.version,
                feature: "wide characters",
            }),
            WideCharRule::FixedTwoByte => {
                self.align_and_ensure(2, 2)?;
                let offset = self.logical_position();
                let b = self.take::<2>();
                let unit = if self.little_endian {
                    u16::from_le_bytes(b)
                } else {
                    u16::from_be_bytes(b)
                };
                char::from_u32(unit as u32)
                    .ok_or_else(|| CdrError::format(offset, "surrogate unit in wide character"))
            }
            WideCharRule::Negotiated => {
                let offset = self.logical_position();
                let len = self.read_octet()? as usize;
                let bytes = self.read_octets(len)?;
                let conv = self.codesets.wide()?;
                let s = conv
                    .decode(&bytes, false)
                    .map_err(|m| CdrError::format(offset, m))?;
                let mut chars = s.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => Ok(c),
                    _ => Err(CdrError::format(offset, "wide character is not one char")),
                }
            }
        }
    }

    pub(crate) fn check_non_negative_length(&self, offset: u64, len: i32) -> Result<u32> {
        if len < 0 {
            return Err(CdrError::format(
                offset,
                constants::ERR_NEGATIVE_STRING_LENGTH,
            ));
        }
        Ok(len as u32)
    }

    /// Length-prefixed narrow string: length includes the 1-byte NUL
    /// terminator; a zero length is a legacy-peer way of writing the empty
    /// string.
    pub fn read_string(&mut self) -> Result<String> {
        let offset = self.logical_position();
        let len = self.read_i32()?;
        let len = self.check_non_negative_length(offset, len)?;
        self.read_string_body(len)
    }

    /// The narrow string tail after its length field has been consumed.
    pub(crate) fn read_string_body(&mut self, len: u32) -> Result<String> {
        if len == 0 {
            trace!("zero-length string decoded as empty");
            return Ok(String::new());
        }
        let offset = self.logical_position();
        let bytes = self.read_octets(len as usize - 1)?;
        self.read_octet()?; // NUL terminator
        let conv = self.codesets.narrow()?;
        conv.decode(&bytes).map_err(|m| CdrError::format(offset, m))
    }

    /// Wide string per the version profile's rule.
    pub fn read_wstring(&mut self) -> Result<String> {
        match self.profile.wide_char {
            WideCharRule::Forbidden => Err(CdrError::UnsupportedFeature {
                version: self.profile.version,
                feature: "wide strings",
            }),
            WideCharRule::FixedTwoByte => {
                // Length counts 2-byte units including the terminator.
                let offset = self.logical_position();
                let len = self.read_i32()?;
                let len = self.check_non_negative_length(offset, len)?;
                if len == 0 {
                    return Ok(String::new());
                }
                let mut out = String::with_capacity(len as usize - 1);
                for _ in 0..len - 1 {
                    out.push(self.read_wchar()?);
                }
                self.align_and_ensure(2, 2)?;
                self.cursor.advance(2); // 2-byte terminator
                Ok(out)
            }
            WideCharRule::Negotiated => {
                // Length counts bytes; no terminator.
                let offset = self.logical_position();
                let len = self.read_i32()?;
                let len = self.check_non_negative_length(offset, len)?;
                if len == 0 {
                    return Ok(String::new());
                }
                let bytes = self.read_octets(len as usize)?;
                let conv = self.codesets.wide()?;
                conv.decode(&bytes, false)
                    .map_err(|m| CdrError::format(offset, m))
            }
        }
    }

    /// Packed-BCD fixed-point decimal with a declared digit count and scale.
    pub fn read_fixed(&mut self, digits: u16, scale: u16) -> Result<Fixed> {
        let offset = self.logical_position();
        let (negative, collected) = self.read_fixed_digits()?;
        if !collected.is_empty() && collected.len() != digits as usize {
            return Err(CdrError::format(offset, constants::ERR_FIXED_DIGIT_MISMATCH));
        }
        Ok(Fixed::new(negative, collected, scale))
    }

    fn read_fixed_digits(&mut self) -> Result<(bool, Vec<u8>)> {
        let mut digits = Vec::new();
        let mut wrote_first = false;
        loop {
            let offset = self.logical_position();
            let octet = self.read_octet()?;
            let hi = octet >> 4;
            let lo = octet & 0x0f;
            if hi > 9 {
                return Err(CdrError::format(offset, constants::ERR_BAD_FIXED_NIBBLE));
            }
            if wrote_first || hi != 0 {
                digits.push(hi);
                wrote_first = true;
            }
            match lo {
                SIGN_NON_NEGATIVE => return Ok((false, digits)),
                SIGN_NEGATIVE => return Ok((true, digits)),
                d if d <= 9 => {
                    if wrote_first || d != 0 {
                        digits.push(d);
                        wrote_first = true;
                    }
                }
                _ => return Err(CdrError::format(offset, constants::ERR_BAD_FIXED_NIBBLE)),
            }
        }
    }

    /// Skip `n` bytes, spanning fragments as needed.
    pub fn skip(&mut self, n: usize) -> Result<()> {
        let mut left = n;
        while left > 0 {
            if self.cursor.remaining() == 0 {
                self.mgr.underflow(&mut self.cursor, 1)?;
            }
            let step = left.min(self.cursor.remaining());
            self.cursor.advance(step);
            left -= step;
        }
        Ok(())
    }

    /// Skip forward to a logical offset.
    pub fn skip_to_logical(&mut self, target: u64) -> Result<()> {
        let here = self.logical_position();
        debug_assert!(target >= here);
        self.skip((target - here) as usize)
    }

    /// Step back `n` bytes within the current fragment; end tags and chunk
    /// lengths are re-examined this way.
    pub fn rewind(&mut self, n: usize) -> Result<()> {
        if self.cursor.rewind(n) {
            Ok(())
        } else {
            Err(CdrError::format(
                self.logical_position(),
                "cannot rewind across a fragment boundary",
            ))
        }
    }

    /// Align to `boundary` only if the padding fits in the current fragment
    /// (header-padding tolerance for legacy peers).
    pub fn align_on_boundary(&mut self, boundary: usize) {
        let gap = align_gap(self.cursor.logical_offset(), boundary);
        if gap <= self.cursor.remaining() {
            self.cursor.advance(gap);
        }
    }

    /// Immutable snapshot of the restorable position state.
    pub fn snapshot(&self) -> StreamSnapshot {
        StreamSnapshot {
            position: self.cursor.position(),
            fragment_offset: self.cursor.fragment_offset(),
            little_endian: self.little_endian,
        }
    }

    /// Restore a prior snapshot. Fails if the snapshot's fragment has been
    /// surrendered to a splice since it was taken.
    pub fn restore(&mut self, snapshot: StreamSnapshot) -> Result<()> {
        if snapshot.fragment_offset != self.cursor.fragment_offset() {
            return Err(CdrError::format(
                self.logical_position(),
                constants::ERR_SNAPSHOT_FRAGMENT,
            ));
        }
        self.cursor.set_position(snapshot.position);
        self.little_endian = snapshot.little_endian;
        Ok(())
    }

    /// Duplicate this reader for independent read-ahead: fresh cursor state,
    /// shared codesets, no continuation and no lease (the original stream
    /// keeps buffer ownership).
    pub fn duplicate(&self) -> CdrReader {
        CdrReader {
            cursor: self.cursor.clone(),
            mgr: BufferManagerRead::without_continuation(),
            little_endian: self.little_endian,
            profile: self.profile,
            codesets: self.codesets.clone(),
            lease: None,
        }
    }

    /// Release the pooled buffer, if any. Safe to call more than once; the
    /// buffer reaches the pool a single time.
    pub fn close(&mut self) {
        self.lease.take();
    }
}

impl Drop for CdrReader {
    fn drop(&mut self) {
        self.close();
    }
}
