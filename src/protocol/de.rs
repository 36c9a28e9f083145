//! Valuetype decoding: the chunk-aware reader over the primitive codec.
//!
//! All primitive reads issued inside a value body route through the chunk
//! boundary check: at the end of the active chunk the next word is either a
//! further chunk length, a nested value tag, or an end tag, and the three
//! are told apart purely by their disjoint numeric ranges.
//!
//! Decoding a direct value records its tag offset in the shared indirection
//! table *before* the body codec runs, so back-references into a value that
//! is still being decoded (cycles) resolve to the in-progress node.

use crate::buffer::align_gap;
use crate::core::{CdrReader, Fixed, StreamSnapshot};
use crate::error::{constants, CdrError, Result};
use crate::protocol::chunk::ChunkState;
use crate::protocol::indirection::{
    IndirectionPolicy, IndirectionTable, Resolution, SharedIndirections,
};
use crate::protocol::registry::{FieldKind, TypeRegistry};
use crate::protocol::tag::{self, TypeInfo};
use crate::protocol::value::{Value, ValueBody, ValueRef};
use crate::protocol::version::EndTagConvention;
use std::sync::Arc;
use tracing::{debug, warn};

/// Immutable snapshot of everything a restore needs; plain data, never
/// aliasing the live stream.
#[derive(Debug, Clone, Copy)]
pub struct ValueSnapshot {
    stream: StreamSnapshot,
    chunk: ChunkState,
    no_optional_data: bool,
}

/// Chunk-aware decoder for one message.
pub struct ValueReader {
    reader: CdrReader,
    registry: Arc<TypeRegistry>,
    indirections: SharedIndirections,
    chunk: ChunkState,
    no_optional_data: bool,
    policy: IndirectionPolicy,
}

impl ValueReader {
    pub fn new(reader: CdrReader, registry: Arc<TypeRegistry>) -> Self {
        Self::with_policy(reader, registry, IndirectionPolicy::Strict)
    }

    pub fn with_policy(
        reader: CdrReader,
        registry: Arc<TypeRegistry>,
        policy: IndirectionPolicy,
    ) -> Self {
        ValueReader {
            reader,
            registry,
            indirections: IndirectionTable::shared(),
            chunk: ChunkState::new(),
            no_optional_data: false,
            policy,
        }
    }

    /// Duplicate for independent read-ahead: fresh cursor and chunk state,
    /// *shared* indirection tables.
    pub fn duplicate(&self) -> ValueReader {
        ValueReader {
            reader: self.reader.duplicate(),
            registry: self.registry.clone(),
            indirections: self.indirections.clone(),
            chunk: self.chunk,
            no_optional_data: self.no_optional_data,
            policy: self.policy,
        }
    }

    pub fn indirections(&self) -> &SharedIndirections {
        &self.indirections
    }

    #[inline]
    pub fn logical_position(&self) -> u64 {
        self.reader.logical_position()
    }

    pub fn consume_endian(&mut self) -> Result<()> {
        self.reader.consume_endian()
    }

    /// 1.2-style body padding; an error under revisions without it.
    pub fn consume_header_padding(&mut self) -> Result<()> {
        let profile = *self.reader.profile();
        if !profile.header_padding {
            return Err(CdrError::UnsupportedFeature {
                version: profile.version,
                feature: "header padding",
            });
        }
        self.reader.align_on_boundary(8);
        Ok(())
    }

    pub fn snapshot(&self) -> ValueSnapshot {
        ValueSnapshot {
            stream: self.reader.snapshot(),
            chunk: self.chunk,
            no_optional_data: self.no_optional_data,
        }
    }

    pub fn restore(&mut self, snapshot: ValueSnapshot) -> Result<()> {
        self.reader.restore(snapshot.stream)?;
        self.chunk = snapshot.chunk;
        self.no_optional_data = snapshot.no_optional_data;
        Ok(())
    }

    /// Release the underlying buffer; safe on every exit path.
    pub fn close(&mut self) {
        self.reader.close();
    }

    // ---- chunk boundary protocol -------------------------------------

    /// Chunks can end at arbitrary points, though never inside a primitive,
    /// an array of primitives, a string, or an indirection; so each
    /// primitive read checks for chunk termination first.
    fn check_chunk(&mut self, align: usize, size: usize) -> Result<()> {
        if !self.chunk.in_chunked_value {
            return Ok(());
        }

        if self.no_optional_data {
            return Err(CdrError::NoOptionalData);
        }

        let mut check_for_end_tag = false;
        let logical = self.reader.logical_position();
        match self.chunk.block_end {
            // At the end of the current chunk: what follows is either a
            // further chunk length, a value tag, or an end tag.
            Some(end) if end == logical => {
                self.chunk.block_end = None;
                self.start_chunk()?;
                if self.chunk.block_end.is_none() {
                    check_for_end_tag = true;
                }
            }
            // Past the end of the current chunk: always an error.
            Some(end) if end < logical => {
                return Err(CdrError::format(logical, constants::ERR_CHUNK_OVERFLOW));
            }
            _ => {}
        }

        // What is wanted cannot be split across chunks; not fitting means
        // the body codec is reading more than the sender wrote.
        if let Some(end) = self.chunk.block_end {
            let here = self.reader.logical_position();
            let needed = align_gap(here, align) + size;
            if here + needed as u64 > end {
                return Err(CdrError::NoOptionalData);
            }
        }

        if check_for_end_tag {
            let next = self.reader.read_i32()?;
            self.reader.rewind(4)?;
            // An end tag here means the valuetype has no data left to read.
            if next < 0 {
                return Err(CdrError::NoOptionalData);
            }
        }

        Ok(())
    }

    /// If the current value is chunked, try to interpret the next word as a
    /// chunk length. Words outside the length range are put back: they are a
    /// tag or end marker for someone else to read.
    fn start_chunk(&mut self) -> Result<()> {
        if !self.chunk.in_chunked_value {
            return Ok(());
        }

        // Reset first so the length read below cannot recurse into the
        // end-of-chunk branch of check_chunk.
        self.chunk.block_end = None;

        let word = self.read_i32()?;
        if word > 0 && (word as u32) < tag::MAX_CHUNK_LENGTH {
            self.chunk.block_end = Some(self.reader.logical_position() + word as u64);
        } else {
            self.reader.rewind(4)?;
        }
        Ok(())
    }

    /// Leave the current chunk, skipping data an incomplete body codec left
    /// unread.
    fn end_chunk(&mut self) -> Result<()> {
        let Some(end) = self.chunk.block_end else {
            return Ok(());
        };
        let logical = self.reader.logical_position();
        if end == logical {
            self.chunk.block_end = None;
        } else if end > logical {
            debug!(from = logical, to = end, "skipping unread chunk data");
            self.reader.skip_to_logical(end)?;
            self.chunk.block_end = None;
        } else {
            return Err(CdrError::format(logical, constants::ERR_BAD_CHUNK_LENGTH));
        }
        Ok(())
    }

    /// Make sure the cursor lands on the end tag no matter how little the
    /// body codec read: drain remaining chunks, and recursively decode and
    /// discard trailing nested values a newer schema may have appended.
    fn skip_to_end_of_value(&mut self) -> Result<()> {
        if !self.chunk.in_chunked_value {
            return Ok(());
        }

        while self.chunk.block_end.is_some() {
            self.end_chunk()?;
            self.start_chunk()?;
        }

        let next = self.read_i32()?;
        self.reader.rewind(4)?;

        if next < 0 {
            // The end tag; read_end_tag validates it.
            return Ok(());
        }

        if next == 0 || (next as u32) >= tag::MAX_CHUNK_LENGTH {
            debug!(
                offset = self.reader.logical_position(),
                word = next,
                "discarding trailing nested value"
            );
            self.read_value(None)?;
            self.skip_to_end_of_value()
        } else {
            Err(CdrError::format(
                self.reader.logical_position(),
                constants::ERR_COULD_NOT_SKIP,
            ))
        }
    }

    /// End tags are only written for chunked values. The observed value may
    /// cover several enclosing levels at once (compaction); such a tag is
    /// put back for the next enclosing level to re-examine.
    fn read_end_tag(&mut self) -> Result<()> {
        if self.chunk.in_chunked_value {
            let end_tag = self.read_i32()?;
            let offset = self.reader.logical_position() - 4;

            if end_tag >= 0 {
                return Err(CdrError::format(offset, constants::ERR_POSITIVE_END_TAG));
            }

            let convention = self.reader.profile().end_tag;
            match convention {
                EndTagConvention::ChunkedOnly => {
                    if end_tag < self.chunk.chunked_level {
                        return Err(CdrError::format(
                            offset,
                            constants::ERR_UNEXPECTED_ENCLOSING,
                        ));
                    }
                    if end_tag != self.chunk.chunked_level {
                        warn!(
                            observed = end_tag,
                            expected = self.chunk.chunked_level,
                            "compacted end tag, deferring to enclosing value"
                        );
                        self.reader.rewind(4)?;
                    }
                }
                EndTagConvention::AllValues => {
                    // Legacy peers: less strict, assume compaction on any
                    // mismatch.
                    if end_tag != self.chunk.end_level {
                        self.reader.rewind(4)?;
                    }
                }
            }
        }

        self.chunk.leave_value();
        Ok(())
    }

    // ---- value decoding ----------------------------------------------

    /// Decode one value position: null, an indirection to an earlier value,
    /// or a direct (possibly chunked) value body.
    pub fn read_value(&mut self, expected: Option<&str>) -> Result<Value> {
        let vtag = self.read_u32()?;

        if vtag == tag::NULL_TAG {
            return Ok(Value::Null);
        }
        if vtag == tag::INDIRECTION_TAG {
            return self.read_value_indirection();
        }

        // The cache key is the offset of the tag itself, recorded before
        // anything past the tag is consumed.
        let tag_offset = self.reader.logical_position() - 4;
        if !tag::is_value_tag(vtag) {
            return Err(CdrError::format(
                tag_offset,
                format!("invalid value tag {vtag:#010x}"),
            ));
        }

        let save_chunked = self.chunk.in_chunked_value;
        self.chunk.in_chunked_value = tag::is_chunked(vtag);

        let codebase = if tag::has_codebase(vtag) {
            Some(self.read_location()?)
        } else {
            None
        };
        let type_ids = self.read_type_ids(tag_offset, vtag, expected)?;

        // Pre-register the node so cycles into this still-decoding value hit
        // the cache.
        let node: ValueRef = ValueBody {
            type_ids: type_ids.clone(),
            codebase: codebase.clone(),
            chunked: self.chunk.in_chunked_value,
            fields: Vec::new(),
        }
        .into_ref();
        self.indirections.borrow_mut().register_value(tag_offset, &node);

        self.start_chunk()?;
        self.chunk.enter_value();

        let codec = self.registry.lookup(&type_ids, codebase.as_deref())?;
        codec.decode_body(self, &node)?;

        self.skip_to_end_of_value()?;
        self.read_end_tag()?;

        // Allow for a possible continuation chunk of the enclosing value.
        self.chunk.in_chunked_value = save_chunked;
        self.start_chunk()?;

        Ok(Value::Ref(node))
    }

    fn read_value_indirection(&mut self) -> Result<Value> {
        let target = self.read_indirection_target()?;
        let resolution = self.indirections.borrow().resolve_value(target);
        match resolution {
            Resolution::Hit(node) => Ok(Value::Ref(node)),
            Resolution::Miss => match self.policy {
                IndirectionPolicy::Strict => {
                    Err(CdrError::UnresolvedIndirection { offset: target })
                }
                IndirectionPolicy::Deferred => {
                    debug!(offset = target, "deferring unresolved indirection");
                    Ok(Value::Ref(
                        self.indirections.borrow_mut().defer_value(target),
                    ))
                }
            },
        }
    }

    /// Signed delta relative to the delta field's own offset.
    fn read_indirection_target(&mut self) -> Result<u64> {
        let delta = self.read_i32()? as i64;
        let base = self.reader.logical_position() as i64 - 4;
        let target = base + delta;
        if target < 0 {
            return Err(CdrError::format(
                base as u64,
                format!("indirection delta {delta} points before message start"),
            ));
        }
        Ok(target as u64)
    }

    /// Zero, one, or many type identifiers per the tag bits; many supports
    /// multiple-inheritance-style declarations, most-derived first.
    fn read_type_ids(
        &mut self,
        tag_offset: u64,
        vtag: u32,
        expected: Option<&str>,
    ) -> Result<Vec<String>> {
        match tag::type_info(tag_offset, vtag)? {
            TypeInfo::None => match expected {
                Some(id) => Ok(vec![id.to_string()]),
                None => Err(CdrError::format(tag_offset, constants::ERR_NO_TYPE_INFO)),
            },
            TypeInfo::Single => Ok(vec![self.read_type_id()?]),
            TypeInfo::List => self.read_type_id_list(),
        }
    }

    /// A single type identifier string, subject to its own indirection
    /// space keyed by the offset of the string's length field.
    fn read_type_id(&mut self) -> Result<String> {
        let (text, offset) = self.read_string_or_indirection()?;
        match text {
            Some(id) => {
                self.indirections.borrow_mut().register_type_id(offset, &id);
                Ok(id)
            }
            None => {
                let target = self.read_indirection_target()?;
                self.indirections
                    .borrow()
                    .resolve_type_id(target)
                    .ok_or(CdrError::UnresolvedIndirection { offset: target })
            }
        }
    }

    fn read_type_id_list(&mut self) -> Result<Vec<String>> {
        let count = self.read_i32()?;
        if count as u32 == tag::INDIRECTION_TAG {
            // Indirection to a previously seen list, cached under its first
            // element.
            let target = self.read_indirection_target()?;
            let first = self
                .indirections
                .borrow()
                .resolve_type_id(target)
                .ok_or(CdrError::UnresolvedIndirection { offset: target })?;
            return Ok(vec![first]);
        }
        if count <= 0 {
            return Err(CdrError::format(
                self.reader.logical_position() - 4,
                format!("invalid type identifier count {count}"),
            ));
        }
        let mut ids = Vec::with_capacity((count as usize).min(16));
        for _ in 0..count {
            ids.push(self.read_type_id()?);
        }
        Ok(ids)
    }

    /// A type-location string, subject to its own indirection space.
    fn read_location(&mut self) -> Result<String> {
        let (text, offset) = self.read_string_or_indirection()?;
        match text {
            Some(location) => {
                self.indirections
                    .borrow_mut()
                    .register_location(offset, &location);
                Ok(location)
            }
            None => {
                let target = self.read_indirection_target()?;
                self.indirections
                    .borrow()
                    .resolve_location(target)
                    .ok_or(CdrError::UnresolvedIndirection { offset: target })
            }
        }
    }

    /// A string whose length position may instead hold an indirection
    /// marker. Returns the decoded text (or `None` for an indirection) and
    /// the logical offset of the length field, which is the cache key.
    fn read_string_or_indirection(&mut self) -> Result<(Option<String>, u64)> {
        self.check_chunk(4, 4)?;
        let offset_after_align =
            self.reader.logical_position() + align_gap(self.reader.logical_position(), 4) as u64;
        let len = self.reader.read_i32()?;
        if len as u32 == tag::INDIRECTION_TAG {
            return Ok((None, offset_after_align));
        }
        let len = self
            .reader
            .check_non_negative_length(offset_after_align, len)?;
        let text = self.reader.read_string_body(len)?;
        Ok((Some(text), offset_after_align))
    }

    // ---- custom-marshal body spans -----------------------------------

    /// Open the optional-data region a custom body codec may read. A null
    /// tag means the sender wrote no optional data: every read until
    /// [`ValueReader::close_custom_body`] then fails.
    pub fn open_custom_body(&mut self) -> Result<()> {
        let vtag = self.read_u32()?;
        let offset = self.reader.logical_position() - 4;

        if vtag == tag::NULL_TAG {
            self.no_optional_data = true;
            return Ok(());
        }
        if vtag == tag::INDIRECTION_TAG {
            return Err(CdrError::format(offset, constants::ERR_CUSTOM_INDIRECTION));
        }
        if tag::has_codebase(vtag) {
            return Err(CdrError::format(offset, constants::ERR_CUSTOM_CODEBASE));
        }
        if tag::type_info(offset, vtag)? != TypeInfo::Single {
            return Err(CdrError::format(offset, constants::ERR_CUSTOM_TYPE_INFO));
        }

        self.read_type_id()?;

        // The wrapper always rides inside an enclosing chunked value.
        self.start_chunk()?;
        self.chunk.end_level -= 1;
        self.chunk.chunked_level -= 1;
        Ok(())
    }

    pub fn close_custom_body(&mut self) -> Result<()> {
        if self.no_optional_data {
            self.no_optional_data = false;
            return Ok(());
        }
        self.skip_to_end_of_value()?;
        self.read_end_tag()?;
        self.start_chunk()
    }

    // ---- chunk-aware primitives --------------------------------------

    pub fn read_octet(&mut self) -> Result<u8> {
        self.check_chunk(1, 1)?;
        self.reader.read_octet()
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        self.check_chunk(1, 1)?;
        self.reader.read_bool()
    }

    pub fn read_i16(&mut self) -> Result<i16> {
        self.check_chunk(2, 2)?;
        self.reader.read_i16()
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        self.check_chunk(2, 2)?;
        self.reader.read_u16()
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        self.check_chunk(4, 4)?;
        self.reader.read_i32()
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        self.check_chunk(4, 4)?;
        self.reader.read_u32()
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        self.check_chunk(8, 8)?;
        self.reader.read_i64()
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        self.check_chunk(8, 8)?;
        self.reader.read_u64()
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        self.check_chunk(4, 4)?;
        self.reader.read_f32()
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        self.check_chunk(8, 8)?;
        self.reader.read_f64()
    }

    pub fn read_char(&mut self) -> Result<char> {
        self.check_chunk(1, 1)?;
        self.reader.read_char()
    }

    pub fn read_wchar(&mut self) -> Result<char> {
        self.check_chunk(2, 2)?;
        self.reader.read_wchar()
    }

    pub fn read_string(&mut self) -> Result<String> {
        self.check_chunk(4, 4)?;
        self.reader.read_string()
    }

    pub fn read_wstring(&mut self) -> Result<String> {
        self.check_chunk(4, 4)?;
        self.reader.read_wstring()
    }

    pub fn read_fixed(&mut self, digits: u16, scale: u16) -> Result<Fixed> {
        self.check_chunk(1, 1)?;
        self.reader.read_fixed(digits, scale)
    }

    /// Bulk octet array of a known length; never split across chunks.
    pub fn read_octet_array(&mut self, len: usize) -> Result<Vec<u8>> {
        if len == 0 {
            return Ok(Vec::new());
        }
        self.check_chunk(1, len)?;
        self.reader.read_octets(len)
    }

    pub fn read_bool_array(&mut self, len: usize) -> Result<Vec<bool>> {
        (0..len).map(|_| self.read_bool()).collect()
    }

    pub fn read_i16_array(&mut self, len: usize) -> Result<Vec<i16>> {
        (0..len).map(|_| self.read_i16()).collect()
    }

    pub fn read_i32_array(&mut self, len: usize) -> Result<Vec<i32>> {
        (0..len).map(|_| self.read_i32()).collect()
    }

    pub fn read_i64_array(&mut self, len: usize) -> Result<Vec<i64>> {
        (0..len).map(|_| self.read_i64()).collect()
    }

    pub fn read_f32_array(&mut self, len: usize) -> Result<Vec<f32>> {
        (0..len).map(|_| self.read_f32()).collect()
    }

    pub fn read_f64_array(&mut self, len: usize) -> Result<Vec<f64>> {
        (0..len).map(|_| self.read_f64()).collect()
    }

    /// Decode one field of a schema-driven struct body.
    pub fn read_field(&mut self, kind: &FieldKind) -> Result<Value> {
        Ok(match kind {
            FieldKind::Bool => Value::Bool(self.read_bool()?),
            FieldKind::Octet => Value::Octet(self.read_octet()?),
            FieldKind::Short => Value::Short(self.read_i16()?),
            FieldKind::UShort => Value::UShort(self.read_u16()?),
            FieldKind::Long => Value::Long(self.read_i32()?),
            FieldKind::ULong => Value::ULong(self.read_u32()?),
            FieldKind::LongLong => Value::LongLong(self.read_i64()?),
            FieldKind::ULongLong => Value::ULongLong(self.read_u64()?),
            FieldKind::Float => Value::Float(self.read_f32()?),
            FieldKind::Double => Value::Double(self.read_f64()?),
            FieldKind::Char => Value::Char(self.read_char()?),
            FieldKind::WChar => Value::WChar(self.read_wchar()?),
            FieldKind::Str => Value::String(self.read_string()?),
            FieldKind::WStr => Value::WString(self.read_wstring()?),
            FieldKind::Octets => {
                let len = self.read_u32()? as usize;
                Value::Octets(self.read_octet_array(len)?)
            }
            FieldKind::Fixed { digits, scale } => {
                Value::Fixed(self.read_fixed(*digits, *scale)?)
            }
            FieldKind::Sequence(inner) => {
                let count = self.read_u32()? as usize;
                let mut items = Vec::with_capacity(count.min(1024));
                for _ in 0..count {
                    items.push(self.read_field(inner)?);
                }
                Value::Sequence(items)
            }
            FieldKind::Value => self.read_value(None)?,
        })
    }
}
