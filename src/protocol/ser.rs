//! Valuetype encoding: the chunk-aware writer over the primitive codec.
//!
//! Chunk writing is a small state machine: a chunk opens lazily with a
//! placeholder length right before the first field datum, closes by
//! back-patching the actual byte count, and reopens for more fields after a
//! nested value. Values already written are tracked by node identity; a
//! repeat emits an indirection tag and a relative delta instead of a second
//! encoding. Adjacent end tags are compacted into the outermost one.

use crate::buffer::align_gap;
use crate::core::{CdrWriter, Fixed, PatchSlot};
use crate::error::{CdrError, Result};
use crate::protocol::registry::{field_kind_name, TypeRegistry};
use crate::protocol::tag::{self, TypeInfo};
use crate::protocol::value::{Value, ValueRef};
use crate::protocol::version::EndTagConvention;
use bytes::Bytes;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

struct CustomSpan {
    wrote_data: bool,
    prev_chunked: bool,
}

/// Chunk-aware encoder for one message.
pub struct ValueWriter {
    writer: CdrWriter,
    registry: Arc<TypeRegistry>,
    seen_values: HashMap<usize, u64>,
    seen_type_ids: HashMap<String, u64>,
    seen_locations: HashMap<String, u64>,
    chunk_slot: Option<PatchSlot>,
    in_chunked_value: bool,
    end_level: i32,
    chunked_level: i32,
    custom_spans: Vec<CustomSpan>,
    /// Logical position right after the last end tag; `None` as soon as
    /// anything else is written. Gates compaction.
    last_end_tag: Option<u64>,
}

impl ValueWriter {
    pub fn new(writer: CdrWriter, registry: Arc<TypeRegistry>) -> Self {
        ValueWriter {
            writer,
            registry,
            seen_values: HashMap::new(),
            seen_type_ids: HashMap::new(),
            seen_locations: HashMap::new(),
            chunk_slot: None,
            in_chunked_value: false,
            end_level: 0,
            chunked_level: 0,
            custom_spans: Vec::new(),
            last_end_tag: None,
        }
    }

    #[inline]
    pub fn logical_position(&self) -> u64 {
        self.writer.logical_position()
    }

    pub fn write_endian_flag(&mut self) -> Result<()> {
        self.writer.write_endian_flag()
    }

    pub fn pad_header(&mut self, boundary: usize) -> Result<()> {
        self.writer.pad_header(boundary)
    }

    /// Close any open chunk and yield the encoded message.
    pub fn finish(mut self) -> Bytes {
        self.close_chunk();
        self.writer.finish()
    }

    /// Close any open chunk and flush everything, tail included, to the
    /// streaming sink.
    pub fn finish_streaming(mut self) {
        self.close_chunk();
        self.writer.finish_streaming();
    }

    // ---- chunk write state machine -----------------------------------

    #[inline]
    fn data_written(&mut self) {
        self.last_end_tag = None;
    }

    /// Field data inside a chunked value must sit inside a chunk; open one
    /// with a placeholder length if none is active.
    fn ensure_chunk(&mut self) {
        if self.in_chunked_value && self.chunk_slot.is_none() {
            let slot = self.writer.reserve_u32_slot();
            self.writer.set_pinned(true);
            self.chunk_slot = Some(slot);
            self.data_written();
        }
    }

    /// Back-patch the open chunk's actual byte count, if any.
    fn close_chunk(&mut self) {
        if let Some(slot) = self.chunk_slot.take() {
            let len = self.writer.logical_position() - (slot.logical + 4);
            self.writer.patch_u32(slot, len as u32);
            self.writer.set_pinned(false);
        }
    }

    fn enter_value(&mut self) {
        self.end_level -= 1;
        if self.in_chunked_value {
            self.chunked_level -= 1;
        }
    }

    fn leave_value(&mut self) {
        if self.in_chunked_value {
            self.chunked_level += 1;
        }
        self.end_level += 1;
    }

    /// One end tag per enclosing chunked value, compacted where permitted:
    /// an end tag written immediately after another replaces it with the
    /// enclosing level's value.
    fn write_end_tag(&mut self) -> Result<()> {
        let convention = self.writer.profile().end_tag;
        let value = match convention {
            EndTagConvention::ChunkedOnly => self.chunked_level,
            EndTagConvention::AllValues => self.end_level,
        };
        if self.last_end_tag == Some(self.writer.logical_position()) {
            self.writer.truncate_last_u32();
        }
        self.writer.write_i32(value)?;
        self.last_end_tag = Some(self.writer.logical_position());
        Ok(())
    }

    // ---- value encoding ----------------------------------------------

    /// Encode one value position: null or a valuetype node.
    pub fn write_value(&mut self, value: &Value) -> Result<()> {
        match value {
            Value::Null => {
                self.ensure_chunk();
                self.writer.write_u32(tag::NULL_TAG)?;
                self.data_written();
                Ok(())
            }
            Value::Ref(node) => self.write_value_ref(node),
            other => Err(CdrError::format(
                self.writer.logical_position(),
                format!("cannot marshal {} at a value position", field_kind_name(other)),
            )),
        }
    }

    fn write_value_ref(&mut self, node: &ValueRef) -> Result<()> {
        let identity = Rc::as_ptr(node) as usize;
        if let Some(&target) = self.seen_values.get(&identity) {
            return self.write_value_indirection(target);
        }

        // Shallow copy: nested refs stay shared, and no borrow is held
        // across the recursive field writes.
        let body = node.borrow().clone();

        // A nested value tag never sits inside the enclosing chunk.
        self.close_chunk();
        let save_chunked = self.in_chunked_value;
        self.in_chunked_value = body.chunked;

        let info = match body.type_ids.len() {
            0 => TypeInfo::None,
            1 => TypeInfo::Single,
            _ => TypeInfo::List,
        };
        let vtag = tag::make_value_tag(body.codebase.is_some(), info, body.chunked);
        self.writer.write_u32(vtag)?;
        let tag_offset = self.writer.logical_position() - 4;
        self.seen_values.insert(identity, tag_offset);
        self.data_written();

        if let Some(location) = &body.codebase {
            self.write_location(location)?;
        }
        match info {
            TypeInfo::None => {}
            TypeInfo::Single => self.write_type_id(&body.type_ids[0])?,
            TypeInfo::List => {
                self.writer.write_i32(body.type_ids.len() as i32)?;
                self.data_written();
                for id in &body.type_ids {
                    self.write_type_id(id)?;
                }
            }
        }

        self.enter_value();

        match self
            .registry
            .clone()
            .lookup_opt(&body.type_ids, body.codebase.as_deref())
        {
            Some(codec) => codec.encode_body(self, &body)?,
            None => {
                for field in &body.fields {
                    self.write_field(field)?;
                }
            }
        }

        self.close_chunk();
        if body.chunked {
            self.write_end_tag()?;
        }
        self.leave_value();
        self.in_chunked_value = save_chunked;
        Ok(())
    }

    fn write_value_indirection(&mut self, target: u64) -> Result<()> {
        self.ensure_chunk();
        self.writer.write_u32(tag::INDIRECTION_TAG)?;
        self.write_delta_to(target)?;
        self.data_written();
        Ok(())
    }

    /// The delta field's own offset is the base the decoder resolves
    /// against.
    fn write_delta_to(&mut self, target: u64) -> Result<()> {
        let delta_field = self.writer.logical_position();
        self.writer.write_i32((target as i64 - delta_field as i64) as i32)
    }

    fn write_type_id(&mut self, id: &str) -> Result<()> {
        if let Some(&target) = self.seen_type_ids.get(id) {
            self.writer.write_u32(tag::INDIRECTION_TAG)?;
            self.write_delta_to(target)?;
        } else {
            let here = self.writer.logical_position();
            let length_field = here + align_gap(here, 4) as u64;
            self.writer.write_string(id)?;
            self.seen_type_ids.insert(id.to_string(), length_field);
        }
        self.data_written();
        Ok(())
    }

    fn write_location(&mut self, location: &str) -> Result<()> {
        if let Some(&target) = self.seen_locations.get(location) {
            self.writer.write_u32(tag::INDIRECTION_TAG)?;
            self.write_delta_to(target)?;
        } else {
            let here = self.writer.logical_position();
            let length_field = here + align_gap(here, 4) as u64;
            self.writer.write_string(location)?;
            self.seen_locations.insert(location.to_string(), length_field);
        }
        self.data_written();
        Ok(())
    }

    // ---- custom-marshal body spans -----------------------------------

    /// Open a custom body span. With `has_data` false only a null tag is
    /// written and the matching close is a no-op.
    pub fn open_custom_body(&mut self, type_id: &str, has_data: bool) -> Result<()> {
        if !has_data {
            self.ensure_chunk();
            self.writer.write_u32(tag::NULL_TAG)?;
            self.data_written();
            self.custom_spans.push(CustomSpan {
                wrote_data: false,
                prev_chunked: self.in_chunked_value,
            });
            return Ok(());
        }

        self.close_chunk();
        self.custom_spans.push(CustomSpan {
            wrote_data: true,
            prev_chunked: self.in_chunked_value,
        });
        self.in_chunked_value = true;

        let vtag = tag::make_value_tag(false, TypeInfo::Single, true);
        self.writer.write_u32(vtag)?;
        self.data_written();
        self.write_type_id(type_id)?;

        self.end_level -= 1;
        self.chunked_level -= 1;
        Ok(())
    }

    pub fn close_custom_body(&mut self) -> Result<()> {
        let span = self.custom_spans.pop().ok_or_else(|| {
            CdrError::format(
                self.writer.logical_position(),
                "custom body close without a matching open",
            )
        })?;
        if !span.wrote_data {
            return Ok(());
        }
        self.close_chunk();
        self.write_end_tag()?;
        self.chunked_level += 1;
        self.end_level += 1;
        self.in_chunked_value = span.prev_chunked;
        Ok(())
    }

    // ---- chunk-aware primitives --------------------------------------

    pub fn write_octet(&mut self, v: u8) -> Result<()> {
        self.ensure_chunk();
        self.writer.write_octet(v)?;
        self.data_written();
        Ok(())
    }

    pub fn write_bool(&mut self, v: bool) -> Result<()> {
        self.write_octet(v as u8)
    }

    pub fn write_i16(&mut self, v: i16) -> Result<()> {
        self.ensure_chunk();
        self.writer.write_i16(v)?;
        self.data_written();
        Ok(())
    }

    pub fn write_u16(&mut self, v: u16) -> Result<()> {
        self.write_i16(v as i16)
    }

    pub fn write_i32(&mut self, v: i32) -> Result<()> {
        self.ensure_chunk();
        self.writer.write_i32(v)?;
        self.data_written();
        Ok(())
    }

    pub fn write_u32(&mut self, v: u32) -> Result<()> {
        self.write_i32(v as i32)
    }

    pub fn write_i64(&mut self, v: i64) -> Result<()> {
        self.ensure_chunk();
        self.writer.write_i64(v)?;
        self.data_written();
        Ok(())
    }

    pub fn write_u64(&mut self, v: u64) -> Result<()> {
        self.write_i64(v as i64)
    }

    pub fn write_f32(&mut self, v: f32) -> Result<()> {
        self.ensure_chunk();
        self.writer.write_f32(v)?;
        self.data_written();
        Ok(())
    }

    pub fn write_f64(&mut self, v: f64) -> Result<()> {
        self.ensure_chunk();
        self.writer.write_f64(v)?;
        self.data_written();
        Ok(())
    }

    pub fn write_char(&mut self, c: char) -> Result<()> {
        self.ensure_chunk();
        self.writer.write_char(c)?;
        self.data_written();
        Ok(())
    }

    pub fn write_wchar(&mut self, c: char) -> Result<()> {
        self.ensure_chunk();
        self.writer.write_wchar(c)?;
        self.data_written();
        Ok(())
    }

    pub fn write_string(&mut self, s: &str) -> Result<()> {
        self.ensure_chunk();
        self.writer.write_string(s)?;
        self.data_written();
        Ok(())
    }

    pub fn write_wstring(&mut self, s: &str) -> Result<()> {
        self.ensure_chunk();
        self.writer.write_wstring(s)?;
        self.data_written();
        Ok(())
    }

    pub fn write_fixed(&mut self, fixed: &Fixed) -> Result<()> {
        self.ensure_chunk();
        self.writer.write_fixed(fixed)?;
        self.data_written();
        Ok(())
    }

    pub fn write_octet_array(&mut self, bytes: &[u8]) -> Result<()> {
        self.ensure_chunk();
        self.writer.write_octets(bytes)?;
        self.data_written();
        Ok(())
    }

    /// Encode one field structurally from its variant.
    pub fn write_field(&mut self, value: &Value) -> Result<()> {
        match value {
            Value::Null | Value::Ref(_) => self.write_value(value),
            Value::Bool(v) => self.write_bool(*v),
            Value::Octet(v) => self.write_octet(*v),
            Value::Short(v) => self.write_i16(*v),
            Value::UShort(v) => self.write_u16(*v),
            Value::Long(v) => self.write_i32(*v),
            Value::ULong(v) => self.write_u32(*v),
            Value::LongLong(v) => self.write_i64(*v),
            Value::ULongLong(v) => self.write_u64(*v),
            Value::Float(v) => self.write_f32(*v),
            Value::Double(v) => self.write_f64(*v),
            Value::Char(v) => self.write_char(*v),
            Value::WChar(v) => self.write_wchar(*v),
            Value::String(v) => self.write_string(v),
            Value::WString(v) => self.write_wstring(v),
            Value::Octets(v) => {
                self.write_u32(v.len() as u32)?;
                self.write_octet_array(v)
            }
            Value::Fixed(v) => self.write_fixed(v),
            Value::Sequence(items) => {
                self.write_u32(items.len() as u32)?;
                for item in items {
                    self.write_field(item)?;
                }
                Ok(())
            }
        }
    }
}
