//! Type resolution: mapping wire type identifiers to body codecs.
//!
//! The registry is built once per connection and threaded through every
//! decode call; there is no process-wide mutable lookup. Dispatch is a
//! static table from type identifier to codec, with an optional
//! [`TypeLocator`] consulted for identifiers that arrive with a
//! type-location string but no local registration.

use crate::error::{CdrError, Result};
use crate::protocol::de::ValueReader;
use crate::protocol::ser::ValueWriter;
use crate::protocol::value::{Value, ValueBody, ValueRef};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Body codec for one value type. `decode_body` fills the pre-registered
/// target node so cycles into the value resolve while it is still being
/// read; `encode_body` defaults to writing the fields structurally.
pub trait ValueTypeCodec {
    fn decode_body(&self, reader: &mut ValueReader, target: &ValueRef) -> Result<()>;

    fn encode_body(&self, writer: &mut ValueWriter, body: &ValueBody) -> Result<()> {
        for field in &body.fields {
            writer.write_field(field)?;
        }
        Ok(())
    }
}

/// Fallback resolution for unregistered identifiers carrying a
/// type-location string.
pub trait TypeLocator {
    fn locate(&self, type_id: &str, location: &str) -> Option<Arc<dyn ValueTypeCodec>>;
}

/// Field shape of a struct-like value type; enough to drive a generic body
/// codec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
    Bool,
    Octet,
    Short,
    UShort,
    Long,
    ULong,
    LongLong,
    ULongLong,
    Float,
    Double,
    Char,
    WChar,
    Str,
    WStr,
    Octets,
    Fixed { digits: u16, scale: u16 },
    Sequence(Box<FieldKind>),
    /// A nested valuetype position (polymorphic, possibly null, possibly an
    /// indirection).
    Value,
}

/// Generic schema-driven codec for struct-like value types.
pub struct StructCodec {
    fields: Vec<FieldKind>,
}

impl StructCodec {
    pub fn new(fields: Vec<FieldKind>) -> Self {
        StructCodec { fields }
    }
}

impl ValueTypeCodec for StructCodec {
    fn decode_body(&self, reader: &mut ValueReader, target: &ValueRef) -> Result<()> {
        for kind in &self.fields {
            let field = reader.read_field(kind)?;
            target.borrow_mut().fields.push(field);
        }
        Ok(())
    }
}

/// The per-connection resolver: type identifier → codec.
#[derive(Default)]
pub struct TypeRegistry {
    codecs: HashMap<String, Arc<dyn ValueTypeCodec>>,
    locator: Option<Box<dyn TypeLocator>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, type_id: impl Into<String>, codec: Arc<dyn ValueTypeCodec>) {
        self.codecs.insert(type_id.into(), codec);
    }

    /// Convenience registration of a [`StructCodec`].
    pub fn register_struct(&mut self, type_id: impl Into<String>, fields: Vec<FieldKind>) {
        self.register(type_id, Arc::new(StructCodec::new(fields)));
    }

    pub fn set_locator(&mut self, locator: Box<dyn TypeLocator>) {
        self.locator = Some(locator);
    }

    /// Resolve the first usable identifier of a (most-derived first) list.
    /// Later identifiers act as truncation fallbacks. Unknown everywhere,
    /// even via the locator, is fatal.
    pub fn lookup(
        &self,
        type_ids: &[String],
        codebase: Option<&str>,
    ) -> Result<Arc<dyn ValueTypeCodec>> {
        if let Some(codec) = self.lookup_opt(type_ids, codebase) {
            return Ok(codec);
        }
        Err(CdrError::UnknownType {
            type_id: type_ids.first().cloned().unwrap_or_default(),
        })
    }

    pub fn lookup_opt(
        &self,
        type_ids: &[String],
        codebase: Option<&str>,
    ) -> Option<Arc<dyn ValueTypeCodec>> {
        for id in type_ids {
            if let Some(codec) = self.codecs.get(id) {
                return Some(codec.clone());
            }
        }
        if let (Some(locator), Some(location)) = (self.locator.as_ref(), codebase) {
            for id in type_ids {
                if let Some(codec) = locator.locate(id, location) {
                    debug!(type_id = %id, location, "codec supplied by type locator");
                    return Some(codec);
                }
            }
        }
        None
    }
}

/// Write one field structurally; shared by the default `encode_body` and the
/// top-level entry points.
pub(crate) fn field_kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Octet(_) => "octet",
        Value::Short(_) => "short",
        Value::UShort(_) => "ushort",
        Value::Long(_) => "long",
        Value::ULong(_) => "ulong",
        Value::LongLong(_) => "longlong",
        Value::ULongLong(_) => "ulonglong",
        Value::Float(_) => "float",
        Value::Double(_) => "double",
        Value::Char(_) => "char",
        Value::WChar(_) => "wchar",
        Value::String(_) => "string",
        Value::WString(_) => "wstring",
        Value::Octets(_) => "octets",
        Value::Fixed(_) => "fixed",
        Value::Sequence(_) => "sequence",
        Value::Ref(_) => "value",
    }
}
