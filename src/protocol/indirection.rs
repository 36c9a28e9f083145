//! Offset-keyed back-reference tables.
//!
//! Three independent numbering spaces share one table set: decoded values,
//! type identifiers, and type-location strings each resolve against their
//! own map. Keys are the logical offset of the tag (or length field) that
//! introduced the entry, so a back-reference computed as delta plus the
//! current logical offset lands exactly on that key.
//!
//! Tables live for one stream instance and are shared, never copied, when a
//! stream is duplicated: nested body decoders resolve against the same
//! offset space as their parent.

use crate::protocol::value::{ValueBody, ValueRef};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use tracing::debug;

/// What to do when an indirection points at an offset with no entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndirectionPolicy {
    /// A miss is a hard failure.
    #[default]
    Strict,
    /// A miss yields a placeholder node, patched if the offset is registered
    /// later.
    Deferred,
}

/// Explicit resolution outcome; no control flow by exception.
#[derive(Debug, Clone)]
pub enum Resolution {
    Hit(ValueRef),
    Miss,
}

/// The shared handle streams and their duplicates hold.
pub type SharedIndirections = Rc<RefCell<IndirectionTable>>;

/// The three back-reference maps of one stream instance.
#[derive(Debug, Default)]
pub struct IndirectionTable {
    values: HashMap<u64, ValueRef>,
    type_ids: HashMap<u64, String>,
    locations: HashMap<u64, String>,
    /// Deferred placeholders awaiting a registration at their offset.
    pending: HashMap<u64, Vec<ValueRef>>,
}

impl IndirectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedIndirections {
        Rc::new(RefCell::new(Self::new()))
    }

    pub fn resolve_value(&self, offset: u64) -> Resolution {
        match self.values.get(&offset) {
            Some(node) => Resolution::Hit(node.clone()),
            None => Resolution::Miss,
        }
    }

    /// Register a value node under the offset of the tag that introduced it.
    /// Any deferred placeholders parked on that offset are patched in place
    /// so every holder observes the real node's content.
    pub fn register_value(&mut self, offset: u64, node: &ValueRef) {
        if let Some(waiting) = self.pending.remove(&offset) {
            debug!(offset, count = waiting.len(), "patching deferred indirections");
            for placeholder in waiting {
                *placeholder.borrow_mut() = node.borrow().clone();
            }
        }
        self.values.insert(offset, node.clone());
    }

    /// Deferred-policy miss: allocate a placeholder node parked on `offset`.
    pub fn defer_value(&mut self, offset: u64) -> ValueRef {
        let placeholder = ValueBody::default().into_ref();
        self.pending
            .entry(offset)
            .or_default()
            .push(placeholder.clone());
        placeholder
    }

    /// Offsets still awaiting a registration (deferred policy only).
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn resolve_type_id(&self, offset: u64) -> Option<String> {
        self.type_ids.get(&offset).cloned()
    }

    pub fn register_type_id(&mut self, offset: u64, id: &str) {
        self.type_ids.insert(offset, id.to_string());
    }

    pub fn resolve_location(&self, offset: u64) -> Option<String> {
        self.locations.get(&offset).cloned()
    }

    pub fn register_location(&mut self, offset: u64, location: &str) {
        self.locations.insert(offset, location.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::value::Value;

    #[test]
    fn numbering_spaces_are_independent() {
        let mut table = IndirectionTable::new();
        let node = ValueBody::new("IDL:A:1.0").into_ref();
        table.register_value(16, &node);
        table.register_type_id(16, "IDL:A:1.0");
        table.register_location(16, "http://codebase");

        assert!(matches!(table.resolve_value(16), Resolution::Hit(_)));
        assert_eq!(table.resolve_type_id(16).as_deref(), Some("IDL:A:1.0"));
        assert_eq!(table.resolve_location(16).as_deref(), Some("http://codebase"));
        assert!(matches!(table.resolve_value(20), Resolution::Miss));
    }

    #[test]
    fn deferred_placeholder_is_patched_on_registration() {
        let mut table = IndirectionTable::new();
        let placeholder = table.defer_value(32);
        assert!(table.has_pending());

        let real = ValueBody::new("IDL:B:1.0")
            .with_fields(vec![Value::Long(5)])
            .into_ref();
        table.register_value(32, &real);

        assert!(!table.has_pending());
        assert_eq!(placeholder.borrow().type_id(), "IDL:B:1.0");
        assert_eq!(placeholder.borrow().fields.len(), 1);
    }
}
