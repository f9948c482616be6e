//! Authoritative element state.
//!
//! Maps element id to a boolean: active/inactive for blocks, straight/curved
//! for switches. Entries are created on first write and read as `false`
//! until then. In-memory only.
//!
//! The store holds *intended* state. It is updated optimistically before a
//! command is sent and is never rolled back on a send failure.

use parking_lot::RwLock;
use railctl_core::{ElementId, ElementKind};
use std::collections::BTreeMap;

#[derive(Debug, Default)]
pub struct StateStore {
    entries: RwLock<BTreeMap<ElementId, bool>>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value, `false` if never written.
    pub fn get(&self, id: &ElementId) -> bool {
        self.entries.read().get(id).copied().unwrap_or(false)
    }

    /// Whether `id` has ever been written.
    pub fn contains(&self, id: &ElementId) -> bool {
        self.entries.read().contains_key(id)
    }

    /// Write a value, returning the previous one if present.
    pub fn set(&self, id: ElementId, value: bool) -> Option<bool> {
        self.entries.write().insert(id, value)
    }

    /// All stored blocks, ordered by id.
    pub fn blocks(&self) -> Vec<(ElementId, bool)> {
        self.of_kind(ElementKind::Block)
    }

    /// All stored switches, ordered by id.
    pub fn switches(&self) -> Vec<(ElementId, bool)> {
        self.of_kind(ElementKind::Switch)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn of_kind(&self, kind: ElementKind) -> Vec<(ElementId, bool)> {
        self.entries
            .read()
            .iter()
            .filter(|(id, _)| id.kind() == kind)
            .map(|(id, value)| (id.clone(), *value))
            .collect()
    }
}
