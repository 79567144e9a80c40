use std::collections::BTreeMap;
use std::mem;

use crate::tuple::{OwnedTuple, TupleReference};
use crate::types::ComponentState;

/// Fixed per-entry overhead added to the size estimate.
const ENTRY_OVERHEAD: usize = 32;

/// In-memory component collecting inserts until the next flush.
///
/// Keyed by tuple key bytes, so iteration order is the order a component
/// file stores tuples in. Inserting an existing key replaces the tuple.
/// When the size estimate passes the budget the index flushes it to a
/// new disk component.
#[derive(Debug)]
pub struct MemoryComponent {
    tuples: BTreeMap<Vec<u8>, OwnedTuple>,
    size_bytes: usize,
    budget_bytes: usize,
}

impl MemoryComponent {
    pub fn new(budget_bytes: usize) -> Self {
        MemoryComponent {
            tuples: BTreeMap::new(),
            size_bytes: 0,
            budget_bytes,
        }
    }

    /// The memory component is the only writable one.
    pub fn state(&self) -> ComponentState {
        ComponentState::ReadableWritable
    }

    pub fn insert(&mut self, key: Vec<u8>, tuple: OwnedTuple) {
        let removed = self.tuples.get(&key).map_or(0, |old| entry_size(&key, old));
        self.size_bytes = self.size_bytes.saturating_sub(removed) + entry_size(&key, &tuple);
        self.tuples.insert(key, tuple);
    }

    pub fn get(&self, key: &[u8]) -> Option<&OwnedTuple> {
        self.tuples.get(key)
    }

    /// Tuples in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&[u8], &OwnedTuple)> {
        self.tuples.iter().map(|(k, t)| (k.as_slice(), t))
    }

    pub fn len(&self) -> usize {
        self.tuples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tuples.is_empty()
    }

    /// Estimated memory use in bytes.
    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    pub fn is_full(&self) -> bool {
        self.size_bytes >= self.budget_bytes
    }

    /// Empty the component after a successful flush.
    pub fn clear(&mut self) {
        self.tuples.clear();
        self.size_bytes = 0;
    }

    /// Move all tuples out, leaving the component empty.
    pub fn take(&mut self) -> BTreeMap<Vec<u8>, OwnedTuple> {
        self.size_bytes = 0;
        mem::take(&mut self.tuples)
    }
}

fn entry_size(key: &[u8], tuple: &OwnedTuple) -> usize {
    let fields: usize = (0..tuple.field_count()).map(|i| tuple.field_length(i)).sum();
    key.len() + fields + ENTRY_OVERHEAD
}
