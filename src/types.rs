use std::collections::HashMap;
use std::fmt;

/// String properties handed to policies at construction.
pub type Properties = HashMap<String, String>;

/// Per-field storage descriptor, shared by every tuple a codec handles.
///
/// Fixed-length fields occupy a statically known byte count and need no
/// length slot on disk. Variable-length fields carry a varint length slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeTrait {
    Fixed(usize),
    Variable,
}

impl TypeTrait {
    pub const INT32: TypeTrait = TypeTrait::Fixed(4);
    pub const INT64: TypeTrait = TypeTrait::Fixed(8);
    pub const DOUBLE: TypeTrait = TypeTrait::Fixed(8);

    /// Static byte count, or None for variable-length fields.
    pub fn fixed_length(&self) -> Option<usize> {
        match self {
            TypeTrait::Fixed(len) => Some(*len),
            TypeTrait::Variable => None,
        }
    }

    pub fn is_variable(&self) -> bool {
        matches!(self, TypeTrait::Variable)
    }
}

/// Stable arena identifier of a disk component within one index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentId(pub u64);

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Range of flush timestamps a component covers.
///
/// A freshly flushed component has `min == max`. A merge result spans
/// from the oldest to the newest timestamp of its inputs, so `c40-33`
/// is the merge of flushes 33 through 40.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdRange {
    pub min: u64,
    pub max: u64,
}

impl IdRange {
    pub fn single(id: u64) -> Self {
        IdRange { min: id, max: id }
    }

    /// Smallest range covering all of `ranges`.
    pub fn span<I: IntoIterator<Item = IdRange>>(ranges: I) -> Option<Self> {
        ranges.into_iter().reduce(|a, b| IdRange {
            min: a.min.min(b.min),
            max: a.max.max(b.max),
        })
    }

    pub fn contains(&self, other: &IdRange) -> bool {
        self.min <= other.min && other.max <= self.max
    }
}

impl fmt::Display for IdRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c{}-{}", self.max, self.min)
    }
}

/// Lifecycle of an LSM component.
///
/// ```text
/// ReadableWritable ──flush──► ReadableUnwritable ──schedule──► ReadableUnwritableMerging ──complete──► Inactive
/// ```
///
/// Transitions only move right. The memory component is the only one in
/// `ReadableWritable`; disk components are born `ReadableUnwritable`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ComponentState {
    ReadableWritable = 0,
    ReadableUnwritable = 1,
    ReadableUnwritableMerging = 2,
    Inactive = 3,
}

impl ComponentState {
    pub(crate) fn from_u8(v: u8) -> Self {
        match v {
            0 => ComponentState::ReadableWritable,
            1 => ComponentState::ReadableUnwritable,
            2 => ComponentState::ReadableUnwritableMerging,
            _ => ComponentState::Inactive,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_range_span_and_display() {
        let span = IdRange::span([IdRange::single(39), IdRange { min: 33, max: 38 }, IdRange::single(40)]);
        assert_eq!(span, Some(IdRange { min: 33, max: 40 }));
        assert_eq!(span.unwrap().to_string(), "c40-33");
        assert!(IdRange::span(Vec::new()).is_none());
    }

    #[test]
    fn id_range_contains() {
        let merged = IdRange { min: 1, max: 32 };
        assert!(merged.contains(&IdRange::single(5)));
        assert!(merged.contains(&merged));
        assert!(!merged.contains(&IdRange { min: 30, max: 33 }));
    }
}
