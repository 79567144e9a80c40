//! Compact tuple encoding for spatial components whose bounding boxes are points.
//!
//! An R-tree tuple logically carries `K` key fields (a min and a max
//! coordinate per dimension) followed by `V` value fields. When every box
//! is a point, min equals max per dimension, so only `K / 2` coordinates
//! are stored:
//!
//! ```text
//! logical  [0.4, 0.3, 0.4, 0.3, 1]   K = 4, V = 1
//! stored   [0.4, 0.3, 1]             stored key fields = 2
//! ```
//!
//! The reader exposes the logical view again, mapping key field `i` in
//! `K/2..K` onto stored field `i mod K/2`. Counts used for the on-disk
//! layout (null bitmap) are always the stored counts.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::tuple::{
    check_capacity, null_flags_bytes, varint, StoredTupleReference, TupleReference, TupleWriter,
};
use crate::types::TypeTrait;

/// Field counts shared by the writer and its readers.
#[derive(Debug, Clone, Copy)]
struct PointMbrLayout {
    key_field_count: usize,
    value_field_count: usize,
    stored_key_field_count: usize,
}

impl PointMbrLayout {
    fn total_field_count(&self) -> usize {
        self.key_field_count + self.value_field_count
    }

    fn stored_total_field_count(&self) -> usize {
        self.stored_key_field_count + self.value_field_count
    }

    fn value_fields(&self) -> std::ops::Range<usize> {
        self.key_field_count..self.total_field_count()
    }

    /// Stored position of logical field `index`.
    fn stored_index(&self, index: usize) -> usize {
        if index < self.stored_key_field_count {
            index
        } else if index < self.key_field_count {
            index % self.stored_key_field_count
        } else {
            index - self.stored_key_field_count
        }
    }
}

/// Writes point-MBR tuples storing half of the key coordinates.
#[derive(Debug, Clone)]
pub struct PointMbrTupleWriter {
    type_traits: Arc<[TypeTrait]>,
    layout: PointMbrLayout,
}

impl PointMbrTupleWriter {
    /// `type_traits` describe the logical tuple: `key_field_count` key
    /// fields followed by `value_field_count` value fields.
    pub fn new(
        type_traits: impl Into<Arc<[TypeTrait]>>,
        key_field_count: usize,
        value_field_count: usize,
    ) -> Result<Self> {
        let type_traits = type_traits.into();
        if key_field_count == 0 || key_field_count % 2 != 0 {
            return Err(Error::Config {
                key: "key-field-count".into(),
                reason: format!("point MBR needs an even, non-zero key field count, got {key_field_count}"),
            });
        }
        if type_traits.len() != key_field_count + value_field_count {
            return Err(Error::Config {
                key: "type-traits".into(),
                reason: format!(
                    "{} type traits for {key_field_count} key and {value_field_count} value fields",
                    type_traits.len()
                ),
            });
        }
        if let Some(i) = type_traits[..key_field_count].iter().position(TypeTrait::is_variable) {
            return Err(Error::Config {
                key: "type-traits".into(),
                reason: format!("key field {i} must be fixed-length"),
            });
        }

        Ok(PointMbrTupleWriter {
            type_traits,
            layout: PointMbrLayout {
                key_field_count,
                value_field_count,
                stored_key_field_count: key_field_count / 2,
            },
        })
    }

    pub fn key_field_count(&self) -> usize {
        self.layout.key_field_count
    }

    pub fn value_field_count(&self) -> usize {
        self.layout.value_field_count
    }

    pub fn stored_key_field_count(&self) -> usize {
        self.layout.stored_key_field_count
    }

    fn slot_bytes<T: TupleReference + ?Sized>(&self, tuple: &T) -> usize {
        self.layout
            .value_fields()
            .filter(|&i| self.type_traits[i].is_variable())
            .map(|i| varint::encoded_len(tuple.field_length(i) as u64))
            .sum()
    }

    fn validate<T: TupleReference + ?Sized>(&self, tuple: &T) -> Result<()> {
        let total = self.layout.total_field_count();
        if tuple.field_count() != total {
            return Err(Error::FieldRange {
                start: 0,
                count: total,
                field_count: tuple.field_count(),
            });
        }
        for (i, trait_) in self.type_traits.iter().enumerate() {
            if let TypeTrait::Fixed(expected) = trait_ {
                let actual = tuple.field_length(i);
                if actual != *expected {
                    return Err(Error::FieldLength {
                        field: i,
                        expected: *expected,
                        actual,
                    });
                }
            }
        }
        let stored = self.layout.stored_key_field_count;
        if let Some(i) = (0..stored).find(|&i| tuple.field(i) != tuple.field(i + stored)) {
            return Err(Error::Unsupported(format!(
                "dimension {i} is not degenerate (min != max); point MBR encoding cannot store it"
            )));
        }
        Ok(())
    }
}

impl TupleWriter for PointMbrTupleWriter {
    type Reference<'a> = PointMbrTupleReference<'a>;

    fn bytes_required<T: TupleReference + ?Sized>(&self, tuple: &T) -> usize {
        let keys: usize = (0..self.layout.stored_key_field_count)
            .map(|i| tuple.field_length(i))
            .sum();
        let values: usize = self.layout.value_fields().map(|i| tuple.field_length(i)).sum();
        null_flags_bytes(self.layout.stored_total_field_count()) + self.slot_bytes(tuple) + keys + values
    }

    fn bytes_required_fields<T: TupleReference + ?Sized>(
        &self,
        _tuple: &T,
        _start: usize,
        _count: usize,
    ) -> Result<usize> {
        Err(Error::Unsupported(
            "partial field ranges are meaningless once point coordinates are deduplicated".into(),
        ))
    }

    fn write_tuple<T: TupleReference + ?Sized>(
        &self,
        tuple: &T,
        buf: &mut [u8],
        offset: usize,
    ) -> Result<usize> {
        self.validate(tuple)?;
        check_capacity(buf, offset, self.bytes_required(tuple))?;

        let mut runner = offset;
        let null_bytes = null_flags_bytes(self.layout.stored_total_field_count());
        buf[runner..runner + null_bytes].fill(0);
        runner += null_bytes;

        // Only value fields can be variable-length.
        for i in self.layout.value_fields() {
            if self.type_traits[i].is_variable() {
                runner = varint::encode(tuple.field_length(i) as u64, buf, runner);
            }
        }

        let stored_keys = 0..self.layout.stored_key_field_count;
        for i in stored_keys.chain(self.layout.value_fields()) {
            let field = tuple.field(i);
            buf[runner..runner + field.len()].copy_from_slice(field);
            runner += field.len();
        }

        Ok(runner - offset)
    }

    fn write_tuple_fields<T: TupleReference + ?Sized>(
        &self,
        _tuple: &T,
        start: usize,
        count: usize,
        _buf: &mut [u8],
        _offset: usize,
    ) -> Result<usize> {
        Err(Error::Unsupported(format!(
            "point MBR writer cannot write field range {start}+{count}; key-only tuples are not stored"
        )))
    }

    fn create_tuple_reference<'a>(&self) -> PointMbrTupleReference<'a> {
        PointMbrTupleReference {
            type_traits: Arc::clone(&self.type_traits),
            layout: self.layout,
            stored_ends: Vec::with_capacity(self.layout.stored_total_field_count()),
            buf: &[],
            tuple_start: 0,
            data_start: 0,
        }
    }
}

/// Reads a stored point-MBR tuple and presents the logical `K + V` fields.
#[derive(Debug)]
pub struct PointMbrTupleReference<'a> {
    type_traits: Arc<[TypeTrait]>,
    layout: PointMbrLayout,
    /// Cumulative end offsets of the stored fields.
    stored_ends: Vec<usize>,
    buf: &'a [u8],
    tuple_start: usize,
    data_start: usize,
}

impl TupleReference for PointMbrTupleReference<'_> {
    fn field_count(&self) -> usize {
        self.layout.total_field_count()
    }

    fn field(&self, index: usize) -> &[u8] {
        assert!(index < self.field_count(), "field {index} out of range");
        let stored = self.layout.stored_index(index);
        let begin = if stored == 0 { 0 } else { self.stored_ends[stored - 1] };
        &self.buf[self.data_start + begin..self.data_start + self.stored_ends[stored]]
    }
}

impl<'a> StoredTupleReference<'a> for PointMbrTupleReference<'a> {
    fn reset(&mut self, buf: &'a [u8], offset: usize) -> Result<()> {
        let mut pos = offset + null_flags_bytes(self.layout.stored_total_field_count());
        if pos > buf.len() {
            return Err(Error::Corruption(format!(
                "point MBR tuple at offset {offset} truncated in null bitmap"
            )));
        }

        self.stored_ends.clear();
        let mut cumul = 0usize;
        for trait_ in &self.type_traits[..self.layout.stored_key_field_count] {
            cumul += trait_.fixed_length().unwrap_or(0);
            self.stored_ends.push(cumul);
        }
        for trait_ in &self.type_traits[self.layout.value_fields()] {
            let len = match trait_ {
                TypeTrait::Fixed(len) => *len,
                TypeTrait::Variable => {
                    let (len, next) = varint::decode(buf, pos)?;
                    pos = next;
                    usize::try_from(len).map_err(|_| {
                        Error::Corruption(format!("field length {len} does not fit in memory"))
                    })?
                }
            };
            cumul = cumul
                .checked_add(len)
                .ok_or_else(|| Error::Corruption("field lengths overflow".into()))?;
            self.stored_ends.push(cumul);
        }

        if pos.checked_add(cumul).is_none_or(|end| end > buf.len()) {
            return Err(Error::Corruption(format!(
                "point MBR tuple at offset {offset} needs {cumul} data bytes past {pos}, buffer has {}",
                buf.len()
            )));
        }

        self.buf = buf;
        self.tuple_start = offset;
        self.data_start = pos;
        Ok(())
    }

    fn tuple_size(&self) -> usize {
        self.data_start - self.tuple_start + self.stored_ends.last().copied().unwrap_or(0)
    }
}
