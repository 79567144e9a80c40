use std::sync::Arc;

use crate::error::{Error, Result};
use crate::tuple::{
    check_capacity, null_flags_bytes, varint, StoredTupleReference, TupleReference, TupleWriter,
};
use crate::types::TypeTrait;

/// Writes tuples field by field, guided by one [`TypeTrait`] per field.
///
/// Used by ordered (B-tree style) components. Leaf levels store whole
/// tuples through [`write_tuple`](TupleWriter::write_tuple); interior
/// levels store only key fields through
/// [`write_tuple_fields`](TupleWriter::write_tuple_fields).
#[derive(Debug, Clone)]
pub struct TypeAwareTupleWriter {
    type_traits: Arc<[TypeTrait]>,
}

impl TypeAwareTupleWriter {
    pub fn new(type_traits: impl Into<Arc<[TypeTrait]>>) -> Self {
        TypeAwareTupleWriter {
            type_traits: type_traits.into(),
        }
    }

    pub fn type_traits(&self) -> &[TypeTrait] {
        &self.type_traits
    }

    fn is_variable(&self, field: usize) -> bool {
        self.type_traits.get(field).is_some_and(TypeTrait::is_variable)
    }

    /// Bitmap + slots + data for fields `start..start + count`.
    ///
    /// The bitmap is sized by `count`, not by the tuple's total field count.
    fn range_bytes<T: TupleReference + ?Sized>(&self, tuple: &T, start: usize, count: usize) -> usize {
        let mut bytes = null_flags_bytes(count);
        for i in start..start + count {
            let len = tuple.field_length(i);
            if self.is_variable(i) {
                bytes += varint::encoded_len(len as u64);
            }
            bytes += len;
        }
        bytes
    }

    fn check_range<T: TupleReference + ?Sized>(&self, tuple: &T, start: usize, count: usize) -> Result<()> {
        let limit = tuple.field_count().min(self.type_traits.len());
        match start.checked_add(count) {
            Some(end) if end <= limit => Ok(()),
            _ => Err(Error::FieldRange {
                start,
                count,
                field_count: limit,
            }),
        }
    }

    fn encode_range<T: TupleReference + ?Sized>(
        &self,
        tuple: &T,
        start: usize,
        count: usize,
        buf: &mut [u8],
        offset: usize,
    ) -> Result<usize> {
        self.check_range(tuple, start, count)?;
        for i in start..start + count {
            if let TypeTrait::Fixed(expected) = self.type_traits[i] {
                let actual = tuple.field_length(i);
                if actual != expected {
                    return Err(Error::FieldLength {
                        field: i,
                        expected,
                        actual,
                    });
                }
            }
        }
        check_capacity(buf, offset, self.range_bytes(tuple, start, count))?;

        let mut runner = offset;
        let null_bytes = null_flags_bytes(count);
        buf[runner..runner + null_bytes].fill(0);
        runner += null_bytes;

        for i in start..start + count {
            if self.type_traits[i].is_variable() {
                runner = varint::encode(tuple.field_length(i) as u64, buf, runner);
            }
        }

        for i in start..start + count {
            let field = tuple.field(i);
            buf[runner..runner + field.len()].copy_from_slice(field);
            runner += field.len();
        }

        Ok(runner - offset)
    }
}

impl TupleWriter for TypeAwareTupleWriter {
    type Reference<'a> = TypeAwareTupleReference<'a>;

    fn bytes_required<T: TupleReference + ?Sized>(&self, tuple: &T) -> usize {
        self.range_bytes(tuple, 0, tuple.field_count())
    }

    fn bytes_required_fields<T: TupleReference + ?Sized>(
        &self,
        tuple: &T,
        start: usize,
        count: usize,
    ) -> Result<usize> {
        self.check_range(tuple, start, count)?;
        Ok(self.range_bytes(tuple, start, count))
    }

    fn write_tuple<T: TupleReference + ?Sized>(
        &self,
        tuple: &T,
        buf: &mut [u8],
        offset: usize,
    ) -> Result<usize> {
        self.encode_range(tuple, 0, tuple.field_count(), buf, offset)
    }

    fn write_tuple_fields<T: TupleReference + ?Sized>(
        &self,
        tuple: &T,
        start: usize,
        count: usize,
        buf: &mut [u8],
        offset: usize,
    ) -> Result<usize> {
        self.encode_range(tuple, start, count, buf, offset)
    }

    fn create_tuple_reference<'a>(&self) -> TypeAwareTupleReference<'a> {
        TypeAwareTupleReference::new(Arc::clone(&self.type_traits))
    }
}

/// Decodes tuples written by [`TypeAwareTupleWriter`].
///
/// By default the reader expects every field of its type traits. Tuples
/// written through the partial path are read after
/// [`set_field_range`](Self::set_field_range) with the same range.
#[derive(Debug)]
pub struct TypeAwareTupleReference<'a> {
    type_traits: Arc<[TypeTrait]>,
    field_start: usize,
    field_count: usize,
    /// Cumulative end offset of each field, relative to `data_start`.
    field_ends: Vec<usize>,
    buf: &'a [u8],
    tuple_start: usize,
    data_start: usize,
}

impl<'a> TypeAwareTupleReference<'a> {
    pub fn new(type_traits: Arc<[TypeTrait]>) -> Self {
        let field_count = type_traits.len();
        TypeAwareTupleReference {
            type_traits,
            field_start: 0,
            field_count,
            field_ends: Vec::with_capacity(field_count),
            buf: &[],
            tuple_start: 0,
            data_start: 0,
        }
    }

    /// Decode only type traits `start..start + count` on the next reset.
    pub fn set_field_range(&mut self, start: usize, count: usize) -> Result<()> {
        match start.checked_add(count) {
            Some(end) if end <= self.type_traits.len() => {
                self.field_start = start;
                self.field_count = count;
                Ok(())
            }
            _ => Err(Error::FieldRange {
                start,
                count,
                field_count: self.type_traits.len(),
            }),
        }
    }

    fn field_begin(&self, index: usize) -> usize {
        if index == 0 { 0 } else { self.field_ends[index - 1] }
    }
}

impl TupleReference for TypeAwareTupleReference<'_> {
    fn field_count(&self) -> usize {
        self.field_count
    }

    fn field(&self, index: usize) -> &[u8] {
        let begin = self.data_start + self.field_begin(index);
        let end = self.data_start + self.field_ends[index];
        &self.buf[begin..end]
    }
}

impl<'a> StoredTupleReference<'a> for TypeAwareTupleReference<'a> {
    fn reset(&mut self, buf: &'a [u8], offset: usize) -> Result<()> {
        let mut pos = offset + null_flags_bytes(self.field_count);
        if pos > buf.len() {
            return Err(Error::Corruption(format!(
                "tuple at offset {offset} truncated in null bitmap"
            )));
        }

        self.field_ends.clear();
        let mut cumul = 0usize;
        for trait_ in &self.type_traits[self.field_start..self.field_start + self.field_count] {
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
            self.field_ends.push(cumul);
        }

        if pos.checked_add(cumul).is_none_or(|end| end > buf.len()) {
            return Err(Error::Corruption(format!(
                "tuple at offset {offset} needs {cumul} data bytes past {pos}, buffer has {}",
                buf.len()
            )));
        }

        self.buf = buf;
        self.tuple_start = offset;
        self.data_start = pos;
        Ok(())
    }

    fn tuple_size(&self) -> usize {
        self.data_start - self.tuple_start + self.field_ends.last().copied().unwrap_or(0)
    }
}
