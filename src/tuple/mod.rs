//! Type-aware binary tuple encoding.
//!
//! On-disk layout of a tuple:
//!
//! ```text
//! ┌──────────────────────────┬──────────────────────────────┬──────────────────────────┐
//! │ null bitmap              │ length slots                 │ field bytes              │
//! │ ceil(fields / 8) bytes,  │ one varint per variable-     │ concatenated in field    │
//! │ always zero              │ length field, in field order │ order                    │
//! └──────────────────────────┴──────────────────────────────┴──────────────────────────┘
//! ```
//!
//! Fixed-length fields have no slot; their size comes from the [`TypeTrait`].
//! Nulls are not supported, so the bitmap is never set.

pub mod point_mbr;
pub mod type_aware;
pub mod varint;

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::types::TypeTrait;

pub use point_mbr::{PointMbrTupleReference, PointMbrTupleWriter};
pub use type_aware::{TypeAwareTupleReference, TypeAwareTupleWriter};

/// Read access to the fields of a tuple, wherever its bytes live.
pub trait TupleReference {
    fn field_count(&self) -> usize;

    /// Bytes of field `index`. Panics if `index >= field_count()`.
    fn field(&self, index: usize) -> &[u8];

    fn field_length(&self, index: usize) -> usize {
        self.field(index).len()
    }
}

/// A reader positioned over a tuple encoded inside some buffer.
///
/// Decoding is sequential: locating field `i` requires every preceding
/// length slot, so `reset` decodes all slots up front.
pub trait StoredTupleReference<'a>: TupleReference {
    /// Point the reader at the tuple starting at `buf[offset]`.
    fn reset(&mut self, buf: &'a [u8], offset: usize) -> Result<()>;

    /// Encoded size of the current tuple in bytes.
    fn tuple_size(&self) -> usize;
}

/// Serializes tuples into the layout described at the module level.
pub trait TupleWriter {
    type Reference<'a>: StoredTupleReference<'a>;

    /// Bytes needed to encode every field of `tuple`.
    fn bytes_required<T: TupleReference + ?Sized>(&self, tuple: &T) -> usize;

    /// Bytes needed to encode fields `start..start + count` of `tuple`.
    fn bytes_required_fields<T: TupleReference + ?Sized>(
        &self,
        tuple: &T,
        start: usize,
        count: usize,
    ) -> Result<usize>;

    /// Encode all fields at `buf[offset..]`. Returns bytes written.
    fn write_tuple<T: TupleReference + ?Sized>(
        &self,
        tuple: &T,
        buf: &mut [u8],
        offset: usize,
    ) -> Result<usize>;

    /// Encode fields `start..start + count` at `buf[offset..]`.
    ///
    /// Interior tree levels store only key fields through this path.
    fn write_tuple_fields<T: TupleReference + ?Sized>(
        &self,
        tuple: &T,
        start: usize,
        count: usize,
        buf: &mut [u8],
        offset: usize,
    ) -> Result<usize>;

    /// A reader for tuples written by this writer.
    fn create_tuple_reference<'a>(&self) -> Self::Reference<'a>;
}

/// Null bitmap size for `field_count` stored fields.
pub(crate) fn null_flags_bytes(field_count: usize) -> usize {
    field_count.div_ceil(8)
}

pub(crate) fn check_capacity(buf: &[u8], offset: usize, needed: usize) -> Result<()> {
    let available = buf.len().saturating_sub(offset);
    if needed > available {
        return Err(Error::BufferTooSmall { needed, available });
    }
    Ok(())
}

/// A tuple whose fields are owned byte vectors.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OwnedTuple {
    fields: Vec<Vec<u8>>,
}

impl OwnedTuple {
    pub fn new(fields: Vec<Vec<u8>>) -> Self {
        OwnedTuple { fields }
    }

    /// Copy every field out of any tuple reference.
    pub fn from_reference<T: TupleReference + ?Sized>(tuple: &T) -> Self {
        let fields = (0..tuple.field_count())
            .map(|i| tuple.field(i).to_vec())
            .collect();
        OwnedTuple { fields }
    }

    pub fn fields(&self) -> &[Vec<u8>] {
        &self.fields
    }

    pub fn into_fields(self) -> Vec<Vec<u8>> {
        self.fields
    }
}

impl From<Vec<Vec<u8>>> for OwnedTuple {
    fn from(fields: Vec<Vec<u8>>) -> Self {
        OwnedTuple::new(fields)
    }
}

impl TupleReference for OwnedTuple {
    fn field_count(&self) -> usize {
        self.fields.len()
    }

    fn field(&self, index: usize) -> &[u8] {
        &self.fields[index]
    }
}

/// Identity bytes of a tuple's leading `key_field_count` fields.
///
/// Each key field is prefixed with its varint length so distinct field
/// splits never collide. Components store tuples ordered by these bytes.
pub fn key_bytes<T: TupleReference + ?Sized>(tuple: &T, key_field_count: usize) -> Vec<u8> {
    let key_fields = key_field_count.min(tuple.field_count());
    let len: usize = (0..key_fields)
        .map(|i| varint::encoded_len(tuple.field_length(i) as u64) + tuple.field_length(i))
        .sum();
    let mut out = vec![0u8; len];
    let mut pos = 0;
    for i in 0..key_fields {
        let field = tuple.field(i);
        pos = varint::encode(field.len() as u64, &mut out, pos);
        out[pos..pos + field.len()].copy_from_slice(field);
        pos += field.len();
    }
    out
}

/// Codec selected by configuration tag. Static dispatch over the writers.
#[derive(Debug, Clone)]
pub enum TupleCodec {
    TypeAware(TypeAwareTupleWriter),
    PointMbr(PointMbrTupleWriter),
}

type CodecConstructor = fn(Arc<[TypeTrait]>, usize) -> Result<TupleCodec>;

fn type_aware_codec(traits: Arc<[TypeTrait]>, _key_field_count: usize) -> Result<TupleCodec> {
    Ok(TupleCodec::TypeAware(TypeAwareTupleWriter::new(traits)))
}

fn point_mbr_codec(traits: Arc<[TypeTrait]>, key_field_count: usize) -> Result<TupleCodec> {
    let value_field_count = traits
        .len()
        .checked_sub(key_field_count)
        .ok_or_else(|| Error::Config {
            key: "key-field-count".into(),
            reason: format!("{key_field_count} key fields exceed {} type traits", traits.len()),
        })?;
    let writer = PointMbrTupleWriter::new(traits, key_field_count, value_field_count)?;
    Ok(TupleCodec::PointMbr(writer))
}

/// Registered codec tags.
const CODECS: &[(&str, CodecConstructor)] = &[
    ("type-aware", type_aware_codec),
    ("point-mbr", point_mbr_codec),
];

impl TupleCodec {
    /// Build the codec registered under `tag`.
    pub fn from_tag(
        tag: &str,
        type_traits: impl Into<Arc<[TypeTrait]>>,
        key_field_count: usize,
    ) -> Result<Self> {
        let (_, constructor) = CODECS
            .iter()
            .find(|(name, _)| *name == tag)
            .ok_or_else(|| Error::Config {
                key: "tuple-codec".into(),
                reason: format!("unknown codec `{tag}`"),
            })?;
        constructor(type_traits.into(), key_field_count)
    }

    /// Logical key field count the codec is built around, if it has one.
    pub fn key_field_count(&self) -> Option<usize> {
        match self {
            TupleCodec::TypeAware(_) => None,
            TupleCodec::PointMbr(w) => Some(w.key_field_count()),
        }
    }
}

/// Reader matching a [`TupleCodec`] variant.
#[derive(Debug)]
pub enum TupleCodecReference<'a> {
    TypeAware(TypeAwareTupleReference<'a>),
    PointMbr(PointMbrTupleReference<'a>),
}

impl TupleReference for TupleCodecReference<'_> {
    fn field_count(&self) -> usize {
        match self {
            TupleCodecReference::TypeAware(r) => r.field_count(),
            TupleCodecReference::PointMbr(r) => r.field_count(),
        }
    }

    fn field(&self, index: usize) -> &[u8] {
        match self {
            TupleCodecReference::TypeAware(r) => r.field(index),
            TupleCodecReference::PointMbr(r) => r.field(index),
        }
    }
}

impl<'a> StoredTupleReference<'a> for TupleCodecReference<'a> {
    fn reset(&mut self, buf: &'a [u8], offset: usize) -> Result<()> {
        match self {
            TupleCodecReference::TypeAware(r) => r.reset(buf, offset),
            TupleCodecReference::PointMbr(r) => r.reset(buf, offset),
        }
    }

    fn tuple_size(&self) -> usize {
        match self {
            TupleCodecReference::TypeAware(r) => r.tuple_size(),
            TupleCodecReference::PointMbr(r) => r.tuple_size(),
        }
    }
}

impl TupleWriter for TupleCodec {
    type Reference<'a> = TupleCodecReference<'a>;

    fn bytes_required<T: TupleReference + ?Sized>(&self, tuple: &T) -> usize {
        match self {
            TupleCodec::TypeAware(w) => w.bytes_required(tuple),
            TupleCodec::PointMbr(w) => w.bytes_required(tuple),
        }
    }

    fn bytes_required_fields<T: TupleReference + ?Sized>(
        &self,
        tuple: &T,
        start: usize,
        count: usize,
    ) -> Result<usize> {
        match self {
            TupleCodec::TypeAware(w) => w.bytes_required_fields(tuple, start, count),
            TupleCodec::PointMbr(w) => w.bytes_required_fields(tuple, start, count),
        }
    }

    fn write_tuple<T: TupleReference + ?Sized>(
        &self,
        tuple: &T,
        buf: &mut [u8],
        offset: usize,
    ) -> Result<usize> {
        match self {
            TupleCodec::TypeAware(w) => w.write_tuple(tuple, buf, offset),
            TupleCodec::PointMbr(w) => w.write_tuple(tuple, buf, offset),
        }
    }

    fn write_tuple_fields<T: TupleReference + ?Sized>(
        &self,
        tuple: &T,
        start: usize,
        count: usize,
        buf: &mut [u8],
        offset: usize,
    ) -> Result<usize> {
        match self {
            TupleCodec::TypeAware(w) => w.write_tuple_fields(tuple, start, count, buf, offset),
            TupleCodec::PointMbr(w) => w.write_tuple_fields(tuple, start, count, buf, offset),
        }
    }

    fn create_tuple_reference<'a>(&self) -> Self::Reference<'a> {
        match self {
            TupleCodec::TypeAware(w) => TupleCodecReference::TypeAware(w.create_tuple_reference()),
            TupleCodec::PointMbr(w) => TupleCodecReference::PointMbr(w.create_tuple_reference()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_flags_round_up() {
        assert_eq!(null_flags_bytes(0), 0);
        assert_eq!(null_flags_bytes(1), 1);
        assert_eq!(null_flags_bytes(8), 1);
        assert_eq!(null_flags_bytes(9), 2);
    }

    #[test]
    fn key_bytes_distinguish_field_splits() {
        let a = OwnedTuple::new(vec![b"ab".to_vec(), b"c".to_vec()]);
        let b = OwnedTuple::new(vec![b"a".to_vec(), b"bc".to_vec()]);
        assert_ne!(key_bytes(&a, 2), key_bytes(&b, 2));
        assert_eq!(key_bytes(&a, 1), vec![2, b'a', b'b']);
    }

    #[test]
    fn unknown_codec_tag_is_config_error() {
        let err = TupleCodec::from_tag("hilbert", vec![TypeTrait::INT32], 1).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }
}
