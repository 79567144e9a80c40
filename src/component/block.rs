use crate::error::{Error, Result};
use crate::tuple::{TupleCodec, TupleReference, TupleWriter};

const U32_SIZE: usize = 4;
/// Tuple count + CRC trailer.
const TRAILER_SIZE: usize = 2 * U32_SIZE;

/// Packs encoded tuples into one data block.
///
/// Block format:
/// ```text
/// ┌──────────────────────┬────────────────────────┬─────────────┬─────────────┐
/// │ tuple 0 │ tuple 1 ...│ offset[0] ... (u32 LE) │ count (u32) │ crc32 (u32) │
/// └──────────────────────┴────────────────────────┴─────────────┴─────────────┘
/// ```
///
/// Tuples are encoded with the component's [`TupleCodec`]. The CRC covers
/// every byte before it.
pub struct TupleBlockBuilder {
    codec: TupleCodec,
    data: Vec<u8>,
    offsets: Vec<u32>,
    block_size: usize,
}

impl TupleBlockBuilder {
    pub fn new(codec: TupleCodec, block_size: usize) -> Self {
        TupleBlockBuilder {
            codec,
            data: Vec::with_capacity(block_size),
            offsets: Vec::new(),
            block_size,
        }
    }

    /// Encode a tuple into the block.
    /// Returns false if the block is full (tuple doesn't fit).
    /// First tuple is always accepted even if it exceeds block_size.
    pub fn add<T: TupleReference + ?Sized>(&mut self, tuple: &T) -> Result<bool> {
        let tuple_size = self.codec.bytes_required(tuple);
        if !self.offsets.is_empty()
            && self.estimated_size() + tuple_size + U32_SIZE > self.block_size
        {
            return Ok(false);
        }

        let offset = u32::try_from(self.data.len())
            .map_err(|_| Error::Corruption("data block exceeds 4 GiB".into()))?;
        let start = self.data.len();
        self.data.resize(start + tuple_size, 0);
        let written = self.codec.write_tuple(tuple, &mut self.data, start)?;
        self.data.truncate(start + written);
        self.offsets.push(offset);
        Ok(true)
    }

    /// Finalize the block: append offset array, tuple count and CRC.
    pub fn build(self) -> Vec<u8> {
        let mut block = self.data;
        for offset in &self.offsets {
            block.extend_from_slice(&offset.to_le_bytes());
        }
        block.extend_from_slice(&(self.offsets.len() as u32).to_le_bytes());
        let crc = crc32fast::hash(&block);
        block.extend_from_slice(&crc.to_le_bytes());
        block
    }

    /// Current estimated size of the block (data + offsets + trailer).
    pub fn estimated_size(&self) -> usize {
        self.data.len() + self.offsets.len() * U32_SIZE + TRAILER_SIZE
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }
}

/// A decoded, checksum-verified data block.
pub struct TupleBlock {
    data: Vec<u8>,
    offsets: Vec<usize>,
}

impl TupleBlock {
    pub fn decode(mut raw: Vec<u8>) -> Result<Self> {
        if raw.len() < TRAILER_SIZE {
            return Err(Error::Corruption("data block too short".into()));
        }
        let crc_pos = raw.len() - U32_SIZE;
        let stored_crc = read_u32(&raw, crc_pos);
        let computed_crc = crc32fast::hash(&raw[..crc_pos]);
        if stored_crc != computed_crc {
            return Err(Error::Corruption(format!(
                "data block CRC mismatch: stored {stored_crc:#x}, computed {computed_crc:#x}"
            )));
        }

        let count = read_u32(&raw, crc_pos - U32_SIZE) as usize;
        let offsets_start = (crc_pos - U32_SIZE)
            .checked_sub(count * U32_SIZE)
            .ok_or_else(|| Error::Corruption(format!("block claims {count} tuples")))?;

        let offsets = (0..count)
            .map(|i| read_u32(&raw, offsets_start + i * U32_SIZE) as usize)
            .collect::<Vec<_>>();
        if offsets.iter().any(|&o| o > offsets_start) {
            return Err(Error::Corruption("tuple offset past block data".into()));
        }

        raw.truncate(offsets_start);
        Ok(TupleBlock { data: raw, offsets })
    }

    /// Encoded tuple bytes; tuple `i` starts at `tuple_offset(i)`.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn tuple_offset(&self, index: usize) -> usize {
        self.offsets[index]
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }
}

fn read_u32(buf: &[u8], pos: usize) -> u32 {
    u32::from_le_bytes([buf[pos], buf[pos + 1], buf[pos + 2], buf[pos + 3]])
}
