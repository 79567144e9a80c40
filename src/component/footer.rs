use crate::error::{Error, Result};
use crate::types::IdRange;

/// Magic number to identify component files.
pub const COMPONENT_MAGIC: u64 = 0x4C534D5F434D5000; // "LSM_CMP\0"

/// An entry in the component's block index.
/// Maps a block's last key to its location in the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    /// Key bytes of the last (largest) tuple in the block.
    pub last_key: Vec<u8>,
    /// Byte offset of the block in the file.
    pub offset: u64,
    /// Size of the block in bytes.
    pub size: u64,
    /// Tuples stored in the block.
    pub tuple_count: u32,
}

impl IndexEntry {
    /// Bytes of an entry besides the key itself.
    const FIXED_SIZE: usize = 4 + 8 + 8 + 4;

    /// Format: [key_len(4B)][last_key][offset(8B)][size(8B)][tuple_count(4B)]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::FIXED_SIZE + self.last_key.len());
        buf.extend_from_slice(&(self.last_key.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.last_key);
        buf.extend_from_slice(&self.offset.to_le_bytes());
        buf.extend_from_slice(&self.size.to_le_bytes());
        buf.extend_from_slice(&self.tuple_count.to_le_bytes());
        buf
    }

    /// Decode one entry, returning it with the bytes consumed.
    pub fn decode(data: &[u8]) -> Result<(Self, usize)> {
        if data.len() < 4 {
            return Err(Error::Corruption("index entry truncated".into()));
        }
        let key_len = read_u32(data, 0) as usize;
        let total = key_len
            .checked_add(Self::FIXED_SIZE)
            .filter(|&total| total <= data.len())
            .ok_or_else(|| Error::Corruption("index entry truncated".into()))?;

        let key_end = 4 + key_len;
        let entry = IndexEntry {
            last_key: data[4..key_end].to_vec(),
            offset: read_u64(data, key_end),
            size: read_u64(data, key_end + 8),
            tuple_count: read_u32(data, key_end + 16),
        };
        Ok((entry, total))
    }
}

/// The footer sits at the end of a component file.
///
/// ```text
/// ┌──────────────────────────────────────┐
/// │ Index block offset (8B)              │
/// │ Index block size (8B)                │
/// │ Bloom block offset (8B)              │
/// │ Bloom block size (8B)                │
/// │ Tuple count (8B)                     │
/// │ Min flush id (8B)                    │
/// │ Max flush id (8B)                    │
/// │ Magic number (8B)                    │
/// └──────────────────────────────────────┘
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Footer {
    pub index_block_offset: u64,
    pub index_block_size: u64,
    pub bloom_block_offset: u64,
    pub bloom_block_size: u64,
    pub tuple_count: u64,
    pub id_range: IdRange,
}

impl Footer {
    /// Size of the footer in bytes (fixed).
    pub const SIZE: usize = 8 * 8;

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.extend_from_slice(&self.index_block_offset.to_le_bytes());
        buf.extend_from_slice(&self.index_block_size.to_le_bytes());
        buf.extend_from_slice(&self.bloom_block_offset.to_le_bytes());
        buf.extend_from_slice(&self.bloom_block_size.to_le_bytes());
        buf.extend_from_slice(&self.tuple_count.to_le_bytes());
        buf.extend_from_slice(&self.id_range.min.to_le_bytes());
        buf.extend_from_slice(&self.id_range.max.to_le_bytes());
        buf.extend_from_slice(&COMPONENT_MAGIC.to_le_bytes());
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(Error::Corruption("footer too short".into()));
        }
        let magic = read_u64(data, 56);
        if magic != COMPONENT_MAGIC {
            return Err(Error::Corruption(format!(
                "bad magic: expected {COMPONENT_MAGIC:#x}, got {magic:#x}"
            )));
        }
        let id_range = IdRange {
            min: read_u64(data, 40),
            max: read_u64(data, 48),
        };
        if id_range.min > id_range.max {
            return Err(Error::Corruption(format!("inverted id range {id_range:?}")));
        }

        Ok(Footer {
            index_block_offset: read_u64(data, 0),
            index_block_size: read_u64(data, 8),
            bloom_block_offset: read_u64(data, 16),
            bloom_block_size: read_u64(data, 24),
            tuple_count: read_u64(data, 32),
            id_range,
        })
    }
}

fn read_u32(data: &[u8], pos: usize) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&data[pos..pos + 4]);
    u32::from_le_bytes(word)
}

fn read_u64(data: &[u8], pos: usize) -> u64 {
    let mut word = [0u8; 8];
    word.copy_from_slice(&data[pos..pos + 8]);
    u64::from_le_bytes(word)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_footer() -> Footer {
        Footer {
            index_block_offset: 4096,
            index_block_size: 40,
            bloom_block_offset: 4000,
            bloom_block_size: 96,
            tuple_count: 12,
            id_range: IdRange { min: 33, max: 40 },
        }
    }

    #[test]
    fn footer_roundtrip() {
        let encoded = sample_footer().encode();
        assert_eq!(encoded.len(), Footer::SIZE);
        assert_eq!(Footer::decode(&encoded).unwrap(), sample_footer());
    }

    #[test]
    fn footer_bad_magic() {
        let mut encoded = sample_footer().encode();
        encoded[60] = 0xFF;
        assert!(Footer::decode(&encoded).is_err());
    }

    #[test]
    fn footer_too_short() {
        assert!(Footer::decode(&[0u8; 10]).is_err());
    }

    #[test]
    fn index_entry_roundtrip() {
        let entry = IndexEntry {
            last_key: b"\x05apple".to_vec(),
            offset: 0,
            size: 4096,
            tuple_count: 17,
        };
        let mut encoded = entry.encode();
        encoded.extend_from_slice(b"next entry");
        let (decoded, consumed) = IndexEntry::decode(&encoded).unwrap();
        assert_eq!(decoded, entry);
        assert_eq!(consumed, encoded.len() - b"next entry".len());
    }

    #[test]
    fn index_entry_key_length_past_end() {
        let mut encoded = IndexEntry {
            last_key: b"k".to_vec(),
            offset: 0,
            size: 10,
            tuple_count: 1,
        }
        .encode();
        encoded[..4].copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(matches!(IndexEntry::decode(&encoded), Err(Error::Corruption(_))));
        assert!(IndexEntry::decode(&encoded[..3]).is_err());
    }
}
