use std::cell::RefCell;
use std::cmp::Ordering;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::bloom::BloomFilter;
use crate::component::block::TupleBlock;
use crate::component::footer::{Footer, IndexEntry};
use crate::component::{ComponentData, DiskComponent};
use crate::error::{Error, Result};
use crate::tuple::{key_bytes, OwnedTuple, StoredTupleReference, TupleCodec, TupleWriter};
use crate::types::ComponentId;

/// An opened component file. Serves merge input, scans and point lookups.
///
/// On open:
/// 1. Read footer (last 64 bytes) → find index and bloom block positions
/// 2. Read and parse the block index
/// 3. Data blocks are read on demand and CRC-checked
pub struct ComponentReader {
    path: PathBuf,
    /// Wrapped in RefCell to allow seeking from `&self`.
    file: RefCell<File>,
    file_size: u64,
    index: Vec<IndexEntry>,
    footer: Footer,
    codec: TupleCodec,
    key_field_count: usize,
}

impl ComponentReader {
    pub fn open(path: &Path, codec: TupleCodec, key_field_count: usize) -> Result<Self> {
        let mut file = File::open(path)?;
        let file_size = file.metadata()?.len();
        if file_size < Footer::SIZE as u64 {
            return Err(Error::Corruption(format!(
                "{} too short to contain a footer",
                path.display()
            )));
        }

        let footer_offset = file_size - Footer::SIZE as u64;
        let footer_buf = read_at(&mut file, footer_offset, Footer::SIZE as u64)?;
        let footer = Footer::decode(&footer_buf)?;

        let index_end = footer.index_block_offset.checked_add(footer.index_block_size);
        let bloom_end = footer.bloom_block_offset.checked_add(footer.bloom_block_size);
        match (index_end, bloom_end) {
            (Some(index_end), Some(bloom_end))
                if index_end <= footer_offset && bloom_end <= footer.index_block_offset => {}
            _ => {
                return Err(Error::Corruption(format!(
                    "{}: footer points outside the file",
                    path.display()
                )));
            }
        }

        let index_buf = read_at(&mut file, footer.index_block_offset, footer.index_block_size)?;
        let mut index = Vec::new();
        let mut pos = 0;
        while pos < index_buf.len() {
            let (entry, consumed) = IndexEntry::decode(&index_buf[pos..])?;
            index.push(entry);
            pos += consumed;
        }

        let indexed_tuples: u64 = index.iter().map(|e| u64::from(e.tuple_count)).sum();
        if indexed_tuples != footer.tuple_count {
            return Err(Error::Corruption(format!(
                "{}: footer counts {} tuples, block index {indexed_tuples}",
                path.display(),
                footer.tuple_count
            )));
        }

        Ok(ComponentReader {
            path: path.to_path_buf(),
            file: RefCell::new(file),
            file_size,
            index,
            footer,
            codec,
            key_field_count,
        })
    }

    pub fn footer(&self) -> &Footer {
        &self.footer
    }

    pub fn tuple_count(&self) -> u64 {
        self.footer.tuple_count
    }

    pub fn block_count(&self) -> usize {
        self.index.len()
    }

    pub fn load_bloom(&self) -> Result<BloomFilter> {
        let data = self.read_range(self.footer.bloom_block_offset, self.footer.bloom_block_size)?;
        BloomFilter::deserialize(&data)
    }

    /// Turn the file into a component handle, e.g. when reopening an index.
    pub fn into_component(self, id: ComponentId) -> Result<DiskComponent> {
        let bloom = self.load_bloom()?;
        Ok(DiskComponent::with_data(
            id,
            self.footer.id_range,
            self.file_size,
            ComponentData {
                path: self.path,
                bloom,
                tuple_count: self.footer.tuple_count,
            },
        ))
    }

    fn read_range(&self, offset: u64, size: u64) -> Result<Vec<u8>> {
        let mut file = self.file.borrow_mut();
        read_at(&mut file, offset, size)
    }

    fn read_block(&self, entry: &IndexEntry) -> Result<TupleBlock> {
        let block = TupleBlock::decode(self.read_range(entry.offset, entry.size)?)?;
        if block.len() != entry.tuple_count as usize {
            return Err(Error::Corruption(format!(
                "block at {} holds {} tuples, index says {}",
                entry.offset,
                block.len(),
                entry.tuple_count
            )));
        }
        Ok(block)
    }

    /// Decode every tuple, in key order.
    pub fn read_all(&self) -> Result<Vec<OwnedTuple>> {
        // Every tuple costs at least its 4-byte offset slot.
        let capacity = self.footer.tuple_count.min(self.file_size / 4);
        let mut tuples = Vec::with_capacity(capacity as usize);
        for entry in &self.index {
            let block = self.read_block(entry)?;
            let mut reference = self.codec.create_tuple_reference();
            for i in 0..block.len() {
                reference.reset(block.data(), block.tuple_offset(i))?;
                tuples.push(OwnedTuple::from_reference(&reference));
            }
        }
        Ok(tuples)
    }

    /// Find the tuple whose key bytes equal `key`.
    ///
    /// Algorithm:
    /// 1. Binary search the index for the first block whose last key >= key
    /// 2. Read that block from disk
    /// 3. Binary search within the block
    pub fn find(&self, key: &[u8]) -> Result<Option<OwnedTuple>> {
        let block_idx = match self
            .index
            .binary_search_by(|entry| entry.last_key.as_slice().cmp(key))
        {
            Ok(idx) => idx,
            // Past every block's last key
            Err(idx) if idx >= self.index.len() => return Ok(None),
            Err(idx) => idx,
        };

        let block = self.read_block(&self.index[block_idx])?;
        let mut reference = self.codec.create_tuple_reference();
        let (mut low, mut high) = (0, block.len());
        while low < high {
            let mid = low + (high - low) / 2;
            reference.reset(block.data(), block.tuple_offset(mid))?;
            match key_bytes(&reference, self.key_field_count).as_slice().cmp(key) {
                Ordering::Less => low = mid + 1,
                Ordering::Greater => high = mid,
                Ordering::Equal => return Ok(Some(OwnedTuple::from_reference(&reference))),
            }
        }
        Ok(None)
    }
}

fn read_at(file: &mut File, offset: u64, size: u64) -> Result<Vec<u8>> {
    file.seek(SeekFrom::Start(offset))?;
    let mut buf = vec![0u8; size as usize];
    file.read_exact(&mut buf)?;
    Ok(buf)
}
