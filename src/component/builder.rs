use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::bloom::builder::BloomFilterBuilder;
use crate::component::block::TupleBlockBuilder;
use crate::component::footer::{Footer, IndexEntry};
use crate::component::{ComponentConfig, ComponentData, DiskComponent};
use crate::error::Result;
use crate::tuple::{key_bytes, TupleCodec, TupleReference};
use crate::types::{ComponentId, IdRange};

/// Builds a component file from tuples in key order.
///
/// Used during:
/// - Flush (memory component → new disk component)
/// - Merge (deduplicated merge input → merged component)
///
/// Bytes go to `<path>.tmp`; `finish()` fsyncs and renames, so a
/// component file either exists complete or not at all.
pub struct ComponentBuilder {
    /// Current block being filled with tuples.
    block_builder: TupleBlockBuilder,
    /// Index entries: one per flushed data block.
    index_entries: Vec<IndexEntry>,
    /// Tracks current write position in the file.
    data_offset: u64,
    writer: BufWriter<File>,
    tmp_path: PathBuf,
    path: PathBuf,
    codec: TupleCodec,
    config: ComponentConfig,
    bloom: BloomFilterBuilder,
    id: ComponentId,
    id_range: IdRange,
    tuple_count: u64,
    last_key: Option<Vec<u8>>,
}

impl ComponentBuilder {
    pub fn new(
        path: &Path,
        id: ComponentId,
        id_range: IdRange,
        codec: TupleCodec,
        config: ComponentConfig,
    ) -> Result<Self> {
        let mut tmp_name = path.as_os_str().to_os_string();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);
        let writer = BufWriter::new(File::create(&tmp_path)?);

        Ok(ComponentBuilder {
            block_builder: TupleBlockBuilder::new(codec.clone(), config.block_size),
            index_entries: Vec::new(),
            data_offset: 0,
            writer,
            tmp_path,
            path: path.to_path_buf(),
            bloom: BloomFilterBuilder::new(config.bloom_false_positive_rate),
            codec,
            config,
            id,
            id_range,
            tuple_count: 0,
            last_key: None,
        })
    }

    /// Add a tuple. MUST be called in ascending key-bytes order.
    pub fn add<T: TupleReference + ?Sized>(&mut self, tuple: &T) -> Result<()> {
        let key = key_bytes(tuple, self.config.key_field_count);
        debug_assert!(
            self.last_key.as_ref().is_none_or(|last| *last <= key),
            "tuples must be added in key order"
        );

        if !self.block_builder.add(tuple)? {
            self.flush_block()?;
            // A fresh block always accepts its first tuple.
            self.block_builder.add(tuple)?;
        }

        self.bloom.add_key(&key);
        self.last_key = Some(key);
        self.tuple_count += 1;
        Ok(())
    }

    /// Tuples added so far.
    pub fn tuple_count(&self) -> u64 {
        self.tuple_count
    }

    /// Write the current block to disk and record an index entry.
    fn flush_block(&mut self) -> Result<()> {
        if self.block_builder.is_empty() {
            return Ok(());
        }

        let old_builder = std::mem::replace(
            &mut self.block_builder,
            TupleBlockBuilder::new(self.codec.clone(), self.config.block_size),
        );
        let tuple_count = old_builder.len() as u32;
        let block_data = old_builder.build();
        let block_size = block_data.len() as u64;

        self.writer.write_all(&block_data)?;
        self.index_entries.push(IndexEntry {
            // Blocks are flushed before the next tuple is recorded.
            last_key: self.last_key.clone().unwrap_or_default(),
            offset: self.data_offset,
            size: block_size,
            tuple_count,
        });
        self.data_offset += block_size;
        Ok(())
    }

    /// Finalize: last block, bloom filter, index, footer, fsync, rename.
    pub fn finish(mut self) -> Result<DiskComponent> {
        self.flush_block()?;

        let bloom = std::mem::replace(
            &mut self.bloom,
            BloomFilterBuilder::new(self.config.bloom_false_positive_rate),
        )
        .build();
        let bloom_data = bloom.serialize();
        let bloom_block_offset = self.data_offset;
        self.writer.write_all(&bloom_data)?;
        self.data_offset += bloom_data.len() as u64;

        let index_block_offset = self.data_offset;
        let mut index_data = Vec::new();
        for entry in &self.index_entries {
            index_data.extend_from_slice(&entry.encode());
        }
        self.writer.write_all(&index_data)?;
        self.data_offset += index_data.len() as u64;

        let footer = Footer {
            index_block_offset,
            index_block_size: index_data.len() as u64,
            bloom_block_offset,
            bloom_block_size: bloom_data.len() as u64,
            tuple_count: self.tuple_count,
            id_range: self.id_range,
        };
        self.writer.write_all(&footer.encode())?;
        self.data_offset += Footer::SIZE as u64;

        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        fs::rename(&self.tmp_path, &self.path)?;

        Ok(DiskComponent::with_data(
            self.id,
            self.id_range,
            self.data_offset,
            ComponentData {
                path: self.path,
                bloom,
                tuple_count: self.tuple_count,
            },
        ))
    }
}
