//! Immutable on-disk LSM components.
//!
//! A component is produced by a flush (memory component → disk) or by a
//! merge (several disk components → one). Once written it never changes;
//! only its [`ComponentState`] moves forward.
//!
//! File layout:
//! ```text
//! ┌──────────────┬──────────────┬─────┬──────────────┬─────────────┬────────┐
//! │ data block 0 │ data block 1 │ ... │ bloom filter │ block index │ footer │
//! └──────────────┴──────────────┴─────┴──────────────┴─────────────┴────────┘
//! ```

pub mod block;
pub mod builder;
pub mod footer;
pub mod list;
pub mod reader;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};

use tracing::warn;

use crate::bloom::BloomFilter;
use crate::error::{Error, Result};
use crate::types::{ComponentId, ComponentState, IdRange};

pub use builder::ComponentBuilder;
pub use list::{ComponentSnapshot, ImmutableComponentList};
pub use reader::ComponentReader;

/// Extension of finished component files.
pub const COMPONENT_FILE_EXTENSION: &str = "cmp";

/// File name of component `id` covering `id_range`, e.g. `c40-33_000007.cmp`.
///
/// The id keeps names unique when a merge rewrites a single component.
pub fn component_file_name(id: ComponentId, id_range: IdRange) -> String {
    format!("{id_range}_{:06}.{COMPONENT_FILE_EXTENSION}", id.0)
}

/// Component id encoded in a file name produced by [`component_file_name`].
pub fn parse_component_file_name(name: &str) -> Option<ComponentId> {
    let stem = name.strip_suffix(COMPONENT_FILE_EXTENSION)?.strip_suffix('.')?;
    let (_, id) = stem.rsplit_once('_')?;
    id.parse().ok().map(ComponentId)
}

/// Settings shared by every component file an index writes.
#[derive(Debug, Clone)]
pub struct ComponentConfig {
    /// Target data block size.
    pub block_size: usize,
    /// False-positive rate of the per-component bloom filter.
    pub bloom_false_positive_rate: f64,
    /// Leading fields forming the key (dedup identity and bloom input).
    pub key_field_count: usize,
}

/// Handle on the tuple data of a component.
#[derive(Debug)]
pub struct ComponentData {
    pub path: PathBuf,
    pub bloom: BloomFilter,
    pub tuple_count: u64,
}

/// One immutable component, owned by its index.
///
/// Merge policies hold `Arc` handles taken from a snapshot and read
/// [`size`](Self::size) and [`state`](Self::state); the index is the only
/// writer of the state.
#[derive(Debug)]
pub struct DiskComponent {
    id: ComponentId,
    id_range: IdRange,
    size: u64,
    state: AtomicU8,
    data: Option<ComponentData>,
}

impl DiskComponent {
    /// A flushed component without a backing file. Used where only size and
    /// state matter, e.g. when driving a merge policy directly.
    pub fn new(id: ComponentId, id_range: IdRange, size: u64) -> Self {
        DiskComponent {
            id,
            id_range,
            size,
            state: AtomicU8::new(ComponentState::ReadableUnwritable as u8),
            data: None,
        }
    }

    pub fn with_data(id: ComponentId, id_range: IdRange, size: u64, data: ComponentData) -> Self {
        DiskComponent {
            id,
            id_range,
            size,
            state: AtomicU8::new(ComponentState::ReadableUnwritable as u8),
            data: Some(data),
        }
    }

    pub fn id(&self) -> ComponentId {
        self.id
    }

    pub fn id_range(&self) -> IdRange {
        self.id_range
    }

    /// Size on disk in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn state(&self) -> ComponentState {
        ComponentState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn data(&self) -> Option<&ComponentData> {
        self.data.as_ref()
    }

    pub fn path(&self) -> Option<&Path> {
        self.data.as_ref().map(|d| d.path.as_path())
    }

    /// Bloom check on key bytes. Components without data admit everything.
    pub fn may_contain(&self, key: &[u8]) -> bool {
        self.data.as_ref().is_none_or(|d| d.bloom.may_contain(key))
    }

    /// RU → RUM. The component now belongs to a scheduled merge.
    pub fn begin_merge(&self) -> Result<()> {
        self.transition(
            ComponentState::ReadableUnwritable,
            ComponentState::ReadableUnwritableMerging,
        )
    }

    /// RUM → INACTIVE. The merge result replaced this component.
    pub fn complete_merge(&self) -> Result<()> {
        self.transition(
            ComponentState::ReadableUnwritableMerging,
            ComponentState::Inactive,
        )
    }

    /// RUM → RU after a failed merge job, so the component can be merged again.
    pub fn abort_merge(&self) -> Result<()> {
        self.transition(
            ComponentState::ReadableUnwritableMerging,
            ComponentState::ReadableUnwritable,
        )
    }

    fn transition(&self, from: ComponentState, to: ComponentState) -> Result<()> {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|actual| Error::StateTransition {
                from: ComponentState::from_u8(actual),
                to,
            })
    }
}

impl Drop for DiskComponent {
    /// Merged-away components remove their file once no reader holds them.
    fn drop(&mut self) {
        if self.state() != ComponentState::Inactive {
            return;
        }
        if let Some(data) = &self.data {
            if let Err(e) = fs::remove_file(&data.path) {
                warn!(path = ?data.path, error = %e, "failed to delete merged component file");
            }
        }
    }
}
