//! # LSM Index
//!
//! The disk-component layer of an LSM index: how tuples are laid out in
//! component files, and when those components get merged.
//!
//! ## Core idea
//! Writes are buffered in memory and flushed as immutable, sorted disk
//! components. Left alone, components pile up and every lookup has to
//! visit all of them. A merge policy decides which runs of components to
//! merge into one, and blocks writers when merges fall behind, so the
//! number of small components stays bounded.
//!
//! ## Pieces
//! - [`tuple`]: binary tuple codecs. The type-aware codec stores a null
//!   bitmap, varint length slots for variable fields, then the field bytes.
//!   The point-MBR codec stores each coordinate of a degenerate box once.
//! - [`component`]: component files, their lifecycle states, and the
//!   newest-first list of immutable components.
//! - [`merge`]: merge policies, the backpressure rendezvous, and counters.
//! - [`index`]: an index tying it together with background merge workers.

pub mod bloom;
pub mod component;
pub mod error;
pub mod index;
pub mod merge;
pub mod scheduler;
pub mod tuple;
pub mod types;

// Public re-exports for the top-level API
pub use component::{ComponentSnapshot, DiskComponent};
pub use error::{Error, Result};
pub use index::{IndexOptions, LsmIndex};
pub use merge::{
    IndexAccessor, IoOperationCallback, MergeMetrics, MergePolicy, OperationTracker,
    PrefixMergePolicy,
};
pub use tuple::{OwnedTuple, TupleCodec, TupleReference, TupleWriter};
pub use types::{ComponentId, ComponentState, IdRange, Properties, TypeTrait};
