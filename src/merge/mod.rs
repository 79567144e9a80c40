//! Merge policies: which immutable components to merge, and when to make
//! producers wait for merges to catch up.
//!
//! A policy is invoked once per disk component addition, either a fresh
//! flush or a merge result. It sees the index only through
//! [`IndexAccessor`], reads sizes and states from a snapshot, and may
//! schedule at most one merge job per invocation.

pub mod constant;
pub mod metrics;
pub mod no_merge;
pub mod prefix;
pub mod registry;
pub mod tracker;

use std::sync::Arc;

use crate::component::{ComponentSnapshot, DiskComponent};
use crate::error::{Error, Result};

pub use constant::ConstantMergePolicy;
pub use metrics::{MergeMetrics, MergeMetricsSnapshot};
pub use no_merge::NoMergePolicy;
pub use prefix::{PrefixMergePolicy, PrefixMergePolicyConfig};
pub use registry::create_merge_policy;
pub use tracker::OperationTracker;

/// Kind of background I/O operation a callback hears about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoOperationKind {
    Flush,
    Merge,
}

/// Completion handle passed through scheduling. Policies never inspect it.
pub trait IoOperationCallback: Send + Sync {
    /// The operation produced `component`.
    fn after_operation(&self, _kind: IoOperationKind, _component: &DiskComponent) {}

    /// The operation failed; its inputs are mergeable again.
    fn after_failure(&self, _kind: IoOperationKind, _error: &Error) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpIoOperationCallback;

impl IoOperationCallback for NoOpIoOperationCallback {}

/// What a merge policy may see of and ask from its index.
pub trait IndexAccessor: Send + Sync {
    /// Snapshot of the immutable components, newest first.
    fn immutable_components(&self) -> ComponentSnapshot;

    /// Rendezvous used to block producers until a merge completes.
    fn operation_tracker(&self) -> &OperationTracker;

    fn io_operation_callback(&self) -> Arc<dyn IoOperationCallback>;

    /// Submit a merge of `components` (newest first). Fire-and-forget.
    ///
    /// Returns `false` without submitting when another invocation claimed
    /// one of the components first.
    fn schedule_merge(
        &self,
        components: Vec<Arc<DiskComponent>>,
        callback: Arc<dyn IoOperationCallback>,
    ) -> Result<bool>;

    /// Submit a merge of every immutable component. Same return as
    /// [`schedule_merge`](Self::schedule_merge).
    fn schedule_full_merge(&self, callback: Arc<dyn IoOperationCallback>) -> Result<bool>;
}

pub trait MergePolicy: Send + Sync {
    /// React to `new_component` joining the immutable list.
    ///
    /// `is_merge_op` is true when the component is a merge result.
    /// May block the caller (backpressure) and may schedule one merge.
    fn disk_component_added(
        &self,
        index: &dyn IndexAccessor,
        full_merge_requested: bool,
        new_component: &DiskComponent,
        is_merge_op: bool,
    ) -> Result<()>;

    /// Registry tag of the policy.
    fn name(&self) -> &'static str;
}
