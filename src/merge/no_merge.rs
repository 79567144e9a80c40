use crate::component::DiskComponent;
use crate::error::Result;
use crate::merge::{IndexAccessor, MergePolicy};

/// Never merges. Components accumulate until a caller compacts by hand.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoMergePolicy;

impl MergePolicy for NoMergePolicy {
    fn disk_component_added(
        &self,
        index: &dyn IndexAccessor,
        _full_merge_requested: bool,
        _new_component: &DiskComponent,
        is_merge_op: bool,
    ) -> Result<()> {
        if is_merge_op {
            index.operation_tracker().notify_all();
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "no-merge"
    }
}
