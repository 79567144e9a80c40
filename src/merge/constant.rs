use std::sync::Arc;

use tracing::debug;

use crate::component::DiskComponent;
use crate::error::{Error, Result};
use crate::merge::registry::parse_property;
use crate::merge::{IndexAccessor, MergeMetrics, MergePolicy};
use crate::types::{ComponentState, Properties};

/// Property: component count at which everything is merged.
pub const NUM_COMPONENTS: &str = "num-components";

/// Merges every component once a fixed number of them exist.
#[derive(Debug)]
pub struct ConstantMergePolicy {
    num_components: usize,
    metrics: Arc<MergeMetrics>,
}

impl ConstantMergePolicy {
    pub fn new(num_components: usize, metrics: Arc<MergeMetrics>) -> Result<Self> {
        if num_components == 0 {
            return Err(Error::Config {
                key: NUM_COMPONENTS.into(),
                reason: "must be at least 1".into(),
            });
        }
        Ok(ConstantMergePolicy {
            num_components,
            metrics,
        })
    }

    pub fn from_properties(properties: &Properties, metrics: Arc<MergeMetrics>) -> Result<Self> {
        Self::new(parse_property(properties, NUM_COMPONENTS)?, metrics)
    }
}

impl MergePolicy for ConstantMergePolicy {
    fn disk_component_added(
        &self,
        index: &dyn IndexAccessor,
        full_merge_requested: bool,
        _new_component: &DiskComponent,
        is_merge_op: bool,
    ) -> Result<()> {
        if is_merge_op {
            index.operation_tracker().notify_all();
        }

        let snapshot = index.immutable_components();
        if snapshot
            .newest_first()
            .iter()
            .any(|c| c.state() != ComponentState::ReadableUnwritable)
        {
            self.metrics.record_scheduling_deferred();
            return Ok(());
        }

        if full_merge_requested {
            if index.schedule_full_merge(index.io_operation_callback())? {
                self.metrics.record_full_merge_scheduled();
            }
        } else if snapshot.len() >= self.num_components {
            debug!(components = snapshot.len(), "component limit reached, merging all");
            if index.schedule_merge(snapshot.into_vec(), index.io_operation_callback())? {
                self.metrics.record_merge_scheduled();
            }
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "constant"
    }
}
