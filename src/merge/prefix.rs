use std::ops::Range;
use std::sync::Arc;

use tracing::debug;

use crate::component::{ComponentSnapshot, DiskComponent};
use crate::error::{Error, Result};
use crate::merge::registry::parse_property;
use crate::merge::{IndexAccessor, MergeMetrics, MergePolicy};
use crate::types::{ComponentState, Properties};

/// Property: components above this many bytes are never merged opportunistically.
pub const MAX_MERGABLE_COMPONENT_SIZE: &str = "max-mergable-component-size";

/// Property: how many small mergeable components producers tolerate before blocking.
pub const MAX_TOLERANCE_COMPONENT_COUNT: &str = "max-tolerance-component-count";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrefixMergePolicyConfig {
    pub max_mergable_component_size: u64,
    pub max_tolerance_component_count: usize,
}

impl PrefixMergePolicyConfig {
    /// Parse both properties. Missing or malformed values are a config error.
    pub fn from_properties(properties: &Properties) -> Result<Self> {
        let config = PrefixMergePolicyConfig {
            max_mergable_component_size: parse_property(properties, MAX_MERGABLE_COMPONENT_SIZE)?,
            max_tolerance_component_count: parse_property(
                properties,
                MAX_TOLERANCE_COMPONENT_COUNT,
            )?,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.max_tolerance_component_count == 0 {
            return Err(Error::Config {
                key: MAX_TOLERANCE_COMPONENT_COUNT.into(),
                reason: "must be at least 1".into(),
            });
        }
        Ok(())
    }
}

/// Merges the oldest run of small components and throttles producers when
/// too many small components pile up at the newest end of the list.
///
/// Components larger than `max_mergable_component_size` act as walls: a
/// run never spans one, and the producer count stops at one.
#[derive(Debug)]
pub struct PrefixMergePolicy {
    config: PrefixMergePolicyConfig,
    metrics: Arc<MergeMetrics>,
}

impl PrefixMergePolicy {
    pub fn new(config: PrefixMergePolicyConfig, metrics: Arc<MergeMetrics>) -> Result<Self> {
        config.validate()?;
        Ok(PrefixMergePolicy { config, metrics })
    }

    pub fn from_properties(properties: &Properties, metrics: Arc<MergeMetrics>) -> Result<Self> {
        Self::new(PrefixMergePolicyConfig::from_properties(properties)?, metrics)
    }

    pub fn config(&self) -> &PrefixMergePolicyConfig {
        &self.config
    }

    /// Length of the newest-first prefix of small RU components, counted
    /// until it exceeds the tolerance.
    fn mergeable_prefix_len(&self, snapshot: &ComponentSnapshot) -> usize {
        let mut count = 0;
        for component in snapshot.newest_first() {
            if component.size() > self.config.max_mergable_component_size {
                break;
            }
            if component.state() != ComponentState::ReadableUnwritable {
                break;
            }
            count += 1;
            if count > self.config.max_tolerance_component_count {
                break;
            }
        }
        count
    }

    /// Block until the newest small components fall within tolerance.
    /// Returns whether the caller had to wait.
    fn apply_backpressure(&self, index: &dyn IndexAccessor) -> bool {
        let tracker = index.operation_tracker();
        let mut was_blocked = false;
        loop {
            let observed = tracker.generation();
            let snapshot = index.immutable_components();
            let count = self.mergeable_prefix_len(&snapshot);
            if count <= self.config.max_tolerance_component_count {
                return was_blocked;
            }
            if !was_blocked {
                self.metrics.record_producer_block();
            }
            was_blocked = true;
            debug!(
                mergeable = count,
                tolerance = self.config.max_tolerance_component_count,
                "too many small components, waiting for a merge"
            );
            tracker.wait_for_notification(observed);
        }
    }

    /// Pick the run to merge from component sizes listed oldest first.
    ///
    /// The run grows from the oldest end and restarts after every oversized
    /// component. It fires once its total exceeds the size limit, or when
    /// it reaches the newest component holding at least the tolerated count.
    pub fn select_run(&self, sizes_oldest_first: &[u64]) -> Option<Range<usize>> {
        let max_size = self.config.max_mergable_component_size;
        let mut run_start = 0;
        let mut total: u64 = 0;
        for (i, &size) in sizes_oldest_first.iter().enumerate() {
            if size > max_size {
                run_start = i + 1;
                total = 0;
                continue;
            }
            total = total.saturating_add(size);
            let is_newest = i + 1 == sizes_oldest_first.len();
            let run_len = i + 1 - run_start;
            if total > max_size
                || (is_newest && run_len >= self.config.max_tolerance_component_count)
            {
                return Some(run_start..i + 1);
            }
        }
        None
    }

    fn schedule(&self, index: &dyn IndexAccessor, full_merge_requested: bool) -> Result<()> {
        let oldest_first = index.immutable_components().oldest_first();

        if let Some(busy) = oldest_first
            .iter()
            .find(|c| c.state() != ComponentState::ReadableUnwritable)
        {
            self.metrics.record_scheduling_deferred();
            debug!(component = %busy.id(), state = ?busy.state(), "merge in flight, deferring");
            return Ok(());
        }

        if full_merge_requested {
            if index.schedule_full_merge(index.io_operation_callback())? {
                self.metrics.record_full_merge_scheduled();
                debug!(components = oldest_first.len(), "scheduled full merge");
            }
            return Ok(());
        }

        let sizes: Vec<u64> = oldest_first.iter().map(|c| c.size()).collect();
        if let Some(run) = self.select_run(&sizes) {
            let mut members = oldest_first[run].to_vec();
            members.reverse();
            debug!(
                components = members.len(),
                bytes = members.iter().map(|c| c.size()).sum::<u64>(),
                "scheduling merge"
            );
            if index.schedule_merge(members, index.io_operation_callback())? {
                self.metrics.record_merge_scheduled();
            }
        }
        Ok(())
    }
}

impl MergePolicy for PrefixMergePolicy {
    fn disk_component_added(
        &self,
        index: &dyn IndexAccessor,
        full_merge_requested: bool,
        new_component: &DiskComponent,
        is_merge_op: bool,
    ) -> Result<()> {
        if is_merge_op {
            index.operation_tracker().notify_all();
        } else if new_component.size() <= self.config.max_mergable_component_size
            && self.apply_backpressure(index)
        {
            // Another producer's invocation schedules for the list we waited on.
            return Ok(());
        }
        self.schedule(index, full_merge_requested)
    }

    fn name(&self) -> &'static str {
        "prefix"
    }
}
