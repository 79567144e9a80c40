//! Counters for flush and merge activity.
//!
//! Constructed by whoever builds the index and handed to policies as an
//! `Arc`; there is no process-wide instance.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct MergeMetrics {
    flushes: AtomicU64,
    merges_scheduled: AtomicU64,
    full_merges_scheduled: AtomicU64,
    merges_completed: AtomicU64,
    merges_failed: AtomicU64,
    producer_blocks: AtomicU64,
    scheduling_deferred: AtomicU64,
}

/// Plain copy of [`MergeMetrics`] at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeMetricsSnapshot {
    pub flushes: u64,
    pub merges_scheduled: u64,
    pub full_merges_scheduled: u64,
    pub merges_completed: u64,
    pub merges_failed: u64,
    /// Times a producer had to wait for a merge.
    pub producer_blocks: u64,
    /// Invocations that skipped scheduling because a merge was in flight.
    pub scheduling_deferred: u64,
}

impl MergeMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_flush(&self) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_merge_scheduled(&self) {
        self.merges_scheduled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_full_merge_scheduled(&self) {
        self.full_merges_scheduled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_merge_completed(&self) {
        self.merges_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_merge_failed(&self) {
        self.merges_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_producer_block(&self) {
        self.producer_blocks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_scheduling_deferred(&self) {
        self.scheduling_deferred.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MergeMetricsSnapshot {
        MergeMetricsSnapshot {
            flushes: self.flushes.load(Ordering::Relaxed),
            merges_scheduled: self.merges_scheduled.load(Ordering::Relaxed),
            full_merges_scheduled: self.full_merges_scheduled.load(Ordering::Relaxed),
            merges_completed: self.merges_completed.load(Ordering::Relaxed),
            merges_failed: self.merges_failed.load(Ordering::Relaxed),
            producer_blocks: self.producer_blocks.load(Ordering::Relaxed),
            scheduling_deferred: self.scheduling_deferred.load(Ordering::Relaxed),
        }
    }
}
