// Prefix merge policy tests.
// Which run gets merged, when scheduling is deferred, and what is never merged.

mod common;

use std::sync::Arc;

use common::MockIndex;
use lsm_index::error::Error;
use lsm_index::merge::{MergeMetrics, MergePolicy, PrefixMergePolicy, PrefixMergePolicyConfig};
use lsm_index::{ComponentState, Properties};

fn policy(max_size: u64, tolerance: usize) -> (PrefixMergePolicy, Arc<MergeMetrics>) {
    let metrics = Arc::new(MergeMetrics::new());
    let policy = PrefixMergePolicy::new(
        PrefixMergePolicyConfig {
            max_mergable_component_size: max_size,
            max_tolerance_component_count: tolerance,
        },
        Arc::clone(&metrics),
    )
    .unwrap();
    (policy, metrics)
}

/// Report the newest component as a fresh flush.
fn flush_added(policy: &PrefixMergePolicy, index: &MockIndex) -> lsm_index::Result<()> {
    let newest = index.newest();
    policy.disk_component_added(index, false, &newest, false)
}

// =============================================================================
// Test 1: [900, 50, 50] totals exactly 1000, the count fallback decides
// =============================================================================
#[test]
fn exact_threshold_falls_back_to_count() {
    // Count reaches tolerance 3 at the newest component: merge all three.
    let (p, _) = policy(1000, 3);
    let index = MockIndex::with_sizes(&[900, 50, 50]);
    flush_added(&p, &index).unwrap();
    assert_eq!(index.scheduled(), vec![vec![2, 1, 0]]);

    // Tolerance 4: 1000 is not > 1000 and the run is too short. No merge.
    let (p, _) = policy(1000, 4);
    let index = MockIndex::with_sizes(&[900, 50, 50]);
    flush_added(&p, &index).unwrap();
    assert!(index.scheduled().is_empty());
}

// =============================================================================
// Test 2: One byte over the threshold triggers on size alone
// =============================================================================
#[test]
fn size_trigger_is_strictly_greater() {
    let (p, metrics) = policy(1000, 10);
    let index = MockIndex::with_sizes(&[900, 50, 51, 10]);
    flush_added(&p, &index).unwrap();

    // The run stops at the component that crossed the threshold.
    assert_eq!(index.scheduled(), vec![vec![2, 1, 0]]);
    assert_eq!(metrics.snapshot().merges_scheduled, 1);
    for id in 0..3 {
        assert_eq!(
            index.component(id).state(),
            ComponentState::ReadableUnwritableMerging
        );
    }
    assert_eq!(index.component(3).state(), ComponentState::ReadableUnwritable);
}

// =============================================================================
// Test 3: Any merging component defers scheduling entirely
// =============================================================================
#[test]
fn merging_component_defers_scheduling() {
    let (p, metrics) = policy(1000, 5);
    let index = MockIndex::with_sizes(&[600, 600, 10]);
    index.component(0).begin_merge().unwrap();

    flush_added(&p, &index).unwrap();
    assert!(index.scheduled().is_empty());
    assert_eq!(metrics.snapshot().scheduling_deferred, 1);

    // Once that merge is done the same list schedules normally.
    let (p, _) = policy(1000, 5);
    let index = MockIndex::with_sizes(&[600, 600, 10]);
    flush_added(&p, &index).unwrap();
    assert_eq!(index.scheduled(), vec![vec![1, 0]]);
}

// =============================================================================
// Test 4: A second invocation never reschedules components already merging
// =============================================================================
#[test]
fn no_double_scheduling() {
    let (p, _) = policy(100, 2);
    let index = MockIndex::with_sizes(&[30, 30]);
    flush_added(&p, &index).unwrap();
    assert_eq!(index.scheduled(), vec![vec![1, 0]]);

    index.push_newest(30);
    flush_added(&p, &index).unwrap();
    index.push_newest(30);
    flush_added(&p, &index).unwrap();
    assert_eq!(index.scheduled().len(), 1);
}

// =============================================================================
// Test 5: An oversized component discards the run before it
// =============================================================================
#[test]
fn oversized_component_resets_run() {
    let (p, _) = policy(100, 3);
    let index = MockIndex::with_sizes(&[60, 5000, 30, 30, 30]);
    flush_added(&p, &index).unwrap();
    assert_eq!(index.scheduled(), vec![vec![4, 3, 2]]);

    // Without the reset, 90 + 30 would cross the threshold.
    let (p, _) = policy(100, 10);
    let index = MockIndex::with_sizes(&[90, 5000, 30, 30]);
    flush_added(&p, &index).unwrap();
    assert!(index.scheduled().is_empty());
}

// =============================================================================
// Test 6: Oversized components are never merged opportunistically
// =============================================================================
#[test]
fn oversized_components_never_merged() {
    let (p, _) = policy(100, 1);
    let index = MockIndex::with_sizes(&[5000, 6000, 7000]);
    flush_added(&p, &index).unwrap();
    assert!(index.scheduled().is_empty());
}

// =============================================================================
// Test 7: A full merge request covers everything, once
// =============================================================================
#[test]
fn full_merge_request() {
    let (p, metrics) = policy(1000, 10);
    let index = MockIndex::with_sizes(&[5000, 10, 10]);
    let newest = index.newest();
    p.disk_component_added(&index, true, &newest, false).unwrap();

    assert_eq!(index.full_merges(), 1);
    assert!(index.scheduled().is_empty());
    assert_eq!(metrics.snapshot().full_merges_scheduled, 1);

    // Deferred like any other merge while something is merging.
    index.component(0).begin_merge().unwrap();
    p.disk_component_added(&index, true, &newest, false).unwrap();
    assert_eq!(index.full_merges(), 1);
}

// =============================================================================
// Test 8: Merge results wake producers and then schedule
// =============================================================================
#[test]
fn merge_result_notifies_and_schedules() {
    let (p, _) = policy(1000, 2);
    let index = MockIndex::with_sizes(&[10, 10]);
    flush_added(&p, &index).unwrap();
    assert_eq!(index.scheduled(), vec![vec![1, 0]]);

    // Two more flushes arrive while the merge runs.
    index.push_newest(10);
    index.push_newest(10);

    let before = index.tracker().generation();
    let merged = index.complete_merge(&[1, 0]);
    p.disk_component_added(&index, false, &merged, true).unwrap();

    assert_eq!(index.tracker().generation(), before + 1);
    // [merged 20, 10, 10] oldest first: count fallback at the newest.
    assert_eq!(index.scheduled().len(), 2);
    assert_eq!(index.scheduled()[1], vec![3, 2, merged.id().0]);
}

// =============================================================================
// Test 9: Scheduling failures propagate to the caller
// =============================================================================
#[test]
fn schedule_failure_propagates() {
    let (p, metrics) = policy(100, 1);
    let index = MockIndex::with_sizes(&[10]);
    index.fail_schedules();

    let err = flush_added(&p, &index).unwrap_err();
    assert!(matches!(err, Error::Schedule(_)));
    assert_eq!(metrics.snapshot().merges_scheduled, 0);
}

// =============================================================================
// Test 10: Properties are parsed once, malformed values are fatal
// =============================================================================
#[test]
fn properties_parsed_at_construction() {
    let mut props = Properties::new();
    props.insert("max-mergable-component-size".into(), "1048576".into());
    props.insert("max-tolerance-component-count".into(), "4".into());
    let p = PrefixMergePolicy::from_properties(&props, Arc::new(MergeMetrics::new())).unwrap();
    assert_eq!(p.config().max_mergable_component_size, 1_048_576);
    assert_eq!(p.config().max_tolerance_component_count, 4);
    assert_eq!(p.name(), "prefix");

    props.insert("max-mergable-component-size".into(), "1MB".into());
    let err = PrefixMergePolicy::from_properties(&props, Arc::new(MergeMetrics::new())).unwrap_err();
    match err {
        Error::Config { key, .. } => assert_eq!(key, "max-mergable-component-size"),
        other => panic!("expected config error, got {other:?}"),
    }
}

// =============================================================================
// Test 11: A merge that lost its claim race is not counted as scheduled
// =============================================================================
#[test]
fn lost_claim_not_counted_as_scheduled() {
    let (p, metrics) = policy(100, 2);
    let index = MockIndex::with_sizes(&[10, 10]);
    index.lose_claims();

    flush_added(&p, &index).unwrap();
    let newest = index.newest();
    p.disk_component_added(&index, true, &newest, false).unwrap();

    assert!(index.scheduled().is_empty());
    assert_eq!(index.full_merges(), 0);
    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.merges_scheduled, 0);
    assert_eq!(snapshot.full_merges_scheduled, 0);
}
