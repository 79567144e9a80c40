// LSM index tests.
// Flushes, background merges driven by the merge policies, lookups, scans and reopening.

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use lsm_index::component::DiskComponent;
use lsm_index::error::Error;
use lsm_index::index::MERGE_RETRY_LIMIT;
use lsm_index::merge::{IoOperationCallback, IoOperationKind, MergeMetrics};
use lsm_index::{ComponentState, IndexOptions, LsmIndex, OwnedTuple, Properties, TupleCodec, TypeTrait};
use tempfile::tempdir;

fn codec() -> TupleCodec {
    TupleCodec::from_tag("type-aware", vec![TypeTrait::Variable, TypeTrait::Variable], 1).unwrap()
}

fn props(pairs: &[(&str, &str)]) -> Properties {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

fn options(dir: &Path, policy: &str, properties: Properties) -> IndexOptions {
    IndexOptions {
        memory_budget_bytes: 1 << 20,
        block_size: 1024,
        ..IndexOptions::new(dir)
    }
    .merge_policy(policy, properties)
}

fn prefix_options(dir: &Path) -> IndexOptions {
    options(
        dir,
        "prefix",
        props(&[
            ("max-mergable-component-size", "1048576"),
            ("max-tolerance-component-count", "3"),
        ]),
    )
}

fn tuple(key: u32, version: u32) -> OwnedTuple {
    OwnedTuple::new(vec![
        format!("key_{key:05}").into_bytes(),
        format!("v{version}").into_bytes(),
    ])
}

fn key(key: u32) -> OwnedTuple {
    OwnedTuple::new(vec![format!("key_{key:05}").into_bytes()])
}

fn component_files(dir: &Path) -> HashSet<String> {
    fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .collect()
}

// =============================================================================
// Test 1: Lookups see the memory component and flushed components
// =============================================================================
#[test]
fn lookup_memory_then_disk() {
    let dir = tempdir().unwrap();
    let index = LsmIndex::open(prefix_options(dir.path()), codec()).unwrap();

    for i in 0..100 {
        index.insert(&tuple(i, 1)).unwrap();
    }
    assert_eq!(index.memory_len(), 100);
    assert_eq!(index.lookup(&key(42)).unwrap(), Some(tuple(42, 1)));

    index.flush().unwrap();
    assert_eq!(index.memory_len(), 0);
    assert_eq!(index.immutable_components().len(), 1);
    assert_eq!(index.lookup(&key(42)).unwrap(), Some(tuple(42, 1)));
    assert_eq!(index.lookup(&key(100)).unwrap(), None);
    assert_eq!(index.metrics().flushes, 1);
}

// =============================================================================
// Test 2: The newest version of a key wins across components
// =============================================================================
#[test]
fn newest_version_wins() {
    let dir = tempdir().unwrap();
    let index = LsmIndex::open(options(dir.path(), "no-merge", Properties::new()), codec()).unwrap();

    for version in 1..=3 {
        for i in 0..20 {
            index.insert(&tuple(i, version)).unwrap();
        }
        index.flush().unwrap();
    }
    index.insert(&tuple(5, 4)).unwrap();

    assert_eq!(index.immutable_components().len(), 3);
    assert_eq!(index.lookup(&key(5)).unwrap(), Some(tuple(5, 4)));
    assert_eq!(index.lookup(&key(6)).unwrap(), Some(tuple(6, 3)));

    let all = index.scan().unwrap();
    assert_eq!(all.len(), 20);
    assert_eq!(all[5], tuple(5, 4));
    assert_eq!(all[6], tuple(6, 3));
}

// =============================================================================
// Test 3: Three small flushes trigger one background merge
// =============================================================================
#[test]
fn prefix_policy_merges_small_components() {
    let dir = tempdir().unwrap();
    let index = LsmIndex::open(prefix_options(dir.path()), codec()).unwrap();

    for round in 0..3 {
        for i in 0..50 {
            index.insert(&tuple(round * 50 + i, round)).unwrap();
        }
        // A key rewritten in every round
        index.insert(&tuple(9999, round)).unwrap();
        index.flush().unwrap();
    }
    index.wait_for_merges();

    let components = index.immutable_components();
    assert_eq!(components.len(), 1);
    let merged = &components.newest_first()[0];
    assert_eq!(merged.id_range().min, 0);
    assert_eq!(merged.id_range().max, 2);

    let metrics = index.metrics();
    assert_eq!(metrics.flushes, 3);
    assert_eq!(metrics.merges_scheduled, 1);
    assert_eq!(metrics.merges_completed, 1);

    let all = index.scan().unwrap();
    assert_eq!(all.len(), 151);
    assert_eq!(index.lookup(&key(9999)).unwrap(), Some(tuple(9999, 2)));
    assert_eq!(index.lookup(&key(120)).unwrap(), Some(tuple(120, 2)));

    // Merged inputs are gone from disk.
    let files = component_files(dir.path());
    assert_eq!(files.len(), 1, "{files:?}");
}

// =============================================================================
// Test 4: A full merge request compacts every component
// =============================================================================
#[test]
fn full_merge_request_compacts_everything() {
    let dir = tempdir().unwrap();
    let opts = options(dir.path(), "constant", props(&[("num-components", "100")]));
    let index = LsmIndex::open(opts, codec()).unwrap();

    for round in 0..4 {
        for i in 0..10 {
            index.insert(&tuple(round * 10 + i, round)).unwrap();
        }
        index.flush().unwrap();
    }
    assert_eq!(index.immutable_components().len(), 4);

    index.request_full_merge().unwrap();
    index.wait_for_merges();

    assert_eq!(index.immutable_components().len(), 1);
    assert_eq!(index.metrics().full_merges_scheduled, 1);
    assert_eq!(index.scan().unwrap().len(), 40);
}

// =============================================================================
// Test 5: The memory budget triggers flushes on insert
// =============================================================================
#[test]
fn memory_budget_triggers_flush() {
    let dir = tempdir().unwrap();
    let opts = IndexOptions {
        memory_budget_bytes: 2048,
        ..options(dir.path(), "no-merge", Properties::new())
    };
    let index = LsmIndex::open(opts, codec()).unwrap();

    for i in 0..500 {
        index.insert(&tuple(i, 0)).unwrap();
    }
    assert!(index.immutable_components().len() > 1);
    assert!(index.metrics().flushes > 1);
    assert_eq!(index.scan().unwrap().len(), 500);
}

// =============================================================================
// Test 6: Reopening restores components and discards merged-away leftovers
// =============================================================================
#[test]
fn reopen_recovers_components() {
    let dir = tempdir().unwrap();
    let opts = options(dir.path(), "constant", props(&[("num-components", "100")]));

    let saved = {
        let index = LsmIndex::open(opts.clone(), codec()).unwrap();
        for round in 0..2 {
            for i in 0..30 {
                index.insert(&tuple(i, round)).unwrap();
            }
            index.flush().unwrap();
        }
        // Keep copies of the two inputs to fake a crash before their deletion.
        let saved: Vec<(String, Vec<u8>)> = component_files(dir.path())
            .into_iter()
            .map(|name| {
                let bytes = fs::read(dir.path().join(&name)).unwrap();
                (name, bytes)
            })
            .collect();

        index.request_full_merge().unwrap();
        index.insert(&tuple(100, 7)).unwrap();
        index.close().unwrap();
        saved
    };
    assert_eq!(component_files(dir.path()).len(), 2, "merge result + final flush");

    for (name, bytes) in &saved {
        fs::write(dir.path().join(name), bytes).unwrap();
    }
    fs::write(dir.path().join("c9-9_000042.cmp.tmp"), b"half written").unwrap();

    let index = LsmIndex::open(opts, codec()).unwrap();
    assert_eq!(index.immutable_components().len(), 2);
    assert_eq!(component_files(dir.path()).len(), 2, "stale inputs and tmp removed");
    assert_eq!(index.lookup(&key(3)).unwrap(), Some(tuple(3, 1)));
    assert_eq!(index.lookup(&key(100)).unwrap(), Some(tuple(100, 7)));
    assert_eq!(index.scan().unwrap().len(), 31);

    // New flushes continue after the recovered timestamps.
    index.insert(&tuple(200, 0)).unwrap();
    index.flush().unwrap();
    let newest = index.immutable_components().newest_first()[0].id_range();
    assert!(newest.min > 2, "timestamp {newest:?} reused");
}

// =============================================================================
// Test 7: The completion callback hears about flushes and merges
// =============================================================================
#[derive(Default)]
struct CountingCallback {
    flushes: AtomicUsize,
    merges: AtomicUsize,
    failures: AtomicUsize,
}

impl IoOperationCallback for CountingCallback {
    fn after_operation(&self, kind: IoOperationKind, _component: &DiskComponent) {
        match kind {
            IoOperationKind::Flush => self.flushes.fetch_add(1, Ordering::SeqCst),
            IoOperationKind::Merge => self.merges.fetch_add(1, Ordering::SeqCst),
        };
    }

    fn after_failure(&self, _kind: IoOperationKind, _error: &Error) {
        self.failures.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn callback_sees_flush_and_merge() {
    let dir = tempdir().unwrap();
    let callback = Arc::new(CountingCallback::default());
    let metrics = Arc::new(MergeMetrics::new());
    let index = LsmIndex::open_with(
        prefix_options(dir.path()),
        codec(),
        Arc::clone(&callback) as Arc<dyn IoOperationCallback>,
        Arc::clone(&metrics),
    )
    .unwrap();

    for round in 0..3 {
        index.insert(&tuple(round, round)).unwrap();
        index.flush().unwrap();
    }
    index.wait_for_merges();

    assert_eq!(callback.flushes.load(Ordering::SeqCst), 3);
    assert_eq!(callback.merges.load(Ordering::SeqCst), 1);
    assert_eq!(callback.failures.load(Ordering::SeqCst), 0);
    assert_eq!(metrics.snapshot().merges_completed, 1);
}

// =============================================================================
// Test 8: Invalid tuples and options are rejected up front
// =============================================================================
#[test]
fn invalid_input_rejected() {
    let dir = tempdir().unwrap();

    let bad_policy = options(dir.path(), "leveled", Properties::new());
    assert!(matches!(LsmIndex::open(bad_policy, codec()), Err(Error::Config { .. })));

    let no_key = IndexOptions {
        key_field_count: 0,
        ..prefix_options(dir.path())
    };
    assert!(matches!(LsmIndex::open(no_key, codec()), Err(Error::Config { .. })));

    let fixed = TupleCodec::from_tag("type-aware", vec![TypeTrait::INT32, TypeTrait::Variable], 1).unwrap();
    let index = LsmIndex::open(prefix_options(dir.path()), fixed).unwrap();
    let wrong_width = OwnedTuple::new(vec![vec![1, 2], b"x".to_vec()]);
    assert!(matches!(index.insert(&wrong_width), Err(Error::FieldLength { .. })));
    assert!(matches!(
        index.insert(&OwnedTuple::new(Vec::new())),
        Err(Error::FieldRange { .. })
    ));
    assert_eq!(index.memory_len(), 0);
}

// =============================================================================
// Test 9: A merge that keeps failing is retried, then parked without
// leaving producers blocked
// =============================================================================
#[test]
fn failed_merge_does_not_block_producers() {
    let dir = tempdir().unwrap();
    let callback = Arc::new(CountingCallback::default());
    let metrics = Arc::new(MergeMetrics::new());
    let index = Arc::new(
        LsmIndex::open_with(
            prefix_options(dir.path()),
            codec(),
            Arc::clone(&callback) as Arc<dyn IoOperationCallback>,
            Arc::clone(&metrics),
        )
        .unwrap(),
    );

    for round in 0..2 {
        index.insert(&tuple(round, round)).unwrap();
        index.flush().unwrap();
    }
    // The oldest input of the coming merge disappears.
    let oldest = Arc::clone(&index.immutable_components().oldest_first()[0]);
    fs::remove_file(oldest.path().unwrap()).unwrap();
    drop(oldest);

    index.insert(&tuple(2, 2)).unwrap();
    index.flush().unwrap();
    index.wait_for_merges();

    let failed = metrics.snapshot().merges_failed;
    assert_eq!(failed, u64::from(MERGE_RETRY_LIMIT) + 1);
    assert_eq!(callback.failures.load(Ordering::SeqCst) as u64, failed);
    assert_eq!(callback.merges.load(Ordering::SeqCst), 0);

    // Inputs stay listed but are never picked again.
    let components = index.immutable_components();
    assert_eq!(components.len(), 3);
    assert!(components
        .newest_first()
        .iter()
        .all(|c| c.state() == ComponentState::ReadableUnwritableMerging));

    // The next small flush completes instead of waiting for a merge.
    let producer = {
        let index = Arc::clone(&index);
        thread::spawn(move || {
            index.insert(&tuple(3, 3))?;
            index.flush()
        })
    };
    let deadline = Instant::now() + Duration::from_secs(10);
    while !producer.is_finished() {
        assert!(Instant::now() < deadline, "producer still blocked");
        thread::sleep(Duration::from_millis(1));
    }
    producer.join().unwrap().unwrap();
    assert_eq!(index.immutable_components().len(), 4);
    assert_eq!(index.operation_tracker().waiting_count(), 0);
}
