//! An LSM index over one directory of component files.
//!
//! Writes land in a [`MemoryComponent`]. A flush turns it into a new disk
//! component at the newest end of the immutable list and asks the merge
//! policy what to do next. Merges run on background workers, replace their
//! inputs with one component, and ask the policy again.
//!
//! ```text
//!  insert ──► memory component ──flush──► [newest ... oldest]
//!                                            │
//!                   merge policy ◄───────────┘
//!                        │ schedule_merge
//!                        ▼
//!                  merge workers ──► replace members with result
//! ```

pub mod memory;
pub mod options;

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::component::{
    component_file_name, parse_component_file_name, ComponentBuilder, ComponentConfig,
    ComponentReader, ComponentSnapshot, DiskComponent, ImmutableComponentList,
    COMPONENT_FILE_EXTENSION,
};
use crate::error::{Error, Result};
use crate::merge::{
    create_merge_policy, IndexAccessor, IoOperationCallback, IoOperationKind, MergeMetrics,
    MergeMetricsSnapshot, MergePolicy, NoOpIoOperationCallback, OperationTracker,
};
use crate::scheduler::IoScheduler;
use crate::tuple::{key_bytes, OwnedTuple, TupleCodec, TupleReference, TupleWriter};
use crate::types::{ComponentId, IdRange};

pub use memory::MemoryComponent;
pub use options::IndexOptions;

/// Consecutive failed merges retried before the failing members are parked.
pub const MERGE_RETRY_LIMIT: u32 = 2;

/// Handle on an open index. Dropping it stops the merge workers after the
/// jobs already queued; unflushed tuples are lost unless [`close`](Self::close)
/// is called.
pub struct LsmIndex {
    shared: Arc<IndexShared>,
}

struct IndexShared {
    options: IndexOptions,
    codec: TupleCodec,
    component_config: ComponentConfig,
    memory: Mutex<MemoryComponent>,
    components: RwLock<ImmutableComponentList>,
    /// Flush timestamp source for component id ranges.
    next_timestamp: AtomicU64,
    next_component_id: AtomicU64,
    full_merge_requested: AtomicBool,
    /// Submitted merge jobs that have not finished their bookkeeping.
    merges_in_flight: AtomicUsize,
    /// Merge failures since the last successful merge.
    merge_failures: AtomicU32,
    policy: Arc<dyn MergePolicy>,
    tracker: OperationTracker,
    callback: Arc<dyn IoOperationCallback>,
    metrics: Arc<MergeMetrics>,
    scheduler: IoScheduler,
    /// Handed to merge jobs so a queued job never keeps the index alive.
    this: Weak<IndexShared>,
}

impl LsmIndex {
    /// Open (or create) the index in `options.dir`.
    pub fn open(options: IndexOptions, codec: TupleCodec) -> Result<Self> {
        Self::open_with(
            options,
            codec,
            Arc::new(NoOpIoOperationCallback),
            Arc::new(MergeMetrics::new()),
        )
    }

    /// Open with an explicit completion callback and metrics collector.
    pub fn open_with(
        options: IndexOptions,
        codec: TupleCodec,
        callback: Arc<dyn IoOperationCallback>,
        metrics: Arc<MergeMetrics>,
    ) -> Result<Self> {
        options.validate()?;
        let policy = create_merge_policy(
            &options.merge_policy,
            &options.merge_policy_properties,
            Arc::clone(&metrics),
        )?;
        fs::create_dir_all(&options.dir)?;

        let recovered = recover_components(&options.dir, &codec, options.key_field_count)?;
        let next_timestamp = recovered.iter().map(|c| c.id_range().max + 1).max().unwrap_or(0);
        let next_component_id = recovered.iter().map(|c| c.id().0 + 1).max().unwrap_or(0);
        let mut components = ImmutableComponentList::new();
        for component in recovered {
            components.append_oldest(Arc::new(component));
        }
        info!(
            dir = ?options.dir,
            components = components.len(),
            policy = policy.name(),
            "opened index"
        );

        let scheduler = IoScheduler::new("lsm-merge", options.merge_threads)?;
        let component_config = ComponentConfig {
            block_size: options.block_size,
            bloom_false_positive_rate: options.bloom_false_positive_rate,
            key_field_count: options.key_field_count,
        };
        let memory = MemoryComponent::new(options.memory_budget_bytes);

        let shared = Arc::new_cyclic(|this| IndexShared {
            options,
            codec,
            component_config,
            memory: Mutex::new(memory),
            components: RwLock::new(components),
            next_timestamp: AtomicU64::new(next_timestamp),
            next_component_id: AtomicU64::new(next_component_id),
            full_merge_requested: AtomicBool::new(false),
            merges_in_flight: AtomicUsize::new(0),
            merge_failures: AtomicU32::new(0),
            policy,
            tracker: OperationTracker::new(),
            callback,
            metrics,
            scheduler,
            this: this.clone(),
        });
        Ok(LsmIndex { shared })
    }

    /// Insert or replace the tuple with the same key fields.
    ///
    /// Flushes when the memory component passes its budget; the flush may
    /// block on merge backpressure.
    pub fn insert<T: TupleReference + ?Sized>(&self, tuple: &T) -> Result<()> {
        self.shared.insert(tuple)
    }

    /// Flush the memory component, if it holds anything.
    pub fn flush(&self) -> Result<()> {
        self.shared.flush()
    }

    /// Find the newest tuple whose key fields equal those of `key`.
    pub fn lookup<T: TupleReference + ?Sized>(&self, key: &T) -> Result<Option<OwnedTuple>> {
        self.shared.lookup(key)
    }

    /// Every live tuple in key order, newest version per key.
    pub fn scan(&self) -> Result<Vec<OwnedTuple>> {
        self.shared.scan()
    }

    /// Ask the policy to merge every component at its next decision.
    pub fn request_full_merge(&self) -> Result<()> {
        self.shared.request_full_merge()
    }

    /// Block until no merge is in flight.
    pub fn wait_for_merges(&self) {
        self.shared.wait_for_merges()
    }

    pub fn immutable_components(&self) -> ComponentSnapshot {
        self.shared.immutable_components()
    }

    pub fn operation_tracker(&self) -> &OperationTracker {
        &self.shared.tracker
    }

    pub fn metrics(&self) -> MergeMetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    pub fn options(&self) -> &IndexOptions {
        &self.shared.options
    }

    /// Tuples waiting in the memory component.
    pub fn memory_len(&self) -> usize {
        self.shared.memory.lock().len()
    }

    /// Flush, wait for merges, and stop the workers.
    pub fn close(self) -> Result<()> {
        self.shared.flush()?;
        self.shared.wait_for_merges();
        Ok(())
    }
}

impl Drop for LsmIndex {
    fn drop(&mut self) {
        self.shared.scheduler.shutdown();
    }
}

impl IndexShared {
    fn key_field_count(&self) -> usize {
        self.options.key_field_count
    }

    fn key_of<T: TupleReference + ?Sized>(&self, tuple: &T) -> Result<Vec<u8>> {
        let key_field_count = self.key_field_count();
        if tuple.field_count() < key_field_count {
            return Err(Error::FieldRange {
                start: 0,
                count: key_field_count,
                field_count: tuple.field_count(),
            });
        }
        Ok(key_bytes(tuple, key_field_count))
    }

    fn insert<T: TupleReference + ?Sized>(&self, tuple: &T) -> Result<()> {
        let key = self.key_of(tuple)?;
        // Reject tuples the codec cannot store now rather than at flush.
        let mut scratch = vec![0u8; self.codec.bytes_required(tuple)];
        self.codec.write_tuple(tuple, &mut scratch, 0)?;

        let full = {
            let mut memory = self.memory.lock();
            memory.insert(key, OwnedTuple::from_reference(tuple));
            memory.is_full()
        };
        if full {
            self.flush()?;
        }
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        let component = {
            let mut memory = self.memory.lock();
            if memory.is_empty() {
                return Ok(());
            }
            let timestamp = self.next_timestamp.fetch_add(1, Ordering::SeqCst);
            let id = self.allocate_component_id();
            let id_range = IdRange::single(timestamp);
            let path = self.options.dir.join(component_file_name(id, id_range));

            let mut builder = ComponentBuilder::new(
                &path,
                id,
                id_range,
                self.codec.clone(),
                self.component_config.clone(),
            )?;
            for (_, tuple) in memory.iter() {
                builder.add(tuple)?;
            }
            let component = Arc::new(builder.finish()?);
            self.components.write().prepend(Arc::clone(&component));
            memory.clear();
            component
        };

        self.metrics.record_flush();
        info!(
            component = %component.id(),
            range = %component.id_range(),
            bytes = component.size(),
            "flushed memory component"
        );
        self.callback.after_operation(IoOperationKind::Flush, &component);
        self.policy.disk_component_added(
            self,
            self.full_merge_requested.load(Ordering::SeqCst),
            &component,
            false,
        )
    }

    fn allocate_component_id(&self) -> ComponentId {
        ComponentId(self.next_component_id.fetch_add(1, Ordering::SeqCst))
    }

    fn open_reader(&self, component: &DiskComponent) -> Result<ComponentReader> {
        let path = component.path().ok_or_else(|| {
            Error::Corruption(format!("component {} has no data file", component.id()))
        })?;
        ComponentReader::open(path, self.codec.clone(), self.key_field_count())
    }

    fn lookup<T: TupleReference + ?Sized>(&self, key: &T) -> Result<Option<OwnedTuple>> {
        let key = self.key_of(key)?;
        let snapshot = {
            let memory = self.memory.lock();
            if let Some(tuple) = memory.get(&key) {
                return Ok(Some(tuple.clone()));
            }
            self.immutable_components()
        };

        for component in snapshot.newest_first() {
            if !component.may_contain(&key) {
                continue;
            }
            if let Some(tuple) = self.open_reader(component)?.find(&key)? {
                return Ok(Some(tuple));
            }
        }
        Ok(None)
    }

    fn scan(&self) -> Result<Vec<OwnedTuple>> {
        let (snapshot, in_memory) = {
            let memory = self.memory.lock();
            let in_memory: Vec<(Vec<u8>, OwnedTuple)> =
                memory.iter().map(|(k, t)| (k.to_vec(), t.clone())).collect();
            (self.immutable_components(), in_memory)
        };

        let mut merged = BTreeMap::new();
        for component in snapshot.oldest_first() {
            for tuple in self.open_reader(&component)?.read_all()? {
                merged.insert(key_bytes(&tuple, self.key_field_count()), tuple);
            }
        }
        merged.extend(in_memory);
        Ok(merged.into_values().collect())
    }

    fn request_full_merge(&self) -> Result<()> {
        self.full_merge_requested.store(true, Ordering::SeqCst);
        if self.memory.lock().is_empty() {
            let snapshot = self.immutable_components();
            match snapshot.newest_first().first() {
                Some(newest) => self.policy.disk_component_added(self, true, newest, false),
                None => Ok(()),
            }
        } else {
            self.flush()
        }
    }

    fn wait_for_merges(&self) {
        loop {
            let observed = self.tracker.generation();
            if self.merges_in_flight.load(Ordering::SeqCst) == 0 {
                return;
            }
            self.tracker.wait_for_notification(observed);
        }
    }

    /// Background half of `schedule_merge`. `members` are newest first and
    /// already in the merging state.
    fn run_merge(&self, members: Vec<Arc<DiskComponent>>, callback: Arc<dyn IoOperationCallback>) {
        match self.merge_components(&members) {
            Ok(result) => {
                self.merge_failures.store(0, Ordering::SeqCst);
                self.metrics.record_merge_completed();
                info!(
                    component = %result.id(),
                    range = %result.id_range(),
                    inputs = members.len(),
                    bytes = result.size(),
                    "merge completed"
                );
                drop(members);
                callback.after_operation(IoOperationKind::Merge, &result);
                let full_merge_requested = self.full_merge_requested.load(Ordering::SeqCst);
                if let Err(e) = self.policy.disk_component_added(self, full_merge_requested, &result, true) {
                    error!(error = %e, "merge policy failed after merge");
                }
            }
            Err(e) => {
                self.metrics.record_merge_failed();
                error!(inputs = members.len(), error = %e, "merge failed");
                callback.after_failure(IoOperationKind::Merge, &e);
                self.retry_or_park(&members);
            }
        }
        self.merges_in_flight.fetch_sub(1, Ordering::SeqCst);
        self.tracker.notify_all();
    }

    /// After a failed merge, hand the members back to the policy for another
    /// attempt. Past [`MERGE_RETRY_LIMIT`] consecutive failures they stay in
    /// the merging state: they are never merged again and no longer count
    /// toward the backlog producers wait on.
    fn retry_or_park(&self, members: &[Arc<DiskComponent>]) {
        let failures = self.merge_failures.fetch_add(1, Ordering::SeqCst) + 1;
        if failures > MERGE_RETRY_LIMIT {
            warn!(
                members = ?members.iter().map(|c| c.id().0).collect::<Vec<_>>(),
                failures,
                "giving up on merge, members parked"
            );
            return;
        }
        for member in members {
            if let Err(e) = member.abort_merge() {
                warn!(component = %member.id(), error = %e, "cannot roll back merge member");
                return;
            }
        }
        let Some(newest) = members.first() else {
            return;
        };
        debug!(attempt = failures, "retrying failed merge");
        let full_merge_requested = self.full_merge_requested.load(Ordering::SeqCst);
        if let Err(e) = self.policy.disk_component_added(self, full_merge_requested, newest, true) {
            error!(error = %e, "merge policy failed after merge failure");
        }
    }

    /// Merge `members` (newest first) into one component and swap it into
    /// the list. Newer tuples win on equal keys.
    fn merge_components(&self, members: &[Arc<DiskComponent>]) -> Result<Arc<DiskComponent>> {
        let id_range = IdRange::span(members.iter().map(|c| c.id_range()))
            .ok_or_else(|| Error::Schedule("merge without members".into()))?;

        let mut merged = BTreeMap::new();
        for component in members.iter().rev() {
            for tuple in self.open_reader(component)?.read_all()? {
                merged.insert(key_bytes(&tuple, self.key_field_count()), tuple);
            }
        }

        let id = self.allocate_component_id();
        let path = self.options.dir.join(component_file_name(id, id_range));
        let mut builder = ComponentBuilder::new(
            &path,
            id,
            id_range,
            self.codec.clone(),
            self.component_config.clone(),
        )?;
        for tuple in merged.values() {
            builder.add(tuple)?;
        }
        let result = Arc::new(builder.finish()?);

        let member_ids: Vec<ComponentId> = members.iter().map(|c| c.id()).collect();
        if let Err(e) = self.components.write().replace_merged(&member_ids, Arc::clone(&result)) {
            if let Err(remove) = fs::remove_file(&path) {
                warn!(path = ?path, error = %remove, "cannot remove orphaned merge output");
            }
            return Err(e);
        }
        for member in members {
            member.complete_merge()?;
        }
        Ok(result)
    }
}

impl IndexAccessor for IndexShared {
    fn immutable_components(&self) -> ComponentSnapshot {
        self.components.read().snapshot()
    }

    fn operation_tracker(&self) -> &OperationTracker {
        &self.tracker
    }

    fn io_operation_callback(&self) -> Arc<dyn IoOperationCallback> {
        Arc::clone(&self.callback)
    }

    fn schedule_merge(
        &self,
        components: Vec<Arc<DiskComponent>>,
        callback: Arc<dyn IoOperationCallback>,
    ) -> Result<bool> {
        if components.is_empty() {
            return Ok(false);
        }
        for (i, component) in components.iter().enumerate() {
            if let Err(e) = component.begin_merge() {
                // Another invocation claimed this component first.
                for claimed in &components[..i] {
                    claimed.abort_merge()?;
                }
                self.metrics.record_scheduling_deferred();
                debug!(component = %component.id(), error = %e, "merge member already claimed");
                return Ok(false);
            }
        }

        debug!(
            members = ?components.iter().map(|c| c.id().0).collect::<Vec<_>>(),
            "submitting merge"
        );
        let rollback = components.clone();
        let this = self.this.clone();
        self.merges_in_flight.fetch_add(1, Ordering::SeqCst);
        let submitted = self.scheduler.submit(move || {
            if let Some(shared) = this.upgrade() {
                shared.run_merge(components, callback);
            }
        });
        if let Err(e) = submitted {
            self.merges_in_flight.fetch_sub(1, Ordering::SeqCst);
            for component in &rollback {
                component.abort_merge()?;
            }
            return Err(e);
        }
        Ok(true)
    }

    fn schedule_full_merge(&self, callback: Arc<dyn IoOperationCallback>) -> Result<bool> {
        // Cleared before submitting so the finished job does not see the
        // request again; restored if nothing was submitted.
        self.full_merge_requested.store(false, Ordering::SeqCst);
        let all = self.immutable_components().into_vec();
        let submitted = self.schedule_merge(all, callback);
        if !matches!(submitted, Ok(true)) {
            self.full_merge_requested.store(true, Ordering::SeqCst);
        }
        submitted
    }
}

/// Load the component files in `dir`, newest first.
///
/// Unfinished `.tmp` files are deleted. A component whose id range lies
/// inside a newer one's is an input of a merge that completed before the
/// crash; it is deleted too.
fn recover_components(dir: &Path, codec: &TupleCodec, key_field_count: usize) -> Result<Vec<DiskComponent>> {
    let mut found: Vec<(Option<ComponentId>, PathBuf, ComponentReader)> = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if name.ends_with(".tmp") {
            debug!(path = ?path, "removing unfinished component file");
            fs::remove_file(&path)?;
            continue;
        }
        if path.extension().and_then(|e| e.to_str()) != Some(COMPONENT_FILE_EXTENSION) {
            continue;
        }
        let id = parse_component_file_name(name);
        let reader = ComponentReader::open(&path, codec.clone(), key_field_count)?;
        found.push((id, path, reader));
    }

    // Newest first; among equal max timestamps the widest range first.
    found.sort_by(|(_, _, a), (_, _, b)| {
        let (a, b) = (a.footer().id_range, b.footer().id_range);
        b.max.cmp(&a.max).then(a.min.cmp(&b.min))
    });

    let mut next_id = found
        .iter()
        .filter_map(|(id, _, _)| id.map(|id| id.0 + 1))
        .max()
        .unwrap_or(0);
    let mut kept: Vec<DiskComponent> = Vec::new();
    for (id, path, reader) in found {
        let range = reader.footer().id_range;
        if kept.iter().any(|c| c.id_range().contains(&range)) {
            drop(reader);
            info!(path = ?path, range = %range, "removing component superseded by a merge");
            fs::remove_file(&path)?;
            continue;
        }
        let id = id.unwrap_or_else(|| {
            let fresh = ComponentId(next_id);
            next_id += 1;
            fresh
        });
        kept.push(reader.into_component(id)?);
    }
    Ok(kept)
}
