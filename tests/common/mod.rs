// Shared helpers for merge policy tests: an in-memory IndexAccessor that
// records what a policy schedules instead of running merges.
#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use lsm_index::component::{ComponentSnapshot, DiskComponent};
use lsm_index::error::{Error, Result};
use lsm_index::merge::{IndexAccessor, IoOperationCallback, NoOpIoOperationCallback, OperationTracker};
use lsm_index::{ComponentId, IdRange};
use parking_lot::Mutex;

pub struct MockIndex {
    /// Newest first, like the real component list.
    components: Mutex<Vec<Arc<DiskComponent>>>,
    tracker: OperationTracker,
    scheduled: Mutex<Vec<Vec<u64>>>,
    full_merges: AtomicUsize,
    fail_schedules: AtomicBool,
    lose_claims: AtomicBool,
    next_id: AtomicU64,
}

impl MockIndex {
    /// Components with ids 0, 1, 2, ... from oldest to newest.
    pub fn with_sizes(sizes_oldest_first: &[u64]) -> Self {
        let index = MockIndex {
            components: Mutex::new(Vec::new()),
            tracker: OperationTracker::new(),
            scheduled: Mutex::new(Vec::new()),
            full_merges: AtomicUsize::new(0),
            fail_schedules: AtomicBool::new(false),
            lose_claims: AtomicBool::new(false),
            next_id: AtomicU64::new(0),
        };
        for &size in sizes_oldest_first {
            index.push_newest(size);
        }
        index
    }

    /// Add a freshly flushed component and return it.
    pub fn push_newest(&self, size: u64) -> Arc<DiskComponent> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let component = Arc::new(DiskComponent::new(ComponentId(id), IdRange::single(id), size));
        self.components.lock().insert(0, Arc::clone(&component));
        component
    }

    /// Replace the members of a merge with one component of their total size,
    /// at the newest member's position.
    pub fn complete_merge(&self, member_ids: &[u64]) -> Arc<DiskComponent> {
        let mut components = self.components.lock();
        let members: Vec<_> = components
            .iter()
            .filter(|c| member_ids.contains(&c.id().0))
            .cloned()
            .collect();
        let size = members.iter().map(|c| c.size()).sum();
        let range = IdRange::span(members.iter().map(|c| c.id_range())).unwrap();
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let result = Arc::new(DiskComponent::new(ComponentId(id), range, size));

        let position = components
            .iter()
            .position(|c| member_ids.contains(&c.id().0))
            .unwrap();
        components.retain(|c| !member_ids.contains(&c.id().0));
        components.insert(position, Arc::clone(&result));
        for member in members {
            // Members the test did not schedule are claimed here.
            let _ = member.begin_merge();
            member.complete_merge().unwrap();
        }
        result
    }

    pub fn newest(&self) -> Arc<DiskComponent> {
        Arc::clone(&self.components.lock()[0])
    }

    pub fn component(&self, id: u64) -> Arc<DiskComponent> {
        self.components
            .lock()
            .iter()
            .find(|c| c.id().0 == id)
            .cloned()
            .unwrap()
    }

    /// Ids of each scheduled merge, newest first.
    pub fn scheduled(&self) -> Vec<Vec<u64>> {
        self.scheduled.lock().clone()
    }

    pub fn full_merges(&self) -> usize {
        self.full_merges.load(Ordering::SeqCst)
    }

    pub fn fail_schedules(&self) {
        self.fail_schedules.store(true, Ordering::SeqCst);
    }

    /// Behave as if a concurrent invocation claimed the components first.
    pub fn lose_claims(&self) {
        self.lose_claims.store(true, Ordering::SeqCst);
    }

    pub fn tracker(&self) -> &OperationTracker {
        &self.tracker
    }
}

impl IndexAccessor for MockIndex {
    fn immutable_components(&self) -> ComponentSnapshot {
        ComponentSnapshot::new(self.components.lock().clone())
    }

    fn operation_tracker(&self) -> &OperationTracker {
        &self.tracker
    }

    fn io_operation_callback(&self) -> Arc<dyn IoOperationCallback> {
        Arc::new(NoOpIoOperationCallback)
    }

    fn schedule_merge(
        &self,
        components: Vec<Arc<DiskComponent>>,
        _callback: Arc<dyn IoOperationCallback>,
    ) -> Result<bool> {
        if self.fail_schedules.load(Ordering::SeqCst) {
            return Err(Error::Schedule("merge queue closed".into()));
        }
        if self.lose_claims.load(Ordering::SeqCst) {
            return Ok(false);
        }
        for component in &components {
            component.begin_merge()?;
        }
        self.scheduled
            .lock()
            .push(components.iter().map(|c| c.id().0).collect());
        Ok(true)
    }

    fn schedule_full_merge(&self, _callback: Arc<dyn IoOperationCallback>) -> Result<bool> {
        if self.fail_schedules.load(Ordering::SeqCst) {
            return Err(Error::Schedule("merge queue closed".into()));
        }
        if self.lose_claims.load(Ordering::SeqCst) {
            return Ok(false);
        }
        self.full_merges.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }
}
