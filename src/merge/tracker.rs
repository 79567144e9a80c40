use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::{Condvar, Mutex};

/// Wait/notify rendezvous between producers and merge completions.
///
/// Every `notify_all` bumps a generation counter. A producer records the
/// generation before it inspects the component list and then waits until
/// the generation moves, so a merge finishing between the inspection and
/// the wait is never missed. Wakeups are not FIFO.
#[derive(Debug, Default)]
pub struct OperationTracker {
    generation: Mutex<u64>,
    notified: Condvar,
    waiting: AtomicUsize,
}

impl OperationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current notification generation.
    pub fn generation(&self) -> u64 {
        *self.generation.lock()
    }

    /// Wake every blocked producer.
    pub fn notify_all(&self) {
        let mut generation = self.generation.lock();
        *generation = generation.wrapping_add(1);
        self.notified.notify_all();
    }

    /// Block until a notification newer than `observed` arrives.
    ///
    /// No timeout: if merges never complete the caller waits forever.
    pub fn wait_for_notification(&self, observed: u64) {
        let mut generation = self.generation.lock();
        if *generation != observed {
            return;
        }
        self.waiting.fetch_add(1, Ordering::SeqCst);
        while *generation == observed {
            self.notified.wait(&mut generation);
        }
        self.waiting.fetch_sub(1, Ordering::SeqCst);
    }

    /// Producers currently blocked.
    pub fn waiting_count(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }
}
