//! Deferred units of work keyed for coalescing.
//!
//! Callers hand work to a [`TaskQueue`] under a key. At most one unit per key
//! is ever pending: enqueuing under a key that is already pending replaces
//! the earlier unit. Scheduling is the host's concern; the in-memory queue
//! simply runs what is pending when asked.

use std::collections::VecDeque;
use std::sync::Mutex;

use tracing::{debug, warn};

use crate::error::{EventError, EventResult};

/// A unit of deferred work.
///
/// `run` may be called again after a failure, so it must be safe to repeat.
pub trait DeferredWork: Send {
    fn run(&mut self) -> EventResult<()>;
}

impl<F> DeferredWork for F
where
    F: FnMut() -> EventResult<()> + Send,
{
    fn run(&mut self) -> EventResult<()> {
        self()
    }
}

/// Queue contract consumed by the value store.
pub trait TaskQueue: Send + Sync {
    /// Queue `work` under `key`, replacing any pending unit with the same
    /// key. Returns `true` if a pending unit was replaced.
    fn enqueue_unique(&self, key: &str, work: Box<dyn DeferredWork>) -> EventResult<bool>;

    /// Drop the pending unit for `key`. Returns `true` if one was pending.
    fn cancel(&self, key: &str) -> EventResult<bool>;

    /// Returns `true` if a unit is pending under `key`.
    fn is_pending(&self, key: &str) -> bool;
}

struct PendingUnit {
    key: String,
    attempts: u32,
    work: Box<dyn DeferredWork>,
}

/// Outcome of one [`InMemoryTaskQueue::run_pending`] pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunReport {
    pub completed: usize,
    /// Units that failed and were put back.
    pub failed: usize,
}

/// FIFO in-memory queue.
///
/// The check-and-replace-then-insert step runs under one lock. Units run
/// outside the lock, so running work may enqueue more work.
#[derive(Default)]
pub struct InMemoryTaskQueue {
    pending: Mutex<VecDeque<PendingUnit>>,
}

impl InMemoryTaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.pending.lock().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys currently pending, in queue order.
    pub fn keys(&self) -> Vec<String> {
        let pending = self.pending.lock().expect("lock poisoned");
        pending.iter().map(|u| u.key.clone()).collect()
    }

    /// Run every unit pending at the time of the call.
    ///
    /// A failed unit goes back on the queue unless a newer unit was queued
    /// under its key in the meantime.
    pub fn run_pending(&self) -> RunReport {
        let batch: Vec<PendingUnit> = self.pending.lock().expect("lock poisoned").drain(..).collect();
        let mut report = RunReport::default();
        for mut unit in batch {
            unit.attempts += 1;
            match unit.work.run() {
                Ok(()) => {
                    debug!(key = %unit.key, attempts = unit.attempts, "deferred work completed");
                    report.completed += 1;
                }
                Err(e) => {
                    warn!(key = %unit.key, attempts = unit.attempts, error = %e, "deferred work failed, requeued");
                    report.failed += 1;
                    let mut pending = self.pending.lock().expect("lock poisoned");
                    if !pending.iter().any(|u| u.key == unit.key) {
                        pending.push_back(unit);
                    }
                }
            }
        }
        report
    }

    /// Run pending passes until the queue is empty or a pass makes no
    /// progress. Returns the accumulated report.
    pub fn drain(&self) -> RunReport {
        let mut total = RunReport::default();
        loop {
            if self.is_empty() {
                return total;
            }
            let pass = self.run_pending();
            total.completed += pass.completed;
            total.failed += pass.failed;
            if pass.completed == 0 {
                return total;
            }
        }
    }
}

impl TaskQueue for InMemoryTaskQueue {
    fn enqueue_unique(&self, key: &str, work: Box<dyn DeferredWork>) -> EventResult<bool> {
        if key.is_empty() {
            return Err(EventError::EmptyKey);
        }
        let mut pending = self.pending.lock().expect("lock poisoned");
        let before = pending.len();
        pending.retain(|u| u.key != key);
        let replaced = pending.len() != before;
        pending.push_back(PendingUnit {
            key: key.to_string(),
            attempts: 0,
            work,
        });
        debug!(key, replaced, "deferred work queued");
        Ok(replaced)
    }

    fn cancel(&self, key: &str) -> EventResult<bool> {
        let mut pending = self.pending.lock().expect("lock poisoned");
        let before = pending.len();
        pending.retain(|u| u.key != key);
        Ok(pending.len() != before)
    }

    fn is_pending(&self, key: &str) -> bool {
        let pending = self.pending.lock().expect("lock poisoned");
        pending.iter().any(|u| u.key == key)
    }
}

impl std::fmt::Debug for InMemoryTaskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryTaskQueue")
            .field("pending", &self.keys())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting(counter: &Arc<AtomicUsize>) -> Box<dyn DeferredWork> {
        let counter = Arc::clone(counter);
        Box::new(move || -> EventResult<()> {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    #[test]
    fn same_key_coalesces() {
        let queue = InMemoryTaskQueue::new();
        let hits = Arc::new(AtomicUsize::new(0));
        assert!(!queue.enqueue_unique("record:1", counting(&hits)).unwrap());
        assert!(queue.enqueue_unique("record:1", counting(&hits)).unwrap());
        queue.enqueue_unique("record:2", counting(&hits)).unwrap();
        assert_eq!(queue.len(), 2);

        let report = queue.run_pending();
        assert_eq!(report, RunReport { completed: 2, failed: 0 });
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert!(queue.is_empty());
    }

    #[test]
    fn failed_work_stays_queued() {
        let queue = InMemoryTaskQueue::new();
        let tries = Arc::new(AtomicUsize::new(0));
        let t = Arc::clone(&tries);
        queue
            .enqueue_unique(
                "flaky",
                Box::new(move || -> EventResult<()> {
                    if t.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(EventError::WorkFailed {
                            key: "flaky".into(),
                            reason: "first try".into(),
                        })
                    } else {
                        Ok(())
                    }
                }),
            )
            .unwrap();

        assert_eq!(queue.run_pending().failed, 1);
        assert!(queue.is_pending("flaky"));
        assert_eq!(queue.run_pending().completed, 1);
        assert!(!queue.is_pending("flaky"));
        assert_eq!(tries.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn cancel_removes_pending_unit() {
        let queue = InMemoryTaskQueue::new();
        let hits = Arc::new(AtomicUsize::new(0));
        queue.enqueue_unique("k", counting(&hits)).unwrap();
        assert!(queue.cancel("k").unwrap());
        assert!(!queue.cancel("k").unwrap());
        queue.run_pending();
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn empty_key_is_rejected() {
        let queue = InMemoryTaskQueue::new();
        let hits = Arc::new(AtomicUsize::new(0));
        assert!(matches!(
            queue.enqueue_unique("", counting(&hits)),
            Err(EventError::EmptyKey)
        ));
    }

    #[test]
    fn drain_stops_when_no_progress() {
        let queue = InMemoryTaskQueue::new();
        queue
            .enqueue_unique(
                "broken",
                Box::new(|| -> EventResult<()> {
                    Err(EventError::WorkFailed {
                        key: "broken".into(),
                        reason: "always".into(),
                    })
                }),
            )
            .unwrap();
        let report = queue.drain();
        assert_eq!(report.completed, 0);
        assert_eq!(report.failed, 1);
        assert!(queue.is_pending("broken"));
    }
}
