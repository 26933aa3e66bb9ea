//! Scheduling interface shared by both execution strategies
//!
//! A scheduler decides which thread runs a registered job. Both
//! implementations hand the actual work to [`crate::job::runner`], so the
//! lock discipline and the exactly-once completion live in one place.

use crate::error::Result;
use crate::job::AsyncHandle;
use serde::Serialize;
use std::cell::Cell;
use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Executes registered jobs on worker threads
pub trait Scheduler: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Queue the pending operation of a registered job
    ///
    /// An error means no thread will ever run it; the caller owns the job.
    fn schedule(&self, handle: AsyncHandle, priority: i32) -> Result<()>;

    /// Change the concurrency cap
    fn set_limit(&self, limit: usize) -> Result<()>;

    /// Current concurrency cap, if the strategy has one
    fn limit(&self) -> Option<usize>;

    /// Stop accepting work and hand back everything queued but not started
    fn begin_shutdown(&self) -> Vec<AsyncHandle>;

    /// Wait for worker threads to exit
    fn join(&self);

    /// Counters for this scheduler
    fn stats(&self) -> SchedulerSnapshot;
}

/// A job waiting in a priority queue
///
/// Higher priority runs first; equal priorities run in submission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueuedJob {
    /// Scheduling priority
    pub priority: i32,
    /// Job to run
    pub handle: AsyncHandle,
}

impl Ord for QueuedJob {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.handle.cmp(&self.handle))
    }
}

impl PartialOrd for QueuedJob {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

/// Priority queue of handles; payloads stay in the registry
#[derive(Debug, Default)]
pub struct PriorityJobQueue {
    heap: BinaryHeap<QueuedJob>,
}

impl PriorityJobQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a job
    pub fn push(&mut self, job: QueuedJob) {
        self.heap.push(job);
    }

    /// Take the job that should run next
    pub fn pop(&mut self) -> Option<QueuedJob> {
        self.heap.pop()
    }

    /// Drop a queued handle, if present
    pub fn remove(&mut self, handle: AsyncHandle) -> bool {
        let before = self.heap.len();
        self.heap.retain(|job| job.handle != handle);
        self.heap.len() != before
    }

    /// Empty the queue in run order
    pub fn drain(&mut self) -> Vec<AsyncHandle> {
        let mut handles = Vec::with_capacity(self.heap.len());
        while let Some(job) = self.heap.pop() {
            handles.push(job.handle);
        }
        handles
    }

    /// Number of queued jobs
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

/// Live scheduler counters
#[derive(Debug, Default)]
pub struct SchedulerStats {
    /// Operations accepted
    pub scheduled: AtomicU64,
    /// Operations a worker finished executing
    pub executed: AtomicU64,
    /// Operations refused
    pub rejected: AtomicU64,
    /// Threads created
    pub threads_spawned: AtomicU64,
    /// Operations currently executing
    pub running: AtomicUsize,
}

impl SchedulerStats {
    /// Copy the counters out
    pub fn snapshot(&self) -> SchedulerSnapshot {
        SchedulerSnapshot {
            scheduled: self.scheduled.load(Ordering::Relaxed),
            executed: self.executed.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            threads_spawned: self.threads_spawned.load(Ordering::Relaxed),
            running: self.running.load(Ordering::Relaxed),
            queued: 0,
            workers: 0,
        }
    }

    pub(crate) fn run<F: FnOnce()>(&self, f: F) {
        self.running.fetch_add(1, Ordering::Relaxed);
        f();
        self.running.fetch_sub(1, Ordering::Relaxed);
        self.executed.fetch_add(1, Ordering::Relaxed);
    }
}

/// Point-in-time copy of [`SchedulerStats`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerSnapshot {
    /// Operations accepted
    pub scheduled: u64,
    /// Operations executed
    pub executed: u64,
    /// Operations refused
    pub rejected: u64,
    /// Threads created
    pub threads_spawned: u64,
    /// Operations currently executing
    pub running: usize,
    /// Operations waiting for a worker
    pub queued: usize,
    /// Worker threads alive
    pub workers: usize,
}

/// Creates named worker threads; replaceable so spawn failure can be tested
pub(crate) type SpawnFn = Arc<
    dyn Fn(String, Box<dyn FnOnce() + Send + 'static>) -> std::io::Result<JoinHandle<()>>
        + Send
        + Sync,
>;

pub(crate) fn os_spawner() -> SpawnFn {
    Arc::new(|name, body| thread::Builder::new().name(name).spawn(body))
}

thread_local! {
    static ON_WORKER: Cell<bool> = const { Cell::new(false) };
}

/// Run `f` marked as executing on a scheduler worker
pub(crate) fn as_worker<F: FnOnce()>(f: F) {
    ON_WORKER.with(|flag| flag.set(true));
    f();
    ON_WORKER.with(|flag| flag.set(false));
}

/// Whether the current thread is executing a job
///
/// Shutdown cannot wait for the job that asked for it.
pub(crate) fn on_worker_thread() -> bool {
    ON_WORKER.with(|flag| flag.get())
}

/// Join every handle except the calling thread's own
pub(crate) fn join_all(handles: Vec<JoinHandle<()>>) {
    let current = thread::current().id();
    for handle in handles {
        if handle.thread().id() == current {
            continue;
        }
        if handle.join().is_err() {
            tracing::warn!("worker thread panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn queued(priority: i32, handle: u64) -> QueuedJob {
        QueuedJob {
            priority,
            handle: AsyncHandle::from_raw(handle),
        }
    }

    #[test]
    fn test_higher_priority_first() {
        let mut queue = PriorityJobQueue::new();
        queue.push(queued(5, 1));
        queue.push(queued(1, 2));
        queue.push(queued(9, 3));

        assert_eq!(queue.pop().unwrap().handle.as_u64(), 3);
        assert_eq!(queue.pop().unwrap().handle.as_u64(), 1);
        assert_eq!(queue.pop().unwrap().handle.as_u64(), 2);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_equal_priority_is_fifo() {
        let mut queue = PriorityJobQueue::new();
        queue.push(queued(5, 7));
        queue.push(queued(5, 3));
        queue.push(queued(5, 4));

        assert_eq!(queue.drain().iter().map(|h| h.as_u64()).collect::<Vec<_>>(), vec![3, 4, 7]);
    }

    #[test]
    fn test_remove_queued_handle() {
        let mut queue = PriorityJobQueue::new();
        queue.push(queued(0, 1));
        queue.push(queued(0, 2));

        assert!(queue.remove(AsyncHandle::from_raw(1)));
        assert!(!queue.remove(AsyncHandle::from_raw(1)));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_stats_snapshot() {
        let stats = SchedulerStats::default();
        stats.scheduled.fetch_add(2, Ordering::Relaxed);
        stats.run(|| {});
        let snap = stats.snapshot();
        assert_eq!(snap.scheduled, 2);
        assert_eq!(snap.executed, 1);
        assert_eq!(snap.running, 0);
    }

    proptest! {
        #[test]
        fn prop_pop_order_is_priority_then_handle(
            jobs in proptest::collection::vec((-10i32..10, 1u64..10_000), 0..64)
        ) {
            let mut queue = PriorityJobQueue::new();
            let mut expected: Vec<QueuedJob> = Vec::new();
            for (priority, handle) in jobs {
                if expected.iter().any(|j| j.handle.as_u64() == handle) {
                    continue;
                }
                let job = queued(priority, handle);
                queue.push(job);
                expected.push(job);
            }
            expected.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.handle.cmp(&b.handle)));

            let popped: Vec<QueuedJob> = std::iter::from_fn(|| queue.pop()).collect();
            prop_assert_eq!(popped, expected);
        }
    }
}
