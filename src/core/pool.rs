//! Bounded thread pool scheduler
//!
//! Queued jobs wait in a priority heap. Workers are spawned lazily up to the
//! concurrency cap and exit after sitting idle for `idle_timeout`, or as soon
//! as they are surplus after the cap was lowered. Jobs that are already
//! queued or running are never disturbed by a limit change.

use super::scheduler::{
    as_worker, join_all, os_spawner, PriorityJobQueue, QueuedJob, Scheduler, SchedulerSnapshot,
    SchedulerStats, SpawnFn,
};
use crate::error::{Result, VfsError};
use crate::job::{runner, AsyncHandle, JobRegistry};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// The cap can never go below this
pub const MIN_WORKERS: usize = 2;

/// Thread pool configuration
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum concurrently running jobs
    pub max_workers: usize,
    /// How long a worker waits for work before exiting
    pub idle_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_workers: num_cpus::get().max(MIN_WORKERS),
            idle_timeout: Duration::from_secs(30),
        }
    }
}

struct PoolState {
    queue: PriorityJobQueue,
    workers: usize,
    idle: usize,
    max_workers: usize,
    next_worker_id: usize,
    shutting_down: bool,
}

struct PoolShared {
    registry: Arc<JobRegistry>,
    state: Mutex<PoolState>,
    work_ready: Condvar,
    idle_timeout: Duration,
    threads: Mutex<Vec<JoinHandle<()>>>,
    stats: SchedulerStats,
    spawn: SpawnFn,
}

/// Runs jobs on a bounded, lazily grown set of worker threads
pub struct ThreadPoolScheduler {
    shared: Arc<PoolShared>,
}

impl ThreadPoolScheduler {
    /// Create a pool; no thread exists until the first job arrives
    pub fn new(registry: Arc<JobRegistry>, config: PoolConfig) -> Result<Self> {
        Self::with_spawner(registry, config, os_spawner())
    }

    pub(crate) fn with_spawner(
        registry: Arc<JobRegistry>,
        config: PoolConfig,
        spawn: SpawnFn,
    ) -> Result<Self> {
        check_limit(config.max_workers)?;
        Ok(Self {
            shared: Arc::new(PoolShared {
                registry,
                state: Mutex::new(PoolState {
                    queue: PriorityJobQueue::new(),
                    workers: 0,
                    idle: 0,
                    max_workers: config.max_workers,
                    next_worker_id: 0,
                    shutting_down: false,
                }),
                work_ready: Condvar::new(),
                idle_timeout: config.idle_timeout,
                threads: Mutex::new(Vec::new()),
                stats: SchedulerStats::default(),
                spawn,
            }),
        })
    }

    /// Number of worker threads currently alive
    pub fn worker_count(&self) -> usize {
        self.shared.state.lock().workers
    }

    /// Number of jobs waiting for a worker
    pub fn queued(&self) -> usize {
        self.shared.state.lock().queue.len()
    }
}

fn check_limit(limit: usize) -> Result<()> {
    if limit < MIN_WORKERS {
        return Err(VfsError::LimitBelowMinimum {
            requested: limit,
            minimum: MIN_WORKERS,
        });
    }
    Ok(())
}

impl PoolShared {
    /// Add workers while queued work outnumbers idle workers
    fn grow(self: &Arc<Self>, state: &mut PoolState) -> Result<()> {
        while state.workers < state.max_workers && state.queue.len() > state.idle {
            self.spawn_worker(state)?;
        }
        Ok(())
    }

    fn spawn_worker(self: &Arc<Self>, state: &mut PoolState) -> Result<()> {
        let id = state.next_worker_id;
        let shared = Arc::clone(self);
        let handle = (self.spawn)(
            format!("asyncvfs-worker-{}", id),
            Box::new(move || shared.worker_loop(id)),
        )
        .map_err(|e| VfsError::ThreadSpawn(e.to_string()))?;

        state.next_worker_id += 1;
        state.workers += 1;
        self.stats.threads_spawned.fetch_add(1, Ordering::Relaxed);

        let mut threads = self.threads.lock();
        threads.retain(|t| !t.is_finished());
        threads.push(handle);
        trace!(worker = id, workers = state.workers, "worker spawned");
        Ok(())
    }

    fn next_job(&self, id: usize) -> Option<QueuedJob> {
        let mut state = self.state.lock();
        loop {
            if state.workers > state.max_workers {
                state.workers -= 1;
                debug!(worker = id, "surplus worker exiting");
                return None;
            }
            if let Some(job) = state.queue.pop() {
                return Some(job);
            }
            if state.shutting_down {
                state.workers -= 1;
                return None;
            }

            state.idle += 1;
            let timed_out = self
                .work_ready
                .wait_for(&mut state, self.idle_timeout)
                .timed_out();
            state.idle -= 1;

            if timed_out && state.queue.is_empty() {
                state.workers -= 1;
                trace!(worker = id, "idle worker exiting");
                return None;
            }
        }
    }

    fn worker_loop(self: Arc<Self>, id: usize) {
        trace!(worker = id, "worker started");
        while let Some(job) = self.next_job(id) {
            trace!(worker = id, handle = %job.handle, priority = job.priority, "running job");
            self.stats
                .run(|| as_worker(|| runner::run_queued(&self.registry, job.handle)));
        }
    }
}

impl Scheduler for ThreadPoolScheduler {
    fn name(&self) -> &'static str {
        "thread-pool"
    }

    fn schedule(&self, handle: AsyncHandle, priority: i32) -> Result<()> {
        let shared = &self.shared;
        let mut state = shared.state.lock();
        if state.shutting_down {
            shared.stats.rejected.fetch_add(1, Ordering::Relaxed);
            return Err(VfsError::ShuttingDown);
        }

        state.queue.push(QueuedJob { priority, handle });
        if state.idle > 0 {
            shared.work_ready.notify_one();
        }

        if let Err(e) = shared.grow(&mut state) {
            if state.workers == 0 {
                state.queue.remove(handle);
                shared.stats.rejected.fetch_add(1, Ordering::Relaxed);
                return Err(e);
            }
            // Existing workers will get to it
            warn!(%handle, error = %e, "could not grow pool");
        }

        shared.stats.scheduled.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn set_limit(&self, limit: usize) -> Result<()> {
        check_limit(limit)?;
        let shared = &self.shared;
        let mut state = shared.state.lock();
        let previous = state.max_workers;
        state.max_workers = limit;
        debug!(previous, limit, "concurrency limit changed");

        if limit < previous {
            // Idle surplus workers wake up and exit; busy ones exit after their job
            shared.work_ready.notify_all();
        } else if let Err(e) = shared.grow(&mut state) {
            warn!(error = %e, "could not grow pool after raising limit");
        }
        Ok(())
    }

    fn limit(&self) -> Option<usize> {
        Some(self.shared.state.lock().max_workers)
    }

    fn begin_shutdown(&self) -> Vec<AsyncHandle> {
        let mut state = self.shared.state.lock();
        state.shutting_down = true;
        let drained = state.queue.drain();
        self.shared.work_ready.notify_all();
        debug!(drained = drained.len(), "pool stopped accepting work");
        drained
    }

    fn join(&self) {
        let threads = std::mem::take(&mut *self.shared.threads.lock());
        join_all(threads);
    }

    fn stats(&self) -> SchedulerSnapshot {
        let mut snapshot = self.shared.stats.snapshot();
        let state = self.shared.state.lock();
        snapshot.queued = state.queue.len();
        snapshot.workers = state.workers;
        snapshot
    }
}
