//! One thread per operation
//!
//! Every scheduled operation gets a fresh detached thread. There is no queue
//! and no cap; priorities are ignored.

use super::scheduler::{as_worker, join_all, os_spawner, Scheduler, SchedulerSnapshot, SchedulerStats, SpawnFn};
use crate::error::{Result, VfsError};
use crate::job::{runner, AsyncHandle, JobRegistry};
use parking_lot::Mutex;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, trace};

struct Threads {
    handles: Vec<JoinHandle<()>>,
    shutting_down: bool,
}

/// Spawns a dedicated thread for each operation
pub struct ThreadPerJobScheduler {
    registry: Arc<JobRegistry>,
    threads: Mutex<Threads>,
    stats: Arc<SchedulerStats>,
    spawn: SpawnFn,
}

impl ThreadPerJobScheduler {
    /// Create the scheduler
    pub fn new(registry: Arc<JobRegistry>) -> Self {
        Self::with_spawner(registry, os_spawner())
    }

    pub(crate) fn with_spawner(registry: Arc<JobRegistry>, spawn: SpawnFn) -> Self {
        Self {
            registry,
            threads: Mutex::new(Threads {
                handles: Vec::new(),
                shutting_down: false,
            }),
            stats: Arc::new(SchedulerStats::default()),
            spawn,
        }
    }
}

impl Scheduler for ThreadPerJobScheduler {
    fn name(&self) -> &'static str {
        "thread-per-job"
    }

    fn schedule(&self, handle: AsyncHandle, _priority: i32) -> Result<()> {
        let mut threads = self.threads.lock();
        if threads.shutting_down {
            self.stats.rejected.fetch_add(1, Ordering::Relaxed);
            return Err(VfsError::ShuttingDown);
        }

        let registry = Arc::clone(&self.registry);
        let stats = Arc::clone(&self.stats);
        let spawned = (self.spawn)(
            format!("asyncvfs-job-{}", handle.as_u64()),
            Box::new(move || stats.run(|| as_worker(|| runner::run_queued(&registry, handle)))),
        );
        let thread = match spawned {
            Ok(thread) => thread,
            Err(e) => {
                self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                return Err(VfsError::ThreadSpawn(e.to_string()));
            }
        };

        threads.handles.retain(|t| !t.is_finished());
        threads.handles.push(thread);
        self.stats.threads_spawned.fetch_add(1, Ordering::Relaxed);
        self.stats.scheduled.fetch_add(1, Ordering::Relaxed);
        trace!(%handle, "job thread spawned");
        Ok(())
    }

    fn set_limit(&self, _limit: usize) -> Result<()> {
        Err(VfsError::Unsupported(
            "thread-per-job scheduling has no concurrency limit".to_string(),
        ))
    }

    fn limit(&self) -> Option<usize> {
        None
    }

    fn begin_shutdown(&self) -> Vec<AsyncHandle> {
        self.threads.lock().shutting_down = true;
        debug!("thread-per-job scheduler stopped accepting work");
        Vec::new()
    }

    fn join(&self) {
        let handles = std::mem::take(&mut self.threads.lock().handles);
        join_all(handles);
    }

    fn stats(&self) -> SchedulerSnapshot {
        let mut snapshot = self.stats.snapshot();
        snapshot.workers = snapshot.running;
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{HandleAllocator, Job, JobOp, JobOutcome};

    #[test]
    fn test_each_job_runs_on_its_own_thread() {
        let registry = Arc::new(JobRegistry::new());
        let alloc = HandleAllocator::new();
        let scheduler = ThreadPerJobScheduler::new(Arc::clone(&registry));

        let tickets: Vec<_> = (0..4)
            .map(|_| {
                let (job, ticket) = Job::new(
                    alloc.allocate(),
                    0,
                    JobOp::Task(Box::new(|_| {
                        let name = std::thread::current().name().map(str::to_string);
                        assert!(name.unwrap_or_default().starts_with("asyncvfs-job-"));
                        Ok(())
                    })),
                );
                registry.lock().insert(job).unwrap();
                scheduler.schedule(ticket.handle(), 0).unwrap();
                ticket
            })
            .collect();

        for ticket in tickets {
            assert_eq!(ticket.wait(), JobOutcome::Completed);
        }
        scheduler.join();
        assert_eq!(scheduler.stats().threads_spawned, 4);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_limit_unsupported() {
        let scheduler = ThreadPerJobScheduler::new(Arc::new(JobRegistry::new()));
        assert!(matches!(scheduler.set_limit(8), Err(VfsError::Unsupported(_))));
        assert_eq!(scheduler.limit(), None);
    }

    #[test]
    fn test_spawn_failure_is_reported() {
        let failing: SpawnFn = Arc::new(|_, _| Err(std::io::Error::other("EAGAIN")));
        let scheduler = ThreadPerJobScheduler::with_spawner(Arc::new(JobRegistry::new()), failing);
        let err = scheduler.schedule(AsyncHandle::from_raw(1), 0).unwrap_err();
        assert!(matches!(err, VfsError::ThreadSpawn(m) if m.contains("EAGAIN")));
        assert_eq!(scheduler.stats().rejected, 1);
    }
}
