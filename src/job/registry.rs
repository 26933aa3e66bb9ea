//! Registry of live jobs
//!
//! The registry is the single source of truth for whether a job is still
//! alive. Its lock is always taken before a job lock: the only way to lock a
//! job is [`RegistryGuard::lock_job`] / [`RegistryGuard::try_lock_job`], so
//! holding a [`JobGuard`] implies the registry lock was held when it was
//! acquired.

use super::job::{Job, JobSlot};
use super::AsyncHandle;
use crate::error::{Result, VfsError};
use parking_lot::{Mutex, MutexGuard};
use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

struct RegistryState {
    jobs: HashMap<AsyncHandle, Arc<Job>>,
    shutting_down: bool,
}

/// Handle → job directory with its own lock
pub struct JobRegistry {
    state: Mutex<RegistryState>,
}

impl JobRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RegistryState {
                jobs: HashMap::new(),
                shutting_down: false,
            }),
        }
    }

    /// Acquire the registry lock
    pub fn lock(&self) -> RegistryGuard<'_> {
        RegistryGuard {
            state: self.state.lock(),
        }
    }

    /// Number of live jobs
    pub fn len(&self) -> usize {
        self.state.lock().jobs.len()
    }

    /// Whether no job is live
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Start rejecting insertions
    pub fn begin_shutdown(&self) {
        self.state.lock().shutting_down = true;
    }

    /// Whether insertions are being rejected
    pub fn is_shutting_down(&self) -> bool {
        self.state.lock().shutting_down
    }

    /// Remove every remaining job; used for final teardown
    pub fn drain(&self) -> Vec<Arc<Job>> {
        let mut state = self.state.lock();
        state.jobs.drain().map(|(_, job)| job).collect()
    }
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Proof that the registry lock is held
pub struct RegistryGuard<'a> {
    state: MutexGuard<'a, RegistryState>,
}

impl RegistryGuard<'_> {
    /// Insert a new job; rejected once shutdown has begun
    pub fn insert(&mut self, job: Arc<Job>) -> Result<()> {
        if self.state.shutting_down {
            return Err(VfsError::ShuttingDown);
        }
        self.state.jobs.insert(job.handle(), job);
        Ok(())
    }

    /// Look up a live job
    pub fn lookup(&self, handle: AsyncHandle) -> Option<Arc<Job>> {
        self.state.jobs.get(&handle).cloned()
    }

    /// Remove a job; removing an absent handle is a no-op
    pub fn remove(&mut self, handle: AsyncHandle) -> Option<Arc<Job>> {
        self.state.jobs.remove(&handle)
    }

    /// Whether the handle is live
    pub fn contains(&self, handle: AsyncHandle) -> bool {
        self.state.jobs.contains_key(&handle)
    }

    /// Number of live jobs
    pub fn len(&self) -> usize {
        self.state.jobs.len()
    }

    /// Whether no job is live
    pub fn is_empty(&self) -> bool {
        self.state.jobs.is_empty()
    }

    /// Whether insertions are being rejected
    pub fn is_shutting_down(&self) -> bool {
        self.state.shutting_down
    }

    /// Snapshot of live handles
    pub fn handles(&self) -> Vec<AsyncHandle> {
        self.state.jobs.keys().copied().collect()
    }

    /// Lock a job while holding the registry lock
    ///
    /// The returned guard borrows the job, not the registry guard, so the
    /// registry lock may be released while the job stays locked.
    pub(crate) fn lock_job<'j>(&self, job: &'j Job) -> JobGuard<'j> {
        JobGuard {
            job,
            slot: job.slot.lock(),
        }
    }

    /// Lock a job only if no worker currently holds it
    pub(crate) fn try_lock_job<'j>(&self, job: &'j Job) -> Option<JobGuard<'j>> {
        job.slot.try_lock().map(|slot| JobGuard { job, slot })
    }
}

/// Exclusive access to one job's payload and state
pub(crate) struct JobGuard<'j> {
    job: &'j Job,
    slot: MutexGuard<'j, JobSlot>,
}

impl JobGuard<'_> {
    pub(crate) fn job(&self) -> &Job {
        self.job
    }
}

impl Deref for JobGuard<'_> {
    type Target = JobSlot;

    fn deref(&self) -> &JobSlot {
        &self.slot
    }
}

impl DerefMut for JobGuard<'_> {
    fn deref_mut(&mut self) -> &mut JobSlot {
        &mut self.slot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{HandleAllocator, JobOp, JobOutcome};

    fn new_job(alloc: &HandleAllocator) -> (Arc<Job>, crate::job::JobTicket) {
        Job::new(alloc.allocate(), 0, JobOp::Task(Box::new(|_| Ok(()))))
    }

    #[test]
    fn test_insert_lookup_remove() {
        let registry = JobRegistry::new();
        let alloc = HandleAllocator::new();
        let (job, _ticket) = new_job(&alloc);
        let handle = job.handle();

        registry.lock().insert(job).unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.lock().lookup(handle).is_some());

        assert!(registry.lock().remove(handle).is_some());
        assert!(registry.lock().lookup(handle).is_none());
        assert!(registry.lock().remove(handle).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_insert_rejected_during_shutdown() {
        let registry = JobRegistry::new();
        let alloc = HandleAllocator::new();
        registry.begin_shutdown();

        let (job, ticket) = new_job(&alloc);
        let err = registry.lock().insert(job).unwrap_err();
        assert!(matches!(err, VfsError::ShuttingDown));
        assert!(registry.is_empty());
        // The rejected job was dropped, so its ticket resolves
        assert_eq!(ticket.wait(), JobOutcome::Cancelled);
    }

    #[test]
    fn test_job_lock_outlives_registry_guard() {
        let registry = JobRegistry::new();
        let alloc = HandleAllocator::new();
        let (job, _ticket) = new_job(&alloc);
        let handle = job.handle();
        registry.lock().insert(job).unwrap();

        let reg = registry.lock();
        let job = reg.lookup(handle).unwrap();
        let guard = reg.lock_job(&job);
        drop(reg);

        // Registry is usable while the job is locked, but the job is not
        let reg = registry.lock();
        assert!(reg.try_lock_job(&job).is_none());
        drop(reg);
        assert!(guard.has_pending());
        drop(guard);

        assert!(registry.lock().try_lock_job(&job).is_some());
    }
}
