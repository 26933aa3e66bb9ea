//! Shared execution and cancellation sequences
//!
//! Both schedulers call [`run_queued`]; they only differ in which thread
//! runs it. The sequence is:
//! lock registry → lookup → lock job → unlock registry → execute →
//! unlock job → lock registry → (if complete) remove + destroy → unlock
//! registry → run deferred notification.

use super::job::JobOutcome;
use super::{AsyncHandle, JobRegistry};
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::{debug, trace, warn};

/// Execute the pending operation of `handle`, if the job is still live
pub(crate) fn run_queued(registry: &JobRegistry, handle: AsyncHandle) {
    let reg = registry.lock();
    let Some(job) = reg.lookup(handle) else {
        trace!(%handle, "job gone before a worker reached it");
        return;
    };
    let mut slot = reg.lock_job(&job);
    drop(reg);

    let Some(op) = slot.take_pending() else {
        trace!(%handle, "no pending operation");
        return;
    };

    let ctx = slot.job().context();
    let execution = slot.execute(op, &ctx);
    let complete = execution.complete;
    drop(slot);

    let mut reg = registry.lock();
    if complete || job.is_cancel_requested() {
        reg.remove(handle);
        let outcome = if complete {
            execution.outcome
        } else {
            JobOutcome::Cancelled
        };
        debug!(%handle, ?outcome, "job finished");
        // A failed try means a later operation of a cancelled multi-step job
        // is executing; that worker finishes it instead.
        if let Some(mut slot) = reg.try_lock_job(&job) {
            slot.finish(outcome);
        }
        drop(job);
    }
    drop(reg);

    if let Some(notify) = execution.notify {
        if catch_unwind(AssertUnwindSafe(notify)).is_err() {
            warn!(%handle, "completion callback panicked");
        }
    }
}

/// Cancel a job; unknown or finished handles are a no-op
///
/// An idle job (no worker holds its lock) is finished and destroyed at once.
/// A running job is removed from the registry and flagged; the worker
/// executing it destroys it when its payload returns.
pub(crate) fn cancel(registry: &JobRegistry, handle: AsyncHandle) -> bool {
    let mut reg = registry.lock();
    let Some(job) = reg.lookup(handle) else {
        return false;
    };
    let idle = match reg.try_lock_job(&job) {
        // Finished executing, waiting for its worker to destroy it
        Some(slot) if slot.is_complete() => return false,
        Some(mut slot) => {
            job.request_cancel();
            slot.finish(JobOutcome::Cancelled);
            true
        }
        None => {
            job.request_cancel();
            false
        }
    };
    reg.remove(handle);
    debug!(%handle, idle, "job cancelled");
    drop(job);
    true
}

/// Finish a job the scheduler refused; it never ran
pub(crate) fn reject(registry: &JobRegistry, handle: AsyncHandle, reason: &str) {
    let mut reg = registry.lock();
    if let Some(job) = reg.remove(handle) {
        if let Some(mut slot) = reg.try_lock_job(&job) {
            slot.finish(JobOutcome::Rejected(reason.to_string()));
        }
        warn!(%handle, reason, "job rejected");
    }
}

/// Cancel every job that is neither running nor waiting for a worker
///
/// Used while draining: idle multi-step jobs (open files nobody closes)
/// would otherwise keep the registry non-empty forever.
pub(crate) fn reap_idle(registry: &JobRegistry) -> usize {
    let mut reg = registry.lock();
    let mut reaped = 0;
    for handle in reg.handles() {
        let Some(job) = reg.lookup(handle) else {
            continue;
        };
        let idle = match reg.try_lock_job(&job) {
            Some(mut slot) if !slot.has_pending() && !slot.is_complete() => {
                job.request_cancel();
                slot.finish(JobOutcome::Cancelled);
                true
            }
            _ => false,
        };
        if idle {
            reg.remove(handle);
            reaped += 1;
        }
    }
    if reaped > 0 {
        debug!(reaped, "reaped idle jobs during shutdown");
    }
    reaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VfsError;
    use crate::job::{HandleAllocator, Job, JobOp, JobTicket};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    fn submit(
        registry: &JobRegistry,
        alloc: &HandleAllocator,
        f: impl FnOnce(&crate::job::JobContext) -> crate::error::Result<()> + Send + 'static,
    ) -> JobTicket {
        let (job, ticket) = Job::new(alloc.allocate(), 0, JobOp::Task(Box::new(f)));
        registry.lock().insert(job).unwrap();
        ticket
    }

    #[test]
    fn test_run_removes_completed_job() {
        let registry = JobRegistry::new();
        let alloc = HandleAllocator::new();
        let ticket = submit(&registry, &alloc, |_| Ok(()));

        run_queued(&registry, ticket.handle());
        assert!(registry.is_empty());
        assert_eq!(ticket.wait(), JobOutcome::Completed);
    }

    #[test]
    fn test_failed_job_reports_error() {
        let registry = JobRegistry::new();
        let alloc = HandleAllocator::new();
        let ticket = submit(&registry, &alloc, |_| Err(VfsError::invalid("nope")));

        run_queued(&registry, ticket.handle());
        assert!(matches!(ticket.wait(), JobOutcome::Failed(m) if m.contains("nope")));
    }

    #[test]
    fn test_cancel_before_start_skips_payload() {
        let registry = JobRegistry::new();
        let alloc = HandleAllocator::new();
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        let ticket = submit(&registry, &alloc, move |_| {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        });

        assert!(cancel(&registry, ticket.handle()));
        run_queued(&registry, ticket.handle());

        assert!(!ran.load(Ordering::SeqCst));
        assert!(registry.is_empty());
        assert_eq!(ticket.wait(), JobOutcome::Cancelled);
    }

    #[test]
    fn test_cancel_after_completion_is_noop() {
        let registry = JobRegistry::new();
        let alloc = HandleAllocator::new();
        let ticket = submit(&registry, &alloc, |_| Ok(()));
        run_queued(&registry, ticket.handle());

        assert!(!cancel(&registry, ticket.handle()));
        assert_eq!(ticket.wait(), JobOutcome::Completed);
    }

    #[test]
    fn test_reject_delivers_rejected() {
        let registry = JobRegistry::new();
        let alloc = HandleAllocator::new();
        let ticket = submit(&registry, &alloc, |_| Ok(()));

        reject(&registry, ticket.handle(), "no threads");
        assert!(registry.is_empty());
        assert_eq!(ticket.wait(), JobOutcome::Rejected("no threads".into()));
    }
}
