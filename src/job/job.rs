//! Job records
//!
//! A [`Job`] owns the pending operation payload behind its own exclusive
//! lock. The lock can only be taken through the registry (see
//! [`super::RegistryGuard::lock_job`]), which keeps the registry-then-job
//! lock order in one place.

use super::AsyncHandle;
use crate::error::{Result, VfsError};
use crate::fs::{FileOp, FileState};
use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A one-shot unit of work executed on a worker thread
pub type TaskFn = Box<dyn FnOnce(&JobContext) -> Result<()> + Send + 'static>;

/// Deferred callback run by the worker after the job lock is released
pub(crate) type Notification = Box<dyn FnOnce() + Send + 'static>;

/// Terminal state of a job, delivered exactly once per job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// The job ran to completion
    Completed,
    /// The job ran and failed
    Failed(String),
    /// The job was cancelled before or while running
    Cancelled,
    /// The scheduler refused the job
    Rejected(String),
}

impl JobOutcome {
    /// Whether this outcome is a success
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed)
    }

    pub(crate) fn from_result(result: &Result<()>) -> Self {
        match result {
            Ok(()) => Self::Completed,
            Err(VfsError::Cancelled) => Self::Cancelled,
            Err(e) => Self::Failed(e.to_string()),
        }
    }
}

/// Returned from every submission: the handle plus the job's terminal outcome
#[derive(Debug)]
pub struct JobTicket {
    handle: AsyncHandle,
    outcome: Receiver<JobOutcome>,
}

impl JobTicket {
    /// Handle identifying the job
    pub fn handle(&self) -> AsyncHandle {
        self.handle
    }

    /// Block until the job reaches its terminal state
    pub fn wait(self) -> JobOutcome {
        // The completion slot delivers on drop, so a closed channel without a
        // value cannot happen; map it to Cancelled all the same.
        self.outcome.recv().unwrap_or(JobOutcome::Cancelled)
    }

    /// Wait up to `timeout` for the terminal state
    pub fn wait_timeout(&self, timeout: Duration) -> Option<JobOutcome> {
        match self.outcome.recv_timeout(timeout) {
            Ok(outcome) => Some(outcome),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(JobOutcome::Cancelled),
        }
    }

    /// Poll for the terminal state without blocking
    pub fn try_outcome(&self) -> Option<JobOutcome> {
        match self.outcome.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(JobOutcome::Cancelled),
        }
    }
}

/// Cooperative cancellation flag shared between the caller and the payload
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// Create an unset flag
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Check whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Execution context handed to a running payload
#[derive(Debug, Clone)]
pub struct JobContext {
    handle: AsyncHandle,
    cancel: CancelFlag,
}

impl JobContext {
    pub(crate) fn new(handle: AsyncHandle, cancel: CancelFlag) -> Self {
        Self { handle, cancel }
    }

    /// Handle of the job being executed
    pub fn handle(&self) -> AsyncHandle {
        self.handle
    }

    /// Whether the caller asked for cancellation
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Return `Err(Cancelled)` once cancellation has been requested
    pub fn check_cancelled(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(VfsError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Shared cancellation flag, for handing to long-running loops
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }
}

/// Operation payload waiting for a worker
pub(crate) enum JobOp {
    Task(TaskFn),
    File(FileOp),
}

/// What one execution of a payload produced
pub(crate) struct Execution {
    pub complete: bool,
    pub outcome: JobOutcome,
    pub notify: Option<Notification>,
}

/// Sends the terminal outcome; sends `Cancelled` if dropped unsent
struct Completion(Option<Sender<JobOutcome>>);

impl Completion {
    fn deliver(&mut self, outcome: JobOutcome) {
        if let Some(tx) = self.0.take() {
            let _ = tx.send(outcome);
        }
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        self.deliver(JobOutcome::Cancelled);
    }
}

/// State guarded by the job lock
pub(crate) struct JobSlot {
    pending: Option<JobOp>,
    file: FileState,
    complete: bool,
    completion: Completion,
}

impl JobSlot {
    pub(crate) fn take_pending(&mut self) -> Option<JobOp> {
        self.pending.take()
    }

    pub(crate) fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub(crate) fn is_complete(&self) -> bool {
        self.complete
    }

    /// Queue the next operation of a multi-step job
    pub(crate) fn set_pending(&mut self, handle: AsyncHandle, op: JobOp) -> Result<()> {
        if self.complete {
            return Err(VfsError::UnknownHandle(handle.as_u64()));
        }
        if self.pending.is_some() {
            return Err(VfsError::Busy(handle.as_u64()));
        }
        self.pending = Some(op);
        Ok(())
    }

    /// Run one payload; panics become a failed, completed job
    pub(crate) fn execute(&mut self, op: JobOp, ctx: &JobContext) -> Execution {
        match op {
            JobOp::Task(task) => {
                let result = catch_unwind(AssertUnwindSafe(|| task(ctx)))
                    .unwrap_or_else(|panic| Err(VfsError::Panicked(panic_message(&*panic))));
                self.complete = true;
                Execution {
                    complete: true,
                    outcome: JobOutcome::from_result(&result),
                    notify: None,
                }
            }
            JobOp::File(op) => {
                let file = &mut self.file;
                let executed = catch_unwind(AssertUnwindSafe(|| op.execute(file, ctx)));
                let execution = executed.unwrap_or_else(|panic| Execution {
                    complete: true,
                    outcome: JobOutcome::Failed(panic_message(&*panic)),
                    notify: None,
                });
                self.complete = execution.complete;
                execution
            }
        }
    }

    /// Mark the job complete and deliver its outcome
    pub(crate) fn finish(&mut self, outcome: JobOutcome) {
        self.complete = true;
        self.pending = None;
        self.file = FileState::default();
        self.completion.deliver(outcome);
    }
}

/// One scheduled asynchronous operation
pub struct Job {
    handle: AsyncHandle,
    priority: i32,
    cancel: CancelFlag,
    pub(super) slot: Mutex<JobSlot>,
}

impl Job {
    pub(crate) fn new(handle: AsyncHandle, priority: i32, op: JobOp) -> (Arc<Job>, JobTicket) {
        let (tx, rx) = bounded(1);
        let job = Arc::new(Job {
            handle,
            priority,
            cancel: CancelFlag::new(),
            slot: Mutex::new(JobSlot {
                pending: Some(op),
                file: FileState::default(),
                complete: false,
                completion: Completion(Some(tx)),
            }),
        });
        (job, JobTicket { handle, outcome: rx })
    }

    /// Handle of this job
    pub fn handle(&self) -> AsyncHandle {
        self.handle
    }

    /// Scheduling priority (higher runs sooner)
    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// Request cooperative cancellation of a running payload
    pub fn request_cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether cancellation was requested
    pub fn is_cancel_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub(crate) fn context(&self) -> JobContext {
        JobContext::new(self.handle, self.cancel.clone())
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("handle", &self.handle)
            .field("priority", &self.priority)
            .field("cancelled", &self.is_cancel_requested())
            .finish()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
