//! Engine context
//!
//! The [`Engine`] owns the job registry and one scheduler. Every public
//! operation becomes a job: it is registered first, then handed to the
//! scheduler, and its [`JobTicket`] receives exactly one outcome.
//!
//! Shutdown runs in two phases. The first marks the registry and the
//! scheduler as shutting down (new work is rejected without blocking) and
//! cancels queued jobs. The second polls until the registry is empty, then
//! joins the worker threads.

use super::per_job::ThreadPerJobScheduler;
use super::pool::{PoolConfig, ThreadPoolScheduler};
use super::scheduler::{on_worker_thread, Scheduler, SchedulerSnapshot};
use crate::config::{EngineConfig, SchedulerKind};
use crate::dir::{DirectoryEnumerator, ListCallback, ListOptions};
use crate::error::{Result, VfsError};
use crate::fs::{FileOp, OpenMode, ReadCallback, SeekCallback, StatusCallback, WriteCallback};
use crate::job::{
    runner, AsyncHandle, HandleAllocator, Job, JobContext, JobOp, JobRegistry, JobTicket,
};
use crate::xfer::{self, PolicyCallback, ProgressCallback, XferJob, XferRequest};
use std::io::SeekFrom;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{debug, info, trace, warn};

/// Asynchronous filesystem engine
pub struct Engine {
    config: EngineConfig,
    registry: Arc<JobRegistry>,
    scheduler: Box<dyn Scheduler>,
    handles: HandleAllocator,
    shut_down: AtomicBool,
}

impl Engine {
    /// Validate `config` and start an engine; worker threads start lazily
    pub fn init(config: EngineConfig) -> Result<Self> {
        config.validate()?;

        let registry = Arc::new(JobRegistry::new());
        let scheduler: Box<dyn Scheduler> = match config.scheduler {
            SchedulerKind::Pool => Box::new(ThreadPoolScheduler::new(
                Arc::clone(&registry),
                PoolConfig {
                    max_workers: config.max_workers,
                    idle_timeout: config.idle_timeout(),
                },
            )?),
            SchedulerKind::ThreadPerJob => {
                Box::new(ThreadPerJobScheduler::new(Arc::clone(&registry)))
            }
        };
        Ok(Self::assemble(config, registry, scheduler))
    }

    fn assemble(
        config: EngineConfig,
        registry: Arc<JobRegistry>,
        scheduler: Box<dyn Scheduler>,
    ) -> Self {
        info!(
            scheduler = scheduler.name(),
            limit = ?scheduler.limit(),
            "engine started"
        );

        Self {
            config,
            registry,
            scheduler,
            handles: HandleAllocator::new(),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Configuration the engine was started with
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run `task` on a worker thread
    pub fn submit<F>(&self, priority: i32, task: F) -> Result<JobTicket>
    where
        F: FnOnce(&JobContext) -> Result<()> + Send + 'static,
    {
        self.submit_op(priority, JobOp::Task(Box::new(task)))
    }

    pub(crate) fn submit_op(&self, priority: i32, op: JobOp) -> Result<JobTicket> {
        let handle = self.handles.allocate();
        let (job, ticket) = Job::new(handle, priority, op);
        if let Err(e) = self.registry.lock().insert(job) {
            debug!(%handle, "submission refused, shutting down");
            return Err(e);
        }

        if let Err(e) = self.scheduler.schedule(handle, priority) {
            runner::reject(&self.registry, handle, &e.to_string());
            return Err(e);
        }
        trace!(%handle, priority, "job submitted");
        Ok(ticket)
    }

    /// Cancel an operation; unknown or finished handles are ignored
    pub fn cancel(&self, handle: AsyncHandle) -> Result<()> {
        if !runner::cancel(&self.registry, handle) {
            trace!(%handle, "cancel of a job that is not live");
        }
        Ok(())
    }

    /// Change the worker cap (thread pool only)
    pub fn set_concurrency_limit(&self, limit: usize) -> Result<()> {
        self.scheduler.set_limit(limit)
    }

    /// Current worker cap, if the scheduler has one
    pub fn concurrency_limit(&self) -> Option<usize> {
        self.scheduler.limit()
    }

    /// Number of jobs still registered
    pub fn live_jobs(&self) -> usize {
        self.registry.len()
    }

    /// Whether `handle` is still registered
    pub fn is_live(&self, handle: AsyncHandle) -> bool {
        self.registry.lock().contains(handle)
    }

    /// Scheduler counters
    pub fn scheduler_stats(&self) -> SchedulerSnapshot {
        self.scheduler.stats()
    }

    /// Listing options using the configured batch size
    pub fn list_options(&self) -> ListOptions {
        ListOptions::with_batch(self.config.items_per_notification)
    }

    /// Start a copy, move or delete
    ///
    /// `progress` sees every phase change on the worker thread; `policy`
    /// answers error and overwrite questions. Requests that can never work
    /// are rejected here, before a job exists.
    pub fn xfer(
        &self,
        request: XferRequest,
        progress: ProgressCallback,
        policy: Option<PolicyCallback>,
    ) -> Result<JobTicket> {
        xfer::validate(&request)?;

        let buffer_size = self.config.buffer_size;
        let update_interval = self.config.update_interval();
        let priority = request.priority;
        self.submit(priority, move |ctx| {
            XferJob::new(ctx, request, progress, policy, buffer_size, update_interval).run()
        })
    }

    /// List a directory in batches
    pub fn enumerate_directory(
        &self,
        path: impl Into<PathBuf>,
        options: ListOptions,
        priority: i32,
        callback: ListCallback,
    ) -> Result<JobTicket> {
        options.validate()?;
        let path = path.into();
        self.submit(priority, move |ctx| {
            DirectoryEnumerator::new(ctx, path, options).run(callback)
        })
    }

    /// Open a file; the returned ticket completes when the file is closed
    pub fn open(
        &self,
        path: impl Into<PathBuf>,
        mode: OpenMode,
        priority: i32,
        callback: StatusCallback,
    ) -> Result<JobTicket> {
        let op = FileOp::Open {
            path: path.into(),
            mode,
            callback,
        };
        self.submit_op(priority, JobOp::File(op))
    }

    /// Read up to `len` bytes from an open file
    pub fn read(&self, handle: AsyncHandle, len: usize, callback: ReadCallback) -> Result<()> {
        self.queue_op(handle, FileOp::Read { len, callback })
    }

    /// Write `data` to an open file
    pub fn write(&self, handle: AsyncHandle, data: Vec<u8>, callback: WriteCallback) -> Result<()> {
        self.queue_op(handle, FileOp::Write { data, callback })
    }

    /// Move the position of an open file
    pub fn seek(&self, handle: AsyncHandle, pos: SeekFrom, callback: SeekCallback) -> Result<()> {
        self.queue_op(handle, FileOp::Seek { pos, callback })
    }

    /// Close an open file, completing its job
    pub fn close(&self, handle: AsyncHandle, callback: StatusCallback) -> Result<()> {
        self.queue_op(handle, FileOp::Close { callback })
    }

    fn queue_op(&self, handle: AsyncHandle, op: FileOp) -> Result<()> {
        let priority = {
            let reg = self.registry.lock();
            if reg.is_shutting_down() {
                return Err(VfsError::ShuttingDown);
            }
            let job = reg
                .lookup(handle)
                .ok_or(VfsError::UnknownHandle(handle.as_u64()))?;
            let mut slot = reg
                .try_lock_job(&job)
                .ok_or(VfsError::Busy(handle.as_u64()))?;
            slot.set_pending(handle, JobOp::File(op))?;
            job.priority()
        };

        if let Err(e) = self.scheduler.schedule(handle, priority) {
            let reg = self.registry.lock();
            if let Some(job) = reg.lookup(handle) {
                if let Some(mut slot) = reg.try_lock_job(&job) {
                    slot.take_pending();
                }
            }
            return Err(e);
        }
        trace!(%handle, "file operation queued");
        Ok(())
    }

    /// Stop accepting work, cancel queued jobs and wait for running ones
    ///
    /// Queued jobs are cancelled rather than run: their tickets receive
    /// [`JobOutcome::Cancelled`](crate::job::JobOutcome::Cancelled). Idempotent. Called from a worker thread, only the first phase runs:
    /// waiting there would wait for the caller itself.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(live = self.registry.len(), "engine shutting down");

        self.registry.begin_shutdown();
        let queued = self.scheduler.begin_shutdown();
        for handle in &queued {
            runner::cancel(&self.registry, *handle);
        }
        debug!(cancelled = queued.len(), "queued jobs cancelled");

        if on_worker_thread() {
            warn!("shutdown from a worker thread; not waiting for running jobs");
            return;
        }

        let poll = self.config.shutdown_poll_interval();
        let mut rounds: u64 = 0;
        loop {
            runner::reap_idle(&self.registry);
            let live = self.registry.len();
            if live == 0 {
                break;
            }
            rounds += 1;
            if rounds % 500 == 0 {
                debug!(live, "waiting for running jobs");
            }
            thread::yield_now();
            thread::sleep(poll);
        }

        self.scheduler.join();
        let leftover = self.registry.drain();
        if !leftover.is_empty() {
            warn!(count = leftover.len(), "jobs left after shutdown");
        }
        info!(stats = ?self.scheduler.stats(), "engine shut down");
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown();
    }
}
