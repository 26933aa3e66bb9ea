//! Engine core
//!
//! The [`Engine`] context plus the two interchangeable schedulers that run
//! its jobs: a bounded, priority-ordered thread pool and a thread per job.

mod engine;
mod per_job;
mod pool;
mod scheduler;

pub use engine::Engine;
pub use per_job::ThreadPerJobScheduler;
pub use pool::{PoolConfig, ThreadPoolScheduler, MIN_WORKERS};
pub use scheduler::{PriorityJobQueue, QueuedJob, Scheduler, SchedulerSnapshot, SchedulerStats};
