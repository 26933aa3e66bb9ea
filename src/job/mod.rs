//! Jobs, handles and the live-job registry
//!
//! Everything that touches the registry-then-job lock order lives here, so
//! the scheduler backends only decide which thread runs a job.

mod handle;
#[allow(clippy::module_inception)]
mod job;
mod registry;
pub(crate) mod runner;

pub use handle::{AsyncHandle, HandleAllocator};
pub use job::{CancelFlag, Job, JobContext, JobOutcome, JobTicket, TaskFn};
pub(crate) use job::{Execution, JobOp, Notification};
pub use registry::{JobRegistry, RegistryGuard};
