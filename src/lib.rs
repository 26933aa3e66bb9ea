//! # asyncvfs - Asynchronous Filesystem Job Engine
//!
//! asyncvfs runs filesystem operations on worker threads and reports back
//! through callbacks. Every operation is a job with an [`AsyncHandle`]; every
//! job delivers exactly one [`JobOutcome`] to its [`JobTicket`].
//!
//! ## Features
//!
//! - **Two schedulers**: a bounded, priority-ordered thread pool or one
//!   thread per job, behind one [`core::Scheduler`] trait
//! - **Cancellation**: queued jobs never run, running jobs see a cancel flag
//! - **Graceful shutdown**: new work is rejected, queued work cancelled,
//!   running work awaited
//! - **Phased transfers**: copy, move and delete with error and overwrite
//!   policies, unique-name conflict resolution and throttled progress
//! - **File jobs**: open, read, write, seek and close on one handle
//! - **Batched listings**: directory entries delivered in fixed-size batches
//!
//! ## Quick Start
//!
//! ```no_run
//! use asyncvfs::prelude::*;
//! use std::path::PathBuf;
//!
//! let engine = Engine::init(EngineConfig::default()).unwrap();
//!
//! let request = XferRequest::copy(
//!     vec![PathBuf::from("/source/dir")],
//!     vec![PathBuf::from("/destination/dir")],
//! )
//! .recursive(true)
//! .with_overwrite_mode(OverwriteMode::Replace);
//!
//! let (progress, reports) = progress_channel();
//! let ticket = engine.xfer(request, progress, None).unwrap();
//!
//! for info in reports.iter() {
//!     println!("{} {:.0}%", info.phase, info.fraction() * 100.0);
//!     if info.phase == XferPhase::Completed {
//!         break;
//!     }
//! }
//! assert!(ticket.wait().is_success());
//! engine.shutdown();
//! ```
//!
//! ## Policies
//!
//! ```no_run
//! use asyncvfs::prelude::*;
//! use std::path::PathBuf;
//!
//! let engine = Engine::init(EngineConfig::default()).unwrap();
//! let request = XferRequest::move_items(
//!     vec![PathBuf::from("/inbox/report.pdf")],
//!     vec![PathBuf::from("/archive/report.pdf")],
//! )
//! .with_error_mode(ErrorMode::Query);
//!
//! let policy: PolicyCallback = Box::new(|info| match info.status {
//!     XferStatus::Overwrite => XferDecision::Replace,
//!     _ => XferDecision::Skip,
//! });
//! let (progress, _reports) = progress_channel();
//! engine.xfer(request, progress, Some(policy)).unwrap().wait();
//! ```
//!
//! ## File Jobs
//!
//! ```no_run
//! use asyncvfs::prelude::*;
//!
//! let engine = Engine::init(EngineConfig::default()).unwrap();
//! let ticket = engine
//!     .open("/tmp/notes.txt", OpenMode::Read, 0, Box::new(|handle, result| {
//!         println!("{} opened: {:?}", handle, result.is_ok());
//!     }))
//!     .unwrap();
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod core;
pub mod dir;
pub mod error;
pub mod fs;
pub mod job;
pub mod progress;
pub mod xfer;

// Re-export commonly used types
pub use crate::core::Engine;
pub use config::EngineConfig;
pub use error::{Result, VfsError};
pub use job::{AsyncHandle, JobOutcome, JobTicket};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports
pub mod prelude {
    //! Convenient re-exports for common usage
    //!
    //! ```no_run
    //! use asyncvfs::prelude::*;
    //! ```

    pub use crate::config::{EngineConfig, SchedulerKind};
    pub use crate::core::{Engine, Scheduler, SchedulerSnapshot};
    pub use crate::dir::{ListAction, ListCallback, ListOptions, ListStatus};
    pub use crate::error::{Result, VfsError};
    pub use crate::fs::{FileInfo, FileKind, OpenMode};
    pub use crate::job::{AsyncHandle, JobContext, JobOutcome, JobTicket};
    pub use crate::xfer::{
        progress_channel, ErrorMode, OverwriteMode, PolicyCallback, ProgressAction,
        ProgressCallback, XferDecision, XferOptions, XferPhase, XferProgressInfo, XferRequest,
        XferStatus,
    };
}
