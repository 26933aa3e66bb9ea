//! File system layer
//!
//! Local-filesystem primitives used by the engine: metadata snapshots,
//! chunked copies for transfers, and the operations of open-file jobs.

mod file_ops;
mod info;
mod operations;

pub use file_ops::{OpenMode, ReadCallback, SeekCallback, StatusCallback, WriteCallback};
pub(crate) use file_ops::{FileOp, FileState};
pub use info::{FileInfo, FileKind};
pub use operations::*;
