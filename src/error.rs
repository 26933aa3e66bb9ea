//! Error types for asyncvfs
//!
//! This module defines the error type shared by the scheduler, the job
//! registry, file jobs, transfers and directory enumeration.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for asyncvfs operations
#[derive(Error, Debug)]
pub enum VfsError {
    /// I/O error during file operations
    #[error("I/O error at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// File or directory not found
    #[error("Path not found: {0}")]
    NotFound(PathBuf),

    /// Target already exists and policy forbids replacing it
    #[error("Already exists: {0}")]
    AlreadyExists(PathBuf),

    /// A directory was required
    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),

    /// A regular file was required
    #[error("Is a directory: {0}")]
    IsADirectory(PathBuf),

    /// Caller passed arguments that can never succeed
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The engine no longer accepts work
    #[error("Engine is shutting down")]
    ShuttingDown,

    /// A worker thread could not be created
    #[error("Failed to spawn worker thread: {0}")]
    ThreadSpawn(String),

    /// Concurrency limit below the enforced floor
    #[error("Concurrency limit {requested} is below the minimum of {minimum}")]
    LimitBelowMinimum { requested: usize, minimum: usize },

    /// Operation not supported by this scheduler or handle
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// The handle already has an operation pending
    #[error("Handle {0} already has a pending operation")]
    Busy(u64),

    /// Unknown or already finished handle
    #[error("No live job for handle {0}")]
    UnknownHandle(u64),

    /// Operation cancelled by the caller
    #[error("Operation cancelled")]
    Cancelled,

    /// Transfer stopped by the error or overwrite policy
    #[error("Transfer interrupted: {0}")]
    Interrupted(String),

    /// Not enough room at the destination
    #[error("Insufficient disk space at '{path}': need {required} bytes, have {available} bytes")]
    InsufficientSpace {
        path: PathBuf,
        required: u64,
        available: u64,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Job payload panicked on a worker
    #[error("Job panicked: {0}")]
    Panicked(String),
}

impl VfsError {
    /// Create an I/O error with path context
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(path),
            std::io::ErrorKind::AlreadyExists => Self::AlreadyExists(path),
            _ => Self::Io { path, source },
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create an invalid-argument error
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Whether this error means the work was cancelled rather than failed
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Get the path associated with this error, if any
    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            Self::Io { path, .. }
            | Self::NotFound(path)
            | Self::AlreadyExists(path)
            | Self::NotADirectory(path)
            | Self::IsADirectory(path)
            | Self::InsufficientSpace { path, .. } => Some(path),
            _ => None,
        }
    }
}

/// Result type alias for asyncvfs operations
pub type Result<T> = std::result::Result<T, VfsError>;

impl From<std::io::Error> for VfsError {
    fn from(err: std::io::Error) -> Self {
        VfsError::io(PathBuf::new(), err)
    }
}

impl From<serde_json::Error> for VfsError {
    fn from(err: serde_json::Error) -> Self {
        VfsError::Config(err.to_string())
    }
}

/// Extension trait for adding path context to std::io::Result
pub trait IoResultExt<T> {
    /// Add path context to an I/O error
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|e| VfsError::io(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_with_path() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = VfsError::io("/test/path", io_err);
        assert_eq!(err.path(), Some(&PathBuf::from("/test/path")));
        assert!(matches!(err, VfsError::Io { .. }));
    }

    #[test]
    fn test_not_found_is_classified() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err = VfsError::io("/missing", io_err);
        assert!(matches!(err, VfsError::NotFound(_)));
    }

    #[test]
    fn test_cancelled_kind() {
        assert!(VfsError::Cancelled.is_cancelled());
        assert!(!VfsError::ShuttingDown.is_cancelled());
        assert!(!VfsError::Interrupted("stopped".into()).is_cancelled());
    }
}
