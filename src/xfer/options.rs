//! Transfer requests and policies

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// What to do when an item fails
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ErrorMode {
    /// Stop the transfer at the first error
    #[default]
    Abort,
    /// Skip the failing item and continue
    Skip,
    /// Ask the policy callback
    Query,
}

/// What to do when a target already exists
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OverwriteMode {
    /// Always replace
    Replace,
    /// Never replace
    Skip,
    /// Ask the policy callback
    #[default]
    Query,
    /// Fail the transfer
    Abort,
}

/// Answer of the policy callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum XferDecision {
    /// Stop the whole transfer
    Abort,
    /// Try the failed step again
    Retry,
    /// Skip this item
    Skip,
    /// Replace this target
    Replace,
    /// Replace this and every later conflicting target
    ReplaceAll,
    /// Skip this and every later conflicting or failing item
    SkipAll,
}

/// Answer of the progress callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ProgressAction {
    /// Keep going
    #[default]
    Continue,
    /// Cancel the transfer
    Abort,
}

/// Transfer flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct XferOptions {
    /// Descend into directories
    pub recursive: bool,
    /// Transfer what symlinks point at instead of the links
    pub follow_links: bool,
    /// Remove sources after transferring (move)
    pub remove_source: bool,
    /// Delete the sources; targets are ignored
    pub delete_items: bool,
    /// When deleting a directory, keep it and remove only its contents
    pub empty_directories: bool,
    /// Resolve conflicts by picking `name (copy N)` targets
    pub use_unique_names: bool,
    /// Try a plain rename before copying for moves
    pub same_fs_rename: bool,
    /// Copy modification and access times
    pub preserve_times: bool,
}

impl Default for XferOptions {
    fn default() -> Self {
        Self {
            recursive: false,
            follow_links: false,
            remove_source: false,
            delete_items: false,
            empty_directories: false,
            use_unique_names: false,
            same_fs_rename: true,
            preserve_times: true,
        }
    }
}

/// Everything a transfer job needs besides its callbacks
#[derive(Debug, Clone)]
pub struct XferRequest {
    /// Source paths
    pub sources: Vec<PathBuf>,
    /// Target paths, parallel to `sources` (empty for deletes)
    pub targets: Vec<PathBuf>,
    /// Flags
    pub options: XferOptions,
    /// Per-item error policy
    pub error_mode: ErrorMode,
    /// Existing-target policy
    pub overwrite_mode: OverwriteMode,
    /// Scheduling priority
    pub priority: i32,
    /// Chunk size; engine default when unset
    pub buffer_size: Option<usize>,
    /// Byte-progress throttle; engine default when unset
    pub update_interval: Option<Duration>,
}

impl XferRequest {
    /// Copy each source to the target at the same index
    pub fn copy(sources: Vec<PathBuf>, targets: Vec<PathBuf>) -> Self {
        Self {
            sources,
            targets,
            options: XferOptions::default(),
            error_mode: ErrorMode::default(),
            overwrite_mode: OverwriteMode::default(),
            priority: 0,
            buffer_size: None,
            update_interval: None,
        }
    }

    /// Move each source to the target at the same index
    pub fn move_items(sources: Vec<PathBuf>, targets: Vec<PathBuf>) -> Self {
        let mut request = Self::copy(sources, targets);
        request.options.remove_source = true;
        request
    }

    /// Delete the given paths
    pub fn delete(paths: Vec<PathBuf>) -> Self {
        let mut request = Self::copy(paths, Vec::new());
        request.options.delete_items = true;
        request
    }

    /// Descend into directories
    pub fn recursive(mut self, recursive: bool) -> Self {
        self.options.recursive = recursive;
        self
    }

    /// Replace all flags
    pub fn with_options(mut self, options: XferOptions) -> Self {
        self.options = options;
        self
    }

    /// Set the error policy
    pub fn with_error_mode(mut self, mode: ErrorMode) -> Self {
        self.error_mode = mode;
        self
    }

    /// Set the existing-target policy
    pub fn with_overwrite_mode(mut self, mode: OverwriteMode) -> Self {
        self.overwrite_mode = mode;
        self
    }

    /// Set the scheduling priority
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Set the copy chunk size
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = Some(size);
        self
    }

    /// Set the byte-progress throttle
    pub fn with_update_interval(mut self, interval: Duration) -> Self {
        self.update_interval = Some(interval);
        self
    }
}
