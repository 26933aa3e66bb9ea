//! Batched directory listing
//!
//! Entries are handed to the callback in batches of `items_per_notification`.
//! Full batches carry [`ListStatus::Ok`]; the first short batch (possibly
//! empty) carries [`ListStatus::EndOfStream`] and ends the listing.

use crate::error::{IoResultExt, Result, VfsError};
use crate::fs::FileInfo;
use crate::job::{AsyncHandle, JobContext};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// Listing options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListOptions {
    /// Entries per callback invocation; must be at least 1
    pub items_per_notification: usize,
    /// Describe what symlinks point at instead of the links
    pub follow_links: bool,
    /// Include entries whose name starts with a dot
    pub include_hidden: bool,
    /// Deliver entries sorted by name
    pub sort: bool,
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            items_per_notification: 32,
            follow_links: false,
            include_hidden: true,
            sort: false,
        }
    }
}

impl ListOptions {
    /// Options with the given batch size
    pub fn with_batch(items_per_notification: usize) -> Self {
        Self {
            items_per_notification,
            ..Self::default()
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.items_per_notification == 0 {
            return Err(VfsError::invalid("items_per_notification must be at least 1"));
        }
        Ok(())
    }
}

/// Status of one batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ListStatus {
    /// More batches follow
    Ok,
    /// Last batch
    EndOfStream,
    /// Listing failed; last batch
    Error(String),
}

/// Answer of the listing callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListAction {
    /// Deliver the next batch
    #[default]
    Continue,
    /// End the listing now
    Stop,
}

/// Receives each batch on a worker thread
pub type ListCallback =
    Box<dyn FnMut(AsyncHandle, ListStatus, Vec<FileInfo>) -> ListAction + Send + 'static>;

/// Reads one directory and feeds its entries to a callback
pub(crate) struct DirectoryEnumerator<'a> {
    ctx: &'a JobContext,
    path: PathBuf,
    options: ListOptions,
}

impl<'a> DirectoryEnumerator<'a> {
    pub(crate) fn new(ctx: &'a JobContext, path: PathBuf, options: ListOptions) -> Self {
        Self { ctx, path, options }
    }

    pub(crate) fn run(self, mut callback: ListCallback) -> Result<()> {
        let handle = self.ctx.handle();
        let mut entries = match self.entries() {
            Ok(entries) => entries,
            Err(e) => {
                callback(handle, ListStatus::Error(e.to_string()), Vec::new());
                return Err(e);
            }
        };

        let size = self.options.items_per_notification;
        let mut delivered = 0usize;
        loop {
            self.ctx.check_cancelled()?;

            let mut batch = Vec::with_capacity(size);
            while batch.len() < size {
                match entries.next() {
                    Some(Ok(info)) => batch.push(info),
                    Some(Err(e)) => {
                        debug!(%handle, error = %e, "listing failed");
                        callback(handle, ListStatus::Error(e.to_string()), batch);
                        return Err(e);
                    }
                    None => break,
                }
            }

            delivered += batch.len();
            if batch.len() < size {
                trace!(%handle, delivered, "end of listing");
                callback(handle, ListStatus::EndOfStream, batch);
                return Ok(());
            }
            if callback(handle, ListStatus::Ok, batch) == ListAction::Stop {
                debug!(%handle, delivered, "listing stopped by callback");
                return Ok(());
            }
        }
    }

    fn entries(&self) -> Result<Box<dyn Iterator<Item = Result<FileInfo>> + 'a>> {
        let dir = self.path.clone();
        let info = FileInfo::from_path(&dir, true)?;
        if !info.is_dir() {
            return Err(VfsError::NotADirectory(dir));
        }

        let options = self.options;
        let read = std::fs::read_dir(&dir).with_path(&dir)?;
        let iter = read.filter_map(move |entry| {
            let path = match entry.with_path(&dir) {
                Ok(entry) => entry.path(),
                Err(e) => return Some(Err(e)),
            };
            let hidden = path
                .file_name()
                .is_some_and(|name| name.to_string_lossy().starts_with('.'));
            if hidden && !options.include_hidden {
                return None;
            }
            describe(&path, options.follow_links)
        });

        if !self.options.sort {
            return Ok(Box::new(iter));
        }
        let mut all = iter.collect::<Result<Vec<_>>>()?;
        all.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(Box::new(all.into_iter().map(Ok)))
    }
}

/// `None` for entries that vanished while listing
fn describe(path: &Path, follow_links: bool) -> Option<Result<FileInfo>> {
    let described = match FileInfo::from_path(path, follow_links) {
        // Dangling links are listed as links
        Err(_) if follow_links => FileInfo::from_path(path, false),
        other => other,
    };
    match described {
        Err(VfsError::NotFound(_)) => {
            trace!(path = %path.display(), "entry vanished");
            None
        }
        other => Some(other),
    }
}
