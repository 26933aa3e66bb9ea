//! Transfer progress reporting
//!
//! The UI callback sees every phase change; byte progress inside a file is
//! throttled to `update_interval`. The policy callback is only asked when a
//! decision is needed.

use super::options::{ProgressAction, XferDecision};
use super::phase::XferPhase;
use crate::error::{Result, VfsError};
use crate::job::AsyncHandle;
use crossbeam::channel::{unbounded, Receiver};
use serde::Serialize;
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Why a progress report was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
pub enum XferStatus {
    /// Normal progress
    #[default]
    Ok,
    /// An item failed; with a policy query, a decision is expected
    Error,
    /// The target exists; with a policy query, a decision is expected
    Overwrite,
    /// A unique target name was picked
    Duplicate,
    /// The transfer was cancelled
    Cancelled,
}

/// Snapshot of a transfer handed to callbacks
#[derive(Debug, Clone, Default, Serialize)]
pub struct XferProgressInfo {
    /// Current phase
    pub phase: XferPhase,
    /// Report kind
    pub status: XferStatus,
    /// Error message for `Error` reports and failed completions
    pub error: Option<String>,
    /// 1-based index of the current item
    pub file_index: u64,
    /// Number of collected items
    pub files_total: u64,
    /// Bytes of all regular files
    pub bytes_total: u64,
    /// Bytes transferred so far
    pub bytes_copied: u64,
    /// Size of the current file
    pub file_size: u64,
    /// Bytes of the current file transferred so far
    pub file_bytes_copied: u64,
    /// Current source
    pub source: Option<PathBuf>,
    /// Current target
    pub target: Option<PathBuf>,
    /// Name picked to avoid a conflict
    pub duplicate_name: Option<String>,
    /// Copy number used for `duplicate_name`
    pub duplicate_count: u32,
    /// Whether the current item is one of the requested paths
    pub top_level_item: bool,
}

impl XferProgressInfo {
    /// Fraction of bytes done, 0.0 to 1.0
    pub fn fraction(&self) -> f64 {
        if self.bytes_total == 0 {
            if self.phase == XferPhase::Completed {
                1.0
            } else {
                0.0
            }
        } else {
            (self.bytes_copied as f64 / self.bytes_total as f64).min(1.0)
        }
    }
}

/// UI callback: sees every phase change; `Abort` cancels the transfer
pub type ProgressCallback =
    Box<dyn FnMut(AsyncHandle, &XferProgressInfo) -> ProgressAction + Send + 'static>;

/// Policy callback: answers error and overwrite questions
pub type PolicyCallback = Box<dyn FnMut(&XferProgressInfo) -> XferDecision + Send + 'static>;

/// A UI callback that forwards every report into a channel
///
/// A dropped receiver does not affect the transfer.
pub fn progress_channel() -> (ProgressCallback, Receiver<XferProgressInfo>) {
    let (tx, rx) = unbounded();
    let callback: ProgressCallback = Box::new(move |_, info| {
        let _ = tx.send(info.clone());
        ProgressAction::Continue
    });
    (callback, rx)
}

/// Calls the UI callback, throttling byte updates
pub(crate) struct ProgressEmitter {
    handle: AsyncHandle,
    callback: ProgressCallback,
    interval: Duration,
    last_bytes: Option<Instant>,
}

impl ProgressEmitter {
    pub(crate) fn new(handle: AsyncHandle, callback: ProgressCallback, interval: Duration) -> Self {
        Self {
            handle,
            callback,
            interval,
            last_bytes: None,
        }
    }

    /// Report unconditionally
    pub(crate) fn emit(&mut self, info: &XferProgressInfo) -> Result<()> {
        match (self.callback)(self.handle, info) {
            ProgressAction::Continue => Ok(()),
            ProgressAction::Abort => Err(VfsError::Cancelled),
        }
    }

    /// Report byte progress if `interval` has passed since the last one
    pub(crate) fn emit_bytes(&mut self, info: &XferProgressInfo) -> Result<()> {
        let now = Instant::now();
        if let Some(last) = self.last_bytes {
            if now.duration_since(last) < self.interval {
                return Ok(());
            }
        }
        self.last_bytes = Some(now);
        self.emit(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_byte_updates_are_throttled() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let mut emitter = ProgressEmitter::new(
            AsyncHandle::from_raw(1),
            Box::new(move |_, _| {
                seen.fetch_add(1, Ordering::SeqCst);
                ProgressAction::Continue
            }),
            Duration::from_secs(60),
        );

        let info = XferProgressInfo::default();
        for _ in 0..100 {
            emitter.emit_bytes(&info).unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        emitter.emit(&info).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_abort_becomes_cancelled() {
        let mut emitter = ProgressEmitter::new(
            AsyncHandle::from_raw(1),
            Box::new(|_, _| ProgressAction::Abort),
            Duration::ZERO,
        );
        let err = emitter.emit(&XferProgressInfo::default()).unwrap_err();
        assert!(err.is_cancelled());
    }

    #[test]
    fn test_progress_channel_forwards() {
        let (mut callback, rx) = progress_channel();
        let info = XferProgressInfo {
            phase: XferPhase::Copying,
            bytes_total: 10,
            bytes_copied: 5,
            ..Default::default()
        };
        assert_eq!(callback(AsyncHandle::from_raw(9), &info), ProgressAction::Continue);
        let received = rx.try_recv().unwrap();
        assert_eq!(received.phase, XferPhase::Copying);
        assert_eq!(received.fraction(), 0.5);

        drop(rx);
        assert_eq!(callback(AsyncHandle::from_raw(9), &info), ProgressAction::Continue);
    }
}
