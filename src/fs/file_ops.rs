//! Open-file jobs
//!
//! A file job is opened once and then receives read, write, seek and close
//! operations on the same handle. The open file lives in the job slot, so it
//! is only touched by the worker holding the job lock. Callbacks are handed
//! back as deferred notifications and run after that lock is released, which
//! lets a callback queue the next operation on the same handle.

use crate::error::{IoResultExt, Result, VfsError};
use crate::job::{AsyncHandle, Execution, JobContext, JobOutcome, Notification};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use tracing::trace;

/// How a file job opens its file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpenMode {
    /// Read an existing file
    Read,
    /// Write an existing file in place
    Write,
    /// Read and write an existing file
    ReadWrite,
    /// Create or truncate for writing
    Create,
    /// Create for writing; fail if it exists
    CreateExclusive,
    /// Append to an existing or new file
    Append,
}

impl OpenMode {
    fn options(self) -> OpenOptions {
        let mut options = OpenOptions::new();
        match self {
            OpenMode::Read => options.read(true),
            OpenMode::Write => options.write(true),
            OpenMode::ReadWrite => options.read(true).write(true),
            OpenMode::Create => options.write(true).create(true).truncate(true),
            OpenMode::CreateExclusive => options.write(true).create_new(true),
            OpenMode::Append => options.append(true).create(true),
        };
        options
    }
}

/// Callback for open and close
pub type StatusCallback = Box<dyn FnOnce(AsyncHandle, Result<()>) + Send + 'static>;
/// Callback for read; an empty buffer means end of file
pub type ReadCallback = Box<dyn FnOnce(AsyncHandle, Result<Vec<u8>>) + Send + 'static>;
/// Callback for write, with the number of bytes written
pub type WriteCallback = Box<dyn FnOnce(AsyncHandle, Result<usize>) + Send + 'static>;
/// Callback for seek, with the new absolute position
pub type SeekCallback = Box<dyn FnOnce(AsyncHandle, Result<u64>) + Send + 'static>;

/// One queued operation on a file job
pub(crate) enum FileOp {
    Open {
        path: PathBuf,
        mode: OpenMode,
        callback: StatusCallback,
    },
    Read {
        len: usize,
        callback: ReadCallback,
    },
    Write {
        data: Vec<u8>,
        callback: WriteCallback,
    },
    Seek {
        pos: SeekFrom,
        callback: SeekCallback,
    },
    Close {
        callback: StatusCallback,
    },
}

/// Open file owned by a job slot
#[derive(Debug, Default)]
pub(crate) struct FileState {
    file: Option<File>,
    path: PathBuf,
}

impl FileState {
    fn file(&mut self) -> Result<&mut File> {
        self.file
            .as_mut()
            .ok_or_else(|| VfsError::invalid("file is not open"))
    }
}

fn running(notify: Notification) -> Execution {
    Execution {
        complete: false,
        outcome: JobOutcome::Completed,
        notify: Some(notify),
    }
}

fn finished(outcome: JobOutcome, notify: Notification) -> Execution {
    Execution {
        complete: true,
        outcome,
        notify: Some(notify),
    }
}

impl FileOp {
    pub(crate) fn execute(self, state: &mut FileState, ctx: &JobContext) -> Execution {
        let handle = ctx.handle();

        match self {
            FileOp::Open {
                path,
                mode,
                callback,
            } => {
                let result = ctx.check_cancelled().and_then(|_| {
                    if state.file.is_some() {
                        return Err(VfsError::invalid("file is already open"));
                    }
                    mode.options().open(&path).with_path(&path)
                });
                match result {
                    Ok(file) => {
                        trace!(%handle, path = %path.display(), ?mode, "file opened");
                        state.file = Some(file);
                        state.path = path;
                        running(Box::new(move || callback(handle, Ok(()))))
                    }
                    Err(e) => {
                        let outcome = outcome_of(&e);
                        finished(outcome, Box::new(move || callback(handle, Err(e))))
                    }
                }
            }
            FileOp::Read { len, callback } => {
                let path = state.path.clone();
                let result = ctx.check_cancelled().and_then(|_| {
                    let file = state.file()?;
                    let mut buffer = vec![0u8; len];
                    let n = file.read(&mut buffer).with_path(&path)?;
                    buffer.truncate(n);
                    Ok(buffer)
                });
                running(Box::new(move || callback(handle, result)))
            }
            FileOp::Write { data, callback } => {
                let path = state.path.clone();
                let result = ctx.check_cancelled().and_then(|_| {
                    let file = state.file()?;
                    file.write_all(&data).with_path(&path)?;
                    Ok(data.len())
                });
                running(Box::new(move || callback(handle, result)))
            }
            FileOp::Seek { pos, callback } => {
                let path = state.path.clone();
                let result = ctx.check_cancelled().and_then(|_| {
                    let file = state.file()?;
                    file.seek(pos).with_path(&path)
                });
                running(Box::new(move || callback(handle, result)))
            }
            FileOp::Close { callback } => {
                let result = match state.file.take() {
                    Some(mut file) => file.flush().with_path(&state.path),
                    None => Ok(()),
                };
                trace!(%handle, path = %state.path.display(), "file closed");
                let outcome = match &result {
                    Ok(()) => JobOutcome::Completed,
                    Err(e) => outcome_of(e),
                };
                finished(outcome, Box::new(move || callback(handle, result)))
            }
        }
    }
}

fn outcome_of(e: &VfsError) -> JobOutcome {
    if e.is_cancelled() {
        JobOutcome::Cancelled
    } else {
        JobOutcome::Failed(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{CancelFlag, HandleAllocator};
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    fn ctx() -> JobContext {
        JobContext::new(HandleAllocator::new().allocate(), CancelFlag::new())
    }

    fn run(op: FileOp, state: &mut FileState, ctx: &JobContext) -> Execution {
        let execution = op.execute(state, ctx);
        if let Some(notify) = execution.notify {
            notify();
        }
        Execution {
            complete: execution.complete,
            outcome: execution.outcome,
            notify: None,
        }
    }

    #[test]
    fn test_write_then_read_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.txt");
        let ctx = ctx();
        let mut state = FileState::default();

        let opened = run(
            FileOp::Open {
                path: path.clone(),
                mode: OpenMode::Create,
                callback: Box::new(|_, r| assert!(r.is_ok())),
            },
            &mut state,
            &ctx,
        );
        assert!(!opened.complete);

        run(
            FileOp::Write {
                data: b"hello".to_vec(),
                callback: Box::new(|_, r| assert_eq!(r.unwrap(), 5)),
            },
            &mut state,
            &ctx,
        );
        let closed = run(
            FileOp::Close {
                callback: Box::new(|_, r| assert!(r.is_ok())),
            },
            &mut state,
            &ctx,
        );
        assert!(closed.complete);
        assert_eq!(closed.outcome, JobOutcome::Completed);

        let mut state = FileState::default();
        run(
            FileOp::Open {
                path,
                mode: OpenMode::Read,
                callback: Box::new(|_, r| assert!(r.is_ok())),
            },
            &mut state,
            &ctx,
        );
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        run(
            FileOp::Read {
                len: 64,
                callback: Box::new(move |_, r| sink.lock().unwrap().extend(r.unwrap())),
            },
            &mut state,
            &ctx,
        );
        assert_eq!(&*seen.lock().unwrap(), b"hello");
    }

    #[test]
    fn test_failed_open_completes_job() {
        let dir = TempDir::new().unwrap();
        let mut state = FileState::default();
        let execution = run(
            FileOp::Open {
                path: dir.path().join("missing"),
                mode: OpenMode::Read,
                callback: Box::new(|_, r| assert!(matches!(r, Err(VfsError::NotFound(_))))),
            },
            &mut state,
            &ctx(),
        );
        assert!(execution.complete);
        assert!(matches!(execution.outcome, JobOutcome::Failed(_)));
    }

    #[test]
    fn test_read_without_open_fails() {
        let mut state = FileState::default();
        let execution = run(
            FileOp::Read {
                len: 4,
                callback: Box::new(|_, r| assert!(matches!(r, Err(VfsError::InvalidArgument(_))))),
            },
            &mut state,
            &ctx(),
        );
        assert!(!execution.complete);
    }
}
