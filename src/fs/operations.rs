//! File operations used by transfers
//!
//! Chunked copying with a per-chunk progress hook, attribute preservation,
//! removal, free-space checks and unique-name generation.

use crate::error::{IoResultExt, Result, VfsError};
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// Default chunk size for copies
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// Options for chunked file copies
#[derive(Debug, Clone)]
pub struct CopyOptions {
    /// Bytes read and written per chunk
    pub buffer_size: usize,
    /// Preserve file permissions
    pub preserve_permissions: bool,
    /// Preserve modification and access times
    pub preserve_times: bool,
}

impl Default for CopyOptions {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            preserve_permissions: true,
            preserve_times: true,
        }
    }
}

/// Copies files chunk by chunk, reporting after every chunk
#[derive(Debug, Clone, Default)]
pub struct FileCopier {
    options: CopyOptions,
}

impl FileCopier {
    /// Create a new file copier
    pub fn new(options: CopyOptions) -> Self {
        Self { options }
    }

    /// Open the source of a copy
    pub fn open_source(&self, source: &Path) -> Result<File> {
        let file = File::open(source).with_path(source)?;
        if file.metadata().with_path(source)?.is_dir() {
            return Err(VfsError::IsADirectory(source.to_path_buf()));
        }
        Ok(file)
    }

    /// Create (truncating) the target of a copy
    pub fn open_target(&self, target: &Path) -> Result<File> {
        File::create(target).with_path(target)
    }

    /// Stream `src` into `dst`, calling `on_chunk` with each chunk length
    ///
    /// `on_chunk` returning an error stops the copy; the caller owns cleanup
    /// of the partial target.
    pub fn copy_stream<F>(
        &self,
        src: &mut File,
        dst: &mut File,
        source: &Path,
        target: &Path,
        mut on_chunk: F,
    ) -> Result<u64>
    where
        F: FnMut(u64) -> Result<()>,
    {
        let mut buffer = vec![0u8; self.options.buffer_size.max(1)];
        let mut bytes_copied = 0u64;

        loop {
            let bytes_read = match src.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(VfsError::io(source, e)),
            };

            dst.write_all(&buffer[..bytes_read]).with_path(target)?;
            bytes_copied += bytes_read as u64;
            on_chunk(bytes_read as u64)?;
        }

        dst.flush().with_path(target)?;
        Ok(bytes_copied)
    }

    /// Copy permissions and times from `source` to `target` per options
    pub fn preserve_attributes(&self, source: &Path, target: &Path) -> Result<()> {
        let metadata = std::fs::metadata(source).with_path(source)?;

        if self.options.preserve_permissions {
            std::fs::set_permissions(target, metadata.permissions()).with_path(target)?;
        }

        if self.options.preserve_times {
            if let Ok(mtime) = metadata.modified() {
                let _ = filetime::set_file_mtime(target, filetime::FileTime::from_system_time(mtime));
            }
            if let Ok(atime) = metadata.accessed() {
                let _ = filetime::set_file_atime(target, filetime::FileTime::from_system_time(atime));
            }
        }

        Ok(())
    }
}

/// Remove a file, symlink or directory tree
pub fn remove_path(path: &Path) -> Result<()> {
    let metadata = std::fs::symlink_metadata(path).with_path(path)?;
    if metadata.is_dir() {
        std::fs::remove_dir_all(path).with_path(path)?;
    } else {
        std::fs::remove_file(path).with_path(path)?;
    }
    Ok(())
}

/// Whether anything (including a dangling symlink) exists at `path`
pub fn path_exists(path: &Path) -> bool {
    std::fs::symlink_metadata(path).is_ok()
}

/// Free space available to unprivileged users at `path`, when known
#[cfg(unix)]
pub fn available_space(path: &Path) -> Option<u64> {
    let stat = nix::sys::statvfs::statvfs(path).ok()?;
    #[allow(clippy::unnecessary_cast)]
    let available = (stat.blocks_available() as u64).saturating_mul(stat.fragment_size() as u64);
    Some(available)
}

/// Free space available at `path`, when known
#[cfg(not(unix))]
pub fn available_space(_path: &Path) -> Option<u64> {
    None
}

/// Fail when the destination obviously cannot hold `required` bytes
///
/// Unknown free space is not an error.
pub fn check_space(dest: &Path, required: u64) -> Result<()> {
    if let Some(available) = available_space(dest) {
        if available < required {
            return Err(VfsError::InsufficientSpace {
                path: dest.to_path_buf(),
                required,
                available,
            });
        }
    }
    Ok(())
}

/// Build `name (copy N).ext` next to `target`
pub fn unique_name(target: &Path, count: u32) -> PathBuf {
    let stem = target
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match target.extension() {
        Some(ext) => format!("{} (copy {}).{}", stem, count, ext.to_string_lossy()),
        None => format!("{} (copy {})", stem, count),
    };
    target.with_file_name(name)
}

/// Whether `inner` is `outer` or lies below it
pub fn is_same_or_inside(outer: &Path, inner: &Path) -> bool {
    let outer = outer.canonicalize().unwrap_or_else(|_| outer.to_path_buf());
    let inner = match inner.canonicalize() {
        Ok(p) => p,
        // Targets usually do not exist yet; resolve through the parent
        Err(_) => match (inner.parent(), inner.file_name()) {
            (Some(parent), Some(name)) => parent
                .canonicalize()
                .map(|p| p.join(name))
                .unwrap_or_else(|_| inner.to_path_buf()),
            _ => inner.to_path_buf(),
        },
    };
    inner.starts_with(&outer)
}
