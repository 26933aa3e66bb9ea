//! File metadata snapshots
//!
//! [`FileInfo`] is what directory enumeration hands out and what transfer
//! collection is built from.

use crate::error::{IoResultExt, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Kind of filesystem object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileKind {
    /// Regular file
    Regular,
    /// Directory
    Directory,
    /// Symbolic link (only when links are not followed)
    Symlink,
    /// Device, socket, fifo
    Other,
}

/// Metadata for a single filesystem entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileInfo {
    /// Entry name (last path component)
    pub name: String,
    /// Full path
    pub path: PathBuf,
    /// Kind of entry
    pub kind: FileKind,
    /// Size in bytes
    pub size: u64,
    /// Modification time
    pub modified: Option<SystemTime>,
    /// Unix permission bits (0o644 placeholder elsewhere)
    pub permissions: u32,
    /// Symlink target, for unfollowed links
    pub symlink_target: Option<PathBuf>,
}

impl FileInfo {
    /// Stat `path`, following symlinks when `follow_links` is set
    pub fn from_path(path: &Path, follow_links: bool) -> Result<Self> {
        let metadata = if follow_links {
            std::fs::metadata(path)
        } else {
            std::fs::symlink_metadata(path)
        }
        .with_path(path)?;

        let file_type = metadata.file_type();
        let kind = if file_type.is_symlink() {
            FileKind::Symlink
        } else if file_type.is_dir() {
            FileKind::Directory
        } else if file_type.is_file() {
            FileKind::Regular
        } else {
            FileKind::Other
        };

        let symlink_target = if kind == FileKind::Symlink {
            std::fs::read_link(path).ok()
        } else {
            None
        };

        #[cfg(unix)]
        let permissions = {
            use std::os::unix::fs::PermissionsExt;
            metadata.permissions().mode()
        };

        #[cfg(not(unix))]
        let permissions = 0o644;

        Ok(FileInfo {
            name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.to_string_lossy().into_owned()),
            path: path.to_path_buf(),
            kind,
            size: metadata.len(),
            modified: metadata.modified().ok(),
            permissions,
            symlink_target,
        })
    }

    /// Whether this is a directory
    pub fn is_dir(&self) -> bool {
        self.kind == FileKind::Directory
    }

    /// Check if this is a hidden file (Unix convention)
    pub fn is_hidden(&self) -> bool {
        self.name.starts_with('.')
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_file_info_kinds() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(".hidden"), b"abc").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();

        let file = FileInfo::from_path(&dir.path().join(".hidden"), false).unwrap();
        assert_eq!(file.kind, FileKind::Regular);
        assert_eq!(file.size, 3);
        assert!(file.is_hidden());

        let sub = FileInfo::from_path(&dir.path().join("sub"), false).unwrap();
        assert!(sub.is_dir());
        assert_eq!(sub.name, "sub");
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_follow() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("target"), b"12345").unwrap();
        std::os::unix::fs::symlink(dir.path().join("target"), dir.path().join("link")).unwrap();

        let link = FileInfo::from_path(&dir.path().join("link"), false).unwrap();
        assert_eq!(link.kind, FileKind::Symlink);
        assert!(link.symlink_target.is_some());

        let followed = FileInfo::from_path(&dir.path().join("link"), true).unwrap();
        assert_eq!(followed.kind, FileKind::Regular);
        assert_eq!(followed.size, 5);
    }
}
