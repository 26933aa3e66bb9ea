//! Expansion of requested paths into transfer items
//!
//! Directories are walked breadth-first so every item, and the byte total,
//! is known before the first byte moves. A directory always precedes its
//! contents in the list; deletes walk it backwards.

use crate::error::{IoResultExt, Result, VfsError};
use crate::fs::{FileInfo, FileKind};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};

/// One filesystem object to transfer or delete
#[derive(Debug, Clone)]
pub struct XferItem {
    /// Source path
    pub source: PathBuf,
    /// Target path; `None` for deletes
    pub target: Option<PathBuf>,
    /// Kind of the source
    pub kind: FileKind,
    /// Size in bytes (regular files only)
    pub size: u64,
    /// Whether this is one of the requested paths
    pub top_level: bool,
}

/// Items of a transfer plus their totals
#[derive(Debug, Default)]
pub struct Collected {
    /// Items, parents before children
    pub items: Vec<XferItem>,
    /// Sum of regular file sizes
    pub bytes_total: u64,
}

impl Collected {
    fn push(&mut self, item: XferItem) {
        if item.kind == FileKind::Regular {
            self.bytes_total += item.size;
        }
        self.items.push(item);
    }
}

/// Stat one path into an item
pub(crate) fn stat_item(
    source: &Path,
    target: Option<&Path>,
    follow_links: bool,
    top_level: bool,
) -> Result<XferItem> {
    let info = FileInfo::from_path(source, follow_links)?;
    Ok(XferItem {
        source: source.to_path_buf(),
        target: target.map(Path::to_path_buf),
        kind: info.kind,
        size: if info.kind == FileKind::Regular { info.size } else { 0 },
        top_level,
    })
}

/// Sorted entries of one directory
pub(crate) fn read_dir_sorted(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = Vec::new();
    for entry in std::fs::read_dir(dir).with_path(dir)? {
        entries.push(entry.with_path(dir)?.path());
    }
    entries.sort();
    Ok(entries)
}

/// Add `root` and, when recursive, everything below it
///
/// `on_error` decides per failing path: `Ok(true)` skips it, `Ok(false)`
/// retries, an error aborts collection.
pub(crate) fn collect_tree<F>(
    collected: &mut Collected,
    root: XferItem,
    recursive: bool,
    follow_links: bool,
    mut on_error: F,
) -> Result<()>
where
    F: FnMut(VfsError, &Path) -> Result<bool>,
{
    let descend = recursive && root.kind == FileKind::Directory;
    let mut pending: VecDeque<(PathBuf, Option<PathBuf>)> = VecDeque::new();
    if descend {
        pending.push_back((root.source.clone(), root.target.clone()));
    }
    collected.push(root);

    while let Some((dir, target_dir)) = pending.pop_front() {
        let entries = loop {
            match read_dir_sorted(&dir) {
                Ok(entries) => break Some(entries),
                Err(e) => {
                    if on_error(e, &dir)? {
                        break None;
                    }
                }
            }
        };

        for source in entries.into_iter().flatten() {
            let target = match (&target_dir, source.file_name()) {
                (Some(target_dir), Some(name)) => Some(target_dir.join(name)),
                _ => None,
            };
            let item = loop {
                match stat_item(&source, target.as_deref(), follow_links, false) {
                    Ok(item) => break Some(item),
                    Err(e) => {
                        if on_error(e, &source)? {
                            break None;
                        }
                    }
                }
            };
            let Some(item) = item else {
                continue;
            };
            if item.kind == FileKind::Directory {
                pending.push_back((item.source.clone(), item.target.clone()));
            }
            collected.push(item);
        }
    }
    Ok(())
}
