//! Transfer driver
//!
//! One [`XferJob`] runs inside one engine job. It walks the phase machine
//! item by item and always finishes in [`XferPhase::Completed`], whether the
//! transfer succeeded, failed or was cancelled. Per-item failures go through
//! the error mode; existing targets go through the overwrite mode.

use super::collect::{collect_tree, stat_item, Collected, XferItem};
use super::options::{ErrorMode, OverwriteMode, XferDecision, XferOptions, XferRequest};
use super::phase::XferPhase;
use super::progress::{
    PolicyCallback, ProgressCallback, ProgressEmitter, XferProgressInfo, XferStatus,
};
use crate::error::{IoResultExt, Result, VfsError};
use crate::fs::{
    check_space, is_same_or_inside, path_exists, remove_path, unique_name, CopyOptions,
    FileCopier, FileKind,
};
use crate::job::JobContext;
use std::collections::HashSet;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

enum Resolution {
    Retry,
    Skip,
}

/// Reject requests that can never succeed, before a job is created
pub(crate) fn validate(request: &XferRequest) -> Result<()> {
    if request.sources.is_empty() {
        return Err(VfsError::invalid("no source paths given"));
    }
    if request.buffer_size == Some(0) {
        return Err(VfsError::invalid("buffer size must be at least 1 byte"));
    }
    if request.options.delete_items {
        return Ok(());
    }
    if request.sources.len() != request.targets.len() {
        return Err(VfsError::invalid(format!(
            "{} sources but {} targets",
            request.sources.len(),
            request.targets.len()
        )));
    }
    for (source, target) in request.sources.iter().zip(&request.targets) {
        if source.is_dir() && is_same_or_inside(source, target) {
            let verb = if request.options.remove_source {
                "move"
            } else {
                "copy"
            };
            return Err(VfsError::invalid(format!(
                "cannot {} '{}' into itself",
                verb,
                source.display()
            )));
        }
    }
    Ok(())
}

pub(crate) struct XferJob<'a> {
    ctx: &'a JobContext,
    sources: Vec<PathBuf>,
    targets: Vec<PathBuf>,
    options: XferOptions,
    error_mode: ErrorMode,
    overwrite_mode: OverwriteMode,
    /// Set by a `SkipAll` answer; later conflicts skip without asking
    skip_conflicts: bool,
    copier: FileCopier,
    progress: ProgressEmitter,
    policy: Option<PolicyCallback>,
    info: XferProgressInfo,
    /// Items whose whole subtree is left alone
    skipped: Vec<PathBuf>,
    /// Items moved with a single rename
    renamed: Vec<PathBuf>,
    /// Source directories that must survive a move or delete
    incomplete: HashSet<PathBuf>,
    /// Directory targets replaced by unique names
    remaps: Vec<(PathBuf, PathBuf)>,
    /// Sources copied so far, removed in cleanup when moving
    copied: Vec<(PathBuf, FileKind)>,
}

impl<'a> XferJob<'a> {
    pub(crate) fn new(
        ctx: &'a JobContext,
        request: XferRequest,
        progress: ProgressCallback,
        policy: Option<PolicyCallback>,
        default_buffer_size: usize,
        default_update_interval: Duration,
    ) -> Self {
        let copier = FileCopier::new(CopyOptions {
            buffer_size: request.buffer_size.unwrap_or(default_buffer_size),
            preserve_permissions: true,
            preserve_times: request.options.preserve_times,
        });
        let interval = request.update_interval.unwrap_or(default_update_interval);

        Self {
            ctx,
            sources: request.sources,
            targets: request.targets,
            options: request.options,
            error_mode: request.error_mode,
            overwrite_mode: request.overwrite_mode,
            skip_conflicts: false,
            copier,
            progress: ProgressEmitter::new(ctx.handle(), progress, interval),
            policy,
            info: XferProgressInfo::default(),
            skipped: Vec::new(),
            renamed: Vec::new(),
            incomplete: HashSet::new(),
            remaps: Vec::new(),
            copied: Vec::new(),
        }
    }

    /// Run the transfer to completion
    pub(crate) fn run(mut self) -> Result<()> {
        let handle = self.ctx.handle();
        debug!(%handle, sources = self.sources.len(), "transfer started");

        let result = self.drive();

        self.info.status = match &result {
            Ok(()) => XferStatus::Ok,
            Err(e) if e.is_cancelled() => XferStatus::Cancelled,
            Err(_) => XferStatus::Error,
        };
        self.info.error = match &result {
            Err(e) if !e.is_cancelled() => Some(e.to_string()),
            _ => None,
        };
        self.info.phase = XferPhase::Completed;
        if self.emit().is_err() {
            trace!(%handle, "abort requested after completion");
        }

        match &result {
            Ok(()) => info!(
                %handle,
                files = self.info.files_total,
                bytes = self.info.bytes_copied,
                "transfer completed"
            ),
            Err(e) if e.is_cancelled() => info!(%handle, "transfer cancelled"),
            Err(e) => warn!(%handle, error = %e, "transfer failed"),
        }
        result
    }

    fn drive(&mut self) -> Result<()> {
        self.emit()?;

        let mut collected = Collected::default();
        let mut next_item = 0;
        loop {
            match self.info.phase {
                XferPhase::Initial => self.enter(XferPhase::Collecting)?,
                XferPhase::Collecting => {
                    collected = self.collect()?;
                    self.info.files_total = collected.items.len() as u64;
                    self.info.bytes_total = collected.bytes_total;
                    self.enter(XferPhase::CheckingDestination)?;
                }
                XferPhase::CheckingDestination => {
                    self.check_destination(&collected)?;
                    self.enter(XferPhase::ReadyToGo)?;
                }
                XferPhase::ReadyToGo | XferPhase::FileCompleted => {
                    match collected.items.get(next_item) {
                        Some(item) => {
                            next_item += 1;
                            self.process_item(item)?;
                        }
                        None => self.enter(XferPhase::Cleanup)?,
                    }
                }
                XferPhase::OpenSource
                | XferPhase::OpenTarget
                | XferPhase::Copying
                | XferPhase::Moving
                | XferPhase::Deleting => self.enter(XferPhase::FileCompleted)?,
                XferPhase::Cleanup => {
                    self.cleanup()?;
                    return Ok(());
                }
                XferPhase::Completed => return Ok(()),
            }
        }
    }

    fn emit(&mut self) -> Result<()> {
        self.progress.emit(&self.info)
    }

    fn enter(&mut self, next: XferPhase) -> Result<()> {
        debug_assert!(
            self.info.phase.can_advance_to(next),
            "illegal transfer phase change {} -> {}",
            self.info.phase,
            next
        );
        self.ctx.check_cancelled()?;
        trace!(handle = %self.ctx.handle(), from = %self.info.phase, to = %next, "phase");
        self.info.phase = next;
        self.emit()
    }

    /// Ask the policy callback, if there is one
    fn ask(&mut self, status: XferStatus) -> Option<XferDecision> {
        self.info.status = status;
        let decision = self.policy.as_mut().map(|policy| policy(&self.info));
        self.info.status = XferStatus::Ok;
        debug!(?status, ?decision, "policy consulted");
        decision
    }

    fn resolve_error(&mut self, err: VfsError) -> Result<Resolution> {
        if err.is_cancelled() || self.ctx.is_cancelled() {
            return Err(VfsError::Cancelled);
        }
        match self.error_mode {
            ErrorMode::Abort => Err(err),
            ErrorMode::Skip => {
                warn!(error = %err, "skipping item");
                Ok(Resolution::Skip)
            }
            ErrorMode::Query => {
                self.info.error = Some(err.to_string());
                let decision = self.ask(XferStatus::Error).unwrap_or(XferDecision::Abort);
                self.info.error = None;
                match decision {
                    XferDecision::Retry => Ok(Resolution::Retry),
                    XferDecision::Skip => Ok(Resolution::Skip),
                    XferDecision::SkipAll => {
                        self.error_mode = ErrorMode::Skip;
                        Ok(Resolution::Skip)
                    }
                    XferDecision::Abort | XferDecision::Replace | XferDecision::ReplaceAll => {
                        Err(VfsError::Interrupted(err.to_string()))
                    }
                }
            }
        }
    }

    /// Run `op` until it succeeds or the error mode says skip (`None`)
    fn retrying<T, F>(&mut self, mut op: F) -> Result<Option<T>>
    where
        F: FnMut(&mut Self) -> Result<T>,
    {
        loop {
            match op(self) {
                Ok(value) => return Ok(Some(value)),
                Err(err) => match self.resolve_error(err)? {
                    Resolution::Retry => continue,
                    Resolution::Skip => return Ok(None),
                },
            }
        }
    }

    fn collect(&mut self) -> Result<Collected> {
        let delete = self.options.delete_items;
        let follow = self.options.follow_links && !delete;
        let recursive = self.options.recursive;
        let sources = self.sources.clone();

        let mut collected = Collected::default();
        for (index, source) in sources.iter().enumerate() {
            let target = if delete {
                None
            } else {
                self.targets.get(index).cloned()
            };
            let Some(root) = self.retrying(|_| stat_item(source, target.as_deref(), follow, true))?
            else {
                continue;
            };

            if root.kind == FileKind::Directory && !recursive && !delete {
                // Retrying cannot change the answer
                self.resolve_error(VfsError::IsADirectory(root.source))?;
                continue;
            }

            collect_tree(&mut collected, root, recursive, follow, |err, path| {
                trace!(path = %path.display(), "collection error");
                Ok(matches!(self.resolve_error(err)?, Resolution::Skip))
            })?;
        }

        if delete {
            collected.items.reverse();
        }
        debug!(
            items = collected.items.len(),
            bytes = collected.bytes_total,
            "collection finished"
        );
        Ok(collected)
    }

    fn check_destination(&mut self, collected: &Collected) -> Result<()> {
        if self.options.delete_items {
            return Ok(());
        }

        let pairs: Vec<(PathBuf, PathBuf)> = self
            .sources
            .iter()
            .cloned()
            .zip(self.targets.iter().cloned())
            .collect();
        let recursive = self.options.recursive;
        for (source, target) in &pairs {
            let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) else {
                continue;
            };
            if parent.is_dir() {
                continue;
            }
            let ready = self.retrying(|_| {
                if recursive {
                    std::fs::create_dir_all(parent).with_path(parent)
                } else {
                    Err(VfsError::NotFound(parent.to_path_buf()))
                }
            })?;
            if ready.is_none() {
                self.skipped.push(source.clone());
                self.mark_incomplete(source);
            }
        }

        let renames = self.options.remove_source && self.options.same_fs_rename;
        if !renames && collected.bytes_total > 0 {
            let dest = pairs
                .iter()
                .filter_map(|(_, target)| target.parent())
                .find(|parent| parent.is_dir())
                .map(Path::to_path_buf);
            if let Some(dest) = dest {
                let required = collected.bytes_total;
                self.retrying(|_| check_space(&dest, required))?;
            }
        }
        Ok(())
    }

    fn process_item(&mut self, item: &XferItem) -> Result<()> {
        self.ctx.check_cancelled()?;
        self.info.file_index += 1;

        if self.renamed.iter().any(|root| item.source.starts_with(root)) {
            self.info.bytes_copied += item.size;
            return Ok(());
        }
        if self.skipped.iter().any(|root| item.source.starts_with(root)) {
            return Ok(());
        }

        let target = item.target.as_deref().map(|t| self.remapped(t));
        self.info.source = Some(item.source.clone());
        self.info.target = target;
        self.info.file_size = item.size;
        self.info.file_bytes_copied = 0;
        self.info.top_level_item = item.top_level;
        self.info.duplicate_name = None;
        self.info.duplicate_count = 0;
        self.info.status = XferStatus::Ok;
        self.info.error = None;

        if self.options.delete_items {
            self.delete_item(item)
        } else {
            self.transfer_item(item)
        }
    }

    fn remapped(&self, target: &Path) -> PathBuf {
        for (from, to) in self.remaps.iter().rev() {
            if let Ok(rest) = target.strip_prefix(from) {
                return to.join(rest);
            }
        }
        target.to_path_buf()
    }

    fn mark_incomplete(&mut self, path: &Path) {
        for ancestor in path.ancestors().skip(1) {
            if !self.incomplete.insert(ancestor.to_path_buf()) {
                break;
            }
        }
    }

    fn skip_item(&mut self, item: &XferItem) {
        debug!(source = %item.source.display(), "item skipped");
        self.mark_incomplete(&item.source);
        if item.kind == FileKind::Directory {
            self.skipped.push(item.source.clone());
        }
    }

    fn skip_to_next(&mut self, item: &XferItem) -> Result<()> {
        self.skip_item(item);
        self.enter(XferPhase::FileCompleted)
    }

    fn delete_item(&mut self, item: &XferItem) -> Result<()> {
        self.enter(XferPhase::Deleting)?;

        let is_dir = item.kind == FileKind::Directory;
        if is_dir && item.top_level && self.options.empty_directories {
            debug!(path = %item.source.display(), "keeping emptied directory");
        } else if is_dir && self.incomplete.contains(&item.source) {
            debug!(path = %item.source.display(), "directory keeps skipped entries");
            self.mark_incomplete(&item.source);
        } else {
            let removed = self.retrying(|_| remove_one(&item.source, item.kind))?;
            if removed.is_none() {
                self.mark_incomplete(&item.source);
            }
        }

        self.enter(XferPhase::FileCompleted)
    }

    fn transfer_item(&mut self, item: &XferItem) -> Result<()> {
        let mut resolved = None;

        if self.options.remove_source && self.options.same_fs_rename && item.top_level {
            self.enter(XferPhase::Moving)?;
            let Some(target) = self.settle_target(item, None)? else {
                return self.skip_to_next(item);
            };
            match std::fs::rename(&item.source, &target) {
                Ok(()) => {
                    debug!(
                        source = %item.source.display(),
                        target = %target.display(),
                        "moved by rename"
                    );
                    self.info.bytes_copied += item.size;
                    self.renamed.push(item.source.clone());
                    return self.enter(XferPhase::FileCompleted);
                }
                Err(e) => {
                    debug!(error = %e, "rename failed, copying instead");
                    resolved = Some(target);
                }
            }
        }

        self.enter(XferPhase::OpenSource)?;
        match item.kind {
            FileKind::Regular => self.copy_file(item, resolved),
            FileKind::Directory => self.make_directory(item, resolved),
            FileKind::Symlink => self.copy_symlink(item, resolved),
            FileKind::Other => {
                let source = item.source.clone();
                let copied = self.retrying(|_| {
                    Err::<(), _>(VfsError::Unsupported(format!(
                        "cannot transfer special file '{}'",
                        source.display()
                    )))
                })?;
                debug_assert!(copied.is_none());
                self.skip_to_next(item)
            }
        }
    }

    /// Target to write to, after conflict handling; `None` means skip
    fn settle_target(
        &mut self,
        item: &XferItem,
        resolved: Option<PathBuf>,
    ) -> Result<Option<PathBuf>> {
        if resolved.is_some() {
            return Ok(resolved);
        }
        let target = self
            .info
            .target
            .clone()
            .ok_or_else(|| VfsError::invalid("transfer item without a target"))?;
        self.resolve_target(item, &target)
    }

    fn resolve_target(&mut self, item: &XferItem, target: &Path) -> Result<Option<PathBuf>> {
        loop {
            if !path_exists(target) {
                return Ok(Some(target.to_path_buf()));
            }
            // Directories merge into existing directories
            if item.kind == FileKind::Directory && target.is_dir() {
                return Ok(Some(target.to_path_buf()));
            }
            if self.options.use_unique_names {
                return self.pick_unique(item, target).map(Some);
            }
            if same_file(&item.source, target) {
                let err = VfsError::invalid(format!(
                    "'{}' would overwrite itself",
                    item.source.display()
                ));
                match self.resolve_error(err)? {
                    Resolution::Retry => continue,
                    Resolution::Skip => return Ok(None),
                }
            }

            let replace = match self.overwrite_mode {
                OverwriteMode::Replace => true,
                OverwriteMode::Abort => {
                    return Err(VfsError::AlreadyExists(target.to_path_buf()));
                }
                OverwriteMode::Skip if self.skip_conflicts => false,
                OverwriteMode::Skip => {
                    // The policy hears about it but cannot force a replace
                    if self.ask(XferStatus::Overwrite) == Some(XferDecision::Abort) {
                        return Err(VfsError::Interrupted(format!(
                            "stopped at existing target '{}'",
                            target.display()
                        )));
                    }
                    false
                }
                OverwriteMode::Query => {
                    match self
                        .ask(XferStatus::Overwrite)
                        .unwrap_or(XferDecision::Abort)
                    {
                        XferDecision::Replace => true,
                        XferDecision::ReplaceAll => {
                            self.overwrite_mode = OverwriteMode::Replace;
                            true
                        }
                        XferDecision::Skip => false,
                        XferDecision::SkipAll => {
                            self.overwrite_mode = OverwriteMode::Skip;
                            self.skip_conflicts = true;
                            false
                        }
                        XferDecision::Retry => continue,
                        XferDecision::Abort => {
                            return Err(VfsError::Interrupted(format!(
                                "stopped at existing target '{}'",
                                target.display()
                            )));
                        }
                    }
                }
            };

            debug!(target = %target.display(), replace, "existing target resolved");
            if !replace {
                return Ok(None);
            }
            clear_target(item.kind, target)?;
            return Ok(Some(target.to_path_buf()));
        }
    }

    fn pick_unique(&mut self, item: &XferItem, target: &Path) -> Result<PathBuf> {
        let mut count = 1;
        let candidate = loop {
            let candidate = unique_name(target, count);
            if !path_exists(&candidate) {
                break candidate;
            }
            count += 1;
        };

        self.info.duplicate_name = candidate
            .file_name()
            .map(|name| name.to_string_lossy().into_owned());
        self.info.duplicate_count = count;
        self.info.target = Some(candidate.clone());
        self.info.status = XferStatus::Duplicate;
        let reported = self.emit();
        self.info.status = XferStatus::Ok;
        reported?;

        if item.kind == FileKind::Directory {
            self.remaps.push((target.to_path_buf(), candidate.clone()));
        }
        Ok(candidate)
    }

    fn copy_file(&mut self, item: &XferItem, resolved: Option<PathBuf>) -> Result<()> {
        let copier = self.copier.clone();
        let Some(source_file) = self.retrying(|_| copier.open_source(&item.source))? else {
            return self.skip_to_next(item);
        };

        self.enter(XferPhase::OpenTarget)?;
        let Some(target) = self.settle_target(item, resolved)? else {
            return self.skip_to_next(item);
        };
        let Some(target_file) = self.retrying(|_| copier.open_target(&target))? else {
            return self.skip_to_next(item);
        };

        if let Err(e) = self.enter(XferPhase::Copying) {
            drop(target_file);
            let _ = std::fs::remove_file(&target);
            return Err(e);
        }

        let mut opened = Some((source_file, target_file));
        let copied = self.retrying(|job| {
            let (mut src, mut dst) = match opened.take() {
                Some(files) => files,
                None => (
                    copier.open_source(&item.source)?,
                    copier.open_target(&target)?,
                ),
            };
            job.copy_contents(&copier, &mut src, &mut dst, &item.source, &target)
        })?;

        match copied {
            Some(bytes) => {
                trace!(source = %item.source.display(), bytes, "file copied");
                self.copied.push((item.source.clone(), item.kind));
            }
            None => self.skip_item(item),
        }
        self.enter(XferPhase::FileCompleted)
    }

    fn copy_contents(
        &mut self,
        copier: &FileCopier,
        src: &mut File,
        dst: &mut File,
        source: &Path,
        target: &Path,
    ) -> Result<u64> {
        // A retry starts the file over
        self.info.bytes_copied -= self.info.file_bytes_copied;
        self.info.file_bytes_copied = 0;

        let Self {
            ctx,
            info,
            progress,
            ..
        } = self;
        let result = copier
            .copy_stream(src, dst, source, target, |n| {
                ctx.check_cancelled()?;
                info.file_bytes_copied += n;
                info.bytes_copied += n;
                progress.emit_bytes(info)
            })
            .and_then(|bytes| {
                copier.preserve_attributes(source, target)?;
                Ok(bytes)
            });

        if result.is_err() {
            let _ = std::fs::remove_file(target);
        }
        result
    }

    fn make_directory(&mut self, item: &XferItem, resolved: Option<PathBuf>) -> Result<()> {
        self.enter(XferPhase::OpenTarget)?;
        let Some(target) = self.settle_target(item, resolved)? else {
            return self.skip_to_next(item);
        };

        let created = if target.is_dir() {
            Some(())
        } else {
            self.retrying(|_| std::fs::create_dir(&target).with_path(&target))?
        };
        match created {
            Some(()) => self.copied.push((item.source.clone(), item.kind)),
            None => self.skip_item(item),
        }
        self.enter(XferPhase::FileCompleted)
    }

    fn copy_symlink(&mut self, item: &XferItem, resolved: Option<PathBuf>) -> Result<()> {
        self.enter(XferPhase::OpenTarget)?;
        let Some(target) = self.settle_target(item, resolved)? else {
            return self.skip_to_next(item);
        };

        match self.retrying(|_| copy_link(&item.source, &target))? {
            Some(()) => self.copied.push((item.source.clone(), item.kind)),
            None => self.skip_item(item),
        }
        self.enter(XferPhase::FileCompleted)
    }

    fn cleanup(&mut self) -> Result<()> {
        if !self.options.remove_source || self.options.delete_items {
            return Ok(());
        }

        let copied = std::mem::take(&mut self.copied);
        for (source, kind) in copied.iter().rev() {
            self.ctx.check_cancelled()?;
            if *kind == FileKind::Directory && self.incomplete.contains(source) {
                debug!(path = %source.display(), "source directory kept");
                continue;
            }
            if self.retrying(|_| remove_one(source, *kind))?.is_none() {
                self.mark_incomplete(source);
            }
        }
        Ok(())
    }
}

fn remove_one(path: &Path, kind: FileKind) -> Result<()> {
    match kind {
        FileKind::Directory => std::fs::remove_dir(path).with_path(path),
        _ => std::fs::remove_file(path).with_path(path),
    }
}

/// Make room for a replacement that cannot simply truncate the target
fn clear_target(source_kind: FileKind, target: &Path) -> Result<()> {
    let metadata = std::fs::symlink_metadata(target).with_path(target)?;
    let must_remove = if metadata.is_dir() {
        source_kind != FileKind::Directory
    } else {
        source_kind != FileKind::Regular || metadata.file_type().is_symlink()
    };
    if must_remove {
        remove_path(target)?;
    }
    Ok(())
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

#[cfg(unix)]
fn copy_link(source: &Path, target: &Path) -> Result<()> {
    let link = std::fs::read_link(source).with_path(source)?;
    std::os::unix::fs::symlink(&link, target).with_path(target)
}

#[cfg(not(unix))]
fn copy_link(source: &Path, _target: &Path) -> Result<()> {
    Err(VfsError::Unsupported(format!(
        "cannot recreate symlink '{}' on this platform",
        source.display()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{AsyncHandle, CancelFlag};
    use crate::xfer::{ProgressAction, XferRequest};
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    type Seen = Arc<Mutex<Vec<XferProgressInfo>>>;

    fn ctx() -> JobContext {
        JobContext::new(AsyncHandle::from_raw(1), CancelFlag::new())
    }

    fn recorder() -> (ProgressCallback, Seen) {
        let seen: Seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback: ProgressCallback = Box::new(move |_, info| {
            sink.lock().unwrap().push(info.clone());
            ProgressAction::Continue
        });
        (callback, seen)
    }

    fn run(request: XferRequest, policy: Option<PolicyCallback>) -> (Result<()>, Vec<XferProgressInfo>) {
        let (callback, seen) = recorder();
        let ctx = ctx();
        let result = XferJob::new(&ctx, request, callback, policy, 4096, Duration::ZERO).run();
        let seen = seen.lock().unwrap().clone();
        (result, seen)
    }

    fn tree(root: &Path) {
        std::fs::create_dir_all(root.join("sub/deeper")).unwrap();
        std::fs::write(root.join("a.txt"), vec![b'a'; 10_000]).unwrap();
        std::fs::write(root.join("sub/b.txt"), b"bee").unwrap();
        std::fs::write(root.join("sub/deeper/c.txt"), b"sea").unwrap();
    }

    #[test]
    fn test_recursive_copy_phases_are_monotonic() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src");
        let dst = dir.path().join("dst");
        tree(&src);

        let request = XferRequest::copy(vec![src.clone()], vec![dst.clone()]).recursive(true);
        let (result, seen) = run(request, None);
        result.unwrap();

        let ranks: Vec<u8> = seen.iter().map(|i| i.phase.rank()).collect();
        assert!(ranks.windows(2).all(|w| w[0] <= w[1]), "{:?}", ranks);
        let last = seen.last().unwrap();
        assert_eq!(last.phase, XferPhase::Completed);
        assert_eq!(last.status, XferStatus::Ok);

        // Totals are known before the first byte is copied
        let first_copy = seen.iter().find(|i| i.phase == XferPhase::Copying).unwrap();
        assert_eq!(first_copy.files_total, 6);
        assert_eq!(first_copy.bytes_total, 10_006);
        assert_eq!(last.bytes_copied, 10_006);

        assert_eq!(std::fs::read(dst.join("a.txt")).unwrap().len(), 10_000);
        assert_eq!(std::fs::read(dst.join("sub/deeper/c.txt")).unwrap(), b"sea");
        assert!(src.join("sub/b.txt").exists());
    }

    #[test]
    fn test_never_replace_keeps_existing_target() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("new.txt");
        let dst = dir.path().join("old.txt");
        std::fs::write(&src, b"new contents").unwrap();
        std::fs::write(&dst, b"old contents").unwrap();

        let asked = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&asked);
        let policy: PolicyCallback = Box::new(move |info| {
            assert_eq!(info.status, XferStatus::Overwrite);
            *counter.lock().unwrap() += 1;
            XferDecision::Skip
        });

        let request = XferRequest::copy(vec![src], vec![dst.clone()])
            .with_overwrite_mode(OverwriteMode::Skip);
        let (result, _) = run(request, Some(policy));
        result.unwrap();

        assert_eq!(*asked.lock().unwrap(), 1);
        assert_eq!(std::fs::read(&dst).unwrap(), b"old contents");
    }

    #[test]
    fn test_replace_all_answers_once() {
        let dir = TempDir::new().unwrap();
        let mut sources = Vec::new();
        let mut targets = Vec::new();
        for name in ["one", "two", "three"] {
            let src = dir.path().join(format!("{}.src", name));
            let dst = dir.path().join(format!("{}.dst", name));
            std::fs::write(&src, name).unwrap();
            std::fs::write(&dst, b"stale").unwrap();
            sources.push(src);
            targets.push(dst);
        }

        let asked = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&asked);
        let policy: PolicyCallback = Box::new(move |_| {
            *counter.lock().unwrap() += 1;
            XferDecision::ReplaceAll
        });

        let request = XferRequest::copy(sources, targets.clone());
        let (result, _) = run(request, Some(policy));
        result.unwrap();

        assert_eq!(*asked.lock().unwrap(), 1);
        assert_eq!(std::fs::read(&targets[2]).unwrap(), b"three");
    }

    #[test]
    fn test_query_without_policy_aborts() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("a");
        let dst = dir.path().join("b");
        std::fs::write(&src, b"a").unwrap();
        std::fs::write(&dst, b"b").unwrap();

        let (result, seen) = run(XferRequest::copy(vec![src], vec![dst.clone()]), None);
        assert!(matches!(result, Err(VfsError::Interrupted(_))));
        let last = seen.last().unwrap();
        assert_eq!(last.phase, XferPhase::Completed);
        assert_eq!(last.status, XferStatus::Error);
        assert_eq!(std::fs::read(&dst).unwrap(), b"b");
    }

    #[test]
    fn test_skip_error_mode_continues() {
        let dir = TempDir::new().unwrap();
        let good = dir.path().join("good.txt");
        std::fs::write(&good, b"fine").unwrap();

        let request = XferRequest::copy(
            vec![dir.path().join("missing.txt"), good],
            vec![dir.path().join("out1.txt"), dir.path().join("out2.txt")],
        )
        .with_error_mode(ErrorMode::Skip);
        let (result, _) = run(request, None);
        result.unwrap();

        assert!(!dir.path().join("out1.txt").exists());
        assert_eq!(std::fs::read(dir.path().join("out2.txt")).unwrap(), b"fine");
    }

    #[test]
    fn test_abort_error_mode_fails() {
        let dir = TempDir::new().unwrap();
        let request = XferRequest::copy(
            vec![dir.path().join("missing.txt")],
            vec![dir.path().join("out.txt")],
        );
        let (result, seen) = run(request, None);
        assert!(matches!(result, Err(VfsError::NotFound(_))));
        assert_eq!(seen.last().unwrap().phase, XferPhase::Completed);
    }

    #[test]
    fn test_query_retry_after_fix() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("late.txt");
        let dst = dir.path().join("out.txt");

        let fix = src.clone();
        let policy: PolicyCallback = Box::new(move |info| {
            assert_eq!(info.status, XferStatus::Error);
            assert!(info.error.is_some());
            std::fs::write(&fix, b"arrived").unwrap();
            XferDecision::Retry
        });
        let request =
            XferRequest::copy(vec![src], vec![dst.clone()]).with_error_mode(ErrorMode::Query);
        let (result, _) = run(request, Some(policy));
        result.unwrap();
        assert_eq!(std::fs::read(&dst).unwrap(), b"arrived");
    }

    #[test]
    fn test_move_by_rename_and_by_copy() {
        for same_fs_rename in [true, false] {
            let dir = TempDir::new().unwrap();
            let src = dir.path().join("src");
            let dst = dir.path().join("dst");
            tree(&src);

            let mut request = XferRequest::move_items(vec![src.clone()], vec![dst.clone()]).recursive(true);
            request.options.same_fs_rename = same_fs_rename;
            let (result, seen) = run(request, None);
            result.unwrap();

            assert!(!src.exists(), "rename={}", same_fs_rename);
            assert_eq!(std::fs::read(dst.join("sub/b.txt")).unwrap(), b"bee");
            assert_eq!(seen.last().unwrap().bytes_copied, 10_006);
            let moved = seen.iter().any(|i| i.phase == XferPhase::Moving);
            assert_eq!(moved, same_fs_rename);
        }
    }

    #[test]
    fn test_delete_tree_and_empty_directory() {
        let dir = TempDir::new().unwrap();
        let gone = dir.path().join("gone");
        let kept = dir.path().join("kept");
        tree(&gone);
        tree(&kept);

        let (result, seen) = run(XferRequest::delete(vec![gone.clone()]).recursive(true), None);
        result.unwrap();
        assert!(!gone.exists());
        assert!(seen.iter().any(|i| i.phase == XferPhase::Deleting));

        let mut request = XferRequest::delete(vec![kept.clone()]).recursive(true);
        request.options.empty_directories = true;
        let (result, _) = run(request, None);
        result.unwrap();
        assert!(kept.is_dir());
        assert_eq!(std::fs::read_dir(&kept).unwrap().count(), 0);
    }

    #[test]
    fn test_unique_names_on_conflict() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("report.txt");
        let dst = dir.path().join("out/report.txt");
        std::fs::create_dir(dir.path().join("out")).unwrap();
        std::fs::write(&src, b"fresh").unwrap();
        std::fs::write(&dst, b"original").unwrap();

        let mut request = XferRequest::copy(vec![src], vec![dst.clone()]);
        request.options.use_unique_names = true;
        let (result, seen) = run(request, None);
        result.unwrap();

        assert_eq!(std::fs::read(&dst).unwrap(), b"original");
        assert_eq!(
            std::fs::read(dir.path().join("out/report (copy 1).txt")).unwrap(),
            b"fresh"
        );
        let duplicate = seen.iter().find(|i| i.status == XferStatus::Duplicate).unwrap();
        assert_eq!(duplicate.duplicate_count, 1);
        assert_eq!(duplicate.duplicate_name.as_deref(), Some("report (copy 1).txt"));
    }

    #[test]
    fn test_abort_from_progress_cancels_and_completes() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("big.bin");
        let dst = dir.path().join("copy.bin");
        std::fs::write(&src, vec![7u8; 64 * 1024]).unwrap();

        let seen: Seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback: ProgressCallback = Box::new(move |_, info| {
            sink.lock().unwrap().push(info.clone());
            if info.phase == XferPhase::Copying && info.file_bytes_copied > 0 {
                ProgressAction::Abort
            } else {
                ProgressAction::Continue
            }
        });

        let ctx = ctx();
        let request = XferRequest::copy(vec![src], vec![dst.clone()]).with_buffer_size(1024);
        let result = XferJob::new(&ctx, request, callback, None, 4096, Duration::ZERO).run();

        assert!(result.unwrap_err().is_cancelled());
        let seen = seen.lock().unwrap();
        let last = seen.last().unwrap();
        assert_eq!(last.phase, XferPhase::Completed);
        assert_eq!(last.status, XferStatus::Cancelled);
        assert!(!dst.exists());
    }

    fn conflicting_pairs(root: &Path, count: usize) -> (Vec<PathBuf>, Vec<PathBuf>) {
        let mut sources = Vec::new();
        let mut targets = Vec::new();
        for index in 0..count {
            let src = root.join(format!("{}.src", index));
            let dst = root.join(format!("{}.dst", index));
            std::fs::write(&src, b"fresh").unwrap();
            std::fs::write(&dst, b"stale").unwrap();
            sources.push(src);
            targets.push(dst);
        }
        (sources, targets)
    }

    fn counting_policy(decision: XferDecision) -> (PolicyCallback, Arc<Mutex<usize>>) {
        let asked = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&asked);
        let policy: PolicyCallback = Box::new(move |_| {
            *counter.lock().unwrap() += 1;
            decision
        });
        (policy, asked)
    }

    #[test]
    fn test_skip_all_conflicts_asks_once() {
        let dir = TempDir::new().unwrap();
        let (sources, targets) = conflicting_pairs(dir.path(), 3);
        let (policy, asked) = counting_policy(XferDecision::SkipAll);

        let request = XferRequest::copy(sources, targets.clone())
            .with_overwrite_mode(OverwriteMode::Query);
        let (result, _) = run(request, Some(policy));
        result.unwrap();

        assert_eq!(*asked.lock().unwrap(), 1);
        for target in &targets {
            assert_eq!(std::fs::read(target).unwrap(), b"stale");
        }
    }

    #[test]
    fn test_skip_all_errors_asks_once() {
        let dir = TempDir::new().unwrap();
        let good = dir.path().join("good.txt");
        std::fs::write(&good, b"fine").unwrap();
        let mut sources: Vec<PathBuf> = (0..3)
            .map(|i| dir.path().join(format!("missing{}.txt", i)))
            .collect();
        sources.push(good);
        let targets: Vec<PathBuf> = (0..4)
            .map(|i| dir.path().join(format!("out{}.txt", i)))
            .collect();
        let (policy, asked) = counting_policy(XferDecision::SkipAll);

        let request = XferRequest::copy(sources, targets.clone()).with_error_mode(ErrorMode::Query);
        let (result, _) = run(request, Some(policy));
        result.unwrap();

        assert_eq!(*asked.lock().unwrap(), 1);
        assert!(!targets[0].exists());
        assert_eq!(std::fs::read(&targets[3]).unwrap(), b"fine");
    }

    #[test]
    fn test_abort_overwrite_mode_fails_on_existing_target() {
        let dir = TempDir::new().unwrap();
        let (sources, targets) = conflicting_pairs(dir.path(), 1);
        let (policy, asked) = counting_policy(XferDecision::Replace);

        let request = XferRequest::copy(sources, targets.clone())
            .with_overwrite_mode(OverwriteMode::Abort);
        let (result, seen) = run(request, Some(policy));

        assert!(matches!(result, Err(VfsError::AlreadyExists(p)) if p == targets[0]));
        assert_eq!(*asked.lock().unwrap(), 0);
        assert_eq!(std::fs::read(&targets[0]).unwrap(), b"stale");
        let last = seen.last().unwrap();
        assert_eq!(last.phase, XferPhase::Completed);
        assert_eq!(last.status, XferStatus::Error);
    }

    #[test]
    fn test_missing_target_parent() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("note.txt");
        std::fs::write(&src, b"note").unwrap();

        // Recursive transfers create the missing parents
        let created = dir.path().join("a/b/note.txt");
        let request = XferRequest::copy(vec![src.clone()], vec![created.clone()]).recursive(true);
        let (result, seen) = run(request, None);
        result.unwrap();
        assert_eq!(std::fs::read(&created).unwrap(), b"note");
        assert!(seen.iter().any(|i| i.phase == XferPhase::CheckingDestination));

        let absent = dir.path().join("x/y/note.txt");
        let (result, _) = run(XferRequest::copy(vec![src], vec![absent.clone()]), None);
        assert!(matches!(result, Err(VfsError::NotFound(p)) if p == dir.path().join("x/y")));
        assert!(!dir.path().join("x").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_insufficient_space_stops_before_copying() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("huge.img");
        let size = 1u64 << 43;
        let file = File::create(&src).unwrap();
        // Needs sparse files and a known free-space figure below the size
        if file.set_len(size).is_err() {
            return;
        }
        drop(file);
        match crate::fs::available_space(dir.path()) {
            Some(available) if available < size => {}
            _ => return,
        }

        let dst = dir.path().join("copy.img");
        let (result, seen) = run(XferRequest::copy(vec![src], vec![dst.clone()]), None);

        assert!(matches!(result, Err(VfsError::InsufficientSpace { required, .. }) if required == size));
        assert!(!seen.iter().any(|i| i.phase == XferPhase::Copying));
        assert!(!dst.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_follow_links_copies_link_targets() {
        for follow_links in [true, false] {
            let dir = TempDir::new().unwrap();
            let src = dir.path().join("src");
            std::fs::create_dir(&src).unwrap();
            std::fs::write(src.join("real.txt"), b"payload").unwrap();
            std::os::unix::fs::symlink("real.txt", src.join("link.txt")).unwrap();

            let dst = dir.path().join("dst");
            let mut request = XferRequest::copy(vec![src], vec![dst.clone()]).recursive(true);
            request.options.follow_links = follow_links;
            let (result, _) = run(request, None);
            result.unwrap();

            let copied = dst.join("link.txt");
            let is_link = std::fs::symlink_metadata(&copied)
                .unwrap()
                .file_type()
                .is_symlink();
            assert_eq!(is_link, !follow_links, "follow_links={}", follow_links);
            assert_eq!(std::fs::read(&copied).unwrap(), b"payload");
        }
    }

    #[test]
    fn test_validate_rejects_bad_requests() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("folder");
        std::fs::create_dir(&src).unwrap();

        let mismatched = XferRequest::copy(vec![src.clone()], Vec::new());
        assert!(matches!(validate(&mismatched), Err(VfsError::InvalidArgument(_))));

        let into_itself = XferRequest::move_items(vec![src.clone()], vec![src.join("inner")]);
        assert!(matches!(validate(&into_itself), Err(VfsError::InvalidArgument(_))));

        let empty = XferRequest::delete(Vec::new());
        assert!(validate(&empty).is_err());

        assert!(validate(&XferRequest::delete(vec![src])).is_ok());
    }
}
