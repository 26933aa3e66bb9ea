//! Terminal rendering of transfer progress
//!
//! Uses indicatif for:
//! - an item count bar
//! - a byte bar with throughput and ETA
//! - a status line naming the phase and current item

use crate::xfer::{ProgressAction, XferPhase, XferProgressInfo, XferStatus};
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const FILES_TEMPLATE: &str = "{prefix:.bold.dim} [{bar:40.cyan/blue}] {pos}/{len} items ({percent}%)";
const BYTES_TEMPLATE: &str =
    "{prefix:.bold.dim} [{bar:40.green/white}] {bytes}/{total_bytes} ({bytes_per_sec}, ETA {eta})";

fn bar_style(template: &str) -> ProgressStyle {
    ProgressStyle::default_bar()
        .template(template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ")
}

/// Progress bars for one transfer
#[derive(Clone)]
pub struct XferReporter {
    multi: MultiProgress,
    status: ProgressBar,
    files_bar: ProgressBar,
    bytes_bar: ProgressBar,
    start_time: Instant,
    enabled: bool,
    /// Set from the Ctrl-C handler; the next report aborts the transfer
    abort: Arc<AtomicBool>,
}

impl XferReporter {
    /// Create a reporter drawing to stderr
    pub fn new() -> Self {
        Self::with_target(ProgressDrawTarget::stderr(), true)
    }

    /// Create a reporter that draws nothing (quiet mode)
    pub fn disabled() -> Self {
        Self::with_target(ProgressDrawTarget::hidden(), false)
    }

    fn with_target(target: ProgressDrawTarget, enabled: bool) -> Self {
        let multi = MultiProgress::with_draw_target(target);

        let status = multi.add(ProgressBar::new_spinner());
        status.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        if enabled {
            status.enable_steady_tick(Duration::from_millis(120));
        }

        let files_bar = multi.add(ProgressBar::new(0));
        files_bar.set_style(bar_style(FILES_TEMPLATE));
        files_bar.set_prefix("Items");

        let bytes_bar = multi.add(ProgressBar::new(0));
        bytes_bar.set_style(bar_style(BYTES_TEMPLATE));
        bytes_bar.set_prefix("Data ");

        Self {
            multi,
            status,
            files_bar,
            bytes_bar,
            start_time: Instant::now(),
            enabled,
            abort: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Whether anything is drawn
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Flag that makes the next report abort the transfer
    pub fn abort_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.abort)
    }

    /// Apply one report
    pub fn update(&self, info: &XferProgressInfo) -> ProgressAction {
        if info.phase.rank() > XferPhase::Collecting.rank() {
            self.files_bar.set_length(info.files_total);
            self.bytes_bar.set_length(info.bytes_total);
        }
        self.files_bar.set_position(info.file_index);
        self.bytes_bar.set_position(info.bytes_copied);

        match info.status {
            XferStatus::Duplicate => {
                if let Some(name) = &info.duplicate_name {
                    self.status.println(format!("renamed to {}", name));
                }
            }
            XferStatus::Error => {
                if let Some(error) = &info.error {
                    self.status.println(format!("error: {}", error));
                }
            }
            _ => {}
        }

        if info.phase == XferPhase::Completed {
            self.finish(info);
        } else {
            self.status.set_message(status_line(info));
        }

        if self.abort.load(Ordering::Relaxed) {
            ProgressAction::Abort
        } else {
            ProgressAction::Continue
        }
    }

    /// Run `f` with the bars hidden, for prompts
    pub fn suspend<F: FnOnce() -> R, R>(&self, f: F) -> R {
        self.multi.suspend(f)
    }

    fn finish(&self, info: &XferProgressInfo) {
        let summary = self.summary(info);
        match info.status {
            XferStatus::Ok => {
                self.status.finish_with_message(format!(
                    "done: {} items, {}",
                    summary.files_total,
                    humansize::format_size(summary.bytes_copied, humansize::BINARY)
                ));
                self.files_bar.finish();
                self.bytes_bar.finish();
            }
            XferStatus::Cancelled => {
                self.status.finish_with_message("cancelled");
                self.files_bar.abandon();
                self.bytes_bar.abandon();
            }
            _ => {
                let error = info.error.as_deref().unwrap_or("transfer failed");
                self.status.finish_with_message(format!("failed: {}", error));
                self.files_bar.abandon();
                self.bytes_bar.abandon();
            }
        }
    }

    /// Totals of the transfer as of `info`
    pub fn summary(&self, info: &XferProgressInfo) -> TransferSummary {
        let elapsed = self.start_time.elapsed();
        let seconds = elapsed.as_secs_f64();
        TransferSummary {
            files_total: info.files_total,
            bytes_total: info.bytes_total,
            bytes_copied: info.bytes_copied,
            elapsed,
            throughput: if seconds > 0.0 {
                info.bytes_copied as f64 / seconds
            } else {
                0.0
            },
        }
    }
}

impl Default for XferReporter {
    fn default() -> Self {
        Self::new()
    }
}

fn status_line(info: &XferProgressInfo) -> String {
    match info.source.as_deref() {
        Some(source) if info.phase.is_per_item() => {
            format!("{} {}", info.phase, shorten(source, 60))
        }
        _ => info.phase.to_string(),
    }
}

fn shorten(path: &Path, max: usize) -> String {
    let display = path.display().to_string();
    let count = display.chars().count();
    if count <= max {
        return display;
    }
    let tail: String = display.chars().skip(count - (max - 3)).collect();
    format!("...{}", tail)
}

/// Totals printed after a transfer
#[derive(Debug, Clone)]
pub struct TransferSummary {
    /// Items collected
    pub files_total: u64,
    /// Bytes collected
    pub bytes_total: u64,
    /// Bytes transferred
    pub bytes_copied: u64,
    /// Wall time
    pub elapsed: Duration,
    /// Bytes per second
    pub throughput: f64,
}

impl TransferSummary {
    /// Completion percentage
    pub fn percentage(&self) -> f64 {
        if self.bytes_total == 0 {
            100.0
        } else {
            (self.bytes_copied as f64 / self.bytes_total as f64) * 100.0
        }
    }

    /// Print to stdout
    pub fn print(&self) {
        println!("Items:    {}", self.files_total);
        println!(
            "Bytes:    {}/{}",
            humansize::format_size(self.bytes_copied, humansize::BINARY),
            humansize::format_size(self.bytes_total, humansize::BINARY)
        );
        println!("Elapsed:  {:.1?}", self.elapsed);
        println!(
            "Speed:    {}/s",
            humansize::format_size(self.throughput as u64, humansize::BINARY)
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn report(phase: XferPhase, copied: u64) -> XferProgressInfo {
        XferProgressInfo {
            phase,
            files_total: 4,
            bytes_total: 1000,
            bytes_copied: copied,
            file_index: 2,
            source: Some(PathBuf::from("/data/file.bin")),
            ..Default::default()
        }
    }

    #[test]
    fn test_reporter_tracks_reports() {
        let reporter = XferReporter::disabled();
        assert!(!reporter.is_enabled());

        assert_eq!(reporter.update(&report(XferPhase::Copying, 500)), ProgressAction::Continue);
        let summary = reporter.summary(&report(XferPhase::Copying, 500));
        assert_eq!(summary.percentage(), 50.0);
        assert_eq!(reporter.bytes_bar.position(), 500);
        assert_eq!(reporter.files_bar.length(), Some(4));
    }

    #[test]
    fn test_abort_flag_aborts() {
        let reporter = XferReporter::disabled();
        let info = report(XferPhase::Copying, 10);
        assert_eq!(reporter.update(&info), ProgressAction::Continue);

        // Clones share the flag, as the interrupt handler's copy does
        reporter.clone().abort_flag().store(true, Ordering::SeqCst);
        assert_eq!(reporter.update(&info), ProgressAction::Abort);
    }

    #[test]
    fn test_shorten_long_paths() {
        let long = PathBuf::from(format!("/{}", "x".repeat(100)));
        let short = shorten(&long, 20);
        assert_eq!(short.chars().count(), 20);
        assert!(short.starts_with("..."));
        assert_eq!(status_line(&report(XferPhase::Collecting, 0)), "collecting");
    }
}
