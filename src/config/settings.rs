//! Configuration settings for asyncvfs
//!
//! Defines the engine configuration (loadable from JSON), the CLI arguments
//! of the `asyncvfs` binary, and how the two are merged.

use crate::error::{IoResultExt, Result, VfsError};
use crate::xfer::{ErrorMode, OverwriteMode};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// asyncvfs - asynchronous file operation engine
#[derive(Parser, Debug, Clone)]
#[command(name = "asyncvfs")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Asynchronous copy, move, delete and listing on a job engine")]
#[command(long_about = r#"
asyncvfs runs file operations as cancelable jobs on a worker pool.

Examples:
  asyncvfs copy -r ./photos /mnt/backup        # Recursive copy
  asyncvfs move a.txt b.txt --overwrite skip   # Never replace existing files
  asyncvfs delete -r ./build                   # Remove a tree
  asyncvfs list /etc --batch 16 --all          # Chunked directory listing
"#)]
pub struct CliArgs {
    /// Engine configuration file (JSON)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Maximum worker threads for the pool scheduler
    #[arg(short = 'w', long, global = true, env = "ASYNCVFS_WORKERS", value_name = "NUM")]
    pub workers: Option<usize>,

    /// Scheduling strategy
    #[arg(long, global = true, value_enum)]
    pub scheduler: Option<SchedulerKind>,

    /// Copy buffer size (e.g., 64K, 1M)
    #[arg(short = 'b', long, global = true, value_name = "SIZE")]
    pub buffer_size: Option<String>,

    /// Verbose output (can be repeated: -v, -vv, -vvv)
    #[arg(short = 'v', long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (suppress non-error output)
    #[arg(short = 'q', long, global = true)]
    pub quiet: bool,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value = "text")]
    pub log_format: LogFormat,

    /// Subcommand
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Copy files or directories
    #[command(name = "copy")]
    Copy {
        /// Source paths
        #[arg(required = true, num_args = 1..)]
        sources: Vec<PathBuf>,
        /// Destination file or directory
        destination: PathBuf,
        #[command(flatten)]
        xfer: XferArgs,
    },

    /// Move files or directories
    #[command(name = "move")]
    Move {
        /// Source paths
        #[arg(required = true, num_args = 1..)]
        sources: Vec<PathBuf>,
        /// Destination file or directory
        destination: PathBuf,
        #[command(flatten)]
        xfer: XferArgs,
    },

    /// Delete files or directories
    #[command(name = "delete")]
    Delete {
        /// Paths to delete
        #[arg(required = true, num_args = 1..)]
        paths: Vec<PathBuf>,
        /// Recurse into directories
        #[arg(short = 'r', long)]
        recursive: bool,
        /// Empty directories but keep them
        #[arg(long)]
        contents_only: bool,
        /// What to do when an item cannot be removed
        #[arg(long, value_enum, default_value = "abort")]
        on_error: ErrorMode,
        /// Show progress bars
        #[arg(short = 'p', long)]
        progress: bool,
    },

    /// List a directory in batches
    #[command(name = "list")]
    List {
        /// Directory to list
        path: PathBuf,
        /// Entries per batch (defaults to the engine setting)
        #[arg(long, value_name = "NUM")]
        batch: Option<usize>,
        /// Include hidden entries
        #[arg(short = 'a', long)]
        all: bool,
        /// Follow symbolic links
        #[arg(short = 'L', long)]
        follow_links: bool,
        /// Sort entries by name
        #[arg(short = 's', long)]
        sort: bool,
        /// Output format
        #[arg(long, value_enum, default_value = "text")]
        output_format: OutputFormat,
    },
}

/// Options shared by copy and move
#[derive(Args, Debug, Clone)]
pub struct XferArgs {
    /// Recurse into directories
    #[arg(short = 'r', long)]
    pub recursive: bool,

    /// Follow symbolic links
    #[arg(short = 'L', long)]
    pub follow_links: bool,

    /// What to do when a target already exists
    #[arg(long, value_enum, default_value = "query")]
    pub overwrite: OverwriteMode,

    /// What to do when an item fails
    #[arg(long, value_enum, default_value = "query")]
    pub on_error: ErrorMode,

    /// Pick a fresh "name (copy N)" instead of overwriting
    #[arg(long)]
    pub unique_names: bool,

    /// Do not copy modification and access times
    #[arg(long)]
    pub no_preserve_times: bool,

    /// Show progress bars
    #[arg(short = 'p', long)]
    pub progress: bool,
}

/// Which scheduler runs jobs
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SchedulerKind {
    /// Bounded, priority-ordered worker pool
    #[default]
    Pool,
    /// A dedicated thread per operation
    ThreadPerJob,
}

/// Log line format
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable text
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

/// Output format for listings
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Human-readable text
    #[default]
    Text,
    /// JSON lines
    Json,
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Scheduling strategy
    pub scheduler: SchedulerKind,
    /// Worker cap for the pool scheduler
    pub max_workers: usize,
    /// Idle time before a pool worker exits
    pub idle_timeout_ms: u64,
    /// Sleep between checks while draining at shutdown
    pub shutdown_poll_interval_ms: u64,
    /// Default transfer chunk size in bytes
    pub buffer_size: usize,
    /// Minimum gap between byte-progress callbacks
    pub update_interval_ms: u64,
    /// Default listing batch size
    pub items_per_notification: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerKind::Pool,
            max_workers: num_cpus::get().max(crate::core::MIN_WORKERS),
            idle_timeout_ms: 30_000,
            shutdown_poll_interval_ms: 10,
            buffer_size: crate::fs::DEFAULT_BUFFER_SIZE,
            update_interval_ms: 100,
            items_per_notification: 32,
        }
    }
}

impl EngineConfig {
    /// Read a JSON configuration file; missing fields take defaults
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).with_path(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.scheduler == SchedulerKind::Pool && self.max_workers < crate::core::MIN_WORKERS {
            return Err(VfsError::LimitBelowMinimum {
                requested: self.max_workers,
                minimum: crate::core::MIN_WORKERS,
            });
        }
        if self.buffer_size == 0 {
            return Err(VfsError::config("buffer_size must be at least 1 byte"));
        }
        if self.items_per_notification == 0 {
            return Err(VfsError::config("items_per_notification must be at least 1"));
        }
        Ok(())
    }

    /// Build the configuration for a CLI run: file, then flags and environment
    pub fn from_cli(args: &CliArgs) -> Result<Self> {
        let mut config = match &args.config {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };

        if let Some(workers) = args.workers {
            config.max_workers = workers;
        }
        if let Some(kind) = args.scheduler {
            config.scheduler = kind;
        }
        if let Some(size) = &args.buffer_size {
            config.buffer_size = usize::try_from(parse_size(size)?)
                .map_err(|_| VfsError::config(format!("buffer size too large: {}", size)))?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Idle time before a pool worker exits
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    /// Sleep between drain checks at shutdown
    pub fn shutdown_poll_interval(&self) -> Duration {
        Duration::from_millis(self.shutdown_poll_interval_ms)
    }

    /// Minimum gap between byte-progress callbacks
    pub fn update_interval(&self) -> Duration {
        Duration::from_millis(self.update_interval_ms)
    }
}

/// Parse human-readable size string to bytes (`512`, `64K`, `1.5M`, `2GB`)
pub fn parse_size(size: &str) -> Result<u64> {
    let size = size.trim().to_uppercase();
    if size.is_empty() {
        return Err(VfsError::config("empty size string"));
    }

    let digits_end = size
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(size.len());
    let (number, suffix) = size.split_at(digits_end);

    let multiplier: u64 = match suffix.trim() {
        "" | "B" => 1,
        "K" | "KB" => 1 << 10,
        "M" | "MB" => 1 << 20,
        "G" | "GB" => 1 << 30,
        "T" | "TB" => 1 << 40,
        other => return Err(VfsError::config(format!("unknown size suffix: {}", other))),
    };

    let value: f64 = number
        .parse()
        .map_err(|_| VfsError::config(format!("invalid number: {}", number)))?;

    Ok((value * multiplier as f64) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("1024").unwrap(), 1024);
        assert_eq!(parse_size("64K").unwrap(), 64 * 1024);
        assert_eq!(parse_size("1kb").unwrap(), 1024);
        assert_eq!(parse_size("1M").unwrap(), 1024 * 1024);
        assert_eq!(parse_size("1G").unwrap(), 1024 * 1024 * 1024);
        assert_eq!(parse_size("1.5M").unwrap(), 1024 * 1024 * 3 / 2);
        assert!(parse_size("").is_err());
        assert!(parse_size("12Q").is_err());
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.max_workers >= crate::core::MIN_WORKERS);
        assert_eq!(config.update_interval(), Duration::from_millis(100));
    }

    #[test]
    fn test_load_partial_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "scheduler": "thread-per-job", "max_workers": 1 }}"#).unwrap();

        let config = EngineConfig::load(file.path()).unwrap();
        assert_eq!(config.scheduler, SchedulerKind::ThreadPerJob);
        // Worker cap is irrelevant without a pool
        assert_eq!(config.max_workers, 1);
        assert_eq!(config.buffer_size, crate::fs::DEFAULT_BUFFER_SIZE);
    }

    #[test]
    fn test_pool_below_minimum_rejected() {
        let config = EngineConfig {
            max_workers: 1,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(VfsError::LimitBelowMinimum { requested: 1, .. })
        ));
    }

    #[test]
    fn test_cli_overrides() {
        let args = CliArgs::parse_from([
            "asyncvfs",
            "--workers",
            "3",
            "--scheduler",
            "thread-per-job",
            "-b",
            "4K",
            "list",
            "/tmp",
        ]);
        let config = EngineConfig::from_cli(&args).unwrap();
        assert_eq!(config.max_workers, 3);
        assert_eq!(config.scheduler, SchedulerKind::ThreadPerJob);
        assert_eq!(config.buffer_size, 4096);
        assert!(matches!(args.command, Commands::List { .. }));
    }
}
