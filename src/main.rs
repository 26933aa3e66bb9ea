//! asyncvfs CLI - copy, move, delete and list on the job engine

use anyhow::{bail, Context, Result};
use asyncvfs::config::{CliArgs, Commands, EngineConfig, LogFormat, OutputFormat, XferArgs};
use asyncvfs::dir::{ListAction, ListStatus};
use asyncvfs::fs::{FileInfo, FileKind};
use asyncvfs::progress::XferReporter;
use asyncvfs::xfer::{
    ErrorMode, OverwriteMode, PolicyCallback, ProgressCallback, XferDecision, XferOptions,
    XferPhase, XferProgressInfo, XferRequest, XferStatus,
};
use asyncvfs::{Engine, JobOutcome, JobTicket};
use clap::Parser;
use parking_lot::Mutex;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::debug;
use tracing_subscriber::EnvFilter;

fn main() {
    let args = CliArgs::parse();
    init_logging(&args);

    if let Err(e) = run(args) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn init_logging(args: &CliArgs) {
    let level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("asyncvfs={}", level)));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    match args.log_format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn run(args: CliArgs) -> Result<()> {
    let config = EngineConfig::from_cli(&args).context("invalid configuration")?;
    debug!(?config, "configuration");
    let engine = Engine::init(config).context("failed to start engine")?;

    let result = match &args.command {
        Commands::Copy {
            sources,
            destination,
            xfer,
        } => cmd_xfer(&engine, sources, destination, xfer, false, args.quiet),
        Commands::Move {
            sources,
            destination,
            xfer,
        } => cmd_xfer(&engine, sources, destination, xfer, true, args.quiet),
        Commands::Delete {
            paths,
            recursive,
            contents_only,
            on_error,
            progress,
        } => {
            let mut request = XferRequest::delete(paths.clone())
                .recursive(*recursive)
                .with_error_mode(*on_error);
            request.options.empty_directories = *contents_only;
            let reporter = reporter(*progress, args.quiet);
            let policy = (*on_error == ErrorMode::Query)
                .then(|| prompt_policy(reporter.clone(), OverwriteMode::Skip));
            run_xfer(&engine, request, reporter, policy, args.quiet)
        }
        Commands::List {
            path,
            batch,
            all,
            follow_links,
            sort,
            output_format,
        } => cmd_list(&engine, path, *batch, *all, *follow_links, *sort, *output_format),
    };

    engine.shutdown();
    result
}

fn reporter(progress: bool, quiet: bool) -> XferReporter {
    if progress && !quiet {
        XferReporter::new()
    } else {
        XferReporter::disabled()
    }
}

/// One target per source: inside `destination` when it is a directory
fn targets_for(sources: &[PathBuf], destination: &Path) -> Result<Vec<PathBuf>> {
    if destination.is_dir() {
        return sources
            .iter()
            .map(|source| {
                let name = source
                    .file_name()
                    .with_context(|| format!("cannot name a target for '{}'", source.display()))?;
                Ok(destination.join(name))
            })
            .collect();
    }
    if sources.len() == 1 {
        return Ok(vec![destination.to_path_buf()]);
    }
    bail!("destination '{}' is not a directory", destination.display())
}

fn cmd_xfer(
    engine: &Engine,
    sources: &[PathBuf],
    destination: &Path,
    args: &XferArgs,
    remove_source: bool,
    quiet: bool,
) -> Result<()> {
    let targets = targets_for(sources, destination)?;
    let options = XferOptions {
        recursive: args.recursive,
        follow_links: args.follow_links,
        remove_source,
        use_unique_names: args.unique_names,
        preserve_times: !args.no_preserve_times,
        ..XferOptions::default()
    };
    let request = XferRequest::copy(sources.to_vec(), targets)
        .with_options(options)
        .with_error_mode(args.on_error)
        .with_overwrite_mode(args.overwrite);

    let reporter = reporter(args.progress, quiet);
    let asks = args.on_error == ErrorMode::Query || args.overwrite == OverwriteMode::Query;
    let policy = asks.then(|| prompt_policy(reporter.clone(), args.overwrite));
    run_xfer(engine, request, reporter, policy, quiet)
}

fn run_xfer(
    engine: &Engine,
    request: XferRequest,
    reporter: XferReporter,
    policy: Option<PolicyCallback>,
    quiet: bool,
) -> Result<()> {
    let last: Arc<Mutex<Option<XferProgressInfo>>> = Arc::new(Mutex::new(None));
    let progress: ProgressCallback = {
        let reporter = reporter.clone();
        let last = Arc::clone(&last);
        Box::new(move |_, info| {
            if info.phase == XferPhase::Completed {
                *last.lock() = Some(info.clone());
            }
            reporter.update(info)
        })
    };

    let abort = reporter.abort_flag();
    ctrlc::set_handler(move || abort.store(true, Ordering::SeqCst))
        .context("failed to set signal handler")?;

    let ticket = engine.xfer(request, progress, policy)?;
    finish(ticket, || {
        if !quiet {
            if let Some(info) = last.lock().take() {
                reporter.summary(&info).print();
            }
        }
    })
}

fn finish(ticket: JobTicket, on_success: impl FnOnce()) -> Result<()> {
    match ticket.wait() {
        JobOutcome::Completed => {
            on_success();
            Ok(())
        }
        JobOutcome::Cancelled => bail!("operation cancelled"),
        JobOutcome::Failed(message) => bail!(message),
        JobOutcome::Rejected(reason) => bail!("operation rejected: {}", reason),
    }
}

/// Policy that asks on the terminal
///
/// Conflicts are only asked about when `overwrite` is `Query`; otherwise the
/// notification is answered with `Skip`.
fn prompt_policy(reporter: XferReporter, overwrite: OverwriteMode) -> PolicyCallback {
    Box::new(move |info| {
        if info.status == XferStatus::Overwrite && overwrite != OverwriteMode::Query {
            return XferDecision::Skip;
        }
        reporter.suspend(|| ask(info))
    })
}

fn ask(info: &XferProgressInfo) -> XferDecision {
    let conflict = info.status == XferStatus::Overwrite;
    let question = if conflict {
        let target = info.target.as_deref().unwrap_or_else(|| Path::new("?"));
        format!(
            "'{}' exists. [r]eplace, replace [a]ll, [s]kip, skip al[l], a[b]ort? ",
            target.display()
        )
    } else {
        format!(
            "{}. [t]ry again, [s]kip, skip al[l], a[b]ort? ",
            info.error.as_deref().unwrap_or("error")
        )
    };

    loop {
        eprint!("{}", question);
        let _ = std::io::stderr().flush();
        let mut line = String::new();
        match std::io::stdin().read_line(&mut line) {
            Ok(0) | Err(_) => return XferDecision::Abort,
            Ok(_) => {}
        }
        let decision = match (conflict, line.trim()) {
            (_, "s") => XferDecision::Skip,
            (_, "l") => XferDecision::SkipAll,
            (_, "b") => XferDecision::Abort,
            (true, "r") => XferDecision::Replace,
            (true, "a") => XferDecision::ReplaceAll,
            (false, "t") => XferDecision::Retry,
            _ => continue,
        };
        return decision;
    }
}

fn cmd_list(
    engine: &Engine,
    path: &Path,
    batch: Option<usize>,
    all: bool,
    follow_links: bool,
    sort: bool,
    format: OutputFormat,
) -> Result<()> {
    let mut options = engine.list_options();
    if let Some(batch) = batch {
        options.items_per_notification = batch;
    }
    options.include_hidden = all;
    options.follow_links = follow_links;
    options.sort = sort;

    let (tx, rx) = crossbeam::channel::unbounded();
    let ticket = engine.enumerate_directory(
        path,
        options,
        0,
        Box::new(move |_, status, infos| {
            let _ = tx.send((status, infos));
            ListAction::Continue
        }),
    )?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for (status, infos) in rx.iter() {
        for info in &infos {
            match format {
                OutputFormat::Text => writeln!(out, "{}", format_entry(info))?,
                OutputFormat::Json => writeln!(out, "{}", serde_json::to_string(info)?)?,
            }
        }
        if let ListStatus::Error(message) = status {
            debug!(%message, "listing ended with an error");
        }
    }
    drop(out);

    finish(ticket, || {})
}

fn format_entry(info: &FileInfo) -> String {
    let modified = info
        .modified
        .map(|time| {
            chrono::DateTime::<chrono::Local>::from(time)
                .format("%Y-%m-%d %H:%M")
                .to_string()
        })
        .unwrap_or_else(|| "-".repeat(16));
    let size = if info.kind == FileKind::Directory {
        "-".to_string()
    } else {
        humansize::format_size(info.size, humansize::BINARY)
    };
    let mut name = info.name.clone();
    match (&info.kind, &info.symlink_target) {
        (FileKind::Directory, _) => name.push('/'),
        (FileKind::Symlink, Some(target)) => name = format!("{} -> {}", name, target.display()),
        _ => {}
    }
    format!("{} {:>10} {} {}", mode_string(info), size, modified, name)
}

fn mode_string(info: &FileInfo) -> String {
    let kind = match info.kind {
        FileKind::Directory => 'd',
        FileKind::Symlink => 'l',
        FileKind::Regular => '-',
        FileKind::Other => '?',
    };
    let mut mode = String::with_capacity(10);
    mode.push(kind);
    for shift in [6u32, 3, 0] {
        let bits = (info.permissions >> shift) & 0o7;
        mode.push(if bits & 0o4 != 0 { 'r' } else { '-' });
        mode.push(if bits & 0o2 != 0 { 'w' } else { '-' });
        mode.push(if bits & 0o1 != 0 { 'x' } else { '-' });
    }
    mode
}
