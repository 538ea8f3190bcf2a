// SPDX-License-Identifier: AGPL-3.0-or-later
//! CLI command implementations

use crate::config::{default_job_path, JobConfig};
use bytesize::ByteSize;
use chrono::{DateTime, Local};
use clap::ValueEnum;
use console::{style, StyledObject};
use doppel_compare::{
    compare_folders, rows, sort_rows, CompareFilesResult, FileSystemObject, FolderComparison, FolderPairSpec, ObjectKind,
    Side, SortKey, SortSpec, SyncOperation,
};
use doppel_core::{
    CancelToken, DoppelError, DoppelResult, ErrorLog, ProgressMessage, ProgressReporter, Severity, SummaryInfo,
    SyncResult,
};
use doppel_providers::BackendRegistry;
use doppel_sync::{execute_sync, resolve_sync_operations, SyncStatistics};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tabled::{Table, Tabled};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;

/// Row order for `doppel compare`
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SortBy {
    Path,
    Name,
    Size,
    Time,
    Extension,
    Category,
}

impl SortBy {
    fn key(self) -> SortKey {
        match self {
            SortBy::Path => SortKey::RelativeFolder,
            SortBy::Name => SortKey::ItemName(Side::Left),
            SortBy::Size => SortKey::FileSize(Side::Left),
            SortBy::Time => SortKey::ModTime(Side::Left),
            SortBy::Extension => SortKey::Extension(Side::Left),
            SortBy::Category => SortKey::Category,
        }
    }
}

/// Everything a command needs to run a job
struct Session {
    job: JobConfig,
    pairs: Vec<FolderPairSpec>,
    registry: BackendRegistry,
    reporter: ProgressReporter,
    cancel: CancelToken,
    progress: Option<Progress>,
}

impl Session {
    fn open(job_path: Option<&Path>, show_progress: bool) -> DoppelResult<Self> {
        let path = match job_path {
            Some(p) => p.to_path_buf(),
            None => default_job_path()
                .ok_or_else(|| DoppelError::Config("no job file given and no config folder found".to_string()))?,
        };
        let job = JobConfig::load(&path)?;
        let base_dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let base_dir = if base_dir.is_absolute() {
            base_dir
        } else {
            std::env::current_dir()
                .map_err(|e| DoppelError::from_io("resolve", base_dir.display().to_string(), e))?
                .join(base_dir)
        };
        let pairs = job.folder_pairs(&base_dir)?;
        tracing::debug!(job = %path.display(), pairs = pairs.len(), "job loaded");

        let cancel = CancelToken::new();
        let on_interrupt = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("{}", style("Stopping after the current item...").yellow());
                on_interrupt.cancel();
            }
        });

        let (reporter, progress) = if show_progress {
            let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
            let reporter = ProgressReporter::new(tx);
            let progress = Progress::start(rx, reporter.clone());
            (reporter, Some(progress))
        } else {
            (ProgressReporter::silent(), None)
        };

        Ok(Self {
            job,
            pairs,
            registry: BackendRegistry::with_native(),
            reporter,
            cancel,
            progress,
        })
    }

    async fn compare(&self) -> DoppelResult<FolderComparison> {
        compare_folders(&self.pairs, &self.job.compare, &self.registry, &self.reporter, &self.cancel).await
    }

    async fn resolved(&self) -> DoppelResult<FolderComparison> {
        let mut comparison = self.compare().await?;
        resolve_sync_operations(&mut comparison, &self.job.sync.direction)?;
        Ok(comparison)
    }

    fn stop_progress(&mut self) {
        if let Some(progress) = self.progress.take() {
            progress.finish();
        }
    }
}

/// Progress bar fed by the reporter
struct Progress {
    bar: ProgressBar,
    task: JoinHandle<()>,
}

impl Progress {
    fn start(mut rx: UnboundedReceiver<ProgressMessage>, reporter: ProgressReporter) -> Self {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template("{prefix:>12.cyan.bold} [{bar:30}] {pos}/{len} {wide_msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> ");
        bar.set_style(style);

        let shown = bar.clone();
        let task = tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_millis(120));
            loop {
                tokio::select! {
                    message = rx.recv() => match message {
                        Some(ProgressMessage::Phase(snapshot)) => {
                            shown.set_prefix(format!("{:?}", snapshot.phase));
                            shown.set_length(snapshot.items_total);
                            shown.set_position(0);
                        }
                        Some(ProgressMessage::Status(text)) => shown.set_message(text),
                        Some(ProgressMessage::Log(_)) => {}
                        None => break,
                    },
                    _ = tick.tick() => {
                        let snapshot = reporter.snapshot();
                        shown.set_length(snapshot.items_total.max(snapshot.items_processed));
                        shown.set_position(snapshot.items_processed);
                    }
                }
            }
        });
        Self { bar, task }
    }

    fn finish(self) {
        self.task.abort();
        self.bar.finish_and_clear();
    }
}

fn format_time(secs: Option<i64>) -> String {
    secs.and_then(|s| DateTime::from_timestamp(s, 0))
        .map(|t| t.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_default()
}

/// One side of a row: size and time for files, a marker otherwise.
fn describe_side(node: &FileSystemObject, side: Side) -> String {
    if !node.is_present(side) {
        return String::new();
    }
    match node.kind() {
        ObjectKind::Folder(_) => "<folder>".to_string(),
        ObjectKind::Symlink(_) => format!("<link> {}", format_time(node.mod_time(side))),
        ObjectKind::File(_) => format!(
            "{} {}",
            ByteSize(node.file_size(side).unwrap_or(0)),
            format_time(node.mod_time(side))
        ),
    }
}

fn styled_category(category: CompareFilesResult) -> StyledObject<String> {
    let text = style(category.to_string());
    match category {
        CompareFilesResult::Equal => text.dim(),
        CompareFilesResult::LeftOnly | CompareFilesResult::LeftNewer => text.cyan(),
        CompareFilesResult::RightOnly | CompareFilesResult::RightNewer => text.magenta(),
        CompareFilesResult::Different => text.yellow(),
        CompareFilesResult::Conflict => text.red(),
        CompareFilesResult::TraversalError => text.red().bold(),
    }
}

fn styled_operation(operation: SyncOperation) -> StyledObject<String> {
    let text = style(operation.to_string());
    match operation.target_side() {
        Some(Side::Left) => text.magenta(),
        Some(Side::Right) => text.cyan(),
        None if operation == SyncOperation::Conflict => text.red(),
        None => text.dim(),
    }
}

#[derive(Tabled)]
struct DiffRow {
    #[tabled(rename = "Path")]
    path: String,
    #[tabled(rename = "Left")]
    left: String,
    #[tabled(rename = "Category")]
    category: String,
    #[tabled(rename = "Right")]
    right: String,
}

#[derive(Tabled)]
struct PlanRow {
    #[tabled(rename = "Path")]
    path: String,
    #[tabled(rename = "Operation")]
    operation: String,
    #[tabled(rename = "Bytes")]
    bytes: String,
}

fn print_pair_headers(comparison: &FolderComparison) {
    for pair in comparison.pairs() {
        let header = format!("{}  <->  {}", pair.base(Side::Left), pair.base(Side::Right));
        match pair.fatal_error() {
            Some(error) => println!("{} {}", style(header).bold(), style(format!("failed: {error}")).red()),
            None if !pair.roots().iter().any(|&root| pair.has_differences(root)) => {
                println!("{} {}", style(header).bold(), style("no differences").green())
            }
            None => println!("{}", style(header).bold()),
        }
    }
}

/// Show the categorised difference tree.
pub async fn compare(
    job_path: Option<&Path>,
    show_all: bool,
    sort: SortBy,
    descending: bool,
    log_json: Option<&Path>,
) -> DoppelResult<ExitCode> {
    let mut session = Session::open(job_path, true)?;
    let comparison = session.compare().await;
    session.stop_progress();
    let comparison = comparison?;

    let spec = if descending {
        SortSpec::descending(sort.key())
    } else {
        SortSpec::ascending(sort.key())
    };
    let mut ordered = rows(&comparison);
    sort_rows(&comparison, &mut ordered, spec);

    let table_rows: Vec<DiffRow> = ordered
        .iter()
        .map(|row| (row, comparison.pairs()[row.pair].node(row.node)))
        .filter(|(_, node)| show_all || node.category() != CompareFilesResult::Equal)
        .map(|(row, node)| DiffRow {
            path: format_row_path(&comparison, row.pair, node),
            left: describe_side(node, Side::Left),
            category: styled_category(node.category()).to_string(),
            right: describe_side(node, Side::Right),
        })
        .collect();

    print_pair_headers(&comparison);
    if !table_rows.is_empty() {
        println!("{}", Table::new(table_rows));
    }
    let differences = ordered
        .iter()
        .filter(|row| comparison.pairs()[row.pair].node(row.node).category() != CompareFilesResult::Equal)
        .count();
    println!(
        "{} of {} items differ",
        style(differences).bold(),
        comparison.total_items()
    );

    let log = session.reporter.error_log();
    print_log(&log);
    write_log_json(log_json, &log, None)?;
    Ok(if log.count(Severity::Fatal) > 0 {
        ExitCode::from(2)
    } else {
        ExitCode::SUCCESS
    })
}

fn format_row_path(comparison: &FolderComparison, pair: usize, node: &FileSystemObject) -> String {
    let path = node.pair_relative_path().to_string();
    let path = if node.is_folder() { format!("{path}/") } else { path };
    if comparison.len() > 1 {
        format!("#{} {path}", pair + 1)
    } else {
        path
    }
}

/// Show what a sync would do, without touching anything.
pub async fn preview(job_path: Option<&Path>, log_json: Option<&Path>) -> DoppelResult<ExitCode> {
    let mut session = Session::open(job_path, true)?;
    let comparison = session.resolved().await;
    session.stop_progress();
    let comparison = comparison?;

    let mut ordered = rows(&comparison);
    sort_rows(&comparison, &mut ordered, SortSpec::ascending(SortKey::RelativeFolder));
    let table_rows: Vec<PlanRow> = ordered
        .iter()
        .map(|row| (row, comparison.pairs()[row.pair].node(row.node)))
        .filter(|(_, node)| {
            !matches!(
                node.sync_operation(),
                SyncOperation::None | SyncOperation::DoNothing
            )
        })
        .map(|(row, node)| PlanRow {
            path: format_row_path(&comparison, row.pair, node),
            operation: styled_operation(node.sync_operation()).to_string(),
            bytes: match node.sync_operation() {
                SyncOperation::CreateLeft | SyncOperation::UpdateLeft => node.file_size(Side::Right),
                SyncOperation::CreateRight | SyncOperation::UpdateRight => node.file_size(Side::Left),
                _ => None,
            }
            .map(|b| ByteSize(b).to_string())
            .unwrap_or_default(),
        })
        .collect();

    print_pair_headers(&comparison);
    if !table_rows.is_empty() {
        println!("{}", Table::new(table_rows));
    }
    print_statistics(&SyncStatistics::of(&comparison));

    let log = session.reporter.error_log();
    print_log(&log);
    write_log_json(log_json, &log, None)?;
    Ok(ExitCode::SUCCESS)
}

fn print_statistics(stats: &SyncStatistics) {
    println!(
        "create {} / {}   update {} / {}   delete {} / {}   move {} / {}   (left / right)",
        stats.create_left,
        stats.create_right,
        stats.update_left,
        stats.update_right,
        stats.delete_left,
        stats.delete_right,
        stats.move_left,
        stats.move_right
    );
    if stats.conflicts > 0 {
        println!("{}", style(format!("{} conflicts left for you to decide", stats.conflicts)).red());
    }
    println!("{} to copy", ByteSize(stats.bytes_to_process));
}

/// Compare, resolve and apply.
pub async fn sync(job_path: Option<&Path>, show_progress: bool, log_json: Option<&Path>) -> DoppelResult<ExitCode> {
    let mut session = Session::open(job_path, show_progress)?;
    let outcome = async {
        let comparison = session.resolved().await?;
        let options = session.job.exec_options();
        execute_sync(&comparison, &session.registry, &options, &session.reporter, &session.cancel).await
    }
    .await;
    session.stop_progress();
    let summary = outcome?;

    print_log(&summary.log);
    print_summary(&summary.info);
    write_log_json(log_json, &summary.log, Some(&summary.info))?;
    Ok(exit_code(summary.result()))
}

fn exit_code(result: SyncResult) -> ExitCode {
    match result {
        SyncResult::FinishedWithSuccess => ExitCode::SUCCESS,
        SyncResult::FinishedWithWarnings => ExitCode::from(1),
        SyncResult::FinishedWithError => ExitCode::from(2),
        SyncResult::Aborted => ExitCode::from(3),
    }
}

fn print_summary(info: &SummaryInfo) {
    let status = match info.final_status {
        SyncResult::FinishedWithSuccess => style(info.final_status.to_string()).green(),
        SyncResult::FinishedWithWarnings => style(info.final_status.to_string()).yellow(),
        SyncResult::FinishedWithError | SyncResult::Aborted => style(info.final_status.to_string()).red(),
    };
    if let Some(name) = &info.job_name {
        println!("{}", style(name).bold());
    }
    println!("{status}");
    println!(
        "{} of {} items, {} of {} in {:.1}s",
        info.items_processed,
        info.items_total,
        ByteSize(info.bytes_processed),
        ByteSize(info.bytes_total),
        info.total_time.as_secs_f64()
    );
}

fn print_log(log: &ErrorLog) {
    for entry in log.entries().iter().filter(|e| e.severity >= Severity::Warning) {
        let label = match entry.severity {
            Severity::Warning => style(entry.severity.to_string()).yellow(),
            _ => style(entry.severity.to_string()).red(),
        };
        eprintln!("{label}: {}", entry.message);
    }
}

/// Write the event stream as JSON lines, the summary last.
fn write_log_json(path: Option<&Path>, log: &ErrorLog, info: Option<&SummaryInfo>) -> DoppelResult<()> {
    let Some(path) = path else { return Ok(()) };
    let io_err = |e| DoppelError::from_io("write", path.display().to_string(), e);
    let mut out = std::io::BufWriter::new(std::fs::File::create(path).map_err(io_err)?);
    for entry in log.entries() {
        let line = serde_json::to_string(entry).map_err(|e| DoppelError::Serialization(e.to_string()))?;
        writeln!(out, "{line}").map_err(io_err)?;
    }
    if let Some(info) = info {
        let line = serde_json::to_string(info).map_err(|e| DoppelError::Serialization(e.to_string()))?;
        writeln!(out, "{line}").map_err(io_err)?;
    }
    out.flush().map_err(io_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use doppel_core::LogEntry;

    #[test]
    fn test_exit_codes() {
        let code = |r| format!("{:?}", exit_code(r));
        assert_eq!(code(SyncResult::FinishedWithSuccess), format!("{:?}", ExitCode::SUCCESS));
        assert_eq!(code(SyncResult::FinishedWithWarnings), format!("{:?}", ExitCode::from(1)));
        assert_eq!(code(SyncResult::Aborted), format!("{:?}", ExitCode::from(3)));
    }

    #[test]
    fn test_log_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.jsonl");
        let mut log = ErrorLog::new();
        log.push(LogEntry::new(Severity::Warning, "odd file"));
        log.push(LogEntry::new(Severity::Error, "cannot copy"));
        write_log_json(Some(&path), &log, None).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> = text.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["severity"], "warning");
        assert_eq!(lines[1]["message"], "cannot copy");
    }

    #[test]
    fn test_format_time() {
        assert_eq!(format_time(None), "");
        assert_eq!(format_time(Some(0)).len(), "1970-01-01 00:00:00".len());
    }
}
