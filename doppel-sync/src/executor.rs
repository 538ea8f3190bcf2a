// SPDX-License-Identifier: AGPL-3.0-or-later
//! Sync execution
//!
//! Pairs are processed one after another, steps in plan order. A failing
//! item is logged and skipped; a failing pair is logged as fatal and the
//! next pair starts. Only cancellation and broken internal invariants end
//! the run early.

use crate::plan::{build_plan, PlanStep, SyncStatistics};
use doppel_compare::{BaseFolderPair, FolderComparison, NodeId, Side, SyncOperation};
use doppel_core::transfer::{commit_temp, copy_file_transactional, copy_symlink, copy_to_temp, move_item, CopyOptions, Location};
use doppel_core::{
    AfsPath, CancelToken, CopyResult, DoppelError, DoppelResult, ErrorLog, IoCallback, ItemType, Phase,
    ProgressReporter, RecycleSession, StorageBackend, SummaryInfo, SyncResult,
};
use doppel_providers::{native_path, BackendRegistry, DirLock, LockOptions};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

/// What happens to deleted and overwritten items
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletionPolicy {
    Permanent,
    #[default]
    RecycleBin,
}

#[derive(Debug, Clone)]
pub struct ExecOptions {
    pub deletion: DeletionPolicy,
    pub copy_permissions: bool,
    /// Hold a lock file in every local base folder while syncing.
    pub use_locks: bool,
    pub lock: LockOptions,
    pub job_name: Option<String>,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self {
            deletion: DeletionPolicy::default(),
            copy_permissions: false,
            use_locks: true,
            lock: LockOptions::default(),
            job_name: None,
        }
    }
}

/// Outcome of [`execute_sync`]
#[derive(Debug, Clone)]
pub struct SyncSummary {
    pub info: SummaryInfo,
    pub statistics: SyncStatistics,
    pub log: ErrorLog,
}

impl SyncSummary {
    pub fn result(&self) -> SyncResult {
        self.info.final_status
    }
}

/// Carry out the resolved operations of `comparison`.
pub async fn execute_sync(
    comparison: &FolderComparison,
    registry: &BackendRegistry,
    options: &ExecOptions,
    reporter: &ProgressReporter,
    cancel: &CancelToken,
) -> DoppelResult<SyncSummary> {
    let started = Instant::now();
    let statistics = SyncStatistics::of(comparison);
    reporter.init_phase(
        Phase::Synchronizing,
        statistics.items_to_process(),
        statistics.bytes_to_process,
    );
    tracing::info!(
        pairs = comparison.len(),
        items = statistics.items_to_process(),
        bytes = statistics.bytes_to_process,
        "sync started"
    );

    let mut aborted = false;
    for (index, pair) in comparison.pairs().iter().enumerate() {
        if cancel.is_cancelled() {
            aborted = true;
            break;
        }
        if let Some(error) = pair.fatal_error() {
            tracing::info!(pair = index, %error, "skipping folder pair that failed to compare");
            reporter.report_fatal(format!(
                "Skipped {} with {}: {error}",
                pair.base(Side::Left),
                pair.base(Side::Right)
            ));
            continue;
        }
        match sync_pair(comparison, index, registry, options, reporter, cancel).await {
            Ok(()) => {}
            Err(DoppelError::Cancelled) => {
                aborted = true;
                break;
            }
            Err(e @ DoppelError::ContractViolation(_)) => return Err(e),
            Err(e) => reporter.report_fatal(format!(
                "Cannot synchronize {} with {}: {e}",
                pair.base(Side::Left),
                pair.base(Side::Right)
            )),
        }
    }

    let log = reporter.error_log();
    let final_status = SyncResult::from_log(&log, aborted);
    let progress = reporter.snapshot();
    tracing::info!(status = %final_status, elapsed = ?started.elapsed(), "sync finished");
    Ok(SyncSummary {
        info: SummaryInfo {
            job_name: options.job_name.clone(),
            final_status,
            items_processed: progress.items_processed,
            bytes_processed: progress.bytes_processed,
            items_total: progress.items_total,
            bytes_total: progress.bytes_total,
            total_time: started.elapsed(),
        },
        statistics,
        log,
    })
}

async fn sync_pair(
    comparison: &FolderComparison,
    index: usize,
    registry: &BackendRegistry,
    options: &ExecOptions,
    reporter: &ProgressReporter,
    cancel: &CancelToken,
) -> DoppelResult<()> {
    let plan = build_plan(comparison, index)?;
    if plan.steps.is_empty() {
        return Ok(());
    }
    let pair = &comparison.pairs()[index];
    let backends = [
        registry.for_path(pair.base(Side::Left))?,
        registry.for_path(pair.base(Side::Right))?,
    ];

    for side in [Side::Left, Side::Right] {
        let writes = plan.steps.iter().any(|s| s.operation.target_side() == Some(side));
        if writes && !pair.base_exists(side) {
            let base = pair.base(side);
            tracing::info!(folder = %base, "creating base folder");
            backends[side_index(side)]
                .create_folder_recursive(base.afs_path())
                .await?;
        }
    }

    let _locks = if options.use_locks {
        lock_bases(pair, options.lock, cancel).await?
    } else {
        Vec::new()
    };

    let mut worker = PairWorker {
        pair,
        backends,
        options,
        reporter,
        cancel,
        recyclers: [Recycler::NotStarted, Recycler::NotStarted],
    };
    let outcome = worker.run(&plan.steps).await;
    worker.finalize_recycling().await;
    outcome
}

async fn lock_bases(pair: &BaseFolderPair, lock: LockOptions, cancel: &CancelToken) -> DoppelResult<Vec<DirLock>> {
    let mut folders: Vec<PathBuf> = Vec::new();
    for side in [Side::Left, Side::Right] {
        let base = pair.base(side);
        if !base.device().is_native() {
            continue;
        }
        let folder = native_path(base)?;
        if !folders.contains(&folder) && tokio::fs::metadata(&folder).await.is_ok() {
            folders.push(folder);
        }
    }
    let mut locks = Vec::with_capacity(folders.len());
    for folder in folders {
        locks.push(DirLock::acquire(&folder, lock, cancel).await?);
    }
    Ok(locks)
}

fn side_index(side: Side) -> usize {
    match side {
        Side::Left => 0,
        Side::Right => 1,
    }
}

enum Recycler {
    NotStarted,
    Active(Box<dyn RecycleSession>),
    Unavailable,
}

struct PairWorker<'a> {
    pair: &'a BaseFolderPair,
    backends: [Arc<dyn StorageBackend>; 2],
    options: &'a ExecOptions,
    reporter: &'a ProgressReporter,
    cancel: &'a CancelToken,
    recyclers: [Recycler; 2],
}

impl PairWorker<'_> {
    async fn run(&mut self, steps: &[PlanStep]) -> DoppelResult<()> {
        for step in steps {
            self.cancel.check()?;
            let path = self.pair.node(step.node).pair_relative_path().clone();
            self.reporter.report_status(format!("{} {path}", step.operation));

            match self.apply(*step).await {
                Ok(()) => tracing::debug!(%path, operation = %step.operation, "done"),
                Err(DoppelError::Cancelled) => return Err(DoppelError::Cancelled),
                Err(e @ DoppelError::ContractViolation(_)) => return Err(e),
                Err(e) => self
                    .reporter
                    .report_error(format!("Cannot {} {path}: {e}", step.operation)),
            }
            self.reporter.add_progress(1, 0);
        }
        Ok(())
    }

    fn backend(&self, side: Side) -> &dyn StorageBackend {
        self.backends[side_index(side)].as_ref()
    }

    fn path(&self, id: NodeId, side: Side) -> AfsPath {
        self.pair.abstract_path(id, side).afs_path().clone()
    }

    fn copy_options(&self) -> CopyOptions {
        CopyOptions {
            copy_permissions: self.options.copy_permissions,
        }
    }

    async fn apply(&mut self, step: PlanStep) -> DoppelResult<()> {
        let pair = self.pair;
        let node = pair.node(step.node);
        let target = step.operation.target_side().ok_or_else(|| {
            DoppelError::ContractViolation(format!("{} is not an executable step", step.operation))
        })?;
        let source = target.opposite();
        let source_path = self.path(step.node, source);
        let target_path = self.path(step.node, target);

        let reporter = self.reporter;
        let cancel = self.cancel;
        let on_bytes: &IoCallback<'_> = &move |bytes: u64| {
            reporter.add_progress(0, bytes);
            cancel.check()
        };

        match step.operation {
            SyncOperation::CreateLeft | SyncOperation::CreateRight => match node.item_type() {
                ItemType::Folder => self.backend(target).create_folder(&target_path).await,
                ItemType::File => {
                    let result = copy_file_transactional(
                        Location::new(self.backend(source), &source_path),
                        Location::new(self.backend(target), &target_path),
                        self.copy_options(),
                        Some(on_bytes),
                        self.cancel,
                    )
                    .await?;
                    self.note_copy_warnings(&target_path, target, &result);
                    Ok(())
                }
                ItemType::Symlink => {
                    copy_symlink(
                        Location::new(self.backend(source), &source_path),
                        Location::new(self.backend(target), &target_path),
                        self.copy_options(),
                    )
                    .await
                }
            },
            SyncOperation::UpdateLeft | SyncOperation::UpdateRight => match node.item_type() {
                ItemType::File => {
                    let (temp, result) = copy_to_temp(
                        Location::new(self.backend(source), &source_path),
                        Location::new(self.backend(target), &target_path),
                        self.copy_options(),
                        Some(on_bytes),
                        self.cancel,
                    )
                    .await?;
                    match self.remove_item(step.node, target, ItemType::File).await {
                        Ok(true) => {}
                        Ok(false) => {
                            let _ = self.backend(target).remove_file(&temp).await;
                            return Err(DoppelError::Unsupported(
                                "old version cannot be moved to the recycle bin".to_string(),
                            ));
                        }
                        Err(e) => {
                            let _ = self.backend(target).remove_file(&temp).await;
                            return Err(e);
                        }
                    }
                    commit_temp(self.backend(target), &temp, &target_path).await?;
                    self.note_copy_warnings(&target_path, target, &result);
                    Ok(())
                }
                ItemType::Symlink => {
                    if !self.remove_item(step.node, target, ItemType::Symlink).await? {
                        return Err(DoppelError::Unsupported(
                            "old link cannot be moved to the recycle bin".to_string(),
                        ));
                    }
                    copy_symlink(
                        Location::new(self.backend(source), &source_path),
                        Location::new(self.backend(target), &target_path),
                        self.copy_options(),
                    )
                    .await
                }
                ItemType::Folder => Err(DoppelError::ContractViolation(format!(
                    "folder {} cannot be updated",
                    node.pair_relative_path()
                ))),
            },
            SyncOperation::DeleteLeft | SyncOperation::DeleteRight => {
                self.remove_item(step.node, target, node.item_type()).await.map(|_| ())
            }
            SyncOperation::MoveLeftTo | SyncOperation::MoveRightTo => {
                let from = node.move_ref().ok_or_else(|| {
                    DoppelError::ContractViolation(format!("move target {} has no source", node.pair_relative_path()))
                })?;
                let from_path = self.path(from, target);
                let backend = self.backend(target);
                move_item(
                    Location::new(backend, &from_path),
                    Location::new(backend, &target_path),
                    pair.node(from).item_type(),
                    self.copy_options(),
                    Some(on_bytes),
                    self.cancel,
                )
                .await
            }
            other => Err(DoppelError::ContractViolation(format!("{other} is not an executable step"))),
        }
    }

    /// Delete or recycle one item. Returns false when the recycle bin of
    /// `side` is unavailable and the item was left in place.
    async fn remove_item(&mut self, id: NodeId, side: Side, item_type: ItemType) -> DoppelResult<bool> {
        let path = self.path(id, side);
        match self.options.deletion {
            DeletionPolicy::Permanent => {
                let backend = self.backend(side);
                match item_type {
                    ItemType::File => backend.remove_file(&path).await?,
                    ItemType::Symlink => backend.remove_symlink(&path).await?,
                    // may still hold temp files and excluded items
                    ItemType::Folder => backend.remove_folder_recursive(&path).await?,
                }
                Ok(true)
            }
            DeletionPolicy::RecycleBin => {
                let item = self.pair.abstract_path(id, side);
                let logical = self.pair.relative_path(id, side);
                match self.recycler(side).await {
                    Some(session) => {
                        session.recycle_item(&item, &logical).await?;
                        Ok(true)
                    }
                    None => {
                        tracing::debug!(item = %item, "recycle bin unavailable, item kept");
                        Ok(false)
                    }
                }
            }
        }
    }

    async fn recycler(&mut self, side: Side) -> Option<&mut Box<dyn RecycleSession>> {
        let slot = side_index(side);
        if matches!(self.recyclers[slot], Recycler::NotStarted) {
            let pair = self.pair;
            let base = pair.base(side);
            self.recyclers[slot] = match self.backends[slot].create_recycle_session(base.afs_path()).await {
                Ok(session) => Recycler::Active(session),
                Err(e) => {
                    self.reporter.report_error(format!(
                        "Cannot use the recycle bin for {base}, items there are not deleted: {e}"
                    ));
                    Recycler::Unavailable
                }
            };
        }
        match &mut self.recyclers[slot] {
            Recycler::Active(session) => Some(session),
            Recycler::NotStarted | Recycler::Unavailable => None,
        }
    }

    async fn finalize_recycling(&mut self) {
        for slot in 0..2 {
            if let Recycler::Active(session) = &mut self.recyclers[slot] {
                // staged items must reach the bin even after cancellation
                match session.finalize(&CancelToken::new()).await {
                    Ok(report) => {
                        tracing::debug!(recycled = report.recycled, "recycle session finished");
                        for (item, error) in report.failures {
                            self.reporter
                                .report_warning(format!("{item} was kept in the recycle folder: {error}"));
                        }
                    }
                    Err(e) => self.reporter.report_warning(format!("Cannot finish recycling: {e}")),
                }
            }
            self.recyclers[slot] = Recycler::NotStarted;
        }
    }

    fn note_copy_warnings(&self, target_path: &AfsPath, side: Side, result: &CopyResult) {
        let shown = || self.backend(side).display_path(target_path);
        if let Some(error) = &result.error_mod_time {
            self.reporter
                .report_warning(format!("Cannot set modification time of {}: {error}", shown()));
        }
        if let Some(error) = &result.error_permissions {
            self.reporter
                .report_warning(format!("Cannot copy permissions to {}: {error}", shown()));
        }
    }
}
