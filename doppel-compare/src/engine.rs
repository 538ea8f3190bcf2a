// SPDX-License-Identifier: AGPL-3.0-or-later
//! Comparison engine
//!
//! Each side of each folder pair is traversed on its own task, bounded by a
//! semaphore. Snapshots come back to the calling task, which alone builds the
//! difference trees. Content comparison and rename detection run afterwards.

use crate::category::CompareVariant;
use crate::content::{files_have_same_content, symlinks_have_same_target};
use crate::hierarchy::{
    BaseFolderPair, CompareFilesResult, FileDescr, FolderComparison, NodeId, ObjectKind, Side, SidePair,
    SymlinkDescr,
};
use crate::rename::detect_moves;
use crate::snapshot::{FolderContainer, SnapshotSink, SymlinkHandling};
use doppel_core::{
    AbstractPath, AfsPath, CancelToken, DoppelError, DoppelResult, FileInfo, ItemType, Phase, ProgressReporter,
    StorageBackend, SymlinkInfo,
};
use doppel_providers::BackendRegistry;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

fn default_true() -> bool {
    true
}

fn default_parallel() -> usize {
    4
}

/// Comparison settings for one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompareOptions {
    pub variant: CompareVariant,
    #[serde(default)]
    pub symlinks: SymlinkHandling,
    #[serde(default = "default_true")]
    pub detect_moves: bool,
    /// Upper bound on concurrent traversals and content reads.
    #[serde(default = "default_parallel")]
    pub max_parallel: usize,
}

impl CompareOptions {
    pub fn new(variant: CompareVariant) -> Self {
        Self {
            variant,
            symlinks: SymlinkHandling::default(),
            detect_moves: true,
            max_parallel: default_parallel(),
        }
    }
}

/// One configured pair of base folders
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderPairSpec {
    pub left: AbstractPath,
    pub right: AbstractPath,
}

impl FolderPairSpec {
    pub fn new(left: AbstractPath, right: AbstractPath) -> Self {
        Self { left, right }
    }

    fn base(&self, side: Side) -> &AbstractPath {
        match side {
            Side::Left => &self.left,
            Side::Right => &self.right,
        }
    }
}

struct PreparedPair {
    backends: Option<(Arc<dyn StorageBackend>, Arc<dyn StorageBackend>)>,
    left_exists: bool,
    right_exists: bool,
    fatal: Option<String>,
}

impl PreparedPair {
    fn failed(message: String) -> Self {
        Self {
            backends: None,
            left_exists: false,
            right_exists: false,
            fatal: Some(message),
        }
    }

    fn backend(&self, side: Side) -> Option<&Arc<dyn StorageBackend>> {
        self.backends.as_ref().map(|(l, r)| match side {
            Side::Left => l,
            Side::Right => r,
        })
    }

    fn exists(&self, side: Side) -> bool {
        match side {
            Side::Left => self.left_exists,
            Side::Right => self.right_exists,
        }
    }
}

/// Compare every folder pair. A pair whose base folders cannot be reached
/// gets a fatal error and an empty tree; only cancellation fails the call.
pub async fn compare_folders(
    pairs: &[FolderPairSpec],
    options: &CompareOptions,
    registry: &BackendRegistry,
    reporter: &ProgressReporter,
    cancel: &CancelToken,
) -> DoppelResult<FolderComparison> {
    reporter.init_phase(Phase::Scanning, 0, 0);
    tracing::info!(pairs = pairs.len(), "comparison started");

    let mut prepared = Vec::with_capacity(pairs.len());
    for spec in pairs {
        let pair = prepare_pair(spec, registry, reporter, cancel).await?;
        if let Some(message) = &pair.fatal {
            reporter.report_fatal(message.clone());
        }
        prepared.push(pair);
    }

    let mut snapshots = traverse_all(pairs, &prepared, options, reporter, cancel).await?;

    let mut result = Vec::with_capacity(pairs.len());
    let mut pending_content = Vec::new();
    for (index, (spec, prep)) in pairs.iter().zip(&prepared).enumerate() {
        let mut pair = BaseFolderPair::new(spec.left.clone(), spec.right.clone());
        if let Some(message) = &prep.fatal {
            pair.set_fatal_error(message.clone());
            result.push(pair);
            continue;
        }
        let case_sensitive = prep.backend(Side::Left).map_or(true, |b| b.is_case_sensitive())
            && prep.backend(Side::Right).map_or(true, |b| b.is_case_sensitive());
        pair.set_base_status(prep.left_exists, prep.right_exists, case_sensitive);

        let left = snapshots.remove(&(index, Side::Left)).unwrap_or_default();
        let right = snapshots.remove(&(index, Side::Right)).unwrap_or_default();
        let mut merger = Merger {
            pair: &mut pair,
            variant: &options.variant,
            reporter,
            pending: Vec::new(),
        };
        merger.merge_folder(None, &AfsPath::root(), Some(&left), Some(&right), &Context::default());
        pending_content.extend(merger.pending.into_iter().map(|node| (index, node)));
        result.push(pair);
    }

    if !pending_content.is_empty() {
        compare_content(&mut result, &prepared, pending_content, options, reporter, cancel).await?;
    }

    if options.detect_moves {
        for pair in &mut result {
            detect_moves(pair);
        }
    }

    let comparison = FolderComparison::new(result);
    tracing::info!(items = comparison.total_items(), "comparison finished");
    Ok(comparison)
}

async fn prepare_pair(
    spec: &FolderPairSpec,
    registry: &BackendRegistry,
    reporter: &ProgressReporter,
    cancel: &CancelToken,
) -> DoppelResult<PreparedPair> {
    let backends = match (registry.for_path(&spec.left), registry.for_path(&spec.right)) {
        (Ok(l), Ok(r)) => (l, r),
        (Err(e), _) | (_, Err(e)) => return Ok(PreparedPair::failed(e.to_string())),
    };

    let mut exists = [false; 2];
    for (slot, (backend, base)) in exists
        .iter_mut()
        .zip([(&backends.0, &spec.left), (&backends.1, &spec.right)])
    {
        cancel.check()?;
        match base_folder_exists(backend.as_ref(), base.afs_path(), reporter).await {
            Ok(found) => *slot = found,
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => return Ok(PreparedPair::failed(format!("Cannot access {base}: {e}"))),
        }
    }

    Ok(PreparedPair {
        backends: Some(backends),
        left_exists: exists[0],
        right_exists: exists[1],
        fatal: None,
    })
}

/// Whether a base folder exists. A missing folder under a reachable parent
/// counts as empty; an unreachable one is an error.
async fn base_folder_exists(
    backend: &dyn StorageBackend,
    base: &AfsPath,
    reporter: &ProgressReporter,
) -> DoppelResult<bool> {
    match backend.item_type_if_exists(base).await? {
        Some(ItemType::Folder) | Some(ItemType::Symlink) => Ok(true),
        Some(ItemType::File) => Err(DoppelError::NotAFolder(backend.display_path(base))),
        None => {
            let status = backend.path_status(base).await?;
            if status.existing_type != ItemType::Folder {
                return Err(DoppelError::NotAFolder(status.existing_path.to_string()));
            }
            reporter.report_warning(format!(
                "Folder {} does not exist yet and is treated as empty",
                backend.display_path(base)
            ));
            Ok(false)
        }
    }
}

async fn traverse_all(
    pairs: &[FolderPairSpec],
    prepared: &[PreparedPair],
    options: &CompareOptions,
    reporter: &ProgressReporter,
    cancel: &CancelToken,
) -> DoppelResult<HashMap<(usize, Side), FolderContainer>> {
    let semaphore = Arc::new(Semaphore::new(options.max_parallel.max(1)));
    let mut jobs = JoinSet::new();

    for (index, (spec, prep)) in pairs.iter().zip(prepared).enumerate() {
        for side in [Side::Left, Side::Right] {
            let Some(backend) = prep.backend(side).cloned() else { continue };
            if !prep.exists(side) {
                continue;
            }
            let base = spec.base(side).afs_path().clone();
            let semaphore = semaphore.clone();
            let cancel = cancel.clone();
            let mut sink = SnapshotSink::new(options.symlinks, reporter.clone());
            jobs.spawn(async move {
                let result = match semaphore.acquire_owned().await {
                    Ok(_permit) => backend.traverse(&base, &mut sink, &cancel).await,
                    Err(_) => Err(DoppelError::Cancelled),
                };
                (index, side, result.map(|()| sink.into_snapshot()))
            });
        }
    }

    let mut snapshots = HashMap::new();
    while let Some(joined) = jobs.join_next().await {
        match joined {
            Ok((index, side, Ok(snapshot))) => {
                snapshots.insert((index, side), snapshot);
            }
            Ok((_, _, Err(e))) => {
                jobs.abort_all();
                return Err(e);
            }
            Err(e) => {
                jobs.abort_all();
                return Err(DoppelError::ContractViolation(format!("traversal task failed: {e}")));
            }
        }
    }
    Ok(snapshots)
}

/// State inherited by the children of a folder
#[derive(Debug, Clone, Default)]
struct Context {
    left_unknown: Option<String>,
    right_unknown: Option<String>,
    conflict: Option<String>,
}

impl Context {
    fn unknown(&self, side: Side) -> Option<&String> {
        match side {
            Side::Left => self.left_unknown.as_ref(),
            Side::Right => self.right_unknown.as_ref(),
        }
    }
}

#[derive(Clone, Copy)]
enum Entry<'a> {
    File(&'a FileInfo),
    Symlink(&'a SymlinkInfo),
    Folder(&'a str, &'a FolderContainer),
}

impl Entry<'_> {
    fn name(&self) -> &str {
        match self {
            Entry::File(f) => &f.name,
            Entry::Symlink(s) => &s.name,
            Entry::Folder(name, _) => name,
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Entry::File(_) => "file",
            Entry::Symlink(_) => "symlink",
            Entry::Folder(..) => "folder",
        }
    }
}

fn entries(container: &FolderContainer) -> impl Iterator<Item = Entry<'_>> {
    container
        .files
        .values()
        .map(Entry::File)
        .chain(container.symlinks.values().map(Entry::Symlink))
        .chain(container.folders.iter().map(|(name, sub)| Entry::Folder(name, sub)))
}

struct Merger<'a> {
    pair: &'a mut BaseFolderPair,
    variant: &'a CompareVariant,
    reporter: &'a ProgressReporter,
    /// Items whose category waits for a content comparison.
    pending: Vec<NodeId>,
}

impl<'a> Merger<'a> {
    fn key(&self, name: &str) -> String {
        if self.pair.is_case_sensitive() {
            name.to_string()
        } else {
            name.to_lowercase()
        }
    }

    fn merge_folder(
        &mut self,
        parent: Option<NodeId>,
        rel: &AfsPath,
        left: Option<&FolderContainer>,
        right: Option<&FolderContainer>,
        ctx: &Context,
    ) {
        let mut ctx = ctx.clone();
        for (side, container) in [(Side::Left, left), (Side::Right, right)] {
            let Some(container) = container else { continue };
            if let Some(error) = &container.error {
                self.reporter.report_warning(format!(
                    "Cannot read folder {}: {error}",
                    self.pair.base(side).join(rel.as_str())
                ));
                let slot = match side {
                    Side::Left => &mut ctx.left_unknown,
                    Side::Right => &mut ctx.right_unknown,
                };
                slot.get_or_insert_with(|| error.clone());
            }
            for (name, message) in &container.failed_items {
                self.reporter.report_warning(format!(
                    "Cannot read {}: {message}",
                    self.pair.base(side).join(rel.join(name).as_str())
                ));
            }
        }

        let mut merged: BTreeMap<String, (Option<Entry<'_>>, Option<Entry<'_>>)> = BTreeMap::new();
        for (side, container) in [(Side::Left, left), (Side::Right, right)] {
            let Some(container) = container else { continue };
            for entry in entries(container) {
                let slot = merged.entry(self.key(entry.name())).or_default();
                let target = match side {
                    Side::Left => &mut slot.0,
                    Side::Right => &mut slot.1,
                };
                if let Some(existing) = target.as_ref() {
                    self.reporter.report_warning(format!(
                        "{} and {} differ only in case and are skipped",
                        self.pair.base(side).join(rel.join(existing.name()).as_str()),
                        entry.name()
                    ));
                    continue;
                }
                *target = Some(entry);
            }
        }

        let failed_names = |container: Option<&FolderContainer>| -> Vec<String> {
            container
                .map(|c| c.failed_items.keys().map(|n| self.key(n)).collect())
                .unwrap_or_default()
        };
        let left_failed = failed_names(left);
        let right_failed = failed_names(right);

        for (key, (l, r)) in merged {
            match (l, r) {
                (Some(l), Some(r)) => self.merge_both(parent, rel, l, r, &ctx),
                (Some(entry), None) => {
                    let failed = right_failed.contains(&key);
                    self.merge_one_sided(parent, rel, Side::Left, entry, &ctx, failed, None)
                }
                (None, Some(entry)) => {
                    let failed = left_failed.contains(&key);
                    self.merge_one_sided(parent, rel, Side::Right, entry, &ctx, failed, None)
                }
                (None, None) => {}
            }
        }
    }

    fn merge_both(&mut self, parent: Option<NodeId>, rel: &AfsPath, l: Entry<'_>, r: Entry<'_>, ctx: &Context) {
        let names = SidePair::new(Some(l.name().to_string()), Some(r.name().to_string()));
        match (l, r) {
            (Entry::File(lf), Entry::File(rf)) => {
                let (ld, rd) = (file_descr(lf), file_descr(rf));
                let category = self.variant.categorize_files(&ld, &rd);
                let kind = ObjectKind::File(SidePair::new(Some(ld), Some(rd)));
                self.add_categorized(parent, names, kind, category);
            }
            (Entry::Symlink(ls), Entry::Symlink(rs)) => {
                let (ld, rd) = (symlink_descr(ls), symlink_descr(rs));
                let category = self.variant.categorize_symlinks(&ld, &rd);
                let kind = ObjectKind::Symlink(SidePair::new(Some(ld), Some(rd)));
                self.add_categorized(parent, names, kind, category);
            }
            (Entry::Folder(name, lc), Entry::Folder(_, rc)) => {
                let id = self.pair.add_node(
                    parent,
                    names,
                    ObjectKind::Folder(SidePair::new(Some(()), Some(()))),
                    CompareFilesResult::Equal,
                    None,
                );
                self.merge_folder(Some(id), &rel.join(name), Some(lc), Some(rc), ctx);
            }
            (l, r) => {
                let note = format!("type mismatch: {} on the left, {} on the right", l.type_name(), r.type_name());
                tracing::debug!(path = %rel.join(l.name()), %note, "conflict");
                self.merge_one_sided(parent, rel, Side::Left, l, ctx, false, Some(&note));
                self.merge_one_sided(parent, rel, Side::Right, r, ctx, false, Some(&note));
            }
        }
    }

    fn add_categorized(
        &mut self,
        parent: Option<NodeId>,
        names: SidePair<String>,
        kind: ObjectKind,
        category: Option<CompareFilesResult>,
    ) {
        match category {
            Some(category) => {
                self.pair.add_node(parent, names, kind, category, None);
            }
            None => {
                let id = self.pair.add_node(parent, names, kind, CompareFilesResult::Equal, None);
                self.pending.push(id);
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn merge_one_sided(
        &mut self,
        parent: Option<NodeId>,
        rel: &AfsPath,
        side: Side,
        entry: Entry<'_>,
        ctx: &Context,
        other_failed: bool,
        conflict: Option<&str>,
    ) {
        let (category, note) = if let Some(note) = conflict.or(ctx.conflict.as_deref()) {
            (CompareFilesResult::Conflict, Some(note.to_string()))
        } else if let Some(error) = ctx.unknown(side.opposite()) {
            (CompareFilesResult::TraversalError, Some(error.clone()))
        } else if other_failed {
            (
                CompareFilesResult::TraversalError,
                Some(format!("{} could not be read on the {} side", entry.name(), side.opposite())),
            )
        } else if side == Side::Left {
            (CompareFilesResult::LeftOnly, None)
        } else {
            (CompareFilesResult::RightOnly, None)
        };

        let names = SidePair::one_sided(side, entry.name().to_string());
        match entry {
            Entry::File(f) => {
                let kind = ObjectKind::File(SidePair::one_sided(side, file_descr(f)));
                self.pair.add_node(parent, names, kind, category, note);
            }
            Entry::Symlink(s) => {
                let kind = ObjectKind::Symlink(SidePair::one_sided(side, symlink_descr(s)));
                self.pair.add_node(parent, names, kind, category, note);
            }
            Entry::Folder(name, container) => {
                let kind = ObjectKind::Folder(SidePair::one_sided(side, ()));
                let id = self.pair.add_node(parent, names, kind, category, note.clone());
                let mut child_ctx = ctx.clone();
                if category == CompareFilesResult::Conflict {
                    child_ctx.conflict = note;
                } else if category == CompareFilesResult::TraversalError {
                    let slot = match side.opposite() {
                        Side::Left => &mut child_ctx.left_unknown,
                        Side::Right => &mut child_ctx.right_unknown,
                    };
                    slot.get_or_insert_with(|| note.unwrap_or_default());
                }
                let (l, r) = match side {
                    Side::Left => (Some(container), None),
                    Side::Right => (None, Some(container)),
                };
                self.merge_folder(Some(id), &rel.join(name), l, r, &child_ctx);
            }
        }
    }
}

fn file_descr(info: &FileInfo) -> FileDescr {
    FileDescr {
        size: info.size,
        mod_time: info.mod_time,
        file_id: info.file_id,
    }
}

fn symlink_descr(info: &SymlinkInfo) -> SymlinkDescr {
    SymlinkDescr {
        mod_time: info.mod_time,
    }
}

async fn compare_content(
    pairs: &mut [BaseFolderPair],
    prepared: &[PreparedPair],
    pending: Vec<(usize, NodeId)>,
    options: &CompareOptions,
    reporter: &ProgressReporter,
    cancel: &CancelToken,
) -> DoppelResult<()> {
    let bytes_total: u64 = pending
        .iter()
        .map(|&(p, id)| {
            let node = pairs[p].node(id);
            node.file_size(Side::Left).unwrap_or(0) + node.file_size(Side::Right).unwrap_or(0)
        })
        .sum();
    reporter.init_phase(Phase::ComparingContent, pending.len() as u64, bytes_total);

    let mut jobs = Vec::with_capacity(pending.len());
    for &(p, id) in &pending {
        let (Some(left), Some(right)) = (prepared[p].backend(Side::Left), prepared[p].backend(Side::Right)) else {
            continue;
        };
        let pair = &pairs[p];
        jobs.push((
            p,
            id,
            pair.node(id).item_type(),
            left.clone(),
            pair.abstract_path(id, Side::Left),
            right.clone(),
            pair.abstract_path(id, Side::Right),
        ));
    }

    let results: Vec<_> = stream::iter(jobs)
        .map(|(p, id, item_type, left, left_path, right, right_path)| async move {
            let same = match item_type {
                ItemType::Symlink => {
                    symlinks_have_same_target(left.as_ref(), left_path.afs_path(), right.as_ref(), right_path.afs_path())
                        .await
                }
                _ => {
                    files_have_same_content(
                        left.as_ref(),
                        left_path.afs_path(),
                        right.as_ref(),
                        right_path.afs_path(),
                        reporter,
                        cancel,
                    )
                    .await
                }
            };
            reporter.add_progress(1, 0);
            (p, id, left_path, same)
        })
        .buffer_unordered(options.max_parallel.max(1))
        .collect()
        .await;

    for (p, id, path, same) in results {
        match same {
            Ok(true) => pairs[p].set_category(id, CompareFilesResult::Equal, None),
            Ok(false) => pairs[p].set_category(id, CompareFilesResult::Different, None),
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => {
                reporter.report_warning(format!("Cannot compare content of {path}: {e}"));
                pairs[p].set_category(id, CompareFilesResult::Conflict, Some(e.to_string()));
            }
        }
    }
    cancel.check()
}

#[cfg(test)]
mod tests {
    use super::*;
    use doppel_core::{FileId, Severity};
    use doppel_providers::MemoryStore;

    fn time_and_size(tolerance_secs: u32) -> CompareOptions {
        CompareOptions::new(CompareVariant::TimeAndSize {
            tolerance_secs,
            ignore_time_shift_minutes: Vec::new(),
        })
    }

    fn mem_pair(left: &str, right: &str) -> FolderPairSpec {
        FolderPairSpec::new(
            AbstractPath::parse_phrase(left).unwrap(),
            AbstractPath::parse_phrase(right).unwrap(),
        )
    }

    fn registry(store: &MemoryStore) -> BackendRegistry {
        let mut registry = BackendRegistry::new();
        registry.register_memory_store(store.clone());
        registry
    }

    async fn run(store: &MemoryStore, options: &CompareOptions, reporter: &ProgressReporter) -> FolderComparison {
        compare_folders(
            &[mem_pair("mem://v/left", "mem://v/right")],
            options,
            &registry(store),
            reporter,
            &CancelToken::new(),
        )
        .await
        .unwrap()
    }

    fn find<'a>(pair: &'a BaseFolderPair, path: &str) -> Vec<(NodeId, &'a crate::FileSystemObject)> {
        pair.iter().filter(|(_, n)| n.pair_relative_path().as_str() == path).collect()
    }

    fn category(pair: &BaseFolderPair, path: &str) -> CompareFilesResult {
        let found = find(pair, path);
        assert_eq!(found.len(), 1, "expected one node at {path}");
        found[0].1.category()
    }

    #[tokio::test]
    async fn test_basic_categories() {
        let store = MemoryStore::new();
        store.add_file("v", "left/a/x.txt", &[0; 10], 100);
        store.add_file("v", "right/a/x.txt", &[1; 10], 100);
        store.add_file("v", "left/newer.txt", &[0; 10], 200);
        store.add_file("v", "right/newer.txt", &[0; 10], 100);
        store.add_file("v", "left/older.txt", b"a", 100);
        store.add_file("v", "right/older.txt", b"a", 300);
        store.add_file("v", "left/size.txt", b"ab", 100);
        store.add_file("v", "right/size.txt", b"abc", 100);
        store.add_file("v", "left/only_left.txt", b"", 1);
        store.add_file("v", "right/only_right.txt", b"", 1);
        store.add_folder("v", "left/empty_left");

        let cmp = run(&store, &time_and_size(2), &ProgressReporter::silent()).await;
        let pair = &cmp.pairs()[0];
        assert!(pair.fatal_error().is_none());
        assert!(pair.base_exists(Side::Left) && pair.base_exists(Side::Right));

        assert_eq!(category(pair, "a"), CompareFilesResult::Equal);
        assert_eq!(category(pair, "a/x.txt"), CompareFilesResult::Equal);
        assert_eq!(category(pair, "newer.txt"), CompareFilesResult::LeftNewer);
        assert_eq!(category(pair, "older.txt"), CompareFilesResult::RightNewer);
        assert_eq!(category(pair, "size.txt"), CompareFilesResult::Different);
        assert_eq!(category(pair, "only_left.txt"), CompareFilesResult::LeftOnly);
        assert_eq!(category(pair, "only_right.txt"), CompareFilesResult::RightOnly);
        assert_eq!(category(pair, "empty_left"), CompareFilesResult::LeftOnly);

        let (a, _) = find(pair, "a")[0];
        assert!(!pair.has_differences(a));
    }

    #[tokio::test]
    async fn test_content_variant_reads_files() {
        let store = MemoryStore::new();
        store.add_file("v", "left/same", b"hello", 1);
        store.add_file("v", "right/same", b"hello", 999);
        store.add_file("v", "left/changed", b"hello", 1);
        store.add_file("v", "right/changed", b"jello", 1);
        store.add_symlink("v", "left/link", "same", 1);
        store.add_symlink("v", "right/link", "changed", 1);

        let cmp = run(&store, &CompareOptions::new(CompareVariant::Content), &ProgressReporter::silent()).await;
        let pair = &cmp.pairs()[0];
        assert_eq!(category(pair, "same"), CompareFilesResult::Equal);
        assert_eq!(category(pair, "changed"), CompareFilesResult::Different);
        assert_eq!(category(pair, "link"), CompareFilesResult::Different);
    }

    #[tokio::test]
    async fn test_type_mismatch_is_conflict() {
        let store = MemoryStore::new();
        store.add_file("v", "left/thing", b"file", 1);
        store.add_file("v", "right/thing/inner.txt", b"x", 1);
        store.add_symlink("v", "left/link", "x", 1);
        store.add_file("v", "right/link", b"x", 1);

        let cmp = run(&store, &time_and_size(0), &ProgressReporter::silent()).await;
        let pair = &cmp.pairs()[0];

        let things = find(pair, "thing");
        assert_eq!(things.len(), 2);
        assert!(things.iter().all(|(_, n)| n.category() == CompareFilesResult::Conflict));
        assert!(things[0].1.category_note().unwrap().contains("type mismatch"));
        assert_eq!(category(pair, "thing/inner.txt"), CompareFilesResult::Conflict);

        let links = find(pair, "link");
        assert_eq!(links.len(), 2);
        assert!(links.iter().all(|(_, n)| n.category() == CompareFilesResult::Conflict));
    }

    #[tokio::test]
    async fn test_unreadable_subtree_is_traversal_error() {
        let store = MemoryStore::new();
        store.add_file("v", "left/docs/a.txt", b"a", 1);
        store.add_file("v", "left/docs/deep/b.txt", b"b", 1);
        store.add_folder("v", "right/docs");
        store.add_file("v", "right/docs/hidden.txt", b"h", 1);
        store.set_unreadable("v", "right/docs");
        store.add_file("v", "left/ok.txt", b"a", 1);

        let reporter = ProgressReporter::silent();
        let cmp = run(&store, &time_and_size(0), &reporter).await;
        let pair = &cmp.pairs()[0];

        assert_eq!(category(pair, "docs"), CompareFilesResult::Equal);
        assert_eq!(category(pair, "docs/a.txt"), CompareFilesResult::TraversalError);
        assert_eq!(category(pair, "docs/deep"), CompareFilesResult::TraversalError);
        assert_eq!(category(pair, "docs/deep/b.txt"), CompareFilesResult::TraversalError);
        assert_eq!(category(pair, "ok.txt"), CompareFilesResult::LeftOnly);
        assert!(reporter.error_log().count(Severity::Warning) >= 1);
        assert_eq!(reporter.error_log().count(Severity::Fatal), 0);
    }

    #[tokio::test]
    async fn test_missing_base_treated_as_empty() {
        let store = MemoryStore::new();
        store.add_file("v", "left/a.txt", b"a", 1);
        store.add_folder("v", "parent");

        let reporter = ProgressReporter::silent();
        let cmp = compare_folders(
            &[mem_pair("mem://v/left", "mem://v/parent/new")],
            &time_and_size(0),
            &registry(&store),
            &reporter,
            &CancelToken::new(),
        )
        .await
        .unwrap();
        let pair = &cmp.pairs()[0];
        assert!(pair.fatal_error().is_none());
        assert!(!pair.base_exists(Side::Right));
        assert_eq!(category(pair, "a.txt"), CompareFilesResult::LeftOnly);
        assert_eq!(reporter.error_log().count(Severity::Warning), 1);
    }

    #[tokio::test]
    async fn test_unreachable_pair_does_not_stop_others() {
        let store = MemoryStore::new();
        store.add_file("v", "left/a.txt", b"a", 1);
        store.add_folder("v", "right");
        store.add_file("v", "blocker", b"", 1);

        let reporter = ProgressReporter::silent();
        let cmp = compare_folders(
            &[
                mem_pair("mem://v/blocker/sub", "mem://v/right"),
                FolderPairSpec::new(
                    AbstractPath::parse_phrase("sftp://host/x").unwrap(),
                    AbstractPath::parse_phrase("mem://v/right").unwrap(),
                ),
                mem_pair("mem://v/left", "mem://v/right"),
            ],
            &time_and_size(0),
            &registry(&store),
            &reporter,
            &CancelToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(cmp.len(), 3);
        assert!(cmp.pairs()[0].fatal_error().is_some());
        assert!(cmp.pairs()[0].is_empty());
        assert!(cmp.pairs()[1].fatal_error().is_some());
        assert_eq!(category(&cmp.pairs()[2], "a.txt"), CompareFilesResult::LeftOnly);
        assert_eq!(reporter.error_log().count(Severity::Fatal), 2);
    }

    #[tokio::test]
    async fn test_case_insensitive_merge() {
        let store = MemoryStore::new();
        store.add_file("l", "Docs/Readme.TXT", b"a", 5);
        store.add_file("r", "docs/readme.txt", b"a", 5);
        let registry = registry(&store);
        registry.register(Arc::new(store.backend("r").case_insensitive()));

        let cmp = compare_folders(
            &[mem_pair("mem://l", "mem://r")],
            &time_and_size(0),
            &registry,
            &ProgressReporter::silent(),
            &CancelToken::new(),
        )
        .await
        .unwrap();
        let pair = &cmp.pairs()[0];
        assert!(!pair.is_case_sensitive());
        assert_eq!(pair.len(), 2);
        let (id, node) = find(pair, "Docs/Readme.TXT")[0];
        assert_eq!(node.category(), CompareFilesResult::Equal);
        assert_eq!(pair.relative_path(id, Side::Right).as_str(), "docs/readme.txt");
    }

    #[tokio::test]
    async fn test_case_sensitive_keeps_both() {
        let store = MemoryStore::new();
        store.add_file("l", "A.txt", b"a", 5);
        store.add_file("r", "a.txt", b"a", 5);
        let cmp = compare_folders(
            &[mem_pair("mem://l", "mem://r")],
            &time_and_size(0),
            &registry(&store),
            &ProgressReporter::silent(),
            &CancelToken::new(),
        )
        .await
        .unwrap();
        let pair = &cmp.pairs()[0];
        assert_eq!(category(pair, "A.txt"), CompareFilesResult::LeftOnly);
        assert_eq!(category(pair, "a.txt"), CompareFilesResult::RightOnly);
    }

    #[tokio::test]
    async fn test_rename_detected_on_same_device() {
        let store = MemoryStore::new();
        store.add_file_with_id("v", "left/b/old.txt", b"0123456789", 5, Some(FileId::from_raw(42)));
        store.add_file_with_id("v", "right/b/new.txt", b"0123456789", 5, Some(FileId::from_raw(42)));

        let cmp = run(&store, &time_and_size(0), &ProgressReporter::silent()).await;
        let pair = &cmp.pairs()[0];
        let (old, old_node) = find(pair, "b/old.txt")[0];
        let (new, new_node) = find(pair, "b/new.txt")[0];
        assert_eq!(old_node.move_ref(), Some(new));
        assert_eq!(new_node.move_ref(), Some(old));

        let mut no_moves = time_and_size(0);
        no_moves.detect_moves = false;
        let cmp = run(&store, &no_moves, &ProgressReporter::silent()).await;
        assert!(cmp.pairs()[0].iter().all(|(_, n)| n.move_ref().is_none()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_hard_link_detected_as_rename_on_native() {
        let tmp = tempfile::TempDir::new().unwrap();
        let left = tmp.path().join("left");
        let right = tmp.path().join("right");
        std::fs::create_dir_all(left.join("b")).unwrap();
        std::fs::create_dir_all(right.join("b")).unwrap();
        std::fs::write(left.join("b/old.txt"), b"0123456789").unwrap();
        std::fs::hard_link(left.join("b/old.txt"), right.join("b/new.txt")).unwrap();

        let cmp = compare_folders(
            &[FolderPairSpec::new(
                AbstractPath::native(&left).unwrap(),
                AbstractPath::native(&right).unwrap(),
            )],
            &time_and_size(2),
            &BackendRegistry::with_native(),
            &ProgressReporter::silent(),
            &CancelToken::new(),
        )
        .await
        .unwrap();
        let pair = &cmp.pairs()[0];
        let (old, _) = find(pair, "b/old.txt")[0];
        let (new, new_node) = find(pair, "b/new.txt")[0];
        assert_eq!(new_node.category(), CompareFilesResult::RightOnly);
        assert_eq!(pair.node(old).move_ref(), Some(new));
    }

    #[tokio::test]
    async fn test_cancelled_comparison() {
        let store = MemoryStore::new();
        store.add_file("v", "left/a", b"", 1);
        store.add_folder("v", "right");
        let cancel = CancelToken::new();
        cancel.cancel();
        let result = compare_folders(
            &[mem_pair("mem://v/left", "mem://v/right")],
            &time_and_size(0),
            &registry(&store),
            &ProgressReporter::silent(),
            &cancel,
        )
        .await;
        assert!(matches!(result, Err(DoppelError::Cancelled)));
    }

    #[test]
    fn test_options_from_toml() {
        let options: CompareOptions = toml::from_str(
            "symlinks = \"exclude\"\n[variant]\nkind = \"time_and_size\"\ntolerance_secs = 2\nignore_time_shift_minutes = [60]\n",
        )
        .unwrap();
        assert_eq!(options.symlinks, SymlinkHandling::Exclude);
        assert!(options.detect_moves);
        assert_eq!(options.max_parallel, 4);
    }
}
