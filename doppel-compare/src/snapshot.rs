// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-side folder snapshots built during traversal

use doppel_core::transfer::TEMP_FILE_SUFFIX;
use doppel_core::{AfsPath, DoppelError, FileInfo, FolderInfo, ProgressReporter, SymlinkInfo, TraverseSink};
use doppel_providers::{LOCK_FILE_NAME, RECYCLE_FOLDER_NAME};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymlinkHandling {
    /// Leave symlinks out of the comparison.
    Exclude,
    /// Compare and copy the links themselves.
    #[default]
    Direct,
}

/// Contents of one folder on one side
#[derive(Debug, Clone, Default)]
pub struct FolderContainer {
    pub files: BTreeMap<String, FileInfo>,
    pub symlinks: BTreeMap<String, SymlinkInfo>,
    pub folders: BTreeMap<String, FolderContainer>,
    /// Listing failed; contents unknown.
    pub error: Option<String>,
    /// Children that were seen but could not be read, with the reason.
    pub failed_items: BTreeMap<String, String>,
}

impl FolderContainer {
    fn folder_mut(&mut self, path: &AfsPath) -> &mut FolderContainer {
        let mut current = self;
        for seg in path.segments() {
            current = current.folders.entry(seg.to_string()).or_default();
        }
        current
    }

    pub fn item_count(&self) -> usize {
        self.files.len()
            + self.symlinks.len()
            + self.folders.values().map(|f| 1 + f.item_count()).sum::<usize>()
    }
}

/// Names the synchronizer itself creates inside base folders.
fn is_internal(folder: &AfsPath, name: &str) -> bool {
    name.ends_with(TEMP_FILE_SUFFIX) || (folder.is_root() && (name == LOCK_FILE_NAME || name == RECYCLE_FOLDER_NAME))
}

/// Collects one side's traversal into a [`FolderContainer`]
pub struct SnapshotSink {
    root: FolderContainer,
    symlinks: SymlinkHandling,
    reporter: ProgressReporter,
}

impl SnapshotSink {
    pub fn new(symlinks: SymlinkHandling, reporter: ProgressReporter) -> Self {
        Self {
            root: FolderContainer::default(),
            symlinks,
            reporter,
        }
    }

    pub fn into_snapshot(self) -> FolderContainer {
        self.root
    }
}

impl TraverseSink for SnapshotSink {
    fn on_file(&mut self, folder: &AfsPath, file: &FileInfo) {
        if is_internal(folder, &file.name) {
            return;
        }
        self.reporter.add_progress(1, 0);
        self.root.folder_mut(folder).files.insert(file.name.clone(), file.clone());
    }

    fn on_symlink(&mut self, folder: &AfsPath, symlink: &SymlinkInfo) {
        if self.symlinks == SymlinkHandling::Exclude || is_internal(folder, &symlink.name) {
            return;
        }
        self.reporter.add_progress(1, 0);
        self.root
            .folder_mut(folder)
            .symlinks
            .insert(symlink.name.clone(), symlink.clone());
    }

    fn on_folder(&mut self, folder: &AfsPath, sub_folder: &FolderInfo) -> bool {
        if is_internal(folder, &sub_folder.name) {
            return false;
        }
        self.reporter.add_progress(1, 0);
        self.root
            .folder_mut(folder)
            .folders
            .entry(sub_folder.name.clone())
            .or_default();
        true
    }

    fn on_folder_error(&mut self, folder: &AfsPath, error: &DoppelError) {
        self.root.folder_mut(folder).error = Some(error.to_string());
    }

    fn on_item_error(&mut self, folder: &AfsPath, name: &str, message: &str) {
        self.root
            .folder_mut(folder)
            .failed_items
            .insert(name.to_string(), message.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use doppel_core::{CancelToken, StorageBackend};
    use doppel_providers::MemoryStore;

    #[tokio::test]
    async fn test_snapshot_skips_internal_names() {
        let store = MemoryStore::new();
        store.add_file("v", "b/a.txt", b"a", 1);
        store.add_file("v", "b/a.txt.dsync_tmp", b"partial", 1);
        store.add_file("v", "b/.dsync.lock", b"{}", 1);
        store.add_file("v", "b/.dsync_recycle/old/x", b"x", 1);
        store.add_file("v", "b/sub/.dsync.lock", b"user file", 1);
        store.add_symlink("v", "b/link", "a.txt", 1);

        let mut sink = SnapshotSink::new(SymlinkHandling::Direct, ProgressReporter::silent());
        store
            .backend("v")
            .traverse(&AfsPath::new("b"), &mut sink, &CancelToken::new())
            .await
            .unwrap();
        let snap = sink.into_snapshot();

        assert_eq!(snap.files.keys().collect::<Vec<_>>(), vec!["a.txt"]);
        assert_eq!(snap.folders.keys().collect::<Vec<_>>(), vec!["sub"]);
        assert!(snap.folders["sub"].files.contains_key(".dsync.lock"));
        assert!(snap.symlinks.contains_key("link"));
        assert_eq!(snap.item_count(), 4);
    }

    #[tokio::test]
    async fn test_skips_names_written_by_sync() {
        let store = MemoryStore::new();
        let temp = doppel_core::transfer::temp_path_for(&AfsPath::new("b/report.pdf")).unwrap();
        store.add_file("v", temp.as_str(), b"partial", 1);
        store.add_file("v", &format!("b/{LOCK_FILE_NAME}"), b"{}", 1);
        store.add_folder("v", &format!("b/{RECYCLE_FOLDER_NAME}/session"));

        let mut sink = SnapshotSink::new(SymlinkHandling::Direct, ProgressReporter::silent());
        store
            .backend("v")
            .traverse(&AfsPath::new("b"), &mut sink, &CancelToken::new())
            .await
            .unwrap();
        assert_eq!(sink.into_snapshot().item_count(), 0);
    }

    #[tokio::test]
    async fn test_excluded_symlinks_and_errors() {
        let store = MemoryStore::new();
        store.add_symlink("v", "link", "x", 1);
        store.add_folder("v", "locked/inner");
        store.set_unreadable("v", "locked");

        let mut sink = SnapshotSink::new(SymlinkHandling::Exclude, ProgressReporter::silent());
        store
            .backend("v")
            .traverse(&AfsPath::root(), &mut sink, &CancelToken::new())
            .await
            .unwrap();
        let snap = sink.into_snapshot();

        assert!(snap.symlinks.is_empty());
        assert!(snap.folders["locked"].error.is_some());
        assert!(snap.folders["locked"].folders.is_empty());
    }
}
