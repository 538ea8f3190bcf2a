// SPDX-License-Identifier: AGPL-3.0-or-later
//! Folder comparison for doppel
//!
//! [`compare_folders`] traverses both sides of every configured folder pair
//! and returns a [`FolderComparison`]: one arena-backed difference tree per
//! pair with a category for every item. Sync operations are assigned later
//! by `doppel-sync`.

pub mod category;
pub mod content;
pub mod engine;
pub mod hierarchy;
pub mod natural;
pub mod rename;
pub mod snapshot;
pub mod sorting;

pub use category::CompareVariant;
pub use engine::{compare_folders, CompareOptions, FolderPairSpec};
pub use hierarchy::{
    BaseFolderPair, CompareFilesResult, FileDescr, FileSystemObject, FolderComparison, NodeId, ObjectKind, Side,
    SidePair, SymlinkDescr, SyncDirection, SyncOperation,
};
pub use natural::compare_natural;
pub use snapshot::SymlinkHandling;
pub use sorting::{compare_rows, rows, sort_rows, RowRef, SortKey, SortSpec};
