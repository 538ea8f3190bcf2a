// SPDX-License-Identifier: AGPL-3.0-or-later
//! Storage backend trait
//!
//! A backend instance is bound to one [`DeviceRoot`] and addresses items by
//! [`AfsPath`] below it. Operations that take a second location (copy,
//! rename) take a full [`AbstractPath`]; the `*_same_kind` variants are
//! only called when both locations use the backend's scheme.
//!
//! Contract shared by every implementation:
//! - creating, copying or renaming onto an existing item fails with
//!   [`DoppelError::TargetExists`], never overwrites
//! - an output stream that is dropped without `finalize` leaves no file
//! - folder enumeration never follows symlinks

use async_trait::async_trait;
use std::cmp::Ordering;

use crate::cancel::CancelToken;
use crate::error::{DoppelError, DoppelResult};
use crate::item::{CopyResult, FileId, FolderListing, ItemType, PathStatus, StreamAttributes};
use crate::path::{AbstractPath, AfsPath, DeviceRoot};
use crate::progress::IoCallback;
use crate::traverse::{self, TraverseSink};

/// Storage backend capabilities
#[derive(Debug, Clone, Default)]
pub struct StorageCapabilities {
    pub symlinks: bool,
    pub permissions: bool,
    pub file_ids: bool,
    pub recycle_bin: bool,
    pub preallocation: bool,
}

impl StorageCapabilities {
    pub fn local_filesystem() -> Self {
        Self {
            symlinks: cfg!(unix),
            permissions: cfg!(unix),
            file_ids: cfg!(unix),
            recycle_bin: true,
            preallocation: cfg!(target_os = "linux"),
        }
    }
}

#[async_trait]
pub trait InputStream: Send {
    /// Fill as much of `buf` as possible; a short read means end of stream.
    async fn read(&mut self, buf: &mut [u8]) -> DoppelResult<usize>;

    /// Preferred read size.
    fn block_size(&self) -> usize;

    /// Attributes of the opened item, if the backend can report them.
    async fn attributes(&mut self) -> DoppelResult<Option<StreamAttributes>>;
}

/// Result of completing an output stream
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FinalizeResult {
    pub file_id: Option<FileId>,
    pub error_mod_time: Option<String>,
}

#[async_trait]
pub trait OutputStream: Send {
    async fn write(&mut self, data: &[u8]) -> DoppelResult<()>;

    /// Commit the written data. Until this succeeds the target counts as
    /// incomplete and is removed when the stream is dropped.
    async fn finalize(&mut self) -> DoppelResult<FinalizeResult>;
}

/// Items that could not be moved to the recycle bin when a session finished
#[derive(Debug, Clone, Default)]
pub struct RecycleReport {
    pub recycled: usize,
    pub failures: Vec<(String, String)>,
}

/// Batched recycle-bin deletion
#[async_trait]
pub trait RecycleSession: Send {
    /// Remove `item` from its place and stage it for the recycle bin.
    /// `logical_path` is the item's path relative to the session base and
    /// decides where it lands inside the bin. Returns false if the item did
    /// not exist.
    async fn recycle_item(&mut self, item: &AbstractPath, logical_path: &AfsPath) -> DoppelResult<bool>;

    /// Commit everything staged. Failures of single items are reported, not
    /// raised.
    async fn finalize(&mut self, cancel: &CancelToken) -> DoppelResult<RecycleReport>;
}

/// Storage backend trait
#[async_trait]
pub trait StorageBackend: Send + Sync {
    fn device(&self) -> &DeviceRoot;
    fn display_name(&self) -> &str;
    fn capabilities(&self) -> &StorageCapabilities;
    fn is_case_sensitive(&self) -> bool;

    fn abstract_path(&self, path: &AfsPath) -> AbstractPath {
        AbstractPath::new(self.device().clone(), path.clone())
    }

    fn display_path(&self, path: &AfsPath) -> String {
        self.abstract_path(path).to_string()
    }

    /// Whether `other` is the same device. Never touches the OS.
    fn compare_device_root(&self, other: &DeviceRoot) -> Ordering {
        self.device().cmp(other)
    }

    async fn item_type(&self, path: &AfsPath) -> DoppelResult<ItemType>;

    async fn item_type_if_exists(&self, path: &AfsPath) -> DoppelResult<Option<ItemType>> {
        match self.item_type(path).await {
            Ok(t) => Ok(Some(t)),
            Err(DoppelError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Walk up from `path` to the first ancestor that exists.
    async fn path_status(&self, path: &AfsPath) -> DoppelResult<PathStatus> {
        let mut missing = Vec::new();
        let mut current = path.clone();
        loop {
            if let Some(existing_type) = self.item_type_if_exists(&current).await? {
                missing.reverse();
                return Ok(PathStatus {
                    existing_type,
                    existing_path: self.abstract_path(&current),
                    missing,
                });
            }
            match (current.parent(), current.name()) {
                (Some(parent), Some(name)) => {
                    missing.push(name.to_string());
                    current = parent;
                }
                _ => return Err(DoppelError::RootUnreachable(self.display_path(path))),
            }
        }
    }

    async fn list_folder(&self, path: &AfsPath) -> DoppelResult<FolderListing>;

    /// Depth-first enumeration below `base`, reporting to `sink`.
    async fn traverse(
        &self,
        base: &AfsPath,
        sink: &mut dyn TraverseSink,
        cancel: &CancelToken,
    ) -> DoppelResult<()> {
        traverse::traverse(self, base, sink, cancel).await
    }

    /// Create one folder. The parent must exist.
    async fn create_folder(&self, path: &AfsPath) -> DoppelResult<()>;

    /// Create `path` and any missing ancestors.
    async fn create_folder_recursive(&self, path: &AfsPath) -> DoppelResult<()> {
        let status = self.path_status(path).await?;
        if status.existing_type != ItemType::Folder && !status.missing.is_empty() {
            return Err(DoppelError::NotAFolder(status.existing_path.to_string()));
        }
        let mut current = status.existing_path.afs_path().clone();
        for name in &status.missing {
            current = current.join(name);
            match self.create_folder(&current).await {
                Ok(()) | Err(DoppelError::TargetExists(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    async fn remove_file(&self, path: &AfsPath) -> DoppelResult<()>;
    async fn remove_symlink(&self, path: &AfsPath) -> DoppelResult<()>;
    /// Remove an empty folder.
    async fn remove_folder(&self, path: &AfsPath) -> DoppelResult<()>;

    /// Remove a folder with everything below it. Symlinks are removed, not followed.
    async fn remove_folder_recursive(&self, path: &AfsPath) -> DoppelResult<()> {
        let listing = self.list_folder(path).await?;
        for item in &listing.items {
            let child = path.join(item.name());
            match item.item_type() {
                ItemType::File => self.remove_file(&child).await?,
                ItemType::Symlink => self.remove_symlink(&child).await?,
                ItemType::Folder => self.remove_folder_recursive(&child).await?,
            }
        }
        self.remove_folder(path).await
    }

    async fn set_mod_time(&self, path: &AfsPath, mod_time: i64) -> DoppelResult<()>;

    async fn resolve_symlink(&self, path: &AfsPath) -> DoppelResult<AbstractPath>;
    async fn read_symlink_target(&self, path: &AfsPath) -> DoppelResult<Vec<u8>>;

    async fn open_input_stream(&self, path: &AfsPath) -> DoppelResult<Box<dyn InputStream>>;

    /// Create a new file for writing. `stream_size` lets the backend
    /// preallocate; `mod_time` is applied on finalize.
    async fn open_output_stream(
        &self,
        path: &AfsPath,
        stream_size: Option<u64>,
        mod_time: Option<i64>,
    ) -> DoppelResult<Box<dyn OutputStream>>;

    async fn copy_file_same_kind(
        &self,
        source: &AfsPath,
        target: &AbstractPath,
        copy_permissions: bool,
        progress: Option<&IoCallback<'_>>,
        cancel: &CancelToken,
    ) -> DoppelResult<CopyResult>;

    async fn copy_new_folder_same_kind(
        &self,
        source: &AfsPath,
        target: &AbstractPath,
        copy_permissions: bool,
    ) -> DoppelResult<()>;

    async fn copy_symlink_same_kind(
        &self,
        source: &AfsPath,
        target: &AbstractPath,
        copy_permissions: bool,
    ) -> DoppelResult<()>;

    /// Fails with [`DoppelError::DifferentVolume`] when `target` is on
    /// another device root.
    async fn rename_item_same_kind(&self, source: &AfsPath, target: &AbstractPath) -> DoppelResult<()>;

    async fn supports_permissions(&self, path: &AfsPath) -> DoppelResult<bool>;

    /// Free bytes at `path`, 0 if unknown.
    async fn free_disk_space(&self, path: &AfsPath) -> DoppelResult<u64>;

    async fn supports_recycle_bin(&self, path: &AfsPath) -> DoppelResult<bool>;

    /// Start a recycle session for items below `base`.
    async fn create_recycle_session(&self, base: &AfsPath) -> DoppelResult<Box<dyn RecycleSession>>;

    /// Recycle a single item right away. Returns false if it did not exist.
    async fn recycle_item_if_exists(&self, path: &AfsPath) -> DoppelResult<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_capabilities() {
        let caps = StorageCapabilities::local_filesystem();
        assert!(caps.recycle_bin);
        assert_eq!(caps.symlinks, cfg!(unix));
    }
}
