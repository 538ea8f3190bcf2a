// SPDX-License-Identifier: AGPL-3.0-or-later
//! Recursive folder enumeration

use crate::backend::StorageBackend;
use crate::cancel::CancelToken;
use crate::error::{DoppelError, DoppelResult};
use crate::item::{FileInfo, FolderInfo, ItemInfo, SymlinkInfo};
use crate::path::AfsPath;

/// Receives items found during a traversal. `folder` is always relative to
/// the traversal base.
pub trait TraverseSink: Send {
    fn on_file(&mut self, folder: &AfsPath, file: &FileInfo);

    fn on_symlink(&mut self, folder: &AfsPath, symlink: &SymlinkInfo);

    /// Return false to skip the folder's contents.
    fn on_folder(&mut self, folder: &AfsPath, sub_folder: &FolderInfo) -> bool;

    /// `folder` could not be listed. Its contents are unknown, not empty.
    fn on_folder_error(&mut self, folder: &AfsPath, error: &DoppelError);

    /// A single child of `folder` could not be read.
    fn on_item_error(&mut self, folder: &AfsPath, name: &str, message: &str);
}

/// Walk everything below `base`. Only cancellation aborts the walk; read
/// errors go to the sink and the walk continues with the next folder.
pub async fn traverse<B: StorageBackend + ?Sized>(
    backend: &B,
    base: &AfsPath,
    sink: &mut dyn TraverseSink,
    cancel: &CancelToken,
) -> DoppelResult<()> {
    let mut pending = vec![AfsPath::root()];

    while let Some(rel) = pending.pop() {
        cancel.check()?;

        let listing = match backend.list_folder(&base.join(rel.as_str())).await {
            Ok(listing) => listing,
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => {
                tracing::debug!(folder = %backend.display_path(&base.join(rel.as_str())), error = %e, "cannot list folder");
                sink.on_folder_error(&rel, &e);
                continue;
            }
        };

        for (name, message) in &listing.failed_items {
            sink.on_item_error(&rel, name, message);
        }

        for item in &listing.items {
            match item {
                ItemInfo::File(file) => sink.on_file(&rel, file),
                ItemInfo::Symlink(link) => sink.on_symlink(&rel, link),
                ItemInfo::Folder(folder) => {
                    if sink.on_folder(&rel, folder) {
                        pending.push(rel.join(&folder.name));
                    }
                }
            }
        }
    }
    Ok(())
}
