// SPDX-License-Identifier: AGPL-3.0-or-later
//! Copy and move across backends
//!
//! Copies go to a temporary sibling first and are renamed into place only
//! once complete, so a target is never observed half-written.

use crate::backend::{InputStream, OutputStream, StorageBackend};
use crate::cancel::CancelToken;
use crate::error::{DoppelError, DoppelResult};
use crate::item::{CopyResult, ItemType};
use crate::path::{AbstractPath, AfsPath};
use crate::progress::IoCallback;

/// Suffix of in-flight copies.
pub const TEMP_FILE_SUFFIX: &str = ".dsync_tmp";

/// A backend together with a path on it
#[derive(Clone, Copy)]
pub struct Location<'a> {
    pub backend: &'a dyn StorageBackend,
    pub path: &'a AfsPath,
}

impl<'a> Location<'a> {
    pub fn new(backend: &'a dyn StorageBackend, path: &'a AfsPath) -> Self {
        Self { backend, path }
    }

    pub fn abstract_path(&self) -> AbstractPath {
        self.backend.abstract_path(self.path)
    }

    fn same_kind(&self, other: &Location<'_>) -> bool {
        self.backend.device().scheme() == other.backend.device().scheme()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CopyOptions {
    pub copy_permissions: bool,
}

/// Temporary name used while copying to `target`.
pub fn temp_path_for(target: &AfsPath) -> DoppelResult<AfsPath> {
    let name = target
        .name()
        .ok_or_else(|| DoppelError::InvalidPath(format!("cannot copy onto root {target}")))?;
    let parent = target.parent().unwrap_or_default();
    Ok(parent.join(format!("{name}{TEMP_FILE_SUFFIX}")))
}

/// Pump `input` into `output` and finalize it.
pub async fn copy_stream(
    input: &mut dyn InputStream,
    output: &mut dyn OutputStream,
    progress: Option<&IoCallback<'_>>,
    cancel: &CancelToken,
) -> DoppelResult<(u64, crate::backend::FinalizeResult)> {
    let mut buf = vec![0u8; input.block_size().max(4096)];
    let mut total = 0u64;
    loop {
        cancel.check()?;
        let n = input.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        output.write(&buf[..n]).await?;
        total += n as u64;
        if let Some(cb) = progress {
            cb(n as u64)?;
        }
    }
    let finalized = output.finalize().await?;
    Ok((total, finalized))
}

async fn copy_file_direct(
    source: Location<'_>,
    target: Location<'_>,
    options: CopyOptions,
    progress: Option<&IoCallback<'_>>,
    cancel: &CancelToken,
) -> DoppelResult<CopyResult> {
    if source.same_kind(&target) {
        return source
            .backend
            .copy_file_same_kind(
                source.path,
                &target.abstract_path(),
                options.copy_permissions,
                progress,
                cancel,
            )
            .await;
    }

    let mut input = source.backend.open_input_stream(source.path).await?;
    let attrs = input.attributes().await?;
    let mut output = target
        .backend
        .open_output_stream(
            target.path,
            attrs.as_ref().map(|a| a.size),
            attrs.as_ref().map(|a| a.mod_time),
        )
        .await?;
    let (file_size, finalized) = copy_stream(input.as_mut(), output.as_mut(), progress, cancel).await?;

    if let Some(attrs) = &attrs {
        if attrs.size != file_size {
            return Err(DoppelError::Other(format!(
                "{} changed size while being copied ({} -> {} bytes)",
                source.backend.display_path(source.path),
                attrs.size,
                file_size
            )));
        }
    }

    Ok(CopyResult {
        file_size,
        mod_time: attrs.as_ref().map(|a| a.mod_time).unwrap_or_default(),
        source_id: attrs.and_then(|a| a.file_id),
        target_id: finalized.file_id,
        error_mod_time: finalized.error_mod_time,
        error_permissions: options
            .copy_permissions
            .then(|| "permissions cannot be copied between different storage kinds".to_string()),
    })
}

/// Copy `source` to the temporary sibling of `target`. Returns the temp
/// path; a stale temp file from an interrupted run is replaced.
pub async fn copy_to_temp(
    source: Location<'_>,
    target: Location<'_>,
    options: CopyOptions,
    progress: Option<&IoCallback<'_>>,
    cancel: &CancelToken,
) -> DoppelResult<(AfsPath, CopyResult)> {
    let temp = temp_path_for(target.path)?;
    if target.backend.item_type_if_exists(&temp).await? == Some(ItemType::File) {
        tracing::debug!(path = %target.backend.display_path(&temp), "removing stale temp file");
        target.backend.remove_file(&temp).await?;
    }

    let temp_target = Location::new(target.backend, &temp);
    match copy_file_direct(source, temp_target, options, progress, cancel).await {
        Ok(result) => Ok((temp, result)),
        Err(e) => {
            if let Err(cleanup) = target.backend.remove_file(&temp).await {
                if !cleanup.is_not_found() {
                    tracing::warn!(path = %target.backend.display_path(&temp), error = %cleanup, "cannot remove temp file");
                }
            }
            if cancel.is_cancelled() {
                Err(DoppelError::Cancelled)
            } else {
                Err(e)
            }
        }
    }
}

/// Move a finished temp file into place. `target` must not exist.
pub async fn commit_temp(backend: &dyn StorageBackend, temp: &AfsPath, target: &AfsPath) -> DoppelResult<()> {
    if let Err(e) = backend
        .rename_item_same_kind(temp, &backend.abstract_path(target))
        .await
    {
        let _ = backend.remove_file(temp).await;
        return Err(e);
    }
    Ok(())
}

/// Copy a file so that `target` either appears complete or not at all.
pub async fn copy_file_transactional(
    source: Location<'_>,
    target: Location<'_>,
    options: CopyOptions,
    progress: Option<&IoCallback<'_>>,
    cancel: &CancelToken,
) -> DoppelResult<CopyResult> {
    if target.backend.item_type_if_exists(target.path).await?.is_some() {
        return Err(DoppelError::TargetExists(target.backend.display_path(target.path)));
    }
    let (temp, result) = copy_to_temp(source, target, options, progress, cancel).await?;
    commit_temp(target.backend, &temp, target.path).await?;
    Ok(result)
}

/// Copy a symlink. Only possible between backends of the same kind.
pub async fn copy_symlink(source: Location<'_>, target: Location<'_>, options: CopyOptions) -> DoppelResult<()> {
    if !source.same_kind(&target) {
        return Err(DoppelError::Unsupported(format!(
            "cannot copy symlink {} to a different storage kind",
            source.backend.display_path(source.path)
        )));
    }
    source
        .backend
        .copy_symlink_same_kind(source.path, &target.abstract_path(), options.copy_permissions)
        .await
}

/// Move a file or symlink. Renames when both sides share a device root,
/// otherwise copies and deletes the source.
pub async fn move_item(
    source: Location<'_>,
    target: Location<'_>,
    item_type: ItemType,
    options: CopyOptions,
    progress: Option<&IoCallback<'_>>,
    cancel: &CancelToken,
) -> DoppelResult<()> {
    if source.same_kind(&target) {
        match source
            .backend
            .rename_item_same_kind(source.path, &target.abstract_path())
            .await
        {
            Ok(()) => return Ok(()),
            Err(DoppelError::DifferentVolume { .. }) => {
                tracing::debug!(
                    source = %source.abstract_path(),
                    target = %target.abstract_path(),
                    "rename crosses volumes, copying instead"
                );
            }
            Err(e) => return Err(e),
        }
    }

    match item_type {
        ItemType::File => {
            copy_file_transactional(source, target, options, progress, cancel).await?;
            source.backend.remove_file(source.path).await
        }
        ItemType::Symlink => {
            copy_symlink(source, target, options).await?;
            source.backend.remove_symlink(source.path).await
        }
        ItemType::Folder => Err(DoppelError::Unsupported(format!(
            "cannot move folder {} across volumes",
            source.abstract_path()
        ))),
    }
}
