// SPDX-License-Identifier: AGPL-3.0-or-later
//! Recycle bin for the local filesystem
//!
//! Items are first renamed into `<base>/.dsync_recycle/<session>/`, which is
//! cheap and keeps them on their own volume. Finalizing hands them to the
//! freedesktop.org trash when it lives on the same device; otherwise they
//! stay in the per-folder recycle folder.

use async_trait::async_trait;
use chrono::Local;
use doppel_core::{
    backend::{RecycleReport, RecycleSession},
    AbstractPath, AfsPath, CancelToken, DoppelError, DoppelResult,
};
use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use super::{io_err, native_path};

pub const RECYCLE_FOLDER_NAME: &str = ".dsync_recycle";

struct StagedItem {
    original: PathBuf,
    staged: PathBuf,
}

pub struct NativeRecycleSession {
    session_dir: PathBuf,
    trash_dir: Option<PathBuf>,
    staged: Vec<StagedItem>,
    finalized: bool,
}

impl NativeRecycleSession {
    pub fn new(base: PathBuf, trash_dir: Option<PathBuf>) -> Self {
        let stamp = Local::now().format("%Y-%m-%d %H%M%S%.3f").to_string();
        Self {
            session_dir: base.join(RECYCLE_FOLDER_NAME).join(stamp),
            trash_dir,
            staged: Vec::new(),
            finalized: false,
        }
    }

    pub fn session_dir(&self) -> &Path {
        &self.session_dir
    }

    /// Staged items whose parent folder was not staged as well.
    fn top_level_items(&self) -> Vec<&StagedItem> {
        let all: HashSet<&Path> = self.staged.iter().map(|s| s.staged.as_path()).collect();
        self.staged
            .iter()
            .filter(|item| {
                item.staged
                    .ancestors()
                    .skip(1)
                    .take_while(|a| *a != self.session_dir)
                    .all(|a| !all.contains(a))
            })
            .collect()
    }

    async fn move_to_trash(&self, item: &StagedItem, trash: &Path) -> DoppelResult<()> {
        let files = trash.join("files");
        let info = trash.join("info");
        fs::create_dir_all(&files).await.map_err(io_err("create folder", &files))?;
        fs::create_dir_all(&info).await.map_err(io_err("create folder", &info))?;

        let name = item
            .original
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "item".to_string());

        // reserve a unique name by creating the .trashinfo first
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let candidate = if attempt == 1 {
                name.clone()
            } else {
                format!("{name}.{attempt}")
            };
            let info_path = info.join(format!("{candidate}.trashinfo"));
            let mut info_file = match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&info_path)
                .await
            {
                Ok(f) => f,
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(DoppelError::from_io("create", info_path.display().to_string(), e)),
            };
            let target = files.join(&candidate);
            if fs::symlink_metadata(&target).await.is_ok() {
                let _ = fs::remove_file(&info_path).await;
                continue;
            }

            let contents = format!(
                "[Trash Info]\nPath={}\nDeletionDate={}\n",
                encode_trash_path(&item.original),
                Local::now().format("%Y-%m-%dT%H:%M:%S")
            );
            let written = info_file.write_all(contents.as_bytes()).await;
            drop(info_file);
            if let Err(e) = written {
                let _ = fs::remove_file(&info_path).await;
                return Err(DoppelError::from_io("write", info_path.display().to_string(), e));
            }
            if let Err(e) = fs::rename(&item.staged, &target).await {
                let _ = fs::remove_file(&info_path).await;
                return Err(DoppelError::from_io("move to trash", item.staged.display().to_string(), e));
            }
            return Ok(());
        }
    }

    async fn remove_empty_session_dirs(&self) {
        if fs::remove_dir(&self.session_dir).await.is_ok() {
            if let Some(parent) = self.session_dir.parent() {
                let _ = fs::remove_dir(parent).await;
            }
        }
    }
}

#[async_trait]
impl RecycleSession for NativeRecycleSession {
    async fn recycle_item(&mut self, item: &AbstractPath, logical_path: &AfsPath) -> DoppelResult<bool> {
        let original = native_path(item)?;
        let meta = match fs::symlink_metadata(&original).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(DoppelError::from_io("stat", original.display().to_string(), e)),
        };

        let mut staged = self.session_dir.clone();
        for seg in logical_path.segments() {
            staged.push(seg);
        }
        if let Some(parent) = staged.parent() {
            fs::create_dir_all(parent).await.map_err(io_err("create folder", parent))?;
        }

        // contents of this folder were staged earlier; only the empty shell is left
        if meta.is_dir() && fs::symlink_metadata(&staged).await.is_ok() {
            fs::remove_dir(&original).await.map_err(io_err("delete folder", &original))?;
        } else {
            fs::rename(&original, &staged).await.map_err(|e| {
                #[cfg(unix)]
                if e.raw_os_error() == Some(libc::EXDEV) {
                    return DoppelError::DifferentVolume {
                        source_path: original.display().to_string(),
                        target: staged.display().to_string(),
                    };
                }
                DoppelError::from_io("move to recycle bin", original.display().to_string(), e)
            })?;
        }

        tracing::debug!(item = %original.display(), "staged for recycle bin");
        self.staged.push(StagedItem { original, staged });
        Ok(true)
    }

    async fn finalize(&mut self, cancel: &CancelToken) -> DoppelResult<RecycleReport> {
        self.finalized = true;
        let mut report = RecycleReport {
            recycled: self.staged.len(),
            failures: Vec::new(),
        };
        if self.staged.is_empty() {
            return Ok(report);
        }

        let trash = match &self.trash_dir {
            Some(trash) => trash.clone(),
            None => return Ok(report),
        };
        if !same_device(&trash, &self.session_dir).await {
            tracing::info!(folder = %self.session_dir.display(), count = report.recycled, "trash is on another device, items kept in recycle folder");
            return Ok(report);
        }

        for item in self.top_level_items() {
            cancel.check()?;
            if let Err(e) = self.move_to_trash(item, &trash).await {
                tracing::warn!(item = %item.original.display(), error = %e, "cannot move to trash");
                report.failures.push((item.original.display().to_string(), e.to_string()));
            }
        }
        if report.failures.is_empty() {
            self.remove_empty_session_dirs().await;
        }
        Ok(report)
    }
}

impl Drop for NativeRecycleSession {
    fn drop(&mut self) {
        if !self.finalized && !self.staged.is_empty() {
            tracing::warn!(
                folder = %self.session_dir.display(),
                count = self.staged.len(),
                "recycle session not finalized, items remain in recycle folder"
            );
        }
    }
}

/// Whether `trash` (or the folder it would be created in) shares a device
/// with `folder`.
#[cfg(unix)]
async fn same_device(trash: &Path, folder: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;

    let mut probe = trash.to_path_buf();
    let trash_meta = loop {
        match fs::metadata(&probe).await {
            Ok(meta) => break meta,
            Err(_) => match probe.parent() {
                Some(parent) => probe = parent.to_path_buf(),
                None => return false,
            },
        }
    };
    match fs::metadata(folder).await {
        Ok(meta) => meta.dev() == trash_meta.dev(),
        Err(_) => false,
    }
}

#[cfg(not(unix))]
async fn same_device(_trash: &Path, _folder: &Path) -> bool {
    false
}

/// Percent-encoded raw path bytes, `/` kept as is.
#[cfg(unix)]
fn encode_trash_path(path: &Path) -> String {
    use std::os::unix::ffi::OsStrExt;
    path.as_os_str()
        .as_bytes()
        .split(|&b| b == b'/')
        .map(|seg| urlencoding::encode_binary(seg).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(not(unix))]
fn encode_trash_path(path: &Path) -> String {
    path.to_string_lossy()
        .split('/')
        .map(|seg| urlencoding::encode(seg).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}
