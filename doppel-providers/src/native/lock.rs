// SPDX-License-Identifier: AGPL-3.0-or-later
//! Advisory lock files
//!
//! A `.dsync.lock` file in a base folder tells other doppel processes that
//! the folder is being synchronized. Ownership is an exclusive OS lock on
//! that file; the JSON body only names the holder. A body left behind by a
//! process that no longer holds the OS lock is stale and gets overwritten.

use chrono::{DateTime, Utc};
use doppel_core::{CancelToken, DoppelError, DoppelResult};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const LOCK_FILE_NAME: &str = ".dsync.lock";

const POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy)]
pub struct LockOptions {
    /// How long to wait for another owner before giving up.
    pub wait: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            wait: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LockInfo {
    pid: u32,
    host: String,
    created: DateTime<Utc>,
}

/// Held lock; released on drop
#[derive(Debug)]
pub struct DirLock {
    path: PathBuf,
    file: File,
}

impl DirLock {
    pub async fn acquire(folder: &Path, options: LockOptions, cancel: &CancelToken) -> DoppelResult<Self> {
        let path = folder.join(LOCK_FILE_NAME);
        let waited_since = tokio::time::Instant::now();

        loop {
            cancel.check()?;
            match try_lock(&path) {
                Ok(Some(file)) => return Self::take(path, file),
                Ok(None) => {}
                Err(e) => return Err(DoppelError::from_io("lock", path.display().to_string(), e)),
            }

            if waited_since.elapsed() >= options.wait {
                return Err(DoppelError::Lock(match read_info(&path).await {
                    Some(holder) => format!("{} (held by process {} on {})", folder.display(), holder.pid, holder.host),
                    None => folder.display().to_string(),
                }));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    fn take(path: PathBuf, mut file: File) -> DoppelResult<Self> {
        let name = path.display().to_string();
        let io_err = |e: io::Error| DoppelError::from_io("write lock", name.clone(), e);

        let mut previous = Vec::new();
        file.read_to_end(&mut previous).map_err(io_err)?;
        if let Ok(holder) = serde_json::from_slice::<LockInfo>(&previous) {
            tracing::warn!(lock = %path.display(), pid = holder.pid, host = %holder.host, "taking over stale lock");
        }

        let info = LockInfo {
            pid: std::process::id(),
            host: host_name(),
            created: Utc::now(),
        };
        let raw = serde_json::to_vec(&info)?;
        file.set_len(0).map_err(io_err)?;
        file.seek(SeekFrom::Start(0)).map_err(io_err)?;
        file.write_all(&raw).map_err(io_err)?;
        file.flush().map_err(io_err)?;

        tracing::debug!(lock = %path.display(), "lock acquired");
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        // unlink while still holding the lock; a waiter that locked this inode sees it is gone
        if matches!(is_current(&self.file, &self.path), Ok(true)) {
            if let Err(e) = std::fs::remove_file(&self.path) {
                tracing::warn!(lock = %self.path.display(), error = %e, "cannot remove lock file");
            }
        }
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::debug!(lock = %self.path.display(), error = %e, "cannot unlock");
        }
    }
}

/// Lock the file at `path`, or `None` while another owner holds it.
fn try_lock(path: &Path) -> io::Result<Option<File>> {
    loop {
        let file = OpenOptions::new().read(true).write(true).create(true).truncate(false).open(path)?;
        match file.try_lock_exclusive() {
            Ok(()) => {}
            Err(e) if is_contended(&e) => return Ok(None),
            Err(e) => return Err(e),
        }
        // the previous owner unlinked the file between our open and lock
        if is_current(&file, path)? {
            return Ok(Some(file));
        }
    }
}

fn is_contended(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::WouldBlock || e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

/// Whether `path` still names the file behind `file`.
#[cfg(unix)]
fn is_current(file: &File, path: &Path) -> io::Result<bool> {
    use std::os::unix::fs::MetadataExt;
    let held = file.metadata()?;
    match std::fs::metadata(path) {
        Ok(on_disk) => Ok(on_disk.dev() == held.dev() && on_disk.ino() == held.ino()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

// open files cannot be unlinked or replaced here
#[cfg(not(unix))]
fn is_current(_file: &File, path: &Path) -> io::Result<bool> {
    Ok(path.exists())
}

async fn read_info(path: &Path) -> Option<LockInfo> {
    let raw = tokio::fs::read(path).await.ok()?;
    serde_json::from_slice(&raw).ok()
}

#[cfg(unix)]
fn host_name() -> String {
    let mut buf = [0u8; 256];
    // SAFETY: buf is writable for its full length, which is what we pass.
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len()) };
    if rc != 0 {
        return "localhost".to_string();
    }
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

#[cfg(not(unix))]
fn host_name() -> String {
    std::env::var("COMPUTERNAME").unwrap_or_else(|_| "localhost".to_string())
}
