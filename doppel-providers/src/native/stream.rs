// SPDX-License-Identifier: AGPL-3.0-or-later
//! File streams on the local filesystem

use async_trait::async_trait;
use doppel_core::{
    backend::{FinalizeResult, InputStream, OutputStream},
    item::{from_unix_time, to_unix_time},
    DoppelError, DoppelResult, StreamAttributes,
};
use std::path::PathBuf;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use super::{file_id, io_err};

const BLOCK_SIZE: usize = 128 * 1024;

pub struct NativeInputStream {
    file: File,
    path: PathBuf,
}

impl NativeInputStream {
    pub async fn open(path: PathBuf) -> DoppelResult<Self> {
        let file = File::open(&path).await.map_err(io_err("open", &path))?;
        Ok(Self { file, path })
    }

    pub async fn stat(&self) -> DoppelResult<StreamAttributes> {
        let meta = self.file.metadata().await.map_err(io_err("stat", &self.path))?;
        Ok(StreamAttributes {
            mod_time: meta.modified().map(to_unix_time).unwrap_or_default(),
            size: meta.len(),
            file_id: file_id(&meta),
        })
    }
}

#[async_trait]
impl InputStream for NativeInputStream {
    async fn read(&mut self, buf: &mut [u8]) -> DoppelResult<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self
                .file
                .read(&mut buf[filled..])
                .await
                .map_err(io_err("read", &self.path))?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(filled)
    }

    fn block_size(&self) -> usize {
        BLOCK_SIZE
    }

    async fn attributes(&mut self) -> DoppelResult<Option<StreamAttributes>> {
        self.stat().await.map(Some)
    }
}

/// New file that is deleted again unless [`OutputStream::finalize`] completes.
pub struct NativeOutputStream {
    file: Option<File>,
    path: PathBuf,
    mod_time: Option<i64>,
    finalized: bool,
}

impl NativeOutputStream {
    pub async fn create(path: PathBuf, stream_size: Option<u64>, mod_time: Option<i64>) -> DoppelResult<Self> {
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(io_err("create", &path))?;

        let stream = Self {
            file: Some(file),
            path,
            mod_time,
            finalized: false,
        };
        if let (Some(size), Some(file)) = (stream_size, stream.file.as_ref()) {
            preallocate(file, size, &stream.path);
        }
        Ok(stream)
    }
}

#[async_trait]
impl OutputStream for NativeOutputStream {
    async fn write(&mut self, data: &[u8]) -> DoppelResult<()> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| DoppelError::ContractViolation("write after finalize".into()))?;
        file.write_all(data).await.map_err(io_err("write", &self.path))
    }

    async fn finalize(&mut self) -> DoppelResult<FinalizeResult> {
        let mut file = self
            .file
            .take()
            .ok_or_else(|| DoppelError::ContractViolation("stream finalized twice".into()))?;
        file.flush().await.map_err(io_err("write", &self.path))?;
        let meta = file.metadata().await.map_err(io_err("stat", &self.path))?;
        self.finalized = true;

        let mut result = FinalizeResult {
            file_id: file_id(&meta),
            error_mod_time: None,
        };
        if let Some(mod_time) = self.mod_time {
            let std_file = file.into_std().await;
            let outcome = tokio::task::spawn_blocking(move || std_file.set_modified(from_unix_time(mod_time))).await;
            result.error_mod_time = match outcome {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e.to_string()),
                Err(e) => Some(e.to_string()),
            };
        }
        Ok(result)
    }
}

impl Drop for NativeOutputStream {
    fn drop(&mut self) {
        if !self.finalized {
            drop(self.file.take());
            if let Err(e) = std::fs::remove_file(&self.path) {
                tracing::warn!(path = %self.path.display(), error = %e, "cannot remove incomplete file");
            }
        }
    }
}

/// Reserve `size` bytes without changing the file length. Failures are only logged.
#[cfg(target_os = "linux")]
fn preallocate(file: &File, size: u64, path: &std::path::Path) {
    use std::os::unix::io::AsRawFd;
    if size == 0 {
        return;
    }
    let fd = file.as_raw_fd();
    // SAFETY: fd belongs to an open file owned by `file` for the whole call.
    let rc = unsafe { libc::fallocate(fd, libc::FALLOC_FL_KEEP_SIZE, 0, size as libc::off_t) };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        tracing::debug!(path = %path.display(), error = %err, "preallocation skipped");
    }
}

#[cfg(not(target_os = "linux"))]
fn preallocate(_file: &File, _size: u64, _path: &std::path::Path) {}
