// SPDX-License-Identifier: AGPL-3.0-or-later
//! Local filesystem backend

mod lock;
mod recycle;
mod stream;

pub use lock::{DirLock, LockOptions, LOCK_FILE_NAME};
pub use recycle::{NativeRecycleSession, RECYCLE_FOLDER_NAME};
pub use stream::{NativeInputStream, NativeOutputStream};

use async_trait::async_trait;
use doppel_core::{
    backend::{InputStream, OutputStream, RecycleSession, StorageBackend, StorageCapabilities},
    item::to_unix_time,
    transfer::copy_stream,
    AbstractPath, AfsPath, CancelToken, CopyResult, DeviceRoot, DoppelError, DoppelResult, FileId,
    FileInfo, FolderInfo, FolderListing, IoCallback, ItemInfo, ItemType, SymlinkInfo,
};
use std::cmp::Ordering;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Local filesystem backend
pub struct NativeBackend {
    device: DeviceRoot,
    capabilities: StorageCapabilities,
    trash_dir: Option<PathBuf>,
}

impl NativeBackend {
    pub fn new(device: DeviceRoot) -> DoppelResult<Self> {
        if !device.is_native() {
            return Err(DoppelError::Unsupported(format!(
                "native backend cannot serve {device}"
            )));
        }
        // a relative root would resolve against the working directory
        let device = DeviceRoot::native(device.root())?;
        Ok(Self {
            device,
            capabilities: StorageCapabilities::local_filesystem(),
            trash_dir: default_trash_dir(),
        })
    }

    /// Desktop trash that recycle sessions hand their items to. `None`
    /// keeps recycled items in the per-folder recycle folder.
    pub fn with_trash_dir(mut self, trash_dir: Option<PathBuf>) -> Self {
        self.trash_dir = trash_dir;
        self
    }

    fn real_path(&self, path: &AfsPath) -> PathBuf {
        let mut real = PathBuf::from(self.device.root());
        for seg in path.segments() {
            real.push(seg);
        }
        real
    }

    fn new_recycle_session(&self, base: &AfsPath) -> NativeRecycleSession {
        NativeRecycleSession::new(self.real_path(base), self.trash_dir.clone())
    }
}

/// Local path of a native [`AbstractPath`].
pub fn native_path(path: &AbstractPath) -> DoppelResult<PathBuf> {
    if !path.device().is_native() {
        return Err(DoppelError::Unsupported(format!("{path} is not a local path")));
    }
    let mut real = PathBuf::from(path.device().root());
    for seg in path.afs_path().segments() {
        real.push(seg);
    }
    Ok(real)
}

pub(crate) fn io_err<'a>(op: &'static str, path: &'a Path) -> impl FnOnce(io::Error) -> DoppelError + 'a {
    move |e| DoppelError::from_io(op, path.display().to_string(), e)
}

fn join_err(e: tokio::task::JoinError) -> DoppelError {
    DoppelError::Other(format!("background task failed: {e}"))
}

#[cfg(unix)]
pub(crate) fn file_id(meta: &std::fs::Metadata) -> Option<FileId> {
    use std::os::unix::fs::MetadataExt;
    Some(FileId::from_device_inode(meta.dev(), meta.ino()))
}

#[cfg(not(unix))]
pub(crate) fn file_id(_meta: &std::fs::Metadata) -> Option<FileId> {
    None
}

fn mod_time(meta: &std::fs::Metadata) -> i64 {
    meta.modified().map(to_unix_time).unwrap_or_default()
}

#[cfg(target_os = "linux")]
fn default_trash_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|dirs| dirs.data_dir().join("Trash"))
}

#[cfg(not(target_os = "linux"))]
fn default_trash_dir() -> Option<PathBuf> {
    None
}

#[cfg(unix)]
fn set_symlink_mod_time(path: &Path, mod_time: i64) -> io::Result<()> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    let times = [
        libc::timespec {
            tv_sec: 0,
            tv_nsec: libc::UTIME_OMIT,
        },
        libc::timespec {
            tv_sec: mod_time as libc::time_t,
            tv_nsec: 0,
        },
    ];
    // SAFETY: c_path is NUL-terminated and times has the two entries utimensat reads.
    let rc = unsafe { libc::utimensat(libc::AT_FDCWD, c_path.as_ptr(), times.as_ptr(), libc::AT_SYMLINK_NOFOLLOW) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(unix)]
fn free_space(path: &Path) -> io::Result<u64> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    // SAFETY: statvfs only writes into the zeroed struct we own.
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(stat.f_bavail as u64 * stat.f_frsize as u64)
}

#[cfg(not(unix))]
fn free_space(_path: &Path) -> io::Result<u64> {
    Ok(0)
}

#[async_trait]
impl StorageBackend for NativeBackend {
    fn device(&self) -> &DeviceRoot {
        &self.device
    }

    fn display_name(&self) -> &str {
        "Local Filesystem"
    }

    fn capabilities(&self) -> &StorageCapabilities {
        &self.capabilities
    }

    fn is_case_sensitive(&self) -> bool {
        !cfg!(any(windows, target_os = "macos"))
    }

    async fn item_type(&self, path: &AfsPath) -> DoppelResult<ItemType> {
        let real = self.real_path(path);
        let meta = fs::symlink_metadata(&real).await.map_err(io_err("stat", &real))?;
        let ft = meta.file_type();
        Ok(if ft.is_symlink() {
            ItemType::Symlink
        } else if ft.is_dir() {
            ItemType::Folder
        } else {
            ItemType::File
        })
    }

    async fn list_folder(&self, path: &AfsPath) -> DoppelResult<FolderListing> {
        let real = self.real_path(path);
        let mut read_dir = fs::read_dir(&real).await.map_err(io_err("list folder", &real))?;
        let mut listing = FolderListing::default();

        while let Some(entry) = read_dir.next_entry().await.map_err(io_err("list folder", &real))? {
            let name = match entry.file_name().into_string() {
                Ok(name) => name,
                Err(raw) => {
                    listing.failed_items.push((
                        raw.to_string_lossy().into_owned(),
                        "file name is not valid UTF-8".to_string(),
                    ));
                    continue;
                }
            };
            let meta = match fs::symlink_metadata(entry.path()).await {
                Ok(meta) => meta,
                // deleted between readdir and stat
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => {
                    listing.failed_items.push((name, e.to_string()));
                    continue;
                }
            };

            let ft = meta.file_type();
            let item = if ft.is_symlink() {
                ItemInfo::Symlink(SymlinkInfo {
                    name,
                    mod_time: mod_time(&meta),
                })
            } else if ft.is_dir() {
                ItemInfo::Folder(FolderInfo { name })
            } else {
                ItemInfo::File(FileInfo {
                    name,
                    size: meta.len(),
                    mod_time: mod_time(&meta),
                    file_id: file_id(&meta),
                })
            };
            listing.items.push(item);
        }
        Ok(listing)
    }

    async fn create_folder(&self, path: &AfsPath) -> DoppelResult<()> {
        let real = self.real_path(path);
        fs::create_dir(&real).await.map_err(io_err("create folder", &real))
    }

    async fn remove_file(&self, path: &AfsPath) -> DoppelResult<()> {
        let real = self.real_path(path);
        fs::remove_file(&real).await.map_err(io_err("delete file", &real))
    }

    async fn remove_symlink(&self, path: &AfsPath) -> DoppelResult<()> {
        let real = self.real_path(path);
        match fs::remove_file(&real).await {
            Ok(()) => Ok(()),
            // directory symlinks on Windows
            Err(_) if cfg!(windows) => fs::remove_dir(&real).await.map_err(io_err("delete symlink", &real)),
            Err(e) => Err(DoppelError::from_io("delete symlink", real.display().to_string(), e)),
        }
    }

    async fn remove_folder(&self, path: &AfsPath) -> DoppelResult<()> {
        let real = self.real_path(path);
        fs::remove_dir(&real).await.map_err(io_err("delete folder", &real))
    }

    async fn set_mod_time(&self, path: &AfsPath, mod_time: i64) -> DoppelResult<()> {
        let real = self.real_path(path);
        let target = real.clone();
        tokio::task::spawn_blocking(move || {
            let file = std::fs::File::open(&target)?;
            file.set_modified(doppel_core::item::from_unix_time(mod_time))
        })
        .await
        .map_err(join_err)?
        .map_err(io_err("set modification time", &real))
    }

    async fn resolve_symlink(&self, path: &AfsPath) -> DoppelResult<AbstractPath> {
        let real = self.real_path(path);
        let resolved = fs::canonicalize(&real).await.map_err(io_err("resolve symlink", &real))?;
        AbstractPath::native(resolved)
    }

    async fn read_symlink_target(&self, path: &AfsPath) -> DoppelResult<Vec<u8>> {
        let real = self.real_path(path);
        let target = fs::read_link(&real).await.map_err(io_err("read symlink", &real))?;
        #[cfg(unix)]
        {
            use std::os::unix::ffi::OsStrExt;
            Ok(target.as_os_str().as_bytes().to_vec())
        }
        #[cfg(not(unix))]
        {
            Ok(target.to_string_lossy().into_owned().into_bytes())
        }
    }

    async fn open_input_stream(&self, path: &AfsPath) -> DoppelResult<Box<dyn InputStream>> {
        Ok(Box::new(NativeInputStream::open(self.real_path(path)).await?))
    }

    async fn open_output_stream(
        &self,
        path: &AfsPath,
        stream_size: Option<u64>,
        mod_time: Option<i64>,
    ) -> DoppelResult<Box<dyn OutputStream>> {
        let stream = NativeOutputStream::create(self.real_path(path), stream_size, mod_time).await?;
        Ok(Box::new(stream))
    }

    async fn copy_file_same_kind(
        &self,
        source: &AfsPath,
        target: &AbstractPath,
        copy_permissions: bool,
        progress: Option<&IoCallback<'_>>,
        cancel: &CancelToken,
    ) -> DoppelResult<CopyResult> {
        let src = self.real_path(source);
        let dst = native_path(target)?;

        let mut input = NativeInputStream::open(src.clone()).await?;
        let attrs = input.stat().await?;
        let mut output = NativeOutputStream::create(dst.clone(), Some(attrs.size), Some(attrs.mod_time)).await?;
        let (file_size, finalized) = copy_stream(&mut input, &mut output, progress, cancel).await?;

        let error_permissions = if copy_permissions {
            copy_mode(&src, &dst).await.err().map(|e| e.to_string())
        } else {
            None
        };

        Ok(CopyResult {
            file_size,
            mod_time: attrs.mod_time,
            source_id: attrs.file_id,
            target_id: finalized.file_id,
            error_mod_time: finalized.error_mod_time,
            error_permissions,
        })
    }

    async fn copy_new_folder_same_kind(
        &self,
        source: &AfsPath,
        target: &AbstractPath,
        copy_permissions: bool,
    ) -> DoppelResult<()> {
        let src = self.real_path(source);
        let dst = native_path(target)?;
        fs::create_dir(&dst).await.map_err(io_err("create folder", &dst))?;

        if copy_permissions {
            if let Err(e) = copy_mode(&src, &dst).await {
                let _ = fs::remove_dir(&dst).await;
                return Err(e);
            }
        }
        Ok(())
    }

    async fn copy_symlink_same_kind(
        &self,
        source: &AfsPath,
        target: &AbstractPath,
        _copy_permissions: bool,
    ) -> DoppelResult<()> {
        let src = self.real_path(source);
        let dst = native_path(target)?;
        let link_target = fs::read_link(&src).await.map_err(io_err("read symlink", &src))?;

        #[cfg(unix)]
        {
            fs::symlink(&link_target, &dst).await.map_err(io_err("create symlink", &dst))?;
            let meta = fs::symlink_metadata(&src).await.map_err(io_err("stat", &src))?;
            if let Err(e) = set_symlink_mod_time(&dst, mod_time(&meta)) {
                tracing::warn!(path = %dst.display(), error = %e, "cannot set symlink modification time");
            }
            Ok(())
        }
        #[cfg(not(unix))]
        {
            let _ = link_target;
            Err(DoppelError::Unsupported(format!("cannot create symlink {}", dst.display())))
        }
    }

    async fn rename_item_same_kind(&self, source: &AfsPath, target: &AbstractPath) -> DoppelResult<()> {
        if self.compare_device_root(target.device()) != Ordering::Equal {
            return Err(DoppelError::DifferentVolume {
                source_path: self.display_path(source),
                target: target.to_string(),
            });
        }
        let src = self.real_path(source);
        let dst = native_path(target)?;

        let (from, to) = (src.clone(), dst.clone());
        let renamed = tokio::task::spawn_blocking(move || rename_no_replace(&from, &to))
            .await
            .map_err(join_err)?;
        match renamed {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                // a case-only rename finds the item itself at the target
                if same_item(&src, &dst).await {
                    fs::rename(&src, &dst).await.map_err(|e| rename_err(&src, &dst, e))
                } else {
                    Err(DoppelError::TargetExists(dst.display().to_string()))
                }
            }
            Err(e) => Err(rename_err(&src, &dst, e)),
        }
    }

    async fn supports_permissions(&self, _path: &AfsPath) -> DoppelResult<bool> {
        Ok(self.capabilities.permissions)
    }

    async fn free_disk_space(&self, path: &AfsPath) -> DoppelResult<u64> {
        let real = self.real_path(path);
        let probe = real.clone();
        tokio::task::spawn_blocking(move || free_space(&probe))
            .await
            .map_err(join_err)?
            .map_err(io_err("query free space", &real))
    }

    async fn supports_recycle_bin(&self, _path: &AfsPath) -> DoppelResult<bool> {
        Ok(self.capabilities.recycle_bin)
    }

    async fn create_recycle_session(&self, base: &AfsPath) -> DoppelResult<Box<dyn RecycleSession>> {
        Ok(Box::new(self.new_recycle_session(base)))
    }

    async fn recycle_item_if_exists(&self, path: &AfsPath) -> DoppelResult<bool> {
        let (parent, name) = match (path.parent(), path.name()) {
            (Some(parent), Some(name)) => (parent, name.to_string()),
            _ => return Err(DoppelError::InvalidPath(format!("cannot recycle root {}", self.display_path(path)))),
        };
        let mut session = self.new_recycle_session(&parent);
        if !session.recycle_item(&self.abstract_path(path), &AfsPath::new(&name)).await? {
            return Ok(false);
        }
        let report = session.finalize(&CancelToken::new()).await?;
        match report.failures.into_iter().next() {
            Some((item, message)) => Err(DoppelError::Other(format!("cannot recycle {item}: {message}"))),
            None => Ok(true),
        }
    }
}

/// Rename that fails with `AlreadyExists` instead of replacing `dst`.
fn rename_no_replace(src: &Path, dst: &Path) -> io::Result<()> {
    #[cfg(target_os = "linux")]
    {
        match renameat2_no_replace(src, dst) {
            // filesystem without RENAME_NOREPLACE
            Err(e) if matches!(e.raw_os_error(), Some(libc::EINVAL) | Some(libc::ENOSYS)) => {}
            other => return other,
        }
    }

    let meta = std::fs::symlink_metadata(src)?;
    if !meta.is_dir() {
        match std::fs::hard_link(src, dst) {
            Ok(()) => {
                return std::fs::remove_file(src).map_err(|e| {
                    let _ = std::fs::remove_file(dst);
                    e
                });
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => return Err(e),
            // no hard links on this filesystem
            Err(_) => {}
        }
    }

    // folders, or no atomic way: the target may appear between check and rename
    match std::fs::symlink_metadata(dst) {
        Ok(_) => Err(io::Error::from(io::ErrorKind::AlreadyExists)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => std::fs::rename(src, dst),
        Err(e) => Err(e),
    }
}

#[cfg(target_os = "linux")]
fn renameat2_no_replace(src: &Path, dst: &Path) -> io::Result<()> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    const RENAME_NOREPLACE: libc::c_uint = 1;
    let c_src = CString::new(src.as_os_str().as_bytes()).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    let c_dst = CString::new(dst.as_os_str().as_bytes()).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    // SAFETY: both paths are NUL-terminated and outlive the call.
    let rc = unsafe {
        libc::syscall(
            libc::SYS_renameat2,
            libc::AT_FDCWD,
            c_src.as_ptr(),
            libc::AT_FDCWD,
            c_dst.as_ptr(),
            RENAME_NOREPLACE,
        )
    };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

async fn same_item(a: &Path, b: &Path) -> bool {
    match (fs::symlink_metadata(a).await, fs::symlink_metadata(b).await) {
        (Ok(a), Ok(b)) => file_id(&a).is_some() && file_id(&a) == file_id(&b),
        _ => false,
    }
}

fn rename_err(src: &Path, dst: &Path, e: io::Error) -> DoppelError {
    #[cfg(unix)]
    if e.raw_os_error() == Some(libc::EXDEV) {
        return DoppelError::DifferentVolume {
            source_path: src.display().to_string(),
            target: dst.display().to_string(),
        };
    }
    let _ = dst;
    DoppelError::from_io("rename", src.display().to_string(), e)
}

async fn copy_mode(src: &Path, dst: &Path) -> DoppelResult<()> {
    let perms = fs::metadata(src).await.map_err(io_err("stat", src))?.permissions();
    fs::set_permissions(dst, perms).await.map_err(io_err("set permissions", dst))
}
