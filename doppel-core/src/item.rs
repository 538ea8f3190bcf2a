// SPDX-License-Identifier: AGPL-3.0-or-later
//! Item descriptors reported by backends

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::path::AbstractPath;

/// Item kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemType {
    File,
    Folder,
    Symlink,
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ItemType::File => "file",
            ItemType::Folder => "folder",
            ItemType::Symlink => "symlink",
        })
    }
}

/// Stable identity of a file on its volume (device number and inode on
/// POSIX). Only comparable between items of the same device root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileId(u128);

impl FileId {
    pub fn from_device_inode(device: u64, inode: u64) -> Self {
        Self(((device as u128) << 64) | inode as u128)
    }

    pub fn from_raw(raw: u128) -> Self {
        Self(raw)
    }

    pub fn as_raw(&self) -> u128 {
        self.0
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

/// Attributes read from an open input stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamAttributes {
    /// Seconds since the Unix epoch.
    pub mod_time: i64,
    pub size: u64,
    pub file_id: Option<FileId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub name: String,
    pub size: u64,
    pub mod_time: i64,
    pub file_id: Option<FileId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymlinkInfo {
    pub name: String,
    pub mod_time: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderInfo {
    pub name: String,
}

/// One child of a listed folder. Symlinks are reported as symlinks, never
/// as their target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemInfo {
    File(FileInfo),
    Symlink(SymlinkInfo),
    Folder(FolderInfo),
}

impl ItemInfo {
    pub fn name(&self) -> &str {
        match self {
            ItemInfo::File(f) => &f.name,
            ItemInfo::Symlink(s) => &s.name,
            ItemInfo::Folder(d) => &d.name,
        }
    }

    pub fn item_type(&self) -> ItemType {
        match self {
            ItemInfo::File(_) => ItemType::File,
            ItemInfo::Symlink(_) => ItemType::Symlink,
            ItemInfo::Folder(_) => ItemType::Folder,
        }
    }
}

/// Result of listing one folder. Children that could be named but not
/// inspected end up in `failed_items` instead of failing the whole listing.
#[derive(Debug, Clone, Default)]
pub struct FolderListing {
    pub items: Vec<ItemInfo>,
    pub failed_items: Vec<(String, String)>,
}

/// Deepest existing ancestor of a path plus the names below it that do not exist
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathStatus {
    pub existing_type: ItemType,
    pub existing_path: AbstractPath,
    pub missing: Vec<String>,
}

/// Outcome of a file copy
///
/// Failing to carry over the modification time or permissions does not
/// fail the copy; the message is kept so the caller can log a warning.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CopyResult {
    pub file_size: u64,
    pub mod_time: i64,
    pub source_id: Option<FileId>,
    pub target_id: Option<FileId>,
    pub error_mod_time: Option<String>,
    pub error_permissions: Option<String>,
}

impl CopyResult {
    pub fn mod_time_write_failed(&self) -> bool {
        self.error_mod_time.is_some()
    }
}

/// Seconds since the Unix epoch, negative for earlier times.
pub fn to_unix_time(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs() as i64,
        Err(e) => {
            let before = e.duration();
            let secs = before.as_secs() as i64;
            if before.subsec_nanos() > 0 {
                -secs - 1
            } else {
                -secs
            }
        }
    }
}

pub fn from_unix_time(secs: i64) -> SystemTime {
    if secs >= 0 {
        UNIX_EPOCH + Duration::from_secs(secs as u64)
    } else {
        UNIX_EPOCH - Duration::from_secs(secs.unsigned_abs())
    }
}
