// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for doppel

use std::io;
use thiserror::Error;

/// Result type alias
pub type DoppelResult<T> = Result<T, DoppelError>;

/// Main error type
///
/// Backend operations map OS failures onto these variants so that callers
/// can branch on the kind of failure without looking at error codes.
#[derive(Error, Debug)]
pub enum DoppelError {
    #[error("Path not found: {0}")]
    NotFound(String),

    /// Create, copy or rename target is already occupied.
    #[error("Target already exists: {0}")]
    TargetExists(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Not a folder: {0}")]
    NotAFolder(String),

    #[error("Folder not empty: {0}")]
    DirectoryNotEmpty(String),

    /// Rename would cross a device boundary; callers fall back to copy + delete.
    #[error("Cannot move {source_path} to {target}: different volumes")]
    DifferentVolume { source_path: String, target: String },

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("{op} failed for {path}: {source}")]
    Io {
        op: &'static str,
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("No backend registered for scheme: {0}")]
    BackendNotFound(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// A base folder cannot be reached at all (device missing, root gone).
    #[error("Cannot find folder {0}")]
    RootUnreachable(String),

    #[error("Folder is locked: {0}")]
    Lock(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    /// An internal invariant did not hold. Never retried or skipped.
    #[error("Contract violation: {0}")]
    ContractViolation(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

/// How far a failure reaches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Affects one item; recorded and processing continues with its siblings.
    Transient,
    /// Collision with an existing item; surfaced, never auto-resolved.
    TargetExists,
    /// Rename across volumes; recover with copy + delete.
    CrossRoot,
    /// Stops the current folder pair, not the whole batch.
    Fatal,
    /// Programming defect; never caught and continued.
    ContractViolation,
    Cancelled,
}

impl DoppelError {
    /// Map an I/O error for `path` onto the most specific variant.
    pub fn from_io(op: &'static str, path: impl Into<String>, err: io::Error) -> Self {
        let path = path.into();
        match err.kind() {
            io::ErrorKind::NotFound => DoppelError::NotFound(path),
            io::ErrorKind::AlreadyExists => DoppelError::TargetExists(path),
            io::ErrorKind::PermissionDenied => DoppelError::PermissionDenied(path),
            _ => {
                #[cfg(unix)]
                match err.raw_os_error() {
                    Some(libc::ENOTEMPTY) => return DoppelError::DirectoryNotEmpty(path),
                    Some(libc::ENOTDIR) => return DoppelError::NotAFolder(path),
                    _ => {}
                }
                DoppelError::Io {
                    op,
                    path,
                    source: err,
                }
            }
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            DoppelError::TargetExists(_) => ErrorClass::TargetExists,
            DoppelError::DifferentVolume { .. } => ErrorClass::CrossRoot,
            DoppelError::RootUnreachable(_)
            | DoppelError::BackendNotFound(_)
            | DoppelError::Lock(_)
            | DoppelError::Config(_) => ErrorClass::Fatal,
            DoppelError::ContractViolation(_) => ErrorClass::ContractViolation,
            DoppelError::Cancelled => ErrorClass::Cancelled,
            _ => ErrorClass::Transient,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, DoppelError::Cancelled)
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, DoppelError::NotFound(_))
    }
}

impl From<serde_json::Error> for DoppelError {
    fn from(err: serde_json::Error) -> Self {
        DoppelError::Serialization(err.to_string())
    }
}
