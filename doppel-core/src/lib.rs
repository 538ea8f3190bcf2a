// SPDX-License-Identifier: AGPL-3.0-or-later
//! doppel core
//!
//! Abstract filesystem interface, path model, error type and the progress
//! and cancellation plumbing shared by comparison and synchronization.

pub mod backend;
pub mod cancel;
pub mod error;
pub mod item;
pub mod path;
pub mod progress;
pub mod status;
pub mod transfer;
pub mod traverse;

pub use backend::{
    FinalizeResult, InputStream, OutputStream, RecycleReport, RecycleSession, StorageBackend,
    StorageCapabilities,
};
pub use cancel::CancelToken;
pub use error::{DoppelError, DoppelResult, ErrorClass};
pub use item::{
    CopyResult, FileId, FileInfo, FolderInfo, FolderListing, ItemInfo, ItemType, PathStatus,
    StreamAttributes, SymlinkInfo,
};
pub use path::{AbstractPath, AfsPath, DeviceRoot, NATIVE_SCHEME};
pub use progress::{IoCallback, Phase, ProgressMessage, ProgressReporter, ProgressSnapshot};
pub use status::{ErrorLog, LogEntry, Severity, SummaryInfo, SyncResult};
pub use traverse::TraverseSink;
