// SPDX-License-Identifier: AGPL-3.0-or-later
//! Category rules for items present on both sides

use crate::hierarchy::{CompareFilesResult, FileDescr, SymlinkDescr};
use serde::{Deserialize, Serialize};

/// How two files with the same relative path are judged equal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CompareVariant {
    /// Equal size and modification time within `tolerance_secs`. Differences
    /// of exactly a whole number of the listed minutes (plus tolerance) are
    /// treated as equal, for volumes that store local time.
    TimeAndSize {
        tolerance_secs: u32,
        #[serde(default)]
        ignore_time_shift_minutes: Vec<u32>,
    },
    /// Byte-for-byte comparison.
    Content,
    Size,
}

impl CompareVariant {
    /// Category decided from metadata alone. `None` means the content has to
    /// be read before deciding.
    pub fn categorize_files(&self, left: &FileDescr, right: &FileDescr) -> Option<CompareFilesResult> {
        match self {
            CompareVariant::TimeAndSize {
                tolerance_secs,
                ignore_time_shift_minutes,
            } => Some(by_time_and_size(left, right, *tolerance_secs, ignore_time_shift_minutes)),
            CompareVariant::Size => Some(if left.size == right.size {
                CompareFilesResult::Equal
            } else {
                CompareFilesResult::Different
            }),
            CompareVariant::Content if left.size != right.size => Some(CompareFilesResult::Different),
            CompareVariant::Content => None,
        }
    }

    /// Category of two symlinks; `None` means compare the link targets.
    pub fn categorize_symlinks(&self, left: &SymlinkDescr, right: &SymlinkDescr) -> Option<CompareFilesResult> {
        match self {
            CompareVariant::TimeAndSize {
                tolerance_secs,
                ignore_time_shift_minutes,
            } => Some(
                if same_time(left.mod_time, right.mod_time, *tolerance_secs, ignore_time_shift_minutes) {
                    CompareFilesResult::Equal
                } else if left.mod_time > right.mod_time {
                    CompareFilesResult::LeftNewer
                } else {
                    CompareFilesResult::RightNewer
                },
            ),
            CompareVariant::Content | CompareVariant::Size => None,
        }
    }
}

fn by_time_and_size(left: &FileDescr, right: &FileDescr, tolerance: u32, shifts: &[u32]) -> CompareFilesResult {
    if same_time(left.mod_time, right.mod_time, tolerance, shifts) {
        if left.size == right.size {
            CompareFilesResult::Equal
        } else {
            CompareFilesResult::Different
        }
    } else if left.mod_time > right.mod_time {
        CompareFilesResult::LeftNewer
    } else {
        CompareFilesResult::RightNewer
    }
}

/// Whether two modification times match within `tolerance` seconds, either
/// directly or after removing one of the `shifts` (in minutes).
pub fn same_time(a: i64, b: i64, tolerance: u32, shifts: &[u32]) -> bool {
    let diff = (a as i128 - b as i128).abs();
    let tolerance = tolerance as i128;
    diff <= tolerance
        || shifts
            .iter()
            .any(|&minutes| (diff - minutes as i128 * 60).abs() <= tolerance)
}
