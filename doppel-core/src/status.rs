// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error log and final job status

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    /// A single item failed; the rest of the folder pair continues.
    Error,
    /// A whole folder pair could not be processed.
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Fatal => "fatal",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub time: DateTime<Utc>,
    pub severity: Severity,
    pub message: String,
}

impl LogEntry {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            time: Utc::now(),
            severity,
            message: message.into(),
        }
    }
}

/// Messages collected over one comparison or sync run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorLog {
    entries: Vec<LogEntry>,
}

impl ErrorLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: LogEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.entries.iter().filter(|e| e.severity == severity).count()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn append(&mut self, other: ErrorLog) {
        self.entries.extend(other.entries);
    }
}

/// Final status of a sync run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncResult {
    FinishedWithSuccess,
    /// Individual items failed.
    FinishedWithWarnings,
    /// At least one folder pair failed as a whole.
    FinishedWithError,
    Aborted,
}

impl SyncResult {
    pub fn from_log(log: &ErrorLog, aborted: bool) -> Self {
        if aborted {
            SyncResult::Aborted
        } else if log.count(Severity::Fatal) > 0 {
            SyncResult::FinishedWithError
        } else if log.count(Severity::Error) + log.count(Severity::Warning) > 0 {
            SyncResult::FinishedWithWarnings
        } else {
            SyncResult::FinishedWithSuccess
        }
    }

    pub fn is_success(&self) -> bool {
        *self == SyncResult::FinishedWithSuccess
    }
}

impl fmt::Display for SyncResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SyncResult::FinishedWithSuccess => "Completed successfully",
            SyncResult::FinishedWithWarnings => "Completed with warnings",
            SyncResult::FinishedWithError => "Completed with errors",
            SyncResult::Aborted => "Stopped",
        })
    }
}

/// Totals reported at the end of a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryInfo {
    pub job_name: Option<String>,
    pub final_status: SyncResult,
    pub items_processed: u64,
    pub bytes_processed: u64,
    pub items_total: u64,
    pub bytes_total: u64,
    pub total_time: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log_with(severities: &[Severity]) -> ErrorLog {
        let mut log = ErrorLog::new();
        for s in severities {
            log.push(LogEntry::new(*s, "msg"));
        }
        log
    }

    #[test]
    fn test_final_status() {
        assert_eq!(SyncResult::from_log(&log_with(&[]), false), SyncResult::FinishedWithSuccess);
        assert_eq!(
            SyncResult::from_log(&log_with(&[Severity::Info]), false),
            SyncResult::FinishedWithSuccess
        );
        assert_eq!(
            SyncResult::from_log(&log_with(&[Severity::Error]), false),
            SyncResult::FinishedWithWarnings
        );
        assert_eq!(
            SyncResult::from_log(&log_with(&[Severity::Warning, Severity::Fatal]), false),
            SyncResult::FinishedWithError
        );
        assert_eq!(
            SyncResult::from_log(&log_with(&[Severity::Fatal]), true),
            SyncResult::Aborted
        );
    }

    #[test]
    fn test_log_serializes() {
        let log = log_with(&[Severity::Warning]);
        let json = serde_json::to_string(&log).unwrap();
        assert!(json.contains("\"warning\""));
        let back: ErrorLog = serde_json::from_str(&json).unwrap();
        assert_eq!(back.count(Severity::Warning), 1);
    }
}
