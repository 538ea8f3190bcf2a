// SPDX-License-Identifier: AGPL-3.0-or-later
//! Progress and error reporting
//!
//! Workers report through a cloneable [`ProgressReporter`]. Counters are
//! atomics and the log sits behind a mutex, so any task may report at any
//! time. An optional unbounded channel forwards every update to a UI.

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

use crate::error::DoppelResult;
use crate::status::{ErrorLog, LogEntry, Severity};

/// Callback invoked with the number of bytes moved since the last call.
/// Returning an error aborts the transfer.
pub type IoCallback<'a> = dyn Fn(u64) -> DoppelResult<()> + Send + Sync + 'a;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    None,
    Scanning,
    ComparingContent,
    Synchronizing,
}

impl Phase {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Phase::Scanning,
            2 => Phase::ComparingContent,
            3 => Phase::Synchronizing,
            _ => Phase::None,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Phase::None => 0,
            Phase::Scanning => 1,
            Phase::ComparingContent => 2,
            Phase::Synchronizing => 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressSnapshot {
    pub phase: Phase,
    pub items_processed: u64,
    pub bytes_processed: u64,
    pub items_total: u64,
    pub bytes_total: u64,
}

#[derive(Debug, Clone)]
pub enum ProgressMessage {
    Phase(ProgressSnapshot),
    /// The item currently being worked on.
    Status(String),
    Log(LogEntry),
}

#[derive(Debug, Default)]
struct Counters {
    phase: AtomicU8,
    items_processed: AtomicU64,
    bytes_processed: AtomicU64,
    items_total: AtomicU64,
    bytes_total: AtomicU64,
}

#[derive(Debug, Clone, Default)]
pub struct ProgressReporter {
    counters: Arc<Counters>,
    log: Arc<Mutex<ErrorLog>>,
    sender: Option<UnboundedSender<ProgressMessage>>,
}

impl ProgressReporter {
    pub fn new(sender: UnboundedSender<ProgressMessage>) -> Self {
        Self {
            sender: Some(sender),
            ..Self::default()
        }
    }

    /// Reporter that only collects, without forwarding anywhere.
    pub fn silent() -> Self {
        Self::default()
    }

    pub fn init_phase(&self, phase: Phase, items_total: u64, bytes_total: u64) {
        let c = &self.counters;
        c.phase.store(phase.as_u8(), Ordering::SeqCst);
        c.items_processed.store(0, Ordering::SeqCst);
        c.bytes_processed.store(0, Ordering::SeqCst);
        c.items_total.store(items_total, Ordering::SeqCst);
        c.bytes_total.store(bytes_total, Ordering::SeqCst);
        tracing::debug!(?phase, items_total, bytes_total, "phase started");
        self.send(ProgressMessage::Phase(self.snapshot()));
    }

    pub fn update_total(&self, items_delta: i64, bytes_delta: i64) {
        add_signed(&self.counters.items_total, items_delta);
        add_signed(&self.counters.bytes_total, bytes_delta);
    }

    pub fn add_progress(&self, items: u64, bytes: u64) {
        self.counters.items_processed.fetch_add(items, Ordering::Relaxed);
        self.counters.bytes_processed.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn report_status(&self, text: impl Into<String>) {
        self.send(ProgressMessage::Status(text.into()));
    }

    pub fn report_info(&self, message: impl Into<String>) {
        self.log(Severity::Info, message.into());
    }

    pub fn report_warning(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!("{message}");
        self.log(Severity::Warning, message);
    }

    pub fn report_error(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::error!("{message}");
        self.log(Severity::Error, message);
    }

    pub fn report_fatal(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::error!(fatal = true, "{message}");
        self.log(Severity::Fatal, message);
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let c = &self.counters;
        ProgressSnapshot {
            phase: Phase::from_u8(c.phase.load(Ordering::SeqCst)),
            items_processed: c.items_processed.load(Ordering::Relaxed),
            bytes_processed: c.bytes_processed.load(Ordering::Relaxed),
            items_total: c.items_total.load(Ordering::Relaxed),
            bytes_total: c.bytes_total.load(Ordering::Relaxed),
        }
    }

    pub fn error_log(&self) -> ErrorLog {
        self.log.lock().clone()
    }

    pub fn take_log(&self) -> ErrorLog {
        std::mem::take(&mut *self.log.lock())
    }

    fn log(&self, severity: Severity, message: String) {
        let entry = LogEntry::new(severity, message);
        self.log.lock().push(entry.clone());
        self.send(ProgressMessage::Log(entry));
    }

    fn send(&self, message: ProgressMessage) {
        if let Some(sender) = &self.sender {
            // receiver gone means nobody is watching; keep working
            let _ = sender.send(message);
        }
    }
}

fn add_signed(counter: &AtomicU64, delta: i64) {
    if delta >= 0 {
        counter.fetch_add(delta as u64, Ordering::Relaxed);
    } else {
        let _ = counter.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
            Some(v.saturating_sub(delta.unsigned_abs()))
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let reporter = ProgressReporter::silent();
        reporter.init_phase(Phase::Synchronizing, 10, 1000);
        let worker = reporter.clone();
        worker.add_progress(2, 300);
        reporter.update_total(-1, -50);

        let snap = reporter.snapshot();
        assert_eq!(snap.phase, Phase::Synchronizing);
        assert_eq!(snap.items_processed, 2);
        assert_eq!(snap.bytes_processed, 300);
        assert_eq!(snap.items_total, 9);
        assert_eq!(snap.bytes_total, 950);
    }

    #[test]
    fn test_update_total_saturates() {
        let reporter = ProgressReporter::silent();
        reporter.init_phase(Phase::Scanning, 1, 0);
        reporter.update_total(-5, 0);
        assert_eq!(reporter.snapshot().items_total, 0);
    }

    #[tokio::test]
    async fn test_messages_forwarded() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let reporter = ProgressReporter::new(tx);
        reporter.init_phase(Phase::Scanning, 0, 0);
        reporter.report_warning("odd file");

        assert!(matches!(rx.recv().await, Some(ProgressMessage::Phase(_))));
        match rx.recv().await {
            Some(ProgressMessage::Log(entry)) => {
                assert_eq!(entry.severity, Severity::Warning);
                assert_eq!(entry.message, "odd file");
            }
            other => panic!("unexpected message: {other:?}"),
        }
        assert_eq!(reporter.error_log().count(Severity::Warning), 1);
    }

    #[test]
    fn test_closed_channel_is_ignored() {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        drop(rx);
        let reporter = ProgressReporter::new(tx);
        reporter.report_error("still logged");
        assert_eq!(reporter.take_log().count(Severity::Error), 1);
        assert!(reporter.error_log().is_empty());
    }
}
