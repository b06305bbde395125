//! Background activity logger.
//!
//! A dedicated thread owns the [`JsonlWriter`]. Scanner, cleanup and engine
//! code hold a cloneable [`ActivityLogger`] and submit events with a
//! non-blocking `try_send`; when the channel is full the event is counted as
//! dropped and a warning line is emitted on the next write.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

use crate::core::errors::{PswError, Result};
use crate::logger::jsonl::{EventType, JsonlConfig, JsonlWriter, LogEntry, Severity};

const CHANNEL_CAPACITY: usize = 1024;

// ──────────────────── events ────────────────────

#[derive(Debug, Clone)]
pub enum ActivityEvent {
    ScanStarted {
        os: String,
        roots: usize,
        patterns: usize,
    },
    TemplateUnresolved {
        category: String,
        template: String,
        variable: String,
    },
    EntrySkipped {
        path: PathBuf,
        details: String,
    },
    ScanCompleted {
        os: String,
        items: usize,
        skipped: usize,
        score: u8,
        total_bytes: u64,
        duration_ms: u64,
        cancelled: bool,
    },
    ArtifactBackedUp {
        session: String,
        path: PathBuf,
        fingerprint: String,
        size: u64,
    },
    ArtifactRemoved {
        session: String,
        path: PathBuf,
        category: String,
        size: u64,
    },
    /// Selected item left in place; `disposition` names why.
    ItemExcluded {
        session: String,
        path: PathBuf,
        disposition: String,
        reason: Option<String>,
    },
    SessionCommitted {
        session: String,
        initial_score: u8,
        final_score: u8,
        removed: usize,
        bytes_saved: u64,
    },
    ReportPersisted {
        session: String,
        backend: String,
    },
    Restored {
        fingerprint: String,
        path: PathBuf,
    },
    Error {
        code: String,
        message: String,
    },
    /// Stops the logger thread after everything queued before it is written.
    Shutdown,
}

impl ActivityEvent {
    pub fn error(err: &PswError) -> Self {
        Self::Error {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

// ──────────────────── handle ────────────────────

/// Cloneable, non-blocking sender for activity events.
#[derive(Clone)]
pub struct ActivityLogger {
    tx: Sender<ActivityEvent>,
    dropped_events: Arc<AtomicU64>,
}

impl ActivityLogger {
    /// A logger that discards every event. Used when no log path is wanted.
    pub fn disabled() -> Self {
        let (tx, _rx) = bounded(1);
        Self {
            tx,
            dropped_events: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn send(&self, event: ActivityEvent) {
        if let Err(TrySendError::Full(_)) = self.tx.try_send(event) {
            self.dropped_events.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Events dropped since the last warning line was written.
    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    /// Ask the logger thread to drain and exit. Blocks only if the queue is full.
    pub fn shutdown(&self) {
        let _ = self.tx.send(ActivityEvent::Shutdown);
    }
}

// ──────────────────── spawn ────────────────────

pub struct ActivityLogConfig {
    pub jsonl: JsonlConfig,
    pub channel_capacity: usize,
}

impl ActivityLogConfig {
    pub fn for_path(path: &Path) -> Self {
        Self {
            jsonl: JsonlConfig::for_path(path),
            channel_capacity: CHANNEL_CAPACITY,
        }
    }
}

/// Start the logger thread (`psw-logger`).
pub fn spawn_activity_logger(
    config: ActivityLogConfig,
) -> Result<(ActivityLogger, thread::JoinHandle<()>)> {
    let (tx, rx) = bounded::<ActivityEvent>(config.channel_capacity.max(1));
    let dropped = Arc::new(AtomicU64::new(0));
    let logger = ActivityLogger {
        tx,
        dropped_events: Arc::clone(&dropped),
    };

    let join = thread::Builder::new()
        .name("psw-logger".to_string())
        .spawn(move || run_logger(&rx, config.jsonl, &dropped))
        .map_err(|e| PswError::Runtime {
            details: format!("failed to spawn logger thread: {e}"),
        })?;

    Ok((logger, join))
}

fn run_logger(rx: &Receiver<ActivityEvent>, jsonl: JsonlConfig, dropped: &AtomicU64) {
    let mut writer = JsonlWriter::open(jsonl);

    while let Ok(event) = rx.recv() {
        let lost = dropped.swap(0, Ordering::Relaxed);
        if lost > 0 {
            writer.write_entry(
                &LogEntry::new(EventType::Error, Severity::Warning)
                    .with_details(format!("{lost} activity events dropped under back-pressure")),
            );
        }
        if matches!(event, ActivityEvent::Shutdown) {
            break;
        }
        if let Some(entry) = to_entry(event) {
            writer.write_entry(&entry);
        }
        writer.try_recover();
    }

    writer.fsync();
}

// ──────────────────── conversion ────────────────────

fn to_entry(event: ActivityEvent) -> Option<LogEntry> {
    let entry = match event {
        ActivityEvent::ScanStarted {
            os,
            roots,
            patterns,
        } => {
            let mut e = LogEntry::new(EventType::ScanStarted, Severity::Info);
            e.os = Some(os);
            e.details = Some(format!("roots={roots} patterns={patterns}"));
            e
        }
        ActivityEvent::TemplateUnresolved {
            category,
            template,
            variable,
        } => {
            let mut e = LogEntry::new(EventType::TemplateUnresolved, Severity::Warning)
                .with_details(format!("template={template} variable={variable}"));
            e.category = Some(category);
            e
        }
        ActivityEvent::EntrySkipped { path, details } => {
            LogEntry::new(EventType::EntrySkipped, Severity::Warning)
                .with_path(&path)
                .with_details(details)
        }
        ActivityEvent::ScanCompleted {
            os,
            items,
            skipped,
            score,
            total_bytes,
            duration_ms,
            cancelled,
        } => {
            let mut e = LogEntry::new(EventType::ScanCompleted, Severity::Info);
            e.os = Some(os);
            e.count = Some(items as u64);
            e.size = Some(total_bytes);
            e.score = Some(score);
            e.duration_ms = Some(duration_ms);
            e.ok = Some(!cancelled);
            e.details = Some(format!("skipped={skipped} cancelled={cancelled}"));
            e
        }
        ActivityEvent::ArtifactBackedUp {
            session,
            path,
            fingerprint,
            size,
        } => {
            let mut e = LogEntry::new(EventType::ArtifactBackedUp, Severity::Info)
                .with_session(&session)
                .with_path(&path);
            e.fingerprint = Some(fingerprint);
            e.size = Some(size);
            e.ok = Some(true);
            e
        }
        ActivityEvent::ArtifactRemoved {
            session,
            path,
            category,
            size,
        } => {
            let mut e = LogEntry::new(EventType::ArtifactRemoved, Severity::Info)
                .with_session(&session)
                .with_path(&path);
            e.category = Some(category);
            e.size = Some(size);
            e.ok = Some(true);
            e
        }
        ActivityEvent::ItemExcluded {
            session,
            path,
            disposition,
            reason,
        } => {
            let mut e = LogEntry::new(EventType::ItemExcluded, Severity::Warning)
                .with_session(&session)
                .with_path(&path);
            e.ok = Some(false);
            e.details = Some(match reason {
                Some(reason) => format!("{disposition}: {reason}"),
                None => disposition,
            });
            e
        }
        ActivityEvent::SessionCommitted {
            session,
            initial_score,
            final_score,
            removed,
            bytes_saved,
        } => {
            let mut e = LogEntry::new(EventType::SessionCommitted, Severity::Info)
                .with_session(&session)
                .with_details(format!("initial_score={initial_score}"));
            e.score = Some(final_score);
            e.count = Some(removed as u64);
            e.size = Some(bytes_saved);
            e.ok = Some(true);
            e
        }
        ActivityEvent::ReportPersisted { session, backend } => {
            LogEntry::new(EventType::ReportPersisted, Severity::Info)
                .with_session(&session)
                .with_details(format!("backend={backend}"))
        }
        ActivityEvent::Restored { fingerprint, path } => {
            let mut e = LogEntry::new(EventType::Restored, Severity::Info).with_path(&path);
            e.fingerprint = Some(fingerprint);
            e.ok = Some(true);
            e
        }
        ActivityEvent::Error { code, message } => {
            let mut e = LogEntry::new(EventType::Error, Severity::Critical);
            e.error_code = Some(code);
            e.error_message = Some(message);
            e.ok = Some(false);
            e
        }
        ActivityEvent::Shutdown => return None,
    };
    Some(entry)
}
