//! Append-only JSONL activity log.
//!
//! Each record is serialized to one line in memory and written with a single
//! `write_all`, so a concurrent `tail -f` never sees a partial line. When the
//! primary file cannot be written the sink degrades: fallback file, then
//! stderr with a `[PSW-JSONL]` prefix, then silent discard. Logging failures
//! never abort a scan or a cleanup session.

#![allow(missing_docs)]

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::core::errors::{PswError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// Activity event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    ScanStarted,
    ScanCompleted,
    EntrySkipped,
    TemplateUnresolved,
    ArtifactBackedUp,
    ArtifactRemoved,
    ItemExcluded,
    SessionCommitted,
    ReportPersisted,
    Restored,
    Error,
}

/// One activity record. Only `ts`, `event` and `severity` are always present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// RFC 3339 UTC timestamp, millisecond precision.
    pub ts: String,
    pub event: EventType,
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ok: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Freeform details (disposition, unresolved variable, config hash, ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl LogEntry {
    pub fn new(event: EventType, severity: Severity) -> Self {
        Self {
            ts: format_utc_now(),
            event,
            severity,
            session: None,
            os: None,
            path: None,
            category: None,
            size: None,
            fingerprint: None,
            score: None,
            count: None,
            duration_ms: None,
            ok: None,
            error_code: None,
            error_message: None,
            details: None,
        }
    }

    /// Entry describing a failure.
    pub fn from_error(err: &PswError) -> Self {
        let mut entry = Self::new(EventType::Error, Severity::Warning);
        entry.ok = Some(false);
        entry.error_code = Some(err.code().to_string());
        entry.error_message = Some(err.to_string());
        entry
    }

    #[must_use]
    pub fn with_session(mut self, session: &str) -> Self {
        self.session = Some(session.to_string());
        self
    }

    #[must_use]
    pub fn with_path(mut self, path: &Path) -> Self {
        self.path = Some(path.to_string_lossy().into_owned());
        self
    }

    #[must_use]
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct JsonlConfig {
    pub path: PathBuf,
    /// Used when `path` cannot be opened or written.
    pub fallback_path: Option<PathBuf>,
    /// Rotate once the current file would exceed this size.
    pub max_size_bytes: u64,
    /// Rotated generations kept (`activity.jsonl.1` … `.N`).
    pub max_rotated_files: u32,
    pub fsync_interval_secs: u64,
}

impl JsonlConfig {
    /// Defaults for a given primary path; fallback lives in the temp dir.
    pub fn for_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            fallback_path: Some(std::env::temp_dir().join("psweep-activity.jsonl")),
            max_size_bytes: 16 * 1024 * 1024,
            max_rotated_files: 3,
            fsync_interval_secs: 10,
        }
    }
}

enum Sink {
    Primary(BufWriter<File>),
    Fallback(BufWriter<File>),
    Stderr,
    Discard,
}

impl Sink {
    const fn label(&self) -> &'static str {
        match self {
            Self::Primary(_) => "normal",
            Self::Fallback(_) => "fallback",
            Self::Stderr => "stderr",
            Self::Discard => "discard",
        }
    }
}

/// Append-only JSONL writer with size rotation and a degradation chain.
pub struct JsonlWriter {
    config: JsonlConfig,
    sink: Sink,
    bytes_written: u64,
    last_fsync: Instant,
}

impl JsonlWriter {
    /// Open the primary file, degrading as needed. Never fails.
    pub fn open(config: JsonlConfig) -> Self {
        let mut writer = Self {
            config,
            sink: Sink::Discard,
            bytes_written: 0,
            last_fsync: Instant::now(),
        };
        writer.open_primary_or_degrade();
        writer
    }

    pub fn write_entry(&mut self, entry: &LogEntry) {
        match serde_json::to_string(entry) {
            Ok(json) => self.write_line(&format!("{json}\n")),
            Err(err) => {
                let _ = writeln!(io::stderr(), "[PSW-JSONL] serialize error: {err}");
            }
        }
    }

    pub fn flush(&mut self) {
        if let Sink::Primary(w) | Sink::Fallback(w) = &mut self.sink {
            let _ = w.flush();
        }
    }

    pub fn fsync(&mut self) {
        if let Sink::Primary(w) | Sink::Fallback(w) = &mut self.sink {
            let _ = w.flush();
            let _ = w.get_ref().sync_data();
        }
        self.last_fsync = Instant::now();
    }

    /// Current sink: `normal`, `fallback`, `stderr` or `discard`.
    pub fn state(&self) -> &'static str {
        self.sink.label()
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Return to the primary file after a degradation, if it opens again.
    pub fn try_recover(&mut self) {
        if matches!(self.sink, Sink::Primary(_)) {
            return;
        }
        if let Ok((file, size)) = open_append(&self.config.path) {
            self.flush();
            self.sink = Sink::Primary(BufWriter::with_capacity(64 * 1024, file));
            self.bytes_written = size;
        }
    }

    // ──────────────────────── internals ────────────────────────

    fn write_line(&mut self, line: &str) {
        let len = line.len() as u64;
        if self.bytes_written + len > self.config.max_size_bytes {
            self.rotate();
        }

        let failed = match &mut self.sink {
            Sink::Primary(w) | Sink::Fallback(w) => w.write_all(line.as_bytes()).is_err(),
            Sink::Stderr => {
                let _ = write!(io::stderr(), "[PSW-JSONL] {line}");
                false
            }
            Sink::Discard => false,
        };

        if failed {
            self.degrade();
            if !matches!(self.sink, Sink::Discard) {
                self.write_line(line);
            }
            return;
        }

        if matches!(self.sink, Sink::Primary(_) | Sink::Fallback(_)) {
            self.bytes_written += len;
            if self.last_fsync.elapsed().as_secs() >= self.config.fsync_interval_secs {
                self.fsync();
            }
        }
    }

    fn open_primary_or_degrade(&mut self) {
        match open_append(&self.config.path) {
            Ok((file, size)) => {
                self.sink = Sink::Primary(BufWriter::with_capacity(64 * 1024, file));
                self.bytes_written = size;
            }
            Err(_) => self.open_fallback_or_degrade(),
        }
    }

    fn open_fallback_or_degrade(&mut self) {
        let opened = self
            .config
            .fallback_path
            .as_deref()
            .map(|fb| (fb, open_append(fb)));
        match opened {
            Some((fb, Ok((file, size)))) => {
                let _ = writeln!(
                    io::stderr(),
                    "[PSW-JSONL] primary log unavailable, using fallback: {}",
                    fb.display()
                );
                self.sink = Sink::Fallback(BufWriter::with_capacity(64 * 1024, file));
                self.bytes_written = size;
            }
            _ => {
                let _ = writeln!(
                    io::stderr(),
                    "[PSW-JSONL] no writable log file, logging to stderr"
                );
                self.sink = Sink::Stderr;
            }
        }
    }

    fn degrade(&mut self) {
        match self.sink {
            Sink::Primary(_) => self.open_fallback_or_degrade(),
            Sink::Fallback(_) => self.sink = Sink::Stderr,
            Sink::Stderr | Sink::Discard => self.sink = Sink::Discard,
        }
    }

    /// `log` → `log.1` → … → `log.N`; the oldest generation is dropped.
    fn rotate(&mut self) {
        let base = match &mut self.sink {
            Sink::Primary(w) => {
                let _ = w.flush();
                self.config.path.clone()
            }
            Sink::Fallback(w) => {
                let _ = w.flush();
                match &self.config.fallback_path {
                    Some(p) => p.clone(),
                    None => return,
                }
            }
            Sink::Stderr | Sink::Discard => return,
        };
        let was_primary = matches!(self.sink, Sink::Primary(_));
        self.sink = Sink::Discard;

        let _ = fs::remove_file(rotated_name(&base, self.config.max_rotated_files));
        for i in (1..self.config.max_rotated_files).rev() {
            let _ = fs::rename(rotated_name(&base, i), rotated_name(&base, i + 1));
        }
        let _ = fs::rename(&base, rotated_name(&base, 1));

        match open_append(&base) {
            Ok((file, _)) => {
                let writer = BufWriter::with_capacity(64 * 1024, file);
                self.sink = if was_primary {
                    Sink::Primary(writer)
                } else {
                    Sink::Fallback(writer)
                };
                self.bytes_written = 0;
            }
            Err(_) if was_primary => self.open_fallback_or_degrade(),
            Err(_) => self.sink = Sink::Stderr,
        }
    }
}

impl Drop for JsonlWriter {
    fn drop(&mut self) {
        self.flush();
    }
}

// ──────────────────────── helpers ────────────────────────

/// Open or create for appending; returns the handle and current size.
fn open_append(path: &Path) -> Result<(File, u64)> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| PswError::io(parent, source))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| PswError::io(path, source))?;
    let size = file.metadata().map(|m| m.len()).unwrap_or(0);
    Ok((file, size))
}

/// `activity.jsonl` → `activity.jsonl.3`.
fn rotated_name(base: &Path, index: u32) -> PathBuf {
    let mut name = base.as_os_str().to_owned();
    name.push(format!(".{index}"));
    PathBuf::from(name)
}

/// Current UTC time as RFC 3339 with milliseconds.
pub fn format_utc_now() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(path: PathBuf) -> JsonlConfig {
        JsonlConfig {
            path,
            fallback_path: None,
            max_size_bytes: 1024 * 1024,
            max_rotated_files: 3,
            fsync_interval_secs: 60,
        }
    }

    #[test]
    fn entries_are_single_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("activity.jsonl");
        let mut writer = JsonlWriter::open(config(path.clone()));

        writer.write_entry(&LogEntry::new(EventType::ScanStarted, Severity::Info));
        writer.write_entry(
            &LogEntry::new(EventType::ArtifactRemoved, Severity::Info)
                .with_session("abc")
                .with_path(Path::new("/tmp/x")),
        );
        writer.flush();

        let contents = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["event"], "scan_started");
        assert_eq!(first["severity"], "info");
        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["session"], "abc");
        assert_eq!(second["path"], "/tmp/x");
    }

    #[test]
    fn unset_fields_are_omitted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sparse.jsonl");
        let mut writer = JsonlWriter::open(config(path.clone()));
        writer.write_entry(&LogEntry::new(EventType::SessionCommitted, Severity::Info));
        writer.flush();

        let line = fs::read_to_string(&path).unwrap();
        assert!(!line.contains("\"path\""));
        assert!(!line.contains("\"fingerprint\""));
    }

    #[test]
    fn rotation_keeps_generations() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rot.jsonl");
        let mut cfg = config(path.clone());
        cfg.max_size_bytes = 100;
        let mut writer = JsonlWriter::open(cfg);
        for _ in 0..10 {
            writer.write_entry(&LogEntry::new(EventType::ScanCompleted, Severity::Info));
        }
        writer.flush();

        assert!(path.exists());
        assert!(rotated_name(&path, 1).exists());
        assert!(!rotated_name(&path, 4).exists());
        assert_eq!(writer.state(), "normal");
    }

    #[test]
    fn falls_back_when_primary_unwritable() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, b"file").unwrap();
        let fallback = dir.path().join("fallback.jsonl");
        let mut cfg = config(blocker.join("primary.jsonl"));
        cfg.fallback_path = Some(fallback.clone());
        let mut writer = JsonlWriter::open(cfg);

        assert_eq!(writer.state(), "fallback");
        writer.write_entry(&LogEntry::new(EventType::Error, Severity::Warning));
        writer.flush();
        assert!(!fs::read_to_string(&fallback).unwrap().is_empty());
    }

    #[test]
    fn error_entry_carries_code() {
        let err = PswError::Runtime {
            details: "boom".to_string(),
        };
        let entry = LogEntry::from_error(&err);
        assert_eq!(entry.error_code.as_deref(), Some("PSW-3900"));
        assert_eq!(entry.ok, Some(false));
    }
}
