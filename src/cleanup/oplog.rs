//! Signed, append-only operation log for cleanup sessions.
//!
//! One JSON line per state transition. Every line carries `sig`, an
//! HMAC-SHA256 over the previous line's signature and the line's own body
//! (serialized without `sig`), so removing, reordering or editing any line
//! breaks verification from that point on.

#![allow(missing_docs)]

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::cleanup::backup::BackupStore;
use crate::core::errors::{PswError, Result};
use crate::core::model::PrivacyItem;
use crate::logger::jsonl::format_utc_now;
use crate::scanner::fingerprint::hex_encode;

type HmacSha256 = Hmac<Sha256>;

const SIGNING_LABEL: &[u8] = b"psweep oplog signing v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Started,
    Pending,
    BackingUp,
    Verifying,
    Deleting,
    Removed,
    Excluded,
    Committed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OplogEntry {
    pub seq: u64,
    pub ts: String,
    pub session: String,
    pub stage: Stage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sig: Option<String>,
}

/// Key used to sign and verify logs of `store`.
pub fn signing_key(store: &BackupStore) -> Result<[u8; 32]> {
    store.derive_key(SIGNING_LABEL)
}

/// Log path for a session inside `store`.
pub fn log_path(store: &BackupStore, session: &str) -> PathBuf {
    store.oplog_dir().join(format!("{session}.jsonl"))
}

fn sign(key: &[u8], prev_sig: &str, body: &str) -> Result<String> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key).map_err(|_| PswError::Crypto {
        context: "oplog signing",
    })?;
    mac.update(prev_sig.as_bytes());
    mac.update(b"\n");
    mac.update(body.as_bytes());
    Ok(hex_encode(&mac.finalize().into_bytes()))
}

// ──────────────────── writer ────────────────────

pub struct OperationLog {
    path: PathBuf,
    writer: BufWriter<File>,
    key: [u8; 32],
    session: String,
    prev_sig: String,
    seq: u64,
}

impl OperationLog {
    /// Create the log for a new session. An existing log is never reopened.
    pub fn create(store: &BackupStore, session: &str) -> Result<Self> {
        let path = log_path(store, session);
        let file = {
            let mut opts = OpenOptions::new();
            opts.write(true).create_new(true);
            #[cfg(unix)]
            {
                use std::os::unix::fs::OpenOptionsExt as _;
                opts.mode(0o600);
            }
            opts.open(&path).map_err(|e| PswError::io(&path, e))?
        };
        Ok(Self {
            path,
            writer: BufWriter::new(file),
            key: signing_key(store)?,
            session: session.to_string(),
            prev_sig: String::new(),
            seq: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one signed transition. Each line is flushed before returning.
    pub fn record(
        &mut self,
        stage: Stage,
        item: Option<&PrivacyItem>,
        detail: Option<String>,
    ) -> Result<()> {
        let mut entry = OplogEntry {
            seq: self.seq,
            ts: format_utc_now(),
            session: self.session.clone(),
            stage,
            item: item.map(|i| i.id().to_string()),
            path: item.map(|i| i.path().to_path_buf()),
            fingerprint: item.map(|i| i.fingerprint().to_string()),
            detail,
            sig: None,
        };
        let body = serde_json::to_string(&entry)?;
        let sig = sign(&self.key, &self.prev_sig, &body)?;
        entry.sig = Some(sig.clone());
        let line = serde_json::to_string(&entry)?;

        self.writer
            .write_all(line.as_bytes())
            .and_then(|()| self.writer.write_all(b"\n"))
            .and_then(|()| self.writer.flush())
            .map_err(|e| PswError::io(&self.path, e))?;

        self.prev_sig = sig;
        self.seq += 1;
        Ok(())
    }

    /// Flush and fsync; returns the log path.
    pub fn finish(mut self) -> Result<PathBuf> {
        self.writer
            .flush()
            .map_err(|e| PswError::io(&self.path, e))?;
        self.writer
            .get_ref()
            .sync_all()
            .map_err(|e| PswError::io(&self.path, e))?;
        Ok(self.path)
    }
}

// ──────────────────── verification ────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogVerification {
    pub path: PathBuf,
    /// Lines whose signature chain checked out.
    pub valid_entries: u64,
    /// 1-based line number of the first bad line.
    pub first_invalid_line: Option<u64>,
    pub reason: Option<String>,
}

impl LogVerification {
    pub const fn is_intact(&self) -> bool {
        self.first_invalid_line.is_none()
    }
}

/// Re-check every signature in the log at `path`.
pub fn verify(path: &Path, key: &[u8; 32]) -> Result<LogVerification> {
    let file = File::open(path).map_err(|e| PswError::io(path, e))?;
    let mut prev_sig = String::new();
    let mut session: Option<String> = None;
    let mut report = LogVerification {
        path: path.to_path_buf(),
        valid_entries: 0,
        first_invalid_line: None,
        reason: None,
    };

    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line_no = idx as u64 + 1;
        let line = line.map_err(|e| PswError::io(path, e))?;
        if let Err(reason) = check_line(&line, key, &mut prev_sig, &mut session, idx as u64) {
            report.first_invalid_line = Some(line_no);
            report.reason = Some(reason);
            return Ok(report);
        }
        report.valid_entries += 1;
    }
    Ok(report)
}

fn check_line(
    line: &str,
    key: &[u8; 32],
    prev_sig: &mut String,
    session: &mut Option<String>,
    expected_seq: u64,
) -> std::result::Result<(), String> {
    let mut entry: OplogEntry =
        serde_json::from_str(line).map_err(|e| format!("unparsable line: {e}"))?;
    let claimed = entry.sig.take().ok_or_else(|| "missing signature".to_string())?;
    if entry.seq != expected_seq {
        return Err(format!("sequence {} where {expected_seq} expected", entry.seq));
    }
    match session {
        Some(s) if *s != entry.session => {
            return Err(format!("session changed to {}", entry.session));
        }
        Some(_) => {}
        None => *session = Some(entry.session.clone()),
    }
    let body = serde_json::to_string(&entry).map_err(|e| e.to_string())?;
    let expected = sign(key, prev_sig, &body).map_err(|e| e.to_string())?;
    if expected != claimed {
        return Err("signature mismatch".to_string());
    }
    *prev_sig = claimed;
    Ok(())
}
