//! Default report backend: one JSON-encoded report per line.

#![allow(missing_docs)]

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::core::errors::{PswError, Result};
use crate::core::model::ReportData;
use crate::report::{ReportStore, encode};

pub struct JsonlReportStore {
    path: PathBuf,
    append_lock: Mutex<()>,
}

impl JsonlReportStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            append_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ReportStore for JsonlReportStore {
    fn append(&self, report: &ReportData) -> Result<()> {
        let line = encode(report)?;
        let _guard = self.append_lock.lock();
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| PswError::io(parent, e))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| PswError::io(&self.path, e))?;
        file.write_all(format!("{line}\n").as_bytes())
            .and_then(|()| file.sync_data())
            .map_err(|e| PswError::io(&self.path, e))
    }

    fn list(&self) -> Result<Vec<ReportData>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(PswError::io(&self.path, err)),
        };
        let mut reports = Vec::new();
        for (idx, line) in raw.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<ReportData>(line) {
                Ok(report) => reports.push(report),
                Err(err) => eprintln!(
                    "[PSW-REPORT] skipping unreadable report at {}:{}: {err}",
                    self.path.display(),
                    idx + 1
                ),
            }
        }
        reports.reverse();
        Ok(reports)
    }

    fn backend(&self) -> &'static str {
        "jsonl"
    }
}
