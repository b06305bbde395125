//! SQLite report backend (WAL mode).
//!
//! Each report is stored as its JSON encoding plus a few indexed summary
//! columns. Triggers reject UPDATE and DELETE so rows stay immutable.

#![allow(missing_docs)]
#![allow(clippy::cast_possible_wrap)]

use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags, params};

use crate::core::errors::{PswError, Result};
use crate::core::model::ReportData;
use crate::report::{ReportStore, encode};

pub struct SqliteReportStore {
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl SqliteReportStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| PswError::io(parent, e))?;
        }
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        apply_pragmas(&conn)?;
        apply_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_wal_mode(&self) -> bool {
        self.conn
            .lock()
            .query_row("PRAGMA journal_mode", [], |row| row.get::<_, String>(0))
            .map(|mode| mode.eq_ignore_ascii_case("wal"))
            .unwrap_or(false)
    }
}

impl ReportStore for SqliteReportStore {
    fn append(&self, report: &ReportData) -> Result<()> {
        let body = encode(report)?;
        self.conn
            .lock()
            .prepare_cached(
                "INSERT INTO reports (
                session_id, timestamp, initial_score, final_score, bytes_saved, body
            ) VALUES (?1,?2,?3,?4,?5,?6)",
            )?
            .execute(params![
                report.session_id,
                report.timestamp.to_rfc3339(),
                report.initial_score,
                report.final_score,
                report.total_bytes_saved as i64,
                body,
            ])?;
        Ok(())
    }

    fn list(&self) -> Result<Vec<ReportData>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached("SELECT id, body FROM reports ORDER BY id DESC")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut reports = Vec::with_capacity(rows.len());
        for (id, body) in rows {
            match serde_json::from_str::<ReportData>(&body) {
                Ok(report) => reports.push(report),
                Err(err) => eprintln!("[PSW-SQLITE] skipping unreadable report row {id}: {err}"),
            }
        }
        Ok(reports)
    }

    fn backend(&self) -> &'static str {
        "sqlite"
    }
}

// ──────────────────── schema & pragmas ────────────────────

fn apply_pragmas(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = FULL;
         PRAGMA busy_timeout = 5000;",
    )?;
    let mode: String = conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?;
    if !mode.eq_ignore_ascii_case("wal") {
        eprintln!("[PSW-SQLITE] WARNING: requested WAL mode but got '{mode}'");
    }
    Ok(())
}

fn apply_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS reports (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id TEXT NOT NULL UNIQUE,
            timestamp TEXT NOT NULL,
            initial_score INTEGER NOT NULL,
            final_score INTEGER NOT NULL,
            bytes_saved INTEGER NOT NULL,
            body TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_reports_timestamp ON reports(timestamp);

        CREATE TRIGGER IF NOT EXISTS reports_no_update BEFORE UPDATE ON reports
        BEGIN SELECT RAISE(ABORT, 'reports are immutable'); END;

        CREATE TRIGGER IF NOT EXISTS reports_no_delete BEFORE DELETE ON reports
        BEGIN SELECT RAISE(ABORT, 'reports are immutable'); END;",
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::testing::report;

    fn temp_store() -> (tempfile::TempDir, SqliteReportStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteReportStore::open(&dir.path().join("reports.sqlite3")).unwrap();
        (dir, store)
    }

    #[test]
    fn schema_created_and_wal_active() {
        let (_dir, store) = temp_store();
        assert!(store.is_wal_mode());
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn append_and_list_newest_first() {
        let (_dir, store) = temp_store();
        store.append(&report("a", 1)).unwrap();
        store.append(&report("b", 2)).unwrap();
        store.append(&report("c", 3)).unwrap();

        let listed = store.list().unwrap();
        let ids: Vec<&str> = listed.iter().map(|r| r.session_id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b", "a"]);
        assert_eq!(listed[0].total_bytes_saved, 3);
    }

    #[test]
    fn duplicate_session_is_rejected() {
        let (_dir, store) = temp_store();
        store.append(&report("same", 1)).unwrap();
        assert!(matches!(
            store.append(&report("same", 1)),
            Err(PswError::Sql { .. })
        ));
    }

    #[test]
    fn rows_cannot_be_modified() {
        let (_dir, store) = temp_store();
        store.append(&report("fixed", 1)).unwrap();
        let conn = store.conn.lock();
        assert!(conn.execute("DELETE FROM reports", []).is_err());
        assert!(
            conn.execute("UPDATE reports SET final_score = 0", [])
                .is_err()
        );
    }

    #[test]
    fn reopening_keeps_reports() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reports.sqlite3");
        SqliteReportStore::open(&path)
            .unwrap()
            .append(&report("kept", 5))
            .unwrap();
        let reopened = SqliteReportStore::open(&path).unwrap();
        assert_eq!(reopened.list().unwrap().len(), 1);
    }
}
