//! Persistent, append-only store of cleanup session reports.
//!
//! Reports are written once and never updated or deleted. `list` returns
//! them newest first.

#![allow(missing_docs)]

pub mod jsonl;
#[cfg(feature = "sqlite")]
pub mod sqlite;

use crate::core::config::{Config, ReportBackend};
use crate::core::errors::{PswError, Result};
use crate::core::model::ReportData;

pub trait ReportStore: Send + Sync {
    fn append(&self, report: &ReportData) -> Result<()>;
    /// All readable reports, newest first.
    fn list(&self) -> Result<Vec<ReportData>>;
    fn backend(&self) -> &'static str;
}

/// Open the backend selected by `[report] backend`.
pub fn open_store(config: &Config) -> Result<Box<dyn ReportStore>> {
    match config.report.backend {
        ReportBackend::Jsonl => Ok(Box::new(jsonl::JsonlReportStore::new(
            config.paths.report_log(),
        ))),
        #[cfg(feature = "sqlite")]
        ReportBackend::Sqlite => Ok(Box::new(sqlite::SqliteReportStore::open(
            &config.paths.report_db(),
        )?)),
        #[cfg(not(feature = "sqlite"))]
        ReportBackend::Sqlite => Err(PswError::InvalidConfig {
            details: "report.backend = \"sqlite\" requires the sqlite feature".to_string(),
        }),
    }
}

/// Reject a serialized report that would break the line-per-record format.
pub(crate) fn encode(report: &ReportData) -> Result<String> {
    let line = serde_json::to_string(report)?;
    if line.contains('\n') {
        return Err(PswError::Serialization {
            context: "report",
            details: "encoded report spans multiple lines".to_string(),
        });
    }
    Ok(line)
}

#[cfg(test)]
pub(crate) mod testing {
    use chrono::{TimeZone, Utc};

    use crate::core::model::fixtures::item;
    use crate::core::model::{Category, Disposition, ItemOutcome, ReportData, RiskTier, TierCounts};

    pub fn report(session: &str, bytes: u64) -> ReportData {
        let it = item("/tmp/x", Category::Temp, bytes, RiskTier::Low);
        ReportData {
            session_id: session.to_string(),
            initial_score: 99,
            final_score: 100,
            cleaned_items: vec![ItemOutcome {
                item: it,
                disposition: Disposition::Removed,
                bytes_reclaimed: bytes,
            }],
            inventory_before: TierCounts {
                high: 0,
                medium: 0,
                low: 1,
            },
            total_bytes_saved: bytes,
            timestamp: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
        }
    }
}
