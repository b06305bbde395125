//! Domain records shared by the scanner, risk model, cleanup executor and report store.

#![allow(missing_docs)]

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::errors::PswError;
use crate::platform::os::Os;

/// Artifact category. Fixed at classification time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Browser,
    Recent,
    Thumbnails,
    Temp,
    ImageMetadata,
    AppCache,
}

impl Category {
    /// Canonical order, narrow locations before broad ones. When several
    /// patterns match one file, the earliest category in this list wins.
    pub const ALL: [Self; 6] = [
        Self::Browser,
        Self::Recent,
        Self::Thumbnails,
        Self::Temp,
        Self::ImageMetadata,
        Self::AppCache,
    ];

    /// Human label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Browser => "Browser Artifacts",
            Self::Thumbnails => "System Thumbnails",
            Self::Temp => "Temporary Files",
            Self::Recent => "Recent Documents",
            Self::AppCache => "Application Cache",
            Self::ImageMetadata => "Image Metadata",
        }
    }

    /// Config/serialization key.
    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Self::Browser => "browser",
            Self::Thumbnails => "thumbnails",
            Self::Temp => "temp",
            Self::Recent => "recent",
            Self::AppCache => "app_cache",
            Self::ImageMetadata => "image_metadata",
        }
    }

    /// Position in [`Category::ALL`].
    #[must_use]
    pub fn precedence(self) -> usize {
        Self::ALL.iter().position(|c| *c == self).unwrap_or(usize::MAX)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Category {
    type Err = PswError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_ascii_lowercase().replace([' ', '-'], "_");
        Self::ALL
            .into_iter()
            .find(|c| {
                c.key() == normalized || c.label().to_ascii_lowercase().replace(' ', "_") == normalized
            })
            .ok_or_else(|| PswError::InvalidConfig {
                details: format!("unknown artifact category {raw:?}"),
            })
    }
}

/// Risk tier derived from the category by the risk policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskTier {
    High,
    Medium,
    Low,
}

impl RiskTier {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::High => "High",
            Self::Medium => "Medium",
            Self::Low => "Low",
        }
    }
}

impl fmt::Display for RiskTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for RiskTier {
    type Err = PswError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            _ => Err(PswError::InvalidConfig {
                details: format!("unknown risk tier {raw:?}"),
            }),
        }
    }
}

/// One discovered artifact.
///
/// Identity fields are immutable after discovery. `selected` belongs to the
/// caller; `cleaned` is written only by the cleanup executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivacyItem {
    id: String,
    path: PathBuf,
    category: Category,
    size: u64,
    risk: RiskTier,
    last_modified: DateTime<Utc>,
    fingerprint: String,
    selected: bool,
    cleaned: bool,
}

impl PrivacyItem {
    pub(crate) fn new(
        id: String,
        path: PathBuf,
        category: Category,
        size: u64,
        risk: RiskTier,
        last_modified: DateTime<Utc>,
        fingerprint: String,
    ) -> Self {
        Self {
            id,
            path,
            category,
            size,
            risk,
            last_modified,
            fingerprint,
            selected: true,
            cleaned: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn risk(&self) -> RiskTier {
        self.risk
    }

    pub fn last_modified(&self) -> DateTime<Utc> {
        self.last_modified
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn selected(&self) -> bool {
        self.selected
    }

    pub fn cleaned(&self) -> bool {
        self.cleaned
    }

    /// Toggle selection between scan and cleanup.
    pub fn set_selected(&mut self, selected: bool) {
        self.selected = selected;
    }

    pub(crate) fn mark_cleaned(&mut self) {
        self.cleaned = true;
    }
}

/// Immutable snapshot of one completed (or cancelled) scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResult {
    items: Vec<PrivacyItem>,
    score: u8,
    scanned_at: DateTime<Utc>,
    total_size: u64,
    os: Os,
    cancelled: bool,
    skipped: usize,
    #[serde(with = "duration_millis")]
    duration: Duration,
}

impl ScanResult {
    pub(crate) fn new(
        items: Vec<PrivacyItem>,
        score: u8,
        os: Os,
        cancelled: bool,
        skipped: usize,
        duration: Duration,
    ) -> Self {
        let total_size = items.iter().map(PrivacyItem::size).sum();
        Self {
            items,
            score,
            scanned_at: Utc::now(),
            total_size,
            os,
            cancelled,
            skipped,
            duration,
        }
    }

    pub fn items(&self) -> &[PrivacyItem] {
        &self.items
    }

    /// Take ownership of the inventory (for selection and cleanup).
    pub fn into_items(self) -> Vec<PrivacyItem> {
        self.items
    }

    pub fn score(&self) -> u8 {
        self.score
    }

    pub fn scanned_at(&self) -> DateTime<Utc> {
        self.scanned_at
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn os(&self) -> Os {
        self.os
    }

    /// True when the scan stopped early on a cancellation request.
    pub fn cancelled(&self) -> bool {
        self.cancelled
    }

    /// Number of unreadable entries skipped.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }
}

/// Item counts per risk tier. Enough to re-derive a score.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierCounts {
    pub high: u64,
    pub medium: u64,
    pub low: u64,
}

impl TierCounts {
    pub fn from_tiers<I: IntoIterator<Item = RiskTier>>(tiers: I) -> Self {
        let mut counts = Self::default();
        for tier in tiers {
            counts.add(tier);
        }
        counts
    }

    pub fn from_items(items: &[PrivacyItem]) -> Self {
        Self::from_tiers(items.iter().map(PrivacyItem::risk))
    }

    pub fn add(&mut self, tier: RiskTier) {
        match tier {
            RiskTier::High => self.high += 1,
            RiskTier::Medium => self.medium += 1,
            RiskTier::Low => self.low += 1,
        }
    }

    pub fn remove(&mut self, tier: RiskTier) {
        match tier {
            RiskTier::High => self.high = self.high.saturating_sub(1),
            RiskTier::Medium => self.medium = self.medium.saturating_sub(1),
            RiskTier::Low => self.low = self.low.saturating_sub(1),
        }
    }

    pub fn total(&self) -> u64 {
        self.high + self.medium + self.low
    }
}

/// Final state of one selected item in a cleanup session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Disposition {
    /// Backed up, verified, original removed.
    Removed,
    /// Already cleaned by an earlier session; nothing to do.
    AlreadyCleaned,
    DriftDetected { reason: String },
    BackupFailed { reason: String },
    BackupCorrupt { reason: String },
    DeleteFailed { reason: String },
    /// Caller did not confirm the session.
    NotConfirmed,
}

impl Disposition {
    #[must_use]
    pub const fn is_removed(&self) -> bool {
        matches!(self, Self::Removed)
    }

    /// Item ended in a failure state (excluded with a reason).
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::DriftDetected { .. }
                | Self::BackupFailed { .. }
                | Self::BackupCorrupt { .. }
                | Self::DeleteFailed { .. }
        )
    }

    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Removed => "removed",
            Self::AlreadyCleaned => "already_cleaned",
            Self::DriftDetected { .. } => "drift_detected",
            Self::BackupFailed { .. } => "backup_failed",
            Self::BackupCorrupt { .. } => "backup_corrupt",
            Self::DeleteFailed { .. } => "delete_failed",
            Self::NotConfirmed => "not_confirmed",
        }
    }

    #[must_use]
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::DriftDetected { reason }
            | Self::BackupFailed { reason }
            | Self::BackupCorrupt { reason }
            | Self::DeleteFailed { reason } => Some(reason),
            _ => None,
        }
    }
}

/// One selected item and what happened to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemOutcome {
    pub item: PrivacyItem,
    pub disposition: Disposition,
    pub bytes_reclaimed: u64,
}

/// Permanent record of one cleanup session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportData {
    pub session_id: String,
    pub initial_score: u8,
    pub final_score: u8,
    /// Every selected item with its final disposition.
    pub cleaned_items: Vec<ItemOutcome>,
    /// Tier counts of the full inventory before the session.
    pub inventory_before: TierCounts,
    pub total_bytes_saved: u64,
    pub timestamp: DateTime<Utc>,
}

impl ReportData {
    /// Items whose originals were removed in this session.
    pub fn removed_items(&self) -> impl Iterator<Item = &PrivacyItem> {
        self.cleaned_items
            .iter()
            .filter(|o| o.disposition.is_removed())
            .map(|o| &o.item)
    }

    /// Tier counts of the inventory after the session.
    pub fn inventory_after(&self) -> TierCounts {
        let mut counts = self.inventory_before;
        for item in self.removed_items() {
            counts.remove(item.risk());
        }
        counts
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    #[allow(clippy::cast_possible_truncation)]
    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
