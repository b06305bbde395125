//! Configuration system: TOML file + env var overrides + smart defaults.

#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::errors::{PswError, Result};
use crate::core::model::{Category, RiskTier};
use crate::core::paths;
use crate::platform::os::Os;
use crate::platform::templates;

/// Full psweep configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub scanner: ScannerConfig,
    pub risk: RiskConfig,
    pub cleanup: CleanupConfig,
    pub report: ReportConfig,
    pub paths: PathsConfig,
    pub platforms: PlatformsConfig,
}

/// Walk/hash pools and traversal limits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ScannerConfig {
    pub walk_parallelism: usize,
    pub hash_parallelism: usize,
    pub max_depth: usize,
    pub hash_chunk_bytes: usize,
    /// Subtrees never reported, even when a pattern matches them.
    pub excluded_paths: Vec<PathBuf>,
}

/// Tier weights, score divisor and the category → tier policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RiskConfig {
    pub high_weight: f64,
    pub medium_weight: f64,
    pub low_weight: f64,
    pub divisor: f64,
    /// Keyed by category (`browser`, `app_cache`, ...).
    pub policy: BTreeMap<String, RiskTier>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CleanupConfig {
    /// Copy/verify workers.
    pub parallelism: usize,
}

/// Where session reports are persisted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReportBackend {
    #[default]
    Jsonl,
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct ReportConfig {
    pub backend: ReportBackend,
}

/// Filesystem locations. Unset entries derive from `data_dir`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub config_file: PathBuf,
    pub data_dir: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report_log: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report_db: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activity_log: Option<PathBuf>,
}

/// Category → path templates for one OS.
pub type PlatformTable = BTreeMap<String, Vec<String>>;

/// Per-OS template tables. An empty table marks the OS unsupported.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PlatformsConfig {
    pub windows: PlatformTable,
    pub linux: PlatformTable,
    pub macos: PlatformTable,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            walk_parallelism: 8,
            hash_parallelism: 4,
            max_depth: 16,
            hash_chunk_bytes: 64 * 1024,
            excluded_paths: Vec::new(),
        }
    }
}

impl Default for RiskConfig {
    fn default() -> Self {
        let policy = Category::ALL
            .into_iter()
            .map(|c| (c.key().to_string(), default_tier(c)))
            .collect();
        Self {
            high_weight: 10.0,
            medium_weight: 5.0,
            low_weight: 1.0,
            divisor: 5.0,
            policy,
        }
    }
}

/// Built-in category → tier mapping.
#[must_use]
pub const fn default_tier(category: Category) -> RiskTier {
    match category {
        Category::Browser | Category::Recent => RiskTier::High,
        Category::ImageMetadata | Category::AppCache => RiskTier::Medium,
        Category::Thumbnails | Category::Temp => RiskTier::Low,
    }
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self { parallelism: 4 }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            config_file: paths::default_config_dir().join("config.toml"),
            data_dir: paths::default_data_dir(),
            backup_dir: None,
            report_log: None,
            report_db: None,
            activity_log: None,
        }
    }
}

impl PathsConfig {
    #[must_use]
    pub fn backup_dir(&self) -> PathBuf {
        self.backup_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("backup"))
    }

    #[must_use]
    pub fn report_log(&self) -> PathBuf {
        self.report_log
            .clone()
            .unwrap_or_else(|| self.data_dir.join("reports.jsonl"))
    }

    #[must_use]
    pub fn report_db(&self) -> PathBuf {
        self.report_db
            .clone()
            .unwrap_or_else(|| self.data_dir.join("reports.sqlite3"))
    }

    #[must_use]
    pub fn activity_log(&self) -> PathBuf {
        self.activity_log
            .clone()
            .unwrap_or_else(|| self.data_dir.join("activity.jsonl"))
    }
}

impl Default for PlatformsConfig {
    fn default() -> Self {
        Self {
            windows: templates::default_table(Os::Windows),
            linux: templates::default_table(Os::Linux),
            macos: templates::default_table(Os::MacOs),
        }
    }
}

impl PlatformsConfig {
    /// Template table registered for `os`.
    #[must_use]
    pub const fn table(&self, os: Os) -> &PlatformTable {
        match os {
            Os::Windows => &self.windows,
            Os::Linux => &self.linux,
            Os::MacOs => &self.macos,
        }
    }
}

impl Config {
    /// Default configuration path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        paths::default_config_dir().join("config.toml")
    }

    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// Missing config file is not an error when loading from default path; defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf).map_err(|source| PswError::io(&path_buf, source))?;
            Self::from_toml_str(&raw)?
        } else if path.is_some() {
            return Err(PswError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.paths.config_file = path_buf;
        cfg.apply_env_overrides_from(env_var)?;
        cfg.normalize_paths();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse TOML without env overrides or validation.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Render the effective config as TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Deterministic hash of the effective config for the activity log.
    ///
    /// FNV-1a over the canonical JSON rendering, stable across processes.
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    /// Tier for `category` under the configured policy.
    #[must_use]
    pub fn tier_for(&self, category: Category) -> RiskTier {
        self.risk
            .policy
            .get(category.key())
            .copied()
            .unwrap_or_else(|| default_tier(category))
    }

    fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        // scanner
        set_usize(&mut lookup, "PSW_SCANNER_WALK_PARALLELISM", &mut self.scanner.walk_parallelism)?;
        set_usize(&mut lookup, "PSW_SCANNER_HASH_PARALLELISM", &mut self.scanner.hash_parallelism)?;
        set_usize(&mut lookup, "PSW_SCANNER_MAX_DEPTH", &mut self.scanner.max_depth)?;
        set_usize(&mut lookup, "PSW_SCANNER_HASH_CHUNK_BYTES", &mut self.scanner.hash_chunk_bytes)?;

        // risk
        set_f64(&mut lookup, "PSW_RISK_HIGH_WEIGHT", &mut self.risk.high_weight)?;
        set_f64(&mut lookup, "PSW_RISK_MEDIUM_WEIGHT", &mut self.risk.medium_weight)?;
        set_f64(&mut lookup, "PSW_RISK_LOW_WEIGHT", &mut self.risk.low_weight)?;
        set_f64(&mut lookup, "PSW_RISK_DIVISOR", &mut self.risk.divisor)?;

        // cleanup
        set_usize(&mut lookup, "PSW_CLEANUP_PARALLELISM", &mut self.cleanup.parallelism)?;

        // report
        if let Some(raw) = lookup("PSW_REPORT_BACKEND") {
            self.report.backend = match raw.trim().to_ascii_lowercase().as_str() {
                "jsonl" => ReportBackend::Jsonl,
                "sqlite" => ReportBackend::Sqlite,
                _ => {
                    return Err(PswError::ConfigParse {
                        context: "env",
                        details: format!("PSW_REPORT_BACKEND={raw:?}: expected jsonl or sqlite"),
                    });
                }
            };
        }

        // paths
        if let Some(raw) = lookup("PSW_DATA_DIR") {
            self.paths.data_dir = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("PSW_BACKUP_DIR") {
            self.paths.backup_dir = Some(PathBuf::from(raw));
        }
        if let Some(raw) = lookup("PSW_REPORT_LOG") {
            self.paths.report_log = Some(PathBuf::from(raw));
        }
        if let Some(raw) = lookup("PSW_ACTIVITY_LOG") {
            self.paths.activity_log = Some(PathBuf::from(raw));
        }

        Ok(())
    }

    /// Strip trailing separators from excluded roots and make data paths absolute.
    fn normalize_paths(&mut self) {
        for path in &mut self.scanner.excluded_paths {
            let s = path.to_string_lossy();
            if s.len() > 1
                && let Some(stripped) = s.strip_suffix('/')
            {
                *path = PathBuf::from(stripped);
            }
        }
        self.paths.data_dir = paths::resolve_absolute_path(&self.paths.data_dir);
    }

    pub fn validate(&self) -> Result<()> {
        for (name, val) in [
            ("scanner.walk_parallelism", self.scanner.walk_parallelism),
            ("scanner.hash_parallelism", self.scanner.hash_parallelism),
            ("scanner.max_depth", self.scanner.max_depth),
            ("cleanup.parallelism", self.cleanup.parallelism),
        ] {
            if val == 0 {
                return Err(PswError::InvalidConfig {
                    details: format!("{name} must be >= 1"),
                });
            }
        }

        if !(4096..=16 * 1024 * 1024).contains(&self.scanner.hash_chunk_bytes) {
            return Err(PswError::InvalidConfig {
                details: format!(
                    "scanner.hash_chunk_bytes must be in [4096, 16777216], got {}",
                    self.scanner.hash_chunk_bytes
                ),
            });
        }

        // Non-negative weights keep the score monotonic as items are added.
        for (name, val) in [
            ("high_weight", self.risk.high_weight),
            ("medium_weight", self.risk.medium_weight),
            ("low_weight", self.risk.low_weight),
        ] {
            if !val.is_finite() || val < 0.0 {
                return Err(PswError::InvalidConfig {
                    details: format!("risk.{name} must be a finite value >= 0.0, got {val}"),
                });
            }
        }
        if !self.risk.divisor.is_finite() || self.risk.divisor <= 0.0 {
            return Err(PswError::InvalidConfig {
                details: format!("risk.divisor must be > 0.0, got {}", self.risk.divisor),
            });
        }

        for key in self.risk.policy.keys() {
            key.parse::<Category>()?;
        }

        for os in Os::ALL {
            for (key, patterns) in self.platforms.table(os) {
                key.parse::<Category>()?;
                for pattern in patterns {
                    templates::validate_template(pattern)?;
                }
            }
        }

        Ok(())
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn set_usize<F>(lookup: &mut F, name: &str, slot: &mut usize) -> Result<()>
where
    F: FnMut(&str) -> Option<String>,
{
    if let Some(raw) = lookup(name) {
        *slot = raw.trim().parse::<usize>().map_err(|error| PswError::ConfigParse {
            context: "env",
            details: format!("{name}={raw:?}: {error}"),
        })?;
    }
    Ok(())
}

fn set_f64<F>(lookup: &mut F, name: &str, slot: &mut f64) -> Result<()>
where
    F: FnMut(&str) -> Option<String>,
{
    if let Some(raw) = lookup(name) {
        *slot = raw.trim().parse::<f64>().map_err(|error| PswError::ConfigParse {
            context: "env",
            details: format!("{name}={raw:?}: {error}"),
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(name, value)| ((*name).to_string(), (*value).to_string()))
            .collect()
    }

    #[test]
    fn default_config_is_valid() {
        let cfg = Config::default();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn default_policy_matches_builtin_tiers() {
        let cfg = Config::default();
        assert_eq!(cfg.tier_for(Category::Browser), RiskTier::High);
        assert_eq!(cfg.tier_for(Category::Recent), RiskTier::High);
        assert_eq!(cfg.tier_for(Category::ImageMetadata), RiskTier::Medium);
        assert_eq!(cfg.tier_for(Category::AppCache), RiskTier::Medium);
        assert_eq!(cfg.tier_for(Category::Thumbnails), RiskTier::Low);
        assert_eq!(cfg.tier_for(Category::Temp), RiskTier::Low);
    }

    #[test]
    fn stable_hash_changes_when_config_changes() {
        let cfg = Config::default();
        let before = cfg.stable_hash().expect("hash should compute");
        let mut modified = Config::default();
        modified.scanner.max_depth += 1;
        let after = modified.stable_hash().expect("hash should compute");
        assert_ne!(before, after);
    }

    #[test]
    fn stable_hash_deterministic() {
        let cfg = Config::default();
        assert_eq!(cfg.stable_hash().unwrap(), cfg.stable_hash().unwrap());
    }

    #[test]
    fn zero_parallelism_rejected() {
        let mut cfg = Config::default();
        cfg.scanner.hash_parallelism = 0;
        let err = cfg.validate().expect_err("expected parallelism error");
        assert!(err.to_string().contains("hash_parallelism"));

        let mut cfg = Config::default();
        cfg.cleanup.parallelism = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn negative_weight_rejected() {
        let mut cfg = Config::default();
        cfg.risk.low_weight = -1.0;
        let err = cfg.validate().expect_err("expected weight error");
        assert!(err.to_string().contains("low_weight"));
    }

    #[test]
    fn zero_divisor_rejected() {
        let mut cfg = Config::default();
        cfg.risk.divisor = 0.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn unknown_policy_category_rejected() {
        let mut cfg = Config::default();
        cfg.risk.policy.insert("swapfile".to_string(), RiskTier::Low);
        let err = cfg.validate().expect_err("expected category error");
        assert_eq!(err.code(), "PSW-1001");
    }

    #[test]
    fn tiny_hash_chunk_rejected() {
        let mut cfg = Config::default();
        cfg.scanner.hash_chunk_bytes = 16;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn env_overrides_apply() {
        let mut cfg = Config::default();
        let overrides = vars(&[
            ("PSW_SCANNER_WALK_PARALLELISM", "2"),
            ("PSW_RISK_DIVISOR", "2.5"),
            ("PSW_REPORT_BACKEND", "sqlite"),
            ("PSW_DATA_DIR", "/srv/psweep"),
        ]);
        cfg.apply_env_overrides_from(|name| overrides.get(name).cloned())
            .expect("env overrides should parse");

        assert_eq!(cfg.scanner.walk_parallelism, 2);
        assert!((cfg.risk.divisor - 2.5).abs() < f64::EPSILON);
        assert_eq!(cfg.report.backend, ReportBackend::Sqlite);
        assert_eq!(cfg.paths.backup_dir(), PathBuf::from("/srv/psweep/backup"));
    }

    #[test]
    fn env_invalid_number_rejected() {
        let mut cfg = Config::default();
        let overrides = vars(&[("PSW_CLEANUP_PARALLELISM", "lots")]);
        let err = cfg
            .apply_env_overrides_from(|name| overrides.get(name).cloned())
            .expect_err("invalid number should fail");
        match err {
            PswError::ConfigParse { context, details } => {
                assert_eq!(context, "env");
                assert!(details.contains("PSW_CLEANUP_PARALLELISM"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn derived_paths_follow_data_dir() {
        let mut cfg = Config::default();
        cfg.paths.data_dir = PathBuf::from("/var/lib/psweep");
        assert_eq!(cfg.paths.report_log(), PathBuf::from("/var/lib/psweep/reports.jsonl"));
        cfg.paths.report_log = Some(PathBuf::from("/elsewhere/r.jsonl"));
        assert_eq!(cfg.paths.report_log(), PathBuf::from("/elsewhere/r.jsonl"));
    }

    #[test]
    fn toml_section_replaces_platform_table() {
        let cfg = Config::from_toml_str(
            r#"
            [platforms.linux]
            temp = ["/scratch/*"]
            "#,
        )
        .unwrap();
        assert_eq!(cfg.platforms.linux.len(), 1);
        assert_eq!(cfg.platforms.linux["temp"], vec!["/scratch/*".to_string()]);
        assert!(!cfg.platforms.windows.is_empty());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn toml_round_trips_through_show() {
        let cfg = Config::default();
        let rendered = cfg.to_toml_string().unwrap();
        let parsed = Config::from_toml_str(&rendered).unwrap();
        assert_eq!(parsed, cfg);
    }

    #[test]
    fn load_returns_error_for_explicit_missing_path() {
        let err = Config::load(Some(Path::new("/nonexistent/psweep/config.toml"))).unwrap_err();
        assert!(matches!(err, PswError::MissingConfig { .. }));
    }

    #[test]
    fn load_reads_explicit_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.toml");
        fs::write(&path, "[cleanup]\nparallelism = 2\n").unwrap();
        let cfg = Config::load(Some(&path)).unwrap();
        assert_eq!(cfg.cleanup.parallelism, 2);
        assert_eq!(cfg.paths.config_file, path);
    }

    #[test]
    fn normalize_trims_trailing_slashes_and_keeps_root() {
        let mut cfg = Config::default();
        cfg.scanner.excluded_paths = vec![PathBuf::from("/"), PathBuf::from("/data/")];
        cfg.normalize_paths();
        assert!(cfg.scanner.excluded_paths.contains(&PathBuf::from("/")));
        assert!(cfg.scanner.excluded_paths.contains(&PathBuf::from("/data")));
    }
}
