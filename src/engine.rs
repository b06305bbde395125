//! Engine facade: the surface a UI or CLI drives.
//!
//! [`PrivacyEngine`] wires the path resolver, scanner, risk model, cleanup
//! executor and report store together from one [`Config`]. It is cheap to
//! clone; clones share the artifact source, backup store and activity logger.

#![allow(missing_docs)]

use std::path::Path;
use std::sync::Arc;
use std::thread;

use crossbeam_channel as channel;
use parking_lot::Mutex;

use crate::cleanup::backup::BackupStore;
use crate::cleanup::executor::{CleanupExecutor, CleanupOptions};
use crate::cleanup::oplog::{self, LogVerification};
use crate::core::cancel::CancellationToken;
use crate::core::config::Config;
use crate::core::errors::{PswError, Result};
use crate::core::model::{PrivacyItem, ReportData, ScanResult};
use crate::logger::activity::{ActivityEvent, ActivityLogger};
use crate::platform::os::Os;
use crate::platform::templates::{PathResolver, env_lookup};
use crate::report;
use crate::risk::policy::RiskPolicy;
use crate::risk::scoring::ScoreModel;
use crate::scanner::classify::PatternSet;
use crate::scanner::engine::{ScanEvent, ScanOptions, Scanner};
use crate::scanner::source::{ArtifactSource, FsSource};

/// Environment lookup used for template expansion.
pub type Lookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

#[derive(Clone)]
pub struct PrivacyEngine {
    config: Arc<Config>,
    source: Arc<dyn ArtifactSource>,
    resolver: Arc<PathResolver>,
    policy: RiskPolicy,
    score_model: ScoreModel,
    lookup: Lookup,
    activity: ActivityLogger,
    backup: Arc<Mutex<Option<Arc<BackupStore>>>>,
}

impl PrivacyEngine {
    /// Engine over the real filesystem and process environment.
    pub fn new(config: Config) -> Result<Self> {
        Self::with_source(config, Arc::new(FsSource))
    }

    pub fn with_source(config: Config, source: Arc<dyn ArtifactSource>) -> Result<Self> {
        config.validate()?;
        let policy = RiskPolicy::from_config(&config.risk)?;
        let score_model = ScoreModel::from_config(&config.risk);
        Ok(Self {
            resolver: Arc::new(PathResolver::from_config(&config)),
            config: Arc::new(config),
            source,
            policy,
            score_model,
            lookup: Arc::new(env_lookup),
            activity: ActivityLogger::disabled(),
            backup: Arc::new(Mutex::new(None)),
        })
    }

    /// Replace the environment lookup (tests, sandboxed profiles).
    #[must_use]
    pub fn with_lookup(mut self, lookup: Lookup) -> Self {
        self.lookup = lookup;
        self
    }

    #[must_use]
    pub fn with_activity(mut self, activity: ActivityLogger) -> Self {
        self.activity = activity;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    // ──────────────────── scan ────────────────────

    /// Scan `os`'s artifact locations on the calling thread.
    ///
    /// `UnsupportedPlatform` is returned before any filesystem access.
    pub fn scan(
        &self,
        os: Os,
        token: &CancellationToken,
        on_progress: &mut dyn FnMut(ScanEvent),
    ) -> Result<ScanResult> {
        let resolutions = self.resolver.resolve_all(os, self.lookup.as_ref())?;
        for (category, resolution) in &resolutions {
            for missing in &resolution.unresolved {
                self.activity.send(ActivityEvent::TemplateUnresolved {
                    category: category.key().to_string(),
                    template: missing.template.clone(),
                    variable: missing.variable.clone(),
                });
            }
        }
        let patterns = PatternSet::compile(&resolutions, &self.config.scanner.excluded_paths)?;

        let scanner = Scanner::new(
            ScanOptions::from(&self.config.scanner),
            Arc::clone(&self.source),
            self.policy,
            self.score_model,
        );
        let activity = &self.activity;
        let result = scanner.scan(os, patterns, token, &mut |event: ScanEvent| {
            match &event {
                ScanEvent::Started { roots, patterns, .. } => {
                    activity.send(ActivityEvent::ScanStarted {
                        os: os.key().to_string(),
                        roots: *roots,
                        patterns: *patterns,
                    });
                }
                ScanEvent::EntrySkipped { path, details } => {
                    activity.send(ActivityEvent::EntrySkipped {
                        path: path.clone(),
                        details: details.clone(),
                    });
                }
                ScanEvent::Progress { .. } | ScanEvent::Finished { .. } => {}
            }
            on_progress(event);
        });

        match &result {
            Ok(scan) => self.activity.send(ActivityEvent::ScanCompleted {
                os: os.key().to_string(),
                items: scan.items().len(),
                skipped: scan.skipped(),
                score: scan.score(),
                total_bytes: scan.total_size(),
                duration_ms: u64::try_from(scan.duration().as_millis()).unwrap_or(u64::MAX),
                cancelled: scan.cancelled(),
            }),
            Err(err) => self.activity.send(ActivityEvent::error(err)),
        }
        result
    }

    /// Run [`scan`](Self::scan) on a background thread; events arrive on the
    /// handle's channel.
    pub fn spawn_scan(&self, os: Os, token: CancellationToken) -> Result<ScanHandle> {
        let (tx, rx) = channel::unbounded::<ScanEvent>();
        let engine = self.clone();
        let worker_token = token.clone();
        let join = thread::Builder::new()
            .name("psw-scan".to_string())
            .spawn(move || {
                engine.scan(os, &worker_token, &mut |event: ScanEvent| {
                    let _ = tx.send(event);
                })
            })
            .map_err(|e| PswError::Runtime {
                details: format!("failed to spawn scan thread: {e}"),
            })?;
        Ok(ScanHandle {
            events: rx,
            token,
            join,
        })
    }

    // ──────────────────── score ────────────────────

    /// Score the live part of `items`. Items cleaned by an earlier session
    /// are left out, the same basis a cleanup report scores against.
    pub fn score(&self, items: &[PrivacyItem]) -> u8 {
        self.score_model
            .score_tiers(items.iter().filter(|i| !i.cleaned()).map(PrivacyItem::risk))
    }

    /// Re-derive a report's (initial, final) scores from its tier counts.
    pub fn rescore(&self, report: &ReportData) -> (u8, u8) {
        (
            self.score_model.score_counts(&report.inventory_before),
            self.score_model.score_counts(&report.inventory_after()),
        )
    }

    // ──────────────────── cleanup ────────────────────

    /// Clean the selected items of `inventory` and persist the report.
    ///
    /// Errors only for infrastructure: the backup store cannot be opened or
    /// the report cannot be persisted.
    pub fn cleanup(&self, inventory: &mut [PrivacyItem], confirmed: bool) -> Result<ReportData> {
        let store = self.backup_store()?;
        let executor = CleanupExecutor::new(
            Arc::clone(&self.source),
            store,
            self.score_model,
            CleanupOptions::from(self.config.as_ref()),
        )
        .with_activity(self.activity.clone());
        let report = executor.run(inventory, confirmed)?;

        let reports = report::open_store(&self.config)?;
        if let Err(err) = reports.append(&report) {
            self.activity.send(ActivityEvent::error(&err));
            return Err(err);
        }
        self.activity.send(ActivityEvent::ReportPersisted {
            session: report.session_id.clone(),
            backend: reports.backend().to_string(),
        });
        Ok(report)
    }

    /// Run [`cleanup`](Self::cleanup) on a background thread. The inventory
    /// comes back with `cleaned` flags updated.
    pub fn spawn_cleanup(
        &self,
        mut inventory: Vec<PrivacyItem>,
        confirmed: bool,
    ) -> Result<CleanupHandle> {
        let engine = self.clone();
        let join = thread::Builder::new()
            .name("psw-cleanup".to_string())
            .spawn(move || {
                let report = engine.cleanup(&mut inventory, confirmed)?;
                Ok(CleanupOutcome { report, inventory })
            })
            .map_err(|e| PswError::Runtime {
                details: format!("failed to spawn cleanup thread: {e}"),
            })?;
        Ok(CleanupHandle { join })
    }

    // ──────────────────── reports & backups ────────────────────

    pub fn list_reports(&self) -> Result<Vec<ReportData>> {
        report::open_store(&self.config)?.list()
    }

    /// Decrypt a backed-up artifact to `dest` (never overwrites).
    pub fn restore(&self, fingerprint: &str, dest: &Path) -> Result<u64> {
        let bytes = self.backup_store()?.restore(fingerprint, dest)?;
        self.activity.send(ActivityEvent::Restored {
            fingerprint: fingerprint.to_string(),
            path: dest.to_path_buf(),
        });
        Ok(bytes)
    }

    /// Check the signature chain of a session's operation log.
    pub fn verify_session_log(&self, session_id: &str) -> Result<LogVerification> {
        let store = self.backup_store()?;
        let key = oplog::signing_key(&store)?;
        oplog::verify(&oplog::log_path(&store, session_id), &key)
    }

    fn backup_store(&self) -> Result<Arc<BackupStore>> {
        let mut slot = self.backup.lock();
        if let Some(store) = slot.as_ref() {
            return Ok(Arc::clone(store));
        }
        let store = Arc::new(BackupStore::open(&self.config.paths.backup_dir())?);
        *slot = Some(Arc::clone(&store));
        Ok(store)
    }
}

// ──────────────────── handles ────────────────────

/// Background scan. Drain [`events`](Self::events) for progress, then `join`.
pub struct ScanHandle {
    events: channel::Receiver<ScanEvent>,
    token: CancellationToken,
    join: thread::JoinHandle<Result<ScanResult>>,
}

impl ScanHandle {
    pub fn events(&self) -> &channel::Receiver<ScanEvent> {
        &self.events
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    pub fn join(self) -> Result<ScanResult> {
        self.join.join().map_err(|_| PswError::Runtime {
            details: "scan thread panicked".to_string(),
        })?
    }
}

#[derive(Debug)]
pub struct CleanupOutcome {
    pub report: ReportData,
    pub inventory: Vec<PrivacyItem>,
}

pub struct CleanupHandle {
    join: thread::JoinHandle<Result<CleanupOutcome>>,
}

impl CleanupHandle {
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    pub fn join(self) -> Result<CleanupOutcome> {
        self.join.join().map_err(|_| PswError::Runtime {
            details: "cleanup thread panicked".to_string(),
        })?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::Category;
    use crate::scanner::source::MemorySource;
    use std::collections::{BTreeMap, HashMap};
    use std::path::PathBuf;

    fn linux_only(dir: &Path) -> Config {
        let mut config = Config::default();
        config.paths.data_dir = dir.to_path_buf();
        let mut table = BTreeMap::new();
        table.insert(
            "browser".to_string(),
            vec!["~/.config/chrome/History".to_string()],
        );
        table.insert("app_cache".to_string(), vec!["~/.cache/*".to_string()]);
        table.insert("temp".to_string(), vec!["${TMPDIR}/*".to_string()]);
        config.platforms.linux = table;
        config.platforms.windows = BTreeMap::new();
        config
    }

    fn engine(dir: &Path) -> (PrivacyEngine, Arc<MemorySource>) {
        let src = Arc::new(MemorySource::new());
        src.add_file("/home/u/.config/chrome/History", vec![1u8; 1000]);
        src.add_file("/home/u/.cache/app/blob", vec![2u8; 2000]);
        src.add_file("/scratch/tmp/x.txt", vec![3u8; 3000]);
        let vars: HashMap<String, String> = [("HOME", "/home/u"), ("TMPDIR", "/scratch/tmp")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let source: Arc<dyn ArtifactSource> = src.clone();
        let engine = PrivacyEngine::with_source(linux_only(dir), source)
            .unwrap()
            .with_lookup(Arc::new(move |name: &str| vars.get(name).cloned()));
        (engine, src)
    }

    #[test]
    fn scan_then_clean_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, src) = engine(dir.path());

        let scan = engine
            .scan(Os::Linux, &CancellationToken::new(), &mut |_| {})
            .unwrap();
        assert_eq!(scan.items().len(), 3);
        assert_eq!(scan.score(), 97);
        assert_eq!(engine.score(scan.items()), 97);

        let mut inventory = scan.into_items();
        let report = engine.cleanup(&mut inventory, true).unwrap();
        assert_eq!(report.final_score, 100);
        assert_eq!(engine.score(&inventory), report.final_score);
        assert_eq!(report.total_bytes_saved, 6000);
        assert_eq!(
            engine.rescore(&report),
            (report.initial_score, report.final_score)
        );
        assert!(!src.exists("/home/u/.cache/app/blob"));

        let listed = engine.list_reports().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].session_id, report.session_id);
        assert!(
            engine
                .verify_session_log(&report.session_id)
                .unwrap()
                .is_intact()
        );

        let restored = dir.path().join("restored/History");
        let fp = inventory
            .iter()
            .find(|i| i.category() == Category::Browser)
            .unwrap()
            .fingerprint()
            .to_string();
        assert_eq!(engine.restore(&fp, &restored).unwrap(), 1000);
    }

    #[test]
    fn score_after_partial_cleanup_matches_report() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, _src) = engine(dir.path());
        let mut inventory = engine
            .scan(Os::Linux, &CancellationToken::new(), &mut |_| {})
            .unwrap()
            .into_items();
        for item in &mut inventory {
            item.set_selected(item.category() == Category::Browser);
        }
        let report = engine.cleanup(&mut inventory, true).unwrap();

        assert_eq!(report.final_score, 99);
        assert_eq!(engine.score(&inventory), report.final_score);
    }

    #[test]
    fn platform_without_table_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, _src) = engine(dir.path());
        let err = engine
            .scan(Os::Windows, &CancellationToken::new(), &mut |_| {})
            .unwrap_err();
        assert!(matches!(err, PswError::UnsupportedPlatform { .. }));
    }

    #[test]
    fn unset_variable_drops_only_that_template() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, _src) = engine(dir.path());
        let engine = engine.with_lookup(Arc::new(|name: &str| {
            (name == "HOME").then(|| "/home/u".to_string())
        }));
        let scan = engine
            .scan(Os::Linux, &CancellationToken::new(), &mut |_| {})
            .unwrap();
        assert_eq!(scan.items().len(), 2);
        assert!(
            scan.items()
                .iter()
                .all(|i| i.path() != Path::new("/scratch/tmp/x.txt"))
        );
    }

    #[test]
    fn background_scan_streams_events() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, _src) = engine(dir.path());
        let handle = engine
            .spawn_scan(Os::Linux, CancellationToken::new())
            .unwrap();
        let events: Vec<ScanEvent> = handle.events().iter().collect();
        let result = handle.join().unwrap();

        assert!(matches!(events.first(), Some(ScanEvent::Started { .. })));
        assert!(matches!(events.last(), Some(ScanEvent::Finished { .. })));
        assert_eq!(result.items().len(), 3);
    }

    #[test]
    fn background_cleanup_returns_updated_inventory() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, _src) = engine(dir.path());
        let scan = engine
            .scan(Os::Linux, &CancellationToken::new(), &mut |_| {})
            .unwrap();
        let outcome = engine
            .spawn_cleanup(scan.into_items(), true)
            .unwrap()
            .join()
            .unwrap();
        assert!(outcome.inventory.iter().all(PrivacyItem::cleaned));
        assert_eq!(outcome.report.total_bytes_saved, 6000);
    }

    #[test]
    fn excluded_paths_are_not_scanned() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = linux_only(dir.path());
        config.scanner.excluded_paths = vec![PathBuf::from("/home/u/.cache")];
        let src = Arc::new(MemorySource::new());
        src.add_file("/home/u/.cache/app/blob", vec![2u8; 10]);
        let source: Arc<dyn ArtifactSource> = src;
        let engine = PrivacyEngine::with_source(config, source)
            .unwrap()
            .with_lookup(Arc::new(|name: &str| {
                (name == "HOME").then(|| "/home/u".to_string())
            }));
        let scan = engine
            .scan(Os::Linux, &CancellationToken::new(), &mut |_| {})
            .unwrap();
        assert!(scan.items().is_empty());
        assert_eq!(scan.score(), 100);
    }
}
