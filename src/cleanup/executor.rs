//! Cleanup session state machine.
//!
//! ```text
//! Pending ──► BackingUp ──► Verifying ──► Deleting ──► Committed
//!    │            │             │             │
//!    └─ drift     └─ failed     └─ corrupt    └─ delete failed   (excluded)
//! ```
//!
//! Pending checks, copies and verification run on a bounded worker pool.
//! Deletions run afterwards on the calling thread, one at a time, under the
//! backup store lock. An original is only removed after its encrypted copy has
//! been decrypted and re-hashed to the scan-time fingerprint. The session
//! always reaches Committed; per-item failures become dispositions.

#![allow(missing_docs)]

use std::io::ErrorKind;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use chrono::Utc;
use crossbeam_channel as channel;
use parking_lot::Mutex;

use crate::cleanup::backup::BackupStore;
use crate::cleanup::oplog::{OperationLog, Stage};
use crate::core::cancel::CancellationToken;
use crate::core::config::Config;
use crate::core::errors::{PswError, Result};
use crate::core::model::{Disposition, ItemOutcome, PrivacyItem, ReportData, TierCounts};
use crate::logger::activity::{ActivityEvent, ActivityLogger};
use crate::risk::scoring::ScoreModel;
use crate::scanner::fingerprint::{HashOutcome, hash_stream};
use crate::scanner::source::{ArtifactSource, EntryKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CleanupOptions {
    /// Copy/verify workers.
    pub parallelism: usize,
    /// Read size when re-hashing originals.
    pub hash_chunk_bytes: usize,
}

impl Default for CleanupOptions {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for CleanupOptions {
    fn from(config: &Config) -> Self {
        Self {
            parallelism: config.cleanup.parallelism,
            hash_chunk_bytes: config.scanner.hash_chunk_bytes,
        }
    }
}

/// Result of the pool stage for one item.
///
/// Only `Ready` items reach the delete stage; everything else already carries
/// its final disposition and leaves the original untouched.
#[derive(Debug)]
enum Prepared {
    /// Backed up and verified; ready to delete.
    Ready,
    /// Stopped before deletion with this disposition.
    Settled(Disposition),
}

/// Operation log shared by the copy workers and the delete stage.
type SharedLog = Arc<Mutex<OperationLog>>;

/// Called with the fingerprint of each freshly stored blob, before it is
/// verified.
#[cfg(test)]
type StoredHook = fn(&BackupStore, &str);

/// Runs cleanup sessions against one artifact source and backup store.
///
/// Every session gets a fresh id and its own signed operation log. The
/// executor holds no per-session state, so one instance can run sessions
/// back to back over the same inventory.
pub struct CleanupExecutor {
    source: Arc<dyn ArtifactSource>,
    store: Arc<BackupStore>,
    score_model: ScoreModel,
    options: CleanupOptions,
    activity: ActivityLogger,
    #[cfg(test)]
    after_store: Option<StoredHook>,
}

impl CleanupExecutor {
    pub fn new(
        source: Arc<dyn ArtifactSource>,
        store: Arc<BackupStore>,
        score_model: ScoreModel,
        options: CleanupOptions,
    ) -> Self {
        Self {
            source,
            store,
            score_model,
            options,
            activity: ActivityLogger::disabled(),
            #[cfg(test)]
            after_store: None,
        }
    }

    /// Attach the activity log that receives backup, removal and commit
    /// events.
    #[must_use]
    pub fn with_activity(mut self, activity: ActivityLogger) -> Self {
        self.activity = activity;
        self
    }

    /// Run one session over the selected items of `inventory`.
    ///
    /// Errors only when the session cannot start (operation log not
    /// creatable, worker spawn failure). Items cleaned by an earlier session
    /// settle as `AlreadyCleaned` without touching the filesystem, even if
    /// their path exists again. `confirmed == false` settles every other
    /// selected item as `NotConfirmed`.
    pub fn run(&self, inventory: &mut [PrivacyItem], confirmed: bool) -> Result<ReportData> {
        let started = Instant::now();
        let session_id = new_session_id();
        let live: Vec<&PrivacyItem> = inventory.iter().filter(|i| !i.cleaned()).collect();
        let inventory_before = TierCounts::from_tiers(live.iter().map(|i| i.risk()));
        let initial_score = self.score_model.score_counts(&inventory_before);

        let selected: Vec<usize> = inventory
            .iter()
            .enumerate()
            .filter(|(_, item)| item.selected())
            .map(|(idx, _)| idx)
            .collect();
        // Cleaned items are outside the score basis; re-removing one would
        // subtract it from counts that never held it.
        let (already_cleaned, live_selected): (Vec<usize>, Vec<usize>) = selected
            .iter()
            .copied()
            .partition(|&idx| inventory[idx].cleaned());

        let log: SharedLog = Arc::new(Mutex::new(OperationLog::create(
            &self.store,
            &session_id,
        )?));
        record(
            &log,
            Stage::Started,
            None,
            Some(format!("selected={} confirmed={confirmed}", selected.len())),
        );

        let mut dispositions: Vec<(usize, Disposition)> = if confirmed {
            if live_selected.is_empty() {
                Vec::new()
            } else {
                let prepared = self.prepare_all(inventory, &live_selected, &session_id, &log)?;
                self.delete_ready(inventory, prepared, &session_id, &log)
            }
        } else {
            live_selected
                .iter()
                .map(|&idx| (idx, Disposition::NotConfirmed))
                .collect()
        };
        dispositions.extend(
            already_cleaned
                .into_iter()
                .map(|idx| (idx, Disposition::AlreadyCleaned)),
        );
        dispositions.sort_by_key(|(idx, _)| *idx);

        let mut cleaned_items = Vec::with_capacity(dispositions.len());
        let mut total_bytes_saved = 0u64;
        for (idx, disposition) in dispositions {
            let item = &mut inventory[idx];
            let bytes_reclaimed = if disposition.is_removed() {
                item.mark_cleaned();
                item.size()
            } else {
                if !matches!(disposition, Disposition::AlreadyCleaned) {
                    record(
                        &log,
                        Stage::Excluded,
                        Some(&*item),
                        Some(disposition.reason().unwrap_or(disposition.label()).to_string()),
                    );
                    self.activity.send(ActivityEvent::ItemExcluded {
                        session: session_id.clone(),
                        path: item.path().to_path_buf(),
                        disposition: disposition.label().to_string(),
                        reason: disposition.reason().map(str::to_string),
                    });
                }
                0
            };
            total_bytes_saved += bytes_reclaimed;
            cleaned_items.push(ItemOutcome {
                item: item.clone(),
                disposition,
                bytes_reclaimed,
            });
        }

        let report = ReportData {
            session_id: session_id.clone(),
            initial_score,
            final_score: 0,
            cleaned_items,
            inventory_before,
            total_bytes_saved,
            timestamp: Utc::now(),
        };
        let final_score = self.score_model.score_counts(&report.inventory_after());
        let report = ReportData {
            final_score,
            ..report
        };

        let removed = report.removed_items().count();
        record(
            &log,
            Stage::Committed,
            None,
            Some(format!(
                "removed={removed} bytes={total_bytes_saved} score={initial_score}->{final_score} elapsed_ms={}",
                started.elapsed().as_millis()
            )),
        );
        match Arc::try_unwrap(log) {
            Ok(log) => {
                if let Err(err) = log.into_inner().finish() {
                    eprintln!("[PSW-CLEANUP] operation log not synced: {err}");
                }
            }
            Err(_) => eprintln!("[PSW-CLEANUP] operation log still shared at commit"),
        }

        self.activity.send(ActivityEvent::SessionCommitted {
            session: session_id,
            initial_score,
            final_score,
            removed,
            bytes_saved: total_bytes_saved,
        });
        Ok(report)
    }

    // ──────────────────── pool stage ────────────────────

    /// Pending → BackingUp → Verifying for every selected item.
    fn prepare_all(
        &self,
        inventory: &[PrivacyItem],
        selected: &[usize],
        session: &str,
        log: &SharedLog,
    ) -> Result<Vec<(usize, Prepared)>> {
        let workers = self.options.parallelism.max(1).min(selected.len().max(1));
        let (work_tx, work_rx) = channel::bounded::<(usize, PrivacyItem)>(workers * 2);
        let (out_tx, out_rx) = channel::unbounded::<(usize, Prepared)>();

        let mut handles = Vec::with_capacity(workers);
        for worker in 0..workers {
            let ctx = CopyWorker {
                work_rx: work_rx.clone(),
                out_tx: out_tx.clone(),
                source: Arc::clone(&self.source),
                store: Arc::clone(&self.store),
                log: Arc::clone(log),
                activity: self.activity.clone(),
                session: session.to_string(),
                chunk_bytes: self.options.hash_chunk_bytes,
                #[cfg(test)]
                after_store: self.after_store,
            };
            let handle = thread::Builder::new()
                .name(format!("psw-clean-{worker}"))
                .spawn(move || ctx.run())
                .map_err(|err| PswError::Runtime {
                    details: format!("failed to spawn cleanup worker: {err}"),
                })?;
            handles.push(handle);
        }
        drop(out_tx);
        drop(work_rx);

        for &idx in selected {
            if work_tx.send((idx, inventory[idx].clone())).is_err() {
                break;
            }
        }
        drop(work_tx);

        let mut results: Vec<(usize, Prepared)> = out_rx.iter().collect();
        for handle in handles {
            let _ = handle.join();
        }

        // A worker that died mid-item leaves no result; exclude those items.
        for &idx in selected {
            if !results.iter().any(|(i, _)| *i == idx) {
                results.push((
                    idx,
                    Prepared::Settled(Disposition::BackupFailed {
                        reason: "cleanup worker stopped unexpectedly".to_string(),
                    }),
                ));
            }
        }
        Ok(results)
    }

    // ──────────────────── delete stage ────────────────────

    /// Deleting → Removed for every `Ready` item, one at a time under the
    /// store lock. Returns a disposition for every prepared item.
    fn delete_ready(
        &self,
        inventory: &[PrivacyItem],
        prepared: Vec<(usize, Prepared)>,
        session: &str,
        log: &SharedLog,
    ) -> Vec<(usize, Disposition)> {
        let mut out: Vec<(usize, Disposition)> = Vec::with_capacity(prepared.len());
        let mut ready: Vec<usize> = Vec::new();
        for (idx, p) in prepared {
            match p {
                Prepared::Ready => ready.push(idx),
                Prepared::Settled(d) => out.push((idx, d)),
            }
        }
        if ready.is_empty() {
            return out;
        }

        let lock = match self.store.lock() {
            Ok(lock) => lock,
            Err(err) => {
                let reason = format!("backup store lock unavailable: {err}");
                out.extend(ready.into_iter().map(|idx| {
                    (
                        idx,
                        Disposition::DeleteFailed {
                            reason: reason.clone(),
                        },
                    )
                }));
                return out;
            }
        };

        ready.sort_unstable();
        for idx in ready {
            let item = &inventory[idx];
            record(log, Stage::Deleting, Some(item), None);
            let disposition = match self.source.remove(item.path()) {
                Ok(()) => {
                    record(log, Stage::Removed, Some(item), None);
                    self.activity.send(ActivityEvent::ArtifactRemoved {
                        session: session.to_string(),
                        path: item.path().to_path_buf(),
                        category: item.category().key().to_string(),
                        size: item.size(),
                    });
                    Disposition::Removed
                }
                Err(err) => Disposition::DeleteFailed {
                    reason: format!("{err} (backup kept)"),
                },
            };
            out.push((idx, disposition));
        }
        drop(lock);
        out
    }
}

// ──────────────────── copy/verify worker ────────────────────

/// One `psw-clean-N` thread: takes items off the work queue and reports a
/// [`Prepared`] for each.
struct CopyWorker {
    work_rx: channel::Receiver<(usize, PrivacyItem)>,
    out_tx: channel::Sender<(usize, Prepared)>,
    source: Arc<dyn ArtifactSource>,
    store: Arc<BackupStore>,
    log: SharedLog,
    activity: ActivityLogger,
    session: String,
    chunk_bytes: usize,
    #[cfg(test)]
    after_store: Option<StoredHook>,
}

impl CopyWorker {
    /// Drain the work queue. Exits when the queue closes or the executor
    /// stops listening.
    fn run(self) {
        for (idx, item) in &self.work_rx {
            let prepared = self.prepare(&item);
            if self.out_tx.send((idx, prepared)).is_err() {
                return;
            }
        }
    }

    /// Pending → BackingUp → Verifying for one item.
    ///
    /// A hash mismatch while storing means the file changed after the
    /// pending check and is drift. A verify failure is `BackupCorrupt`; the
    /// original stays in place either way.
    fn prepare(&self, item: &PrivacyItem) -> Prepared {
        record(&self.log, Stage::Pending, Some(item), None);
        if let Some(settled) = self.check_pending(item) {
            return Prepared::Settled(settled);
        }

        record(&self.log, Stage::BackingUp, Some(item), None);
        let stored = self
            .source
            .open(item.path())
            .map_err(|e| PswError::io(item.path(), e))
            .and_then(|mut reader| {
                self.store
                    .store(item.path(), reader.as_mut(), item.fingerprint())
            });
        match stored {
            Ok(blob) => {
                #[cfg(test)]
                {
                    if let Some(hook) = self.after_store {
                        hook(&self.store, &blob.fingerprint);
                    }
                }
                self.activity.send(ActivityEvent::ArtifactBackedUp {
                    session: self.session.clone(),
                    path: item.path().to_path_buf(),
                    fingerprint: blob.fingerprint,
                    size: blob.bytes,
                });
            }
            Err(PswError::BackupIntegrity { details, .. }) => {
                return Prepared::Settled(Disposition::DriftDetected {
                    reason: format!("changed while backing up: {details}"),
                });
            }
            Err(err) => {
                return Prepared::Settled(Disposition::BackupFailed {
                    reason: err.to_string(),
                });
            }
        }

        record(&self.log, Stage::Verifying, Some(item), None);
        match self.store.verify(item.fingerprint()) {
            Ok(bytes) if bytes == item.size() => Prepared::Ready,
            Ok(bytes) => Prepared::Settled(Disposition::BackupCorrupt {
                reason: format!("backup holds {bytes} bytes, expected {}", item.size()),
            }),
            Err(err) => Prepared::Settled(Disposition::BackupCorrupt {
                reason: err.to_string(),
            }),
        }
    }

    /// Re-stat and re-hash the original. `None` means unchanged since the scan.
    ///
    /// Only items not yet cleaned get here, so an absent path is always drift,
    /// whether or not a blob with the same content sits in the store.
    fn check_pending(&self, item: &PrivacyItem) -> Option<Disposition> {
        let stat = match self.source.lstat(item.path()) {
            Ok(stat) => stat,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Some(Disposition::DriftDetected {
                    reason: "path no longer exists".to_string(),
                });
            }
            Err(err) => {
                return Some(Disposition::BackupFailed {
                    reason: PswError::io(item.path(), err).to_string(),
                });
            }
        };
        if stat.kind != EntryKind::File {
            return Some(Disposition::DriftDetected {
                reason: "no longer a regular file".to_string(),
            });
        }
        if stat.size != item.size() {
            return Some(Disposition::DriftDetected {
                reason: format!("size changed from {} to {}", item.size(), stat.size),
            });
        }

        let never = CancellationToken::new();
        let outcome = self
            .source
            .open(item.path())
            .and_then(|mut reader| hash_stream(reader.as_mut(), self.chunk_bytes, 0, &never));
        match outcome {
            Ok(HashOutcome::Complete { fingerprint, .. }) if fingerprint == item.fingerprint() => {
                None
            }
            Ok(HashOutcome::Complete { .. }) => Some(Disposition::DriftDetected {
                reason: "content fingerprint changed since scan".to_string(),
            }),
            Ok(HashOutcome::Cancelled) => Some(Disposition::BackupFailed {
                reason: "hash interrupted".to_string(),
            }),
            Err(err) => Some(Disposition::BackupFailed {
                reason: PswError::io(item.path(), err).to_string(),
            }),
        }
    }
}

// ──────────────────── helpers ────────────────────

fn record(log: &SharedLog, stage: Stage, item: Option<&PrivacyItem>, detail: Option<String>) {
    if let Err(err) = log.lock().record(stage, item, detail) {
        eprintln!("[PSW-CLEANUP] operation log write failed: {err}");
    }
}

fn new_session_id() -> String {
    format!(
        "{}-{:08x}",
        Utc::now().format("%Y%m%dT%H%M%SZ"),
        rand::random::<u32>()
    )
}
