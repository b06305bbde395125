//! Scan pipeline: walk pool → hash pool → single aggregator.
//!
//! The walker classifies matching files and streams them to a bounded pool of
//! hash workers. Each worker builds one entry (stat, probe, fingerprint) and
//! moves it to the aggregator running on the caller's thread, which assigns
//! ids, derives risk and reports progress.

#![allow(missing_docs)]
#![allow(clippy::cast_possible_truncation)]

use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::{Instant, SystemTime};

use chrono::{DateTime, Utc};
use crossbeam_channel as channel;
use serde::{Deserialize, Serialize};

use crate::core::cancel::CancellationToken;
use crate::core::config::ScannerConfig;
use crate::core::errors::{PswError, Result};
use crate::core::model::{Category, PrivacyItem, ScanResult};
use crate::platform::os::Os;
use crate::risk::policy::RiskPolicy;
use crate::risk::scoring::ScoreModel;
use crate::scanner::classify::{
    METADATA_PROBE_BYTES, PatternSet, has_embedded_metadata, has_image_extension,
};
use crate::scanner::fingerprint::{HashOutcome, hash_stream};
use crate::scanner::source::{ArtifactSource, EntryKind};
use crate::scanner::walker::{Candidate, DirectoryWalker, WalkEvent, WalkerConfig};

/// Progress stream for one scan. Append-only; `Finished` is always last.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ScanEvent {
    Started {
        os: Os,
        roots: usize,
        patterns: usize,
    },
    Progress {
        items_found: usize,
        entries_skipped: usize,
        percent: u8,
    },
    EntrySkipped {
        path: PathBuf,
        details: String,
    },
    Finished {
        items: usize,
        skipped: usize,
        cancelled: bool,
        duration_ms: u64,
    },
}

/// Pool sizes and limits for one scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanOptions {
    pub walk_parallelism: usize,
    pub hash_parallelism: usize,
    pub max_depth: usize,
    pub hash_chunk_bytes: usize,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self::from(&ScannerConfig::default())
    }
}

impl From<&ScannerConfig> for ScanOptions {
    fn from(config: &ScannerConfig) -> Self {
        Self {
            walk_parallelism: config.walk_parallelism,
            hash_parallelism: config.hash_parallelism,
            max_depth: config.max_depth,
            hash_chunk_bytes: config.hash_chunk_bytes,
        }
    }
}

/// Entry fully built by one hash worker.
#[derive(Debug)]
struct HashedEntry {
    path: PathBuf,
    category: Category,
    size: u64,
    modified: SystemTime,
    fingerprint: String,
}

#[derive(Debug)]
enum PipelineMsg {
    Hashed(HashedEntry),
    Skipped { path: PathBuf, details: String },
}

/// Drives one scan over an artifact source.
pub struct Scanner {
    options: ScanOptions,
    source: Arc<dyn ArtifactSource>,
    policy: RiskPolicy,
    score_model: ScoreModel,
}

impl Scanner {
    pub fn new(
        options: ScanOptions,
        source: Arc<dyn ArtifactSource>,
        policy: RiskPolicy,
        score_model: ScoreModel,
    ) -> Self {
        Self {
            options,
            source,
            policy,
            score_model,
        }
    }

    /// Run a scan to completion (or cancellation) on the calling thread.
    ///
    /// A cancelled scan returns the items completed so far with
    /// `cancelled = true`; a file whose hash was interrupted is dropped.
    pub fn scan(
        &self,
        os: Os,
        patterns: PatternSet,
        token: &CancellationToken,
        on_event: &mut dyn FnMut(ScanEvent),
    ) -> Result<ScanResult> {
        let started = Instant::now();
        let patterns = Arc::new(patterns);
        on_event(ScanEvent::Started {
            os,
            roots: patterns.walk_roots().len(),
            patterns: patterns.len(),
        });

        let walker = DirectoryWalker::new(
            WalkerConfig {
                max_depth: self.options.max_depth,
                parallelism: self.options.walk_parallelism,
            },
            Arc::clone(&self.source),
            Arc::clone(&patterns),
            token.clone(),
        );
        let discovered = walker.discovered();
        let walk_rx = walker.stream()?;

        let walk_done = Arc::new(AtomicBool::new(false));
        let processed = Arc::new(AtomicUsize::new(0));
        let (out_tx, out_rx) = channel::unbounded::<PipelineMsg>();

        for worker in 0..self.options.hash_parallelism.max(1) {
            let ctx = HashWorker {
                walk_rx: walk_rx.clone(),
                out_tx: out_tx.clone(),
                source: Arc::clone(&self.source),
                token: token.clone(),
                chunk_bytes: self.options.hash_chunk_bytes,
                walk_done: Arc::clone(&walk_done),
                processed: Arc::clone(&processed),
            };
            thread::Builder::new()
                .name(format!("psw-hash-{worker}"))
                .spawn(move || ctx.run())
                .map_err(|err| PswError::Runtime {
                    details: format!("failed to spawn hash worker: {err}"),
                })?;
        }
        drop(out_tx);
        drop(walk_rx);

        let mut items: Vec<PrivacyItem> = Vec::new();
        let mut ids: HashSet<String> = HashSet::new();
        let mut skipped = 0usize;
        let mut last_percent = 0u8;

        for msg in &out_rx {
            match msg {
                PipelineMsg::Hashed(entry) => {
                    let id = unique_id(&mut ids);
                    let risk = self.policy.classify(entry.category);
                    items.push(PrivacyItem::new(
                        id,
                        entry.path,
                        entry.category,
                        entry.size,
                        risk,
                        DateTime::<Utc>::from(entry.modified),
                        entry.fingerprint,
                    ));
                }
                PipelineMsg::Skipped { path, details } => {
                    skipped += 1;
                    on_event(ScanEvent::EntrySkipped { path, details });
                }
            }
            let percent = progress_percent(
                processed.load(Ordering::Acquire),
                discovered.load(Ordering::Acquire),
                walk_done.load(Ordering::Acquire),
            )
            .max(last_percent);
            last_percent = percent;
            on_event(ScanEvent::Progress {
                items_found: items.len(),
                entries_skipped: skipped,
                percent,
            });
        }

        let cancelled = token.is_cancelled();
        items.sort_by(|a, b| {
            a.category()
                .cmp(&b.category())
                .then_with(|| a.path().cmp(b.path()))
        });
        let score = self.score_model.score(&items);
        let duration = started.elapsed();

        if !cancelled {
            on_event(ScanEvent::Progress {
                items_found: items.len(),
                entries_skipped: skipped,
                percent: 100,
            });
        }
        on_event(ScanEvent::Finished {
            items: items.len(),
            skipped,
            cancelled,
            duration_ms: duration.as_millis() as u64,
        });

        Ok(ScanResult::new(
            items, score, os, cancelled, skipped, duration,
        ))
    }
}

/// Percent of discovered candidates processed, capped at 99 until the walk
/// has finished.
fn progress_percent(processed: usize, discovered: usize, walk_done: bool) -> u8 {
    if discovered == 0 {
        return if walk_done { 100 } else { 0 };
    }
    let pct = (processed.min(discovered) * 100 / discovered) as u8;
    if walk_done { pct } else { pct.min(99) }
}

fn unique_id(taken: &mut HashSet<String>) -> String {
    loop {
        let id = format!("{:016x}", rand::random::<u64>());
        if taken.insert(id.clone()) {
            return id;
        }
    }
}

struct HashWorker {
    walk_rx: channel::Receiver<WalkEvent>,
    out_tx: channel::Sender<PipelineMsg>,
    source: Arc<dyn ArtifactSource>,
    token: CancellationToken,
    chunk_bytes: usize,
    walk_done: Arc<AtomicBool>,
    processed: Arc<AtomicUsize>,
}

impl HashWorker {
    fn run(self) {
        loop {
            if self.token.is_cancelled() {
                return;
            }
            let Ok(event) = self.walk_rx.recv() else {
                self.walk_done.store(true, Ordering::Release);
                return;
            };
            match event {
                WalkEvent::Candidate(candidate) => {
                    let msg = self.build(candidate);
                    self.processed.fetch_add(1, Ordering::AcqRel);
                    if let Some(msg) = msg
                        && self.out_tx.send(msg).is_err()
                    {
                        return;
                    }
                }
                WalkEvent::Skipped { path, details } => {
                    if self
                        .out_tx
                        .send(PipelineMsg::Skipped { path, details })
                        .is_err()
                    {
                        return;
                    }
                }
            }
        }
    }

    /// Stat, probe and fingerprint one candidate. `None` means the file is
    /// not an artifact (vanished, not regular, no metadata) or hashing was
    /// cancelled.
    fn build(&self, candidate: Candidate) -> Option<PipelineMsg> {
        let Candidate { path, category } = candidate;
        let is_image_probe = category == Category::ImageMetadata;
        if is_image_probe && !has_image_extension(&path) {
            return None;
        }

        let stat = match self.source.lstat(&path) {
            Ok(stat) => stat,
            Err(err) if err.kind() == ErrorKind::NotFound => return None,
            Err(err) => return Some(skipped(path, &err)),
        };
        if stat.kind != EntryKind::File {
            return None;
        }

        let mut reader = match self.source.open(&path) {
            Ok(reader) => reader,
            Err(err) if err.kind() == ErrorKind::NotFound => return None,
            Err(err) => return Some(skipped(path, &err)),
        };
        let head_limit = if is_image_probe { METADATA_PROBE_BYTES } else { 0 };
        match hash_stream(reader.as_mut(), self.chunk_bytes, head_limit, &self.token) {
            Ok(HashOutcome::Complete {
                fingerprint,
                bytes,
                head,
            }) => {
                if is_image_probe && !has_embedded_metadata(&head) {
                    return None;
                }
                Some(PipelineMsg::Hashed(HashedEntry {
                    path,
                    category,
                    size: bytes,
                    modified: stat.modified,
                    fingerprint,
                }))
            }
            Ok(HashOutcome::Cancelled) => None,
            Err(err) => Some(skipped(path, &err)),
        }
    }
}

fn skipped(path: PathBuf, err: &std::io::Error) -> PipelineMsg {
    let details = PswError::UnreadableEntry {
        path: path.clone(),
        details: err.to_string(),
    }
    .to_string();
    PipelineMsg::Skipped { path, details }
}
