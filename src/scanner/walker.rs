//! Parallel directory walker over an [`ArtifactSource`].
//!
//! Workers share one bounded work queue of directories and stream candidate
//! files (already assigned a category) to a single result channel. Symlinks
//! are never followed or reported; depth is bounded from each walk root.

#![allow(missing_docs)]

use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use crossbeam_channel as channel;

use crate::core::cancel::CancellationToken;
use crate::core::errors::{PswError, Result};
use crate::core::model::Category;
use crate::scanner::classify::PatternSet;
use crate::scanner::source::{ArtifactSource, EntryKind};

/// Capacity of the shared directory queue. Children past this stay on the
/// discovering worker's local stack.
const WORK_QUEUE_CAPACITY: usize = 4096;

/// Idle wait before a worker re-checks whether the walk has drained.
const IDLE_POLL: Duration = Duration::from_millis(50);

/// Walker tuning, normally taken from `[scanner]`.
#[derive(Debug, Clone, Copy)]
pub struct WalkerConfig {
    /// Directory levels below a walk root that are still listed.
    pub max_depth: usize,
    /// Number of `psw-walk-N` threads.
    pub parallelism: usize,
}

/// Regular file matched by some pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub path: PathBuf,
    pub category: Category,
}

/// One streamed walk result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalkEvent {
    /// A regular file some pattern claims.
    Candidate(Candidate),
    /// Directory or root that could not be read.
    Skipped { path: PathBuf, details: String },
}

/// Item in the work queue: (directory, depth below its walk root).
type WorkItem = (PathBuf, usize);

/// Walks the roots of a [`PatternSet`] with a pool of worker threads.
///
/// The walker itself is cheap; each [`stream`](Self::stream) call starts a
/// fresh set of threads over the same source and patterns.
pub struct DirectoryWalker {
    config: WalkerConfig,
    source: Arc<dyn ArtifactSource>,
    patterns: Arc<PatternSet>,
    token: CancellationToken,
    discovered: Arc<AtomicUsize>,
}

impl DirectoryWalker {
    pub fn new(
        config: WalkerConfig,
        source: Arc<dyn ArtifactSource>,
        patterns: Arc<PatternSet>,
        token: CancellationToken,
    ) -> Self {
        Self {
            config,
            source,
            patterns,
            token,
            discovered: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Counter of candidates emitted so far.
    pub fn discovered(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.discovered)
    }

    /// Walk everything and collect the events.
    pub fn walk(&self) -> Result<Vec<WalkEvent>> {
        Ok(self.stream()?.into_iter().collect())
    }

    /// Stream events as they are discovered. The walk runs in background
    /// threads; the receiver disconnects once every worker has exited.
    pub fn stream(&self) -> Result<channel::Receiver<WalkEvent>> {
        let parallelism = self.config.parallelism.max(1);
        let (work_tx, work_rx) = channel::bounded::<WorkItem>(WORK_QUEUE_CAPACITY);
        let (result_tx, result_rx) = channel::unbounded::<WalkEvent>();
        let in_flight = Arc::new(AtomicUsize::new(0));
        let mut overflow: Vec<WorkItem> = Vec::new();

        for root in self.patterns.walk_roots() {
            if self.token.is_cancelled() {
                break;
            }
            let stat = match self.source.lstat(&root) {
                Ok(stat) => stat,
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => {
                    let _ = result_tx.send(WalkEvent::Skipped {
                        path: root,
                        details: err.to_string(),
                    });
                    continue;
                }
            };
            match stat.kind {
                EntryKind::Dir => {
                    in_flight.fetch_add(1, Ordering::Release);
                    if let Err(channel::TrySendError::Full(item)) = work_tx.try_send((root, 0)) {
                        overflow.push(item);
                    }
                }
                EntryKind::File => {
                    if let Some(category) = self.patterns.classify(&root) {
                        self.discovered.fetch_add(1, Ordering::Release);
                        let _ = result_tx.send(WalkEvent::Candidate(Candidate {
                            path: root,
                            category,
                        }));
                    }
                }
                EntryKind::Symlink | EntryKind::Other => {}
            }
        }

        for worker in 0..parallelism {
            let ctx = WorkerContext {
                work_rx: work_rx.clone(),
                work_tx: work_tx.clone(),
                result_tx: result_tx.clone(),
                in_flight: Arc::clone(&in_flight),
                discovered: Arc::clone(&self.discovered),
                config: self.config,
                source: Arc::clone(&self.source),
                patterns: Arc::clone(&self.patterns),
                token: self.token.clone(),
            };
            // Roots that did not fit the queue go to the first worker.
            let local = if worker == 0 {
                std::mem::take(&mut overflow)
            } else {
                Vec::new()
            };
            thread::Builder::new()
                .name(format!("psw-walk-{worker}"))
                .spawn(move || ctx.run(local))
                .map_err(|err| PswError::Runtime {
                    details: format!("failed to spawn walker thread: {err}"),
                })?;
        }

        Ok(result_rx)
    }
}

/// State owned by one walker thread.
///
/// `in_flight` counts directories queued or being processed across all
/// workers; the walk is over once it reaches zero with an empty queue.
struct WorkerContext {
    work_rx: channel::Receiver<WorkItem>,
    work_tx: channel::Sender<WorkItem>,
    result_tx: channel::Sender<WalkEvent>,
    in_flight: Arc<AtomicUsize>,
    discovered: Arc<AtomicUsize>,
    config: WalkerConfig,
    source: Arc<dyn ArtifactSource>,
    patterns: Arc<PatternSet>,
    token: CancellationToken,
}

impl WorkerContext {
    /// Pull directories until the queue drains or the walk is cancelled.
    ///
    /// Children that do not fit the shared queue stay on this worker's local
    /// stack and remain counted in `in_flight`.
    fn run(self, mut local: Vec<WorkItem>) {
        loop {
            if self.token.is_cancelled() {
                return;
            }
            let item = if let Some(item) = local.pop() {
                item
            } else {
                match self.work_rx.recv_timeout(IDLE_POLL) {
                    Ok(item) => item,
                    Err(channel::RecvTimeoutError::Timeout) => {
                        if self.in_flight.load(Ordering::Acquire) == 0 {
                            return;
                        }
                        continue;
                    }
                    Err(channel::RecvTimeoutError::Disconnected) => return,
                }
            };
            self.process_directory(item, &mut local);
            self.in_flight.fetch_sub(1, Ordering::AcqRel);
        }
    }

    /// List one directory: emit its matching files and queue every child
    /// directory that is within depth and may hold matches.
    ///
    /// A vanished directory is dropped silently; any other listing error is
    /// reported as [`WalkEvent::Skipped`].
    fn process_directory(&self, (dir, depth): WorkItem, local: &mut Vec<WorkItem>) {
        if self.patterns.is_excluded(&dir) {
            return;
        }

        let entries = match self.source.list_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return,
            Err(err) => {
                let _ = self.result_tx.send(WalkEvent::Skipped {
                    path: dir,
                    details: err.to_string(),
                });
                return;
            }
        };

        let mut pending_children: Vec<PathBuf> = Vec::new();
        for entry in entries {
            if self.token.is_cancelled() {
                return;
            }
            match entry.kind {
                EntryKind::File => {
                    if let Some(category) = self.patterns.classify(&entry.path) {
                        self.discovered.fetch_add(1, Ordering::Release);
                        let _ = self.result_tx.send(WalkEvent::Candidate(Candidate {
                            path: entry.path,
                            category,
                        }));
                    }
                }
                EntryKind::Dir => {
                    if depth < self.config.max_depth && self.patterns.should_descend(&entry.path)
                    {
                        pending_children.push(entry.path);
                    }
                }
                EntryKind::Symlink | EntryKind::Other => {}
            }
        }

        for child in pending_children {
            self.in_flight.fetch_add(1, Ordering::Release);
            match self.work_tx.try_send((child, depth + 1)) {
                Ok(()) => {}
                Err(channel::TrySendError::Full(item)) => local.push(item),
                Err(channel::TrySendError::Disconnected(_)) => {
                    self.in_flight.fetch_sub(1, Ordering::Release);
                }
            }
        }
    }
}
