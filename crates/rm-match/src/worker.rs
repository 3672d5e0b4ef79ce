//! Background matching worker
//!
//! Two phases on one thread:
//! 1. Fingerprint every reference file into the index (0-50 %)
//! 2. Fingerprint each remaster and select its best match (50-100 %)
//!
//! Files are processed one at a time. Stopping is cooperative and checked
//! between files; records finished before the stop are kept.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender};
use serde::{Deserialize, Serialize};

use crate::config::MatchConfig;
use crate::error::{MatchError, MatchResult};
use crate::features::{FeatureExtractor, FeatureSet};
use crate::index::ReferenceIndex;
use crate::ingest::AudioIngest;
use crate::report::MatchRecord;
use crate::selector::MatchSelector;

/// Failure reason when the reference phase produced nothing to compare against
pub const NO_REFERENCES: &str = "No valid reference files loaded";

// ═══════════════════════════════════════════════════════════════════════════════
// EVENTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Which phase a file belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerStage {
    Reference,
    Query,
}

impl std::fmt::Display for WorkerStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Reference => write!(f, "reference"),
            Self::Query => write!(f, "remaster"),
        }
    }
}

/// Notifications sent to the consumer
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    /// Emitted at file boundaries; 0-50 references, 50-100 queries
    Progress { percent: u8, message: String },

    /// A file could not be decoded or fingerprinted
    FileSkipped {
        path: PathBuf,
        stage: WorkerStage,
        reason: String,
    },

    /// One query has been matched
    QueryFinished(MatchRecord),

    /// Run ended normally or by request
    Finished {
        records: Vec<MatchRecord>,
        cancelled: bool,
    },

    /// Run aborted; carries the records completed before the failure
    Failed {
        reason: String,
        records: Vec<MatchRecord>,
    },
}

impl WorkerEvent {
    /// Whether this is the last event of a run
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished { .. } | Self::Failed { .. })
    }
}

/// What a run produced
#[derive(Debug, Clone, Default)]
pub struct WorkerSummary {
    pub records: Vec<MatchRecord>,
    pub cancelled: bool,
    /// Set when the run was aborted
    pub error: Option<String>,
    pub references_loaded: usize,
    pub skipped: usize,
}

impl WorkerSummary {
    pub fn is_success(&self) -> bool {
        self.error.is_none() && !self.cancelled
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// WORKER
// ═══════════════════════════════════════════════════════════════════════════════

/// Reference/query matching job
pub struct MatchWorker {
    references: Vec<PathBuf>,
    queries: Vec<PathBuf>,
    config: MatchConfig,
    index: Arc<ReferenceIndex>,
    running: Arc<AtomicBool>,
    sender: Sender<WorkerEvent>,
    receiver: Receiver<WorkerEvent>,
}

impl MatchWorker {
    /// Create a worker with a fresh reference index
    pub fn new(references: Vec<PathBuf>, queries: Vec<PathBuf>, config: MatchConfig) -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded();
        Self {
            references,
            queries,
            config,
            index: Arc::new(ReferenceIndex::new()),
            running: Arc::new(AtomicBool::new(true)),
            sender,
            receiver,
        }
    }

    /// Builder pattern: share an existing index
    pub fn with_index(mut self, index: Arc<ReferenceIndex>) -> Self {
        self.index = index;
        self
    }

    /// Event stream of this worker
    pub fn events(&self) -> Receiver<WorkerEvent> {
        self.receiver.clone()
    }

    pub fn index(&self) -> Arc<ReferenceIndex> {
        Arc::clone(&self.index)
    }

    /// Request a stop at the next file boundary (idempotent)
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Run on a dedicated background thread
    pub fn spawn(self) -> MatchResult<WorkerHandle> {
        let events = self.events();
        let running = Arc::clone(&self.running);
        let index = self.index();

        let thread = std::thread::Builder::new()
            .name("match-worker".into())
            .spawn(move || self.run())?;

        Ok(WorkerHandle {
            thread,
            events,
            running,
            index,
        })
    }

    /// Run both phases on the calling thread
    pub fn run(&self) -> WorkerSummary {
        let mut summary = WorkerSummary::default();

        match self.run_phases(&mut summary) {
            Ok(()) => {
                self.emit(WorkerEvent::Finished {
                    records: summary.records.clone(),
                    cancelled: summary.cancelled,
                });
            }
            Err(e) => {
                let reason = match e {
                    MatchError::Critical(reason) => reason,
                    other => other.to_string(),
                };
                log::error!("Matching aborted: {}", reason);
                self.emit(WorkerEvent::Failed {
                    reason: reason.clone(),
                    records: summary.records.clone(),
                });
                summary.error = Some(reason);
            }
        }

        summary
    }

    fn run_phases(&self, summary: &mut WorkerSummary) -> MatchResult<()> {
        self.config.validate()?;
        let extractor = FeatureExtractor::new(&self.config)?;
        let selector = MatchSelector::new(&self.config);

        // Phase 1: references
        if !self.load_references(&extractor, summary)? {
            summary.cancelled = true;
            return Ok(());
        }

        if self.index.is_empty() {
            return Err(MatchError::Critical(NO_REFERENCES.into()));
        }
        summary.references_loaded = self.index.len();
        self.progress(50, format!("Loaded {} reference files", self.index.len()));

        // Phase 2: queries
        if !self.match_queries(&extractor, &selector, summary)? {
            summary.cancelled = true;
            return Ok(());
        }

        self.progress(100, "Processing complete".into());
        Ok(())
    }

    /// Ok(false) when stopped
    fn load_references(&self, extractor: &FeatureExtractor, summary: &mut WorkerSummary) -> MatchResult<bool> {
        let total = self.references.len();

        for (batch_idx, batch) in self.references.chunks(self.config.batch_size).enumerate() {
            log::debug!("Reference batch {} ({} files)", batch_idx + 1, batch.len());

            for (offset, path) in batch.iter().enumerate() {
                if !self.is_running() {
                    log::info!("Stopped during reference loading");
                    return Ok(false);
                }

                let done = batch_idx * self.config.batch_size + offset;
                self.progress(
                    phase_percent(0, done, total),
                    format!("Loading reference {}/{}: {}", done + 1, total, display_name(path)),
                );

                match fingerprint(path, extractor) {
                    Ok(features) => {
                        let duration = AudioIngest::full_duration(path);
                        self.index.add_file(path, features, duration);
                    }
                    Err(e) if e.is_per_file() => self.skip(path, WorkerStage::Reference, &e, summary),
                    Err(e) => return Err(e),
                }
            }
        }

        Ok(true)
    }

    /// Ok(false) when stopped
    fn match_queries(
        &self,
        extractor: &FeatureExtractor,
        selector: &MatchSelector,
        summary: &mut WorkerSummary,
    ) -> MatchResult<bool> {
        let total = self.queries.len();

        for (batch_idx, batch) in self.queries.chunks(self.config.batch_size).enumerate() {
            log::debug!("Remaster batch {} ({} files)", batch_idx + 1, batch.len());

            for (offset, path) in batch.iter().enumerate() {
                if !self.is_running() {
                    log::info!("Stopped after {} of {} remasters", summary.records.len(), total);
                    return Ok(false);
                }

                let done = batch_idx * self.config.batch_size + offset;
                self.progress(
                    phase_percent(50, done, total),
                    format!("Processing {}/{}: {}", done + 1, total, display_name(path)),
                );

                match fingerprint(path, extractor) {
                    Ok(features) => {
                        let duration = AudioIngest::full_duration(path);
                        let outcome = selector.select_best(&features, &self.index, duration);
                        drop(features);

                        let record = MatchRecord::from_outcome(path, &outcome);
                        self.emit(WorkerEvent::QueryFinished(record.clone()));
                        summary.records.push(record);
                    }
                    Err(e) if e.is_per_file() => self.skip(path, WorkerStage::Query, &e, summary),
                    Err(e) => return Err(e),
                }
            }
        }

        Ok(true)
    }

    fn skip(&self, path: &Path, stage: WorkerStage, error: &MatchError, summary: &mut WorkerSummary) {
        log::warn!("Skipping {}: {}", display_name(path), error);
        summary.skipped += 1;
        self.emit(WorkerEvent::FileSkipped {
            path: path.to_path_buf(),
            stage,
            reason: error.to_string(),
        });
    }

    fn progress(&self, percent: u8, message: String) {
        log::debug!("[{:>3}%] {}", percent, message);
        self.emit(WorkerEvent::Progress { percent, message });
    }

    fn emit(&self, event: WorkerEvent) {
        // Nobody listening is fine
        let _ = self.sender.send(event);
    }
}

/// Decode and fingerprint one file; the decoded samples are dropped before returning
fn fingerprint(path: &Path, extractor: &FeatureExtractor) -> MatchResult<FeatureSet> {
    let sample = AudioIngest::load(path, extractor.config())?;
    let features = extractor.extract(&sample);
    drop(sample);

    features.map_err(|e| match e {
        MatchError::EmptySample(_) => MatchError::EmptySample(path.display().to_string()),
        MatchError::Feature(reason) => MatchError::Feature(format!("{}: {}", path.display(), reason)),
        other => other,
    })
}

fn phase_percent(base: u8, done: usize, total: usize) -> u8 {
    if total == 0 {
        return base;
    }
    base + ((done * 50) / total).min(50) as u8
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

// ═══════════════════════════════════════════════════════════════════════════════
// HANDLE
// ═══════════════════════════════════════════════════════════════════════════════

/// Handle to a spawned worker
pub struct WorkerHandle {
    thread: JoinHandle<WorkerSummary>,
    events: Receiver<WorkerEvent>,
    running: Arc<AtomicBool>,
    index: Arc<ReferenceIndex>,
}

impl WorkerHandle {
    pub fn events(&self) -> &Receiver<WorkerEvent> {
        &self.events
    }

    /// Request a stop at the next file boundary (idempotent)
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Reference index being built by the worker
    pub fn index(&self) -> Arc<ReferenceIndex> {
        Arc::clone(&self.index)
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Wait for the worker thread
    pub fn join(self) -> MatchResult<WorkerSummary> {
        self.thread
            .join()
            .map_err(|_| MatchError::Critical("match worker panicked".into()))
    }
}
