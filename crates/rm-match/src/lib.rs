//! # rm-match
//!
//! Acoustic fingerprint matching of remastered audio against original references.
//!
//! ## Features
//!
//! - **Ingest**: decode, mono, 16 kHz, silence trim, peak normalization
//! - **Fingerprints**: chroma (pitch-class energy) and mel-cepstral timbre
//! - **Scoring**: DTW-aligned chroma distance plus mean-timbre cosine similarity
//! - **Selection**: stable ranking with an inclusive confidence threshold
//! - **Worker**: background two-phase run with progress events and stop
//!
//! ## Example
//!
//! ```rust,ignore
//! use rm_match::{MatchConfig, MatchWorker, WorkerEvent, scan_audio_files};
//!
//! let worker = MatchWorker::new(
//!     scan_audio_files("originals"),
//!     scan_audio_files("remasters"),
//!     MatchConfig::default(),
//! );
//! let handle = worker.spawn()?;
//!
//! for event in handle.events().iter() {
//!     if let WorkerEvent::QueryFinished(record) = &event {
//!         println!("{} -> {} ({:.2})", record.query_name, record.matched, record.similarity);
//!     }
//!     if event.is_terminal() {
//!         break;
//!     }
//! }
//! ```

pub mod config;
pub mod error;
pub mod features;
pub mod index;
pub mod ingest;
pub mod report;
pub mod scan;
pub mod selector;
pub mod similarity;
pub mod spectral;
pub mod worker;

pub use config::MatchConfig;
pub use error::{MatchError, MatchResult};
pub use features::{FeatureExtractor, FeatureSet, MinimalFeatures};
pub use index::{ReferenceEntry, ReferenceIndex};
pub use ingest::{AudioFileInfo, AudioIngest, AudioSample};
pub use report::{ConfidenceTier, MatchRecord, MatchReport, ReportFormat, format_duration};
pub use scan::{SUPPORTED_EXTENSIONS, scan_audio_files};
pub use selector::{ComparisonResult, MatchOutcome, MatchSelector, MatchStatus};
pub use similarity::{ScoreBreakdown, SimilarityScorer};
pub use worker::{MatchWorker, WorkerEvent, WorkerHandle, WorkerStage, WorkerSummary};

/// Fingerprint two files and score them with default settings
pub fn quick_compare(query_path: &str, reference_path: &str) -> MatchResult<ScoreBreakdown> {
    let config = MatchConfig::default();
    let extractor = FeatureExtractor::new(&config)?;

    let query = extractor.extract(&AudioIngest::load(query_path, &config)?)?;
    let reference = extractor.extract(&AudioIngest::load(reference_path, &config)?)?;

    Ok(SimilarityScorer::new(&config).score_detailed(&query, &reference))
}
