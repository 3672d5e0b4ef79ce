//! Error types for fingerprint matching

use thiserror::Error;

/// Matching errors
///
/// Per-file kinds ([`MatchError::Decode`], [`MatchError::EmptySample`],
/// [`MatchError::Feature`]) are turned into skips by the worker. Everything
/// else ends a batch run.
#[derive(Error, Debug)]
pub enum MatchError {
    #[error("Failed to decode {path}: {reason}")]
    Decode { path: String, reason: String },

    #[error("Empty audio after trimming: {0}")]
    EmptySample(String),

    #[error("{channel} score failed: {reason}")]
    PartialScore { channel: &'static str, reason: String },

    #[error("No valid comparisons")]
    NoValidComparisons,

    #[error("Unknown reference: {0}")]
    UnknownReference(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Feature extraction failed: {0}")]
    Feature(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Export failed: {0}")]
    Export(String),

    #[error("Critical error: {0}")]
    Critical(String),
}

impl MatchError {
    /// Build a decode error for `path`
    pub fn decode(path: impl AsRef<std::path::Path>, reason: impl ToString) -> Self {
        Self::Decode {
            path: path.as_ref().display().to_string(),
            reason: reason.to_string(),
        }
    }

    /// Whether the error only concerns the file being processed
    pub fn is_per_file(&self) -> bool {
        matches!(self, Self::Decode { .. } | Self::EmptySample(_) | Self::Feature(_))
    }
}

/// Result type for matching operations
pub type MatchResult<T> = Result<T, MatchError>;
