//! Configuration for fingerprint extraction and matching

use crate::error::{MatchError, MatchResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Frequency of C1 in Hz (lowest constant-Q bin)
pub const C1_HZ: f32 = 32.703_197;

/// Configuration for ingest, feature extraction and matching
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    /// Sample rate every file is resampled to (Hz)
    pub target_sample_rate: u32,

    /// Only the first N seconds of each file are fingerprinted
    pub max_duration_secs: f64,

    /// Silence trim threshold, dB below the loudest frame
    pub trim_top_db: f32,

    /// Frame length for silence detection (samples)
    pub trim_frame_length: usize,

    /// Hop length for silence detection (samples)
    pub trim_hop_length: usize,

    /// Feature hop length (samples)
    pub hop_length: usize,

    /// FFT window size (power of 2)
    pub n_fft: usize,

    /// Number of pitch classes
    pub n_chroma: usize,

    /// Constant-Q resolution before folding to pitch classes
    pub bins_per_octave: usize,

    /// Octaves covered by the constant-Q filterbank
    pub n_octaves: usize,

    /// Lowest constant-Q frequency (Hz)
    pub chroma_fmin: f32,

    /// Number of cepstral timbre coefficients
    pub n_timbre: usize,

    /// Mel bands feeding the cepstrum
    pub n_mels: usize,

    /// Hop length for the minimal feature variant (samples)
    pub minimal_hop_length: usize,

    /// Decay constant mapping DTW distance to a score: 1 / (1 + d / decay)
    pub dtw_decay: f64,

    /// Epsilon added to cosine distances and mean vectors
    pub similarity_epsilon: f64,

    /// Minimum similarity reported as a match (inclusive)
    pub threshold: f64,

    /// Files per progress/memory-release batch
    pub batch_size: usize,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            target_sample_rate: 16_000,
            max_duration_secs: 60.0,
            trim_top_db: 25.0,
            trim_frame_length: 2048,
            trim_hop_length: 512,
            hop_length: 1024,
            n_fft: 2048,
            n_chroma: 12,
            bins_per_octave: 24,
            n_octaves: 7,
            chroma_fmin: C1_HZ,
            n_timbre: 8,
            n_mels: 128,
            minimal_hop_length: 2048,
            dtw_decay: 100.0,
            similarity_epsilon: 1e-9,
            threshold: 0.35,
            batch_size: 5,
        }
    }
}

impl MatchConfig {
    /// Stricter matching (fewer false positives)
    pub fn strict() -> Self {
        Self {
            threshold: 0.40,
            ..Default::default()
        }
    }

    /// Looser matching for heavily processed remasters
    pub fn lenient() -> Self {
        Self {
            threshold: 0.30,
            ..Default::default()
        }
    }

    /// Builder pattern: set match threshold
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Builder pattern: set fingerprint duration
    pub fn with_max_duration(mut self, secs: f64) -> Self {
        self.max_duration_secs = secs;
        self
    }

    /// Builder pattern: set batch size
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Builder pattern: set silence trim threshold
    pub fn with_trim_top_db(mut self, db: f32) -> Self {
        self.trim_top_db = db;
        self
    }

    /// Check that the configuration is usable
    pub fn validate(&self) -> MatchResult<()> {
        let fail = |msg: String| Err(MatchError::InvalidConfig(msg));

        if self.target_sample_rate == 0 {
            return fail("target sample rate must be positive".into());
        }
        if !(self.max_duration_secs > 0.0) {
            return fail(format!("max duration must be positive, got {}", self.max_duration_secs));
        }
        if !self.n_fft.is_power_of_two() {
            return fail(format!("FFT size must be power of 2, got {}", self.n_fft));
        }
        if self.hop_length == 0 || self.hop_length > self.n_fft {
            return fail(format!(
                "hop length must be in 1..={}, got {}",
                self.n_fft, self.hop_length
            ));
        }
        if self.minimal_hop_length == 0 {
            return fail("minimal hop length must be positive".into());
        }
        if self.trim_frame_length == 0 || self.trim_hop_length == 0 {
            return fail("trim frame and hop lengths must be positive".into());
        }
        if self.n_chroma == 0 || self.bins_per_octave % self.n_chroma != 0 {
            return fail(format!(
                "bins per octave ({}) must be a multiple of the chroma count ({})",
                self.bins_per_octave, self.n_chroma
            ));
        }
        if self.n_octaves == 0 || !(self.chroma_fmin > 0.0) {
            return fail("constant-Q range must be non-empty".into());
        }
        if self.n_timbre == 0 || self.n_mels < self.n_timbre {
            return fail(format!(
                "need at least as many mel bands ({}) as timbre coefficients ({})",
                self.n_mels, self.n_timbre
            ));
        }
        if !(self.dtw_decay > 0.0) {
            return fail("DTW decay must be positive".into());
        }
        if !(0.0..=1.0).contains(&self.threshold) {
            return fail(format!("threshold must be in [0, 1], got {}", self.threshold));
        }
        if self.batch_size == 0 {
            return fail("batch size must be positive".into());
        }
        Ok(())
    }

    /// Load a configuration from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> MatchResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| MatchError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save the configuration as pretty JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> MatchResult<()> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| MatchError::Export(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Number of source frames kept by the duration cap
    pub fn max_frames(&self, sample_rate: u32) -> usize {
        (self.max_duration_secs * sample_rate as f64).ceil() as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MatchConfig::default();
        assert_eq!(config.target_sample_rate, 16_000);
        assert_eq!(config.hop_length, 1024);
        assert_eq!(config.n_timbre, 8);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_presets() {
        assert_eq!(MatchConfig::strict().threshold, 0.40);
        assert_eq!(MatchConfig::lenient().threshold, 0.30);
    }

    #[test]
    fn test_builder_pattern() {
        let config = MatchConfig::default()
            .with_threshold(0.5)
            .with_max_duration(30.0)
            .with_batch_size(10);

        assert_eq!(config.threshold, 0.5);
        assert_eq!(config.max_duration_secs, 30.0);
        assert_eq!(config.batch_size, 10);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(MatchConfig::default().with_threshold(1.5).validate().is_err());
        assert!(MatchConfig::default().with_batch_size(0).validate().is_err());

        let config = MatchConfig {
            n_fft: 2000,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = MatchConfig {
            bins_per_octave: 30,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let config = MatchConfig::strict().with_max_duration(45.0);
        config.save(&path).unwrap();

        let loaded = MatchConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: MatchConfig = serde_json::from_str(r#"{ "threshold": 0.4 }"#).unwrap();
        assert_eq!(config.threshold, 0.4);
        assert_eq!(config.n_fft, 2048);
    }
}
