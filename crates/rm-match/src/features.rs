//! Feature extraction: chroma and cepstral timbre matrices
//!
//! Both channels share one Hann-windowed power spectrogram. Chroma folds a
//! log-frequency (constant-Q style) filterbank onto pitch classes; timbre is
//! a mel cepstrum truncated to a few coefficients.

use crate::config::MatchConfig;
use crate::error::{MatchError, MatchResult};
use crate::ingest::AudioSample;
use crate::spectral::{SpectralAnalyzer, power_to_db, spectral_centroid};
use ndarray::{Array2, Axis};

/// Power floor before taking logs
const AMIN: f32 = 1e-10;

/// Dynamic range kept in the log-mel spectrum (dB)
const TOP_DB: f32 = 80.0;

/// Time-collapsed features for very large batches
#[derive(Debug, Clone, PartialEq)]
pub struct MinimalFeatures {
    /// Per-coefficient mean of the timbre matrix
    pub timbre_mean: Vec<f32>,

    /// Mean spectral centroid (Hz)
    pub spectral_centroid: f32,
}

/// Feature channels for one file
///
/// A channel that is `None` is skipped by the scorer, never treated as zeros.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureSet {
    /// Pitch-class energy, shape `(n_chroma, frames)`
    pub chroma: Option<Array2<f32>>,

    /// Cepstral coefficients, shape `(n_timbre, frames)`
    pub timbre: Option<Array2<f32>>,

    /// Lightweight variant produced by [`FeatureExtractor::extract_minimal`]
    pub minimal: Option<MinimalFeatures>,
}

impl FeatureSet {
    /// Build a set from optional channels, replacing NaN/Inf with 0
    pub fn new(chroma: Option<Array2<f32>>, timbre: Option<Array2<f32>>) -> Self {
        let mut set = Self {
            chroma,
            timbre,
            minimal: None,
        };
        set.sanitize();
        set
    }

    /// Replace every non-finite value with 0
    pub fn sanitize(&mut self) {
        for matrix in [self.chroma.as_mut(), self.timbre.as_mut()].into_iter().flatten() {
            sanitize_matrix(matrix);
        }
        if let Some(minimal) = self.minimal.as_mut() {
            for v in minimal.timbre_mean.iter_mut() {
                if !v.is_finite() {
                    *v = 0.0;
                }
            }
            if !minimal.spectral_centroid.is_finite() {
                minimal.spectral_centroid = 0.0;
            }
        }
    }

    /// Number of time frames (a minimal set counts as one frame)
    pub fn frames(&self) -> usize {
        let chroma = self.chroma.as_ref().map(|c| c.ncols()).unwrap_or(0);
        let timbre = self.timbre.as_ref().map(|t| t.ncols()).unwrap_or(0);
        let minimal = match &self.minimal {
            Some(m) if !m.timbre_mean.is_empty() => 1,
            _ => 0,
        };
        chroma.max(timbre).max(minimal)
    }

    /// Reject sets that must not be compared
    pub fn validate(&self) -> MatchResult<()> {
        if self.frames() == 0 {
            return Err(MatchError::Feature("feature set has no time frames".into()));
        }
        Ok(())
    }

    /// Whether the set only carries the minimal variant
    pub fn is_minimal(&self) -> bool {
        self.chroma.is_none() && self.timbre.is_none() && self.minimal.is_some()
    }

    /// Approximate heap footprint in bytes
    pub fn size_bytes(&self) -> usize {
        let matrices = [self.chroma.as_ref(), self.timbre.as_ref()]
            .into_iter()
            .flatten()
            .map(|m| m.len() * std::mem::size_of::<f32>())
            .sum::<usize>();
        let minimal = self
            .minimal
            .as_ref()
            .map(|m| m.timbre_mean.len() * std::mem::size_of::<f32>())
            .unwrap_or(0);
        matrices + minimal
    }
}

fn sanitize_matrix(matrix: &mut Array2<f32>) {
    matrix.mapv_inplace(|x| if x.is_finite() { x } else { 0.0 });
}

/// Computes [`FeatureSet`]s with precomputed filterbanks
pub struct FeatureExtractor {
    config: MatchConfig,
    sample_rate: u32,
    analyzer: SpectralAnalyzer,
    minimal_analyzer: SpectralAnalyzer,
    chroma_basis: Array2<f32>,
    mel_basis: Array2<f32>,
    dct_basis: Array2<f32>,
}

impl FeatureExtractor {
    /// Create an extractor for the configured target sample rate
    pub fn new(config: &MatchConfig) -> MatchResult<Self> {
        Self::with_sample_rate(config, config.target_sample_rate)
    }

    /// Create an extractor for an explicit sample rate
    pub fn with_sample_rate(config: &MatchConfig, sample_rate: u32) -> MatchResult<Self> {
        config.validate()?;
        if sample_rate == 0 {
            return Err(MatchError::InvalidConfig("sample rate must be positive".into()));
        }

        let analyzer = SpectralAnalyzer::new(config.n_fft, config.hop_length, sample_rate)?;
        let minimal_analyzer =
            SpectralAnalyzer::new(config.n_fft, config.minimal_hop_length, sample_rate)?;

        let chroma_basis = chroma_filterbank(config, sample_rate);
        let mel_basis = mel_filterbank(config.n_mels, config.n_fft, sample_rate);
        let dct_basis = dct_matrix(config.n_timbre, config.n_mels);

        Ok(Self {
            config: config.clone(),
            sample_rate,
            analyzer,
            minimal_analyzer,
            chroma_basis,
            mel_basis,
            dct_basis,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn config(&self) -> &MatchConfig {
        &self.config
    }

    /// Full feature set: chroma and timbre matrices
    pub fn extract(&self, sample: &AudioSample) -> MatchResult<FeatureSet> {
        if sample.is_empty() {
            return Err(MatchError::EmptySample("sample has no audio".into()));
        }
        if sample.sample_rate != self.sample_rate {
            log::debug!(
                "Sample rate {} differs from extractor rate {}, rebuilding filterbanks",
                sample.sample_rate,
                self.sample_rate
            );
            return Self::with_sample_rate(&self.config, sample.sample_rate)?.extract(sample);
        }

        let power = self.analyzer.power_spectrogram(&sample.samples)?;

        let chroma = self.chroma(&power);
        let timbre = self.timbre(&power);

        let set = FeatureSet::new(Some(chroma), Some(timbre));
        set.validate()?;

        log::debug!(
            "Extracted {} frames ({} bytes) from {:.1}s",
            set.frames(),
            set.size_bytes(),
            sample.duration()
        );
        Ok(set)
    }

    /// Lightweight set: mean timbre vector and mean spectral centroid
    pub fn extract_minimal(&self, sample: &AudioSample) -> MatchResult<FeatureSet> {
        if sample.is_empty() {
            return Err(MatchError::EmptySample("sample has no audio".into()));
        }
        if sample.sample_rate != self.sample_rate {
            return Self::with_sample_rate(&self.config, sample.sample_rate)?.extract_minimal(sample);
        }

        let power = self.minimal_analyzer.power_spectrogram(&sample.samples)?;
        let mut timbre = self.timbre(&power);
        sanitize_matrix(&mut timbre);

        let timbre_mean = timbre
            .mean_axis(Axis(1))
            .map(|mean| mean.to_vec())
            .unwrap_or_default();

        let resolution = self.minimal_analyzer.freq_resolution();
        let centroids: Vec<f32> = power
            .axis_iter(Axis(1))
            .map(|column| spectral_centroid(column, resolution))
            .collect();
        let centroid = if centroids.is_empty() {
            0.0
        } else {
            centroids.iter().sum::<f32>() / centroids.len() as f32
        };

        let mut set = FeatureSet {
            chroma: None,
            timbre: None,
            minimal: Some(MinimalFeatures {
                timbre_mean,
                spectral_centroid: centroid,
            }),
        };
        set.sanitize();
        set.validate()?;
        Ok(set)
    }

    /// Per-frame max-normalized pitch-class energy
    fn chroma(&self, power: &Array2<f32>) -> Array2<f32> {
        let magnitude = power.mapv(f32::sqrt);
        let mut chroma = self.chroma_basis.dot(&magnitude);

        for mut column in chroma.axis_iter_mut(Axis(1)) {
            let max = column.iter().copied().fold(0.0f32, f32::max);
            if max > f32::MIN_POSITIVE {
                column.mapv_inplace(|x| x / max);
            } else {
                column.fill(0.0);
            }
        }
        chroma
    }

    /// Mel cepstrum, first `n_timbre` coefficients
    fn timbre(&self, power: &Array2<f32>) -> Array2<f32> {
        let mut mel = self.mel_basis.dot(power);
        power_to_db(&mut mel, AMIN, TOP_DB);
        self.dct_basis.dot(&mel)
    }
}

/// Log-frequency filterbank folded onto pitch classes, shape `(n_chroma, n_bins)`
///
/// Each constant-Q bin is a Gaussian around its centre frequency, one CQ bin
/// wide (never narrower than one FFT bin). Bins between two pitch classes are
/// split linearly between them; class 0 is the pitch class of `chroma_fmin`.
fn chroma_filterbank(config: &MatchConfig, sample_rate: u32) -> Array2<f32> {
    let n_bins = config.n_fft / 2 + 1;
    let resolution = sample_rate as f32 / config.n_fft as f32;
    let nyquist = sample_rate as f32 / 2.0;
    let bpo = config.bins_per_octave as f32;
    let bins_per_class = config.bins_per_octave as f32 / config.n_chroma as f32;
    let bandwidth = 2.0_f32.powf(1.0 / bpo) - 1.0;

    let mut basis = Array2::<f32>::zeros((config.n_chroma, n_bins));

    for k in 0..config.n_octaves * config.bins_per_octave {
        let center = config.chroma_fmin * 2.0_f32.powf(k as f32 / bpo);
        if center >= nyquist {
            break;
        }
        let sigma = (center * bandwidth).max(resolution);

        let position = k as f32 / bins_per_class;
        let lower = position.floor();
        let frac = position - lower;
        let lower_class = lower as usize % config.n_chroma;
        let upper_class = (lower_class + 1) % config.n_chroma;

        for bin in 1..n_bins {
            let freq = bin as f32 * resolution;
            let z = (freq - center) / sigma;
            if z.abs() > 4.0 {
                continue;
            }
            let weight = (-0.5 * z * z).exp();
            basis[[lower_class, bin]] += weight * (1.0 - frac);
            if frac > 0.0 {
                basis[[upper_class, bin]] += weight * frac;
            }
        }
    }

    basis
}

fn hz_to_mel(hz: f32) -> f32 {
    const F_SP: f32 = 200.0 / 3.0;
    const MIN_LOG_HZ: f32 = 1000.0;
    let min_log_mel = MIN_LOG_HZ / F_SP;
    let logstep = 6.4_f32.ln() / 27.0;

    if hz >= MIN_LOG_HZ {
        min_log_mel + (hz / MIN_LOG_HZ).ln() / logstep
    } else {
        hz / F_SP
    }
}

fn mel_to_hz(mel: f32) -> f32 {
    const F_SP: f32 = 200.0 / 3.0;
    const MIN_LOG_HZ: f32 = 1000.0;
    let min_log_mel = MIN_LOG_HZ / F_SP;
    let logstep = 6.4_f32.ln() / 27.0;

    if mel >= min_log_mel {
        MIN_LOG_HZ * (logstep * (mel - min_log_mel)).exp()
    } else {
        F_SP * mel
    }
}

/// Slaney-style triangular mel filterbank, shape `(n_mels, n_bins)`
fn mel_filterbank(n_mels: usize, n_fft: usize, sample_rate: u32) -> Array2<f32> {
    let n_bins = n_fft / 2 + 1;
    let resolution = sample_rate as f32 / n_fft as f32;
    let max_mel = hz_to_mel(sample_rate as f32 / 2.0);

    let edges: Vec<f32> = (0..n_mels + 2)
        .map(|i| mel_to_hz(max_mel * i as f32 / (n_mels + 1) as f32))
        .collect();

    let mut basis = Array2::<f32>::zeros((n_mels, n_bins));
    for m in 0..n_mels {
        let (lower, center, upper) = (edges[m], edges[m + 1], edges[m + 2]);
        // Area normalization
        let enorm = 2.0 / (upper - lower);

        for bin in 0..n_bins {
            let freq = bin as f32 * resolution;
            let rising = (freq - lower) / (center - lower);
            let falling = (upper - freq) / (upper - center);
            let weight = rising.min(falling).max(0.0);
            basis[[m, bin]] = weight * enorm;
        }
    }
    basis
}

/// Orthonormal DCT-II rows, shape `(n_coeffs, n)`
fn dct_matrix(n_coeffs: usize, n: usize) -> Array2<f32> {
    let scale_first = (1.0 / n as f32).sqrt();
    let scale_rest = (2.0 / n as f32).sqrt();

    Array2::from_shape_fn((n_coeffs, n), |(k, i)| {
        let scale = if k == 0 { scale_first } else { scale_rest };
        scale * (std::f32::consts::PI * k as f32 * (2 * i + 1) as f32 / (2 * n) as f32).cos()
    })
}
