//! FFT-based spectral analysis

use crate::error::{MatchError, MatchResult};
use ndarray::{Array2, ArrayView1};
use realfft::{RealFftPlanner, RealToComplex};
use std::sync::Arc;

/// Short-time power spectrum analyzer using a Hann window
pub struct SpectralAnalyzer {
    fft_size: usize,
    hop_size: usize,
    sample_rate: u32,
    fft: Arc<dyn RealToComplex<f32>>,
    window: Vec<f32>,
}

impl SpectralAnalyzer {
    /// Create new analyzer with given FFT size
    pub fn new(fft_size: usize, hop_size: usize, sample_rate: u32) -> MatchResult<Self> {
        if !fft_size.is_power_of_two() {
            return Err(MatchError::InvalidConfig(format!(
                "FFT size must be power of 2, got {}",
                fft_size
            )));
        }
        if hop_size == 0 {
            return Err(MatchError::InvalidConfig("hop size must be positive".into()));
        }

        let mut planner = RealFftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(fft_size);

        // Periodic Hann window
        let window: Vec<f32> = (0..fft_size)
            .map(|i| 0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / fft_size as f32).cos()))
            .collect();

        Ok(Self {
            fft_size,
            hop_size,
            sample_rate,
            fft,
            window,
        })
    }

    /// Number of frames produced for `len` samples
    ///
    /// The last frame is zero padded; input shorter than one window still
    /// yields a single frame.
    pub fn num_frames(&self, len: usize) -> usize {
        if len == 0 {
            0
        } else {
            len.saturating_sub(self.fft_size).div_ceil(self.hop_size) + 1
        }
    }

    /// Power spectrogram, shape `(num_bins, num_frames)`
    pub fn power_spectrogram(&self, samples: &[f32]) -> MatchResult<Array2<f32>> {
        let num_frames = self.num_frames(samples.len());
        let num_bins = self.num_bins();
        let mut power = Array2::<f32>::zeros((num_bins, num_frames));

        let mut input = self.fft.make_input_vec();
        let mut spectrum = self.fft.make_output_vec();

        for frame_idx in 0..num_frames {
            let start = frame_idx * self.hop_size;

            for (i, slot) in input.iter_mut().enumerate() {
                let sample = samples.get(start + i).copied().unwrap_or(0.0);
                *slot = sample * self.window[i];
            }

            self.fft
                .process(&mut input, &mut spectrum)
                .map_err(|e| MatchError::Feature(format!("FFT failed: {}", e)))?;

            for (bin, value) in spectrum.iter().enumerate() {
                power[[bin, frame_idx]] = value.norm_sqr();
            }
        }

        Ok(power)
    }

    /// Get bin index for a given frequency
    pub fn freq_to_bin(&self, freq: f32) -> usize {
        ((freq / self.freq_resolution()).round() as usize).min(self.fft_size / 2)
    }

    /// Get number of frequency bins
    pub fn num_bins(&self) -> usize {
        self.fft_size / 2 + 1
    }

    /// Get frequency resolution (Hz per bin)
    pub fn freq_resolution(&self) -> f32 {
        self.sample_rate as f32 / self.fft_size as f32
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

/// Convert a power spectrogram to dB in place
///
/// `10 * log10(max(x, amin))`, then floored at `max - top_db`.
pub fn power_to_db(power: &mut Array2<f32>, amin: f32, top_db: f32) {
    power.mapv_inplace(|x| 10.0 * x.max(amin).log10());
    let max = power.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    if max.is_finite() {
        let floor = max - top_db;
        power.mapv_inplace(|x| x.max(floor));
    }
}

/// Calculate spectral centroid (brightness measure) of one power column
pub fn spectral_centroid(power: ArrayView1<f32>, freq_resolution: f32) -> f32 {
    let mut weighted_sum = 0.0;
    let mut total_power = 0.0;

    for (bin, &p) in power.iter().enumerate() {
        weighted_sum += bin as f32 * freq_resolution * p;
        total_power += p;
    }

    if total_power > 0.0 {
        weighted_sum / total_power
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::Axis;

    fn sine(freq: f32, len: usize, sample_rate: u32) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / sample_rate as f32).sin())
            .collect()
    }

    #[test]
    fn test_spectral_analyzer() {
        let analyzer = SpectralAnalyzer::new(1024, 256, 16_000).unwrap();
        let samples = sine(1000.0, 4096, 16_000);

        let power = analyzer.power_spectrogram(&samples).unwrap();
        assert_eq!(power.dim(), (513, analyzer.num_frames(4096)));

        let first = power.column(0);
        let peak_bin = first
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.total_cmp(b))
            .map(|(i, _)| i)
            .unwrap();

        assert!((peak_bin as i32 - analyzer.freq_to_bin(1000.0) as i32).abs() <= 1);
    }

    #[test]
    fn test_rejects_bad_fft_size() {
        assert!(SpectralAnalyzer::new(1000, 256, 16_000).is_err());
        assert!(SpectralAnalyzer::new(1024, 0, 16_000).is_err());
    }

    #[test]
    fn test_num_frames() {
        let analyzer = SpectralAnalyzer::new(2048, 1024, 16_000).unwrap();
        assert_eq!(analyzer.num_frames(0), 0);
        assert_eq!(analyzer.num_frames(100), 1);
        assert_eq!(analyzer.num_frames(2048), 1);
        assert_eq!(analyzer.num_frames(2049), 2);
        assert_eq!(analyzer.num_frames(4096), 3);
    }

    #[test]
    fn test_spectral_centroid_of_tone() {
        let analyzer = SpectralAnalyzer::new(2048, 1024, 16_000).unwrap();
        let power = analyzer
            .power_spectrogram(&sine(2000.0, 8192, 16_000))
            .unwrap();
        let centroid = spectral_centroid(power.column(1), analyzer.freq_resolution());
        assert_relative_eq!(centroid, 2000.0, max_relative = 0.02);
    }

    #[test]
    fn test_power_to_db_floor() {
        let mut power = Array2::from_shape_vec((2, 2), vec![1.0, 0.0, 1e-12, 100.0]).unwrap();
        power_to_db(&mut power, 1e-10, 80.0);

        assert_relative_eq!(power[[1, 1]], 20.0, epsilon = 1e-4);
        assert_relative_eq!(power[[0, 0]], 0.0, epsilon = 1e-4);
        // Floored at max - top_db
        assert!(power.iter().all(|&db| db >= -60.0 - 1e-4));
        assert_eq!(power.len_of(Axis(1)), 2);
    }
}
