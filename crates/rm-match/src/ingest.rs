//! Audio ingest: decode, mono mixdown, resample, trim, normalize
//!
//! WAV goes through hound, every other container through symphonia.
//! Decoding stops once the configured fingerprint duration is covered.

use crate::config::MatchConfig;
use crate::error::{MatchError, MatchResult};
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use std::fs::File;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CODEC_TYPE_NULL, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

/// Resampler block size (input frames per call)
const RESAMPLE_CHUNK: usize = 1024;

/// Mono, normalized audio ready for feature extraction
#[derive(Debug, Clone)]
pub struct AudioSample {
    /// Amplitudes in [-1, 1]
    pub samples: Vec<f32>,

    /// Sample rate in Hz
    pub sample_rate: u32,
}

impl AudioSample {
    /// Duration in seconds
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            0.0
        } else {
            self.samples.len() as f64 / self.sample_rate as f64
        }
    }

    /// Number of samples
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether there are no samples
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Peak absolute amplitude
    pub fn peak(&self) -> f32 {
        self.samples.iter().map(|s| s.abs()).fold(0.0, f32::max)
    }
}

/// Container information read without decoding
#[derive(Debug, Clone)]
pub struct AudioFileInfo {
    pub path: PathBuf,
    pub format: String,
    pub sample_rate: u32,
    pub channels: usize,
    /// Duration from container metadata, 0.0 when unknown
    pub duration: f64,
    pub size_bytes: u64,
}

/// Audio loading entry points
pub struct AudioIngest;

impl AudioIngest {
    /// Decode `path` into a trimmed, peak-normalized mono sample at the target rate
    pub fn load<P: AsRef<Path>>(path: P, config: &MatchConfig) -> MatchResult<AudioSample> {
        let path = path.as_ref();
        log::debug!("Loading {}", path.display());

        let (mono, sample_rate) = Self::decode_mono(path, Some(config.max_duration_secs))?;
        Self::prepare(mono, sample_rate, config)
            .map_err(|e| match e {
                MatchError::EmptySample(_) => MatchError::EmptySample(path.display().to_string()),
                MatchError::Decode { reason, .. } => MatchError::decode(path, reason),
                other => other,
            })
    }

    /// Resample, cap, trim and normalize already-decoded mono samples
    pub fn prepare(mono: Vec<f32>, sample_rate: u32, config: &MatchConfig) -> MatchResult<AudioSample> {
        if sample_rate == 0 {
            return Err(MatchError::decode("<memory>", "source sample rate is zero"));
        }

        let mut samples = resample(&mono, sample_rate, config.target_sample_rate)?;
        drop(mono);
        samples.truncate(config.max_frames(config.target_sample_rate));

        let (start, end) = trim_range(
            &samples,
            config.trim_top_db,
            config.trim_frame_length,
            config.trim_hop_length,
        );
        if start >= end {
            return Err(MatchError::EmptySample("audio is silent after trimming".into()));
        }
        samples.truncate(end);
        samples.drain(..start);
        samples.shrink_to_fit();

        normalize_peak(&mut samples);

        Ok(AudioSample {
            samples,
            sample_rate: config.target_sample_rate,
        })
    }

    /// Untrimmed duration in seconds; 0.0 when nothing can be read
    pub fn full_duration<P: AsRef<Path>>(path: P) -> f64 {
        let path = path.as_ref();

        if is_wav(path) {
            match hound::WavReader::open(path) {
                Ok(reader) => {
                    let rate = reader.spec().sample_rate;
                    if rate > 0 {
                        return reader.duration() as f64 / rate as f64;
                    }
                }
                Err(e) => log::debug!("WAV header unreadable for {}: {}", path.display(), e),
            }
        }

        match Self::probe(path) {
            Ok(info) if info.duration > 0.0 => return info.duration,
            Ok(_) => log::debug!("No duration metadata for {}, decoding", path.display()),
            Err(e) => log::debug!("Probe failed for {}: {}", path.display(), e),
        }

        match Self::decode_mono(path, None) {
            Ok((samples, rate)) if rate > 0 => samples.len() as f64 / rate as f64,
            Ok(_) => 0.0,
            Err(e) => {
                log::warn!("Could not get duration for {}: {}", path.display(), e);
                0.0
            }
        }
    }

    /// Read container information without decoding
    pub fn probe<P: AsRef<Path>>(path: P) -> MatchResult<AudioFileInfo> {
        let path = path.as_ref();
        let size_bytes = std::fs::metadata(path)?.len();
        let format = open_format(path)?;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| MatchError::decode(path, "no audio track"))?;

        let params = &track.codec_params;
        let sample_rate = params.sample_rate.unwrap_or(0);
        let channels = params.channels.map(|c| c.count()).unwrap_or(0);
        let duration = match (params.n_frames, sample_rate) {
            (Some(frames), rate) if rate > 0 => frames as f64 / rate as f64,
            _ => 0.0,
        };

        Ok(AudioFileInfo {
            path: path.to_path_buf(),
            format: extension(path).unwrap_or_else(|| "unknown".into()).to_uppercase(),
            sample_rate,
            channels,
            duration,
            size_bytes,
        })
    }

    /// Decode to mono at the source rate, optionally stopping after `max_secs`
    pub fn decode_mono(path: &Path, max_secs: Option<f64>) -> MatchResult<(Vec<f32>, u32)> {
        if is_wav(path) {
            match decode_wav(path, max_secs) {
                Ok(decoded) => return Ok(decoded),
                // hound rejects some valid WAV flavours (e.g. extensible headers), symphonia may not
                Err(e) => log::debug!("hound failed for {}, trying symphonia: {}", path.display(), e),
            }
        }
        decode_symphonia(path, max_secs)
    }
}

/// Lowercase file extension
pub(crate) fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

fn is_wav(path: &Path) -> bool {
    extension(path).as_deref() == Some("wav")
}

fn frame_cap(max_secs: Option<f64>, sample_rate: u32) -> usize {
    max_secs
        .map(|secs| (secs * sample_rate as f64).ceil() as usize)
        .unwrap_or(usize::MAX)
}

/// Average interleaved frames down to one channel
fn mix_to_mono(interleaved: &[f32], channels: usize, out: &mut Vec<f32>, limit: usize) {
    if channels <= 1 {
        let take = limit.saturating_sub(out.len()).min(interleaved.len());
        out.extend_from_slice(&interleaved[..take]);
        return;
    }

    let scale = 1.0 / channels as f32;
    for frame in interleaved.chunks_exact(channels) {
        if out.len() >= limit {
            break;
        }
        out.push(frame.iter().sum::<f32>() * scale);
    }
}

fn decode_wav(path: &Path, max_secs: Option<f64>) -> MatchResult<(Vec<f32>, u32)> {
    let reader = hound::WavReader::open(path).map_err(|e| MatchError::decode(path, e))?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;
    let sample_rate = spec.sample_rate;
    let limit = frame_cap(max_secs, sample_rate);
    let take = limit.saturating_mul(channels);

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .take(take)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| MatchError::decode(path, e))?,
        hound::SampleFormat::Int => {
            let max_val = (1i64 << (spec.bits_per_sample.max(1) - 1)) as f32;
            reader
                .into_samples::<i32>()
                .take(take)
                .map(|s| s.map(|v| v as f32 / max_val))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| MatchError::decode(path, e))?
        }
    };

    let mut mono = Vec::with_capacity(interleaved.len() / channels);
    mix_to_mono(&interleaved, channels, &mut mono, limit);
    Ok((mono, sample_rate))
}

/// Run symphonia work for one file, turning a panic on malformed input into a decode error
fn guard_decode<T>(path: &Path, work: impl FnOnce() -> MatchResult<T>) -> MatchResult<T> {
    std::panic::catch_unwind(AssertUnwindSafe(work)).unwrap_or_else(|payload| {
        let reason = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "decoder panicked".into());
        Err(MatchError::decode(path, format!("malformed stream: {}", reason)))
    })
}

fn open_format(path: &Path) -> MatchResult<Box<dyn FormatReader>> {
    guard_decode(path, || open_format_unguarded(path))
}

fn open_format_unguarded(path: &Path) -> MatchResult<Box<dyn FormatReader>> {
    let file = File::open(path).map_err(|e| MatchError::decode(path, e))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| MatchError::decode(path, e))?;

    Ok(probed.format)
}

fn decode_symphonia(path: &Path, max_secs: Option<f64>) -> MatchResult<(Vec<f32>, u32)> {
    guard_decode(path, || decode_symphonia_unguarded(path, max_secs))
}

fn decode_symphonia_unguarded(path: &Path, max_secs: Option<f64>) -> MatchResult<(Vec<f32>, u32)> {
    let mut format = open_format(path)?;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| MatchError::decode(path, "no audio track"))?;

    let track_id = track.id;
    let codec_params = track.codec_params.clone();
    let mut sample_rate = codec_params.sample_rate.unwrap_or(0);

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(|e| MatchError::decode(path, e))?;

    let mut mono: Vec<f32> = Vec::new();
    let mut buffer: Option<SampleBuffer<f32>> = None;
    let mut limit = frame_cap(max_secs, sample_rate.max(1));

    while mono.len() < limit {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(e) => return Err(MatchError::decode(path, e)),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(e)) => {
                log::debug!("Skipping corrupt packet in {}: {}", path.display(), e);
                continue;
            }
            Err(e) => return Err(MatchError::decode(path, e)),
        };

        let spec = *decoded.spec();
        if sample_rate == 0 {
            sample_rate = spec.rate;
            limit = frame_cap(max_secs, sample_rate.max(1));
        }

        let needs_alloc = buffer
            .as_ref()
            .map(|b| b.capacity() < decoded.capacity() * spec.channels.count())
            .unwrap_or(true);
        if needs_alloc {
            buffer = Some(SampleBuffer::<f32>::new(decoded.capacity() as u64, spec));
        }

        if let Some(buf) = buffer.as_mut() {
            buf.copy_interleaved_ref(decoded);
            mix_to_mono(buf.samples(), spec.channels.count(), &mut mono, limit);
        }
    }

    if sample_rate == 0 {
        return Err(MatchError::decode(path, "unknown sample rate"));
    }

    Ok((mono, sample_rate))
}

/// Windowed-sinc resampling of a mono signal
pub fn resample(input: &[f32], input_rate: u32, output_rate: u32) -> MatchResult<Vec<f32>> {
    if input_rate == output_rate || input.is_empty() {
        return Ok(input.to_vec());
    }

    let params = SincInterpolationParameters {
        sinc_len: 128,
        f_cutoff: 0.95,
        oversampling_factor: 64,
        interpolation: SincInterpolationType::Linear,
        window: WindowFunction::BlackmanHarris2,
    };

    let ratio = output_rate as f64 / input_rate as f64;
    let mut resampler = SincFixedIn::<f32>::new(ratio, 2.0, params, RESAMPLE_CHUNK, 1)
        .map_err(|e| MatchError::Feature(format!("resampler setup: {}", e)))?;

    let expected = (input.len() as f64 * ratio).round() as usize;
    let mut output = Vec::with_capacity(expected + RESAMPLE_CHUNK);

    for chunk in input.chunks(RESAMPLE_CHUNK) {
        let block = if chunk.len() == RESAMPLE_CHUNK {
            chunk.to_vec()
        } else {
            let mut padded = vec![0.0; RESAMPLE_CHUNK];
            padded[..chunk.len()].copy_from_slice(chunk);
            padded
        };

        let result = resampler
            .process(&[block], None)
            .map_err(|e| MatchError::Feature(format!("resampling: {}", e)))?;
        output.extend_from_slice(&result[0]);
    }

    output.truncate(expected);
    Ok(output)
}

/// Sample range left after removing leading/trailing silence
///
/// A frame counts as sound when its RMS level is within `top_db` of the
/// loudest frame. Returns `(0, 0)` for all-silent input.
pub fn trim_range(samples: &[f32], top_db: f32, frame_length: usize, hop_length: usize) -> (usize, usize) {
    if samples.is_empty() || frame_length == 0 || hop_length == 0 {
        return (0, 0);
    }

    // Last frame may be partial so the tail is always covered
    let num_frames = samples.len().saturating_sub(frame_length).div_ceil(hop_length) + 1;
    let rms: Vec<f32> = (0..num_frames)
        .map(|i| {
            let start = (i * hop_length).min(samples.len() - 1);
            let end = (start + frame_length).min(samples.len());
            let frame = &samples[start..end];
            (frame.iter().map(|&x| x * x).sum::<f32>() / frame.len() as f32).sqrt()
        })
        .collect();

    let max_rms = rms.iter().copied().fold(0.0f32, f32::max);
    if max_rms <= 0.0 {
        return (0, 0);
    }

    let floor = max_rms * 10.0_f32.powf(-top_db / 20.0);
    let first = rms.iter().position(|&r| r > floor);
    let last = rms.iter().rposition(|&r| r > floor);

    match (first, last) {
        (Some(first), Some(last)) => {
            let start = first * hop_length;
            let end = (last * hop_length + frame_length).min(samples.len());
            (start, end)
        }
        _ => (0, 0),
    }
}

/// Scale so the largest absolute sample is 1.0 (silent input is left alone)
pub fn normalize_peak(samples: &mut [f32]) {
    let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);
    if peak > 0.0 && peak.is_finite() {
        let gain = 1.0 / peak;
        for sample in samples.iter_mut() {
            *sample *= gain;
        }
    }
}
