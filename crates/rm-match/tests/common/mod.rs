//! Synthetic audio fixtures shared by the integration tests

#![allow(dead_code)]

use std::path::{Path, PathBuf};

pub const NOTE_SECS: f32 = 0.5;

/// White-key melody (C major)
pub const MELODY: &[f32] = &[
    261.63, 329.63, 392.00, 523.25, 440.00, 349.23, 293.66, 392.00,
];

/// Black-key melody, no pitch class shared with [`MELODY`]
pub const OTHER_MELODY: &[f32] = &[
    277.18, 369.99, 466.16, 311.13, 415.30, 554.37, 369.99, 233.08,
];

/// Piano-ish harmonic amplitudes
pub const WARM: &[f32] = &[1.0, 0.5, 0.25, 0.12];

/// Brighter harmonic amplitudes (a different master)
pub const BRIGHT: &[f32] = &[1.0, 0.7, 0.5, 0.35, 0.2];

/// Hollow, odd-harmonic timbre
pub const HOLLOW: &[f32] = &[1.0, 0.0, 0.33, 0.0, 0.2, 0.0, 0.14];

/// Looping melody with a short attack/release per note
pub fn melody(notes: &[f32], secs: f32, sample_rate: u32, harmonics: &[f32], gain: f32) -> Vec<f32> {
    let total = (secs * sample_rate as f32) as usize;
    let note_len = (NOTE_SECS * sample_rate as f32) as usize;
    let ramp = (0.01 * sample_rate as f32) as usize;
    let norm: f32 = harmonics.iter().sum();

    (0..total)
        .map(|i| {
            let note = notes[(i / note_len) % notes.len()];
            let pos = i % note_len;
            let envelope = if pos < ramp {
                pos as f32 / ramp as f32
            } else if note_len - pos < ramp {
                (note_len - pos) as f32 / ramp as f32
            } else {
                1.0
            };

            let t = i as f32 / sample_rate as f32;
            let tone: f32 = harmonics
                .iter()
                .enumerate()
                .map(|(h, &amp)| amp * (2.0 * std::f32::consts::PI * note * (h + 1) as f32 * t).sin())
                .sum();

            gain * envelope * tone / norm
        })
        .collect()
}

pub fn silence(secs: f32, sample_rate: u32) -> Vec<f32> {
    vec![0.0; (secs * sample_rate as f32) as usize]
}

/// Write 16-bit PCM, duplicating the signal to every channel
pub fn write_wav(path: &Path, samples: &[f32], sample_rate: u32, channels: u16) {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for &s in samples {
        let v = (s.clamp(-1.0, 1.0) * 32767.0) as i16;
        for _ in 0..channels {
            writer.write_sample(v).unwrap();
        }
    }
    writer.finalize().unwrap();
}

/// Write 32-bit float mono
pub fn write_wav_float(path: &Path, samples: &[f32], sample_rate: u32) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for &s in samples {
        writer.write_sample(s).unwrap();
    }
    writer.finalize().unwrap();
}

/// Fixture library on disk
pub struct Library {
    pub dir: tempfile::TempDir,
    /// 2 s of silence, then 12 s of [`MELODY`]
    pub master: PathBuf,
    /// Same melody, different master: louder, brighter, 44.1 kHz stereo, 11.5 s
    pub remaster: PathBuf,
    /// [`OTHER_MELODY`] with a different timbre
    pub other: PathBuf,
    /// Not audio
    pub broken: PathBuf,
    /// Copy of `other` whose header declares a 0 Hz sample rate
    pub zero_rate: PathBuf,
}

impl Library {
    pub fn create() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let master = dir.path().join("track_master.wav");
        let remaster = dir.path().join("track_remaster.wav");
        let other = dir.path().join("other_song.wav");
        let broken = dir.path().join("broken.mp3");

        let mut master_audio = silence(2.0, 22_050);
        master_audio.extend(melody(MELODY, 12.0, 22_050, WARM, 0.5));
        write_wav(&master, &master_audio, 22_050, 1);

        write_wav(&remaster, &melody(MELODY, 11.5, 44_100, BRIGHT, 0.9), 44_100, 2);

        write_wav_float(&other, &melody(OTHER_MELODY, 12.0, 16_000, HOLLOW, 0.6), 16_000);

        std::fs::write(&broken, b"definitely not an audio stream").unwrap();

        let zero_rate = dir.path().join("zero_rate.wav");
        let mut header = std::fs::read(&other).unwrap();
        header[24..28].copy_from_slice(&0u32.to_le_bytes());
        std::fs::write(&zero_rate, header).unwrap();

        Self {
            dir,
            master,
            remaster,
            other,
            broken,
            zero_rate,
        }
    }
}
