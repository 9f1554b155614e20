//! WAV fixture generation
//!
//! Deterministic, short WAV files for playlist folders: silence, sines at a
//! chosen rate and channel count, and files that are not audio at all.

#![allow(dead_code)]

use hound::{WavSpec, WavWriter};
use std::f32::consts::PI;
use std::path::{Path, PathBuf};

/// Rate used when a test does not care
pub const FIXTURE_SAMPLE_RATE: u32 = 48_000;

fn spec(sample_rate: u32, channels: u16) -> WavSpec {
    WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    }
}

/// Silent 16-bit WAV
pub fn generate_silent_wav<P: AsRef<Path>>(
    path: P,
    duration_ms: u64,
    sample_rate: u32,
    channels: u16,
) -> Result<(), hound::Error> {
    let mut writer = WavWriter::create(path, spec(sample_rate, channels))?;
    let total_samples = sample_rate as u64 * duration_ms / 1000 * channels as u64;
    for _ in 0..total_samples {
        writer.write_sample(0i16)?;
    }
    writer.finalize()
}

/// Sine, same value on every channel
pub fn generate_sine_wav<P: AsRef<Path>>(
    path: P,
    duration_ms: u64,
    sample_rate: u32,
    channels: u16,
    frequency_hz: f32,
    amplitude: f32,
) -> Result<(), hound::Error> {
    let mut writer = WavWriter::create(path, spec(sample_rate, channels))?;
    let total_frames = sample_rate as u64 * duration_ms / 1000;
    let peak = amplitude.clamp(0.0, 1.0) * i16::MAX as f32;

    for frame in 0..total_frames {
        let t = frame as f32 / sample_rate as f32;
        let value = ((2.0 * PI * frequency_hz * t).sin() * peak) as i16;
        for _ in 0..channels {
            writer.write_sample(value)?;
        }
    }
    writer.finalize()
}

/// Playlist folder of short stereo sines named `names`, in a fresh temp dir
pub fn playlist_folder(names: &[&str], duration_ms: u64) -> (tempfile::TempDir, Vec<PathBuf>) {
    let dir = tempfile::tempdir().expect("create temp dir");
    let paths = names
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let path = dir.path().join(name);
            generate_sine_wav(
                &path,
                duration_ms,
                FIXTURE_SAMPLE_RATE,
                2,
                220.0 * (i + 1) as f32,
                0.3,
            )
            .expect("write wav fixture");
            path
        })
        .collect();
    (dir, paths)
}

/// File with an audio extension but no audio inside
pub fn write_garbage<P: AsRef<Path>>(path: P) -> std::io::Result<()> {
    std::fs::write(path, b"this is not a wav file, just some bytes pretending")
}
