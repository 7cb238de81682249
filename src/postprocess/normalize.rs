//! Peak normalization of separated stems.
//!
//! Stems are read at whatever bit depth the engine produced, attenuated so the
//! loudest sample sits at -1 dBFS, and written back as 24-bit PCM. Quiet stems
//! are never amplified.

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Linear ceiling for output samples (-1 dBFS).
pub const TARGET_PEAK: f64 = 0.891;

/// Bit depth of every published stem.
pub const OUTPUT_BITS: u16 = 24;

const FULL_SCALE: f64 = (1u32 << (OUTPUT_BITS - 1)) as f64;

#[derive(Debug, Error)]
pub enum PostProcessError {
    #[error("Failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: hound::Error,
    },

    #[error("Failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        source: hound::Error,
    },

    #[error("Unsupported sample format: {0}")]
    UnsupportedFormat(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Decoded stem audio. Samples are interleaved and scaled to [-1.0, 1.0] for
/// integer sources; float sources are kept as-is and may exceed that range.
#[derive(Debug, Clone, PartialEq)]
pub struct StemAudio {
    pub samples: Vec<f64>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl StemAudio {
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }
}

/// Outcome of normalizing one stem.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StemReport {
    pub sample_rate: u32,
    pub channels: u16,
    pub frames: usize,
    pub peak_in: f64,
    pub peak_out: f64,
    pub gain: f64,
}

pub fn read_stem(path: &Path) -> Result<StemAudio, PostProcessError> {
    let read_err = |source| PostProcessError::Read {
        path: path.to_path_buf(),
        source,
    };

    let mut reader = WavReader::open(path).map_err(read_err)?;
    let spec = reader.spec();

    let samples = match (spec.sample_format, spec.bits_per_sample) {
        (SampleFormat::Int, bits @ (8 | 16 | 24 | 32)) => {
            let scale = (1u64 << (bits - 1)) as f64;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f64 / scale))
                .collect::<Result<Vec<_>, _>>()
                .map_err(read_err)?
        }
        (SampleFormat::Float, 32) => reader
            .samples::<f32>()
            .map(|s| s.map(f64::from))
            .collect::<Result<Vec<_>, _>>()
            .map_err(read_err)?,
        (format, bits) => {
            return Err(PostProcessError::UnsupportedFormat(format!(
                "{:?} {}-bit",
                format, bits
            )))
        }
    };

    Ok(StemAudio {
        samples,
        sample_rate: spec.sample_rate,
        channels: spec.channels,
    })
}

pub fn peak(samples: &[f64]) -> f64 {
    samples.iter().fold(0.0, |acc, s| acc.max(s.abs()))
}

/// Attenuates `samples` in place so the peak does not exceed [`TARGET_PEAK`].
/// Returns the measured input peak and the applied gain (1.0 when untouched).
pub fn normalize(samples: &mut [f64]) -> (f64, f64) {
    let peak_in = peak(samples);
    if peak_in <= TARGET_PEAK {
        return (peak_in, 1.0);
    }
    let gain = TARGET_PEAK / peak_in;
    for sample in samples.iter_mut() {
        *sample *= gain;
    }
    (peak_in, gain)
}

// Rounding alone could land one step above the ceiling, which would make a
// second pass rescale. Clamping to the largest code at or below it keeps
// re-normalization a no-op.
fn quantize(sample: f64) -> i32 {
    let limit = (TARGET_PEAK * FULL_SCALE).floor();
    let code = (sample * FULL_SCALE).round();
    if code.abs() > limit {
        (limit * code.signum()) as i32
    } else {
        code as i32
    }
}

/// Writes `audio` as 24-bit PCM at `path` through a sibling `.part` file, so a
/// reader never observes a half-written stem.
pub fn write_stem(path: &Path, audio: &StemAudio) -> Result<(), PostProcessError> {
    let part_path = part_path_for(path);
    let result = write_pcm(&part_path, audio).and_then(|()| {
        std::fs::rename(&part_path, path)?;
        Ok(())
    });
    if result.is_err() {
        let _ = std::fs::remove_file(&part_path);
    }
    result
}

fn write_pcm(path: &Path, audio: &StemAudio) -> Result<(), PostProcessError> {
    let write_err = |source| PostProcessError::Write {
        path: path.to_path_buf(),
        source,
    };

    let spec = WavSpec {
        channels: audio.channels,
        sample_rate: audio.sample_rate,
        bits_per_sample: OUTPUT_BITS,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec).map_err(write_err)?;
    for &sample in &audio.samples {
        writer.write_sample(quantize(sample)).map_err(write_err)?;
    }
    writer.finalize().map_err(write_err)
}

fn part_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    path.with_file_name(name)
}

/// Reads the stem at `src`, normalizes it and publishes the result at `dst`.
pub fn process_stem(src: &Path, dst: &Path) -> Result<StemReport, PostProcessError> {
    let mut audio = read_stem(src)?;
    let (peak_in, gain) = normalize(&mut audio.samples);
    write_stem(dst, &audio)?;

    let peak_out = audio
        .samples
        .iter()
        .map(|&s| (quantize(s).unsigned_abs() as f64) / FULL_SCALE)
        .fold(0.0, f64::max);

    let report = StemReport {
        sample_rate: audio.sample_rate,
        channels: audio.channels,
        frames: audio.frames(),
        peak_in,
        peak_out,
        gain,
    };
    debug!(
        "Normalized {} -> {}: peak {:.4} -> {:.4} (gain {:.4})",
        src.display(),
        dst.display(),
        report.peak_in,
        report.peak_out,
        report.gain
    );
    Ok(report)
}
