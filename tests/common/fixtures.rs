//! Test fixtures: generated WAV audio and fake external tools

use super::constants::*;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use stem_splitter_server::fetcher::{FetchError, MediaFetcher};
use stem_splitter_server::separator::{SeparationEngine, SeparationError, StemFiles};
use stem_splitter_server::StemLabel;

/// Write a 16-bit stereo sine wave peaking at `peak`.
pub fn write_test_wav(path: &Path, peak: f64) {
    let spec = hound::WavSpec {
        channels: TEST_CHANNELS,
        sample_rate: TEST_SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).expect("Failed to create wav");
    let amplitude = peak * i16::MAX as f64;
    for frame in 0..TEST_STEM_FRAMES {
        let phase = frame as f64 * 440.0 * 2.0 * std::f64::consts::PI / TEST_SAMPLE_RATE as f64;
        let sample = (phase.sin() * amplitude).round() as i16;
        for _ in 0..TEST_CHANNELS {
            writer.write_sample(sample).expect("Failed to write sample");
        }
    }
    writer.finalize().expect("Failed to finalize wav");
}

/// Separation engine that writes loud fixture stems for a fixed label set,
/// or fails with a fixed message.
pub struct FakeEngine {
    pub labels: Vec<StemLabel>,
    pub error: Option<String>,
}

#[async_trait]
impl SeparationEngine for FakeEngine {
    async fn separate(&self, _input: &Path, scratch: &Path) -> Result<StemFiles, SeparationError> {
        if let Some(error) = &self.error {
            return Err(SeparationError::EngineFailed(error.clone()));
        }
        let mut stems = StemFiles::new();
        for label in &self.labels {
            let path = scratch.join(label.file_name());
            write_test_wav(&path, LOUD_STEM_PEAK);
            stems.insert(*label, path);
        }
        Ok(stems)
    }
}

/// Fetcher that "downloads" only `FETCHABLE_URL`.
pub struct FakeFetcher;

#[async_trait]
impl MediaFetcher for FakeFetcher {
    async fn fetch(&self, url: &str, dest_stem: &Path) -> Result<PathBuf, FetchError> {
        if url != FETCHABLE_URL {
            return Err(FetchError::Failed("Video unavailable".to_string()));
        }
        let path = dest_stem.with_extension("mp3");
        tokio::fs::write(&path, b"ID3 fake mp3 payload").await?;
        Ok(path)
    }
}
