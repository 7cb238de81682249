//! Separation through the demucs command line tool.

use super::{collect_stems, SeparationEngine, SeparationError, StemFiles};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

pub const DEFAULT_MODEL: &str = "htdemucs_6s";

/// Runs `<bin> -n <model> -o <scratch> <input>`.
///
/// demucs lays its output out as `<scratch>/<model>/<track>/<label>.wav`, where
/// `<track>` is the input file name without extension.
#[derive(Debug, Clone)]
pub struct DemucsSeparator {
    bin: PathBuf,
    model: String,
}

impl DemucsSeparator {
    pub fn new(bin: impl Into<PathBuf>, model: impl Into<String>) -> Self {
        Self {
            bin: bin.into(),
            model: model.into(),
        }
    }

    fn output_dir(&self, input: &Path, scratch: &Path) -> PathBuf {
        let track = input
            .file_stem()
            .map(|s| s.to_os_string())
            .unwrap_or_default();
        scratch.join(&self.model).join(track)
    }
}

impl Default for DemucsSeparator {
    fn default() -> Self {
        Self::new("demucs", DEFAULT_MODEL)
    }
}

#[async_trait]
impl SeparationEngine for DemucsSeparator {
    async fn separate(&self, input: &Path, scratch: &Path) -> Result<StemFiles, SeparationError> {
        info!(
            "Running {} ({}) on {}",
            self.bin.display(),
            self.model,
            input.display()
        );

        let output = Command::new(&self.bin)
            .arg("-n")
            .arg(&self.model)
            .arg("-o")
            .arg(scratch)
            .arg(input)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let message = if stderr.is_empty() {
                format!("demucs exited with {}", output.status)
            } else {
                stderr
            };
            return Err(SeparationError::EngineFailed(message));
        }

        let dir = self.output_dir(input, scratch);
        if !dir.is_dir() {
            return Err(SeparationError::NoOutput(dir));
        }

        let stems = collect_stems(&dir);
        debug!("demucs produced {} stems in {}", stems.len(), dir.display());
        Ok(stems)
    }
}
