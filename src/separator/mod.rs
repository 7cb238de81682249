//! Source separation engines.
//!
//! An engine takes one mixed audio file and writes per-instrument WAV stems
//! into a scratch directory it is given.

mod demucs;

pub use demucs::{DemucsSeparator, DEFAULT_MODEL};

use crate::jobs::StemLabel;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Stems an engine actually produced, keyed by label. Labels the engine did not
/// produce are simply absent.
pub type StemFiles = BTreeMap<StemLabel, PathBuf>;

#[derive(Debug, Error)]
pub enum SeparationError {
    #[error("{0}")]
    EngineFailed(String),

    #[error("Separation produced no output folder at {}", .0.display())]
    NoOutput(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait SeparationEngine: Send + Sync {
    /// Separate `input` into stems written somewhere under `scratch`.
    async fn separate(&self, input: &Path, scratch: &Path) -> Result<StemFiles, SeparationError>;
}

/// Collect `<dir>/<label>.wav` for every label present in `dir`.
pub fn collect_stems(dir: &Path) -> StemFiles {
    StemLabel::ALL
        .into_iter()
        .map(|label| (label, dir.join(label.file_name())))
        .filter(|(_, path)| path.is_file())
        .collect()
}
