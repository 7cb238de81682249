//! On-disk layout for job inputs and outputs.
//!
//! Uploads live at `<upload_root>/<job_id><ext>` and published stems at
//! `<output_root>/<job_id>/<label>.wav`. Everything is namespaced by job id.

use crate::jobs::JobId;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::warn;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unsupported file type: {0}")]
    UnsupportedFileType(String),

    #[error("File too large: {0} bytes (max: {1})")]
    FileTooLarge(u64, u64),
}

/// Accepted upload extensions, compared case-insensitively.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["mp3", "wav", "flac", "ogg", "m4a"];

#[derive(Debug, Clone)]
pub struct JobStorage {
    upload_root: PathBuf,
    output_root: PathBuf,
    max_file_size: u64,
}

impl JobStorage {
    pub fn new(
        upload_root: impl Into<PathBuf>,
        output_root: impl Into<PathBuf>,
        max_file_size: u64,
    ) -> Self {
        Self {
            upload_root: upload_root.into(),
            output_root: output_root.into(),
            max_file_size,
        }
    }

    pub fn upload_root(&self) -> &Path {
        &self.upload_root
    }

    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    pub fn max_file_size(&self) -> u64 {
        self.max_file_size
    }

    /// Creates both roots.
    pub async fn init(&self) -> Result<(), StorageError> {
        fs::create_dir_all(&self.upload_root).await?;
        fs::create_dir_all(&self.output_root).await?;
        Ok(())
    }

    /// Lower-cased extension (with leading dot) of `filename` if it is accepted.
    pub fn supported_extension(filename: &str) -> Option<String> {
        let ext = Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())?;
        SUPPORTED_EXTENSIONS
            .contains(&ext.as_str())
            .then(|| format!(".{}", ext))
    }

    pub fn upload_path(&self, job_id: &JobId, ext: &str) -> PathBuf {
        self.upload_root.join(format!("{}{}", job_id, ext))
    }

    /// Destination handed to the fetcher, which appends its own extension.
    pub fn remote_stem(&self, job_id: &JobId) -> PathBuf {
        self.upload_root.join(job_id.to_string())
    }

    pub fn output_dir(&self, job_id: &JobId) -> PathBuf {
        self.output_root.join(job_id.to_string())
    }

    /// Path of a published stem, or `None` if `filename` is not a plain file name.
    pub fn stem_path(&self, job_id: &JobId, filename: &str) -> Option<PathBuf> {
        if !is_plain_file_name(filename) {
            return None;
        }
        Some(self.output_dir(job_id).join(filename))
    }

    /// Persist an uploaded file for `job_id`.
    pub async fn save_upload(
        &self,
        job_id: &JobId,
        filename: &str,
        data: &[u8],
    ) -> Result<PathBuf, StorageError> {
        let size = data.len() as u64;
        if size > self.max_file_size {
            return Err(StorageError::FileTooLarge(size, self.max_file_size));
        }
        let ext = Self::supported_extension(filename)
            .ok_or_else(|| StorageError::UnsupportedFileType(filename.to_string()))?;

        fs::create_dir_all(&self.upload_root).await?;
        let path = self.upload_path(job_id, &ext);
        let mut file = fs::File::create(&path).await?;
        file.write_all(data).await?;
        file.flush().await?;
        Ok(path)
    }

    /// Remove every upload for `job_id` (whatever its extension) and its output
    /// directory. Returns how many entries were removed.
    pub async fn remove_job_files(&self, job_id: &JobId) -> Result<usize, StorageError> {
        let id = job_id.to_string();
        let mut removed = 0;

        match fs::read_dir(&self.upload_root).await {
            Ok(mut entries) => {
                while let Some(entry) = entries.next_entry().await? {
                    let path = entry.path();
                    let matches = path
                        .file_stem()
                        .and_then(|s| s.to_str())
                        .is_some_and(|stem| stem == id);
                    if matches && path.is_file() {
                        match fs::remove_file(&path).await {
                            Ok(()) => removed += 1,
                            Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
                        }
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let output_dir = self.output_dir(job_id);
        if output_dir.exists() {
            fs::remove_dir_all(&output_dir).await?;
            removed += 1;
        }

        Ok(removed)
    }
}

fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && !name.contains(['/', '\\', '\0'])
        && Path::new(name).file_name().and_then(|n| n.to_str()) == Some(name)
}
