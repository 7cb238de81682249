//! Fetching remote media into the upload area.

mod yt_dlp;

pub use yt_dlp::YtDlpFetcher;

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Download failed: {0}")]
    Failed(String),

    #[error("Downloaded file not found at {}", .0.display())]
    MissingOutput(PathBuf),

    #[error("File too large: {0} bytes (max: {1})")]
    TooLarge(u64, u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait MediaFetcher: Send + Sync {
    /// Download the audio behind `url` to `<dest_stem>.mp3` and return that path.
    async fn fetch(&self, url: &str, dest_stem: &Path) -> Result<PathBuf, FetchError>;
}

/// Accepts absolute `http`/`https` URLs with a non-empty host.
pub fn validate_url(url: &str) -> Result<(), FetchError> {
    let url = url.trim();
    let invalid = || FetchError::InvalidUrl(url.to_string());
    // The parser would percent-encode these rather than reject them.
    if url.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(invalid());
    }
    let parsed = Url::parse(url).map_err(|_| invalid())?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(invalid());
    }
    match parsed.host_str() {
        Some(host) if !host.is_empty() => Ok(()),
        _ => Err(invalid()),
    }
}
