//! Remote audio download through yt-dlp.

use super::{validate_url, FetchError, MediaFetcher};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct YtDlpFetcher {
    bin: PathBuf,
    max_file_size: u64,
}

impl YtDlpFetcher {
    pub fn new(bin: impl Into<PathBuf>, max_file_size: u64) -> Self {
        Self {
            bin: bin.into(),
            max_file_size,
        }
    }
}

#[async_trait]
impl MediaFetcher for YtDlpFetcher {
    async fn fetch(&self, url: &str, dest_stem: &Path) -> Result<PathBuf, FetchError> {
        validate_url(url)?;
        let url = url.trim();

        let mut template = dest_stem.as_os_str().to_os_string();
        template.push(".%(ext)s");
        let dest = dest_stem.with_extension("mp3");

        info!("Fetching {} into {}", url, dest.display());
        let output = Command::new(&self.bin)
            .args(["-x", "--audio-format", "mp3", "--no-playlist"])
            .arg("--max-filesize")
            .arg(self.max_file_size.to_string())
            .arg("-o")
            .arg(&template)
            .arg("--")
            .arg(url)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(FetchError::Failed(if stderr.is_empty() {
                format!("yt-dlp exited with {}", output.status)
            } else {
                stderr
            }));
        }

        let size = match tokio::fs::metadata(&dest).await {
            Ok(meta) => meta.len(),
            Err(_) => return Err(FetchError::MissingOutput(dest)),
        };
        if size > self.max_file_size {
            warn!(
                "Fetched file {} is {} bytes, over the {} byte limit",
                dest.display(),
                size,
                self.max_file_size
            );
            let _ = tokio::fs::remove_file(&dest).await;
            return Err(FetchError::TooLarge(size, self.max_file_size));
        }

        Ok(dest)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn fake_yt_dlp(dir: &Path, body: &str) -> PathBuf {
        let script = dir.join("fake-yt-dlp");
        std::fs::write(&script, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        script
    }

    #[tokio::test]
    async fn test_rejects_non_http_url_without_running() {
        let dir = TempDir::new().unwrap();
        let fetcher = YtDlpFetcher::new("/nonexistent/yt-dlp", 1024);
        let err = fetcher
            .fetch("file:///etc/passwd", &dir.path().join("job"))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::InvalidUrl(_)));
    }

    #[tokio::test]
    async fn test_failure_carries_stderr() {
        let dir = TempDir::new().unwrap();
        let bin = fake_yt_dlp(dir.path(), "echo 'ERROR: Video unavailable' >&2\nexit 1");
        let fetcher = YtDlpFetcher::new(bin, 1024);
        let err = fetcher
            .fetch("https://youtu.be/x", &dir.path().join("job"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Download failed: ERROR: Video unavailable");
    }

    #[tokio::test]
    async fn test_missing_output_is_an_error() {
        let dir = TempDir::new().unwrap();
        let bin = fake_yt_dlp(dir.path(), "exit 0");
        let fetcher = YtDlpFetcher::new(bin, 1024);
        let err = fetcher
            .fetch("https://youtu.be/x", &dir.path().join("job"))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::MissingOutput(_)));
    }

    #[tokio::test]
    async fn test_oversize_output_is_removed() {
        let dir = TempDir::new().unwrap();
        let dest_stem = dir.path().join("job");
        let bin = fake_yt_dlp(
            dir.path(),
            &format!("head -c 2048 /dev/zero > '{}.mp3'", dest_stem.display()),
        );
        let fetcher = YtDlpFetcher::new(bin, 1024);
        let err = fetcher
            .fetch("https://youtu.be/x", &dest_stem)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::TooLarge(2048, 1024)));
        assert!(!dir.path().join("job.mp3").exists());
    }

    #[tokio::test]
    async fn test_successful_fetch_returns_mp3_path() {
        let dir = TempDir::new().unwrap();
        let dest_stem = dir.path().join("job");
        let bin = fake_yt_dlp(
            dir.path(),
            &format!("printf 'ID3' > '{}.mp3'", dest_stem.display()),
        );
        let fetcher = YtDlpFetcher::new(bin, 1024);
        let path = fetcher.fetch("https://youtu.be/x", &dest_stem).await.unwrap();
        assert_eq!(path, dir.path().join("job.mp3"));
    }
}
