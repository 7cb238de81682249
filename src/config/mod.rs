mod file_config;

pub use file_config::{FetcherConfig, FileConfig, SeparatorConfig};

use crate::server::RequestsLoggingLevel;
use anyhow::{bail, Result};
use clap::ValueEnum;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_MAX_FILE_SIZE: u64 = 50 * 1024 * 1024;
pub const DEFAULT_RETENTION_SECS: u64 = 3600;
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 900;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone)]
pub struct CliConfig {
    pub port: u16,
    pub metrics_port: u16,
    pub logging_level: RequestsLoggingLevel,
    pub upload_dir: PathBuf,
    pub output_dir: PathBuf,
    pub max_file_size: u64,
    pub retention_secs: u64,
    pub sweep_interval_secs: u64,
    pub demucs_bin: String,
    pub demucs_model: String,
    pub yt_dlp_bin: String,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            port: 8000,
            metrics_port: 9091,
            logging_level: RequestsLoggingLevel::Path,
            upload_dir: PathBuf::from("./tmp/uploads"),
            output_dir: PathBuf::from("./tmp/outputs"),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            retention_secs: DEFAULT_RETENTION_SECS,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
            demucs_bin: "demucs".to_string(),
            demucs_model: crate::separator::DEFAULT_MODEL.to_string(),
            yt_dlp_bin: "yt-dlp".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub metrics_port: u16,
    pub logging_level: RequestsLoggingLevel,
    pub upload_dir: PathBuf,
    pub output_dir: PathBuf,
    pub max_file_size: u64,
    pub retention: Duration,
    /// `None` disables the periodic sweep.
    pub sweep_interval: Option<Duration>,
    pub separator: SeparatorSettings,
    pub fetcher: FetcherSettings,
}

#[derive(Debug, Clone)]
pub struct SeparatorSettings {
    pub demucs_bin: PathBuf,
    pub model: String,
}

#[derive(Debug, Clone)]
pub struct FetcherSettings {
    pub yt_dlp_bin: PathBuf,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let port = file.port.unwrap_or(cli.port);
        let metrics_port = file.metrics_port.unwrap_or(cli.metrics_port);
        if port == metrics_port && port != 0 {
            bail!("port and metrics_port must differ (both {})", port);
        }

        let logging_level = file
            .logging_level
            .and_then(|s| parse_logging_level(&s))
            .unwrap_or_else(|| cli.logging_level.clone());

        let upload_dir = file
            .upload_dir
            .map(PathBuf::from)
            .unwrap_or_else(|| cli.upload_dir.clone());
        let output_dir = file
            .output_dir
            .map(PathBuf::from)
            .unwrap_or_else(|| cli.output_dir.clone());
        if upload_dir == output_dir {
            bail!(
                "upload_dir and output_dir must be different directories: {:?}",
                upload_dir
            );
        }

        let max_file_size = file.max_file_size.unwrap_or(cli.max_file_size);
        if max_file_size == 0 {
            bail!("max_file_size must be greater than 0");
        }

        let retention_secs = file.retention_secs.unwrap_or(cli.retention_secs);
        if retention_secs == 0 {
            bail!("retention_secs must be greater than 0");
        }

        let sweep_interval_secs = file.sweep_interval_secs.unwrap_or(cli.sweep_interval_secs);
        let sweep_interval =
            (sweep_interval_secs > 0).then(|| Duration::from_secs(sweep_interval_secs));

        let separator_file = file.separator.unwrap_or_default();
        let separator = SeparatorSettings {
            demucs_bin: PathBuf::from(
                separator_file
                    .demucs_bin
                    .unwrap_or_else(|| cli.demucs_bin.clone()),
            ),
            model: separator_file
                .model
                .unwrap_or_else(|| cli.demucs_model.clone()),
        };
        if separator.model.trim().is_empty() {
            bail!("separator model must not be empty");
        }

        let fetcher_file = file.fetcher.unwrap_or_default();
        let fetcher = FetcherSettings {
            yt_dlp_bin: PathBuf::from(
                fetcher_file
                    .yt_dlp_bin
                    .unwrap_or_else(|| cli.yt_dlp_bin.clone()),
            ),
        };

        Ok(Self {
            port,
            metrics_port,
            logging_level,
            upload_dir,
            output_dir,
            max_file_size,
            retention: Duration::from_secs(retention_secs),
            sweep_interval,
            separator,
            fetcher,
        })
    }
}

/// Parses a logging level string into RequestsLoggingLevel.
/// Uses clap's ValueEnum trait for parsing.
fn parse_logging_level(s: &str) -> Option<RequestsLoggingLevel> {
    RequestsLoggingLevel::from_str(s, true).ok()
}
