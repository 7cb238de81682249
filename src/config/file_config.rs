use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub port: Option<u16>,
    pub metrics_port: Option<u16>,
    pub logging_level: Option<String>,
    pub upload_dir: Option<String>,
    pub output_dir: Option<String>,
    pub max_file_size: Option<u64>,
    pub retention_secs: Option<u64>,
    pub sweep_interval_secs: Option<u64>,

    // External tools
    pub separator: Option<SeparatorConfig>,
    pub fetcher: Option<FetcherConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct SeparatorConfig {
    pub demucs_bin: Option<String>,
    /// demucs model name, e.g. "htdemucs_6s"
    pub model: Option<String>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct FetcherConfig {
    pub yt_dlp_bin: Option<String>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
