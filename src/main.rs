use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use std::{fmt::Debug, path::PathBuf};
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use stem_splitter_server::config::{self, AppConfig, FileConfig};
use stem_splitter_server::fetcher::{MediaFetcher, YtDlpFetcher};
use stem_splitter_server::jobs::JobRegistry;
use stem_splitter_server::orchestrator::Orchestrator;
use stem_splitter_server::separator::{DemucsSeparator, SeparationEngine};
use stem_splitter_server::server::{metrics, run_server, RequestsLoggingLevel, ServerConfig};
use stem_splitter_server::storage::JobStorage;
use stem_splitter_server::sweeper::RetentionSweeper;
use stem_splitter_server::worker::WorkQueue;

fn parse_path(s: &str) -> Result<PathBuf, String> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(format!("Error resolving path '{}': {}", s, msg));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir().map_err(|e| format!("Failed to get current dir: {}", e))?;
    Ok(cwd.join(original_path))
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to TOML configuration file. Values in the file override CLI arguments.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// The port to listen on.
    #[clap(short, long, default_value_t = 8000)]
    pub port: u16,

    /// The port for the metrics server (Prometheus scraping).
    #[clap(long, default_value_t = 9091)]
    pub metrics_port: u16,

    /// The level of logging to perform on each request.
    #[clap(long, default_value = "path")]
    pub logging_level: RequestsLoggingLevel,

    /// Directory where submitted audio is stored.
    #[clap(long, value_parser = parse_path, default_value = "./tmp/uploads")]
    pub upload_dir: PathBuf,

    /// Directory where separated stems are published.
    #[clap(long, value_parser = parse_path, default_value = "./tmp/outputs")]
    pub output_dir: PathBuf,

    /// Largest accepted input, in bytes.
    #[clap(long, env = "MAX_FILE_SIZE", default_value_t = config::DEFAULT_MAX_FILE_SIZE)]
    pub max_file_size: u64,

    /// Seconds after which uploads and outputs are swept.
    #[clap(long, env = "CLEANUP_AFTER", default_value_t = config::DEFAULT_RETENTION_SECS)]
    pub retention_secs: u64,

    /// Seconds between periodic sweeps. Set to 0 to sweep only after submissions.
    #[clap(long, default_value_t = config::DEFAULT_SWEEP_INTERVAL_SECS)]
    pub sweep_interval_secs: u64,

    /// demucs executable.
    #[clap(long, default_value = "demucs")]
    pub demucs_bin: String,

    /// demucs model name.
    #[clap(long, default_value = stem_splitter_server::separator::DEFAULT_MODEL)]
    pub demucs_model: String,

    /// yt-dlp executable.
    #[clap(long, default_value = "yt-dlp")]
    pub yt_dlp_bin: String,
}

/// Convert CLI args to CliConfig for config resolution
impl From<&CliArgs> for config::CliConfig {
    fn from(args: &CliArgs) -> Self {
        config::CliConfig {
            port: args.port,
            metrics_port: args.metrics_port,
            logging_level: args.logging_level.clone(),
            upload_dir: args.upload_dir.clone(),
            output_dir: args.output_dir.clone(),
            max_file_size: args.max_file_size,
            retention_secs: args.retention_secs,
            sweep_interval_secs: args.sweep_interval_secs,
            demucs_bin: args.demucs_bin.clone(),
            demucs_model: args.demucs_model.clone(),
            yt_dlp_bin: args.yt_dlp_bin.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .context("Failed to initialize logging")?;

    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading config from {:?}", path);
            Some(FileConfig::load(path)?)
        }
        None => None,
    };
    let app_config = AppConfig::resolve(&config::CliConfig::from(&cli_args), file_config)?;

    info!("Initializing metrics...");
    metrics::init_metrics();

    let storage = JobStorage::new(
        &app_config.upload_dir,
        &app_config.output_dir,
        app_config.max_file_size,
    );
    storage
        .init()
        .await
        .context("Failed to create storage directories")?;
    info!(
        "Storing uploads in {:?} and stems in {:?}",
        app_config.upload_dir, app_config.output_dir
    );

    let registry = Arc::new(JobRegistry::new());

    let engine: Arc<dyn SeparationEngine> = Arc::new(DemucsSeparator::new(
        &app_config.separator.demucs_bin,
        app_config.separator.model.clone(),
    ));
    let fetcher: Arc<dyn MediaFetcher> = Arc::new(YtDlpFetcher::new(
        &app_config.fetcher.yt_dlp_bin,
        app_config.max_file_size,
    ));
    info!(
        "Separating with {:?} (model {})",
        app_config.separator.demucs_bin, app_config.separator.model
    );

    let orchestrator = Arc::new(Orchestrator::new(
        registry.clone(),
        engine,
        storage.clone(),
    ));
    let sweeper = Arc::new(RetentionSweeper::new(
        vec![app_config.upload_dir.clone(), app_config.output_dir.clone()],
        app_config.retention,
        registry.clone(),
    ));
    match app_config.sweep_interval {
        Some(interval) => info!(
            "Retention {}s, sweeping every {}s and after each submission",
            app_config.retention.as_secs(),
            interval.as_secs()
        ),
        None => info!(
            "Retention {}s, sweeping after each submission",
            app_config.retention.as_secs()
        ),
    }
    let worker = WorkQueue::start(orchestrator, sweeper, app_config.sweep_interval);

    // Spawn background task for process metrics updates
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            metrics::update_memory_usage();
        }
    });

    let server_config = ServerConfig {
        requests_logging_level: app_config.logging_level.clone(),
        port: app_config.port,
        metrics_port: app_config.metrics_port,
        max_file_size: app_config.max_file_size,
    };

    info!("Ready to serve at port {}!", app_config.port);
    info!("Metrics available at port {}!", app_config.metrics_port);

    tokio::select! {
        result = run_server(server_config, registry, storage, fetcher, worker.clone()) => {
            info!("HTTP server stopped: {:?}", result);
            worker.shutdown();
            result
        },
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, initiating graceful shutdown");
            worker.shutdown();
            Ok(())
        }
    }
}
