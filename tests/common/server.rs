//! Test server lifecycle management
//!
//! This module manages spawning and shutting down test HTTP servers.
//! Each test gets an isolated server with its own storage roots and registry.

use super::constants::*;
use super::fixtures::{FakeEngine, FakeFetcher};
use std::sync::Arc;
use std::time::Duration;
use stem_splitter_server::orchestrator::Orchestrator;
use stem_splitter_server::server::{make_app, RequestsLoggingLevel, ServerConfig};
use stem_splitter_server::sweeper::RetentionSweeper;
use stem_splitter_server::worker::{WorkQueue, WorkerHandle};
use stem_splitter_server::{JobRegistry, JobStorage, StemLabel};
use tempfile::TempDir;
use tokio::net::TcpListener;

/// Knobs for a test server. `Default` gives a server whose engine produces
/// all six stems and accepts 50 MiB uploads.
pub struct TestServerOptions {
    pub max_file_size: u64,
    pub engine_labels: Vec<StemLabel>,
    pub engine_error: Option<String>,
}

impl Default for TestServerOptions {
    fn default() -> Self {
        Self {
            max_file_size: stem_splitter_server::config::DEFAULT_MAX_FILE_SIZE,
            engine_labels: StemLabel::ALL.to_vec(),
            engine_error: None,
        }
    }
}

/// Test server instance with isolated storage
///
/// When dropped, the server gracefully shuts down and temp resources are cleaned up.
pub struct TestServer {
    /// Base URL for making requests (e.g., "http://127.0.0.1:12345")
    pub base_url: String,

    /// The port the server is listening on
    pub port: u16,

    /// Registry for direct inspection in tests
    pub registry: Arc<JobRegistry>,

    /// Storage layout for direct file access in tests
    pub storage: JobStorage,

    // Private fields - keep resources alive until drop
    _temp_dir: TempDir,
    worker: WorkerHandle,
    _shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl TestServer {
    /// Spawns a new test server on a random port with default options
    pub async fn spawn() -> Self {
        Self::spawn_with(TestServerOptions::default()).await
    }

    /// Spawns a new test server on a random port
    ///
    /// # Panics
    ///
    /// Panics if port binding fails or the server doesn't become ready within timeout.
    pub async fn spawn_with(options: TestServerOptions) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let storage = JobStorage::new(
            temp_dir.path().join("uploads"),
            temp_dir.path().join("outputs"),
            options.max_file_size,
        );
        storage.init().await.expect("Failed to create storage roots");

        let registry = Arc::new(JobRegistry::new());
        let engine = Arc::new(FakeEngine {
            labels: options.engine_labels,
            error: options.engine_error,
        });
        let orchestrator = Arc::new(Orchestrator::new(
            registry.clone(),
            engine,
            storage.clone(),
        ));
        let sweeper = Arc::new(RetentionSweeper::new(
            vec![
                storage.upload_root().to_path_buf(),
                storage.output_root().to_path_buf(),
            ],
            Duration::from_secs(3600),
            registry.clone(),
        ));
        let worker = WorkQueue::start(orchestrator, sweeper, None);

        // Bind to random port
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");

        let port = listener
            .local_addr()
            .expect("Failed to get local address")
            .port();

        let base_url = format!("http://127.0.0.1:{}", port);

        // Create shutdown channel
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        let config = ServerConfig {
            port,
            metrics_port: 0,
            requests_logging_level: RequestsLoggingLevel::None,
            max_file_size: options.max_file_size,
        };

        let app = make_app(
            config,
            registry.clone(),
            storage.clone(),
            Arc::new(FakeFetcher),
            worker.clone(),
        );

        // Spawn server in background task with graceful shutdown
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .expect("Server failed");
        });

        let server = Self {
            base_url,
            port,
            registry,
            storage,
            _temp_dir: temp_dir,
            worker,
            _shutdown_tx: Some(shutdown_tx),
        };

        server.wait_for_ready().await;

        server
    }

    /// Waits for the server to become ready by polling the /health endpoint
    async fn wait_for_ready(&self) {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(100))
            .build()
            .expect("Failed to build reqwest client");

        let start = std::time::Instant::now();
        let timeout = Duration::from_millis(SERVER_READY_TIMEOUT_MS);

        loop {
            if start.elapsed() > timeout {
                panic!(
                    "Server did not become ready within {}ms",
                    SERVER_READY_TIMEOUT_MS
                );
            }

            match client.get(format!("{}/health", self.base_url)).send().await {
                Ok(response) if response.status().is_success() => return,
                _ => {
                    tokio::time::sleep(Duration::from_millis(SERVER_READY_POLL_INTERVAL_MS)).await;
                }
            }
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.worker.shutdown();
        if let Some(tx) = self._shutdown_tx.take() {
            let _ = tx.send(());
        }
        // TempDir will be cleaned up automatically
    }
}
