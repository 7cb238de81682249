use anyhow::{Context, Result};
use std::time::{Duration, Instant};

use axum::{
    extract::State,
    middleware,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tracing::info;

use super::job_routes::job_routes;
use super::metrics::metrics_handler;
use super::state::*;
use super::stream::{download_stem, stream_stem};
use super::{log_requests, ServerConfig};
use crate::jobs::JobCounts;
use crate::storage::JobStorage;
use crate::worker::WorkerHandle;

#[derive(Serialize)]
struct ServerStats {
    pub name: &'static str,
    pub version: &'static str,
    pub uptime: String,
    pub hash: String,
    pub jobs: JobCounts,
}

#[derive(Serialize)]
struct HealthResponse {
    pub status: &'static str,
}

fn format_uptime(duration: Duration) -> String {
    let total_seconds = duration.as_secs();

    let days = total_seconds / 86_400;
    let hours = (total_seconds % 86_400) / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    format!("{}d {:02}:{:02}:{:02}", days, hours, minutes, seconds)
}

async fn home(State(state): State<ServerState>) -> impl IntoResponse {
    let stats = ServerStats {
        name: "Stem Splitter API",
        version: env!("CARGO_PKG_VERSION"),
        uptime: format_uptime(state.start_time.elapsed()),
        hash: state.hash.clone(),
        jobs: state.registry.counts(),
    };
    Json(stats)
}

async fn health() -> impl IntoResponse {
    Json(HealthResponse { status: "healthy" })
}

impl ServerState {
    fn new(
        config: ServerConfig,
        registry: GuardedJobRegistry,
        storage: JobStorage,
        fetcher: GuardedMediaFetcher,
        worker: WorkerHandle,
    ) -> ServerState {
        ServerState {
            config,
            start_time: Instant::now(),
            registry,
            storage,
            fetcher,
            worker,
            hash: env!("GIT_HASH").to_owned(),
        }
    }
}

pub fn make_app(
    config: ServerConfig,
    registry: GuardedJobRegistry,
    storage: JobStorage,
    fetcher: GuardedMediaFetcher,
    worker: WorkerHandle,
) -> Router {
    let max_file_size = config.max_file_size;
    let state = ServerState::new(config, registry, storage, fetcher, worker);

    let stem_routes: Router<ServerState> = Router::new()
        .route("/download/{job_id}/{filename}", get(download_stem))
        .route("/stream/{job_id}/{filename}", get(stream_stem));

    Router::new()
        .route("/", get(home))
        .route("/health", get(health))
        .merge(job_routes(max_file_size))
        .merge(stem_routes)
        .layer(middleware::from_fn_with_state(state.clone(), log_requests))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn make_metrics_app() -> Router {
    Router::new().route("/metrics", get(metrics_handler))
}

pub async fn run_server(
    config: ServerConfig,
    registry: GuardedJobRegistry,
    storage: JobStorage,
    fetcher: GuardedMediaFetcher,
    worker: WorkerHandle,
) -> Result<()> {
    let port = config.port;
    let metrics_port = config.metrics_port;
    let app = make_app(config, registry, storage, fetcher, worker);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port))
        .await
        .with_context(|| format!("Failed to bind port {}", port))?;
    let metrics_listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", metrics_port))
        .await
        .with_context(|| format!("Failed to bind metrics port {}", metrics_port))?;
    info!("Listening on {}", listener.local_addr()?);

    tokio::try_join!(
        async { axum::serve(listener, app).await.context("API server failed") },
        async {
            axum::serve(metrics_listener, make_metrics_app())
                .await
                .context("Metrics server failed")
        },
    )?;
    Ok(())
}
