use axum::extract::FromRef;

use crate::fetcher::MediaFetcher;
use crate::jobs::JobRegistry;
use crate::storage::JobStorage;
use crate::worker::WorkerHandle;
use std::sync::Arc;
use std::time::Instant;

use super::ServerConfig;

pub type GuardedJobRegistry = Arc<JobRegistry>;
pub type GuardedMediaFetcher = Arc<dyn MediaFetcher>;

#[derive(Clone)]
pub struct ServerState {
    pub config: ServerConfig,
    pub start_time: Instant,
    pub registry: GuardedJobRegistry,
    pub storage: JobStorage,
    pub fetcher: GuardedMediaFetcher,
    pub worker: WorkerHandle,
    pub hash: String,
}

impl FromRef<ServerState> for GuardedJobRegistry {
    fn from_ref(input: &ServerState) -> Self {
        input.registry.clone()
    }
}

impl FromRef<ServerState> for JobStorage {
    fn from_ref(input: &ServerState) -> Self {
        input.storage.clone()
    }
}

impl FromRef<ServerState> for ServerConfig {
    fn from_ref(input: &ServerState) -> Self {
        input.config.clone()
    }
}

impl FromRef<ServerState> for GuardedMediaFetcher {
    fn from_ref(input: &ServerState) -> Self {
        input.fetcher.clone()
    }
}

impl FromRef<ServerState> for WorkerHandle {
    fn from_ref(input: &ServerState) -> Self {
        input.worker.clone()
    }
}
