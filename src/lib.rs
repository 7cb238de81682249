//! Stem Splitter Server Library
//!
//! This library exposes the internal modules for testing and potential reuse.

pub mod config;
pub mod fetcher;
pub mod jobs;
pub mod orchestrator;
pub mod postprocess;
pub mod separator;
pub mod server;
pub mod storage;
pub mod sweeper;
pub mod worker;

// Re-export commonly used types for convenience
pub use jobs::{Job, JobId, JobRegistry, JobStatus, StemLabel};
pub use server::{make_app, run_server, RequestsLoggingLevel, ServerConfig};
pub use storage::JobStorage;
