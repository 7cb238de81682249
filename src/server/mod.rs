pub mod config;
pub mod error;
mod http_layers;
mod job_routes;
pub mod metrics;
#[allow(clippy::module_inception)]
pub mod server;
pub mod state;
pub mod stream;

pub use config::ServerConfig;
pub use error::{ApiError, ErrorResponse};
pub use http_layers::*;
pub use job_routes::{MessageResponse, SubmitResponse};
pub use server::{make_app, run_server};
