//! Job records and the registry that owns them.
//!
//! Lifecycle: `queued → downloading → queued → processing → completed`,
//! or `failed` from any non-terminal state. `downloading` only happens for
//! remote submissions.

mod models;
mod registry;

pub use models::{
    Job, JobId, JobSource, JobState, JobStatus, JobUpdate, StemLabel, StemLocators, StemMap,
};
pub use registry::{JobCounts, JobRegistry, RegistryError};
