//! Runs separation jobs end to end.
//!
//! A run moves the job to `processing`, invokes the separation engine in a
//! scratch directory, normalizes every produced stem into the output area and
//! finally completes the job with locators for what was published. Any error
//! becomes a `failed` transition at the end of the run.

use crate::jobs::{JobId, JobRegistry, JobUpdate, RegistryError, StemLabel, StemLocators, StemMap};
use crate::postprocess::{process_stem, PostProcessError, StemReport};
use crate::separator::{SeparationEngine, SeparationError};
use crate::server::metrics;
use crate::storage::JobStorage;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{error, info, warn};

const PROGRESS_STARTED: u8 = 10;
const PROGRESS_SEPARATED: u8 = 30;
const PROGRESS_POSTPROCESS_SPAN: u8 = 60;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Separation(#[from] SeparationError),

    #[error("separation produced no stems")]
    NoStems,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed { stems: usize },
    Failed { error: String },
    /// The job was deleted while running; its outputs were removed.
    Abandoned,
}

impl RunOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Completed { .. } => "completed",
            Self::Failed { .. } => "failed",
            Self::Abandoned => "abandoned",
        }
    }
}

pub struct Orchestrator {
    registry: Arc<JobRegistry>,
    engine: Arc<dyn SeparationEngine>,
    storage: JobStorage,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<JobRegistry>,
        engine: Arc<dyn SeparationEngine>,
        storage: JobStorage,
    ) -> Self {
        Self {
            registry,
            engine,
            storage,
        }
    }

    pub async fn run(&self, job_id: JobId, input: PathBuf) -> RunOutcome {
        let start = Instant::now();
        info!("Starting separation for job {}", job_id);

        let outcome = match self.try_run(&job_id, &input).await {
            Ok(stems) => {
                info!("Job {} completed with {} stems", job_id, stems);
                RunOutcome::Completed { stems }
            }
            Err(OrchestratorError::Registry(RegistryError::NotFound(_))) => {
                self.abandon(&job_id).await
            }
            Err(e) => {
                let message = e.to_string();
                error!("Job {} failed: {}", job_id, message);
                match self.registry.transition(
                    &job_id,
                    JobUpdate::Failed {
                        error: message.clone(),
                    },
                ) {
                    Ok(_) => RunOutcome::Failed { error: message },
                    Err(RegistryError::NotFound(_)) => self.abandon(&job_id).await,
                    Err(e) => {
                        warn!("Could not record failure for job {}: {}", job_id, e);
                        RunOutcome::Failed { error: message }
                    }
                }
            }
        };

        metrics::record_job_finished(outcome.label(), start.elapsed());
        outcome
    }

    async fn try_run(&self, job_id: &JobId, input: &Path) -> Result<usize, OrchestratorError> {
        self.registry.transition(
            job_id,
            JobUpdate::Processing {
                progress: PROGRESS_STARTED,
            },
        )?;

        let scratch = tempfile::Builder::new()
            .prefix(&format!("separate-{}-", job_id))
            .tempdir()?;
        let files = self.engine.separate(input, scratch.path()).await?;

        self.registry.transition(
            job_id,
            JobUpdate::Processing {
                progress: PROGRESS_SEPARATED,
            },
        )?;

        let output_dir = self.storage.output_dir(job_id);
        tokio::fs::create_dir_all(&output_dir).await?;

        let mut stems = StemMap::new();
        for (index, label) in StemLabel::ALL.into_iter().enumerate() {
            match files.get(&label) {
                None => warn!("Job {}: engine produced no {} stem", job_id, label),
                Some(src) => {
                    let dst = output_dir.join(label.file_name());
                    match postprocess_blocking(src.clone(), dst).await {
                        Ok(report) => {
                            info!(
                                "Job {}: {} stem ready ({} Hz, peak {:.3} -> {:.3})",
                                job_id, label, report.sample_rate, report.peak_in, report.peak_out
                            );
                            stems.insert(label, StemLocators::for_stem(job_id, label));
                            metrics::record_stem_produced(label.as_str());
                        }
                        Err(e) => warn!("Job {}: skipping {} stem: {}", job_id, label, e),
                    }
                }
            }

            let done = (index + 1) as u32;
            let total = StemLabel::ALL.len() as u32;
            let progress =
                PROGRESS_SEPARATED + (PROGRESS_POSTPROCESS_SPAN as u32 * done / total) as u8;
            self.registry
                .transition(job_id, JobUpdate::Processing { progress })?;
        }

        if stems.is_empty() {
            return Err(OrchestratorError::NoStems);
        }

        let count = stems.len();
        self.registry
            .transition(job_id, JobUpdate::Completed { stems })?;
        Ok(count)
    }

    async fn abandon(&self, job_id: &JobId) -> RunOutcome {
        info!("Job {} was deleted while running, discarding outputs", job_id);
        let output_dir = self.storage.output_dir(job_id);
        if let Err(e) = tokio::fs::remove_dir_all(&output_dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove {}: {}", output_dir.display(), e);
            }
        }
        RunOutcome::Abandoned
    }
}

async fn postprocess_blocking(src: PathBuf, dst: PathBuf) -> Result<StemReport, PostProcessError> {
    tokio::task::spawn_blocking(move || process_stem(&src, &dst))
        .await
        .map_err(|e| PostProcessError::Io(std::io::Error::other(e)))?
}
