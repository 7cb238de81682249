//! In-memory job registry.
//!
//! The registry is the single owner of job records. Every operation takes the
//! same lock and callers only ever receive cloned snapshots.

use super::models::{Job, JobId, JobSource, JobState, JobStatus, JobUpdate};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;

/// Errors returned by registry operations.
#[derive(Debug, Error, PartialEq)]
pub enum RegistryError {
    #[error("Job not found: {0}")]
    NotFound(JobId),

    #[error("Illegal transition for job {id}: {from} -> {to}")]
    IllegalTransition {
        id: JobId,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("Job {0} cannot complete without stems")]
    NoStems(JobId),
}

/// Number of jobs currently in each status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JobCounts {
    pub queued: usize,
    pub downloading: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
}

#[derive(Default)]
pub struct JobRegistry {
    jobs: Mutex<HashMap<JobId, Job>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // A panic while holding the lock cannot leave a record half-written, every
    // mutation below is a single assignment, so a poisoned map is still consistent.
    fn lock(&self) -> MutexGuard<'_, HashMap<JobId, Job>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocate a fresh id and insert a queued job for it.
    pub fn create(&self, source: JobSource) -> JobId {
        let mut jobs = self.lock();
        let id = loop {
            let candidate = JobId::new();
            if !jobs.contains_key(&candidate) {
                break candidate;
            }
        };
        jobs.insert(id, Job::new(id, source));
        id
    }

    pub fn get(&self, id: &JobId) -> Option<Job> {
        self.lock().get(id).cloned()
    }

    /// Atomically apply `update` to the job, enforcing the status state machine.
    ///
    /// Progress never moves backwards and only reaches 100 on completion.
    pub fn transition(&self, id: &JobId, update: JobUpdate) -> Result<Job, RegistryError> {
        let mut jobs = self.lock();
        let job = jobs.get_mut(id).ok_or(RegistryError::NotFound(*id))?;

        let from = job.status();
        let to = update.target_status();
        if !is_allowed(from, to) {
            return Err(RegistryError::IllegalTransition { id: *id, from, to });
        }

        match update {
            JobUpdate::Downloading => job.state = JobState::Downloading,
            JobUpdate::Queued { progress } => {
                job.state = JobState::Queued;
                job.progress = advance(job.progress, progress);
            }
            JobUpdate::Processing { progress } => {
                job.state = JobState::Processing;
                job.progress = advance(job.progress, progress);
            }
            JobUpdate::Completed { stems } => {
                if stems.is_empty() {
                    return Err(RegistryError::NoStems(*id));
                }
                job.state = JobState::Completed { stems };
                job.progress = 100;
            }
            JobUpdate::Failed { error } => {
                let error = if error.trim().is_empty() {
                    "unknown error".to_string()
                } else {
                    error
                };
                job.state = JobState::Failed { error };
            }
        }

        Ok(job.clone())
    }

    /// Remove the record. Backing files are the caller's concern.
    pub fn delete(&self, id: &JobId) -> Result<Job, RegistryError> {
        self.lock().remove(id).ok_or(RegistryError::NotFound(*id))
    }

    /// Ids of jobs that have not reached a terminal status.
    pub fn active_ids(&self) -> HashSet<JobId> {
        self.lock()
            .values()
            .filter(|job| !job.status().is_terminal())
            .map(|job| job.id)
            .collect()
    }

    pub fn counts(&self) -> JobCounts {
        let jobs = self.lock();
        let mut counts = JobCounts::default();
        for job in jobs.values() {
            match job.status() {
                JobStatus::Queued => counts.queued += 1,
                JobStatus::Downloading => counts.downloading += 1,
                JobStatus::Processing => counts.processing += 1,
                JobStatus::Completed => counts.completed += 1,
                JobStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

fn is_allowed(from: JobStatus, to: JobStatus) -> bool {
    use JobStatus::*;
    if from.is_terminal() {
        return false;
    }
    matches!(
        (from, to),
        (Queued, Downloading)
            | (Downloading, Queued)
            | (Queued, Processing)
            | (Processing, Processing)
            | (Processing, Completed)
            | (_, Failed)
    )
}

fn advance(current: u8, requested: u8) -> u8 {
    current.max(requested.min(99))
}
