//! Data models for separation jobs.
//!
//! A job moves through a closed set of states. Terminal states carry their
//! payload (stems or error) so a record can never hold both at once.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Opaque job identifier, a random UUID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parses a job id from its textual form. Anything that is not a UUID is rejected,
    /// which also keeps path parameters from escaping the storage roots.
    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

/// The fixed set of stems produced for every job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StemLabel {
    Vocals,
    Bass,
    Drums,
    Guitar,
    Piano,
    Other,
}

impl StemLabel {
    pub const ALL: [StemLabel; 6] = [
        StemLabel::Vocals,
        StemLabel::Bass,
        StemLabel::Drums,
        StemLabel::Guitar,
        StemLabel::Piano,
        StemLabel::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vocals => "vocals",
            Self::Bass => "bass",
            Self::Drums => "drums",
            Self::Guitar => "guitar",
            Self::Piano => "piano",
            Self::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|label| label.as_str() == s)
    }

    /// Name of the backing file, both as produced by the engine and as published.
    pub fn file_name(&self) -> String {
        format!("{}.wav", self.as_str())
    }
}

impl fmt::Display for StemLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// URL paths a client uses to fetch a produced stem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StemLocators {
    /// Attachment download.
    pub wav: String,
    /// Seekable playback.
    pub stream: String,
}

impl StemLocators {
    pub fn for_stem(job_id: &JobId, label: StemLabel) -> Self {
        let file_name = label.file_name();
        Self {
            wav: format!("/download/{}/{}", job_id, file_name),
            stream: format!("/stream/{}/{}", job_id, file_name),
        }
    }
}

pub type StemMap = BTreeMap<StemLabel, StemLocators>;

/// Where the job's input came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobSource {
    Upload { filename: String },
    Remote { url: String },
}

impl JobSource {
    /// Original filename or source URL.
    pub fn descriptor(&self) -> &str {
        match self {
            Self::Upload { filename } => filename,
            Self::Remote { url } => url,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Upload { .. } => "upload",
            Self::Remote { .. } => "remote",
        }
    }
}

/// Status of a job as reported to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Waiting for the orchestrator.
    Queued,
    /// Remote source is being fetched.
    Downloading,
    /// Separation and post-processing in progress.
    Processing,
    /// Stems available.
    Completed,
    /// Failed (non-recoverable).
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Downloading => "downloading",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum JobState {
    Queued,
    Downloading,
    Processing,
    Completed { stems: StemMap },
    Failed { error: String },
}

impl JobState {
    pub fn status(&self) -> JobStatus {
        match self {
            Self::Queued => JobStatus::Queued,
            Self::Downloading => JobStatus::Downloading,
            Self::Processing => JobStatus::Processing,
            Self::Completed { .. } => JobStatus::Completed,
            Self::Failed { .. } => JobStatus::Failed,
        }
    }
}

/// A separation job record. Instances handed out by the registry are snapshots.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub id: JobId,
    pub source: JobSource,
    pub state: JobState,
    /// Percent complete, 0-100.
    pub progress: u8,
    pub created_at: DateTime<Utc>,
}

impl Job {
    pub(crate) fn new(id: JobId, source: JobSource) -> Self {
        Self {
            id,
            source,
            state: JobState::Queued,
            progress: 0,
            created_at: Utc::now(),
        }
    }

    pub fn status(&self) -> JobStatus {
        self.state.status()
    }

    pub fn stems(&self) -> Option<&StemMap> {
        match &self.state {
            JobState::Completed { stems } => Some(stems),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.state {
            JobState::Failed { error } => Some(error),
            _ => None,
        }
    }
}

#[derive(Serialize)]
struct JobView<'a> {
    id: &'a JobId,
    filename: &'a str,
    source: &'static str,
    status: JobStatus,
    progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    stems: Option<&'a StemMap>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
    created_at: String,
}

impl Serialize for Job {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        JobView {
            id: &self.id,
            filename: self.source.descriptor(),
            source: self.source.kind(),
            status: self.status(),
            progress: self.progress,
            stems: self.stems(),
            error: self.error(),
            created_at: self.created_at.to_rfc3339(),
        }
        .serialize(serializer)
    }
}

/// A state change requested of the registry.
#[derive(Debug, Clone, PartialEq)]
pub enum JobUpdate {
    Downloading,
    Queued { progress: u8 },
    Processing { progress: u8 },
    Completed { stems: StemMap },
    Failed { error: String },
}

impl JobUpdate {
    pub fn target_status(&self) -> JobStatus {
        match self {
            Self::Downloading => JobStatus::Downloading,
            Self::Queued { .. } => JobStatus::Queued,
            Self::Processing { .. } => JobStatus::Processing,
            Self::Completed { .. } => JobStatus::Completed,
            Self::Failed { .. } => JobStatus::Failed,
        }
    }
}
