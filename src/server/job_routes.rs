//! Job HTTP routes.
//!
//! Provides endpoints for:
//! - Submitting an uploaded file or a remote URL for separation
//! - Polling a job record
//! - Deleting a job and its files

use axum::{
    extract::{
        multipart::MultipartError, rejection::JsonRejection, DefaultBodyLimit, Multipart, Path,
        State,
    },
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info, warn};

use super::error::ApiError;
use super::metrics::record_job_submitted;
use super::state::{GuardedJobRegistry, GuardedMediaFetcher, ServerState};
use crate::fetcher::validate_url;
use crate::jobs::{Job, JobId, JobSource, JobStatus, JobUpdate, RegistryError};
use crate::storage::{JobStorage, StorageError, SUPPORTED_EXTENSIONS};
use crate::worker::{WorkItem, WorkerHandle};

/// Headroom above the upload limit for multipart framing, so an oversize file
/// is still answered with a JSON 413 by the handler.
const MULTIPART_OVERHEAD: u64 = 1024 * 1024;

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub job_id: String,
    pub status: JobStatus,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct RemoteSourceBody {
    pub url: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

// =============================================================================
// Helpers
// =============================================================================

fn parse_job_id(raw: &str) -> Result<JobId, ApiError> {
    JobId::parse(raw).ok_or(ApiError::JobNotFound)
}

fn allowed_extensions() -> String {
    SUPPORTED_EXTENSIONS
        .iter()
        .map(|ext| format!(".{}", ext))
        .collect::<Vec<_>>()
        .join(", ")
}

fn multipart_error(e: MultipartError, max_size: u64) -> ApiError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        return ApiError::PayloadTooLarge(max_size);
    }
    ApiError::BadRequest(format!("Failed to read upload: {}", e.body_text()))
}

/// Hand a job whose input is on disk to the work queue, followed by a sweep.
/// If the queue is gone the job is failed so it never sits in `queued`.
fn schedule(
    registry: &GuardedJobRegistry,
    worker: &WorkerHandle,
    job_id: JobId,
    input_path: PathBuf,
) -> Result<(), ApiError> {
    if let Err(e) = worker.submit(WorkItem::Separate {
        job_id,
        input_path,
    }) {
        warn!("Could not schedule job {}: {}", job_id, e);
        if let Err(e) = registry.transition(
            &job_id,
            JobUpdate::Failed {
                error: e.to_string(),
            },
        ) {
            debug!("Could not fail unscheduled job {}: {}", job_id, e);
        }
        return Err(ApiError::Internal(e.to_string()));
    }
    if let Err(e) = worker.submit(WorkItem::Sweep) {
        warn!("Could not schedule sweep: {}", e);
    }
    Ok(())
}

struct UploadedFile {
    filename: Option<String>,
    data: Vec<u8>,
    too_large: bool,
}

/// Read the `file` field chunk by chunk, keeping at most `max_size` bytes.
/// The rest of an oversize field is drained so the client sees the response.
async fn read_upload(multipart: &mut Multipart, max_size: u64) -> Result<UploadedFile, ApiError> {
    let mut upload = UploadedFile {
        filename: None,
        data: Vec::new(),
        too_large: false,
    };

    let read_error = |e| multipart_error(e, max_size);
    while let Some(mut field) = multipart.next_field().await.map_err(read_error)? {
        if field.name() != Some("file") || upload.filename.is_some() {
            continue;
        }
        upload.filename = Some(field.file_name().unwrap_or_default().to_string());

        while let Some(chunk) = field.chunk().await.map_err(read_error)? {
            if upload.too_large {
                continue;
            }
            if (upload.data.len() + chunk.len()) as u64 > max_size {
                upload.too_large = true;
                upload.data = Vec::new();
                continue;
            }
            upload.data.extend_from_slice(&chunk);
        }
    }
    Ok(upload)
}

// =============================================================================
// Routes
// =============================================================================

/// POST /upload - Submit a local file (multipart/form-data, field `file`)
async fn upload_file(
    State(registry): State<GuardedJobRegistry>,
    State(storage): State<JobStorage>,
    State(worker): State<WorkerHandle>,
    mut multipart: Multipart,
) -> Result<Json<SubmitResponse>, ApiError> {
    let max_size = storage.max_file_size();
    let upload = read_upload(&mut multipart, max_size).await?;

    if upload.too_large {
        return Err(ApiError::PayloadTooLarge(max_size));
    }
    let filename = match upload.filename {
        Some(f) if !f.is_empty() => f,
        _ => return Err(ApiError::BadRequest("No file provided".to_string())),
    };
    if JobStorage::supported_extension(&filename).is_none() {
        return Err(ApiError::BadRequest(format!(
            "Invalid file type. Allowed: {}",
            allowed_extensions()
        )));
    }

    let job_id = registry.create(JobSource::Upload {
        filename: filename.clone(),
    });
    let input_path = match storage.save_upload(&job_id, &filename, &upload.data).await {
        Ok(path) => path,
        Err(e) => {
            warn!("Failed to store upload for job {}: {}", job_id, e);
            if let Err(e) = registry.delete(&job_id) {
                debug!("Could not drop job {}: {}", job_id, e);
            }
            return Err(match e {
                StorageError::FileTooLarge(_, max) => ApiError::PayloadTooLarge(max),
                StorageError::UnsupportedFileType(_) => ApiError::BadRequest(e.to_string()),
                StorageError::Io(_) => ApiError::Internal(e.to_string()),
            });
        }
    };
    info!(
        "File uploaded: {} -> {} ({} bytes)",
        filename,
        job_id,
        upload.data.len()
    );

    schedule(&registry, &worker, job_id, input_path)?;
    record_job_submitted("upload");

    Ok(Json(SubmitResponse {
        job_id: job_id.to_string(),
        status: JobStatus::Queued,
        message: "File uploaded successfully. Processing started.".to_string(),
    }))
}

/// POST /process-youtube - Fetch a remote source, then submit it
async fn process_remote(
    State(registry): State<GuardedJobRegistry>,
    State(storage): State<JobStorage>,
    State(fetcher): State<GuardedMediaFetcher>,
    State(worker): State<WorkerHandle>,
    body: Result<Json<RemoteSourceBody>, JsonRejection>,
) -> Result<Json<SubmitResponse>, ApiError> {
    let Json(body) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let url = body.url.trim().to_string();
    validate_url(&url).map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let job_id = registry.create(JobSource::Remote { url: url.clone() });
    registry
        .transition(&job_id, JobUpdate::Downloading)
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    info!("Fetching remote source for job {}: {}", job_id, url);

    let input_path = match fetcher.fetch(&url, &storage.remote_stem(&job_id)).await {
        Ok(path) => path,
        Err(e) => {
            warn!("Remote fetch failed for job {}: {}", job_id, e);
            if let Err(e) = registry.transition(
                &job_id,
                JobUpdate::Failed {
                    error: e.to_string(),
                },
            ) {
                debug!("Could not fail job {}: {}", job_id, e);
            }
            if let Err(e) = storage.remove_job_files(&job_id).await {
                warn!("Failed to clean up job {}: {}", job_id, e);
            }
            return Err(ApiError::BadRequest(e.to_string()));
        }
    };

    match registry.transition(&job_id, JobUpdate::Queued { progress: 5 }) {
        Ok(_) => {}
        // Deleted while downloading.
        Err(RegistryError::NotFound(_)) => {
            if let Err(e) = storage.remove_job_files(&job_id).await {
                warn!("Failed to clean up job {}: {}", job_id, e);
            }
            return Err(ApiError::JobNotFound);
        }
        Err(e) => return Err(ApiError::Internal(e.to_string())),
    }

    schedule(&registry, &worker, job_id, input_path)?;
    record_job_submitted("remote");

    Ok(Json(SubmitResponse {
        job_id: job_id.to_string(),
        status: JobStatus::Queued,
        message: "Remote audio downloaded successfully. Processing started.".to_string(),
    }))
}

/// GET /status/{job_id} - Current job record
async fn get_status(
    State(registry): State<GuardedJobRegistry>,
    Path(job_id): Path<String>,
) -> Result<Json<Job>, ApiError> {
    let job_id = parse_job_id(&job_id)?;
    registry.get(&job_id).map(Json).ok_or(ApiError::JobNotFound)
}

/// DELETE /job/{job_id} - Remove the record, the upload and every stem.
/// The record is gone even when removing the files fails.
async fn delete_job(
    State(registry): State<GuardedJobRegistry>,
    State(storage): State<JobStorage>,
    Path(job_id): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    let job_id = parse_job_id(&job_id)?;
    registry.delete(&job_id).map_err(|_| ApiError::JobNotFound)?;

    match storage.remove_job_files(&job_id).await {
        Ok(removed) => debug!("Removed {} entries for job {}", removed, job_id),
        Err(e) => {
            warn!("Failed to remove files for job {}: {}", job_id, e);
            return Err(ApiError::Internal(format!("Error deleting job: {}", e)));
        }
    }
    info!("Deleted job {}", job_id);

    Ok(Json(MessageResponse {
        message: "Job deleted successfully".to_string(),
    }))
}

// =============================================================================
// Router Construction
// =============================================================================

/// Build the job routes.
///
/// - POST /upload
/// - POST /process-youtube
/// - GET /status/{job_id}
/// - DELETE /job/{job_id}
pub fn job_routes(max_file_size: u64) -> Router<ServerState> {
    let body_limit = max_file_size.saturating_add(MULTIPART_OVERHEAD);
    let upload_route = Router::new()
        .route("/upload", post(upload_file))
        .layer(DefaultBodyLimit::max(
            usize::try_from(body_limit).unwrap_or(usize::MAX),
        ));

    Router::new()
        .merge(upload_route)
        .route("/process-youtube", post(process_remote))
        .route("/status/{job_id}", get(get_status))
        .route("/job/{job_id}", delete(delete_job))
}
