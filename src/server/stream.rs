//! Range-aware delivery of published stems

use super::error::ApiError;
use crate::jobs::JobId;
use crate::storage::JobStorage;
use axum::{
    body::Body,
    extract::{OptionalFromRequestParts, Path, State},
    http::{header, request::Parts, StatusCode},
    response::{IntoResponse, Response},
};
use std::convert::Infallible;
use std::path::Path as FsPath;
use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncSeekExt, BufReader, SeekFrom},
};
use tokio_util::io::ReaderStream;
use tracing::debug;

const READ_BUFFER_SIZE: usize = 4096 * 16;

/// A single `bytes=<start>-<end>` range. Either bound may be omitted.
///
/// An omitted start means "from the beginning", not a suffix range, so
/// `bytes=-500` covers bytes 0 through 500.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    start_inclusive: Option<u64>,
    end_inclusive: Option<u64>,
}

impl ByteRange {
    pub fn new(start_inclusive: Option<u64>, end_inclusive: Option<u64>) -> ByteRange {
        ByteRange {
            start_inclusive,
            end_inclusive,
        }
    }

    /// Returns `None` for anything that is not exactly one range with numeric
    /// or empty bounds.
    pub fn parse<S: AsRef<str>>(s: S) -> Option<ByteRange> {
        let v = s.as_ref().trim().strip_prefix("bytes=")?;
        let (start, end) = v.split_once('-')?;
        Some(ByteRange {
            start_inclusive: parse_bound(start)?,
            end_inclusive: parse_bound(end)?,
        })
    }

    /// Clamp the range to a file of `size` bytes. `None` when nothing can be served.
    pub fn resolve(&self, size: u64) -> Option<(u64, u64)> {
        if size == 0 {
            return None;
        }
        let last = size - 1;
        let start = self.start_inclusive.unwrap_or(0);
        let end = self.end_inclusive.map_or(last, |end| end.min(last));
        (start <= end).then_some((start, end))
    }
}

fn parse_bound(s: &str) -> Option<Option<u64>> {
    let s = s.trim();
    if s.is_empty() {
        return Some(None);
    }
    if !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse::<u64>().ok().map(Some)
}

impl<S: Send + Sync> OptionalFromRequestParts<S> for ByteRange {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Option<Self>, Self::Rejection> {
        Ok(parts
            .headers
            .get(header::RANGE)
            .and_then(|x| x.to_str().ok())
            .and_then(ByteRange::parse))
    }
}

/// How a stem is handed to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Saved by the browser as a file.
    Download,
    /// Played inline by an audio element.
    Stream,
}

impl Delivery {
    fn content_type(&self) -> &'static str {
        match self {
            Self::Download => "application/octet-stream",
            Self::Stream => "audio/wav",
        }
    }

    fn content_disposition(&self, file_name: &str) -> String {
        match self {
            Self::Download => {
                let quoted: String = file_name.chars().filter(|c| *c != '"').collect();
                format!("attachment; filename=\"{}\"", quoted)
            }
            Self::Stream => "inline".to_string(),
        }
    }
}

/// Serve `path` honoring an optional byte range.
pub async fn serve_file(
    path: &FsPath,
    byte_range: Option<ByteRange>,
    delivery: Delivery,
) -> Result<Response, ApiError> {
    let mut file = match File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(ApiError::FileNotFound),
        Err(e) => return Err(ApiError::Internal(e.to_string())),
    };
    let metadata = file
        .metadata()
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    if !metadata.is_file() {
        return Err(ApiError::FileNotFound);
    }
    let file_length = metadata.len();
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();

    let builder = Response::builder()
        .header(header::CONTENT_TYPE, delivery.content_type())
        .header(header::ACCEPT_RANGES, "bytes")
        .header(
            header::CONTENT_DISPOSITION,
            delivery.content_disposition(file_name),
        );

    let response = match byte_range {
        None => {
            let file_reader = BufReader::with_capacity(READ_BUFFER_SIZE, file);
            let stream = ReaderStream::with_capacity(file_reader, READ_BUFFER_SIZE);
            builder
                .status(StatusCode::OK)
                .header(header::CONTENT_LENGTH, file_length)
                .body(Body::from_stream(stream))
        }
        Some(range) => match range.resolve(file_length) {
            None => {
                debug!(
                    "Unsatisfiable range {:?} for {} ({} bytes)",
                    range,
                    path.display(),
                    file_length
                );
                builder
                    .status(StatusCode::RANGE_NOT_SATISFIABLE)
                    .header(header::CONTENT_RANGE, format!("bytes */{}", file_length))
                    .body(Body::empty())
            }
            Some((start, end)) => {
                if file.seek(SeekFrom::Start(start)).await.is_err() {
                    return Err(ApiError::Internal("Failed to seek".to_string()));
                }
                let chunk_size = end - start + 1;
                let file_reader =
                    BufReader::with_capacity(READ_BUFFER_SIZE, file).take(chunk_size);
                let stream = ReaderStream::with_capacity(file_reader, READ_BUFFER_SIZE);
                builder
                    .status(StatusCode::PARTIAL_CONTENT)
                    .header(
                        header::CONTENT_RANGE,
                        format!("bytes {}-{}/{}", start, end, file_length),
                    )
                    .header(header::CONTENT_LENGTH, chunk_size)
                    .body(Body::from_stream(stream))
            }
        },
    };

    response.map_err(|e| ApiError::Internal(e.to_string()))
}

async fn serve_stem(
    storage: &JobStorage,
    job_id: &str,
    filename: &str,
    byte_range: Option<ByteRange>,
    delivery: Delivery,
) -> Result<Response, ApiError> {
    let job_id = JobId::parse(job_id).ok_or(ApiError::FileNotFound)?;
    let path = storage
        .stem_path(&job_id, filename)
        .ok_or(ApiError::FileNotFound)?;
    debug!("Serving {} as {:?}", path.display(), delivery);
    serve_file(&path, byte_range, delivery).await
}

pub async fn download_stem(
    byte_range: Option<ByteRange>,
    State(storage): State<JobStorage>,
    Path((job_id, filename)): Path<(String, String)>,
) -> Response {
    serve_stem(&storage, &job_id, &filename, byte_range, Delivery::Download)
        .await
        .into_response()
}

pub async fn stream_stem(
    byte_range: Option<ByteRange>,
    State(storage): State<JobStorage>,
    Path((job_id, filename)): Path<(String, String)>,
) -> Response {
    serve_stem(&storage, &job_id, &filename, byte_range, Delivery::Stream)
        .await
        .into_response()
}
