//! Request logging middleware
//!
//! Each line is tagged with the endpoint category and, on job routes, the job
//! id, so one job can be followed from upload to stream. Multipart uploads and
//! published stems are never buffered for body logging.

use super::super::state::ServerState;
use crate::jobs::JobId;
use crate::server::metrics::{categorize_endpoint, record_http_request, record_response_bytes};
use axum::extract::State;
use axum::{
    body::Body,
    http::{header, header::HeaderMap, Request, Response, StatusCode},
    middleware::Next,
    response::IntoResponse,
};
use std::fmt;
use std::time::Instant;
use tracing::{error, info};

#[derive(PartialEq, PartialOrd, Clone, Debug, clap::ValueEnum)]
pub enum RequestsLoggingLevel {
    None,
    Path,
    Headers,
    Body,
}

impl Default for RequestsLoggingLevel {
    fn default() -> Self {
        Self::Path
    }
}

impl fmt::Display for RequestsLoggingLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

const MAX_LOGGABLE_BODY_LENGTH: usize = 1024;

/// Endpoint category plus the job a request is about, if any.
#[derive(Debug, PartialEq)]
struct RequestTag {
    endpoint: &'static str,
    job_id: Option<JobId>,
}

impl RequestTag {
    fn from_path(path: &str) -> Self {
        let endpoint = categorize_endpoint(path);
        let job_id = match endpoint {
            "status" | "download" | "stream" | "job" => path
                .trim_start_matches('/')
                .split('/')
                .nth(1)
                .and_then(JobId::parse),
            _ => None,
        };
        Self { endpoint, job_id }
    }
}

impl fmt::Display for RequestTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.job_id {
            Some(id) => write!(f, "[{} job={}]", self.endpoint, id),
            None => write!(f, "[{}]", self.endpoint),
        }
    }
}

fn content_length(headers: &HeaderMap) -> Option<usize> {
    headers
        .get(header::CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .parse()
        .ok()
}

/// Audio files, stems and multipart uploads.
fn is_binary(headers: &HeaderMap) -> bool {
    let Some(content_type) = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
    else {
        return false;
    };
    content_type.starts_with("audio/")
        || content_type.starts_with("multipart/")
        || content_type.starts_with("application/octet-stream")
}

/// Logs `body` when it is short text and hands it back unchanged.
async fn log_body(
    tag: &RequestTag,
    label: &str,
    headers: &HeaderMap,
    body: Body,
) -> Result<Body, axum::Error> {
    let length = content_length(headers);
    if is_binary(headers) {
        match length {
            Some(size) => info!(
                "{}   {}: binary, {:#}",
                tag,
                label,
                byte_unit::Byte::from(size)
            ),
            None => info!("{}   {}: binary stream", tag, label),
        }
        return Ok(body);
    }
    match length {
        None => {
            info!("{}   {}: length unknown, not logged", tag, label);
            Ok(body)
        }
        Some(size) if size >= MAX_LOGGABLE_BODY_LENGTH => {
            info!(
                "{}   {}: too big to log ({:#})",
                tag,
                label,
                byte_unit::Byte::from(size)
            );
            Ok(body)
        }
        Some(size) => {
            let bytes = axum::body::to_bytes(body, size).await?;
            info!("{}   {}:\n{}", tag, label, String::from_utf8_lossy(&bytes));
            Ok(Body::from(bytes))
        }
    }
}

fn log_headers(tag: &RequestTag, label: &str, headers: &HeaderMap) {
    info!("{}   {}:", tag, label);
    for (name, value) in headers.iter() {
        info!("{}     {:?}: {:?}", tag, name, value);
    }
}

pub async fn log_requests(
    State(state): State<ServerState>,
    mut request: Request<Body>,
    next: Next,
) -> impl IntoResponse {
    let level = state.config.requests_logging_level.clone();

    let start = Instant::now();
    let method = request.method().to_string();
    let tag = RequestTag::from_path(request.uri().path());

    if level > RequestsLoggingLevel::None {
        info!("{} >>> {} {}", tag, method, request.uri());
    }
    if level >= RequestsLoggingLevel::Headers {
        log_headers(&tag, "Req Headers", request.headers());
    }
    if level >= RequestsLoggingLevel::Body {
        let (parts, body) = request.into_parts();
        match log_body(&tag, "Req Body", &parts.headers, body).await {
            Ok(body) => request = Request::from_parts(parts, body),
            Err(err) => {
                error!("{} Failed to read request body: {:?}", tag, err);
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        }
    }

    let mut response = next.run(request).await;

    if level >= RequestsLoggingLevel::Headers {
        log_headers(&tag, "Resp Headers", response.headers());
    }
    if level >= RequestsLoggingLevel::Body {
        let (parts, body) = response.into_parts();
        match log_body(&tag, "Resp Body", &parts.headers, body).await {
            Ok(body) => response = Response::from_parts(parts, body),
            Err(err) => {
                error!("{} Failed to read response body: {:?}", tag, err);
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        }
    }

    let status = response.status().as_u16();
    let duration = start.elapsed();

    if level > RequestsLoggingLevel::None {
        info!("{} <<< {} ({}ms)", tag, status, duration.as_millis());
    }

    record_http_request(&method, tag.endpoint, status, duration);
    if let Some(size) = content_length(response.headers()) {
        record_response_bytes(tag.endpoint, size as u64);
    }

    response
}
