//! HTTP client for end-to-end tests
//!
//! This module wraps reqwest and provides methods for every server endpoint.
//! When API routes or request formats change, update only this file.

use super::constants::*;
use reqwest::multipart::{Form, Part};
use reqwest::Response;
use serde_json::{json, Value};
use std::time::{Duration, Instant};

/// HTTP test client
pub struct TestClient {
    /// The underlying reqwest client (public for custom requests in tests)
    pub client: reqwest::Client,
    /// The base URL of the test server
    pub base_url: String,
}

impl TestClient {
    pub fn new(base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .expect("Failed to build reqwest client");

        Self { client, base_url }
    }

    // ========================================================================
    // Service Endpoints
    // ========================================================================

    /// GET /
    pub async fn home(&self) -> Response {
        self.client
            .get(format!("{}/", self.base_url))
            .send()
            .await
            .expect("Home request failed")
    }

    /// GET /health
    pub async fn health(&self) -> Response {
        self.client
            .get(format!("{}/health", self.base_url))
            .send()
            .await
            .expect("Health request failed")
    }

    // ========================================================================
    // Job Endpoints
    // ========================================================================

    /// POST /upload with `data` as the `file` field
    pub async fn upload(&self, filename: &str, data: Vec<u8>) -> Response {
        let part = Part::bytes(data).file_name(filename.to_string());
        let form = Form::new().part("file", part);
        self.client
            .post(format!("{}/upload", self.base_url))
            .multipart(form)
            .send()
            .await
            .expect("Upload request failed")
    }

    /// POST /upload without a `file` field
    pub async fn upload_without_file(&self) -> Response {
        let form = Form::new().text("comment", "no file here");
        self.client
            .post(format!("{}/upload", self.base_url))
            .multipart(form)
            .send()
            .await
            .expect("Upload request failed")
    }

    /// POST /process-youtube
    pub async fn process_remote(&self, url: &str) -> Response {
        self.client
            .post(format!("{}/process-youtube", self.base_url))
            .json(&json!({ "url": url }))
            .send()
            .await
            .expect("Remote source request failed")
    }

    /// GET /status/{job_id}
    pub async fn status(&self, job_id: &str) -> Response {
        self.client
            .get(format!("{}/status/{}", self.base_url, job_id))
            .send()
            .await
            .expect("Status request failed")
    }

    /// DELETE /job/{job_id}
    pub async fn delete_job(&self, job_id: &str) -> Response {
        self.client
            .delete(format!("{}/job/{}", self.base_url, job_id))
            .send()
            .await
            .expect("Delete request failed")
    }

    /// Upload `data` and return the new job id.
    ///
    /// # Panics
    ///
    /// Panics if the upload is rejected.
    pub async fn submit_upload(&self, data: Vec<u8>) -> String {
        let response = self.upload(TEST_UPLOAD_NAME, data).await;
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        let body: Value = response.json().await.expect("Invalid submit response");
        body["job_id"]
            .as_str()
            .expect("Missing job_id")
            .to_string()
    }

    /// Poll a job until it is `completed` or `failed` and return its record.
    ///
    /// # Panics
    ///
    /// Panics if the job doesn't finish within `JOB_TIMEOUT_MS`.
    pub async fn wait_for_job(&self, job_id: &str) -> Value {
        let start = Instant::now();
        loop {
            let response = self.status(job_id).await;
            assert_eq!(response.status(), reqwest::StatusCode::OK);
            let job: Value = response.json().await.expect("Invalid job record");
            if matches!(job["status"].as_str(), Some("completed") | Some("failed")) {
                return job;
            }
            if start.elapsed() > Duration::from_millis(JOB_TIMEOUT_MS) {
                panic!("Job {} did not finish: {}", job_id, job);
            }
            tokio::time::sleep(Duration::from_millis(JOB_POLL_INTERVAL_MS)).await;
        }
    }

    // ========================================================================
    // Stem Endpoints
    // ========================================================================

    /// GET /download/{job_id}/{filename}
    pub async fn download(&self, job_id: &str, filename: &str) -> Response {
        self.client
            .get(format!("{}/download/{}/{}", self.base_url, job_id, filename))
            .send()
            .await
            .expect("Download request failed")
    }

    /// GET /stream/{job_id}/{filename}, optionally with a raw Range header
    pub async fn stream(&self, job_id: &str, filename: &str, range: Option<&str>) -> Response {
        let mut request = self
            .client
            .get(format!("{}/stream/{}/{}", self.base_url, job_id, filename));
        if let Some(range) = range {
            request = request.header(reqwest::header::RANGE, range);
        }
        request.send().await.expect("Stream request failed")
    }
}
