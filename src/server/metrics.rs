use axum::{http::StatusCode, response::IntoResponse};
use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Encoder, Gauge, Histogram, HistogramOpts, HistogramVec, Opts, Registry,
    TextEncoder,
};
use std::time::Duration;

/// Metric name prefix for all stem splitter metrics
const PREFIX: &str = "stem_splitter";

lazy_static! {
    // Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // HTTP Request Metrics
    pub static ref HTTP_REQUESTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_http_requests_total"), "Total number of HTTP requests"),
        &["method", "endpoint", "status"]
    ).expect("Failed to create http_requests_total metric");

    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_http_request_duration_seconds"),
            "HTTP request duration in seconds"
        )
        .buckets(vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 60.0]),
        &["method", "endpoint"]
    ).expect("Failed to create http_request_duration_seconds metric");

    pub static ref HTTP_RESPONSE_BYTES_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_http_response_bytes_total"), "Response bytes by endpoint"),
        &["endpoint"]
    ).expect("Failed to create http_response_bytes_total metric");

    // Job Metrics
    pub static ref JOBS_SUBMITTED_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_jobs_submitted_total"), "Jobs accepted by source"),
        &["source"]
    ).expect("Failed to create jobs_submitted_total metric");

    pub static ref JOBS_FINISHED_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_jobs_finished_total"), "Job runs finished by outcome"),
        &["outcome"]
    ).expect("Failed to create jobs_finished_total metric");

    pub static ref JOB_RUN_DURATION_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            format!("{PREFIX}_job_run_duration_seconds"),
            "Separation and post-processing duration in seconds"
        )
        .buckets(vec![1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0])
    ).expect("Failed to create job_run_duration_seconds metric");

    pub static ref STEMS_PRODUCED_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_stems_produced_total"), "Stems published by label"),
        &["label"]
    ).expect("Failed to create stems_produced_total metric");

    // Retention Metrics
    pub static ref SWEEP_DELETIONS_TOTAL: Counter = Counter::new(
        format!("{PREFIX}_sweep_deletions_total"),
        "Expired entries removed by the retention sweeper"
    ).expect("Failed to create sweep_deletions_total metric");

    pub static ref SWEEP_ERRORS_TOTAL: Counter = Counter::new(
        format!("{PREFIX}_sweep_errors_total"),
        "Entries the retention sweeper failed to remove"
    ).expect("Failed to create sweep_errors_total metric");

    pub static ref PROCESS_MEMORY_BYTES: Gauge = Gauge::new(
        format!("{PREFIX}_process_memory_bytes"),
        "Process memory usage in bytes"
    ).expect("Failed to create process_memory_bytes metric");
}

/// Initialize all metrics and register them with the Prometheus registry
pub fn init_metrics() {
    // Ignore errors if already registered (for tests)
    let _ = REGISTRY.register(Box::new(HTTP_REQUESTS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(HTTP_REQUEST_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(HTTP_RESPONSE_BYTES_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(JOBS_SUBMITTED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(JOBS_FINISHED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(JOB_RUN_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(STEMS_PRODUCED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(SWEEP_DELETIONS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(SWEEP_ERRORS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(PROCESS_MEMORY_BYTES.clone()));

    tracing::info!("Metrics system initialized successfully");
}

/// Collapse a request path to a fixed endpoint label so job ids never become
/// label values.
pub fn categorize_endpoint(path: &str) -> &'static str {
    let first = path.trim_start_matches('/').split('/').next().unwrap_or("");
    match first {
        "" => "home",
        "health" => "health",
        "upload" => "upload",
        "process-youtube" => "process_youtube",
        "status" => "status",
        "download" => "download",
        "stream" => "stream",
        "job" => "job",
        _ => "other",
    }
}

pub fn record_http_request(method: &str, endpoint: &str, status: u16, duration: Duration) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, endpoint, &status.to_string()])
        .inc();

    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, endpoint])
        .observe(duration.as_secs_f64());
}

pub fn record_response_bytes(endpoint: &str, bytes: u64) {
    if bytes > 0 {
        HTTP_RESPONSE_BYTES_TOTAL
            .with_label_values(&[endpoint])
            .inc_by(bytes as f64);
    }
}

/// Record an accepted submission (`upload` or `remote`)
pub fn record_job_submitted(source: &str) {
    JOBS_SUBMITTED_TOTAL.with_label_values(&[source]).inc();
}

/// Record the end of an orchestrator run
pub fn record_job_finished(outcome: &str, duration: Duration) {
    JOBS_FINISHED_TOTAL.with_label_values(&[outcome]).inc();
    JOB_RUN_DURATION_SECONDS.observe(duration.as_secs_f64());
}

pub fn record_stem_produced(label: &str) {
    STEMS_PRODUCED_TOTAL.with_label_values(&[label]).inc();
}

pub fn record_sweep(deleted: usize, errors: usize) {
    SWEEP_DELETIONS_TOTAL.inc_by(deleted as f64);
    SWEEP_ERRORS_TOTAL.inc_by(errors as f64);
}

/// Update process memory usage
pub fn update_memory_usage() {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            for line in status.lines() {
                if line.starts_with("VmRSS:") {
                    // RSS is reported in kB
                    if let Some(kb) = line
                        .split_whitespace()
                        .nth(1)
                        .and_then(|s| s.parse::<f64>().ok())
                    {
                        PROCESS_MEMORY_BYTES.set(kb * 1024.0);
                    }
                    return;
                }
            }
        }
    }
}

/// Handler for the /metrics endpoint
pub async fn metrics_handler() -> impl IntoResponse {
    update_memory_usage();

    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = vec![];
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => {
            let response = String::from_utf8(buffer).unwrap_or_default();
            (StatusCode::OK, response)
        }
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to encode metrics: {}", e),
            )
        }
    }
}
