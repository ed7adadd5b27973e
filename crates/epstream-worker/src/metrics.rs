//! Prometheus metrics for the pipeline.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

use crate::error::{WorkerError, WorkerResult};

/// Install the Prometheus recorder and serve `/metrics` on `addr`.
pub fn init_metrics(addr: SocketAddr) -> WorkerResult<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| WorkerError::config_error(format!("metrics exporter: {}", e)))
}

/// Metric names as constants for consistency.
pub mod names {
    // Job lifecycle
    pub const JOBS_STARTED_TOTAL: &str = "epstream_jobs_started_total";
    pub const JOBS_COMPLETED_TOTAL: &str = "epstream_jobs_completed_total";
    pub const JOBS_FAILED_TOTAL: &str = "epstream_jobs_failed_total";
    pub const JOBS_ACTIVE: &str = "epstream_jobs_active";

    // Processing
    pub const PROCESSING_DURATION_SECONDS: &str = "epstream_processing_duration_seconds";
    pub const TIER_ENCODE_DURATION_SECONDS: &str = "epstream_tier_encode_duration_seconds";
    pub const UPSCALE_DURATION_SECONDS: &str = "epstream_upscale_duration_seconds";
    pub const UPSCALE_CANCELLED_TOTAL: &str = "epstream_upscale_cancelled_total";
}

pub fn record_job_started() {
    counter!(names::JOBS_STARTED_TOTAL).increment(1);
}

pub fn record_job_completed(duration_secs: f64) {
    counter!(names::JOBS_COMPLETED_TOTAL).increment(1);
    histogram!(names::PROCESSING_DURATION_SECONDS).record(duration_secs);
}

/// Record a failed job, labelled by the error kind.
pub fn record_job_failed(kind: &str) {
    let labels = [("kind", kind.to_string())];
    counter!(names::JOBS_FAILED_TOTAL, &labels).increment(1);
}

pub fn set_active_jobs(count: usize) {
    gauge!(names::JOBS_ACTIVE).set(count as f64);
}

pub fn record_tier_encoded(tier: &str, duration_secs: f64) {
    let labels = [("tier", tier.to_string())];
    histogram!(names::TIER_ENCODE_DURATION_SECONDS, &labels).record(duration_secs);
}

pub fn record_upscale(duration_secs: f64, cancelled: bool) {
    histogram!(names::UPSCALE_DURATION_SECONDS).record(duration_secs);
    if cancelled {
        counter!(names::UPSCALE_CANCELLED_TOTAL).increment(1);
    }
}
