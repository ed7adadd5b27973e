//! Tracing setup and per-job log lines.

use std::fmt::Display;
use std::time::{Duration, Instant};
use tracing::{error, info, info_span, warn, Span};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install the global tracing subscriber.
///
/// Colored output by default, JSON when `LOG_FORMAT=json`. `RUST_LOG`
/// overrides the default `epstream=info` filter.
pub fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("epstream=info"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false)
                    .with_writer(std::io::stderr),
            )
            .with(env_filter)
            .init();
    }
}

/// Lifecycle logging for one episode job.
///
/// Lines are tagged with the episode id and the operation (`hls_transcode`
/// or `upscale_hls`); [`JobLogger::finished`] adds the wall time since the
/// logger was created.
#[derive(Debug, Clone)]
pub struct JobLogger {
    episode_id: String,
    operation: &'static str,
    started: Instant,
}

impl JobLogger {
    pub fn new(episode_id: impl Into<String>, operation: &'static str) -> Self {
        Self {
            episode_id: episode_id.into(),
            operation,
            started: Instant::now(),
        }
    }

    pub fn episode_id(&self) -> &str {
        &self.episode_id
    }

    pub fn operation(&self) -> &'static str {
        self.operation
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Span that job work is instrumented with.
    pub fn span(&self) -> Span {
        info_span!("job", episode_id = %self.episode_id, operation = self.operation)
    }

    pub fn started(&self, detail: impl Display) {
        info!(episode_id = %self.episode_id, operation = self.operation, "Job started: {}", detail);
    }

    pub fn step(&self, detail: impl Display) {
        info!(episode_id = %self.episode_id, "{}", detail);
    }

    pub fn warning(&self, detail: impl Display) {
        warn!(episode_id = %self.episode_id, "{}", detail);
    }

    pub fn failed(&self, error: impl Display) {
        error!(
            episode_id = %self.episode_id,
            operation = self.operation,
            elapsed_ms = self.elapsed().as_millis() as u64,
            "Job failed: {}", error
        );
    }

    pub fn finished(&self, detail: impl Display) {
        info!(
            episode_id = %self.episode_id,
            operation = self.operation,
            elapsed_ms = self.elapsed().as_millis() as u64,
            "Job finished: {}", detail
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_logger_fields() {
        let logger = JobLogger::new("ep-42", "hls_transcode");

        assert_eq!(logger.episode_id(), "ep-42");
        assert_eq!(logger.operation(), "hls_transcode");
        assert!(logger.elapsed() < Duration::from_secs(60));
    }
}
