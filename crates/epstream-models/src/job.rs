//! Job lifecycle records for progress tracking and polling.
//!
//! A [`JobRecord`] is the snapshot external callers poll while an episode
//! is being packaged. Records only change through [`JobRecord::apply`], which
//! enforces the forward-only status machine and monotonic progress.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Highest progress value a job may report before it completes.
pub const MAX_ACTIVE_PROGRESS: u8 = 99;

/// Job processing status.
///
/// Non-failure statuses are ordered; a job only moves forward through them.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default,
)]
#[serde(rename_all = "kebab-case")]
pub enum JobStatus {
    /// Job registered, nothing has run yet
    #[default]
    Queued,
    /// Source metadata is being probed
    Analyzing,
    /// A quality tier is being encoded
    Converting,
    /// The master playlist is being written
    ComposingPlaylist,
    /// Job completed successfully
    Completed,
    /// Job failed with an error
    Failed,
}

impl JobStatus {
    /// Get string representation of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Analyzing => "analyzing",
            JobStatus::Converting => "converting",
            JobStatus::ComposingPlaylist => "composing-playlist",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Check if this is a terminal state (no more updates expected).
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    fn rank(&self) -> u8 {
        match self {
            JobStatus::Queued => 0,
            JobStatus::Analyzing => 1,
            JobStatus::Converting => 2,
            JobStatus::ComposingPlaylist => 3,
            JobStatus::Completed => 4,
            JobStatus::Failed => u8::MAX,
        }
    }

    /// Whether a job in this status may move to `next`.
    ///
    /// Staying in the same status is allowed so repeated per-tier
    /// `converting` updates go through.
    pub fn can_advance_to(&self, next: JobStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        next == JobStatus::Failed || next.rank() >= self.rank()
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Rejected job record update.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("job already finished with status {0}")]
    Terminal(JobStatus),

    #[error("cannot move job from {from} back to {to}")]
    Backward { from: JobStatus, to: JobStatus },
}

/// Current lifecycle state of one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    /// Job identifier (the episode id)
    pub id: String,
    /// Current job status
    pub status: JobStatus,
    /// Progress percentage (0-100)
    pub progress: u8,
    /// Current processing step description
    pub current_step: String,
    /// When the job was started
    pub started_at: DateTime<Utc>,
    /// When the record was last updated
    pub updated_at: DateTime<Utc>,
    /// Error message if job failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobRecord {
    /// Create a freshly queued job record.
    pub fn new(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            status: JobStatus::Queued,
            progress: 0,
            current_step: "Queued".to_string(),
            started_at: now,
            updated_at: now,
            error: None,
        }
    }

    /// Check if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Merge a partial update into this record.
    ///
    /// Progress never moves backward while the job is active and stays below
    /// 100 until the job completes. A failure freezes progress at its last
    /// recorded value.
    pub fn apply(&mut self, update: JobUpdate) -> Result<(), TransitionError> {
        if self.is_terminal() {
            return Err(TransitionError::Terminal(self.status));
        }

        let next = update.status.unwrap_or(self.status);
        if !self.status.can_advance_to(next) {
            return Err(TransitionError::Backward {
                from: self.status,
                to: next,
            });
        }

        match next {
            JobStatus::Completed => self.progress = 100,
            JobStatus::Failed => {}
            _ => {
                if let Some(progress) = update.progress {
                    let capped = progress.min(MAX_ACTIVE_PROGRESS);
                    self.progress = self.progress.max(capped);
                }
            }
        }

        self.status = next;
        if let Some(step) = update.current_step {
            self.current_step = step;
        }
        if update.error.is_some() {
            self.error = update.error;
        }
        self.updated_at = Utc::now();

        Ok(())
    }
}

/// Partial update merged into a [`JobRecord`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct JobUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<JobStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobUpdate {
    /// Update that moves the job to `status`.
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    /// Update that only reports progress.
    pub fn progress(progress: u8) -> Self {
        Self {
            progress: Some(progress),
            ..Default::default()
        }
    }

    /// Update that marks the job failed with an error message.
    pub fn failed(error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            status: Some(JobStatus::Failed),
            current_step: Some("Failed".to_string()),
            error: Some(error),
            ..Default::default()
        }
    }

    /// Update that marks the job completed.
    pub fn completed() -> Self {
        Self {
            status: Some(JobStatus::Completed),
            progress: Some(100),
            current_step: Some("Complete".to_string()),
            ..Default::default()
        }
    }

    /// Set progress on this update.
    pub fn with_progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Set the step description on this update.
    pub fn with_step(mut self, step: impl Into<String>) -> Self {
        self.current_step = Some(step.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_record_creation() {
        let record = JobRecord::new("ep-1");
        assert_eq!(record.status, JobStatus::Queued);
        assert_eq!(record.progress, 0);
        assert!(!record.is_terminal());
    }

    #[test]
    fn test_forward_transitions() {
        let mut record = JobRecord::new("ep-1");

        record
            .apply(JobUpdate::status(JobStatus::Analyzing).with_progress(5))
            .unwrap();
        record
            .apply(JobUpdate::status(JobStatus::Converting).with_progress(20))
            .unwrap();
        record
            .apply(JobUpdate::status(JobStatus::Converting).with_progress(50))
            .unwrap();
        assert_eq!(record.progress, 50);

        record.apply(JobUpdate::completed()).unwrap();
        assert_eq!(record.status, JobStatus::Completed);
        assert_eq!(record.progress, 100);
        assert_eq!(record.current_step, "Complete");
    }

    #[test]
    fn test_backward_transition_rejected() {
        let mut record = JobRecord::new("ep-1");
        record
            .apply(JobUpdate::status(JobStatus::ComposingPlaylist))
            .unwrap();

        let err = record
            .apply(JobUpdate::status(JobStatus::Converting))
            .unwrap_err();
        assert_eq!(
            err,
            TransitionError::Backward {
                from: JobStatus::ComposingPlaylist,
                to: JobStatus::Converting
            }
        );
    }

    #[test]
    fn test_progress_does_not_regress() {
        let mut record = JobRecord::new("ep-1");
        record
            .apply(JobUpdate::status(JobStatus::Converting).with_progress(60))
            .unwrap();
        record.apply(JobUpdate::progress(40)).unwrap();
        assert_eq!(record.progress, 60);
    }

    #[test]
    fn test_progress_capped_until_completed() {
        let mut record = JobRecord::new("ep-1");
        record
            .apply(JobUpdate::status(JobStatus::Converting).with_progress(100))
            .unwrap();
        assert_eq!(record.progress, MAX_ACTIVE_PROGRESS);
    }

    #[test]
    fn test_failure_freezes_progress() {
        let mut record = JobRecord::new("ep-1");
        record
            .apply(JobUpdate::status(JobStatus::Analyzing).with_progress(5))
            .unwrap();
        record
            .apply(JobUpdate::failed("no video stream").with_progress(80))
            .unwrap();

        assert_eq!(record.status, JobStatus::Failed);
        assert_eq!(record.progress, 5);
        assert_eq!(record.error.as_deref(), Some("no video stream"));

        let err = record.apply(JobUpdate::progress(90)).unwrap_err();
        assert_eq!(err, TransitionError::Terminal(JobStatus::Failed));
    }

    #[test]
    fn test_status_serializes_kebab_case() {
        let json = serde_json::to_string(&JobStatus::ComposingPlaylist).unwrap();
        assert_eq!(json, "\"composing-playlist\"");
    }
}
