//! Error types for media operations.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur during media processing.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("Input file not found: {0}")]
    NotFound(PathBuf),

    #[error("Analysis failed: {0}")]
    Analysis(String),

    #[error("Conversion failed for {tier}: {message}")]
    Conversion { tier: String, message: String },

    #[error("FFmpeg command failed: {message}")]
    FfmpegFailed {
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    #[error("Failed to write playlist {path}: {source}")]
    PlaylistWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Process exited successfully but reported no output path")]
    OutputNotFound,

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Process exited with code {code}")]
    ProcessExit { code: i32 },

    #[error("A supervised process is already running (pid {0:?})")]
    Busy(Option<u32>),

    #[error("{0} not found")]
    ToolNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MediaError {
    /// Create an analysis failure error.
    pub fn analysis(message: impl Into<String>) -> Self {
        Self::Analysis(message.into())
    }

    /// Create a conversion failure error for a tier.
    pub fn conversion(tier: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Conversion {
            tier: tier.into(),
            message: message.into(),
        }
    }

    /// Create an FFmpeg failure error.
    pub fn ffmpeg_failed(
        message: impl Into<String>,
        stderr: Option<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self::FfmpegFailed {
            message: message.into(),
            stderr,
            exit_code,
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Check if this error came from an explicit cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, MediaError::Cancelled)
    }
}
