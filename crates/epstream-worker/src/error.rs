//! Worker error types.

use thiserror::Error;

use epstream_models::TransitionError;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Media(#[from] epstream_media::MediaError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Timed out after {0} seconds")]
    Timeout(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Underlying media error, if this is one.
    pub fn as_media(&self) -> Option<&epstream_media::MediaError> {
        match self {
            Self::Media(e) => Some(e),
            _ => None,
        }
    }
}

/// Rejected registry operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("No job record for {0}")]
    NotFound(String),

    #[error("Job {0} is still running")]
    AlreadyActive(String),

    #[error("Job {id}: {source}")]
    Transition {
        id: String,
        #[source]
        source: TransitionError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use epstream_media::MediaError;

    #[test]
    fn test_media_errors_keep_their_message() {
        let err: WorkerError = MediaError::analysis("No video stream found").into();
        assert_eq!(err.to_string(), "Analysis failed: No video stream found");
        assert!(matches!(err.as_media(), Some(MediaError::Analysis(_))));
    }
}
