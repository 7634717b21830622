//! Error taxonomy for the filtering engine.

use thiserror::Error;

/// Result type alias using [`FilterError`].
pub type Result<T> = std::result::Result<T, FilterError>;

/// Errors surfaced by the filter, index, and search layers.
#[derive(Error, Debug)]
pub enum FilterError {
    /// Source file missing when a job was requested. No job is created.
    #[error("Source not found: {0}")]
    SourceNotFound(String),

    /// The worker observed its cancellation flag and stopped.
    #[error("Job cancelled")]
    JobCancelled,

    /// Unexpected failure inside a running job
    #[error("Job failed: {0}")]
    Job(String),

    /// Index file missing or malformed.
    #[error("Index corrupt: {0}")]
    IndexCorrupt(String),

    /// Unknown session id
    #[error("Session not found: {0}")]
    NotFound(String),

    /// Browsing or searching a session that has not finished
    #[error("Session not ready: {0}")]
    NotReady(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Pattern error: {0}")]
    Pattern(#[from] regex::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl FilterError {
    /// Stable tag used on the wire so clients can branch on the failure kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SourceNotFound(_) => "source_not_found",
            Self::JobCancelled => "job_cancelled",
            Self::Job(_) => "job_error",
            Self::IndexCorrupt(_) => "index_corrupt",
            Self::NotFound(_) => "not_found",
            Self::NotReady(_) => "not_ready",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Pattern(_) => "pattern",
            Self::Io(_) => "io",
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::IndexCorrupt(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_tags_are_distinct() {
        let errors = [
            FilterError::SourceNotFound("a".into()),
            FilterError::JobCancelled,
            FilterError::Job("b".into()),
            FilterError::corrupt("c"),
            FilterError::NotFound("d".into()),
            FilterError::NotReady("e".into()),
            FilterError::invalid("f"),
            FilterError::Io(std::io::Error::other("g")),
        ];

        let mut kinds: Vec<_> = errors.iter().map(|e| e.kind()).collect();
        kinds.sort_unstable();
        kinds.dedup();
        assert_eq!(kinds.len(), errors.len());
    }

    #[test]
    fn test_display_keeps_message() {
        let err = FilterError::Job("disk full".to_string());
        assert_eq!(err.to_string(), "Job failed: disk full");
    }
}
