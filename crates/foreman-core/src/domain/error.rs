//! Task error taxonomy and classification.
//!
//! Two kinds of handler failure exist and nothing else:
//! - `Fatal`: the job is permanently unprocessable. It will be acknowledged
//!   and never retried.
//! - `Transient`: everything else. The job will be requeued and redelivered
//!   per the transport's own retry policy.
//!
//! Classification is by variant, not by inspecting concrete error types.
//! Conversions from plain error values produce `Transient`, so an error the
//! handler did not explicitly mark as fatal stays retryable.

use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Non-retryable task failure, declared by the handler itself.
///
/// Carries a human-readable message and optionally the causing error.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct FatalTaskError {
    message: String,
    #[source]
    source: Option<BoxError>,
}

impl FatalTaskError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// How a failed attempt is settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Disposition {
    /// Acknowledge; the job is treated as permanently processed.
    Fatal,

    /// Requeue; the transport redelivers the job for another attempt.
    Transient,
}

/// Failure returned by a task handler.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error(transparent)]
    Fatal(#[from] FatalTaskError),

    #[error("{message}")]
    Transient {
        message: String,
        #[source]
        source: Option<BoxError>,
    },
}

impl TaskError {
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal(FatalTaskError::new(message))
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
            source: None,
        }
    }

    /// Classify this failure.
    ///
    /// Only the `Fatal` variant maps to `Disposition::Fatal`; any other
    /// failure is transient so that an unclassified error is retried rather
    /// than silently dropped.
    pub fn disposition(&self) -> Disposition {
        match self {
            TaskError::Fatal(_) => Disposition::Fatal,
            TaskError::Transient { .. } => Disposition::Transient,
        }
    }
}

impl From<BoxError> for TaskError {
    fn from(source: BoxError) -> Self {
        Self::Transient {
            message: source.to_string(),
            source: Some(source),
        }
    }
}

impl From<String> for TaskError {
    fn from(message: String) -> Self {
        Self::transient(message)
    }
}

impl From<&str> for TaskError {
    fn from(message: &str) -> Self {
        Self::transient(message)
    }
}

impl From<serde_json::Error> for TaskError {
    fn from(source: serde_json::Error) -> Self {
        Self::Transient {
            message: format!("json decode: {source}"),
            source: Some(Box::new(source)),
        }
    }
}
