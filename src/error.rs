use thiserror::Error;

/// Errors produced by the pipeline and its components.
///
/// Each variant corresponds to one failure kind the HTTP layer knows how to
/// translate into a status code; see [`crate::http`].
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Caller-side validation failure (missing or out-of-range fields).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A referenced entity does not exist (simulation, analysis, run).
    #[error("{0} not found")]
    NotFound(String),

    /// Low-level HTTP transport failure (connection refused, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The model vendor returned a non-success status code.
    #[error("model call failed with HTTP {status}: {body}")]
    Upstream {
        /// HTTP status code (e.g. 429, 500, 503).
        status: u16,
        /// Response body text.
        body: String,
    },

    /// The model emitted output that could not be coerced into the declared
    /// schema, even after fence stripping and candidate extraction.
    #[error("malformed model output: {0}")]
    MalformedOutput(String),

    /// JSON (de)serialization failed at the serde level.
    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    /// A pipeline stage failed with a descriptive message.
    #[error("stage '{stage}' failed: {message}")]
    StageFailed { stage: String, message: String },

    /// The run or call was cancelled via the cancellation flag.
    #[error("operation was cancelled")]
    Cancelled,

    /// The storage layer failed (locked database, I/O error, ...).
    #[error("storage error: {0}")]
    Storage(String),

    /// Catch-all for other errors.
    #[error("{0}")]
    Internal(String),
}

impl PipelineError {
    /// Whether the gateway should retry after this error.
    ///
    /// Transport failures, retryable upstream statuses, and malformed output
    /// are retryable; everything else fails fast.
    pub fn is_retryable(&self) -> bool {
        match self {
            PipelineError::Request(_) => true,
            PipelineError::MalformedOutput(_) => true,
            PipelineError::Upstream { status, .. } => {
                matches!(status, 429 | 500 | 502 | 503 | 504)
            }
            _ => false,
        }
    }

    /// Whether this error is a malformed-output kind (as opposed to a
    /// transport or internal failure).
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            PipelineError::MalformedOutput(_) | PipelineError::Json(_)
        )
    }
}

impl From<anyhow::Error> for PipelineError {
    fn from(err: anyhow::Error) -> Self {
        PipelineError::Internal(err.to_string())
    }
}

impl From<rusqlite::Error> for PipelineError {
    fn from(err: rusqlite::Error) -> Self {
        PipelineError::Storage(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_429_is_retryable() {
        let err = PipelineError::Upstream {
            status: 429,
            body: "rate limited".into(),
        };
        assert!(err.is_retryable());
    }

    #[test]
    fn test_upstream_400_not_retryable() {
        let err = PipelineError::Upstream {
            status: 400,
            body: "bad request".into(),
        };
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_malformed_is_retryable_and_malformed() {
        let err = PipelineError::MalformedOutput("no JSON found".into());
        assert!(err.is_retryable());
        assert!(err.is_malformed());
    }

    #[test]
    fn test_cancelled_not_retryable() {
        assert!(!PipelineError::Cancelled.is_retryable());
    }

    #[test]
    fn test_not_found_message() {
        let err = PipelineError::NotFound("simulation sim-1".into());
        assert_eq!(err.to_string(), "simulation sim-1 not found");
    }
}
