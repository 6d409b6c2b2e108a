//! Error types for the engine.

use ledgerfeed_protocol::IntakeError;
use thiserror::Error;

/// Result type for sink operations.
pub type SinkResult<T> = Result<T, SinkError>;

/// Result type for pipeline invocations.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// A downstream store or transport failure.
///
/// A superseded write is never a `SinkError`; see
/// [`ApplyOutcome::Superseded`](crate::ApplyOutcome::Superseded).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether a redelivery may succeed.
        retryable: bool,
    },

    /// The store asked the writer to slow down.
    #[error("throttled: {0}")]
    Throttled(String),

    /// The store rejected the request as invalid.
    #[error("rejected with status {status}: {message}")]
    Rejected {
        /// Response status.
        status: u16,
        /// Store-provided reason.
        message: String,
    },

    /// The event could not be rendered into the store's format.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// The request could not be signed.
    #[error("signing failed: {0}")]
    Signing(String),
}

impl SinkError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if redelivering the batch may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            SinkError::Transport { retryable, .. } => *retryable,
            SinkError::Throttled(_) => true,
            SinkError::Signing(_) => true,
            SinkError::Rejected { .. } | SinkError::Encoding(_) => false,
        }
    }
}

impl From<reqwest::Error> for SinkError {
    fn from(error: reqwest::Error) -> Self {
        // A request that cannot be built will fail the same way on redelivery.
        if error.is_builder() {
            SinkError::transport_fatal(error.to_string())
        } else {
            SinkError::transport_retryable(error.to_string())
        }
    }
}

/// A batch-level failure.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// At least one event failed at a sink, or the time budget ran out.
    /// The whole batch should be redelivered.
    #[error("batch failed: {failed} sink failure(s), timed out: {timed_out}")]
    BatchFailed {
        /// Number of failed sink dispatches.
        failed: usize,
        /// Whether the time budget was exhausted.
        timed_out: bool,
    },

    /// The invocation document could not be read.
    #[error(transparent)]
    Intake(#[from] IntakeError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(SinkError::transport_retryable("connection reset").is_retryable());
        assert!(!SinkError::transport_fatal("bad endpoint").is_retryable());
        assert!(SinkError::Throttled("slow down".into()).is_retryable());
        assert!(!SinkError::Rejected {
            status: 400,
            message: "mapper_parsing_exception".into()
        }
        .is_retryable());
        assert!(!SinkError::Encoding("bad".into()).is_retryable());
    }

    #[test]
    fn error_display() {
        let err = PipelineError::BatchFailed {
            failed: 2,
            timed_out: false,
        };
        assert_eq!(
            err.to_string(),
            "batch failed: 2 sink failure(s), timed out: false"
        );

        let err = PipelineError::BatchFailed {
            failed: 0,
            timed_out: true,
        };
        assert!(err.to_string().ends_with("timed out: true"));

        let err = SinkError::Rejected {
            status: 400,
            message: "bad".into(),
        };
        assert_eq!(err.to_string(), "rejected with status 400: bad");
    }
}
