//! Error taxonomy for the aggregation pipeline.
//!
//! Source errors are split by retryability. Resolution errors abort the
//! whole run. Per-identity partial failures are not errors at all: they are
//! recorded in [`crate::models::EntryStatus`].

use std::time::Duration;
use thiserror::Error;

/// Failure talking to the remote data source.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    /// Retryable: rate limit, 5xx, network timeout or connect failure.
    #[error("transient error: {reason}")]
    Transient {
        reason: String,
        /// Hint from the source on when to try again.
        retry_after: Option<Duration>,
    },

    /// Not retryable: auth failure, not found, malformed filter.
    #[error("permanent error ({status}): {reason}")]
    Permanent { status: u16, reason: String },
}

impl SourceError {
    pub fn transient(reason: impl Into<String>) -> Self {
        SourceError::Transient {
            reason: reason.into(),
            retry_after: None,
        }
    }

    pub fn permanent(status: u16, reason: impl Into<String>) -> Self {
        SourceError::Permanent {
            status,
            reason: reason.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, SourceError::Transient { .. })
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            SourceError::Transient { retry_after, .. } => *retry_after,
            SourceError::Permanent { .. } => None,
        }
    }
}

/// Fatal: the identities in scope could not be enumerated.
#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error("failed to enumerate identities for {scope}: {source}")]
    Source {
        scope: String,
        #[source]
        source: SourceError,
    },

    #[error("no identities found in scope {0}")]
    Empty(String),

    #[error("identity resolution for {0} was interrupted")]
    Interrupted(String),

    #[error("identity resolution for {0} timed out")]
    TimedOut(String),
}

/// In-memory report assembly failure. No partial report is emitted.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("identity {0} appears more than once")]
    DuplicateEntry(String),

    #[error("identity {0} was not resolved for this run")]
    UnexpectedEntry(String),
}

/// Failure that leaves a run without a report.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error("report assembly failed: {0}")]
    Report(#[from] ReportError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryability() {
        let transient = SourceError::Transient {
            reason: "rate limited".to_string(),
            retry_after: Some(Duration::from_secs(3)),
        };
        assert!(transient.is_transient());
        assert_eq!(transient.retry_after(), Some(Duration::from_secs(3)));

        let permanent = SourceError::permanent(404, "Not Found");
        assert!(!permanent.is_transient());
        assert_eq!(permanent.retry_after(), None);
        assert_eq!(permanent.to_string(), "permanent error (404): Not Found");
    }
}
