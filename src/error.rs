//! Error taxonomy for the summary pipeline.
//!
//! Upstream failures are classified before they leave the executor:
//! [`DigestError::Transient`] is retried and never negatively cached,
//! [`DigestError::Permanent`] is eligible for negative caching, and
//! [`DigestError::Throttled`] is a local rejection that never reaches
//! upstream. Cache misses are `None`, not errors.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable failure categories that are safe to memoize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The request itself is malformed (bad feed URL, unparsable feed, 4xx).
    InvalidRequest,
    /// Credentials were missing or refused.
    Unauthorized,
    /// Upstream quota or rate limit exhausted.
    QuotaExhausted,
    /// Any other non-retryable upstream rejection.
    Rejected,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::InvalidRequest => "invalid_request",
            FailureKind::Unauthorized => "unauthorized",
            FailureKind::QuotaExhausted => "quota_exhausted",
            FailureKind::Rejected => "rejected",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classified permanent failure, stored in the negative cache instead of the
/// raw upstream error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamFailure {
    pub kind: FailureKind,
    /// Human-readable message, already stripped of upstream payloads.
    pub message: String,
}

impl UpstreamFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for UpstreamFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.kind)
    }
}

/// Errors surfaced by the summary pipeline.
#[derive(Debug, Error)]
pub enum DigestError {
    /// Network error or timeout. Eligible for retry.
    #[error("Upstream temporarily unavailable: {0}")]
    Transient(String),

    /// Stable upstream rejection. `retry_after` is set when the failure was
    /// served from the negative cache.
    #[error("Upstream rejected request: {failure}")]
    Permanent {
        failure: UpstreamFailure,
        retry_after: Option<Duration>,
    },

    /// The caller exceeded its minimum inter-request interval.
    #[error("Too many requests, retry in {}s", retry_after_secs(.retry_after))]
    Throttled { retry_after: Duration },

    /// The caller abandoned the request.
    #[error("Request cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Convenience result alias.
pub type Result<T> = std::result::Result<T, DigestError>;

/// Caller-facing error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Transient,
    Permanent(FailureKind),
    Throttled,
    Cancelled,
    Internal,
}

/// Structured failure returned to the UI layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

impl DigestError {
    /// Build a permanent error that did not come from the negative cache.
    pub fn permanent(kind: FailureKind, message: impl Into<String>) -> Self {
        DigestError::Permanent {
            failure: UpstreamFailure::new(kind, message),
            retry_after: None,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, DigestError::Transient(_))
    }

    /// The failure to memoize, if this error may populate the negative cache.
    pub fn negative_cacheable(&self) -> Option<&UpstreamFailure> {
        match self {
            DigestError::Permanent { failure, .. } => Some(failure),
            _ => None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            DigestError::Transient(_) => ErrorKind::Transient,
            DigestError::Permanent { failure, .. } => ErrorKind::Permanent(failure.kind),
            DigestError::Throttled { .. } => ErrorKind::Throttled,
            DigestError::Cancelled => ErrorKind::Cancelled,
            DigestError::Config(_) | DigestError::Io(_) | DigestError::Json(_) => {
                ErrorKind::Internal
            }
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            DigestError::Throttled { retry_after } => Some(*retry_after),
            DigestError::Permanent { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Message safe to show to end users.
    pub fn user_message(&self) -> String {
        match self {
            DigestError::Transient(_) => {
                "The summary service is temporarily unavailable. Please try again.".to_string()
            }
            DigestError::Permanent { failure, .. } => failure.message.clone(),
            DigestError::Throttled { retry_after } => format!(
                "You are sending requests too quickly. Try again in {} seconds.",
                retry_after_secs(retry_after)
            ),
            DigestError::Cancelled => "The request was cancelled.".to_string(),
            _ => "Internal error while generating the summary.".to_string(),
        }
    }

    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            kind: self.kind(),
            message: self.user_message(),
            retry_after_secs: self.retry_after().map(|d| retry_after_secs(&d)),
        }
    }

    /// Rebuild an error from a body received over HTTP.
    pub fn from_body(body: ErrorBody) -> Self {
        let retry_after = body.retry_after_secs.map(Duration::from_secs);
        match body.kind {
            ErrorKind::Transient => DigestError::Transient(body.message),
            ErrorKind::Permanent(kind) => DigestError::Permanent {
                failure: UpstreamFailure::new(kind, body.message),
                retry_after,
            },
            ErrorKind::Throttled => DigestError::Throttled {
                retry_after: retry_after.unwrap_or_default(),
            },
            ErrorKind::Cancelled => DigestError::Cancelled,
            ErrorKind::Internal => DigestError::Transient(body.message),
        }
    }
}

/// Whole seconds for a retry hint, rounded up so clients never retry early.
pub fn retry_after_secs(d: &Duration) -> u64 {
    let secs = d.as_secs();
    if d.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}
