//! Upstream summarizers and the executor that calls them.
//!
//! [`Summarizer`] is the opaque upstream seam: given a request and a
//! cancellation token it either produces a [`Summary`] or a classified
//! [`DigestError`]. [`RetryingExecutor`] wraps one call with a per-attempt
//! timeout and a bounded retry budget.

pub mod gemini;
pub mod retry;
pub mod types;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::{DigestError, FailureKind, Result};

pub use gemini::GeminiSummarizer;
pub use retry::{CallState, ExecutionTrace, RetryPolicy, RetryingExecutor};
pub use types::{SourceItem, Summary, SummaryRequest, Usage};

/// Upstream service that turns feeds into a digest.
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Provider name for logs.
    fn name(&self) -> &str;

    /// Produce a digest for `request`.
    ///
    /// Implementations should stop work promptly once `cancel` fires.
    async fn summarize(
        &self,
        request: &SummaryRequest,
        cancel: CancellationToken,
    ) -> Result<Summary>;
}

/// Classify a non-success HTTP status from an upstream API.
///
/// `message` must already be safe to show to users.
pub fn classify_status(status: u16, message: &str) -> DigestError {
    match status {
        400 | 404 | 413 | 422 => DigestError::permanent(FailureKind::InvalidRequest, message),
        401 | 403 => DigestError::permanent(FailureKind::Unauthorized, message),
        429 => DigestError::permanent(FailureKind::QuotaExhausted, message),
        408 | 425 | 500..=599 => DigestError::Transient(format!("HTTP {status}: {message}")),
        _ => DigestError::permanent(FailureKind::Rejected, message),
    }
}

/// Classify a transport-level `reqwest` error.
///
/// The error's own text is not used because it embeds the request URL,
/// which may carry an API key.
pub fn classify_reqwest(context: &str, err: &reqwest::Error) -> DigestError {
    if let Some(status) = err.status() {
        return classify_status(status.as_u16(), context);
    }
    if err.is_builder() {
        return DigestError::permanent(
            FailureKind::InvalidRequest,
            format!("{context}: invalid request"),
        );
    }
    let cause = if err.is_timeout() {
        "timed out"
    } else if err.is_connect() {
        "connection failed"
    } else if err.is_decode() || err.is_body() {
        "malformed response body"
    } else {
        "transport error"
    };
    DigestError::Transient(format!("{context}: {cause}"))
}
