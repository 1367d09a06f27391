//! Mapping from [`DigestError`] to HTTP responses.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::error::{retry_after_secs, DigestError, FailureKind};

/// Handler error; renders as an [`crate::error::ErrorBody`].
#[derive(Debug)]
pub struct ApiError(pub DigestError);

impl From<DigestError> for ApiError {
    fn from(err: DigestError) -> Self {
        Self(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            DigestError::Throttled { .. } => StatusCode::TOO_MANY_REQUESTS,
            DigestError::Permanent { failure, .. } => match failure.kind {
                FailureKind::InvalidRequest => StatusCode::BAD_REQUEST,
                FailureKind::Unauthorized => StatusCode::BAD_GATEWAY,
                FailureKind::QuotaExhausted => StatusCode::SERVICE_UNAVAILABLE,
                FailureKind::Rejected => StatusCode::UNPROCESSABLE_ENTITY,
            },
            DigestError::Transient(_) => StatusCode::BAD_GATEWAY,
            DigestError::Cancelled => StatusCode::REQUEST_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(status = status.as_u16(), error = %self.0, "Summary request failed");
        }
        let mut response = (status, Json(self.0.to_body())).into_response();
        if let Some(retry_after) = self.0.retry_after() {
            if let Ok(value) = HeaderValue::from_str(&retry_after_secs(&retry_after).to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}
