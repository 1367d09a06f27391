//! Summary endpoint.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use tokio_util::sync::CancellationToken;

use crate::api::error::ApiError;
use crate::api::extract::ClientKey;
use crate::api::server::AppState;
use crate::error::{DigestError, FailureKind};
use crate::providers::{Summary, SummaryRequest};

/// POST /api/summary
///
/// The service call runs on its own task. If the client disconnects, axum
/// drops this future, the drop guard fires, and the upstream call is
/// cancelled without writing any cache.
pub async fn post_summary(
    State(state): State<Arc<AppState>>,
    ClientKey(client): ClientKey,
    payload: Result<Json<SummaryRequest>, JsonRejection>,
) -> Result<Json<Summary>, ApiError> {
    let Json(request) = payload.map_err(|e| {
        DigestError::permanent(FailureKind::InvalidRequest, e.body_text())
    })?;
    if request.feeds.iter().all(|f| f.trim().is_empty()) {
        return Err(
            DigestError::permanent(FailureKind::InvalidRequest, "no feeds requested").into(),
        );
    }

    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();
    let service = state.service.clone();
    let task = tokio::spawn(async move {
        service.get_summary(&client, &request, &cancel).await
    });

    match task.await {
        Ok(result) => {
            let summary = result?;
            Ok(Json(Summary::clone(&summary)))
        }
        Err(e) => Err(DigestError::Transient(format!("summary task failed: {e}")).into()),
    }
}
