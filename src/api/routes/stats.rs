//! Cache and upstream counters.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;

use crate::api::server::AppState;
use crate::service::ServiceReport;

/// GET /api/stats
pub async fn get_stats(State(state): State<Arc<AppState>>) -> Json<ServiceReport> {
    Json(state.service.report())
}
