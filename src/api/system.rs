//! System-level API endpoints.

use axum::{extract::State, http::StatusCode, Json};
use std::sync::Arc;

use crate::startup::{get_system_health, SystemHealthStatus};
use crate::AppState;

/// Database health report; 503 when the store is unusable
///
/// GET /api/system/health
pub async fn system_health(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<SystemHealthStatus>) {
    let health = get_system_health(&state.db).await;
    let status = if health.healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(health))
}
