//! Liveness plus a database round trip, outside the per-request session.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::{routing::get, Json, Router};
use serde::Serialize;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: &'static str,
    pub version: &'static str,
}

/// GET /health
async fn health(State(state): State<Arc<AppState>>) -> (StatusCode, Json<HealthResponse>) {
    let reachable = sqlx::query("SELECT 1")
        .execute(state.db.pool())
        .await
        .map_err(|e| tracing::warn!(error = %e, "health check query failed"))
        .is_ok();

    let (status, code) = if reachable {
        ("ok", StatusCode::OK)
    } else {
        ("degraded", StatusCode::SERVICE_UNAVAILABLE)
    };
    (
        code,
        Json(HealthResponse {
            status,
            database: if reachable { "reachable" } else { "unreachable" },
            version: env!("CARGO_PKG_VERSION"),
        }),
    )
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/health", get(health))
}
