//! Health checks for load balancers and orchestrators

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use sqlx::PgPool;

use crate::state::AppState;
use crate::websocket::WebSocketStats;

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub version: &'static str,
    pub database_ok: bool,
    /// Live sessions and ticket rooms on this instance
    pub websocket: WebSocketStats,
}

async fn database_reachable(pool: &PgPool) -> bool {
    match sqlx::query("SELECT 1").execute(pool).await {
        Ok(_) => true,
        Err(e) => {
            tracing::warn!(error = %e, "Health check could not reach the database");
            false
        }
    }
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthReport>) {
    let database_ok = database_reachable(&state.pool).await;
    let (code, status) = if database_ok {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };

    (
        code,
        Json(HealthReport {
            status,
            version: env!("CARGO_PKG_VERSION"),
            database_ok,
            websocket: state.ws_state.get_stats().await,
        }),
    )
}

/// GET /health/live
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

/// GET /health/ready: only route traffic here once the database answers
pub async fn readiness(State(state): State<AppState>) -> StatusCode {
    if database_reachable(&state.pool).await {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}
