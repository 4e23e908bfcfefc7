//! API routes

pub mod health;
pub mod tickets;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{state::AppState, websocket::ws_handler};

/// Create all API routes
pub fn create_router(state: AppState) -> Router {
    // Health check routes (at root level for infrastructure monitoring)
    let health_routes = Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness));

    // Event triggers - under /api/v1, bearer token required
    let ticket_routes = Router::new()
        .route(
            "/tickets/:ticket_id/handoff-notifications",
            post(tickets::request_handoff_notification),
        )
        .route("/tickets/:ticket_id/favorite", post(tickets::favorite_conversation))
        .route(
            "/tickets/:ticket_id/hot-issue",
            post(tickets::request_hot_issue_analysis),
        );

    Router::new()
        .merge(health_routes)
        // Ticket conversation socket, token in the query string
        .route("/ws/tickets/:ticket_id", get(ws_handler))
        .nest("/api/v1", ticket_routes)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_headers(Any)
                .allow_methods(Any),
        )
        .with_state(state)
}
