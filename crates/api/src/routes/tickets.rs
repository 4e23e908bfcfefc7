//! Ticket trigger routes
//!
//! Each route records whatever the reaction needs, publishes the event and
//! answers 202 without waiting for the handlers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use helpdesk_shared::NotificationChannel;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::bus::{Event, EventKind};
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use crate::store::NewHandoffNotification;

#[derive(Debug, Deserialize)]
pub struct HandoffRequest {
    pub channel: NotificationChannel,
    pub target: String,
    pub summary: String,
}

#[derive(Debug, Serialize)]
pub struct AcceptedResponse {
    pub event: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_id: Option<Uuid>,
}

fn accepted(kind: EventKind, record_id: Option<Uuid>) -> (StatusCode, Json<AcceptedResponse>) {
    (
        StatusCode::ACCEPTED,
        Json(AcceptedResponse {
            event: kind.as_str(),
            record_id,
        }),
    )
}

/// POST /api/v1/tickets/:ticket_id/handoff-notifications
pub async fn request_handoff_notification(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(ticket_id): Path<Uuid>,
    Json(req): Json<HandoffRequest>,
) -> ApiResult<(StatusCode, Json<AcceptedResponse>)> {
    let identity = auth.require_staff()?;

    if req.target.trim().is_empty() {
        return Err(ApiError::BadRequest("target is required".to_string()));
    }
    if req.summary.trim().is_empty() {
        return Err(ApiError::BadRequest("summary is required".to_string()));
    }

    let record_id = state
        .sync_store
        .create_handoff_notification(&NewHandoffNotification {
            ticket_id,
            channel: req.channel,
            target: req.target.clone(),
            summary: req.summary.clone(),
        })
        .await?;

    state.bus.publish(Event::HandoffNotificationSent {
        record_id,
        ticket_id,
        channel: req.channel,
        target: req.target,
        summary: req.summary,
    });

    tracing::info!(
        ticket_id = %ticket_id,
        record_id = %record_id,
        channel = req.channel.as_str(),
        requested_by = %identity.user_id,
        "Handoff notification queued"
    );

    Ok(accepted(EventKind::HandoffNotificationSent, Some(record_id)))
}

/// POST /api/v1/tickets/:ticket_id/favorite
pub async fn favorite_conversation(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(ticket_id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<AcceptedResponse>)> {
    let identity = auth.require_staff()?;

    let record_id = state
        .sync_store
        .create_favorite_sync(ticket_id, identity.user_id)
        .await?;

    state.bus.publish(Event::FavoritesSync {
        record_id,
        ticket_id,
    });

    tracing::info!(
        ticket_id = %ticket_id,
        record_id = %record_id,
        favorited_by = %identity.user_id,
        "Conversation favorited"
    );

    Ok(accepted(EventKind::FavoritesSync, Some(record_id)))
}

/// POST /api/v1/tickets/:ticket_id/hot-issue
pub async fn request_hot_issue_analysis(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(ticket_id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<AcceptedResponse>)> {
    auth.require_staff()?;

    state
        .sync_store
        .ticket_summary(ticket_id)
        .await?
        .ok_or(ApiError::NotFound)?;

    state.bus.publish(Event::HotIssueAnalysis { ticket_id });

    Ok(accepted(EventKind::HotIssueAnalysis, None))
}
