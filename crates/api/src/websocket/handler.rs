//! WebSocket handler for Axum
//!
//! Authenticates the upgrade request, then services the socket with a writer
//! task and a reader loop that also runs the heartbeat watchdog.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{stream::StreamExt, SinkExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use crate::auth::Identity;
use crate::error::ApiError;
use crate::state::AppState;

use super::{
    connection::Connection,
    events::{self, Envelope},
    state::WebSocketState,
};

#[derive(Debug, Deserialize)]
pub struct WebSocketQuery {
    token: String,
}

/// WebSocket handler - upgrades HTTP connection to WebSocket
/// Authenticates via query parameter token; browsers cannot set headers on upgrade
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(app_state): State<AppState>,
    Path(ticket_id): Path<Uuid>,
    Query(params): Query<WebSocketQuery>,
) -> Result<Response, ApiError> {
    let claims = app_state.jwt.validate_token(&params.token).map_err(|e| {
        tracing::warn!(error = %e, ticket_id = %ticket_id, "WebSocket auth failed: invalid token");
        ApiError::InvalidToken
    })?;
    let identity = claims.identity();

    tracing::info!(
        user_id = %identity.user_id,
        role = %identity.role,
        ticket_id = %ticket_id,
        "WebSocket connection upgrade requested"
    );

    let ws_state = app_state.ws_state.clone();
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, ticket_id, identity, ws_state)))
}

/// Handle individual WebSocket connection
async fn handle_socket(
    socket: WebSocket,
    ticket_id: Uuid,
    identity: Identity,
    ws_state: WebSocketState,
) {
    let (mut sender, mut receiver) = socket.split();

    // Create channel for sending envelopes to this connection
    let (tx, mut rx) = mpsc::unbounded_channel::<Envelope>();

    let conn = ws_state
        .add_connection(Connection::new(identity, ticket_id, tx))
        .await;
    let session_id = conn.session_id;

    // Spawn task to send envelopes to client
    let send_task = tokio::spawn(async move {
        while let Some(envelope) = rx.recv().await {
            if sender.send(Message::Text(events::encode(&envelope))).await.is_err() {
                break; // Connection closed
            }
        }
        let _ = sender.close().await;
    });

    if let Err(e) = ws_state.dispatcher.open(&conn).await {
        tracing::warn!(
            session_id = %session_id,
            ticket_id = %ticket_id,
            error = %e,
            "WebSocket join rejected"
        );
        let _ = conn.send(Envelope::error(e.client_message()));
        ws_state.remove_connection(&session_id).await;

        // Dropping the last sender lets the writer flush the error and close
        drop(conn);
        let _ = send_task.await;
        return;
    }

    let mut watchdog = tokio::time::interval(ws_state.heartbeat_check_interval);
    watchdog.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // First tick completes immediately
    watchdog.tick().await;

    loop {
        tokio::select! {
            msg = receiver.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let _ = ws_state.dispatcher.handle_frame(&conn, text.as_bytes()).await;
                }
                Some(Ok(Message::Binary(bytes))) => {
                    let _ = ws_state.dispatcher.handle_frame(&conn, &bytes).await;
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                    // Axum answers pings; application heartbeats are explicit envelopes
                }
                Some(Ok(Message::Close(_))) | None => {
                    tracing::info!(session_id = %session_id, "WebSocket close frame received");
                    break;
                }
                Some(Err(e)) => {
                    tracing::debug!(session_id = %session_id, error = %e, "WebSocket read failed");
                    break;
                }
            },
            _ = watchdog.tick() => {
                if ws_state
                    .dispatcher
                    .expire_if_silent(&conn, ws_state.heartbeat_timeout)
                    .await
                {
                    break;
                }
            }
        }
    }

    // Cleanup on disconnect
    tracing::info!(session_id = %session_id, user_id = %identity.user_id, "WebSocket connection closing");
    ws_state.dispatcher.close(&conn).await;
    ws_state.remove_connection(&session_id).await;

    send_task.abort();
}
