//! WebSocket endpoint for room members
//!
//! Authentication runs before the upgrade completes; a socket that reaches
//! the message loop is already a member of its room. The loop itself only
//! relays: raw payloads go to every other member, with a best-effort parse
//! for diagnostics that never blocks the relay.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use tracing::{debug, error, info, warn};

use handoff_core::protocol::RelayMessage;

use crate::auth::{token_fingerprint, AuthError};
use crate::credentials::ProviderCredentials;
use crate::state::AppState;

/// Query parameters accepted on the upgrade request
#[derive(Debug, serde::Deserialize)]
pub struct WsQuery {
    /// End-user bearer token
    pub token: Option<String>,
    /// Shared server-to-server key
    #[serde(rename = "apiKey")]
    pub api_key: Option<String>,
    /// Declared role for the server-to-server path (e.g. "voice")
    pub role: Option<String>,
    /// Downstream provider credentials, persisted on first sight
    #[serde(rename = "providerKey")]
    pub provider_key: Option<String>,
    #[serde(rename = "providerUrl")]
    pub provider_url: Option<String>,
}

/// WebSocket upgrade handler
pub async fn room_ws_handler(
    ws: WebSocketUpgrade,
    Path(room_id): Path<String>,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    let label = match authorize(&state, &room_id, &query).await {
        Ok(label) => label,
        Err(err) => {
            warn!(
                %room_id,
                token = %query.token.as_deref().map(token_fingerprint).unwrap_or_default(),
                "Rejected connection: {}",
                err
            );
            return (err.status(), err.to_string()).into_response();
        }
    };

    if let Some(provider_key) = &query.provider_key {
        let credentials =
            ProviderCredentials::new(provider_key.clone(), query.provider_url.clone());
        match state.credentials.record_if_absent(&room_id, credentials).await {
            Ok(true) => info!(%room_id, "Recorded provider credentials"),
            Ok(false) => {}
            Err(e) => warn!(%room_id, "Failed to persist provider credentials: {}", e),
        }
    }

    info!(%room_id, peer = %label, "New room connection");
    ws.on_upgrade(move |socket| handle_room_socket(socket, room_id, label, state))
        .into_response()
}

/// Decide whether a connection may join the room, before the upgrade.
///
/// Service key + declared role bypasses the identity callout; otherwise the
/// bearer token's subject must equal the room id. Fails closed.
async fn authorize(state: &AppState, room_id: &str, query: &WsQuery) -> Result<String, AuthError> {
    if let (Some(api_key), Some(role)) = (&query.api_key, &query.role) {
        state.auth.verify_service_key(api_key, role)?;
        return Ok(format!("service:{}", role));
    }

    let token = query.token.as_deref().ok_or(AuthError::Unauthorized)?;
    let subject = state.auth.verify_user_token(token).await?;
    if subject != room_id {
        return Err(AuthError::RoomAccessDenied);
    }
    Ok(subject)
}

/// Pump one member's socket: outbound queue → socket, socket → room.
async fn handle_room_socket(socket: WebSocket, room_id: String, label: String, state: AppState) {
    let (peer_id, mut outbound_rx) = state.rooms.join(&room_id, label.as_str()).await;
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let send_task = tokio::spawn(async move {
        while let Some(payload) = outbound_rx.recv().await {
            if ws_sender.send(Message::Text(payload.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(Message::Text(text)) => {
                // Parse purely for the log line; the raw bytes are relayed
                // either way.
                debug!(
                    %room_id,
                    peer = %label,
                    kind = RelayMessage::describe(&text),
                    "Relaying message"
                );
                state.rooms.broadcast(&room_id, &text, Some(peer_id)).await;
            }
            Ok(Message::Close(_)) => {
                info!(%room_id, peer = %label, "Peer sent close frame");
                break;
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Binary(_)) => {
                warn!(%room_id, peer = %label, "Unexpected binary frame dropped");
            }
            Err(e) => {
                error!(%room_id, peer = %label, "WebSocket error: {}", e);
                break;
            }
        }
    }

    state.rooms.leave(&room_id, peer_id).await;
    send_task.abort();
}
