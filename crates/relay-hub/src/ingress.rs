//! HTTP ingress for parties that cannot hold a socket
//!
//! Cloud sandboxes post their progress here with a sandbox token, which is
//! validated against the external virtual-key endpoint before the body is
//! broadcast to the room exactly as if it came from a socket sender.

use axum::{
    extract::{Path, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::Value;
use tracing::{info, warn};

use crate::auth::token_fingerprint;
use crate::state::AppState;

/// `POST /rooms/{room_id}` with `Authorization: Bearer <sandbox-token>`
pub async fn ingress_handler(
    Path(room_id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let token = match extract_bearer_token(&headers) {
        Ok(token) => token,
        Err(response) => return response,
    };

    if !state.auth.validate_sandbox_token(token, &room_id).await {
        warn!(
            %room_id,
            token = %token_fingerprint(token),
            "Sandbox token rejected"
        );
        return (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
    }

    let payload = body.to_string();
    let delivered = state.rooms.broadcast(&room_id, &payload, None).await;
    info!(%room_id, delivered, "Ingress message broadcast");

    Json(serde_json::json!({ "delivered": delivered })).into_response()
}

fn extract_bearer_token(headers: &HeaderMap) -> Result<&str, Response> {
    let auth_header = headers.get(AUTHORIZATION).ok_or_else(|| {
        (StatusCode::UNAUTHORIZED, "Missing Authorization header").into_response()
    })?;
    let auth_value = auth_header
        .to_str()
        .map_err(|_| (StatusCode::UNAUTHORIZED, "Invalid Authorization header").into_response())?;
    auth_value.strip_prefix("Bearer ").ok_or_else(|| {
        (
            StatusCode::UNAUTHORIZED,
            "Authorization must be Bearer token",
        )
            .into_response()
    })
}
