//! Relay hub for Handoff
//!
//! Per-user real-time pub/sub: browser clients, the task owner, and
//! local/cloud executors all attach to one room per user and every inbound
//! message is fanned out to the other members. Socketless callers (cloud
//! sandboxes) post through the HTTP ingress instead.

mod auth;
mod credentials;
mod ingress;
mod room;
mod state;
mod ws;

use axum::routing::{get, post};
use axum::{Json, Router};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::auth::AuthClient;
use crate::credentials::CredentialStore;
use crate::room::RoomRegistry;
use crate::state::AppState;

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "relay_hub=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let data_dir = std::env::var("HANDOFF_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(".handoff-data"));
    let port: u16 = std::env::var("HUB_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(4810);
    let identity_url = std::env::var("HUB_IDENTITY_URL")
        .unwrap_or_else(|_| "http://localhost:9000/identity/verify".to_string());
    let sandbox_validate_url = std::env::var("HUB_SANDBOX_VALIDATE_URL")
        .unwrap_or_else(|_| "http://localhost:9000/virtual-keys/validate".to_string());
    let service_key = std::env::var("HUB_SERVICE_KEY").ok();

    tracing::info!("Using data directory: {:?}", data_dir);

    let credentials = CredentialStore::new(data_dir.join("room-credentials.json"))
        .await
        .expect("Failed to initialize credential store");

    let state = AppState {
        rooms: Arc::new(RoomRegistry::new()),
        auth: Arc::new(AuthClient::new(identity_url, sandbox_validate_url, service_key)),
        credentials: Arc::new(credentials),
    };

    let app = Router::new()
        .route("/health", get(health))
        .route("/rooms/{room_id}/ws", get(ws::room_ws_handler))
        .route("/rooms/{room_id}", post(ingress::ingress_handler))
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Relay hub listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind relay hub port");
    axum::serve(listener, app).await.expect("Server error");
}
