//! Local terminal supervisor for Handoff
//!
//! Runs next to the user's terminal: keeps one persistent shell session
//! alive on a PTY, receives dispatched tasks from the relay hub, writes
//! them into the shell as agent invocations, and streams everything back -
//! to the relay as progress updates and to attached viewers as raw output.

mod agents;
mod error;
mod escape;
mod exec;
mod pty;
mod relay_link;
mod supervisor;
mod viewer;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::agents::{installed_agents, AgentKind, SUPPORTED_AGENTS};
use crate::error::SupervisorError;
use crate::exec::DEFAULT_EXEC_TIMEOUT;
use crate::supervisor::{Supervisor, SupervisorConfig};

#[derive(Debug, Deserialize)]
struct ConnectRequest {
    #[serde(rename = "roomId")]
    room_id: String,
    agent: String,
}

#[derive(Debug, Deserialize)]
struct CallbackRequest {
    status: String,
    message: Option<String>,
    progress: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct RunRequest {
    task: String,
    agent: String,
    #[serde(rename = "timeoutSeconds")]
    timeout_seconds: Option<u64>,
}

fn error_response(err: SupervisorError) -> Response {
    let status = match &err {
        SupervisorError::ExecutorUnavailable { .. } => StatusCode::BAD_REQUEST,
        SupervisorError::ShellNotRunning | SupervisorError::NotConnected => StatusCode::CONFLICT,
        SupervisorError::ExecutionTimeout { .. } => StatusCode::REQUEST_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, err.to_string()).into_response()
}

/// `POST /connect` - join a room and make sure a shell is running
async fn connect_handler(
    State(supervisor): State<Arc<Supervisor>>,
    Json(request): Json<ConnectRequest>,
) -> Response {
    let agent = match AgentKind::parse(&request.agent) {
        Ok(agent) => agent,
        Err(err) => return error_response(err),
    };

    let newly_connected = match Arc::clone(&supervisor).connect(&request.room_id, agent).await {
        Ok(newly_connected) => newly_connected,
        Err(err) => return error_response(err),
    };

    // A repeat connect for the same room keeps the shell; a fresh
    // connection (or a dead shell) gets a new one
    let status = supervisor.status().await;
    if newly_connected || !status.pty {
        if let Err(err) = supervisor.spawn_shell().await {
            return error_response(err);
        }
    }

    Json(supervisor.status().await).into_response()
}

/// `POST /disconnect` - kill the shell and leave the room for good
async fn disconnect_handler(State(supervisor): State<Arc<Supervisor>>) -> Response {
    supervisor.disconnect().await;
    Json(supervisor.status().await).into_response()
}

/// `GET /status`
async fn status_handler(State(supervisor): State<Arc<Supervisor>>) -> Response {
    Json(supervisor.status().await).into_response()
}

/// `GET /agents` - supported vs. actually installed CLI agents
async fn agents_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "supported": SUPPORTED_AGENTS,
        "installed": installed_agents(),
    }))
}

/// `POST /callback` - progress reports from the running agent
async fn callback_handler(
    State(supervisor): State<Arc<Supervisor>>,
    Json(request): Json<CallbackRequest>,
) -> Response {
    match supervisor
        .report_progress(&request.status, request.message, request.progress)
        .await
    {
        Ok(()) => Json(serde_json::json!({ "ok": true })).into_response(),
        Err(err) => error_response(err),
    }
}

/// `POST /run` - one-shot headless execution with a hard timeout
async fn run_handler(Json(request): Json<RunRequest>) -> Response {
    let agent = match AgentKind::parse(&request.agent) {
        Ok(agent) => agent,
        Err(err) => return error_response(err),
    };
    let timeout = request
        .timeout_seconds
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_EXEC_TIMEOUT);

    match exec::run_agent(agent, &request.task, timeout).await {
        Ok(outcome) => Json(outcome).into_response(),
        Err(err) => error_response(err),
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "supervisor=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let port: u16 = std::env::var("SUPERVISOR_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(4821);
    let hub_url = std::env::var("SUPERVISOR_HUB_URL")
        .unwrap_or_else(|_| "ws://localhost:4810".to_string());
    let token = std::env::var("SUPERVISOR_TOKEN").unwrap_or_default();
    let shell = std::env::var("SUPERVISOR_SHELL")
        .or_else(|_| std::env::var("SHELL"))
        .unwrap_or_else(|_| "/bin/bash".to_string());
    let data_dir = std::env::var("HANDOFF_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(".handoff-data"));

    let supervisor = Supervisor::new(SupervisorConfig {
        port,
        hub_url,
        token,
        shell,
        log_path: data_dir.join("supervisor-output.log"),
    });

    let app = Router::new()
        .route("/connect", post(connect_handler))
        .route("/disconnect", post(disconnect_handler))
        .route("/status", get(status_handler))
        .route("/agents", get(agents_handler))
        .route("/callback", post(callback_handler))
        .route("/run", post(run_handler))
        .route("/terminal", get(viewer::terminal_page))
        .route("/terminal/ws", get(viewer::terminal_ws_handler))
        .with_state(supervisor)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    tracing::info!("Supervisor listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind supervisor port");
    axum::serve(listener, app).await.expect("Server error");
}
