//! Terminal viewer surface
//!
//! Viewers attach over a local WebSocket and receive typed JSON frames:
//! raw shell output, dispatched tasks, status reports, supervisor log
//! lines, and clear markers on respawn. Anything a viewer types is
//! forwarded verbatim to the PTY.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::{Html, IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::supervisor::Supervisor;

/// Frames sent to attached terminal viewers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ViewerFrame {
    /// Verbatim shell output
    Output { data: String },
    /// A task was written into the shell
    Task { content: String, agent: String },
    /// Progress report from the running agent
    Status {
        status: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        progress: Option<f32>,
    },
    /// Supervisor-level log line
    Log { line: String },
    /// The shell was respawned; drop everything rendered so far
    Clear,
}

/// `GET /terminal` - the embedded viewer page
pub async fn terminal_page() -> Html<&'static str> {
    Html(TERMINAL_PAGE)
}

/// `GET /terminal/ws` - bidirectional raw terminal stream
pub async fn terminal_ws_handler(
    ws: WebSocketUpgrade,
    State(supervisor): State<Arc<Supervisor>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_viewer_socket(socket, supervisor))
        .into_response()
}

async fn handle_viewer_socket(socket: WebSocket, supervisor: Arc<Supervisor>) {
    info!("Terminal viewer attached");
    let mut frames = supervisor.subscribe_viewers();
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let send_task = tokio::spawn(async move {
        loop {
            match frames.recv().await {
                Ok(frame) => {
                    let Ok(json) = serde_json::to_string(&frame) else {
                        continue;
                    };
                    if ws_sender.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!("Viewer lagged, {} frames dropped", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(Message::Text(text)) => {
                // Viewer keystrokes go to the PTY untouched
                let _ = supervisor.write_to_shell(text.as_bytes().to_vec()).await;
            }
            Ok(Message::Binary(bytes)) => {
                let _ = supervisor.write_to_shell(bytes.to_vec()).await;
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!("Viewer socket error: {}", e);
                break;
            }
        }
    }

    info!("Terminal viewer detached");
    send_task.abort();
}

const TERMINAL_PAGE: &str = r#"<!doctype html>
<html>
<head>
<meta charset="utf-8">
<title>Handoff Terminal</title>
<style>
  body { margin: 0; background: #111; color: #ddd; font-family: monospace; }
  #term { padding: 12px; white-space: pre-wrap; word-break: break-all; }
  #bar { padding: 6px 12px; background: #222; color: #8c8; }
</style>
</head>
<body>
<div id="bar">handoff supervisor</div>
<div id="term"></div>
<script>
  const term = document.getElementById('term');
  const bar = document.getElementById('bar');
  const ws = new WebSocket(`ws://${location.host}/terminal/ws`);
  ws.onmessage = (msg) => {
    const frame = JSON.parse(msg.data);
    if (frame.type === 'output') {
      term.textContent += frame.data;
    } else if (frame.type === 'clear') {
      term.textContent = '';
    } else if (frame.type === 'status') {
      bar.textContent = `status: ${frame.status}` + (frame.message ? ` - ${frame.message}` : '');
    } else if (frame.type === 'task') {
      bar.textContent = `task -> ${frame.agent}`;
    } else if (frame.type === 'log') {
      bar.textContent = frame.line;
    }
    window.scrollTo(0, document.body.scrollHeight);
  };
  document.addEventListener('keypress', (e) => {
    if (ws.readyState === WebSocket.OPEN) ws.send(e.key === 'Enter' ? '\n' : e.key);
  });
</script>
</body>
</html>
"#;
