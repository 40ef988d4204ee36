//! The supervisor instance
//!
//! One per machine process, with an explicit lifecycle: connect to a room,
//! spawn the shell, dispatch tasks into it, tear down on disconnect. All
//! mutable relay state (current PTY, current socket, selected agent) lives
//! on this struct behind one lock - there are no module globals.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::{debug, info, warn};

use handoff_core::protocol::RelayMessage;

use crate::agents::AgentKind;
use crate::error::{Result, SupervisorError};
use crate::escape::shell_single_quote;
use crate::pty::PtyShell;
use crate::relay_link::RelayLink;
use crate::viewer::ViewerFrame;

/// Fixed suffix appended to every dispatched task, directing the agent to
/// report progress through the local callback tool
const DISPATCH_SUFFIX: &str =
    " When you are done, report progress via the report-progress callback tool.";

/// Viewer fan-out capacity; slow viewers lag and drop, they never block
const VIEWER_BUFFER: usize = 1024;

/// Static configuration read at startup
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Local HTTP port, also advertised to the shell for callbacks
    pub port: u16,
    /// Relay hub base URL, e.g. `ws://localhost:4810`
    pub hub_url: String,
    /// Bearer token presented on the room socket
    pub token: String,
    /// Shell executable for the PTY session
    pub shell: String,
    /// Output log sink, truncated on every respawn
    pub log_path: PathBuf,
}

/// `GET /status` response
#[derive(Debug, Clone, Serialize)]
pub struct SupervisorStatus {
    pub connected: bool,
    pub room: Option<String>,
    pub agent: Option<AgentKind>,
    pub pty: bool,
}

#[derive(Default)]
struct Inner {
    room: Option<String>,
    agent: Option<AgentKind>,
    pty: Option<PtyShell>,
    link: Option<RelayLink>,
}

/// Owns the PTY, the relay socket, and the viewer fan-out
pub struct Supervisor {
    config: SupervisorConfig,
    frames: broadcast::Sender<ViewerFrame>,
    inner: Mutex<Inner>,
}

impl Supervisor {
    pub fn new(config: SupervisorConfig) -> Arc<Self> {
        let (frames, _) = broadcast::channel(VIEWER_BUFFER);
        Arc::new(Self {
            config,
            frames,
            inner: Mutex::new(Inner::default()),
        })
    }

    pub fn subscribe_viewers(&self) -> broadcast::Receiver<ViewerFrame> {
        self.frames.subscribe()
    }

    /// Open (or reuse) the relay connection for a room.
    ///
    /// Idempotent: a repeat call for the same room with a live link is a
    /// no-op and returns false. Connecting to a different room closes the
    /// old link first.
    pub async fn connect(self: Arc<Self>, room: &str, agent: AgentKind) -> Result<bool> {
        let mut inner = self.inner.lock().await;

        if let (Some(current), Some(link)) = (&inner.room, &inner.link) {
            if current == room && !link.is_closed() {
                debug!(room, "Already connected, connect is a no-op");
                inner.agent = Some(agent);
                return Ok(false);
            }
        }

        if let Some(old) = inner.link.take() {
            old.close();
        }

        let url = format!(
            "{}/rooms/{}/ws?token={}",
            self.config.hub_url,
            room,
            urlencoding::encode(&self.config.token)
        );
        let (inbound_tx, mut inbound_rx) = mpsc::channel(64);
        inner.link = Some(RelayLink::connect(url, inbound_tx));
        inner.room = Some(room.to_string());
        inner.agent = Some(agent);
        drop(inner);

        let supervisor = Arc::clone(&self);
        tokio::spawn(async move {
            while let Some(raw) = inbound_rx.recv().await {
                supervisor.handle_relay_message(&raw).await;
            }
        });

        info!(room, agent = agent.as_str(), "Connected to room");
        Ok(true)
    }

    /// Kill any existing PTY and start a fresh shell session.
    /// The output log is truncated and viewers get a clear marker.
    pub async fn spawn_shell(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;

        if let Some(old) = inner.pty.take() {
            old.kill();
        }
        let _ = self.frames.send(ViewerFrame::Clear);

        let env = vec![(
            "HANDOFF_CALLBACK_URL".to_string(),
            format!("http://127.0.0.1:{}/callback", self.config.port),
        )];
        let pty = PtyShell::spawn(
            &self.config.shell,
            env,
            &self.config.log_path,
            self.frames.clone(),
        )?;
        inner.pty = Some(pty);
        Ok(())
    }

    /// Write a task into the running shell as one agent invocation.
    ///
    /// The availability check runs first: an uninstalled agent fails the
    /// dispatch before anything touches the PTY.
    pub async fn dispatch(&self, task_text: &str, agent: AgentKind) -> Result<()> {
        agent.require_installed()?;

        let inner = self.inner.lock().await;
        let pty = inner
            .pty
            .as_ref()
            .filter(|p| p.is_alive())
            .ok_or(SupervisorError::ShellNotRunning)?;

        let command = build_dispatch_command(agent, task_text);
        pty.write_line(&command).await?;

        info!(agent = agent.as_str(), "Task dispatched into shell");
        let _ = self.frames.send(ViewerFrame::Task {
            content: task_text.to_string(),
            agent: agent.as_str().to_string(),
        });
        Ok(())
    }

    /// Progress report from the locally-running agent, via the callback
    /// tool: forwarded as `task-update` over the relay and mirrored to
    /// terminal viewers as a status frame.
    pub async fn report_progress(
        &self,
        status: &str,
        message: Option<String>,
        progress: Option<f32>,
    ) -> Result<()> {
        let inner = self.inner.lock().await;
        let link = inner.link.as_ref().ok_or(SupervisorError::NotConnected)?;

        let update = RelayMessage::TaskUpdate {
            status: status.to_string(),
            message: message.clone(),
            progress,
            agent_id: inner.agent.map(|a| a.as_str().to_string()),
        };
        let payload = match serde_json::to_string(&update) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Failed to encode task-update: {}", e);
                return Ok(());
            }
        };
        link.send(payload).await?;

        let _ = self.frames.send(ViewerFrame::Status {
            status: status.to_string(),
            message,
            progress,
        });
        Ok(())
    }

    /// Kill the shell and intentionally close the room; the reconnect loop
    /// will not fire.
    pub async fn disconnect(&self) {
        let mut inner = self.inner.lock().await;
        if let Some(pty) = inner.pty.take() {
            pty.kill();
        }
        if let Some(link) = inner.link.take() {
            link.close();
        }
        if let Some(room) = inner.room.take() {
            info!(%room, "Disconnected");
        }
    }

    /// Forward viewer input verbatim to the PTY
    pub async fn write_to_shell(&self, bytes: Vec<u8>) -> Result<()> {
        let inner = self.inner.lock().await;
        let pty = inner.pty.as_ref().ok_or(SupervisorError::ShellNotRunning)?;
        pty.write_bytes(bytes).await
    }

    pub async fn status(&self) -> SupervisorStatus {
        let inner = self.inner.lock().await;
        SupervisorStatus {
            connected: inner
                .link
                .as_ref()
                .map(|l| !l.is_closed())
                .unwrap_or(false),
            room: inner.room.clone(),
            agent: inner.agent,
            pty: inner.pty.as_ref().map(|p| p.is_alive()).unwrap_or(false),
        }
    }

    /// One raw payload from the relay socket
    async fn handle_relay_message(&self, raw: &str) {
        let msg = match serde_json::from_str::<RelayMessage>(raw) {
            Ok(msg) => msg,
            Err(e) => {
                // Malformed payloads are logged and dropped, nothing more
                debug!("Undecodable relay payload: {}", e);
                return;
            }
        };

        match msg {
            RelayMessage::Tasks { content, agent, .. } => {
                let agent = match agent.as_deref().map(AgentKind::parse) {
                    Some(Ok(agent)) => Some(agent),
                    Some(Err(e)) => {
                        warn!("Dispatch names unknown agent: {}", e);
                        None
                    }
                    None => self.inner.lock().await.agent,
                };
                let Some(agent) = agent else {
                    return;
                };
                if let Err(e) = self.dispatch(&content, agent).await {
                    warn!("Dispatch failed: {}", e);
                    let _ = self
                        .report_progress("failed", Some(e.to_string()), None)
                        .await;
                }
            }
            RelayMessage::TaskUpdate { .. }
            | RelayMessage::TaskEvent(_)
            | RelayMessage::Error { .. } => {
                // Progress traffic from other parties; not for us
            }
            RelayMessage::Unknown => {
                debug!("Unknown relay message ignored");
            }
        }
    }
}

/// `<agent> '<escaped task + suffix>'`
fn build_dispatch_command(agent: AgentKind, task_text: &str) -> String {
    let full_task = format!("{}{}", task_text, DISPATCH_SUFFIX);
    format!("{} {}", agent.command(), shell_single_quote(&full_task))
}
