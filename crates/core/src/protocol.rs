//! Relay wire protocol
//!
//! Every party in a room speaks the same small JSON vocabulary. The enum is
//! closed: payloads with an unrecognised `type` deserialize to `Unknown`
//! and are ignored instead of breaking the stream.

use serde::{Deserialize, Serialize};

use crate::event::{StreamEvent, TaskEventEnvelope};
use crate::owner::TaskOwnerHandle;
use crate::task::TaskState;

/// Messages relayed between room members
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RelayMessage {
    /// Dispatch a task to whichever executor is listening
    #[serde(rename = "tasks")]
    Tasks {
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        agent: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source: Option<String>,
    },

    /// Progress report from an executor
    #[serde(rename = "task-update")]
    TaskUpdate {
        status: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        progress: Option<f32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        agent_id: Option<String>,
    },

    /// Ephemeral event broadcast
    #[serde(rename = "task_event")]
    TaskEvent(TaskEventEnvelope),

    /// Error reply to a malformed or unprocessable inbound message
    #[serde(rename = "error")]
    Error { message: String },

    #[serde(other)]
    Unknown,
}

impl RelayMessage {
    /// Wire name for diagnostics
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Tasks { .. } => "tasks",
            Self::TaskUpdate { .. } => "task-update",
            Self::TaskEvent(_) => "task_event",
            Self::Error { .. } => "error",
            Self::Unknown => "unknown",
        }
    }

    /// Best-effort description of a raw payload, for logging only.
    /// Never fails: unparseable payloads are still relayed by the hub.
    pub fn describe(raw: &str) -> &'static str {
        match serde_json::from_str::<RelayMessage>(raw) {
            Ok(msg) => msg.kind(),
            Err(_) => "unparseable",
        }
    }
}

/// Feed one raw socket payload into a task owner.
///
/// Returns an optional reply to send back to the originating connection.
/// Malformed JSON yields an `error` reply, never a crash; messages meant
/// for other parties yield nothing.
pub async fn route_to_owner(owner: &TaskOwnerHandle, raw: &str) -> Option<String> {
    let msg = match serde_json::from_str::<RelayMessage>(raw) {
        Ok(msg) => msg,
        Err(e) => {
            tracing::debug!(user_id = %owner.user_id(), "Malformed relay payload: {}", e);
            let reply = RelayMessage::Error {
                message: format!("malformed message: {}", e),
            };
            return serde_json::to_string(&reply).ok();
        }
    };

    match msg {
        RelayMessage::Tasks { content, .. } => {
            // A dispatch seen on the wire (e.g. from the voice path) becomes
            // a task in the owner's map; executors work from the same relay
            // copy they already received.
            if let Err(e) = owner.create_task(content).await {
                tracing::warn!(user_id = %owner.user_id(), "Task creation failed: {}", e);
            }
            None
        }
        RelayMessage::TaskUpdate {
            status, message, ..
        } => {
            apply_task_update(owner, &status, message).await;
            None
        }
        RelayMessage::TaskEvent(envelope) => {
            let _ = owner.ingest(envelope).await;
            None
        }
        RelayMessage::Error { .. } | RelayMessage::Unknown => None,
    }
}

/// `task-update` carries no task id; it applies to the user's single active
/// task (newest non-finished one), which is how the executors report today.
async fn apply_task_update(owner: &TaskOwnerHandle, status: &str, message: Option<String>) {
    let Ok(tasks) = owner.list_tasks().await else {
        return;
    };
    let Some(task) = tasks.iter().find(|t| {
        matches!(
            t.state,
            TaskState::New | TaskState::Continue | TaskState::InProgress
        )
    }) else {
        tracing::debug!(user_id = %owner.user_id(), status, "task-update with no active task");
        return;
    };

    let event = match status {
        "started" | "in-progress" => StreamEvent::Status {
            data: serde_json::json!({"status": "started"}),
        },
        "completed" => StreamEvent::Completion {
            content: message.unwrap_or_else(|| "Task completed".to_string()),
            success: true,
            needs_feedback: false,
        },
        "failed" => StreamEvent::Completion {
            content: message.unwrap_or_else(|| "Task failed".to_string()),
            success: false,
            needs_feedback: false,
        },
        other => StreamEvent::Status {
            data: serde_json::json!({"status": other, "message": message}),
        },
    };

    let _ = owner.ingest(TaskEventEnvelope::new(task.id, event)).await;
}
