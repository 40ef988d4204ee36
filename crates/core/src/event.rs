//! Stream events produced by executors
//!
//! Every event an executor emits is classified exactly once as either
//! stored (appended to the task's context) or ephemeral (broadcast for live
//! UI display, never persisted). That split is what keeps storage bounded
//! while tool-call and thinking indicators stay live.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::task::Role;

fn default_true() -> bool {
    true
}

/// An atomic progress unit from an executor.
///
/// Closed tagged union over the known kinds; anything else lands in
/// `Unknown` and is safely ignored rather than breaking the stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Message {
        role: Role,
        content: String,
    },
    Completion {
        content: String,
        #[serde(default = "default_true")]
        success: bool,
        #[serde(default)]
        needs_feedback: bool,
    },
    ToolCall {
        #[serde(default)]
        data: Value,
    },
    ToolUpdate {
        #[serde(default)]
        data: Value,
    },
    Thinking {
        #[serde(default)]
        data: Value,
    },
    Plan {
        #[serde(default)]
        data: Value,
    },
    Status {
        #[serde(default)]
        data: Value,
    },
    Permission {
        #[serde(default)]
        data: Value,
    },
    #[serde(other)]
    Unknown,
}

/// Which channel an event belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventClass {
    /// Persisted into `Task.context`, part of durable conversational history
    Stored,
    /// Broadcast for live display only, never persisted
    Ephemeral,
}

impl StreamEvent {
    /// Classify an event as stored or ephemeral.
    ///
    /// Total and deterministic: `message` with role user/assistant and
    /// `completion` are stored; everything else — including system messages
    /// and unknown kinds — is ephemeral.
    pub fn classify(&self) -> EventClass {
        match self {
            Self::Message {
                role: Role::User | Role::Assistant,
                ..
            } => EventClass::Stored,
            Self::Completion { .. } => EventClass::Stored,
            _ => EventClass::Ephemeral,
        }
    }

    /// Wire name of the event kind, for diagnostics
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Message { .. } => "message",
            Self::Completion { .. } => "completion",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolUpdate { .. } => "tool_update",
            Self::Thinking { .. } => "thinking",
            Self::Plan { .. } => "plan",
            Self::Status { .. } => "status",
            Self::Permission { .. } => "permission",
            Self::Unknown => "unknown",
        }
    }
}

/// The `task_event` wire envelope broadcast for ephemeral events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEventEnvelope {
    #[serde(rename = "taskId")]
    pub task_id: Uuid,
    pub event: StreamEvent,
    pub timestamp: DateTime<Utc>,
}

impl TaskEventEnvelope {
    pub fn new(task_id: Uuid, event: StreamEvent) -> Self {
        Self {
            task_id,
            event,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_user_and_assistant_messages_are_stored() {
        let user = StreamEvent::Message {
            role: Role::User,
            content: "hi".into(),
        };
        let assistant = StreamEvent::Message {
            role: Role::Assistant,
            content: "hello".into(),
        };
        assert_eq!(user.classify(), EventClass::Stored);
        assert_eq!(assistant.classify(), EventClass::Stored);
    }

    #[test]
    fn test_system_message_is_ephemeral() {
        let event = StreamEvent::Message {
            role: Role::System,
            content: "booted".into(),
        };
        assert_eq!(event.classify(), EventClass::Ephemeral);
    }

    #[test]
    fn test_completion_is_stored() {
        let event = StreamEvent::Completion {
            content: "done".into(),
            success: true,
            needs_feedback: false,
        };
        assert_eq!(event.classify(), EventClass::Stored);
    }

    #[test]
    fn test_ui_signals_are_ephemeral() {
        for event in [
            StreamEvent::ToolCall { data: json!({}) },
            StreamEvent::ToolUpdate { data: json!({}) },
            StreamEvent::Thinking { data: json!({}) },
            StreamEvent::Plan { data: json!({}) },
            StreamEvent::Status { data: json!({}) },
            StreamEvent::Permission { data: json!({}) },
            StreamEvent::Unknown,
        ] {
            assert_eq!(event.classify(), EventClass::Ephemeral);
        }
    }

    #[test]
    fn test_classification_is_deterministic() {
        let event = StreamEvent::ToolCall {
            data: json!({"tool": "grep"}),
        };
        assert_eq!(event.classify(), event.classify());
    }

    #[test]
    fn test_unknown_type_deserializes() {
        let event: StreamEvent =
            serde_json::from_value(json!({"type": "telemetry", "weird": 1})).unwrap();
        assert!(matches!(event, StreamEvent::Unknown));
        assert_eq!(event.classify(), EventClass::Ephemeral);
    }

    #[test]
    fn test_message_wire_format() {
        let event: StreamEvent = serde_json::from_value(json!({
            "type": "message",
            "role": "assistant",
            "content": "patched the parser"
        }))
        .unwrap();
        assert_eq!(event.classify(), EventClass::Stored);
        assert_eq!(event.kind(), "message");
    }

    #[test]
    fn test_completion_defaults() {
        let event: StreamEvent =
            serde_json::from_value(json!({"type": "completion", "content": "ok"})).unwrap();
        match event {
            StreamEvent::Completion {
                success,
                needs_feedback,
                ..
            } => {
                assert!(success);
                assert!(!needs_feedback);
            }
            other => panic!("expected completion, got {:?}", other),
        }
    }

    #[test]
    fn test_envelope_wire_field_names() {
        let envelope = TaskEventEnvelope::new(Uuid::new_v4(), StreamEvent::Unknown);
        let value = serde_json::to_value(&envelope).unwrap();
        assert!(value.get("taskId").is_some());
        assert!(value.get("timestamp").is_some());
        assert_eq!(value["event"]["type"], "unknown");
    }
}
