//! Task model definitions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result};

/// Lifecycle state of a delegated task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskState {
    New,
    Continue,
    InProgress,
    PendingUserFeedback,
    Completed,
    Failed,
    Paused,
}

impl Default for TaskState {
    fn default() -> Self {
        Self::New
    }
}

impl TaskState {
    /// Check if the state is terminal (no executor will touch it again
    /// without new input)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// States from which a fresh `continue` transition is legal
    pub fn can_continue(&self) -> bool {
        matches!(
            self,
            Self::New | Self::Completed | Self::Failed | Self::PendingUserFeedback | Self::Paused
        )
    }

    /// Kebab-case wire name, used in errors and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Continue => "continue",
            Self::InProgress => "in-progress",
            Self::PendingUserFeedback => "pending-user-feedback",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Paused => "paused",
        }
    }
}

/// Author of a stored context entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// One stored event in a task's conversational context
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextEntry {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ContextEntry {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// A unit of delegated work, owned exclusively by the task owner.
/// Executors only ever see relayed deltas.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub description: String,
    pub state: TaskState,
    /// Append-only except on explicit task deletion
    pub context: Vec<ContextEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Create a new task with the given description, starting in `new`
    pub fn new(description: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            description: description.into(),
            state: TaskState::New,
            context: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// First 8 characters of the hyphenated id, for display and prefix lookup
    pub fn short_id(&self) -> String {
        self.id.to_string().chars().take(8).collect()
    }

    /// Refresh `updated_at`, keeping it monotonically non-decreasing
    pub fn touch(&mut self) {
        let now = Utc::now();
        if now > self.updated_at {
            self.updated_at = now;
        }
    }

    /// Append a new user instruction and force state `continue`.
    /// Prior context entries are never mutated or reordered.
    pub fn append_input(&mut self, input: impl Into<String>) {
        self.context.push(ContextEntry::new(Role::User, input));
        self.state = TaskState::Continue;
        self.touch();
    }

    /// Append a stored event (assistant message or completion text)
    pub fn push_context(&mut self, role: Role, content: impl Into<String>) {
        self.context.push(ContextEntry::new(role, content));
        self.touch();
    }

    /// An executor picked the task up
    pub fn mark_in_progress(&mut self) -> Result<()> {
        match self.state {
            TaskState::New | TaskState::Continue => {
                self.state = TaskState::InProgress;
                self.touch();
                Ok(())
            }
            state => Err(self.invalid("start", state)),
        }
    }

    /// Executor reported success. Lands in `pending-user-feedback` when the
    /// executor is waiting on an answer, `completed` otherwise.
    pub fn complete(&mut self, needs_feedback: bool) -> Result<()> {
        if self.state.is_terminal() {
            return Err(self.invalid("complete", self.state));
        }
        self.state = if needs_feedback {
            TaskState::PendingUserFeedback
        } else {
            TaskState::Completed
        };
        self.touch();
        Ok(())
    }

    /// Executor reported failure
    pub fn fail(&mut self) -> Result<()> {
        if self.state.is_terminal() {
            return Err(self.invalid("fail", self.state));
        }
        self.state = TaskState::Failed;
        self.touch();
        Ok(())
    }

    /// Explicit pause, legal from any non-terminal state
    pub fn pause(&mut self) -> Result<()> {
        if self.state.is_terminal() || self.state == TaskState::Paused {
            return Err(self.invalid("pause", self.state));
        }
        self.state = TaskState::Paused;
        self.touch();
        Ok(())
    }

    /// Resume a paused task, signalling an executor to pick it back up
    pub fn resume(&mut self) -> Result<()> {
        if self.state != TaskState::Paused {
            return Err(self.invalid("resume", self.state));
        }
        self.state = TaskState::Continue;
        self.touch();
        Ok(())
    }

    fn invalid(&self, action: &str, state: TaskState) -> Error {
        Error::InvalidTransition {
            id: self.short_id(),
            state: state.as_str().to_string(),
            action: action.to_string(),
        }
    }
}
