//! Task owner actor
//!
//! One actor instance exists per user and is the single writer for that
//! user's task map. External callers communicate via `TaskOwnerHandle`,
//! which sends `OwnerCommand` messages over an mpsc channel; commands are
//! processed strictly sequentially, so there are no intra-owner races.
//!
//! Inbound stream events are split here: stored events land in the task's
//! context, ephemeral events go out through the injected `EventSink` and a
//! bounded per-task ring buffer. Executors never mutate tasks directly.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::event::{EventClass, StreamEvent, TaskEventEnvelope};
use crate::task::{FileTaskStore, Role, Task};
use crate::tier::{Capabilities, DispatchTarget, Tier};
use crate::{Error, Result};

/// Most-recent ephemeral envelopes retained per task for late-joining
/// viewers. Older ones are dropped; the durable context is unaffected.
pub const EPHEMERAL_BUFFER_CAP: usize = 256;

/// Where the owner publishes ephemeral envelopes.
///
/// Passed to the constructor, scoped to the owner — never a settable
/// global. Delivery is best-effort.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, envelope: TaskEventEnvelope);
}

/// `EventSink` over an mpsc sender
pub struct ChannelSink {
    tx: mpsc::Sender<TaskEventEnvelope>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<TaskEventEnvelope>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl EventSink for ChannelSink {
    async fn publish(&self, envelope: TaskEventEnvelope) {
        if self.tx.send(envelope).await.is_err() {
            warn!("Event sink channel closed, ephemeral event dropped");
        }
    }
}

/// Commands processed by the owner actor
enum OwnerCommand {
    CreateTask {
        description: String,
        reply: oneshot::Sender<Result<Task>>,
    },
    UpdateTask {
        id_or_prefix: String,
        input: String,
        reply: oneshot::Sender<Option<Task>>,
    },
    GetTask {
        id_or_prefix: String,
        reply: oneshot::Sender<Option<Task>>,
    },
    ListTasks {
        reply: oneshot::Sender<Vec<Task>>,
    },
    DeleteTask {
        id_or_prefix: String,
        reply: oneshot::Sender<bool>,
    },
    PauseTask {
        id_or_prefix: String,
        reply: oneshot::Sender<Option<Task>>,
    },
    ResumeTask {
        id_or_prefix: String,
        reply: oneshot::Sender<Option<Task>>,
    },
    Ingest {
        envelope: TaskEventEnvelope,
    },
    RecentEvents {
        id_or_prefix: String,
        reply: oneshot::Sender<Vec<TaskEventEnvelope>>,
    },
    SetTier {
        tier: Tier,
        reply: oneshot::Sender<Capabilities>,
    },
    GetCapabilities {
        reply: oneshot::Sender<Capabilities>,
    },
    CachePersona {
        fragment: String,
    },
    PersonaFragment {
        reply: oneshot::Sender<Option<String>>,
    },
}

/// Handle to a running task owner actor (cheap to Clone)
#[derive(Clone)]
pub struct TaskOwnerHandle {
    user_id: String,
    command_tx: mpsc::Sender<OwnerCommand>,
}

impl TaskOwnerHandle {
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> OwnerCommand,
    ) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.command_tx
            .send(build(tx))
            .await
            .map_err(|_| Error::OwnerUnavailable(self.user_id.clone()))?;
        rx.await
            .map_err(|_| Error::OwnerUnavailable(self.user_id.clone()))
    }

    /// Create a task; it always starts in state `new`
    pub async fn create_task(&self, description: impl Into<String>) -> Result<Task> {
        let description = description.into();
        self.request(|reply| OwnerCommand::CreateTask { description, reply })
            .await?
    }

    /// Append a new instruction to an existing task and force `continue`.
    /// Unknown ids come back as `None`, never an error.
    pub async fn update_task(
        &self,
        id_or_prefix: impl Into<String>,
        input: impl Into<String>,
    ) -> Result<Option<Task>> {
        let id_or_prefix = id_or_prefix.into();
        let input = input.into();
        self.request(|reply| OwnerCommand::UpdateTask {
            id_or_prefix,
            input,
            reply,
        })
        .await
    }

    /// Look up a task by full id or unambiguous prefix
    pub async fn get_task(&self, id_or_prefix: impl Into<String>) -> Result<Option<Task>> {
        let id_or_prefix = id_or_prefix.into();
        self.request(|reply| OwnerCommand::GetTask { id_or_prefix, reply })
            .await
    }

    /// All tasks, newest first
    pub async fn list_tasks(&self) -> Result<Vec<Task>> {
        self.request(|reply| OwnerCommand::ListTasks { reply }).await
    }

    /// Delete a task (prefix resolution applies). Irreversible.
    pub async fn delete_task(&self, id_or_prefix: impl Into<String>) -> Result<bool> {
        let id_or_prefix = id_or_prefix.into();
        self.request(|reply| OwnerCommand::DeleteTask { id_or_prefix, reply })
            .await
    }

    /// Explicitly pause a non-terminal task
    pub async fn pause_task(&self, id_or_prefix: impl Into<String>) -> Result<Option<Task>> {
        let id_or_prefix = id_or_prefix.into();
        self.request(|reply| OwnerCommand::PauseTask { id_or_prefix, reply })
            .await
    }

    /// Resume a paused task, signalling an executor to pick it back up
    pub async fn resume_task(&self, id_or_prefix: impl Into<String>) -> Result<Option<Task>> {
        let id_or_prefix = id_or_prefix.into();
        self.request(|reply| OwnerCommand::ResumeTask { id_or_prefix, reply })
            .await
    }

    /// Feed an executor event into the owner (fire-and-forget)
    pub async fn ingest(&self, envelope: TaskEventEnvelope) -> Result<()> {
        self.command_tx
            .send(OwnerCommand::Ingest { envelope })
            .await
            .map_err(|_| Error::OwnerUnavailable(self.user_id.clone()))
    }

    /// Recent ephemeral envelopes for a task (bounded ring buffer)
    pub async fn recent_events(
        &self,
        id_or_prefix: impl Into<String>,
    ) -> Result<Vec<TaskEventEnvelope>> {
        let id_or_prefix = id_or_prefix.into();
        self.request(|reply| OwnerCommand::RecentEvents { id_or_prefix, reply })
            .await
    }

    /// Change the user's tier. Clears cached tier-dependent state; existing
    /// tasks are never mutated.
    pub async fn set_tier(&self, tier: Tier) -> Result<Capabilities> {
        self.request(|reply| OwnerCommand::SetTier { tier, reply })
            .await
    }

    pub async fn capabilities(&self) -> Result<Capabilities> {
        self.request(|reply| OwnerCommand::GetCapabilities { reply })
            .await
    }

    /// Refuse a dispatch to a target the current tier does not expose
    pub async fn ensure_dispatch_allowed(&self, target: DispatchTarget) -> Result<()> {
        let capabilities = self.capabilities().await?;
        if capabilities.allows(target) {
            Ok(())
        } else {
            Err(Error::CapabilityDenied {
                capability: target.as_str().to_string(),
            })
        }
    }

    /// Cache a generated persona/system-prompt fragment for the current tier
    pub async fn cache_persona(&self, fragment: impl Into<String>) -> Result<()> {
        let fragment = fragment.into();
        self.command_tx
            .send(OwnerCommand::CachePersona { fragment })
            .await
            .map_err(|_| Error::OwnerUnavailable(self.user_id.clone()))
    }

    pub async fn persona_fragment(&self) -> Result<Option<String>> {
        self.request(|reply| OwnerCommand::PersonaFragment { reply })
            .await
    }
}

/// The actor itself. Owns the store exclusively while running.
pub struct TaskOwner {
    user_id: String,
    store: FileTaskStore,
    sink: Arc<dyn EventSink>,
    tier: Tier,
    capabilities: Capabilities,
    persona_fragment: Option<String>,
    ephemeral: HashMap<Uuid, VecDeque<TaskEventEnvelope>>,
}

impl TaskOwner {
    /// Spawn the actor, returning its handle
    pub fn spawn(
        user_id: impl Into<String>,
        store: FileTaskStore,
        sink: Arc<dyn EventSink>,
        tier: Tier,
    ) -> TaskOwnerHandle {
        let user_id = user_id.into();
        let (command_tx, command_rx) = mpsc::channel(256);

        let owner = TaskOwner {
            user_id: user_id.clone(),
            store,
            sink,
            tier,
            capabilities: Capabilities::for_tier(tier),
            persona_fragment: None,
            ephemeral: HashMap::new(),
        };

        tokio::spawn(owner.run(command_rx));

        TaskOwnerHandle {
            user_id,
            command_tx,
        }
    }

    async fn run(mut self, mut command_rx: mpsc::Receiver<OwnerCommand>) {
        while let Some(cmd) = command_rx.recv().await {
            self.handle(cmd).await;
        }
        debug!(user_id = %self.user_id, "Task owner stopped");
    }

    async fn handle(&mut self, cmd: OwnerCommand) {
        match cmd {
            OwnerCommand::CreateTask { description, reply } => {
                let result = self.store.create(Task::new(description)).await;
                let _ = reply.send(result);
            }
            OwnerCommand::UpdateTask {
                id_or_prefix,
                input,
                reply,
            } => {
                let task = match self.store.resolve(&id_or_prefix).await {
                    Some(id) => self.store.get(id).await,
                    None => None,
                };
                let updated = match task {
                    Some(mut task) => {
                        task.append_input(input);
                        self.persist(task).await
                    }
                    None => None,
                };
                let _ = reply.send(updated);
            }
            OwnerCommand::GetTask {
                id_or_prefix,
                reply,
            } => {
                let task = match self.store.resolve(&id_or_prefix).await {
                    Some(id) => self.store.get(id).await,
                    None => None,
                };
                let _ = reply.send(task);
            }
            OwnerCommand::ListTasks { reply } => {
                let _ = reply.send(self.store.list().await);
            }
            OwnerCommand::DeleteTask {
                id_or_prefix,
                reply,
            } => {
                let deleted = match self.store.resolve(&id_or_prefix).await {
                    Some(id) => {
                        self.ephemeral.remove(&id);
                        self.store.delete(id).await.unwrap_or_else(|e| {
                            warn!(user_id = %self.user_id, "Delete failed: {}", e);
                            false
                        })
                    }
                    None => false,
                };
                let _ = reply.send(deleted);
            }
            OwnerCommand::PauseTask {
                id_or_prefix,
                reply,
            } => {
                let _ = reply.send(self.transition(&id_or_prefix, Task::pause).await);
            }
            OwnerCommand::ResumeTask {
                id_or_prefix,
                reply,
            } => {
                let _ = reply.send(self.transition(&id_or_prefix, Task::resume).await);
            }
            OwnerCommand::Ingest { envelope } => {
                self.ingest(envelope).await;
            }
            OwnerCommand::RecentEvents {
                id_or_prefix,
                reply,
            } => {
                let events = match self.store.resolve(&id_or_prefix).await {
                    Some(id) => self
                        .ephemeral
                        .get(&id)
                        .map(|buf| buf.iter().cloned().collect())
                        .unwrap_or_default(),
                    None => Vec::new(),
                };
                let _ = reply.send(events);
            }
            OwnerCommand::SetTier { tier, reply } => {
                if tier != self.tier {
                    self.tier = tier;
                    self.capabilities = Capabilities::for_tier(tier);
                    // Tier-dependent cache is stale now; tasks are untouched
                    self.persona_fragment = None;
                }
                let _ = reply.send(self.capabilities);
            }
            OwnerCommand::GetCapabilities { reply } => {
                let _ = reply.send(self.capabilities);
            }
            OwnerCommand::CachePersona { fragment } => {
                self.persona_fragment = Some(fragment);
            }
            OwnerCommand::PersonaFragment { reply } => {
                let _ = reply.send(self.persona_fragment.clone());
            }
        }
    }

    /// Apply a state transition to a resolved task, logging (not raising)
    /// transition errors. Unknown ids come back as `None`.
    async fn transition(
        &mut self,
        id_or_prefix: &str,
        apply: impl FnOnce(&mut Task) -> Result<()>,
    ) -> Option<Task> {
        let id = self.store.resolve(id_or_prefix).await?;
        let mut task = self.store.get(id).await?;
        if let Err(e) = apply(&mut task) {
            warn!(user_id = %self.user_id, "Transition rejected: {}", e);
            return Some(task);
        }
        self.persist(task).await
    }

    async fn persist(&self, task: Task) -> Option<Task> {
        match self.store.update(task).await {
            Ok(task) => Some(task),
            Err(e) => {
                warn!(user_id = %self.user_id, "Persist failed: {}", e);
                None
            }
        }
    }

    /// Split an inbound event into the stored or the ephemeral path.
    /// The two paths are mutually exclusive per event.
    async fn ingest(&mut self, envelope: TaskEventEnvelope) {
        let id = envelope.task_id;
        if self.store.get(id).await.is_none() {
            debug!(
                user_id = %self.user_id,
                task_id = %id,
                kind = envelope.event.kind(),
                "Event for unknown task dropped"
            );
            return;
        }

        match envelope.event.classify() {
            EventClass::Stored => self.store_event(id, &envelope.event).await,
            EventClass::Ephemeral => {
                self.apply_status(id, &envelope.event).await;
                let buffer = self.ephemeral.entry(id).or_default();
                if buffer.len() == EPHEMERAL_BUFFER_CAP {
                    buffer.pop_front();
                }
                buffer.push_back(envelope.clone());
                self.sink.publish(envelope).await;
            }
        }
    }

    async fn store_event(&mut self, id: Uuid, event: &StreamEvent) {
        let Some(mut task) = self.store.get(id).await else {
            return;
        };
        match event {
            StreamEvent::Message { role, content } => {
                task.push_context(*role, content.clone());
            }
            StreamEvent::Completion {
                content,
                success,
                needs_feedback,
            } => {
                task.push_context(Role::Assistant, content.clone());
                let transition = if *success {
                    task.complete(*needs_feedback)
                } else {
                    task.fail()
                };
                if let Err(e) = transition {
                    warn!(user_id = %self.user_id, "Completion transition rejected: {}", e);
                }
            }
            // classify() routed everything else to the ephemeral path
            _ => return,
        }
        self.persist(task).await;
    }

    /// Executor `status` events drive the `continue -> in-progress` edge
    /// without being persisted themselves.
    async fn apply_status(&mut self, id: Uuid, event: &StreamEvent) {
        let StreamEvent::Status { data } = event else {
            return;
        };
        let started = data
            .get("status")
            .and_then(|s| s.as_str())
            .is_some_and(|s| s == "started" || s == "in-progress");
        if !started {
            return;
        }
        if let Some(mut task) = self.store.get(id).await {
            if task.mark_in_progress().is_ok() {
                self.persist(task).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    async fn spawn_owner() -> (TaskOwnerHandle, mpsc::Receiver<TaskEventEnvelope>, TempDir) {
        let temp = TempDir::new().unwrap();
        let store = FileTaskStore::new(temp.path().join("tasks.json"))
            .await
            .unwrap();
        let (tx, rx) = mpsc::channel(64);
        let handle = TaskOwner::spawn("user-1", store, Arc::new(ChannelSink::new(tx)), Tier::Pro);
        (handle, rx, temp)
    }

    #[tokio::test]
    async fn test_create_then_update() {
        let (owner, _rx, _temp) = spawn_owner().await;

        let task = owner.create_task("fix bug").await.unwrap();
        assert_eq!(task.state, crate::task::TaskState::New);

        let updated = owner
            .update_task(task.id.to_string(), "also add tests")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.state, crate::task::TaskState::Continue);
        assert_eq!(updated.context.len(), 1);
    }

    #[tokio::test]
    async fn test_get_by_prefix_matches_full_id() {
        let (owner, _rx, _temp) = spawn_owner().await;

        let task = owner.create_task("fix bug").await.unwrap();
        let by_id = owner.get_task(task.id.to_string()).await.unwrap().unwrap();
        let by_prefix = owner.get_task(task.short_id()).await.unwrap().unwrap();
        assert_eq!(by_id.id, by_prefix.id);
    }

    #[tokio::test]
    async fn test_unknown_id_is_not_an_error() {
        let (owner, _rx, _temp) = spawn_owner().await;

        assert!(owner.get_task("deadbeef").await.unwrap().is_none());
        assert!(owner
            .update_task("deadbeef", "hello")
            .await
            .unwrap()
            .is_none());
        assert!(!owner.delete_task("deadbeef").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_by_prefix() {
        let (owner, _rx, _temp) = spawn_owner().await;

        let task = owner.create_task("to delete").await.unwrap();
        assert!(owner.delete_task(task.short_id()).await.unwrap());
        assert!(owner.list_tasks().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ephemeral_event_does_not_touch_context() {
        let (owner, mut rx, _temp) = spawn_owner().await;

        let task = owner.create_task("fix bug").await.unwrap();
        owner
            .ingest(TaskEventEnvelope::new(
                task.id,
                StreamEvent::ToolCall {
                    data: json!({"tool": "grep"}),
                },
            ))
            .await
            .unwrap();

        // The envelope was broadcast...
        let published = rx.recv().await.unwrap();
        assert_eq!(published.task_id, task.id);

        // ...but the stored context is unchanged
        let task = owner.get_task(task.id.to_string()).await.unwrap().unwrap();
        assert_eq!(task.context.len(), 0);
    }

    #[tokio::test]
    async fn test_stored_event_is_not_broadcast() {
        let (owner, mut rx, _temp) = spawn_owner().await;

        let task = owner.create_task("fix bug").await.unwrap();
        owner
            .ingest(TaskEventEnvelope::new(
                task.id,
                StreamEvent::Message {
                    role: Role::Assistant,
                    content: "patched".into(),
                },
            ))
            .await
            .unwrap();

        let task = owner.get_task(task.id.to_string()).await.unwrap().unwrap();
        assert_eq!(task.context.len(), 1);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_completion_drives_state() {
        let (owner, _rx, _temp) = spawn_owner().await;

        let task = owner.create_task("fix bug").await.unwrap();
        owner
            .ingest(TaskEventEnvelope::new(
                task.id,
                StreamEvent::Status {
                    data: json!({"status": "started"}),
                },
            ))
            .await
            .unwrap();
        owner
            .ingest(TaskEventEnvelope::new(
                task.id,
                StreamEvent::Completion {
                    content: "all done".into(),
                    success: true,
                    needs_feedback: false,
                },
            ))
            .await
            .unwrap();

        let task = owner.get_task(task.id.to_string()).await.unwrap().unwrap();
        assert_eq!(task.state, crate::task::TaskState::Completed);
        assert_eq!(task.context.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_completion() {
        let (owner, _rx, _temp) = spawn_owner().await;

        let task = owner.create_task("fix bug").await.unwrap();
        owner
            .ingest(TaskEventEnvelope::new(
                task.id,
                StreamEvent::Completion {
                    content: "could not reproduce".into(),
                    success: false,
                    needs_feedback: false,
                },
            ))
            .await
            .unwrap();

        let task = owner.get_task(task.id.to_string()).await.unwrap().unwrap();
        assert_eq!(task.state, crate::task::TaskState::Failed);
    }

    #[tokio::test]
    async fn test_ephemeral_buffer_is_bounded() {
        let (owner, mut rx, _temp) = spawn_owner().await;

        let task = owner.create_task("busy task").await.unwrap();
        for i in 0..(EPHEMERAL_BUFFER_CAP + 10) {
            owner
                .ingest(TaskEventEnvelope::new(
                    task.id,
                    StreamEvent::Thinking {
                        data: json!({"step": i}),
                    },
                ))
                .await
                .unwrap();
            // Drain the sink so the channel never blocks the owner
            let _ = rx.recv().await;
        }

        let recent = owner.recent_events(task.id.to_string()).await.unwrap();
        assert_eq!(recent.len(), EPHEMERAL_BUFFER_CAP);
    }

    #[tokio::test]
    async fn test_cloud_dispatch_gated_by_tier() {
        let (owner, _rx, _temp) = spawn_owner().await;

        // Spawned on Pro; cloud desktops are available
        owner
            .ensure_dispatch_allowed(DispatchTarget::CloudDesktop)
            .await
            .unwrap();

        owner.set_tier(Tier::Free).await.unwrap();
        let err = owner
            .ensure_dispatch_allowed(DispatchTarget::CloudDesktop)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CapabilityDenied { .. }));

        // The local terminal never goes away
        owner
            .ensure_dispatch_allowed(DispatchTarget::LocalTerminal)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_tier_change_clears_persona_cache() {
        let (owner, _rx, _temp) = spawn_owner().await;

        owner.cache_persona("you are a pro helper").await.unwrap();
        assert!(owner.persona_fragment().await.unwrap().is_some());

        let caps = owner.set_tier(Tier::Free).await.unwrap();
        assert!(!caps.cloud_desktop);
        assert!(owner.persona_fragment().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_tier_change_never_mutates_tasks() {
        let (owner, _rx, _temp) = spawn_owner().await;

        let task = owner.create_task("fix bug").await.unwrap();
        owner.set_tier(Tier::Free).await.unwrap();

        let after = owner.get_task(task.id.to_string()).await.unwrap().unwrap();
        assert_eq!(after.state, task.state);
        assert_eq!(after.updated_at, task.updated_at);
    }

    #[tokio::test]
    async fn test_pause_and_resume() {
        let (owner, _rx, _temp) = spawn_owner().await;

        let task = owner.create_task("fix bug").await.unwrap();
        let paused = owner
            .pause_task(task.id.to_string())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(paused.state, crate::task::TaskState::Paused);

        let resumed = owner
            .resume_task(task.id.to_string())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resumed.state, crate::task::TaskState::Continue);
    }
}
