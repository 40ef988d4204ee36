//! File-based task storage
//!
//! Stores one user's tasks as JSON in a file on disk.

use chrono::Utc;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::model::Task;
use crate::{Error, Result};

/// File-backed task store using JSON, with an in-memory cache
pub struct FileTaskStore {
    /// Path to the JSON file
    path: PathBuf,
    /// In-memory cache of tasks
    cache: RwLock<HashMap<Uuid, Task>>,
}

impl FileTaskStore {
    /// Create a new FileTaskStore
    ///
    /// If the file doesn't exist, it will be created on first write.
    pub async fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let cache = if path.exists() {
            let content = tokio::fs::read_to_string(&path).await?;
            let tasks: Vec<Task> = serde_json::from_str(&content)?;
            tasks.into_iter().map(|t| (t.id, t)).collect()
        } else {
            HashMap::new()
        };

        Ok(Self {
            path,
            cache: RwLock::new(cache),
        })
    }

    /// Persist the cache to disk
    async fn persist(&self) -> Result<()> {
        let cache = self.cache.read().await;
        let tasks: Vec<&Task> = cache.values().collect();
        let content = serde_json::to_string_pretty(&tasks)?;
        drop(cache);

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        tokio::fs::write(&self.path, content).await?;
        Ok(())
    }

    /// Resolve a full id or an id prefix to a task id.
    ///
    /// Prefix matches are a convenience, not an authoritative resolution: on
    /// collision the first match wins, with tasks ordered by `created_at`
    /// then id. The empty string therefore resolves to the oldest task.
    pub async fn resolve(&self, id_or_prefix: &str) -> Option<Uuid> {
        let cache = self.cache.read().await;

        if let Ok(id) = Uuid::parse_str(id_or_prefix) {
            if cache.contains_key(&id) {
                return Some(id);
            }
        }

        let mut tasks: Vec<&Task> = cache.values().collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        tasks
            .iter()
            .find(|t| t.id.to_string().starts_with(id_or_prefix))
            .map(|t| t.id)
    }

    /// Insert a freshly created task
    pub async fn create(&self, task: Task) -> Result<Task> {
        {
            let mut cache = self.cache.write().await;
            if cache.contains_key(&task.id) {
                return Err(Error::InvalidInput(format!(
                    "Task with ID {} already exists",
                    task.id
                )));
            }
            cache.insert(task.id, task.clone());
        }
        self.persist().await?;
        Ok(task)
    }

    /// Get a task by exact id
    pub async fn get(&self, id: Uuid) -> Option<Task> {
        let cache = self.cache.read().await;
        cache.get(&id).cloned()
    }

    /// All tasks, newest first
    pub async fn list(&self) -> Vec<Task> {
        let cache = self.cache.read().await;
        let mut tasks: Vec<Task> = cache.values().cloned().collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        tasks
    }

    /// Replace an existing task
    pub async fn update(&self, mut task: Task) -> Result<Task> {
        let now = Utc::now();
        if now > task.updated_at {
            task.updated_at = now;
        }
        {
            let mut cache = self.cache.write().await;
            if !cache.contains_key(&task.id) {
                return Err(Error::TaskNotFound(task.id.to_string()));
            }
            cache.insert(task.id, task.clone());
        }
        self.persist().await?;
        Ok(task)
    }

    /// Delete a task by exact id. Irreversible.
    pub async fn delete(&self, id: Uuid) -> Result<bool> {
        let removed = {
            let mut cache = self.cache.write().await;
            cache.remove(&id).is_some()
        };
        if removed {
            self.persist().await?;
        }
        Ok(removed)
    }

    /// Number of stored tasks
    pub async fn len(&self) -> usize {
        self.cache.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.cache.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn create_test_store() -> (FileTaskStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("tasks.json");
        let store = FileTaskStore::new(&path).await.unwrap();
        (store, temp_dir)
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let (store, _temp) = create_test_store().await;

        let task = Task::new("fix bug");
        let id = task.id;
        store.create(task).await.unwrap();

        let retrieved = store.get(id).await;
        assert!(retrieved.is_some());
        assert_eq!(retrieved.unwrap().description, "fix bug");

        assert!(store.get(Uuid::new_v4()).await.is_none());
    }

    #[tokio::test]
    async fn test_resolve_full_id_and_prefix() {
        let (store, _temp) = create_test_store().await;

        let task = Task::new("fix bug");
        let id = task.id;
        store.create(task).await.unwrap();

        // Full id and 8-char prefix resolve to the identical task
        assert_eq!(store.resolve(&id.to_string()).await, Some(id));
        let prefix: String = id.to_string().chars().take(8).collect();
        assert_eq!(store.resolve(&prefix).await, Some(id));
    }

    #[tokio::test]
    async fn test_resolve_empty_prefix_is_deterministic() {
        let (store, _temp) = create_test_store().await;

        let first = Task::new("first");
        let first_id = first.id;
        store.create(first).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        store.create(Task::new("second")).await.unwrap();

        // Empty prefix matches everything; oldest task wins, every time
        assert_eq!(store.resolve("").await, Some(first_id));
        assert_eq!(store.resolve("").await, Some(first_id));
    }

    #[tokio::test]
    async fn test_resolve_unknown_prefix() {
        let (store, _temp) = create_test_store().await;
        store.create(Task::new("task")).await.unwrap();
        // No uuid starts with 'z'
        assert_eq!(store.resolve("zzzzzzzz").await, None);
    }

    #[tokio::test]
    async fn test_update_task() {
        let (store, _temp) = create_test_store().await;

        let task = Task::new("fix bug");
        let id = task.id;
        store.create(task).await.unwrap();

        let mut task = store.get(id).await.unwrap();
        task.append_input("also add tests");
        store.update(task).await.unwrap();

        let retrieved = store.get(id).await.unwrap();
        assert_eq!(retrieved.context.len(), 1);
        assert_eq!(retrieved.state, super::super::TaskState::Continue);
    }

    #[tokio::test]
    async fn test_update_nonexistent_task() {
        let (store, _temp) = create_test_store().await;

        let result = store.update(Task::new("ghost")).await;
        assert!(matches!(result.unwrap_err(), Error::TaskNotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_task() {
        let (store, _temp) = create_test_store().await;

        let task = Task::new("to delete");
        let id = task.id;
        store.create(task).await.unwrap();

        assert!(store.delete(id).await.unwrap());
        assert!(store.get(id).await.is_none());
        assert!(!store.delete(id).await.unwrap());
    }

    #[tokio::test]
    async fn test_persistence_across_instances() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("tasks.json");

        let task_id;
        {
            let store = FileTaskStore::new(&path).await.unwrap();
            let mut task = Task::new("persistent");
            task.append_input("survives reload");
            task_id = task.id;
            store.create(task).await.unwrap();
        }

        {
            let store = FileTaskStore::new(&path).await.unwrap();
            let task = store.get(task_id).await.unwrap();
            assert_eq!(task.description, "persistent");
            assert_eq!(task.context.len(), 1);
        }
    }

    #[tokio::test]
    async fn test_duplicate_task_error() {
        let (store, _temp) = create_test_store().await;

        let task = Task::new("task");
        store.create(task.clone()).await.unwrap();

        let result = store.create(task).await;
        assert!(matches!(result.unwrap_err(), Error::InvalidInput(_)));
    }
}
