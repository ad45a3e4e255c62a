//! Storage provider contract and the mode-keyed factory

use crate::config::ConfigStore;
use crate::models::{Task, TaskDraft, TaskPatch, serialize_tasks};
use crate::storage::file::FileProvider;
use crate::storage::id_generator::IdGenerator;
use crate::storage::local::{DEFAULT_QUOTA_BYTES, LocalProvider};
use crate::storage::location::ProjectLocation;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;

/// Result type for provider operations
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Errors returned by storage providers
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Task not found: {0}")]
    NotFound(String),
    #[error("Storage is not initialized. Call initialize first.")]
    NotInitialized,
    #[error(
        "Storage capacity exceeded ({needed} bytes needed, quota {quota} bytes). Export your tasks to free space."
    )]
    CapacityExceeded { needed: u64, quota: u64 },
    #[error("Invalid task: {0}")]
    InvalidTask(String),
    #[error("Failed to locate a data directory for the local store")]
    NoDataDirectory,
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProviderError {
    /// Whether the failure means the store is full
    ///
    /// Callers should offer an export rather than retrying.
    pub fn is_capacity(&self) -> bool {
        matches!(self, ProviderError::CapacityExceeded { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ProviderError::NotFound(_))
    }
}

/// Which backend holds the task collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderMode {
    #[default]
    Local,
    File,
}

impl fmt::Display for ProviderMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderMode::Local => write!(f, "local"),
            ProviderMode::File => write!(f, "file"),
        }
    }
}

impl std::str::FromStr for ProviderMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "local" => Ok(ProviderMode::Local),
            "file" | "markdown" => Ok(ProviderMode::File),
            _ => Err(format!("Unknown storage mode: {}", s)),
        }
    }
}

/// Uniform async CRUD contract implemented by every backend
#[async_trait]
pub trait TaskProvider: Send + Sync {
    /// Backend kind
    fn mode(&self) -> ProviderMode;

    /// Bind the provider to a repository. Calls after the first are no-ops.
    async fn initialize(&self, repo_id: &str) -> ProviderResult<()>;

    async fn is_initialized(&self) -> bool;

    /// Full snapshot of the collection
    async fn get_all(&self) -> ProviderResult<Vec<Task>>;

    /// Returns `None` when no task has this id
    async fn get_by_id(&self, id: &str) -> ProviderResult<Option<Task>> {
        Ok(self.get_all().await?.into_iter().find(|t| t.id == id))
    }

    /// Store a new task with a generated id and timestamps
    async fn create(&self, draft: TaskDraft) -> ProviderResult<Task>;

    /// Merge `patch` into the task and refresh `updated_at`
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::NotFound`] when the id is absent.
    async fn update(&self, id: &str, patch: TaskPatch) -> ProviderResult<Task>;

    /// # Errors
    ///
    /// Returns [`ProviderError::NotFound`] when the id is absent.
    async fn delete(&self, id: &str) -> ProviderResult<()>;

    /// Overwrite the whole collection. Used by migration.
    async fn replace_all(&self, tasks: Vec<Task>) -> ProviderResult<()>;

    /// The collection in the canonical Markdown format
    async fn export_to_markdown(&self) -> ProviderResult<String> {
        Ok(serialize_tasks(&self.get_all().await?))
    }
}

/// Insert a task built from `draft` into an in-memory collection
///
/// Shared by the whole-collection backends so they agree on id and order
/// assignment.
pub(crate) fn insert_draft(tasks: &mut Vec<Task>, draft: TaskDraft) -> ProviderResult<Task> {
    if draft.title.trim().is_empty() {
        return Err(ProviderError::InvalidTask("title must not be empty".to_string()));
    }

    let taken: HashSet<String> = tasks.iter().map(|t| t.id.clone()).collect();
    let explicit_order = draft.order;
    let mut task = Task::from_draft(IdGenerator::generate_unique(&taken), draft);
    task.title = task.title.trim().to_string();

    if explicit_order.is_none() {
        task.order = tasks
            .iter()
            .filter(|t| t.status == task.status)
            .map(|t| t.order + 1)
            .max()
            .unwrap_or(0);
    }

    tasks.push(task.clone());
    Ok(task)
}

/// Apply `patch` to the task with `id` in an in-memory collection
pub(crate) fn apply_patch(
    tasks: &mut [Task],
    id: &str,
    patch: TaskPatch,
) -> ProviderResult<Task> {
    let task = tasks
        .iter_mut()
        .find(|t| t.id == id)
        .ok_or_else(|| ProviderError::NotFound(id.to_string()))?;

    if patch.title.as_deref().is_some_and(|t| t.trim().is_empty()) {
        return Err(ProviderError::InvalidTask("title must not be empty".to_string()));
    }

    task.apply(patch);
    Ok(task.clone())
}

/// Remove the task with `id` from an in-memory collection
pub(crate) fn remove_task(tasks: &mut Vec<Task>, id: &str) -> ProviderResult<Task> {
    let index = tasks
        .iter()
        .position(|t| t.id == id)
        .ok_or_else(|| ProviderError::NotFound(id.to_string()))?;
    Ok(tasks.remove(index))
}

/// The closed set of storage backends
#[derive(Debug)]
pub enum Provider {
    Local(LocalProvider),
    File(FileProvider),
}

impl Provider {
    /// Build the backend for `mode` from the project's configuration
    pub fn open(
        mode: ProviderMode,
        config: &ConfigStore,
        location: &ProjectLocation,
    ) -> ProviderResult<Self> {
        let project = config.project();
        match mode {
            ProviderMode::Local => {
                let store_dir = match &project.store_dir {
                    Some(dir) => location.resolve(dir),
                    None => dirs::data_local_dir()
                        .ok_or(ProviderError::NoDataDirectory)?
                        .join("taskdeck")
                        .join("store"),
                };
                let quota = project.local_quota_bytes.unwrap_or(DEFAULT_QUOTA_BYTES);
                Ok(Provider::Local(LocalProvider::new(store_dir, quota)))
            }
            ProviderMode::File => {
                let path = match &project.tasks_file {
                    Some(path) => location.resolve(path),
                    None => location.default_tasks_file(),
                };
                Ok(Provider::File(FileProvider::new(path)))
            }
        }
    }

    fn inner(&self) -> &dyn TaskProvider {
        match self {
            Provider::Local(p) => p,
            Provider::File(p) => p,
        }
    }
}

#[async_trait]
impl TaskProvider for Provider {
    fn mode(&self) -> ProviderMode {
        self.inner().mode()
    }

    async fn initialize(&self, repo_id: &str) -> ProviderResult<()> {
        self.inner().initialize(repo_id).await
    }

    async fn is_initialized(&self) -> bool {
        self.inner().is_initialized().await
    }

    async fn get_all(&self) -> ProviderResult<Vec<Task>> {
        self.inner().get_all().await
    }

    async fn get_by_id(&self, id: &str) -> ProviderResult<Option<Task>> {
        self.inner().get_by_id(id).await
    }

    async fn create(&self, draft: TaskDraft) -> ProviderResult<Task> {
        self.inner().create(draft).await
    }

    async fn update(&self, id: &str, patch: TaskPatch) -> ProviderResult<Task> {
        self.inner().update(id, patch).await
    }

    async fn delete(&self, id: &str) -> ProviderResult<()> {
        self.inner().delete(id).await
    }

    async fn replace_all(&self, tasks: Vec<Task>) -> ProviderResult<()> {
        self.inner().replace_all(tasks).await
    }

    async fn export_to_markdown(&self) -> ProviderResult<String> {
        self.inner().export_to_markdown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Priority, TaskStatus};
    use tempfile::TempDir;

    #[test]
    fn test_mode_parse_and_display() {
        assert_eq!("local".parse::<ProviderMode>().unwrap(), ProviderMode::Local);
        assert_eq!("markdown".parse::<ProviderMode>().unwrap(), ProviderMode::File);
        assert_eq!(ProviderMode::File.to_string(), "file");
        assert!("remote".parse::<ProviderMode>().is_err());
    }

    #[test]
    fn test_insert_draft_assigns_order_per_status() {
        let mut tasks = Vec::new();
        let a = insert_draft(&mut tasks, TaskDraft::new("A")).unwrap();
        let b = insert_draft(&mut tasks, TaskDraft::new("B")).unwrap();
        let c = insert_draft(
            &mut tasks,
            TaskDraft {
                status: Some(TaskStatus::Review),
                ..TaskDraft::new("C")
            },
        )
        .unwrap();

        assert_eq!(a.order, 0);
        assert_eq!(b.order, 1);
        assert_eq!(c.order, 0);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_insert_draft_rejects_blank_title() {
        let mut tasks = Vec::new();
        let err = insert_draft(&mut tasks, TaskDraft::new("   ")).unwrap_err();
        assert!(matches!(err, ProviderError::InvalidTask(_)));
        assert!(tasks.is_empty());
    }

    #[test]
    fn test_apply_patch_and_remove_missing() {
        let mut tasks = Vec::new();
        let task = insert_draft(&mut tasks, TaskDraft::new("A")).unwrap();

        let updated = apply_patch(
            &mut tasks,
            &task.id,
            TaskPatch {
                priority: Some(Priority::Critical),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(updated.priority, Priority::Critical);

        assert!(apply_patch(&mut tasks, "missing", TaskPatch::default())
            .unwrap_err()
            .is_not_found());
        assert!(remove_task(&mut tasks, "missing").unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_factory_is_keyed_by_mode() {
        let temp = TempDir::new().unwrap();
        let location = ProjectLocation::at(temp.path());
        std::fs::create_dir_all(location.project_dir()).unwrap();
        std::fs::write(location.config_file(), "store_dir: store\n").unwrap();
        let mut config = ConfigStore::load(
            &temp.path().join("user.yaml"),
            &location.config_file(),
        )
        .unwrap();
        config.set_mode(ProviderMode::File);

        let provider = Provider::open(config.mode(), &config, &location).unwrap();
        assert_eq!(provider.mode(), ProviderMode::File);
        assert!(matches!(provider, Provider::File(_)));

        let provider = Provider::open(ProviderMode::Local, &config, &location).unwrap();
        assert_eq!(provider.mode(), ProviderMode::Local);
        provider.initialize("acme/widgets").await.unwrap();
        provider.create(TaskDraft::new("Stored")).await.unwrap();
        assert!(temp.path().join("store").is_dir());
    }
}
