//! Local key/value store backend
//!
//! All projects share one flat directory of entries. Each project's tasks
//! live under a single key derived from a SHA-256 of the repository
//! identifier, and every write replaces that entry as a whole: write to a
//! temporary file, then rename.

use crate::models::{Task, TaskDraft, TaskPatch};
use crate::storage::provider::{
    ProviderError, ProviderMode, ProviderResult, TaskProvider, apply_patch, insert_draft,
    remove_task,
};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::PathBuf;
use tokio::fs;
use tokio::sync::RwLock;

/// Default per-entry quota, the size of a typical browser storage bucket
pub const DEFAULT_QUOTA_BYTES: u64 = 5 * 1024 * 1024;

/// Storage key for a repository identifier
pub fn storage_key(repo_id: &str) -> String {
    let digest = Sha256::digest(repo_id.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    format!("tasks-{}", &hex[..16])
}

/// Task storage in a shared local key/value namespace
#[derive(Debug)]
pub struct LocalProvider {
    store_dir: PathBuf,
    quota_bytes: u64,
    key: RwLock<Option<String>>,
}

impl LocalProvider {
    /// Create a provider over `store_dir` with a per-entry size quota
    pub fn new(store_dir: impl Into<PathBuf>, quota_bytes: u64) -> Self {
        LocalProvider {
            store_dir: store_dir.into(),
            quota_bytes,
            key: RwLock::new(None),
        }
    }

    /// Path of this project's entry
    async fn entry_path(&self) -> ProviderResult<PathBuf> {
        let key = self.key.read().await;
        let key = key.as_ref().ok_or(ProviderError::NotInitialized)?;
        Ok(self.store_dir.join(format!("{}.json", key)))
    }

    async fn load(&self) -> ProviderResult<Vec<Task>> {
        let path = self.entry_path().await?;
        match fs::read_to_string(&path).await {
            Ok(content) if content.trim().is_empty() => Ok(Vec::new()),
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, tasks: &[Task]) -> ProviderResult<()> {
        let path = self.entry_path().await?;
        let data = serde_json::to_vec(tasks)?;
        let needed = data.len() as u64;

        if needed > self.quota_bytes {
            return Err(ProviderError::CapacityExceeded {
                needed,
                quota: self.quota_bytes,
            });
        }

        let tmp = path.with_extension("json.tmp");
        let write = async {
            fs::create_dir_all(&self.store_dir).await?;
            fs::write(&tmp, &data).await?;
            fs::rename(&tmp, &path).await
        };

        write.await.map_err(|e| {
            if is_capacity_error(&e) {
                ProviderError::CapacityExceeded {
                    needed,
                    quota: self.quota_bytes,
                }
            } else {
                ProviderError::Io(e)
            }
        })
    }
}

fn is_capacity_error(err: &std::io::Error) -> bool {
    matches!(err.kind(), ErrorKind::StorageFull | ErrorKind::FileTooLarge)
}

#[async_trait]
impl TaskProvider for LocalProvider {
    fn mode(&self) -> ProviderMode {
        ProviderMode::Local
    }

    async fn initialize(&self, repo_id: &str) -> ProviderResult<()> {
        let mut key = self.key.write().await;
        if let Some(existing) = key.as_ref() {
            if *existing != storage_key(repo_id) {
                log::warn!(
                    "Local store already initialized; ignoring repository '{}'",
                    repo_id
                );
            }
            return Ok(());
        }

        fs::create_dir_all(&self.store_dir).await?;
        let new_key = storage_key(repo_id);
        log::debug!("Local store key for '{}' is {}", repo_id, new_key);
        *key = Some(new_key);
        Ok(())
    }

    async fn is_initialized(&self) -> bool {
        self.key.read().await.is_some()
    }

    async fn get_all(&self) -> ProviderResult<Vec<Task>> {
        self.load().await
    }

    async fn create(&self, draft: TaskDraft) -> ProviderResult<Task> {
        let mut tasks = self.load().await?;
        let task = insert_draft(&mut tasks, draft)?;
        self.save(&tasks).await?;
        Ok(task)
    }

    async fn update(&self, id: &str, patch: TaskPatch) -> ProviderResult<Task> {
        let mut tasks = self.load().await?;
        let task = apply_patch(&mut tasks, id, patch)?;
        self.save(&tasks).await?;
        Ok(task)
    }

    async fn delete(&self, id: &str) -> ProviderResult<()> {
        let mut tasks = self.load().await?;
        remove_task(&mut tasks, id)?;
        self.save(&tasks).await
    }

    async fn replace_all(&self, tasks: Vec<Task>) -> ProviderResult<()> {
        self.save(&tasks).await
    }
}
