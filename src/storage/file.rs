//! Markdown file backend

use crate::models::{Task, TaskDraft, TaskPatch, parse_tasks, serialize_tasks};
use crate::storage::provider::{
    ProviderError, ProviderMode, ProviderResult, TaskProvider, apply_patch, insert_draft,
    remove_task,
};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::RwLock;

/// Task storage in a single hand-editable Markdown file
#[derive(Debug)]
pub struct FileProvider {
    path: PathBuf,
    repo_id: RwLock<Option<String>>,
}

impl FileProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileProvider {
            path: path.into(),
            repo_id: RwLock::new(None),
        }
    }

    /// The backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn ensure_initialized(&self) -> ProviderResult<()> {
        if self.repo_id.read().await.is_some() {
            Ok(())
        } else {
            Err(ProviderError::NotInitialized)
        }
    }

    async fn read_document(&self) -> ProviderResult<Option<String>> {
        match fs::read_to_string(&self.path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn load(&self) -> ProviderResult<Vec<Task>> {
        self.ensure_initialized().await?;
        Ok(self
            .read_document()
            .await?
            .map(|content| parse_tasks(&content))
            .unwrap_or_default())
    }

    async fn save(&self, tasks: &[Task]) -> ProviderResult<()> {
        self.ensure_initialized().await?;
        write_atomic(&self.path, &serialize_tasks(tasks)).await
    }
}

async fn write_atomic(path: &Path, content: &str) -> ProviderResult<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("md.tmp");
    fs::write(&tmp, content).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

/// Whether parsing `content` twice yields the same ids
///
/// Sections without an ID line get a fresh id on every parse.
fn has_stable_ids(content: &str) -> bool {
    let first: Vec<String> = parse_tasks(content).into_iter().map(|t| t.id).collect();
    let second: Vec<String> = parse_tasks(content).into_iter().map(|t| t.id).collect();
    first == second
}

#[async_trait]
impl TaskProvider for FileProvider {
    fn mode(&self) -> ProviderMode {
        ProviderMode::File
    }

    async fn initialize(&self, repo_id: &str) -> ProviderResult<()> {
        let mut bound = self.repo_id.write().await;
        if bound.is_some() {
            return Ok(());
        }

        match self.read_document().await? {
            None => {
                log::info!("Creating task file {}", self.path.display());
                write_atomic(&self.path, &serialize_tasks(&[])).await?;
            }
            Some(content) if !has_stable_ids(&content) => {
                log::info!(
                    "Assigning ids to tasks without an ID line in {}",
                    self.path.display()
                );
                write_atomic(&self.path, &serialize_tasks(&parse_tasks(&content))).await?;
            }
            Some(_) => {}
        }

        *bound = Some(repo_id.to_string());
        Ok(())
    }

    async fn is_initialized(&self) -> bool {
        self.repo_id.read().await.is_some()
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

    async fn export_to_markdown(&self) -> ProviderResult<String> {
        Ok(serialize_tasks(&self.load().await?))
    }
}
