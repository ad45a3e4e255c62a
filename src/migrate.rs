//! Moving task collections between providers
//!
//! Every operation is best effort: per-item problems are counted or listed
//! in the [`MigrationResult`] and never abort the run. A failure to read a
//! source or write the target is also reported there, and the target is
//! left untouched when a source cannot be read.

use crate::config::ConfigStore;
use crate::models::{Task, parse_tasks};
use crate::storage::{IdGenerator, ProviderMode, TaskProvider};
use serde::Serialize;
use std::collections::{HashMap, HashSet};

/// One problem met during a migration
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationIssue {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    pub message: String,
}

impl MigrationIssue {
    fn general(message: impl Into<String>) -> Self {
        MigrationIssue {
            task_id: None,
            message: message.into(),
        }
    }

    fn for_task(task_id: &str, message: impl Into<String>) -> Self {
        MigrationIssue {
            task_id: Some(task_id.to_string()),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationResult {
    /// Tasks written to the target
    pub item_count: usize,
    pub duplicates_skipped: usize,
    /// Title collisions settled by last-writer-wins
    pub conflicts: usize,
    pub errors: Vec<MigrationIssue>,
}

impl MigrationResult {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    fn fail(mut self, issue: MigrationIssue) -> Self {
        log::warn!("{}", issue.message);
        self.errors.push(issue);
        self
    }
}

/// How imported tasks combine with the target's collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImportMode {
    /// Overwrite the target wholesale
    Replace,
    /// Add only titles the target does not have
    #[default]
    Merge,
}

impl std::str::FromStr for ImportMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "replace" => Ok(ImportMode::Replace),
            "merge" => Ok(ImportMode::Merge),
            _ => Err(format!("Unknown import mode: {} (expected replace or merge)", s)),
        }
    }
}

/// Identity used when combining collections: trimmed, case-folded title
///
/// Two distinct tasks that share a title are treated as one.
fn title_key(title: &str) -> String {
    title.trim().to_lowercase()
}

/// Copy every task from `source` to `dest` and switch the active mode
///
/// With `purge_source`, the source collection is emptied once the
/// destination holds the data and the new mode is saved.
pub async fn migrate(
    source: &dyn TaskProvider,
    dest: &dyn TaskProvider,
    config: &mut ConfigStore,
    target_mode: ProviderMode,
    purge_source: bool,
) -> MigrationResult {
    let mut result = MigrationResult::default();
    log::info!(
        "Migrating tasks from {} to {} storage",
        source.mode(),
        dest.mode()
    );

    let tasks = match source.get_all().await {
        Ok(tasks) => tasks,
        Err(e) => {
            return result.fail(MigrationIssue::general(format!(
                "Failed to read {} storage: {}",
                source.mode(),
                e
            )));
        }
    };

    let mut seen = HashSet::new();
    let mut valid = Vec::with_capacity(tasks.len());
    for task in tasks {
        if !IdGenerator::is_valid(&task.id) {
            result = result.fail(MigrationIssue::for_task(
                &task.id,
                format!("Skipping '{}': invalid id", task.title),
            ));
        } else if task.title.trim().is_empty() {
            result = result.fail(MigrationIssue::for_task(
                &task.id,
                "Skipping task without a title",
            ));
        } else if !seen.insert(task.id.clone()) {
            log::warn!("Skipping second task with id {}", task.id);
            result.duplicates_skipped += 1;
        } else {
            valid.push(task);
        }
    }

    let count = valid.len();
    if let Err(e) = dest.replace_all(valid).await {
        return result.fail(MigrationIssue::general(format!(
            "Failed to write {} storage: {}",
            dest.mode(),
            e
        )));
    }
    result.item_count = count;

    config.set_mode(target_mode);
    if let Err(e) = config.save() {
        return result.fail(MigrationIssue::general(format!(
            "Tasks were copied but the storage mode could not be saved: {}",
            e
        )));
    }

    if purge_source {
        if let Err(e) = source.replace_all(Vec::new()).await {
            result = result.fail(MigrationIssue::general(format!(
                "Failed to purge {} storage: {}",
                source.mode(),
                e
            )));
        } else {
            log::info!("Purged {} storage", source.mode());
        }
    }

    log::info!("Migrated {} tasks to {} storage", count, target_mode);
    result
}

/// Combine two collections into `target` by title
///
/// On a title collision the task with the later `updated_at` is kept and
/// the collision counts as a conflict. Ids that would clash between
/// different titles are regenerated.
pub async fn merge(
    first: &dyn TaskProvider,
    second: &dyn TaskProvider,
    target: &dyn TaskProvider,
) -> MigrationResult {
    let mut result = MigrationResult::default();

    let mut incoming = Vec::new();
    for provider in [first, second] {
        match provider.get_all().await {
            Ok(tasks) => incoming.extend(tasks),
            Err(e) => {
                return result.fail(MigrationIssue::general(format!(
                    "Failed to read {} storage: {}",
                    provider.mode(),
                    e
                )));
            }
        }
    }

    let mut merged: Vec<Task> = Vec::new();
    let mut by_title: HashMap<String, usize> = HashMap::new();
    for task in incoming {
        let key = title_key(&task.title);
        if key.is_empty() {
            result = result.fail(MigrationIssue::for_task(
                &task.id,
                "Skipping task without a title",
            ));
            continue;
        }

        match by_title.get(&key) {
            Some(&i) => {
                result.conflicts += 1;
                log::info!("Title collision on '{}'; keeping the newer task", task.title.trim());
                if task.updated_at > merged[i].updated_at {
                    merged[i] = task;
                }
            }
            None => {
                by_title.insert(key, merged.len());
                merged.push(task);
            }
        }
    }

    let mut ids = HashSet::new();
    for task in &mut merged {
        if !ids.insert(task.id.clone()) {
            let fresh = IdGenerator::generate_unique(&ids);
            log::debug!("Reassigning id {} to {}", task.id, fresh);
            task.id = fresh;
            ids.insert(task.id.clone());
        }
    }

    let count = merged.len();
    if let Err(e) = target.replace_all(merged).await {
        return result.fail(MigrationIssue::general(format!(
            "Failed to write {} storage: {}",
            target.mode(),
            e
        )));
    }
    result.item_count = count;
    log::info!(
        "Merged {} tasks with {} title conflicts",
        count,
        result.conflicts
    );
    result
}

/// Import tasks from canonical Markdown text into `target`
pub async fn import_markdown(
    target: &dyn TaskProvider,
    text: &str,
    mode: ImportMode,
) -> MigrationResult {
    let mut result = MigrationResult::default();
    let parsed = parse_tasks(text);

    let (tasks, added) = match mode {
        ImportMode::Replace => {
            let count = parsed.len();
            (parsed, count)
        }
        ImportMode::Merge => {
            let mut existing = match target.get_all().await {
                Ok(tasks) => tasks,
                Err(e) => {
                    return result.fail(MigrationIssue::general(format!(
                        "Failed to read {} storage: {}",
                        target.mode(),
                        e
                    )));
                }
            };

            let mut titles: HashSet<String> =
                existing.iter().map(|t| title_key(&t.title)).collect();
            let mut ids: HashSet<String> = existing.iter().map(|t| t.id.clone()).collect();
            let mut added = 0;

            for mut task in parsed {
                if !titles.insert(title_key(&task.title)) {
                    log::info!("Skipping duplicate task '{}'", task.title);
                    result.duplicates_skipped += 1;
                    continue;
                }
                if ids.contains(&task.id) {
                    task.id = IdGenerator::generate_unique(&ids);
                }
                ids.insert(task.id.clone());
                existing.push(task);
                added += 1;
            }
            (existing, added)
        }
    };

    if added == 0 && mode == ImportMode::Merge {
        log::info!("Nothing new to import");
        return result;
    }

    if let Err(e) = target.replace_all(tasks).await {
        return result.fail(MigrationIssue::general(format!(
            "Failed to write {} storage: {}",
            target.mode(),
            e
        )));
    }
    result.item_count = added;
    log::info!("Imported {} tasks", added);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Priority, TaskDraft, serialize_tasks};
    use crate::storage::{DEFAULT_QUOTA_BYTES, FileProvider, LocalProvider, ProjectLocation};
    use chrono::Duration;
    use tempfile::TempDir;

    struct Fixture {
        temp: TempDir,
        local: LocalProvider,
        file: FileProvider,
        config: ConfigStore,
    }

    async fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let location = ProjectLocation::at(temp.path());
        let config =
            ConfigStore::load(&temp.path().join("user.yaml"), &location.config_file()).unwrap();

        let local = LocalProvider::new(temp.path().join("store"), DEFAULT_QUOTA_BYTES);
        local.initialize("acme/widgets").await.unwrap();
        let file = FileProvider::new(location.default_tasks_file());
        file.initialize("acme/widgets").await.unwrap();

        Fixture {
            temp,
            local,
            file,
            config,
        }
    }

    #[tokio::test]
    async fn test_migrate_copies_and_switches_mode() {
        let mut fx = fixture().await;
        let created = fx
            .local
            .create(TaskDraft {
                priority: Some(Priority::High),
                ..TaskDraft::new("Fix login bug")
            })
            .await
            .unwrap();

        let result = migrate(&fx.local, &fx.file, &mut fx.config, ProviderMode::File, false).await;
        assert!(result.is_clean(), "{:?}", result.errors);
        assert_eq!(result.item_count, 1);
        assert_eq!(fx.config.mode(), ProviderMode::File);

        let moved = fx.file.get_by_id(&created.id).await.unwrap().unwrap();
        assert_eq!(moved.title, "Fix login bug");
        assert_eq!(moved.priority, Priority::High);
        assert_eq!(fx.local.get_all().await.unwrap().len(), 1);

        let reloaded = ConfigStore::load(
            &fx.temp.path().join("user.yaml"),
            &ProjectLocation::at(fx.temp.path()).config_file(),
        )
        .unwrap();
        assert_eq!(reloaded.mode(), ProviderMode::File);
    }

    #[tokio::test]
    async fn test_migrate_purges_source() {
        let mut fx = fixture().await;
        fx.file.create(TaskDraft::new("Move me")).await.unwrap();

        let result = migrate(&fx.file, &fx.local, &mut fx.config, ProviderMode::Local, true).await;
        assert_eq!(result.item_count, 1);
        assert!(fx.file.get_all().await.unwrap().is_empty());
        assert_eq!(fx.local.get_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_migrate_reports_unreadable_source() {
        let mut fx = fixture().await;
        let uninitialized = LocalProvider::new(fx.temp.path().join("other"), DEFAULT_QUOTA_BYTES);

        let result = migrate(
            &uninitialized,
            &fx.file,
            &mut fx.config,
            ProviderMode::File,
            true,
        )
        .await;
        assert_eq!(result.item_count, 0);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(fx.config.mode(), ProviderMode::Local);
    }

    #[tokio::test]
    async fn test_merge_by_title_keeps_newer() {
        let fx = fixture().await;
        let mut older = Task::new("t-a", "Fix Login Bug");
        older.updated_at = older.updated_at - Duration::hours(1);
        let mut newer = Task::new("t-b", "  fix login bug ");
        newer.notes = "newer".to_string();
        fx.local
            .replace_all(vec![older, Task::new("t-c", "Only local")])
            .await
            .unwrap();
        fx.file
            .replace_all(vec![newer, Task::new("t-c", "Only in file")])
            .await
            .unwrap();

        let temp = TempDir::new().unwrap();
        let target = LocalProvider::new(temp.path(), DEFAULT_QUOTA_BYTES);
        target.initialize("merged").await.unwrap();

        let result = merge(&fx.local, &fx.file, &target).await;
        assert_eq!(result.conflicts, 1);
        assert_eq!(result.item_count, 3);

        let all = target.get_all().await.unwrap();
        let login = all.iter().find(|t| title_key(&t.title) == "fix login bug").unwrap();
        assert_eq!(login.id, "t-b");
        assert_eq!(login.notes, "newer");

        let ids: HashSet<&str> = all.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids.len(), 3);
    }

    #[tokio::test]
    async fn test_import_merge_skips_duplicate_titles() {
        let fx = fixture().await;
        fx.local.create(TaskDraft::new("Fix login bug")).await.unwrap();

        let text = serialize_tasks(&[Task::new("t-other", "FIX LOGIN BUG")]);
        let result = import_markdown(&fx.local, &text, ImportMode::Merge).await;

        assert_eq!(result.duplicates_skipped, 1);
        assert_eq!(result.item_count, 0);
        assert_eq!(fx.local.get_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_import_merge_adds_new_and_avoids_id_clash() {
        let fx = fixture().await;
        let existing = fx.local.create(TaskDraft::new("Existing")).await.unwrap();

        let text = serialize_tasks(&[Task::new(existing.id.clone(), "Brand new")]);
        let result = import_markdown(&fx.local, &text, ImportMode::Merge).await;
        assert_eq!(result.item_count, 1);

        let all = fx.local.get_all().await.unwrap();
        assert_eq!(all.len(), 2);
        let added = all.iter().find(|t| t.title == "Brand new").unwrap();
        assert_ne!(added.id, existing.id);
    }

    #[tokio::test]
    async fn test_import_replace_overwrites() {
        let fx = fixture().await;
        fx.file.create(TaskDraft::new("Old")).await.unwrap();

        let text = "# Tasks\n\n## [review] Imported\n\n**ID:** t-imp\n";
        let result = import_markdown(&fx.file, text, ImportMode::Replace).await;
        assert_eq!(result.item_count, 1);

        let all = fx.file.get_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, "t-imp");
        assert_eq!(all[0].title, "Imported");
    }

    #[test]
    fn test_import_mode_parse() {
        assert_eq!("replace".parse::<ImportMode>().unwrap(), ImportMode::Replace);
        assert_eq!("MERGE".parse::<ImportMode>().unwrap(), ImportMode::Merge);
        assert!("append".parse::<ImportMode>().is_err());
    }
}
