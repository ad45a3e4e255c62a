//! Local/remote reconciliation
//!
//! A pass matches every local task with a managed issue, decides a
//! direction from the timestamps and the last sync stamp, and applies it.
//! Failures on one item are recorded in the [`SyncResult`] and the pass moves
//! on; only failing to read either side aborts it.

use crate::models::{SyncStatus, Task, TaskDraft, TaskPatch};
use crate::storage::{ProviderError, TaskProvider};
use crate::sync::github::{IssueTracker, LabelDraft, RemoteError};
use crate::sync::issue::{
    IssueState, MANAGED_LABEL, MANAGED_LABEL_COLOR, RemoteIssue, decode_issue, encode_task,
    is_derived_label, link_patch, pull_patch,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::fmt;
use thiserror::Error;

/// Errors that stop a sync pass before any item is processed
#[derive(Debug, Error)]
pub enum SyncPassError {
    #[error("Failed to list remote issues: {0}")]
    ListIssues(#[source] RemoteError),
    #[error("Failed to read local tasks: {0}")]
    LoadTasks(#[source] ProviderError),
}

/// Step of a sync pass that failed for one item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncOperation {
    EnsureLabel,
    Fetch,
    Create,
    Update,
    Close,
    Labels,
    Link,
    Pull,
    MarkConflict,
    Delete,
}

impl fmt::Display for SyncOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncOperation::EnsureLabel => "ensure-label",
            SyncOperation::Fetch => "fetch",
            SyncOperation::Create => "create",
            SyncOperation::Update => "update",
            SyncOperation::Close => "close",
            SyncOperation::Labels => "labels",
            SyncOperation::Link => "link",
            SyncOperation::Pull => "pull",
            SyncOperation::MarkConflict => "mark-conflict",
            SyncOperation::Delete => "delete",
        };
        f.write_str(name)
    }
}

/// One failed item of a pass
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncError {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issue_number: Option<u64>,
    pub operation: SyncOperation,
    pub message: String,
    pub retryable: bool,
}

fn remote_failure(
    operation: SyncOperation,
    task_id: Option<&str>,
    issue_number: Option<u64>,
) -> impl FnOnce(RemoteError) -> SyncError + use<> {
    let task_id = task_id.map(str::to_string);
    move |err| SyncError {
        task_id,
        issue_number,
        operation,
        retryable: err.retryable(),
        message: err.to_string(),
    }
}

fn local_failure(
    operation: SyncOperation,
    task_id: Option<&str>,
    issue_number: Option<u64>,
) -> impl FnOnce(ProviderError) -> SyncError + use<> {
    let task_id = task_id.map(str::to_string);
    move |err| SyncError {
        task_id,
        issue_number,
        operation,
        retryable: matches!(err, ProviderError::Io(_)),
        message: err.to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictType {
    /// Both sides changed since the last sync
    BothModified,
    /// The linked issue no longer exists
    DeletedRemote,
    /// A managed issue points at a task that no longer exists locally
    DeletedLocal,
}

impl fmt::Display for ConflictType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictType::BothModified => write!(f, "both-modified"),
            ConflictType::DeletedRemote => write!(f, "deleted-remote"),
            ConflictType::DeletedLocal => write!(f, "deleted-local"),
        }
    }
}

/// A task the engine refused to reconcile on its own
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    pub task_id: String,
    pub issue_number: u64,
    pub local_version: Option<Task>,
    pub remote_version: Option<Task>,
    pub conflict_type: ConflictType,
    pub detected_at: DateTime<Utc>,
}

/// Which side wins a conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    KeepLocal,
    KeepRemote,
}

impl std::str::FromStr for Resolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "local" | "keep-local" | "ours" => Ok(Resolution::KeepLocal),
            "remote" | "keep-remote" | "theirs" => Ok(Resolution::KeepRemote),
            _ => Err(format!("Unknown resolution: {} (expected local or remote)", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PushedItem {
    pub task_id: String,
    pub issue_number: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PulledItem {
    pub issue_number: u64,
    pub task_id: String,
}

/// Outcome of a sync pass or a conflict resolution
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResult {
    pub pushed: Vec<PushedItem>,
    pub pulled: Vec<PulledItem>,
    pub conflicts: Vec<Conflict>,
    pub errors: Vec<SyncError>,
}

impl SyncResult {
    /// True when the pass changed nothing and reported nothing
    pub fn is_empty(&self) -> bool {
        self.pushed.is_empty()
            && self.pulled.is_empty()
            && self.conflicts.is_empty()
            && self.errors.is_empty()
    }

    fn record(&mut self, err: SyncError) {
        log::warn!(
            "Sync {} failed{}{}: {}",
            err.operation,
            err.task_id
                .as_deref()
                .map(|id| format!(" for task {}", id))
                .unwrap_or_default(),
            err.issue_number
                .map(|n| format!(" (issue #{})", n))
                .unwrap_or_default(),
            err.message
        );
        self.errors.push(err);
    }

    fn pushed(&mut self, task_id: &str, issue_number: u64) {
        log::info!("Pushed task {} to issue #{}", task_id, issue_number);
        self.pushed.push(PushedItem {
            task_id: task_id.to_string(),
            issue_number,
        });
    }

    fn pulled(&mut self, issue_number: u64, task_id: &str) {
        log::info!("Pulled issue #{} into task {}", issue_number, task_id);
        self.pulled.push(PulledItem {
            issue_number,
            task_id: task_id.to_string(),
        });
    }

    fn conflict(&mut self, conflict: Conflict) {
        log::info!(
            "Conflict ({}) between task {} and issue #{}",
            conflict.conflict_type,
            conflict.task_id,
            conflict.issue_number
        );
        self.conflicts.push(conflict);
    }
}

/// Pairing of local tasks with listed issues
///
/// Id markers are matched for every task before falling back to stored
/// issue numbers, so a stale number never steals an issue that another
/// task's marker names.
struct IssueMatches {
    issues: Vec<RemoteIssue>,
    by_task: HashMap<String, usize>,
}

impl IssueMatches {
    fn new(tasks: &[Task], issues: Vec<RemoteIssue>) -> Self {
        let mut claimed = HashSet::new();
        let mut by_task = HashMap::new();

        let by_marker: HashMap<String, usize> = issues
            .iter()
            .enumerate()
            .filter_map(|(i, issue)| issue.task_id().map(|id| (id, i)))
            .collect();
        for task in tasks {
            if let Some(&i) = by_marker.get(&task.id)
                && claimed.insert(i)
            {
                by_task.insert(task.id.clone(), i);
            }
        }

        let by_number: HashMap<u64, usize> = issues
            .iter()
            .enumerate()
            .map(|(i, issue)| (issue.number, i))
            .collect();
        for task in tasks {
            if by_task.contains_key(&task.id) {
                continue;
            }
            if let Some(number) = task.github_issue_number
                && let Some(&i) = by_number.get(&number)
                && claimed.insert(i)
            {
                by_task.insert(task.id.clone(), i);
            }
        }

        IssueMatches { issues, by_task }
    }

    fn for_task(&self, id: &str) -> Option<&RemoteIssue> {
        self.by_task.get(id).map(|&i| &self.issues[i])
    }

    fn unclaimed(&self) -> impl Iterator<Item = &RemoteIssue> {
        let claimed: HashSet<usize> = self.by_task.values().copied().collect();
        self.issues
            .iter()
            .enumerate()
            .filter(move |(i, _)| !claimed.contains(i))
            .map(|(_, issue)| issue)
    }
}

/// Reconciles a task provider with a remote issue tracker
pub struct SyncEngine<T: IssueTracker> {
    tracker: T,
}

impl<T: IssueTracker> SyncEngine<T> {
    pub fn new(tracker: T) -> Self {
        SyncEngine { tracker }
    }

    pub fn tracker(&self) -> &T {
        &self.tracker
    }

    /// Run one sync pass over every task in `provider`
    pub async fn sync(&self, provider: &dyn TaskProvider) -> Result<SyncResult, SyncPassError> {
        let mut result = SyncResult::default();
        self.ensure_label(&mut result).await;

        let issues = self
            .tracker
            .list_issues(MANAGED_LABEL)
            .await
            .map_err(SyncPassError::ListIssues)?;
        let tasks = provider.get_all().await.map_err(SyncPassError::LoadTasks)?;
        log::debug!(
            "Syncing {} local tasks against {} managed issues",
            tasks.len(),
            issues.len()
        );

        let matches = IssueMatches::new(&tasks, issues);
        for task in &tasks {
            self.sync_task(provider, task, matches.for_task(&task.id), &mut result)
                .await;
        }

        let local_ids: HashSet<&str> = tasks.iter().map(|t| t.id.as_str()).collect();
        for issue in matches.unclaimed() {
            self.sync_unclaimed(provider, issue, &local_ids, &mut result)
                .await;
        }

        log::info!(
            "Sync finished: {} pushed, {} pulled, {} conflicts, {} errors",
            result.pushed.len(),
            result.pulled.len(),
            result.conflicts.len(),
            result.errors.len()
        );
        Ok(result)
    }

    /// Apply the chosen side of a conflict reported by [`SyncEngine::sync`]
    pub async fn resolve(
        &self,
        provider: &dyn TaskProvider,
        conflict: &Conflict,
        resolution: Resolution,
    ) -> SyncResult {
        let mut result = SyncResult::default();
        let number = conflict.issue_number;
        let task_id = conflict.task_id.as_str();
        log::info!(
            "Resolving {} conflict on task {} with {:?}",
            conflict.conflict_type,
            task_id,
            resolution
        );

        let outcome = match (conflict.conflict_type, resolution) {
            (ConflictType::BothModified, Resolution::KeepLocal) => {
                match self.load_task(provider, task_id, number).await {
                    Ok(task) => self
                        .push_existing(provider, &task, number)
                        .await
                        .map(|_| result.pushed(task_id, number)),
                    Err(e) => Err(e),
                }
            }
            (ConflictType::BothModified, Resolution::KeepRemote) => {
                match self.fetch(Some(task_id), number).await {
                    Ok(issue) => provider
                        .update(task_id, pull_patch(&issue))
                        .await
                        .map(|_| result.pulled(number, task_id))
                        .map_err(local_failure(SyncOperation::Pull, Some(task_id), Some(number))),
                    Err(e) => Err(e),
                }
            }
            (ConflictType::DeletedRemote, Resolution::KeepLocal) => {
                match self.load_task(provider, task_id, number).await {
                    Ok(task) => self
                        .push_new(provider, &task)
                        .await
                        .map(|issue| result.pushed(task_id, issue.number)),
                    Err(e) => Err(e),
                }
            }
            (ConflictType::DeletedRemote, Resolution::KeepRemote) => provider
                .delete(task_id)
                .await
                .map(|_| log::info!("Deleted task {} whose issue is gone", task_id))
                .map_err(local_failure(SyncOperation::Delete, Some(task_id), Some(number))),
            (ConflictType::DeletedLocal, Resolution::KeepLocal) => self
                .tracker
                .close_issue(number)
                .await
                .map(|_| log::info!("Closed issue #{} whose task was deleted", number))
                .map_err(remote_failure(SyncOperation::Close, Some(task_id), Some(number))),
            (ConflictType::DeletedLocal, Resolution::KeepRemote) => {
                match self.fetch(Some(task_id), number).await {
                    Ok(issue) => self
                        .pull_new(provider, &issue)
                        .await
                        .map(|task| result.pulled(number, &task.id)),
                    Err(e) => Err(e),
                }
            }
        };

        if let Err(err) = outcome {
            result.record(err);
        }
        result
    }

    async fn ensure_label(&self, result: &mut SyncResult) {
        let failure = || remote_failure(SyncOperation::EnsureLabel, None, None);
        match self.tracker.get_label(MANAGED_LABEL).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                log::info!("Creating label '{}'", MANAGED_LABEL);
                let label = LabelDraft {
                    name: MANAGED_LABEL.to_string(),
                    color: MANAGED_LABEL_COLOR.to_string(),
                    description: "Managed by taskdeck".to_string(),
                };
                if let Err(e) = self.tracker.create_label(&label).await {
                    result.record(failure()(e));
                }
            }
            Err(e) => result.record(failure()(e)),
        }
    }

    async fn sync_task(
        &self,
        provider: &dyn TaskProvider,
        task: &Task,
        listed: Option<&RemoteIssue>,
        result: &mut SyncResult,
    ) {
        if let (SyncStatus::Conflict | SyncStatus::DeletedRemote, Some(number)) =
            (task.sync_status, task.github_issue_number)
        {
            let conflict_type = if task.sync_status == SyncStatus::DeletedRemote {
                ConflictType::DeletedRemote
            } else {
                ConflictType::BothModified
            };
            result.conflict(Conflict {
                task_id: task.id.clone(),
                issue_number: listed.map(|i| i.number).unwrap_or(number),
                local_version: Some(task.clone()),
                remote_version: listed.map(decode_issue),
                conflict_type,
                detected_at: Utc::now(),
            });
            return;
        }

        let issue = match (listed, task.github_issue_number) {
            (Some(issue), _) => issue.clone(),
            (None, None) => {
                match self.push_new(provider, task).await {
                    Ok(issue) => result.pushed(&task.id, issue.number),
                    Err(e) => result.record(e),
                }
                return;
            }
            (None, Some(number)) => match self.tracker.get_issue(number).await {
                Ok(issue) => {
                    if !issue.is_managed() {
                        log::debug!(
                            "Issue #{} lost the '{}' label; the next push restores it",
                            number,
                            MANAGED_LABEL
                        );
                    }
                    issue
                }
                Err(e) if e.is_not_found() => {
                    self.mark_deleted_remote(provider, task, number, result)
                        .await;
                    return;
                }
                Err(e) => {
                    result.record(remote_failure(
                        SyncOperation::Fetch,
                        Some(&task.id),
                        Some(number),
                    )(e));
                    return;
                }
            },
        };

        if let Err(e) = self.reconcile(provider, task, &issue, result).await {
            result.record(e);
        }
    }

    /// Decide and apply the direction for a task matched with `issue`
    ///
    /// A task edited on both sides since its last sync is a `both-modified`
    /// conflict even when the timestamps would order the edits; timestamps
    /// only pick a side when at most one side changed, or when the task has
    /// never been synced.
    async fn reconcile(
        &self,
        provider: &dyn TaskProvider,
        task: &Task,
        issue: &RemoteIssue,
        result: &mut SyncResult,
    ) -> Result<(), SyncError> {
        let local_dirty = task.modified_since_sync();
        let remote_dirty = task
            .last_synced_at
            .is_none_or(|synced| issue.updated_at > synced);

        match (local_dirty, remote_dirty) {
            (false, false) => {
                log::debug!("Task {} is up to date with #{}", task.id, issue.number);
                Ok(())
            }
            (true, true) if task.last_synced_at.is_some() => {
                let local = provider
                    .update(
                        &task.id,
                        TaskPatch {
                            sync_status: Some(SyncStatus::Conflict),
                            ..Default::default()
                        },
                    )
                    .await
                    .map_err(local_failure(
                        SyncOperation::MarkConflict,
                        Some(&task.id),
                        Some(issue.number),
                    ))?;
                result.conflict(Conflict {
                    task_id: task.id.clone(),
                    issue_number: issue.number,
                    local_version: Some(local),
                    remote_version: Some(decode_issue(issue)),
                    conflict_type: ConflictType::BothModified,
                    detected_at: Utc::now(),
                });
                Ok(())
            }
            _ => match task.updated_at.cmp(&issue.updated_at) {
                Ordering::Greater => {
                    self.push_existing(provider, task, issue.number).await?;
                    result.pushed(&task.id, issue.number);
                    Ok(())
                }
                Ordering::Less => {
                    provider
                        .update(&task.id, pull_patch(issue))
                        .await
                        .map_err(local_failure(
                            SyncOperation::Pull,
                            Some(&task.id),
                            Some(issue.number),
                        ))?;
                    result.pulled(issue.number, &task.id);
                    Ok(())
                }
                Ordering::Equal => Ok(()),
            },
        }
    }

    async fn sync_unclaimed(
        &self,
        provider: &dyn TaskProvider,
        issue: &RemoteIssue,
        local_ids: &HashSet<&str>,
        result: &mut SyncResult,
    ) {
        match issue.task_id() {
            Some(id) if local_ids.contains(id.as_str()) => {
                log::warn!(
                    "Issue #{} duplicates the issue of task {}; skipping",
                    issue.number,
                    id
                );
            }
            Some(id) if issue.state == IssueState::Open => {
                result.conflict(Conflict {
                    task_id: id,
                    issue_number: issue.number,
                    local_version: None,
                    remote_version: Some(decode_issue(issue)),
                    conflict_type: ConflictType::DeletedLocal,
                    detected_at: Utc::now(),
                });
            }
            Some(id) => {
                log::debug!(
                    "Ignoring closed issue #{} of deleted task {}",
                    issue.number,
                    id
                );
            }
            None if issue.state == IssueState::Open => {
                match self.pull_new(provider, issue).await {
                    Ok(task) => result.pulled(issue.number, &task.id),
                    Err(e) => result.record(e),
                }
            }
            None => {}
        }
    }

    async fn mark_deleted_remote(
        &self,
        provider: &dyn TaskProvider,
        task: &Task,
        number: u64,
        result: &mut SyncResult,
    ) {
        let patch = TaskPatch {
            sync_status: Some(SyncStatus::DeletedRemote),
            ..Default::default()
        };
        let local = match provider.update(&task.id, patch).await {
            Ok(updated) => updated,
            Err(e) => {
                result.record(local_failure(
                    SyncOperation::MarkConflict,
                    Some(&task.id),
                    Some(number),
                )(e));
                task.clone()
            }
        };
        result.conflict(Conflict {
            task_id: task.id.clone(),
            issue_number: number,
            local_version: Some(local),
            remote_version: None,
            conflict_type: ConflictType::DeletedRemote,
            detected_at: Utc::now(),
        });
    }

    async fn load_task(
        &self,
        provider: &dyn TaskProvider,
        task_id: &str,
        number: u64,
    ) -> Result<Task, SyncError> {
        provider
            .get_by_id(task_id)
            .await
            .and_then(|task| task.ok_or_else(|| ProviderError::NotFound(task_id.to_string())))
            .map_err(local_failure(SyncOperation::Fetch, Some(task_id), Some(number)))
    }

    async fn fetch(&self, task_id: Option<&str>, number: u64) -> Result<RemoteIssue, SyncError> {
        self.tracker
            .get_issue(number)
            .await
            .map_err(remote_failure(SyncOperation::Fetch, task_id, Some(number)))
    }

    /// Create an issue for `task` and link the task to it
    async fn push_new(
        &self,
        provider: &dyn TaskProvider,
        task: &Task,
    ) -> Result<RemoteIssue, SyncError> {
        let draft = encode_task(task);
        let mut issue = self
            .tracker
            .create_issue(&draft)
            .await
            .map_err(remote_failure(SyncOperation::Create, Some(&task.id), None))?;

        let mut close_error = None;
        if draft.state == IssueState::Closed {
            match self.tracker.close_issue(issue.number).await {
                Ok(closed) => issue = closed,
                Err(e) => {
                    close_error = Some(remote_failure(
                        SyncOperation::Close,
                        Some(&task.id),
                        Some(issue.number),
                    )(e))
                }
            }
        }

        provider
            .update(&task.id, link_patch(&issue))
            .await
            .map_err(local_failure(
                SyncOperation::Link,
                Some(&task.id),
                Some(issue.number),
            ))?;

        match close_error {
            Some(e) => Err(e),
            None => Ok(issue),
        }
    }

    /// Overwrite issue `number` with `task` and restamp the task
    async fn push_existing(
        &self,
        provider: &dyn TaskProvider,
        task: &Task,
        number: u64,
    ) -> Result<RemoteIssue, SyncError> {
        let draft = encode_task(task);
        let issue = self
            .tracker
            .update_issue(number, &draft)
            .await
            .map_err(remote_failure(SyncOperation::Update, Some(&task.id), Some(number)))?;

        self.reconcile_labels(&issue, &draft.labels)
            .await
            .map_err(remote_failure(SyncOperation::Labels, Some(&task.id), Some(number)))?;

        provider
            .update(&task.id, link_patch(&issue))
            .await
            .map_err(local_failure(SyncOperation::Link, Some(&task.id), Some(number)))?;
        Ok(issue)
    }

    /// Create a local task from `issue` and link it
    async fn pull_new(
        &self,
        provider: &dyn TaskProvider,
        issue: &RemoteIssue,
    ) -> Result<Task, SyncError> {
        let remote = decode_issue(issue);
        let created = provider
            .create(TaskDraft::from(&remote))
            .await
            .map_err(local_failure(SyncOperation::Pull, None, Some(issue.number)))?;
        provider
            .update(&created.id, link_patch(issue))
            .await
            .map_err(local_failure(
                SyncOperation::Link,
                Some(&created.id),
                Some(issue.number),
            ))
    }

    /// Add missing derived labels and drop stale ones; user labels stay
    async fn reconcile_labels(
        &self,
        issue: &RemoteIssue,
        desired: &[String],
    ) -> Result<(), RemoteError> {
        let current: Vec<&str> = issue.label_names().collect();

        let missing: Vec<String> = desired
            .iter()
            .filter(|label| !current.contains(&label.as_str()))
            .cloned()
            .collect();
        if !missing.is_empty() {
            self.tracker.add_labels(issue.number, &missing).await?;
        }

        for stale in current
            .iter()
            .filter(|label| is_derived_label(label) && !desired.iter().any(|d| d == *label))
        {
            self.tracker.remove_label(issue.number, stale).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Priority, TaskStatus};
    use crate::storage::{DEFAULT_QUOTA_BYTES, LocalProvider};
    use crate::sync::github::RemoteResult;
    use crate::sync::issue::tests::issue_from_draft;
    use crate::sync::issue::{IssueDraft, RemoteLabel};
    use async_trait::async_trait;
    use chrono::Duration;
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct FakeState {
        issues: BTreeMap<u64, RemoteIssue>,
        labels: Vec<String>,
        next_number: u64,
        fail_list: bool,
        fail_create_title: Option<String>,
    }

    /// In-memory issue tracker
    #[derive(Default)]
    struct FakeTracker {
        state: Mutex<FakeState>,
    }

    fn http(status: u16) -> RemoteError {
        RemoteError::Http {
            status,
            message: format!("status {}", status),
            rate_limited: false,
        }
    }

    fn label(name: &str) -> RemoteLabel {
        RemoteLabel {
            name: name.to_string(),
            color: None,
            description: None,
        }
    }

    impl FakeTracker {
        fn issue(&self, number: u64) -> Option<RemoteIssue> {
            self.state.lock().unwrap().issues.get(&number).cloned()
        }

        fn with_issue(&self, number: u64, f: impl FnOnce(&mut RemoteIssue)) {
            let mut state = self.state.lock().unwrap();
            f(state.issues.get_mut(&number).unwrap());
        }

        fn insert(&self, issue: RemoteIssue) {
            let mut state = self.state.lock().unwrap();
            state.next_number = state.next_number.max(issue.number);
            state.issues.insert(issue.number, issue);
        }

        fn remove(&self, number: u64) {
            self.state.lock().unwrap().issues.remove(&number);
        }

        fn issue_count(&self) -> usize {
            self.state.lock().unwrap().issues.len()
        }

        fn modify<R>(&self, number: u64, f: impl FnOnce(&mut RemoteIssue) -> R) -> RemoteResult<R> {
            let mut state = self.state.lock().unwrap();
            let issue = state.issues.get_mut(&number).ok_or_else(|| http(404))?;
            let out = f(issue);
            issue.updated_at = Utc::now();
            Ok(out)
        }
    }

    #[async_trait]
    impl IssueTracker for FakeTracker {
        async fn list_issues(&self, label: &str) -> RemoteResult<Vec<RemoteIssue>> {
            let state = self.state.lock().unwrap();
            if state.fail_list {
                return Err(RemoteError::Transport("connection reset".to_string()));
            }
            Ok(state
                .issues
                .values()
                .filter(|i| i.label_names().any(|l| l == label))
                .cloned()
                .collect())
        }

        async fn get_issue(&self, number: u64) -> RemoteResult<RemoteIssue> {
            self.issue(number).ok_or_else(|| http(404))
        }

        async fn create_issue(&self, draft: &IssueDraft) -> RemoteResult<RemoteIssue> {
            let mut state = self.state.lock().unwrap();
            if state.fail_create_title.as_deref() == Some(draft.title.as_str()) {
                return Err(http(502));
            }
            state.next_number += 1;
            let mut issue = issue_from_draft(state.next_number, draft);
            issue.state = IssueState::Open;
            state.issues.insert(issue.number, issue.clone());
            Ok(issue)
        }

        async fn update_issue(&self, number: u64, draft: &IssueDraft) -> RemoteResult<RemoteIssue> {
            self.modify(number, |issue| {
                issue.title = draft.title.clone();
                issue.body = Some(draft.body.clone());
                issue.state = draft.state;
            })?;
            self.get_issue(number).await
        }

        async fn close_issue(&self, number: u64) -> RemoteResult<RemoteIssue> {
            self.modify(number, |issue| issue.state = IssueState::Closed)?;
            self.get_issue(number).await
        }

        async fn assign_issue(&self, number: u64, _assignees: &[String]) -> RemoteResult<()> {
            self.modify(number, |_| ())
        }

        async fn add_labels(&self, number: u64, labels: &[String]) -> RemoteResult<()> {
            self.modify(number, |issue| {
                for name in labels {
                    if !issue.labels.iter().any(|l| &l.name == name) {
                        issue.labels.push(label(name));
                    }
                }
            })
        }

        async fn remove_label(&self, number: u64, name: &str) -> RemoteResult<()> {
            self.modify(number, |issue| issue.labels.retain(|l| l.name != name))
        }

        async fn get_label(&self, name: &str) -> RemoteResult<Option<RemoteLabel>> {
            let state = self.state.lock().unwrap();
            Ok(state.labels.iter().find(|l| *l == name).map(|l| label(l)))
        }

        async fn create_label(&self, draft: &LabelDraft) -> RemoteResult<RemoteLabel> {
            self.state.lock().unwrap().labels.push(draft.name.clone());
            Ok(label(&draft.name))
        }
    }

    async fn setup(temp: &TempDir) -> (LocalProvider, SyncEngine<FakeTracker>) {
        let provider = LocalProvider::new(temp.path(), DEFAULT_QUOTA_BYTES);
        provider.initialize("acme/widgets").await.unwrap();
        (provider, SyncEngine::new(FakeTracker::default()))
    }

    async fn linked_task(
        provider: &LocalProvider,
        engine: &SyncEngine<FakeTracker>,
        title: &str,
    ) -> Task {
        let task = provider.create(TaskDraft::new(title)).await.unwrap();
        engine.sync(provider).await.unwrap();
        provider.get_by_id(&task.id).await.unwrap().unwrap()
    }

    fn remote_edit(engine: &SyncEngine<FakeTracker>, number: u64, title: &str) {
        engine.tracker().with_issue(number, |issue| {
            issue.title = title.to_string();
            issue.updated_at = Utc::now() + Duration::hours(1);
        });
    }

    #[tokio::test]
    async fn test_new_task_is_pushed_and_linked() {
        let temp = TempDir::new().unwrap();
        let (provider, engine) = setup(&temp).await;
        let task = provider
            .create(TaskDraft {
                priority: Some(Priority::High),
                ..TaskDraft::new("Fix login bug")
            })
            .await
            .unwrap();

        let result = engine.sync(&provider).await.unwrap();
        assert_eq!(
            result.pushed,
            vec![PushedItem {
                task_id: task.id.clone(),
                issue_number: 1
            }]
        );
        assert!(result.errors.is_empty());

        let local = provider.get_by_id(&task.id).await.unwrap().unwrap();
        assert_eq!(local.github_issue_number, Some(1));
        assert_eq!(local.sync_status, SyncStatus::Synced);
        assert!(!local.modified_since_sync());

        let issue = engine.tracker().issue(1).unwrap();
        assert_eq!(issue.task_id(), Some(task.id));
        assert!(issue.label_names().any(|l| l == "priority:high"));
        assert!(
            engine
                .tracker()
                .state
                .lock()
                .unwrap()
                .labels
                .contains(&MANAGED_LABEL.to_string())
        );
    }

    #[tokio::test]
    async fn test_ready_to_ship_task_is_created_closed() {
        let temp = TempDir::new().unwrap();
        let (provider, engine) = setup(&temp).await;
        provider
            .create(TaskDraft {
                status: Some(TaskStatus::ReadyToShip),
                ..TaskDraft::new("Shipped")
            })
            .await
            .unwrap();

        engine.sync(&provider).await.unwrap();
        assert_eq!(engine.tracker().issue(1).unwrap().state, IssueState::Closed);
    }

    #[tokio::test]
    async fn test_second_pass_is_a_no_op() {
        let temp = TempDir::new().unwrap();
        let (provider, engine) = setup(&temp).await;
        linked_task(&provider, &engine, "Stable").await;

        let result = engine.sync(&provider).await.unwrap();
        assert!(result.is_empty(), "{:?}", result);
        assert_eq!(engine.tracker().issue_count(), 1);
    }

    #[tokio::test]
    async fn test_remote_newer_is_pulled() {
        let temp = TempDir::new().unwrap();
        let (provider, engine) = setup(&temp).await;
        let task = linked_task(&provider, &engine, "Old title").await;
        remote_edit(&engine, 1, "New title");

        let result = engine.sync(&provider).await.unwrap();
        assert!(result.pushed.is_empty());
        assert_eq!(result.pulled.len(), 1);

        let local = provider.get_by_id(&task.id).await.unwrap().unwrap();
        assert_eq!(local.title, "New title");
        assert_eq!(local.sync_status, SyncStatus::Synced);
        assert!(engine.sync(&provider).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_older_unsynced_task_pulls_from_marked_issue() {
        let temp = TempDir::new().unwrap();
        let (provider, engine) = setup(&temp).await;
        let task = provider.create(TaskDraft::new("Local copy")).await.unwrap();

        let mut remote = task.clone();
        remote.title = "Remote copy".to_string();
        let mut issue = issue_from_draft(7, &encode_task(&remote));
        issue.updated_at = task.updated_at + Duration::minutes(10);
        engine.tracker().insert(issue);

        let result = engine.sync(&provider).await.unwrap();
        assert!(result.pushed.is_empty());
        assert_eq!(
            result.pulled,
            vec![PulledItem {
                issue_number: 7,
                task_id: task.id.clone()
            }]
        );

        let local = provider.get_by_id(&task.id).await.unwrap().unwrap();
        assert_eq!(local.title, "Remote copy");
        assert_eq!(local.github_issue_number, Some(7));
    }

    #[tokio::test]
    async fn test_local_edit_is_pushed_with_labels() {
        let temp = TempDir::new().unwrap();
        let (provider, engine) = setup(&temp).await;
        let task = linked_task(&provider, &engine, "Label me").await;
        engine
            .tracker()
            .add_labels(1, &["good first issue".to_string()])
            .await
            .unwrap();
        engine.tracker().with_issue(1, |issue| {
            issue.updated_at = task.last_synced_at.unwrap();
        });

        provider
            .update(
                &task.id,
                TaskPatch {
                    priority: Some(Priority::Critical),
                    status: Some(TaskStatus::Review),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let result = engine.sync(&provider).await.unwrap();
        assert_eq!(result.pushed.len(), 1);
        assert!(result.pulled.is_empty());

        let issue = engine.tracker().issue(1).unwrap();
        let labels: Vec<&str> = issue.label_names().collect();
        assert!(labels.contains(&"priority:critical"));
        assert!(labels.contains(&"status:review"));
        assert!(labels.contains(&"good first issue"));
        assert!(!labels.contains(&"priority:medium"));
    }

    #[tokio::test]
    async fn test_both_modified_is_reported_until_resolved() {
        let temp = TempDir::new().unwrap();
        let (provider, engine) = setup(&temp).await;
        let task = linked_task(&provider, &engine, "Shared").await;

        provider
            .update(
                &task.id,
                TaskPatch {
                    title: Some("Local edit".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        remote_edit(&engine, 1, "Remote edit");

        let result = engine.sync(&provider).await.unwrap();
        assert_eq!(result.conflicts.len(), 1);
        assert_eq!(result.conflicts[0].conflict_type, ConflictType::BothModified);
        assert!(result.pushed.is_empty() && result.pulled.is_empty());
        let local = provider.get_by_id(&task.id).await.unwrap().unwrap();
        assert_eq!(local.sync_status, SyncStatus::Conflict);

        let again = engine.sync(&provider).await.unwrap();
        assert_eq!(again.conflicts.len(), 1);
        assert_eq!(engine.tracker().issue(1).unwrap().title, "Remote edit");

        let resolved = engine
            .resolve(&provider, &again.conflicts[0], Resolution::KeepRemote)
            .await;
        assert_eq!(resolved.pulled.len(), 1);
        let local = provider.get_by_id(&task.id).await.unwrap().unwrap();
        assert_eq!(local.title, "Remote edit");
        assert_eq!(local.sync_status, SyncStatus::Synced);
        assert!(engine.sync(&provider).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_keep_local_overwrites_remote() {
        let temp = TempDir::new().unwrap();
        let (provider, engine) = setup(&temp).await;
        let task = linked_task(&provider, &engine, "Shared").await;

        provider
            .update(
                &task.id,
                TaskPatch {
                    title: Some("Local edit".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        remote_edit(&engine, 1, "Remote edit");

        let result = engine.sync(&provider).await.unwrap();
        let resolved = engine
            .resolve(&provider, &result.conflicts[0], Resolution::KeepLocal)
            .await;
        assert_eq!(resolved.pushed.len(), 1);
        assert!(resolved.errors.is_empty());
        assert_eq!(engine.tracker().issue(1).unwrap().title, "Local edit");

        let local = provider.get_by_id(&task.id).await.unwrap().unwrap();
        assert_eq!(local.sync_status, SyncStatus::Synced);
    }

    #[tokio::test]
    async fn test_deleted_remote_issue() {
        let temp = TempDir::new().unwrap();
        let (provider, engine) = setup(&temp).await;
        let task = linked_task(&provider, &engine, "Orphaned").await;
        engine.tracker().remove(1);

        let result = engine.sync(&provider).await.unwrap();
        assert_eq!(result.conflicts.len(), 1);
        assert_eq!(result.conflicts[0].conflict_type, ConflictType::DeletedRemote);
        assert!(result.conflicts[0].remote_version.is_none());
        let local = provider.get_by_id(&task.id).await.unwrap().unwrap();
        assert_eq!(local.sync_status, SyncStatus::DeletedRemote);

        let resolved = engine
            .resolve(&provider, &result.conflicts[0], Resolution::KeepLocal)
            .await;
        assert_eq!(resolved.pushed.len(), 1);
        let local = provider.get_by_id(&task.id).await.unwrap().unwrap();
        assert_eq!(local.github_issue_number, Some(2));
        assert_eq!(local.sync_status, SyncStatus::Synced);
    }

    #[tokio::test]
    async fn test_deleted_remote_keep_remote_removes_task() {
        let temp = TempDir::new().unwrap();
        let (provider, engine) = setup(&temp).await;
        let task = linked_task(&provider, &engine, "Orphaned").await;
        engine.tracker().remove(1);

        let result = engine.sync(&provider).await.unwrap();
        let resolved = engine
            .resolve(&provider, &result.conflicts[0], Resolution::KeepRemote)
            .await;
        assert!(resolved.errors.is_empty());
        assert!(provider.get_by_id(&task.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_deleted_local_task() {
        let temp = TempDir::new().unwrap();
        let (provider, engine) = setup(&temp).await;
        let task = linked_task(&provider, &engine, "Gone locally").await;
        provider.delete(&task.id).await.unwrap();

        let result = engine.sync(&provider).await.unwrap();
        assert_eq!(result.conflicts.len(), 1);
        let conflict = &result.conflicts[0];
        assert_eq!(conflict.conflict_type, ConflictType::DeletedLocal);
        assert_eq!(conflict.task_id, task.id);
        assert!(conflict.local_version.is_none());

        let resolved = engine
            .resolve(&provider, conflict, Resolution::KeepLocal)
            .await;
        assert!(resolved.errors.is_empty());
        assert_eq!(engine.tracker().issue(1).unwrap().state, IssueState::Closed);
        assert!(engine.sync(&provider).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_deleted_local_keep_remote_recreates_task() {
        let temp = TempDir::new().unwrap();
        let (provider, engine) = setup(&temp).await;
        let task = linked_task(&provider, &engine, "Bring me back").await;
        provider.delete(&task.id).await.unwrap();

        let result = engine.sync(&provider).await.unwrap();
        let resolved = engine
            .resolve(&provider, &result.conflicts[0], Resolution::KeepRemote)
            .await;
        assert_eq!(resolved.pulled.len(), 1);

        let all = provider.get_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].title, "Bring me back");
        assert_eq!(all[0].github_issue_number, Some(1));
        assert!(engine.sync(&provider).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unmarked_open_issue_becomes_task() {
        let temp = TempDir::new().unwrap();
        let (provider, engine) = setup(&temp).await;
        let mut issue = issue_from_draft(
            4,
            &IssueDraft {
                title: "Reported on the website".to_string(),
                body: "Steps to reproduce".to_string(),
                labels: vec![MANAGED_LABEL.to_string(), "priority:low".to_string()],
                state: IssueState::Open,
            },
        );
        issue.updated_at = Utc::now() - Duration::minutes(1);
        engine.tracker().insert(issue);

        let result = engine.sync(&provider).await.unwrap();
        assert_eq!(result.pulled.len(), 1);
        assert!(result.pushed.is_empty());

        let all = provider.get_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].title, "Reported on the website");
        assert_eq!(all[0].priority, Priority::Low);
        assert_eq!(all[0].description, "Steps to reproduce");
        assert_eq!(all[0].github_issue_number, Some(4));
        assert!(engine.sync(&provider).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_closed_orphan_issue_is_ignored() {
        let temp = TempDir::new().unwrap();
        let (provider, engine) = setup(&temp).await;
        let mut orphan = Task::new("t-gone", "Finished long ago");
        orphan.status = TaskStatus::ReadyToShip;
        engine
            .tracker()
            .insert(issue_from_draft(3, &encode_task(&orphan)));

        let result = engine.sync(&provider).await.unwrap();
        assert!(result.is_empty(), "{:?}", result);
        assert!(provider.get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_item_failure_does_not_stop_the_pass() {
        let temp = TempDir::new().unwrap();
        let (provider, engine) = setup(&temp).await;
        let broken = provider.create(TaskDraft::new("Broken")).await.unwrap();
        provider.create(TaskDraft::new("Fine")).await.unwrap();
        engine.tracker().state.lock().unwrap().fail_create_title = Some("Broken".to_string());

        let result = engine.sync(&provider).await.unwrap();
        assert_eq!(result.pushed.len(), 1);
        assert_eq!(result.errors.len(), 1);

        let err = &result.errors[0];
        assert_eq!(err.task_id.as_deref(), Some(broken.id.as_str()));
        assert_eq!(err.operation, SyncOperation::Create);
        assert!(err.retryable);

        let local = provider.get_by_id(&broken.id).await.unwrap().unwrap();
        assert!(!local.is_linked());
    }

    #[tokio::test]
    async fn test_listing_failure_aborts() {
        let temp = TempDir::new().unwrap();
        let (provider, engine) = setup(&temp).await;
        provider.create(TaskDraft::new("Waiting")).await.unwrap();
        engine.tracker().state.lock().unwrap().fail_list = true;

        let err = engine.sync(&provider).await.unwrap_err();
        assert!(matches!(err, SyncPassError::ListIssues(_)));
        assert_eq!(engine.tracker().issue_count(), 0);
    }

    #[test]
    fn test_result_serializes_camel_case() {
        let result = SyncResult {
            pushed: vec![PushedItem {
                task_id: "t-1".to_string(),
                issue_number: 2,
            }],
            errors: vec![SyncError {
                task_id: None,
                issue_number: Some(3),
                operation: SyncOperation::EnsureLabel,
                message: "boom".to_string(),
                retryable: false,
            }],
            ..Default::default()
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["pushed"][0]["taskId"], "t-1");
        assert_eq!(json["pushed"][0]["issueNumber"], 2);
        assert_eq!(json["errors"][0]["operation"], "ensure-label");
        assert!(json["errors"][0].get("taskId").is_none());
    }

    #[test]
    fn test_resolution_parse() {
        assert_eq!("local".parse::<Resolution>().unwrap(), Resolution::KeepLocal);
        assert_eq!("Remote".parse::<Resolution>().unwrap(), Resolution::KeepRemote);
        assert!("both".parse::<Resolution>().is_err());
    }
}
