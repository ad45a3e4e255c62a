//! Task model and related types

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Persisted task status
///
/// "Up next" is a view over backlog tasks computed by callers and never
/// stored here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Backlog,
    InProgress,
    Review,
    ReadyToShip,
}

impl TaskStatus {
    /// All persisted statuses in board order
    pub const ALL: [TaskStatus; 4] = [
        TaskStatus::Backlog,
        TaskStatus::InProgress,
        TaskStatus::Review,
        TaskStatus::ReadyToShip,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Backlog => "backlog",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Review => "review",
            TaskStatus::ReadyToShip => "ready_to_ship",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "backlog" | "todo" => Ok(TaskStatus::Backlog),
            "in_progress" | "in-progress" | "inprogress" => Ok(TaskStatus::InProgress),
            "review" | "in_review" | "in-review" => Ok(TaskStatus::Review),
            "ready_to_ship" | "ready-to-ship" | "done" => Ok(TaskStatus::ReadyToShip),
            _ => Err(format!("Unknown status: {}", s)),
        }
    }
}

/// Task priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critical,
    High,
    #[default]
    Medium,
    Low,
    Someday,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Critical => "critical",
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
            Priority::Someday => "someday",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "critical" | "crit" => Ok(Priority::Critical),
            "high" => Ok(Priority::High),
            "medium" | "med" => Ok(Priority::Medium),
            "low" => Ok(Priority::Low),
            "someday" => Ok(Priority::Someday),
            _ => Err(format!("Unknown priority: {}", s)),
        }
    }
}

/// Coarse three-step scale used for effort and value estimates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Low,
    #[default]
    Medium,
    High,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Level::Low => write!(f, "low"),
            Level::Medium => write!(f, "medium"),
            Level::High => write!(f, "high"),
        }
    }
}

impl std::str::FromStr for Level {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" | "s" | "small" => Ok(Level::Low),
            "medium" | "med" | "m" => Ok(Level::Medium),
            "high" | "l" | "large" => Ok(Level::High),
            _ => Err(format!("Unknown level: {}", s)),
        }
    }
}

/// Relationship between a task and its linked remote issue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SyncStatus {
    /// Never pushed to the remote tracker
    #[default]
    Local,
    Synced,
    /// Edited locally since the last sync pass
    Modified,
    Conflict,
    DeletedRemote,
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncStatus::Local => write!(f, "local"),
            SyncStatus::Synced => write!(f, "synced"),
            SyncStatus::Modified => write!(f, "modified"),
            SyncStatus::Conflict => write!(f, "conflict"),
            SyncStatus::DeletedRemote => write!(f, "deleted-remote"),
        }
    }
}

impl std::str::FromStr for SyncStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "local" => Ok(SyncStatus::Local),
            "synced" => Ok(SyncStatus::Synced),
            "modified" => Ok(SyncStatus::Modified),
            "conflict" => Ok(SyncStatus::Conflict),
            "deleted-remote" | "deleted_remote" => Ok(SyncStatus::DeletedRemote),
            _ => Err(format!("Unknown sync status: {}", s)),
        }
    }
}

/// A task with all its metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub effort: Level,
    #[serde(default)]
    pub value: Level,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub category: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub order: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github_issue_number: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github_issue_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_synced_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub sync_status: SyncStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub acceptance_criteria: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub notes: String,
    /// Owned by the worktree tooling, carried through untouched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worktree_path: Option<String>,
}

impl Task {
    /// Create a new backlog task with the given id and title
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Task {
            id: id.into(),
            title: title.into(),
            description: String::new(),
            priority: Priority::default(),
            status: TaskStatus::default(),
            effort: Level::default(),
            value: Level::default(),
            tags: Vec::new(),
            category: String::new(),
            created_at: now,
            updated_at: now,
            order: 0,
            github_issue_number: None,
            github_issue_url: None,
            last_synced_at: None,
            sync_status: SyncStatus::default(),
            acceptance_criteria: Vec::new(),
            notes: String::new(),
            branch: None,
            worktree_path: None,
        }
    }

    /// Build a task from a creation draft
    pub fn from_draft(id: impl Into<String>, draft: TaskDraft) -> Self {
        let mut task = Task::new(id, draft.title);
        task.description = draft.description.unwrap_or_default();
        task.priority = draft.priority.unwrap_or_default();
        task.status = draft.status.unwrap_or_default();
        task.effort = draft.effort.unwrap_or_default();
        task.value = draft.value.unwrap_or_default();
        task.tags = draft.tags;
        task.category = draft.category.unwrap_or_default();
        task.order = draft.order.unwrap_or_default();
        task.acceptance_criteria = draft.acceptance_criteria;
        task.notes = draft.notes.unwrap_or_default();
        task.branch = draft.branch;
        task.worktree_path = draft.worktree_path;
        task
    }

    /// Whether the task has a linked remote issue
    pub fn is_linked(&self) -> bool {
        self.github_issue_number.is_some()
    }

    /// Whether the task changed locally since it was last synced
    pub fn modified_since_sync(&self) -> bool {
        self.last_synced_at
            .is_none_or(|synced| self.updated_at > synced)
    }

    /// Advance `updated_at`, strictly past its previous value
    pub fn touch(&mut self) {
        self.updated_at = next_timestamp(self.updated_at);
    }

    /// Apply a partial update, refreshing `updated_at`
    pub fn apply(&mut self, patch: TaskPatch) {
        let sync_stamp = patch.mark_synced;

        if let Some(title) = patch.title {
            self.title = title;
        }
        if let Some(description) = patch.description {
            self.description = description;
        }
        if let Some(priority) = patch.priority {
            self.priority = priority;
        }
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(effort) = patch.effort {
            self.effort = effort;
        }
        if let Some(value) = patch.value {
            self.value = value;
        }
        if let Some(tags) = patch.tags {
            self.tags = tags;
        }
        if let Some(category) = patch.category {
            self.category = category;
        }
        if let Some(order) = patch.order {
            self.order = order;
        }
        if let Some(criteria) = patch.acceptance_criteria {
            self.acceptance_criteria = criteria;
        }
        if let Some(notes) = patch.notes {
            self.notes = notes;
        }
        if let Some(branch) = patch.branch {
            self.branch = branch;
        }
        if let Some(path) = patch.worktree_path {
            self.worktree_path = path;
        }
        if let Some(number) = patch.github_issue_number {
            self.github_issue_number = number;
        }
        if let Some(url) = patch.github_issue_url {
            self.github_issue_url = url;
        }

        self.touch();

        match (sync_stamp, patch.sync_status) {
            (Some(at), _) => {
                self.last_synced_at = Some(at.max(self.updated_at));
                self.sync_status = SyncStatus::Synced;
            }
            (None, Some(status)) => self.sync_status = status,
            (None, None) => {
                if self.is_linked() && self.sync_status == SyncStatus::Synced {
                    self.sync_status = SyncStatus::Modified;
                }
            }
        }
    }
}

/// Next `updated_at` value: now, or one millisecond past `previous` if the
/// clock has not moved forward
pub fn next_timestamp(previous: DateTime<Utc>) -> DateTime<Utc> {
    let now = Utc::now();
    if now > previous {
        now
    } else {
        previous + Duration::milliseconds(1)
    }
}

/// Fields a caller supplies when creating a task
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskDraft {
    pub title: String,
    pub description: Option<String>,
    pub priority: Option<Priority>,
    pub status: Option<TaskStatus>,
    pub effort: Option<Level>,
    pub value: Option<Level>,
    pub tags: Vec<String>,
    pub category: Option<String>,
    pub order: Option<i64>,
    pub acceptance_criteria: Vec<String>,
    pub notes: Option<String>,
    pub branch: Option<String>,
    pub worktree_path: Option<String>,
}

impl TaskDraft {
    pub fn new(title: impl Into<String>) -> Self {
        TaskDraft {
            title: title.into(),
            ..Default::default()
        }
    }
}

impl From<&Task> for TaskDraft {
    fn from(task: &Task) -> Self {
        TaskDraft {
            title: task.title.clone(),
            description: Some(task.description.clone()),
            priority: Some(task.priority),
            status: Some(task.status),
            effort: Some(task.effort),
            value: Some(task.value),
            tags: task.tags.clone(),
            category: Some(task.category.clone()),
            order: Some(task.order),
            acceptance_criteria: task.acceptance_criteria.clone(),
            notes: Some(task.notes.clone()),
            branch: task.branch.clone(),
            worktree_path: task.worktree_path.clone(),
        }
    }
}

/// Partial update of an existing task
///
/// `None` leaves a field untouched. Nested options clear a field with
/// `Some(None)`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub priority: Option<Priority>,
    pub status: Option<TaskStatus>,
    pub effort: Option<Level>,
    pub value: Option<Level>,
    pub tags: Option<Vec<String>>,
    pub category: Option<String>,
    pub order: Option<i64>,
    pub acceptance_criteria: Option<Vec<String>>,
    pub notes: Option<String>,
    pub branch: Option<Option<String>>,
    pub worktree_path: Option<Option<String>>,
    pub github_issue_number: Option<Option<u64>>,
    pub github_issue_url: Option<Option<String>>,
    pub sync_status: Option<SyncStatus>,
    /// Written by a sync pass that observed the remote at this instant
    pub mark_synced: Option<DateTime<Utc>>,
}

impl TaskPatch {
    pub fn is_empty(&self) -> bool {
        *self == TaskPatch::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_status_display() {
        assert_eq!(TaskStatus::Backlog.to_string(), "backlog");
        assert_eq!(TaskStatus::InProgress.to_string(), "in_progress");
        assert_eq!(TaskStatus::Review.to_string(), "review");
        assert_eq!(TaskStatus::ReadyToShip.to_string(), "ready_to_ship");
    }

    #[test]
    fn test_task_status_parse() {
        assert_eq!(
            "backlog".parse::<TaskStatus>().unwrap(),
            TaskStatus::Backlog
        );
        assert_eq!(
            "in-progress".parse::<TaskStatus>().unwrap(),
            TaskStatus::InProgress
        );
        assert_eq!(
            "ready_to_ship".parse::<TaskStatus>().unwrap(),
            TaskStatus::ReadyToShip
        );
        assert!("up_next".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn test_priority_parse() {
        assert_eq!("someday".parse::<Priority>().unwrap(), Priority::Someday);
        assert_eq!("crit".parse::<Priority>().unwrap(), Priority::Critical);
        assert_eq!("HIGH".parse::<Priority>().unwrap(), Priority::High);
        assert!("urgent".parse::<Priority>().is_err());
    }

    #[test]
    fn test_sync_status_serde() {
        let json = serde_json::to_string(&SyncStatus::DeletedRemote).unwrap();
        assert_eq!(json, "\"deleted-remote\"");
        assert_eq!(
            "deleted-remote".parse::<SyncStatus>().unwrap(),
            SyncStatus::DeletedRemote
        );
    }

    #[test]
    fn test_task_json_uses_camel_case() {
        let mut task = Task::new("t-1", "Test");
        task.github_issue_number = Some(7);
        let json = serde_json::to_value(&task).unwrap();
        assert_eq!(json["githubIssueNumber"], 7);
        assert!(json.get("createdAt").is_some());
        assert_eq!(json["syncStatus"], "local");
    }

    #[test]
    fn test_touch_strictly_increases() {
        let mut task = Task::new("t-1", "Test");
        task.updated_at = Utc::now() + Duration::hours(1);
        let before = task.updated_at;
        task.touch();
        assert!(task.updated_at > before);
    }

    #[test]
    fn test_apply_patch() {
        let mut task = Task::new("t-1", "Original");
        let before = task.updated_at;
        task.apply(TaskPatch {
            title: Some("Renamed".to_string()),
            priority: Some(Priority::High),
            ..Default::default()
        });

        assert_eq!(task.id, "t-1");
        assert_eq!(task.title, "Renamed");
        assert_eq!(task.priority, Priority::High);
        assert!(task.updated_at > before);
    }

    #[test]
    fn test_apply_marks_linked_task_modified() {
        let mut task = Task::new("t-1", "Linked");
        task.github_issue_number = Some(3);
        task.sync_status = SyncStatus::Synced;

        task.apply(TaskPatch {
            notes: Some("edited".to_string()),
            ..Default::default()
        });
        assert_eq!(task.sync_status, SyncStatus::Modified);
    }

    #[test]
    fn test_mark_synced_stamps_after_update() {
        let mut task = Task::new("t-1", "Linked");
        let remote_time = task.updated_at - Duration::minutes(5);

        task.apply(TaskPatch {
            github_issue_number: Some(Some(9)),
            mark_synced: Some(remote_time),
            ..Default::default()
        });

        assert_eq!(task.sync_status, SyncStatus::Synced);
        assert_eq!(task.last_synced_at, Some(task.updated_at));
        assert!(!task.modified_since_sync());
    }

    #[test]
    fn test_from_draft_defaults() {
        let task = Task::from_draft("t-2", TaskDraft::new("Draft"));
        assert_eq!(task.status, TaskStatus::Backlog);
        assert_eq!(task.priority, Priority::Medium);
        assert_eq!(task.sync_status, SyncStatus::Local);
        assert!(task.modified_since_sync());
    }
}
