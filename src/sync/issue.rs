//! Mapping between tasks and remote issues
//!
//! An issue body is a small grammar: a hidden task-id marker, one metadata
//! line right after it, then the `## Description`, `## Acceptance Criteria`
//! and `## Notes` sections in any order. Any other heading is text of the
//! section it appears in. Decoding never fails; every field that cannot be
//! read keeps its default.

use crate::models::markdown::{escape_lines, unescape_line};
use crate::models::{Level, Priority, SyncStatus, Task, TaskPatch, TaskStatus};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// Label carried by every issue this tool manages
pub const MANAGED_LABEL: &str = "taskdeck";
pub const MANAGED_LABEL_COLOR: &str = "5319e7";

const CATEGORY_PREFIX: &str = "category:";
const PRIORITY_PREFIX: &str = "priority:";
const STATUS_PREFIX: &str = "status:";

const DESCRIPTION_HEADING: &str = "## Description";
const ACCEPTANCE_HEADING: &str = "## Acceptance Criteria";
const NOTES_HEADING: &str = "## Notes";

static MARKER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<!--\s*taskdeck-id:\s*(?P<id>\S+?)\s*-->").unwrap());

static META_FIELD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\*\*(?P<key>Priority|Effort|Value):\*\*\s*(?P<value>\S+)$").unwrap()
});

static CHECKLIST_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[-*]\s+(?:\[[ xX]\]\s+)?(?P<item>.+)$").unwrap());

/// Open/closed state of a remote issue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum IssueState {
    #[default]
    Open,
    Closed,
}

/// Label as returned by the remote API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteLabel {
    pub name: String,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Issue as returned by the remote API
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RemoteIssue {
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub state: IssueState,
    #[serde(default)]
    pub labels: Vec<RemoteLabel>,
    #[serde(default)]
    pub html_url: String,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Present when the "issue" is really a pull request
    #[serde(default)]
    pub pull_request: Option<serde_json::Value>,
    /// Validator from the response that fetched this issue; advisory only
    #[serde(skip)]
    pub etag: Option<String>,
}

impl RemoteIssue {
    pub fn label_names(&self) -> impl Iterator<Item = &str> {
        self.labels.iter().map(|l| l.name.as_str())
    }

    pub fn is_managed(&self) -> bool {
        self.label_names().any(|l| l == MANAGED_LABEL)
    }

    /// Task id embedded in the body, if any
    pub fn task_id(&self) -> Option<String> {
        self.body.as_deref().and_then(task_id_from_body)
    }
}

/// Fields written when creating or updating an issue
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IssueDraft {
    pub title: String,
    pub body: String,
    pub labels: Vec<String>,
    pub state: IssueState,
}

/// Hidden marker linking an issue back to a task id
pub fn task_id_marker(id: &str) -> String {
    format!("<!-- taskdeck-id: {} -->", id)
}

pub fn task_id_from_body(body: &str) -> Option<String> {
    MARKER_RE.captures(body).map(|caps| caps["id"].to_string())
}

/// `ready_to_ship` closes the issue; every other status keeps it open
pub fn issue_state(status: TaskStatus) -> IssueState {
    match status {
        TaskStatus::ReadyToShip => IssueState::Closed,
        TaskStatus::Backlog | TaskStatus::InProgress | TaskStatus::Review => IssueState::Open,
    }
}

/// Labels describing a task
pub fn issue_labels(task: &Task) -> Vec<String> {
    let mut labels = vec![MANAGED_LABEL.to_string()];
    let category = task.category.trim();
    if !category.is_empty() {
        labels.push(format!("{}{}", CATEGORY_PREFIX, category));
    }
    labels.push(format!("{}{}", PRIORITY_PREFIX, task.priority));
    if task.status != TaskStatus::default() {
        labels.push(format!("{}{}", STATUS_PREFIX, task.status));
    }
    labels
}

/// Whether a label is one this tool derives from task fields
pub fn is_derived_label(name: &str) -> bool {
    name == MANAGED_LABEL
        || name.starts_with(CATEGORY_PREFIX)
        || name.starts_with(PRIORITY_PREFIX)
        || name.starts_with(STATUS_PREFIX)
}

/// Body text line that would otherwise switch sections or read as a marker
fn is_body_structure(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed == DESCRIPTION_HEADING
        || trimmed == ACCEPTANCE_HEADING
        || trimmed == NOTES_HEADING
        || MARKER_RE.is_match(trimmed)
}

pub fn issue_body(task: &Task) -> String {
    let mut body = String::new();
    body.push_str(&task_id_marker(&task.id));
    body.push('\n');
    body.push_str(&format!(
        "**Priority:** {} | **Effort:** {} | **Value:** {}\n",
        task.priority, task.effort, task.value
    ));

    let description = task.description.trim();
    if !description.is_empty() {
        body.push_str(&format!("\n{}\n\n", DESCRIPTION_HEADING));
        body.push_str(&escape_lines(description, is_body_structure));
        body.push('\n');
    }

    if !task.acceptance_criteria.is_empty() {
        body.push_str(&format!("\n{}\n\n", ACCEPTANCE_HEADING));
        for item in &task.acceptance_criteria {
            body.push_str(&format!("- [ ] {}\n", item));
        }
    }

    let notes = task.notes.trim();
    if !notes.is_empty() {
        body.push_str(&format!("\n{}\n\n", NOTES_HEADING));
        body.push_str(&escape_lines(notes, is_body_structure));
        body.push('\n');
    }

    body
}

pub fn encode_task(task: &Task) -> IssueDraft {
    IssueDraft {
        title: task.title.clone(),
        body: issue_body(task),
        labels: issue_labels(task),
        state: issue_state(task.status),
    }
}

/// Fields recovered from an issue body
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IssueBody {
    pub task_id: Option<String>,
    pub priority: Option<Priority>,
    pub effort: Level,
    pub value: Level,
    pub description: String,
    pub acceptance_criteria: Vec<String>,
    pub notes: String,
}

enum Section {
    /// Before the first text line: marker, then the metadata line
    Preamble,
    Description,
    Acceptance,
    Notes,
}

pub fn parse_body(body: &str) -> IssueBody {
    let mut parsed = IssueBody::default();
    let mut section = Section::Preamble;
    let mut description = Vec::new();
    let mut notes = Vec::new();

    for line in body.lines() {
        let trimmed = line.trim();

        if let Section::Preamble = section {
            if trimmed.is_empty() {
                continue;
            }
            if parsed.task_id.is_none()
                && let Some(caps) = MARKER_RE.captures(trimmed)
            {
                parsed.task_id = Some(caps["id"].to_string());
                continue;
            }
            section = Section::Description;
            if parse_meta_line(trimmed, &mut parsed) {
                continue;
            }
        }

        match trimmed {
            DESCRIPTION_HEADING => section = Section::Description,
            ACCEPTANCE_HEADING => section = Section::Acceptance,
            NOTES_HEADING => section = Section::Notes,
            _ => {
                let line = unescape_line(line, is_body_structure);
                match section {
                    Section::Preamble | Section::Description => description.push(line),
                    Section::Acceptance => {
                        if let Some(caps) = CHECKLIST_RE.captures(line.trim()) {
                            parsed.acceptance_criteria.push(caps["item"].trim().to_string());
                        }
                    }
                    Section::Notes => notes.push(line),
                }
            }
        }
    }

    parsed.description = description.join("\n").trim().to_string();
    parsed.notes = notes.join("\n").trim().to_string();
    parsed
}

/// Read `**Priority:** x | **Effort:** y | **Value:** z`
///
/// Returns false, leaving `parsed` untouched, unless every `|` part is one
/// of those fields.
fn parse_meta_line(line: &str, parsed: &mut IssueBody) -> bool {
    let Some(fields) = line
        .split('|')
        .map(|part| META_FIELD_RE.captures(part.trim()))
        .collect::<Option<Vec<_>>>()
    else {
        return false;
    };

    for caps in fields {
        let value = &caps["value"];
        match &caps["key"] {
            "Priority" => parsed.priority = value.parse().ok(),
            "Effort" => parsed.effort = value.parse().unwrap_or_default(),
            "Value" => parsed.value = value.parse().unwrap_or_default(),
            _ => {}
        }
    }
    true
}

fn label_value<'a>(issue: &'a RemoteIssue, prefix: &str) -> Option<&'a str> {
    issue
        .label_names()
        .find_map(|name| name.strip_prefix(prefix))
        .map(str::trim)
}

/// Status recovered from the issue state and its `status:` label
pub fn decode_status(issue: &RemoteIssue) -> TaskStatus {
    if issue.state == IssueState::Closed {
        return TaskStatus::ReadyToShip;
    }
    match label_value(issue, STATUS_PREFIX).and_then(|s| s.parse::<TaskStatus>().ok()) {
        Some(TaskStatus::ReadyToShip) | None => TaskStatus::Backlog,
        Some(status) => status,
    }
}

/// The remote version of a task, as far as the issue can describe it
pub fn decode_issue(issue: &RemoteIssue) -> Task {
    let body = parse_body(issue.body.as_deref().unwrap_or_default());

    let mut task = Task::new(body.task_id.clone().unwrap_or_default(), issue.title.trim());
    task.priority = label_value(issue, PRIORITY_PREFIX)
        .and_then(|p| p.parse().ok())
        .or(body.priority)
        .unwrap_or_default();
    task.status = decode_status(issue);
    task.category = label_value(issue, CATEGORY_PREFIX)
        .unwrap_or_default()
        .to_string();
    task.effort = body.effort;
    task.value = body.value;
    task.description = body.description;
    task.acceptance_criteria = body.acceptance_criteria;
    task.notes = body.notes;
    task.created_at = issue.created_at;
    task.updated_at = issue.updated_at;
    task.github_issue_number = Some(issue.number);
    task.github_issue_url = Some(issue.html_url.clone()).filter(|u| !u.is_empty());
    task.sync_status = SyncStatus::Synced;
    task
}

/// Patch that overwrites a local task with the remote version
///
/// Only fields the issue carries are touched; tags, order and pass-through
/// fields stay local.
pub fn pull_patch(issue: &RemoteIssue) -> TaskPatch {
    let remote = decode_issue(issue);
    TaskPatch {
        title: Some(remote.title),
        description: Some(remote.description),
        priority: Some(remote.priority),
        status: Some(remote.status),
        effort: Some(remote.effort),
        value: Some(remote.value),
        category: Some(remote.category),
        acceptance_criteria: Some(remote.acceptance_criteria),
        notes: Some(remote.notes),
        github_issue_number: Some(Some(issue.number)),
        github_issue_url: Some(remote.github_issue_url),
        mark_synced: Some(issue.updated_at),
        ..Default::default()
    }
}

/// Patch recording that `task` now matches `issue`
pub fn link_patch(issue: &RemoteIssue) -> TaskPatch {
    TaskPatch {
        github_issue_number: Some(Some(issue.number)),
        github_issue_url: Some(Some(issue.html_url.clone()).filter(|u| !u.is_empty())),
        mark_synced: Some(issue.updated_at),
        ..Default::default()
    }
}
