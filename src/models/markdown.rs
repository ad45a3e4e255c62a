//! Canonical Markdown document for a task collection
//!
//! One `## [status] Title` section per task. Humans read and edit the bold
//! metadata lines; the sync bookkeeping travels in a single JSON comment line
//! that editors can leave alone. Parsing never fails: anything malformed
//! falls back to a default value.

use crate::models::task::{Level, Priority, SyncStatus, Task, TaskStatus};
use crate::storage::id_generator::IdGenerator;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

/// First line of every exported document
pub const DOCUMENT_HEADER: &str = "# Tasks";

/// Line closing each task section
const SECTION_SEPARATOR: &str = "---";

const SYNC_COMMENT_PREFIX: &str = "<!-- taskdeck-sync:";
const ACCEPTANCE_HEADING: &str = "### Acceptance Criteria";
const NOTES_HEADING: &str = "### Notes";

static HEADING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^##\s+(?:\[(?P<status>[^\]]*)\]\s*)?(?P<title>.*)$").unwrap()
});

static META_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\*\*(?P<key>[^*]+?):\*\*\s*(?P<value>.*)$").unwrap());

static SYNC_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^<!--\s*taskdeck-sync:\s*(?P<json>\{.*\})\s*-->$").unwrap());

static CHECKLIST_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[-*]\s+(?:\[[ xX]\]\s+)?(?P<item>.+)$").unwrap());

/// Sync bookkeeping carried by the machine-readable comment line
///
/// Timestamps and enums stay strings here so one bad value cannot discard
/// the rest of the line.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SyncComment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    github_issue_number: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    github_issue_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_synced_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sync_status: Option<String>,
}

/// Format a timestamp the way the document stores it
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Prefix with a backslash every line a parser would take for structure
///
/// Lines that already start with backslashes in front of structure get one
/// more, so [`unescape_line`] always restores the original text.
pub(crate) fn escape_lines(text: &str, is_structure: impl Fn(&str) -> bool) -> String {
    text.lines()
        .map(|line| {
            if is_structure(line.trim_start_matches('\\')) {
                format!("\\{}", line)
            } else {
                line.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Undo [`escape_lines`] for one line
pub(crate) fn unescape_line<'a>(line: &'a str, is_structure: impl Fn(&str) -> bool) -> &'a str {
    match line.strip_prefix('\\') {
        Some(rest) if is_structure(rest.trim_start_matches('\\')) => rest,
        _ => line,
    }
}

/// Free-text line that would otherwise open a task, a part or a sync comment
fn is_document_structure(line: &str) -> bool {
    let trimmed = line.trim();
    line.trim_end().starts_with("## ")
        || trimmed == ACCEPTANCE_HEADING
        || trimmed == NOTES_HEADING
        || trimmed == SECTION_SEPARATOR
        || SYNC_RE.is_match(trimmed)
}

/// Parse a document timestamp, accepting RFC 3339 or a bare date
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

/// Serialize a task collection to the canonical document
///
/// Sections are grouped by status in board order, then by `order`.
pub fn serialize_tasks(tasks: &[Task]) -> String {
    let mut sorted: Vec<&Task> = tasks.iter().collect();
    sorted.sort_by_key(|t| (status_rank(t.status), t.order, t.created_at));

    let mut out = String::new();
    out.push_str(DOCUMENT_HEADER);
    out.push('\n');

    for task in sorted {
        out.push('\n');
        out.push_str(&serialize_section(task));
    }

    out
}

fn status_rank(status: TaskStatus) -> usize {
    TaskStatus::ALL
        .iter()
        .position(|s| *s == status)
        .unwrap_or_default()
}

fn serialize_section(task: &Task) -> String {
    let mut out = String::new();
    out.push_str(&format!("## [{}] {}\n", task.status, task.title.trim()));

    let comment = SyncComment {
        id: Some(task.id.clone()),
        github_issue_number: task.github_issue_number,
        github_issue_url: task.github_issue_url.clone(),
        last_synced_at: task.last_synced_at.as_ref().map(format_timestamp),
        sync_status: Some(task.sync_status.to_string()),
    };
    // Serializing a struct of strings and integers cannot fail
    let json = serde_json::to_string(&comment).unwrap_or_default();
    out.push_str(&format!("{} {} -->\n\n", SYNC_COMMENT_PREFIX, json));

    out.push_str(&format!("**ID:** {}\n", task.id));
    out.push_str(&format!("**Priority:** {}\n", task.priority));
    out.push_str(&format!("**Effort:** {}\n", task.effort));
    out.push_str(&format!("**Value:** {}\n", task.value));
    if !task.category.is_empty() {
        out.push_str(&format!("**Category:** {}\n", task.category));
    }
    if !task.tags.is_empty() {
        out.push_str(&format!("**Tags:** {}\n", task.tags.join(", ")));
    }
    if let Some(branch) = &task.branch {
        out.push_str(&format!("**Branch:** {}\n", branch));
    }
    if let Some(path) = &task.worktree_path {
        out.push_str(&format!("**Worktree:** {}\n", path));
    }
    out.push_str(&format!("**Created:** {}\n", format_timestamp(&task.created_at)));
    out.push_str(&format!("**Updated:** {}\n", format_timestamp(&task.updated_at)));

    let description = task.description.trim();
    if !description.is_empty() {
        out.push('\n');
        out.push_str(&escape_lines(description, is_document_structure));
        out.push('\n');
    }

    if !task.acceptance_criteria.is_empty() {
        out.push('\n');
        out.push_str(ACCEPTANCE_HEADING);
        out.push('\n');
        for item in &task.acceptance_criteria {
            out.push_str(&format!("- [ ] {}\n", item));
        }
    }

    let notes = task.notes.trim();
    if !notes.is_empty() {
        out.push('\n');
        out.push_str(NOTES_HEADING);
        out.push('\n');
        out.push_str(&escape_lines(notes, is_document_structure));
        out.push('\n');
    }

    out.push('\n');
    out.push_str(SECTION_SEPARATOR);
    out.push('\n');
    out
}

/// Parse a document into tasks
///
/// Ids are kept when present and unique within the document; otherwise a
/// fresh id is generated, so files without ID lines do not get stable ids
/// across repeated parses.
pub fn parse_tasks(content: &str) -> Vec<Task> {
    let mut tasks = Vec::new();
    let mut seen_ids = HashSet::new();
    let mut next_order: HashMap<TaskStatus, i64> = HashMap::new();

    for (heading, body) in split_sections(content) {
        let mut task = parse_section(heading, &body);

        if !IdGenerator::is_valid(&task.id) || seen_ids.contains(&task.id) {
            let fresh = IdGenerator::generate_unique(&seen_ids);
            log::debug!("Assigning id {} to task '{}'", fresh, task.title);
            task.id = fresh;
        }
        seen_ids.insert(task.id.clone());

        let order = next_order.entry(task.status).or_insert(0);
        task.order = *order;
        *order += 1;

        tasks.push(task);
    }

    tasks
}

/// Split a document into (heading, body lines) pairs
fn split_sections(content: &str) -> Vec<(&str, Vec<&str>)> {
    let mut sections: Vec<(&str, Vec<&str>)> = Vec::new();

    for line in content.lines() {
        let trimmed = line.trim_end();
        if trimmed.starts_with("## ") {
            sections.push((trimmed, Vec::new()));
        } else if let Some((_, body)) = sections.last_mut() {
            body.push(trimmed);
        }
    }

    for (_, body) in &mut sections {
        while body.last().is_some_and(|l| l.trim().is_empty()) {
            body.pop();
        }
        if body.last().is_some_and(|l| l.trim() == SECTION_SEPARATOR) {
            body.pop();
        }
    }

    sections
}

#[derive(PartialEq)]
enum Part {
    Meta,
    Description,
    Acceptance,
    Notes,
}

fn parse_section(heading: &str, body: &[&str]) -> Task {
    let (status, title) = parse_heading(heading);
    let mut task = Task::new(String::new(), title);
    task.status = status;

    let mut comment = SyncComment::default();
    let mut meta: Vec<(String, String)> = Vec::new();
    let mut description = Vec::new();
    let mut notes = Vec::new();
    let mut part = Part::Meta;

    for line in body {
        let trimmed = line.trim();

        if let Some(caps) = SYNC_RE.captures(trimmed) {
            match serde_json::from_str::<SyncComment>(&caps["json"]) {
                Ok(parsed) => comment = parsed,
                Err(e) => log::debug!("Ignoring malformed sync comment: {}", e),
            }
            continue;
        }

        if trimmed == ACCEPTANCE_HEADING {
            part = Part::Acceptance;
            continue;
        }
        if trimmed == NOTES_HEADING {
            part = Part::Notes;
            continue;
        }

        match part {
            // The blank line after the last metadata line ends the block
            Part::Meta if trimmed.is_empty() => {
                if !meta.is_empty() {
                    part = Part::Description;
                }
            }
            Part::Meta => match META_RE.captures(trimmed) {
                Some(caps) => {
                    let key = caps["key"].trim().to_lowercase();
                    meta.push((key, caps["value"].trim().to_string()));
                }
                None => {
                    part = Part::Description;
                    description.push(unescape_line(line, is_document_structure));
                }
            },
            Part::Description => description.push(unescape_line(line, is_document_structure)),
            Part::Acceptance => {
                if let Some(caps) = CHECKLIST_RE.captures(trimmed) {
                    task.acceptance_criteria.push(caps["item"].trim().to_string());
                }
            }
            Part::Notes => notes.push(unescape_line(line, is_document_structure)),
        }
    }

    let mut created = None;
    let mut updated = None;
    let mut meta_id = None;

    for (key, value) in meta {
        match key.as_str() {
            "id" => meta_id = Some(value),
            "priority" => task.priority = parse_or_default(&key, &value),
            "effort" => task.effort = parse_or_default::<Level>(&key, &value),
            "value" => task.value = parse_or_default::<Level>(&key, &value),
            "category" => task.category = value,
            "tags" => {
                task.tags = value
                    .split(',')
                    .map(|t| t.trim().to_string())
                    .filter(|t| !t.is_empty())
                    .collect()
            }
            "branch" if !value.is_empty() => task.branch = Some(value),
            "worktree" if !value.is_empty() => task.worktree_path = Some(value),
            "created" => created = parse_timestamp(&value),
            "updated" => updated = parse_timestamp(&value),
            other => log::debug!("Ignoring unknown metadata line '{}'", other),
        }
    }

    task.id = comment
        .id
        .filter(|id| IdGenerator::is_valid(id))
        .or(meta_id)
        .unwrap_or_default();

    let now = Utc::now();
    task.created_at = created.unwrap_or(now);
    task.updated_at = updated.unwrap_or(task.created_at);

    task.github_issue_number = comment.github_issue_number;
    task.github_issue_url = comment.github_issue_url;
    task.last_synced_at = comment.last_synced_at.as_deref().and_then(parse_timestamp);
    task.sync_status = comment
        .sync_status
        .and_then(|s| s.parse().ok())
        .unwrap_or_default();

    task.description = join_trimmed(&description);
    task.notes = join_trimmed(&notes);
    task
}

fn parse_heading(heading: &str) -> (TaskStatus, String) {
    let Some(caps) = HEADING_RE.captures(heading) else {
        return (TaskStatus::Backlog, heading.trim_start_matches('#').trim().to_string());
    };

    let status = caps
        .name("status")
        .map(|s| {
            s.as_str().parse().unwrap_or_else(|_| {
                log::debug!("Unknown status '{}', using backlog", s.as_str());
                TaskStatus::Backlog
            })
        })
        .unwrap_or_default();

    let title = caps["title"].trim();
    let title = if title.is_empty() { "Untitled" } else { title };
    (status, title.to_string())
}

fn parse_or_default<T: std::str::FromStr + Default>(key: &str, value: &str) -> T {
    value.parse().unwrap_or_else(|_| {
        log::debug!("Malformed {} '{}', using default", key, value);
        T::default()
    })
}

fn join_trimmed(lines: &[&str]) -> String {
    lines.join("\n").trim().to_string()
}
