//! Display formatting for CLI output

use crate::config::ConfigStore;
use crate::migrate::MigrationResult;
use crate::models::{Task, TaskStatus};
use crate::sync::{SyncResult, github::DEFAULT_API_URL};
use std::collections::HashSet;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

/// Ids of the first `count` backlog tasks by board order
///
/// "Up next" is only ever a view; the tasks stay in the backlog.
pub fn up_next_ids(tasks: &[Task], count: usize) -> HashSet<&str> {
    let mut backlog: Vec<&Task> = tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Backlog)
        .collect();
    backlog.sort_by_key(|t| t.order);
    backlog.into_iter().take(count).map(|t| t.id.as_str()).collect()
}

/// Task row for table display
#[derive(Tabled)]
struct TaskRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Title")]
    title: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Priority")]
    priority: String,
    #[tabled(rename = "Effort")]
    effort: String,
    #[tabled(rename = "Value")]
    value: String,
    #[tabled(rename = "Issue")]
    issue: String,
}

impl TaskRow {
    fn new(task: &Task, up_next: bool) -> Self {
        TaskRow {
            id: task.id.clone(),
            title: truncate(&task.title, 40),
            status: if up_next {
                "up next".to_string()
            } else {
                task.status.to_string()
            },
            priority: task.priority.to_string(),
            effort: task.effort.to_string(),
            value: task.value.to_string(),
            issue: task
                .github_issue_number
                .map(|n| format!("#{} ({})", n, task.sync_status))
                .unwrap_or_default(),
        }
    }
}

/// Display tasks in board order, marking the first backlog tasks up next
pub fn display_task_list(tasks: &[Task], up_next: usize) {
    if tasks.is_empty() {
        log::info!("No tasks found.");
        return;
    }

    let next = up_next_ids(tasks, up_next);
    let mut sorted: Vec<&Task> = tasks.iter().collect();
    sorted.sort_by_key(|t| {
        let column = TaskStatus::ALL
            .iter()
            .position(|s| *s == t.status)
            .unwrap_or_default();
        (column, t.order)
    });

    let rows: Vec<TaskRow> = sorted
        .into_iter()
        .map(|t| TaskRow::new(t, next.contains(t.id.as_str())))
        .collect();
    let table = Table::new(rows).with(Style::rounded()).to_string();

    println!("{}", table);
}

/// Display detailed task information
pub fn display_task_detail(task: &Task) {
    println!("ID:       {}", task.id);
    println!("Title:    {}", task.title);
    println!("Status:   {}", task.status);
    println!("Priority: {}", task.priority);
    println!("Effort:   {}", task.effort);
    println!("Value:    {}", task.value);

    if !task.category.is_empty() {
        println!("Category: {}", task.category);
    }

    if !task.tags.is_empty() {
        println!("Tags:     {}", task.tags.join(", "));
    }

    if let Some(ref branch) = task.branch {
        println!("Branch:   {}", branch);
    }

    println!("Created:  {}", task.created_at.format("%Y-%m-%d %H:%M:%S"));
    println!("Updated:  {}", task.updated_at.format("%Y-%m-%d %H:%M:%S"));

    if let Some(number) = task.github_issue_number {
        let url = task.github_issue_url.as_deref().unwrap_or_default();
        println!("Issue:    #{} {} ({})", number, url, task.sync_status);
    }

    if !task.description.is_empty() {
        println!();
        println!("Description:");
        println!("{}", task.description);
    }

    if !task.acceptance_criteria.is_empty() {
        println!();
        println!("Acceptance criteria:");
        for item in &task.acceptance_criteria {
            println!("  - {}", item);
        }
    }

    if !task.notes.is_empty() {
        println!();
        println!("Notes:");
        println!("{}", task.notes);
    }
}

/// One line of a sync summary table
#[derive(Tabled)]
struct SyncRow {
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Task")]
    task: String,
    #[tabled(rename = "Issue")]
    issue: String,
    #[tabled(rename = "Detail")]
    detail: String,
}

/// Display what a sync pass or resolution did
pub fn display_sync_result(result: &SyncResult) {
    if result.is_empty() {
        log::info!("Everything is up to date.");
        return;
    }

    let mut rows = Vec::new();
    for item in &result.pushed {
        rows.push(SyncRow {
            action: "pushed".to_string(),
            task: item.task_id.clone(),
            issue: format!("#{}", item.issue_number),
            detail: String::new(),
        });
    }
    for item in &result.pulled {
        rows.push(SyncRow {
            action: "pulled".to_string(),
            task: item.task_id.clone(),
            issue: format!("#{}", item.issue_number),
            detail: String::new(),
        });
    }
    for conflict in &result.conflicts {
        let title = conflict
            .local_version
            .as_ref()
            .or(conflict.remote_version.as_ref())
            .map(|t| truncate(&t.title, 30))
            .unwrap_or_default();
        rows.push(SyncRow {
            action: format!("conflict: {}", conflict.conflict_type),
            task: conflict.task_id.clone(),
            issue: format!("#{}", conflict.issue_number),
            detail: title,
        });
    }
    for err in &result.errors {
        rows.push(SyncRow {
            action: format!("failed: {}", err.operation),
            task: err.task_id.clone().unwrap_or_default(),
            issue: err
                .issue_number
                .map(|n| format!("#{}", n))
                .unwrap_or_default(),
            detail: format!(
                "{}{}",
                truncate(&err.message, 50),
                if err.retryable { " (retryable)" } else { "" }
            ),
        });
    }

    let table = Table::new(rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::single(2)).with(Alignment::right()))
        .to_string();
    println!("{}", table);

    if !result.conflicts.is_empty() {
        log::info!("Resolve conflicts with 'taskdeck sync --resolve local' or '--resolve remote'.");
    }
}

/// Stats row for table display
#[derive(Tabled)]
struct CountRow {
    #[tabled(rename = "Metric")]
    metric: String,
    #[tabled(rename = "Count")]
    count: String,
}

/// Display the counts of a migration, merge or import
pub fn display_migration_result(result: &MigrationResult) {
    let rows = vec![
        CountRow {
            metric: "Tasks written".to_string(),
            count: result.item_count.to_string(),
        },
        CountRow {
            metric: "Duplicates skipped".to_string(),
            count: result.duplicates_skipped.to_string(),
        },
        CountRow {
            metric: "Title conflicts".to_string(),
            count: result.conflicts.to_string(),
        },
        CountRow {
            metric: "Errors".to_string(),
            count: result.errors.len().to_string(),
        },
    ];

    let table = Table::new(rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::single(1)).with(Alignment::right()))
        .to_string();
    println!("{}", table);

    for issue in &result.errors {
        match &issue.task_id {
            Some(id) => error(&format!("{}: {}", id, issue.message)),
            None => error(&issue.message),
        }
    }
}

/// Display effective settings, hiding the token
pub fn display_config(config: &ConfigStore, default_repo: Option<&str>) {
    let project = config.project();
    let user = config.user();

    println!("Mode:     {}", config.mode());
    match (&project.repo, default_repo) {
        (Some(repo), _) => println!("Repo:     {}", repo),
        (None, Some(repo)) => println!("Repo:     {} (from origin)", repo),
        (None, None) => println!("Repo:     (not set)"),
    }
    println!(
        "Token:    {}",
        if user.github_token.is_some() {
            "(set)"
        } else {
            "(not set)"
        }
    );
    println!(
        "API URL:  {}",
        user.api_url.as_deref().unwrap_or(DEFAULT_API_URL)
    );
    if let Some(ref file) = project.tasks_file {
        println!("File:     {}", file.display());
    }
    if let Some(ref dir) = project.store_dir {
        println!("Store:    {}", dir.display());
    }
}

/// Hint shown when the local store is full
pub fn capacity_hint() {
    eprintln!(
        "Hint: run 'taskdeck export -o tasks.md' to save your tasks, then 'taskdeck migrate file' to keep them in a Markdown file."
    );
}

/// Truncate a string to a maximum number of characters
fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}

/// Format for success messages
pub fn success(msg: &str) {
    println!("{}", msg);
}

/// Format for error messages
pub fn error(msg: &str) {
    eprintln!("Error: {}", msg);
}
