//! CLI command definitions using clap

use crate::migrate::ImportMode;
use crate::models::{Level, Priority, TaskStatus};
use crate::storage::ProviderMode;
use crate::sync::Resolution;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Task board with local, Markdown-file and GitHub Issues backends
#[derive(Parser, Debug)]
#[command(name = "taskdeck")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Run as if started in this directory
    #[arg(short = 'C', long, global = true)]
    pub dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Set up task storage for this repository
    Init {
        /// Storage mode (local, file)
        #[arg(short, long, value_parser = parse_mode)]
        mode: Option<ProviderMode>,

        /// GitHub repository to sync with (owner/repo)
        #[arg(long)]
        repo: Option<String>,
    },

    /// Add a new task
    Add {
        /// Task title
        title: String,

        /// Task description
        #[arg(short, long)]
        description: Option<String>,

        /// Priority (critical, high, medium, low, someday)
        #[arg(short, long, value_parser = parse_priority)]
        priority: Option<Priority>,

        /// Initial status
        #[arg(short, long, value_parser = parse_status)]
        status: Option<TaskStatus>,

        /// Effort estimate (low, medium, high)
        #[arg(long, value_parser = parse_level)]
        effort: Option<Level>,

        /// Value estimate (low, medium, high)
        #[arg(long, value_parser = parse_level)]
        value: Option<Level>,

        /// Category
        #[arg(short, long)]
        category: Option<String>,

        /// Tags (comma-separated)
        #[arg(short, long, value_delimiter = ',')]
        tags: Vec<String>,

        /// Acceptance criterion (repeatable)
        #[arg(short = 'a', long = "criterion")]
        criteria: Vec<String>,

        /// Free-form notes
        #[arg(long)]
        notes: Option<String>,
    },

    /// List tasks
    List {
        /// Filter by status
        #[arg(short, long, value_parser = parse_status)]
        status: Option<TaskStatus>,

        /// Filter by priority
        #[arg(short, long, value_parser = parse_priority)]
        priority: Option<Priority>,

        /// Filter by category
        #[arg(short, long)]
        category: Option<String>,

        /// Filter by tags (comma-separated)
        #[arg(short, long, value_delimiter = ',')]
        tags: Vec<String>,

        /// How many backlog tasks to mark as up next
        #[arg(long, default_value_t = 3)]
        up_next: usize,
    },

    /// Show task details
    Show {
        /// Task ID
        id: String,
    },

    /// Update task properties
    Update {
        /// Task ID
        id: String,

        /// New title
        #[arg(long)]
        title: Option<String>,

        /// New description
        #[arg(short, long)]
        description: Option<String>,

        /// New priority
        #[arg(short, long, value_parser = parse_priority)]
        priority: Option<Priority>,

        /// New effort estimate
        #[arg(long, value_parser = parse_level)]
        effort: Option<Level>,

        /// New value estimate
        #[arg(long, value_parser = parse_level)]
        value: Option<Level>,

        /// New category
        #[arg(short, long)]
        category: Option<String>,

        /// New tags (comma-separated, replaces existing)
        #[arg(short, long, value_delimiter = ',')]
        tags: Option<Vec<String>>,

        /// New acceptance criteria (repeatable, replaces existing)
        #[arg(short = 'a', long = "criterion")]
        criteria: Option<Vec<String>>,

        /// New notes
        #[arg(long)]
        notes: Option<String>,

        /// New position within the status column
        #[arg(long)]
        order: Option<i64>,
    },

    /// Change task status
    Status {
        /// Task ID
        id: String,

        /// New status (backlog, in_progress, review, ready_to_ship)
        #[arg(value_parser = parse_status)]
        status: TaskStatus,
    },

    /// Delete a task
    Delete {
        /// Task ID
        id: String,

        /// Skip confirmation
        #[arg(short, long)]
        force: bool,
    },

    /// Print all tasks as Markdown
    Export {
        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Import tasks from a Markdown file
    Import {
        /// Markdown file to read
        path: PathBuf,

        /// replace overwrites all tasks; merge adds new titles only
        #[arg(short, long, value_parser = parse_import_mode, default_value = "merge")]
        mode: ImportMode,
    },

    /// Move all tasks to another storage mode and switch to it
    Migrate {
        /// Target storage mode (local, file)
        #[arg(value_parser = parse_mode)]
        to: ProviderMode,

        /// Empty the old storage afterwards
        #[arg(long)]
        purge: bool,
    },

    /// Combine local and file storage into one, matching tasks by title
    Merge {
        /// Storage mode that receives the result (defaults to the active one)
        #[arg(long, value_parser = parse_mode)]
        into: Option<ProviderMode>,
    },

    /// Synchronize tasks with GitHub Issues
    Sync {
        /// Settle every conflict by keeping one side (local, remote)
        #[arg(long, value_parser = parse_resolution)]
        resolve: Option<Resolution>,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show or change settings
    Config {
        #[command(subcommand)]
        action: ConfigCommand,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print the effective settings
    Show,

    /// Store the GitHub token for this user
    SetToken {
        token: String,
    },

    /// Link this project to a GitHub repository (owner/repo)
    SetRepo {
        repo: String,
    },

    /// Use a self-hosted API base URL; omit to reset to github.com
    SetApiUrl {
        url: Option<String>,
    },
}

fn parse_status(s: &str) -> Result<TaskStatus, String> {
    s.parse()
}

fn parse_priority(s: &str) -> Result<Priority, String> {
    s.parse()
}

fn parse_level(s: &str) -> Result<Level, String> {
    s.parse()
}

fn parse_mode(s: &str) -> Result<ProviderMode, String> {
    s.parse()
}

fn parse_import_mode(s: &str) -> Result<ImportMode, String> {
    s.parse()
}

fn parse_resolution(s: &str) -> Result<Resolution, String> {
    s.parse()
}
