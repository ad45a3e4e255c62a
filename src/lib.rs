//! taskdeck - a task board with pluggable storage and GitHub Issues sync
//!
//! Tasks live behind a [`storage::TaskProvider`]: either a local key/value
//! store or a hand-editable Markdown file. The [`sync`] module reconciles
//! either backend with a repository's issues.

pub mod cli;
pub mod config;
pub mod git;
pub mod migrate;
pub mod models;
pub mod storage;
pub mod sync;

pub use config::ConfigStore;
pub use models::{Priority, Task, TaskDraft, TaskPatch, TaskStatus};
pub use storage::{Provider, ProviderError, ProviderMode, TaskProvider};
