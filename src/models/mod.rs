//! Data models for taskdeck

pub mod markdown;
pub mod task;

pub use markdown::{parse_tasks, serialize_tasks};
pub use task::{Level, Priority, SyncStatus, Task, TaskDraft, TaskPatch, TaskStatus};
