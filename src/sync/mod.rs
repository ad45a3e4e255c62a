pub mod engine;
pub mod github;
pub mod issue;

pub use engine::{
    Conflict, ConflictType, PulledItem, PushedItem, Resolution, SyncEngine, SyncError,
    SyncOperation, SyncPassError, SyncResult,
};
pub use github::{GitHubClient, IssueTracker, LabelDraft, RemoteError, RemoteResult};
pub use issue::{IssueDraft, IssueState, MANAGED_LABEL, RemoteIssue, RemoteLabel};
