//! Git integration

pub mod operations;

pub use operations::{GitError, GitOperations, parse_owner_repo};
