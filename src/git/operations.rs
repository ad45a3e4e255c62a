//! Repository identity derived from git metadata

use git2::Repository;
use std::path::Path;
use thiserror::Error;

/// Errors related to git operations
#[derive(Debug, Error)]
pub enum GitError {
    #[error("Git error: {0}")]
    Git(#[from] git2::Error),
    #[error("Not in a git repository")]
    NotInRepo,
    #[error("Remote '{0}' has no URL")]
    NoRemoteUrl(String),
}

/// Name of the remote used to identify a repository
const DEFAULT_REMOTE: &str = "origin";

/// Git operations helper
pub struct GitOperations;

impl GitOperations {
    /// Get the root directory of the git repository
    pub fn repo_root(path: &Path) -> Result<std::path::PathBuf, GitError> {
        let repo = Repository::discover(path)?;
        repo.workdir()
            .map(|p| p.to_path_buf())
            .ok_or(GitError::NotInRepo)
    }

    /// URL of the `origin` remote
    pub fn origin_url(path: &Path) -> Result<String, GitError> {
        let repo = Repository::discover(path)?;
        let remote = repo.find_remote(DEFAULT_REMOTE)?;
        remote
            .url()
            .map(str::to_string)
            .ok_or_else(|| GitError::NoRemoteUrl(DEFAULT_REMOTE.to_string()))
    }

    /// Identifier used to key per-project storage
    ///
    /// Prefers the origin URL so clones of the same repository share an
    /// identity; falls back to the repository root path.
    pub fn repo_identifier(path: &Path) -> Result<String, GitError> {
        if let Ok(url) = Self::origin_url(path) {
            return Ok(url);
        }
        let root = Self::repo_root(path)?;
        Ok(root.to_string_lossy().to_string())
    }

    /// `owner/repo` of the origin remote, if it points at a GitHub-style host
    pub fn github_repo(path: &Path) -> Option<String> {
        Self::origin_url(path)
            .ok()
            .and_then(|url| parse_owner_repo(&url))
    }
}

/// Extract `owner/repo` from an HTTPS or SCP-style remote URL
pub fn parse_owner_repo(url: &str) -> Option<String> {
    let url = url.trim().trim_end_matches('/');
    let url = url.strip_suffix(".git").unwrap_or(url);

    let path = if let Some((_, rest)) = url.split_once("://") {
        rest.split_once('/')?.1
    } else {
        url.split_once(':')?.1
    };

    let mut parts = path.rsplitn(3, '/');
    let repo = parts.next()?;
    let owner = parts.next()?;
    if owner.is_empty() || repo.is_empty() {
        return None;
    }
    Some(format!("{}/{}", owner, repo))
}
