//! Project root detection and per-project paths

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Per-project settings directory
const PROJECT_DIR: &str = ".taskdeck";

/// Default Markdown file used by the file provider
const TASKS_FILE: &str = "TASKS.md";

/// Errors related to locating a project
#[derive(Debug, Error)]
pub enum TaskLocationError {
    #[error("Not in a git repository")]
    NotInGitRepo,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Where a project's tasks and settings live
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectLocation {
    /// The repository root (the directory containing .git)
    pub root: PathBuf,
}

impl ProjectLocation {
    /// Find the project enclosing the current directory
    pub fn find_project() -> Result<Self, TaskLocationError> {
        let current = std::env::current_dir()?;
        Self::find_project_from(&current)
    }

    /// Find the project enclosing `start` by walking up to a `.git` entry
    pub fn find_project_from(start: &Path) -> Result<Self, TaskLocationError> {
        let mut current = start.to_path_buf();
        loop {
            if current.join(".git").exists() {
                return Ok(ProjectLocation { root: current });
            }

            if !current.pop() {
                return Err(TaskLocationError::NotInGitRepo);
            }
        }
    }

    /// Use `root` as the project root without searching
    pub fn at(root: impl Into<PathBuf>) -> Self {
        ProjectLocation { root: root.into() }
    }

    /// The `.taskdeck` settings directory
    pub fn project_dir(&self) -> PathBuf {
        self.root.join(PROJECT_DIR)
    }

    /// Project-scoped configuration file
    pub fn config_file(&self) -> PathBuf {
        self.project_dir().join("config.yaml")
    }

    /// Default Markdown file for the file provider
    pub fn default_tasks_file(&self) -> PathBuf {
        self.root.join(TASKS_FILE)
    }

    /// Resolve a configured path relative to the project root
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    /// Fallback repository identifier: the canonical root path
    pub fn path_identifier(&self) -> String {
        self.root
            .canonicalize()
            .unwrap_or_else(|_| self.root.clone())
            .to_string_lossy()
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_find_project_from_git_root() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir(temp.path().join(".git")).unwrap();

        let loc = ProjectLocation::find_project_from(temp.path()).unwrap();
        assert_eq!(loc.root, temp.path());
        assert_eq!(loc.default_tasks_file(), temp.path().join("TASKS.md"));
        assert_eq!(
            loc.config_file(),
            temp.path().join(".taskdeck").join("config.yaml")
        );
    }

    #[test]
    fn test_find_project_from_subdirectory() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir(temp.path().join(".git")).unwrap();
        let subdir = temp.path().join("src").join("nested");
        std::fs::create_dir_all(&subdir).unwrap();

        let loc = ProjectLocation::find_project_from(&subdir).unwrap();
        assert_eq!(loc.root, temp.path());
    }

    #[test]
    fn test_find_project_no_git() {
        let temp = TempDir::new().unwrap();
        assert!(ProjectLocation::find_project_from(temp.path()).is_err());
    }

    #[test]
    fn test_resolve_relative_and_absolute() {
        let loc = ProjectLocation::at("/work/repo");
        assert_eq!(
            loc.resolve(Path::new("docs/TASKS.md")),
            PathBuf::from("/work/repo/docs/TASKS.md")
        );
        assert_eq!(loc.resolve(Path::new("/tmp/x.md")), PathBuf::from("/tmp/x.md"));
    }
}
