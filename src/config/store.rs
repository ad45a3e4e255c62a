//! User- and project-scoped settings
//!
//! Settings are loaded once into a [`ConfigStore`], changed in memory, and
//! written back only by an explicit [`ConfigStore::save`].

use crate::storage::location::ProjectLocation;
use crate::storage::provider::ProviderMode;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Application directory under the platform config dir
const APP_DIR: &str = "taskdeck";

/// Errors related to configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to locate the user configuration directory")]
    NoConfigDirectory,
    #[error("No GitHub token configured. Run 'taskdeck config set-token <token>'.")]
    MissingToken,
    #[error("No GitHub repository configured. Run 'taskdeck config set-repo <owner/repo>'.")]
    MissingRepo,
    #[error("Invalid repository '{0}': expected owner/repo")]
    InvalidRepo(String),
    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    #[error("Failed to serialize configuration: {0}")]
    Serialize(#[from] serde_yaml::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Settings that follow the user across projects
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github_token: Option<String>,
    /// Base URL for self-hosted GitHub Enterprise instances
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
}

/// Settings stored inside a project
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectConfig {
    #[serde(default)]
    pub mode: ProviderMode,
    /// `owner/repo` of the linked issue tracker
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tasks_file: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_quota_bytes: Option<u64>,
}

/// Everything the sync engine needs to reach the remote tracker
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    pub token: String,
    /// `owner/repo`
    pub repo: String,
    pub api_url: Option<String>,
}

impl SyncConfig {
    /// Split `repo` into owner and name
    pub fn owner_repo(&self) -> Result<(&str, &str), ConfigError> {
        split_repo(&self.repo).ok_or_else(|| ConfigError::InvalidRepo(self.repo.clone()))
    }
}

fn split_repo(repo: &str) -> Option<(&str, &str)> {
    let (owner, name) = repo.split_once('/')?;
    if owner.is_empty() || name.is_empty() || name.contains('/') {
        return None;
    }
    Some((owner, name))
}

/// Loaded configuration for one user and one project
#[derive(Debug, Clone)]
pub struct ConfigStore {
    user_path: PathBuf,
    project_path: PathBuf,
    user: UserConfig,
    project: ProjectConfig,
}

impl ConfigStore {
    /// Load from the platform config dir and the project's `.taskdeck` dir
    pub fn load_default(location: &ProjectLocation) -> Result<Self, ConfigError> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::NoConfigDirectory)?;
        let user_path = config_dir.join(APP_DIR).join("config.yaml");
        Self::load(&user_path, &location.config_file())
    }

    /// Load both scopes from explicit paths; missing files yield defaults
    pub fn load(user_path: &Path, project_path: &Path) -> Result<Self, ConfigError> {
        Ok(ConfigStore {
            user_path: user_path.to_path_buf(),
            project_path: project_path.to_path_buf(),
            user: read_yaml(user_path)?,
            project: read_yaml(project_path)?,
        })
    }

    /// Write both scopes to disk
    pub fn save(&self) -> Result<(), ConfigError> {
        write_yaml(&self.user_path, &self.user)?;
        restrict_permissions(&self.user_path)?;
        write_yaml(&self.project_path, &self.project)?;
        log::debug!(
            "Saved configuration to {} and {}",
            self.user_path.display(),
            self.project_path.display()
        );
        Ok(())
    }

    pub fn user(&self) -> &UserConfig {
        &self.user
    }

    pub fn project(&self) -> &ProjectConfig {
        &self.project
    }

    pub fn mode(&self) -> ProviderMode {
        self.project.mode
    }

    pub fn set_mode(&mut self, mode: ProviderMode) {
        self.project.mode = mode;
    }

    pub fn set_token(&mut self, token: impl Into<String>) {
        let token = token.into();
        self.user.github_token = if token.trim().is_empty() {
            None
        } else {
            Some(token.trim().to_string())
        };
    }

    pub fn set_api_url(&mut self, url: Option<String>) {
        self.user.api_url = url.filter(|u| !u.trim().is_empty());
    }

    /// Set the linked `owner/repo`
    pub fn set_repo(&mut self, repo: &str) -> Result<(), ConfigError> {
        let repo = repo.trim();
        if split_repo(repo).is_none() {
            return Err(ConfigError::InvalidRepo(repo.to_string()));
        }
        self.project.repo = Some(repo.to_string());
        Ok(())
    }

    /// Settings for a sync pass, falling back to `default_repo` when the
    /// project has none configured
    pub fn sync_config(&self, default_repo: Option<String>) -> Result<SyncConfig, ConfigError> {
        let token = self
            .user
            .github_token
            .clone()
            .ok_or(ConfigError::MissingToken)?;
        let repo = self
            .project
            .repo
            .clone()
            .or(default_repo)
            .ok_or(ConfigError::MissingRepo)?;
        let config = SyncConfig {
            token,
            repo,
            api_url: self.user.api_url.clone(),
        };
        config.owner_repo()?;
        Ok(config)
    }
}

fn read_yaml<T: Default + for<'de> Deserialize<'de>>(path: &Path) -> Result<T, ConfigError> {
    if !path.exists() {
        return Ok(T::default());
    }
    let content = fs::read_to_string(path)?;
    if content.trim().is_empty() {
        return Ok(T::default());
    }
    serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn write_yaml<T: Serialize>(path: &Path, value: &T) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, serde_yaml::to_string(value)?)?;
    Ok(())
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}
