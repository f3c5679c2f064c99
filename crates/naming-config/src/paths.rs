//! XDG-compliant path discovery for the naming service.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;

use crate::ConfigError;

/// XDG-compliant paths for the naming service.
pub struct Paths {
    project_dirs: Option<ProjectDirs>,
}

impl Paths {
    pub fn new() -> Self {
        Self {
            project_dirs: ProjectDirs::from("dev", "naming", "naming"),
        }
    }

    /// `~/.config/naming/`
    pub fn user_config_dir(&self) -> Result<PathBuf, ConfigError> {
        self.project_dirs
            .as_ref()
            .map(|p| p.config_dir().to_path_buf())
            .ok_or_else(|| ConfigError::Xdg("failed to determine user config directory".to_string()))
    }

    /// `~/.config/naming/config.toml`
    pub fn user_config_file(&self) -> Result<PathBuf, ConfigError> {
        Ok(self.user_config_dir()?.join("config.toml"))
    }

    /// `~/.cache/naming/` -- default root for the client disk cache (§4.J).
    pub fn user_cache_dir(&self) -> Result<PathBuf, ConfigError> {
        self.project_dirs
            .as_ref()
            .map(|p| p.cache_dir().to_path_buf())
            .ok_or_else(|| ConfigError::Xdg("failed to determine user cache directory".to_string()))
    }

    /// `<project_dir>/naming.toml`, the git-tracked project config.
    pub fn project_config_file(project_dir: impl AsRef<Path>) -> PathBuf {
        project_dir.as_ref().join("naming.toml")
    }

    /// `<project_dir>/naming.local.toml`, gitignored local overrides.
    pub fn local_config_file(project_dir: impl AsRef<Path>) -> PathBuf {
        project_dir.as_ref().join("naming.local.toml")
    }

    /// `<cache_dir>/failover/`, the failover-reactor snapshot directory.
    pub fn failover_dir(cache_dir: impl AsRef<Path>) -> PathBuf {
        cache_dir.as_ref().join("failover")
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self::new()
    }
}
