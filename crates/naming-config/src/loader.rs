//! Layered configuration loader.
//!
//! Precedence, lowest to highest: built-in defaults, user config
//! (`~/.config/naming/config.toml`), project config (`naming.toml`),
//! local project overrides (`naming.local.toml`), environment variables
//! prefixed `NAMING_`.

use std::path::{Path, PathBuf};

use config::{Config, Environment, File, FileFormat};

use crate::paths::Paths;
use crate::{ConfigError, NamingConfig};

/// Builds a [`NamingConfig`] from the layered sources.
pub struct ConfigLoader {
    project_dir: Option<PathBuf>,
    paths: Paths,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            project_dir: None,
            paths: Paths::new(),
        }
    }

    /// Sets the project directory searched for `naming.toml` and
    /// `naming.local.toml`. Defaults to the current working directory.
    pub fn with_project_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.project_dir = Some(dir.into());
        self
    }

    pub fn load(self) -> Result<NamingConfig, ConfigError> {
        let project_dir = match self.project_dir {
            Some(dir) => dir,
            None => std::env::current_dir()?,
        };

        let mut builder = Config::builder();

        builder = builder.add_source(Config::try_from(&NamingConfig::default())?);

        if let Ok(user_config) = self.paths.user_config_file() {
            builder = builder.add_source(optional_file(&user_config));
        }

        builder = builder.add_source(optional_file(&Paths::project_config_file(&project_dir)));
        builder = builder.add_source(optional_file(&Paths::local_config_file(&project_dir)));

        builder = builder.add_source(
            Environment::with_prefix("NAMING")
                .separator("_")
                .try_parsing(true),
        );

        let config = builder.build()?;
        Ok(config.try_deserialize()?)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn optional_file(path: &Path) -> File<config::FileSourceFile, FileFormat> {
    File::new(path.to_string_lossy().as_ref(), FileFormat::Toml).required(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn defaults_when_no_files_present() {
        let dir = tempdir().unwrap();
        let cfg = ConfigLoader::new()
            .with_project_dir(dir.path())
            .load()
            .unwrap();
        assert_eq!(cfg.server.heartbeat_timeout_ms, 15_000);
        assert!(cfg.server.health_check_enabled);
    }

    #[test]
    fn project_config_overrides_defaults() {
        let dir = tempdir().unwrap();
        fs::write(
            Paths::project_config_file(dir.path()),
            "[server]\nheartbeat_timeout_ms = 9000\n",
        )
        .unwrap();

        let cfg = ConfigLoader::new()
            .with_project_dir(dir.path())
            .load()
            .unwrap();
        assert_eq!(cfg.server.heartbeat_timeout_ms, 9000);
    }

    #[test]
    fn local_config_overrides_project_config() {
        let dir = tempdir().unwrap();
        fs::write(
            Paths::project_config_file(dir.path()),
            "[server]\nheartbeat_timeout_ms = 9000\n",
        )
        .unwrap();
        fs::write(
            Paths::local_config_file(dir.path()),
            "[server]\nheartbeat_timeout_ms = 4000\n",
        )
        .unwrap();

        let cfg = ConfigLoader::new()
            .with_project_dir(dir.path())
            .load()
            .unwrap();
        assert_eq!(cfg.server.heartbeat_timeout_ms, 4000);
    }

    #[test]
    fn env_var_overrides_everything() {
        let dir = tempdir().unwrap();
        fs::write(
            Paths::project_config_file(dir.path()),
            "[server]\nheartbeat_timeout_ms = 9000\n",
        )
        .unwrap();

        std::env::set_var("NAMING_SERVER_HEARTBEAT_TIMEOUT_MS", "1234");
        let cfg = ConfigLoader::new()
            .with_project_dir(dir.path())
            .load()
            .unwrap();
        std::env::remove_var("NAMING_SERVER_HEARTBEAT_TIMEOUT_MS");

        assert_eq!(cfg.server.heartbeat_timeout_ms, 1234);
    }
}
