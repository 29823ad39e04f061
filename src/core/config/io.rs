use crate::core::config::data::{path_display, Config};
use directories::ProjectDirs;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;

/// Errors that can occur when loading or saving configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("Failed to read config at {}: {source}", path_display(.path))]
    Read {
        /// Path to the configuration file that could not be read.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the configuration file as valid TOML.
    #[error("Failed to parse config at {}: {source}", path_display(.path))]
    Parse {
        /// Path to the configuration file with invalid TOML.
        path: PathBuf,
        /// The TOML deserialization error.
        source: toml::de::Error,
    },

    /// Failed to write the configuration file or one of its directories.
    #[error("Failed to write {}: {source}", path_display(.path))]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Could not determine the platform configuration directories")]
    NoProjectDirs,
}

fn project_dirs() -> Result<ProjectDirs, ConfigError> {
    ProjectDirs::from("org", "confab", "confab").ok_or(ConfigError::NoProjectDirs)
}

impl Config {
    pub fn load_from_path(config_path: &Path) -> Result<Config, ConfigError> {
        if !config_path.exists() {
            return Ok(Config::default());
        }

        let contents = fs::read_to_string(config_path).map_err(|source| ConfigError::Read {
            path: config_path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: config_path.to_path_buf(),
            source,
        })
    }

    pub(crate) fn save_to_path(&self, config_path: &Path) -> Result<(), ConfigError> {
        let write_err = |source| ConfigError::Write {
            path: config_path.to_path_buf(),
            source,
        };
        let parent = config_path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty());

        if let Some(dir) = parent {
            fs::create_dir_all(dir).map_err(write_err)?;
        }

        let contents = toml::to_string_pretty(self)?;
        let mut temp_file = match parent {
            Some(dir) => NamedTempFile::new_in(dir),
            None => NamedTempFile::new(),
        }
        .map_err(write_err)?;

        temp_file.write_all(contents.as_bytes()).map_err(write_err)?;
        temp_file.as_file_mut().sync_all().map_err(write_err)?;
        temp_file
            .persist(config_path)
            .map_err(|err| write_err(err.error))?;
        Ok(())
    }

    pub fn default_config_path() -> Result<PathBuf, ConfigError> {
        Ok(project_dirs()?.config_dir().join("config.toml"))
    }

    pub(crate) fn default_data_dir() -> Result<PathBuf, ConfigError> {
        Ok(project_dirs()?.data_dir().to_path_buf())
    }
}
