use crate::core::config::data::Config;
use crate::core::config::io::ConfigError;
use crate::utils::url::server_base_url;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_GPU_LAYERS: u32 = 128;
pub const DEFAULT_CONTEXT_SIZE: u32 = 4096;
pub const DEFAULT_BATCH_SIZE: u32 = 512;
pub const DEFAULT_SERVER_HOST: &str = "127.0.0.1";
pub const DEFAULT_SERVER_PORT: u16 = 8080;
pub const DEFAULT_STARTUP_TIMEOUT_SECS: u64 = 120;

impl Config {
    pub fn resolved_data_dir(&self) -> Result<PathBuf, ConfigError> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => Config::default_data_dir(),
        }
    }

    pub fn resolved_models_dir(&self) -> Result<PathBuf, ConfigError> {
        match &self.models_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(self.resolved_data_dir()?.join("models")),
        }
    }

    pub fn server_log_path(&self) -> Result<PathBuf, ConfigError> {
        Ok(self.resolved_data_dir()?.join("llama-server.log"))
    }

    pub fn gpu_layers(&self) -> u32 {
        self.gpu_layers.unwrap_or(DEFAULT_GPU_LAYERS)
    }

    pub fn context_size(&self) -> u32 {
        self.context_size.unwrap_or(DEFAULT_CONTEXT_SIZE)
    }

    pub fn batch_size(&self) -> u32 {
        self.batch_size.unwrap_or(DEFAULT_BATCH_SIZE)
    }

    pub fn server_host(&self) -> &str {
        self.server_host.as_deref().unwrap_or(DEFAULT_SERVER_HOST)
    }

    pub fn server_port(&self) -> u16 {
        self.server_port.unwrap_or(DEFAULT_SERVER_PORT)
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(
            self.startup_timeout_secs
                .unwrap_or(DEFAULT_STARTUP_TIMEOUT_SECS),
        )
    }

    /// Base URL clients should use to reach the supervised server.
    pub fn server_url(&self) -> String {
        server_base_url(self.server_host(), self.server_port())
    }

    /// Create the data and models directories if they are missing.
    pub fn ensure_dirs(&self) -> Result<(), ConfigError> {
        for dir in [self.resolved_data_dir()?, self.resolved_models_dir()?] {
            fs::create_dir_all(&dir).map_err(|source| ConfigError::Write { path: dir, source })?;
        }
        Ok(())
    }
}
