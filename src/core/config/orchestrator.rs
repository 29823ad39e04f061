use crate::core::config::data::Config;
use crate::core::config::io::ConfigError;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

#[derive(Default)]
struct ConfigCacheState {
    config: Option<Config>,
    modified: Option<SystemTime>,
}

/// Shared handle to the config document.
///
/// Reads are served from memory until the file's mtime changes, so edits made
/// by another process (or by `confab set`) are picked up without a restart.
pub struct ConfigOrchestrator {
    path: PathBuf,
    state: Mutex<ConfigCacheState>,
}

impl ConfigOrchestrator {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            state: Mutex::new(ConfigCacheState::default()),
        }
    }

    /// Orchestrator over the platform default config location.
    pub fn from_default_location() -> Result<Self, ConfigError> {
        Ok(Self::new(Config::default_config_path()?))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load_with_cache(&self) -> Result<Config, ConfigError> {
        let mut state = self.lock_state();
        self.refresh(&mut state)
    }

    pub fn persist(&self, config: Config) -> Result<(), ConfigError> {
        config.save_to_path(&self.path)?;
        let mut state = self.lock_state();
        state.modified = Self::modified_time(&self.path);
        state.config = Some(config);
        Ok(())
    }

    /// Apply `mutator` to a fresh snapshot and write the result back.
    ///
    /// Nothing is written when the mutator fails.
    pub fn mutate<F, T, E>(&self, mutator: F) -> Result<T, E>
    where
        F: FnOnce(&mut Config) -> Result<T, E>,
        E: From<ConfigError>,
    {
        let mut working = {
            let mut state = self.lock_state();
            self.refresh(&mut state)?
        };

        let result = mutator(&mut working)?;
        self.persist(working)?;
        Ok(result)
    }

    fn refresh(&self, state: &mut ConfigCacheState) -> Result<Config, ConfigError> {
        let disk_modified = Self::modified_time(&self.path);
        if state.config.is_none() || state.modified != disk_modified {
            let config = Config::load_from_path(&self.path)?;
            state.modified = disk_modified;
            state.config = Some(config);
        }
        Ok(state.config.clone().unwrap_or_default())
    }

    fn lock_state(&self) -> MutexGuard<'_, ConfigCacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn modified_time(path: &Path) -> Option<SystemTime> {
        fs::metadata(path).ok()?.modified().ok()
    }
}
