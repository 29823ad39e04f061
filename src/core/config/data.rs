use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// On-disk settings document.
///
/// Every field is optional in TOML so that a hand-written file only needs the
/// keys the user actually cares about; accessors in `defaults.rs` fill in the
/// rest.
#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
pub struct Config {
    /// Root for application data such as the inference server log
    pub data_dir: Option<PathBuf>,
    /// Directory scanned for `.gguf` model files (defaults to `<data_dir>/models`)
    pub models_dir: Option<PathBuf>,
    /// Model file name of the last successful load, used for autoload
    pub last_model: Option<String>,
    /// Start `last_model` automatically on startup
    #[serde(default)]
    pub auto_load: bool,
    /// Offload layers to the GPU when launching the server
    #[serde(default)]
    pub use_gpu: bool,
    pub gpu_layers: Option<u32>,
    pub context_size: Option<u32>,
    pub batch_size: Option<u32>,
    #[serde(default)]
    pub flash_attn: bool,
    pub server_host: Option<String>,
    pub server_port: Option<u16>,
    /// Seconds to wait for the server to report readiness
    pub startup_timeout_secs: Option<u64>,
    /// Explicit path to the `llama-server` binary; resolved next to the
    /// running executable when unset
    pub server_binary: Option<PathBuf>,
}

/// Get a user-friendly display string for a path
/// Converts absolute paths to use ~ notation on Unix-like systems when possible
///
/// # Examples
/// - Unix: `/home/user/.local/share/confab/models` → `~/.local/share/confab/models`
/// - Windows: `C:\\Users\\user\\AppData\\Roaming\\confab\\data` is shown unchanged
pub fn path_display<P: AsRef<Path>>(path: P) -> String {
    let path = path.as_ref();

    #[cfg(unix)]
    {
        if let Some(home) = std::env::var_os("HOME") {
            let home_path = PathBuf::from(home);
            if let Ok(relative) = path.strip_prefix(&home_path) {
                return format!("~/{}", relative.display());
            }
        }
    }

    path.display().to_string()
}

impl Config {
    /// Record a successful model load so `auto_load` can pick it up next time.
    pub fn remember_model(&mut self, model_file: &str) {
        self.last_model = Some(model_file.to_string());
    }

    pub fn autoload_target(&self) -> Option<&str> {
        if !self.auto_load {
            return None;
        }
        self.last_model.as_deref().filter(|name| !name.is_empty())
    }
}
