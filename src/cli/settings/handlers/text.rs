//! Free-text and path settings.

use std::path::PathBuf;

use crate::cli::settings::error::SettingError;
use crate::cli::settings::helpers::{mutate_config, success_set};
use crate::cli::settings::{SetContext, SettingHandler};
use crate::core::config::data::path_display;
use crate::core::config::defaults::DEFAULT_SERVER_HOST;
use crate::core::config::Config;

pub struct TextHandler {
    key: &'static str,
    hint: &'static str,
    example: &'static str,
    default_display: &'static str,
    get: fn(&Config) -> Option<String>,
    set_field: fn(&mut Config, Option<String>),
}

impl SettingHandler for TextHandler {
    fn key(&self) -> &'static str {
        self.key
    }

    fn set(&self, args: &[String], ctx: &SetContext<'_>) -> Result<String, SettingError> {
        let value = args.join(" ");
        if value.trim().is_empty() {
            return Err(SettingError::MissingArgs {
                hint: self.hint,
                example: self.example,
            });
        }
        let set_field = self.set_field;
        let stored = value.clone();
        mutate_config(ctx.config, move |config| set_field(config, Some(stored)))?;
        Ok(success_set(self.key, &value))
    }

    fn unset(&self, ctx: &SetContext<'_>) -> Result<String, SettingError> {
        let set_field = self.set_field;
        mutate_config(ctx.config, move |config| set_field(config, None))?;
        Ok(format!(
            "✅ Unset {} (will use default: {})",
            self.key, self.default_display
        ))
    }

    fn format(&self, config: &Config) -> String {
        match (self.get)(config) {
            Some(value) => format!("  {}: {value}", self.key),
            None => format!("  {}: (unset, default: {})", self.key, self.default_display),
        }
    }
}

pub fn data_dir_handler() -> TextHandler {
    TextHandler {
        key: "data-dir",
        hint: "To move application data, give a directory:",
        example: "confab set data-dir ~/confab",
        default_display: "platform data directory",
        get: |c| c.data_dir.as_ref().map(path_display),
        set_field: |c, v| c.data_dir = v.map(PathBuf::from),
    }
}

pub fn models_dir_handler() -> TextHandler {
    TextHandler {
        key: "models-dir",
        hint: "To choose where .gguf models are found, give a directory:",
        example: "confab set models-dir /srv/models",
        default_display: "<data-dir>/models",
        get: |c| c.models_dir.as_ref().map(path_display),
        set_field: |c, v| c.models_dir = v.map(PathBuf::from),
    }
}

pub fn last_model_handler() -> TextHandler {
    TextHandler {
        key: "last-model",
        hint: "To choose the model auto-load starts, give its file name:",
        example: "confab set last-model mistral-7b-instruct.Q4_K_M.gguf",
        default_display: "none",
        get: |c| c.last_model.clone(),
        set_field: |c, v| c.last_model = v,
    }
}

pub fn server_host_handler() -> TextHandler {
    TextHandler {
        key: "server-host",
        hint: "To change the address llama-server binds to, give a host:",
        example: "confab set server-host 0.0.0.0",
        default_display: DEFAULT_SERVER_HOST,
        get: |c| c.server_host.clone(),
        set_field: |c, v| c.server_host = v,
    }
}

pub fn server_binary_handler() -> TextHandler {
    TextHandler {
        key: "server-binary",
        hint: "To use a specific llama-server build, give its path:",
        example: "confab set server-binary /usr/local/bin/llama-server",
        default_display: "llama-server next to the confab executable",
        get: |c| c.server_binary.as_ref().map(path_display),
        set_field: |c, v| c.server_binary = v.map(PathBuf::from),
    }
}
