//! Bounded whole-number settings.

use crate::cli::settings::error::SettingError;
use crate::cli::settings::helpers::{mutate_config, success_set};
use crate::cli::settings::{SetContext, SettingHandler};
use crate::core::config::defaults::{
    DEFAULT_BATCH_SIZE, DEFAULT_CONTEXT_SIZE, DEFAULT_GPU_LAYERS, DEFAULT_SERVER_PORT,
    DEFAULT_STARTUP_TIMEOUT_SECS,
};
use crate::core::config::Config;

pub struct NumberHandler {
    key: &'static str,
    hint: &'static str,
    example: &'static str,
    min: u64,
    max: u64,
    default: u64,
    get: fn(&Config) -> Option<u64>,
    set_field: fn(&mut Config, Option<u64>),
}

impl NumberHandler {
    fn parse(&self, input: &str) -> Result<u64, SettingError> {
        input
            .trim()
            .parse::<u64>()
            .ok()
            .filter(|value| (self.min..=self.max).contains(value))
            .ok_or_else(|| SettingError::InvalidNumber {
                key: self.key,
                input: input.to_string(),
                max: self.max,
            })
    }
}

impl SettingHandler for NumberHandler {
    fn key(&self) -> &'static str {
        self.key
    }

    fn set(&self, args: &[String], ctx: &SetContext<'_>) -> Result<String, SettingError> {
        let Some(input) = args.first() else {
            return Err(SettingError::MissingArgs {
                hint: self.hint,
                example: self.example,
            });
        };
        let value = self.parse(input)?;
        let set_field = self.set_field;
        mutate_config(ctx.config, move |config| set_field(config, Some(value)))?;
        Ok(success_set(self.key, &value.to_string()))
    }

    fn unset(&self, ctx: &SetContext<'_>) -> Result<String, SettingError> {
        let set_field = self.set_field;
        mutate_config(ctx.config, move |config| set_field(config, None))?;
        Ok(format!(
            "✅ Unset {} (will use default: {})",
            self.key, self.default
        ))
    }

    fn format(&self, config: &Config) -> String {
        match (self.get)(config) {
            Some(value) => format!("  {}: {value}", self.key),
            None => format!("  {}: (unset, default: {})", self.key, self.default),
        }
    }
}

pub fn gpu_layers_handler() -> NumberHandler {
    NumberHandler {
        key: "gpu-layers",
        hint: "To choose how many layers go to the GPU, give a count:",
        example: "confab set gpu-layers 33",
        min: 0,
        max: u32::MAX as u64,
        default: DEFAULT_GPU_LAYERS as u64,
        get: |c| c.gpu_layers.map(u64::from),
        set_field: |c, v| c.gpu_layers = v.map(|v| v as u32),
    }
}

pub fn context_size_handler() -> NumberHandler {
    NumberHandler {
        key: "context-size",
        hint: "To set the server context window, give a token count:",
        example: "confab set context-size 8192",
        min: 0,
        max: u32::MAX as u64,
        default: DEFAULT_CONTEXT_SIZE as u64,
        get: |c| c.context_size.map(u64::from),
        set_field: |c, v| c.context_size = v.map(|v| v as u32),
    }
}

pub fn batch_size_handler() -> NumberHandler {
    NumberHandler {
        key: "batch-size",
        hint: "To set the prompt batch size, give a token count:",
        example: "confab set batch-size 1024",
        min: 1,
        max: u32::MAX as u64,
        default: DEFAULT_BATCH_SIZE as u64,
        get: |c| c.batch_size.map(u64::from),
        set_field: |c, v| c.batch_size = v.map(|v| v as u32),
    }
}

pub fn server_port_handler() -> NumberHandler {
    NumberHandler {
        key: "server-port",
        hint: "To change the port llama-server listens on, give a port number:",
        example: "confab set server-port 8081",
        min: 1,
        max: u16::MAX as u64,
        default: DEFAULT_SERVER_PORT as u64,
        get: |c| c.server_port.map(u64::from),
        set_field: |c, v| c.server_port = v.map(|v| v as u16),
    }
}

pub fn startup_timeout_handler() -> NumberHandler {
    NumberHandler {
        key: "startup-timeout",
        hint: "To change how long to wait for the model to load, give seconds:",
        example: "confab set startup-timeout 300",
        min: 1,
        max: 24 * 60 * 60,
        default: DEFAULT_STARTUP_TIMEOUT_SECS,
        get: |c| c.startup_timeout_secs,
        set_field: |c, v| c.startup_timeout_secs = v,
    }
}
