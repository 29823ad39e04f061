//! Boolean setting handlers for on/off settings.

use crate::cli::settings::error::SettingError;
use crate::cli::settings::helpers::{format_bool, mutate_config, parse_bool, success_set};
use crate::cli::settings::{SetContext, SettingHandler};
use crate::core::config::Config;

/// Data-driven handler for boolean (on/off) settings. Unsetting turns the
/// switch off.
pub struct BooleanHandler {
    key: &'static str,
    hint: &'static str,
    example: &'static str,
    get: fn(&Config) -> bool,
    set_field: fn(&mut Config, bool),
}

impl SettingHandler for BooleanHandler {
    fn key(&self) -> &'static str {
        self.key
    }

    fn set(&self, args: &[String], ctx: &SetContext<'_>) -> Result<String, SettingError> {
        if args.is_empty() {
            return Err(SettingError::MissingArgs {
                hint: self.hint,
                example: self.example,
            });
        }

        let input = args.join(" ");
        let value = parse_bool(&input).ok_or(SettingError::InvalidBoolean(input))?;
        let set_field = self.set_field;
        mutate_config(ctx.config, move |config| set_field(config, value))?;

        Ok(success_set(self.key, format_bool(value)))
    }

    fn unset(&self, ctx: &SetContext<'_>) -> Result<String, SettingError> {
        let set_field = self.set_field;
        mutate_config(ctx.config, move |config| set_field(config, false))?;
        Ok(format!("✅ Unset {} (will use default: off)", self.key))
    }

    fn format(&self, config: &Config) -> String {
        format!("  {}: {}", self.key, format_bool((self.get)(config)))
    }
}

pub fn auto_load_handler() -> BooleanHandler {
    BooleanHandler {
        key: "auto-load",
        hint: "To load the last model on startup, specify on or off:",
        example: "confab set auto-load on",
        get: |c| c.auto_load,
        set_field: |c, v| c.auto_load = v,
    }
}

pub fn use_gpu_handler() -> BooleanHandler {
    BooleanHandler {
        key: "use-gpu",
        hint: "To offload model layers to the GPU, specify on or off:",
        example: "confab set use-gpu on",
        get: |c| c.use_gpu,
        set_field: |c, v| c.use_gpu = v,
    }
}

pub fn flash_attn_handler() -> BooleanHandler {
    BooleanHandler {
        key: "flash-attn",
        hint: "To enable flash attention, specify on or off:",
        example: "confab set flash-attn on",
        get: |c| c.flash_attn,
        set_field: |c, v| c.flash_attn = v,
    }
}
