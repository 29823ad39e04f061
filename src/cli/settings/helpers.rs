//! Helper functions for settings operations.

use crate::core::config::{Config, ConfigError, ConfigOrchestrator};

use super::error::SettingError;

/// Apply `f` through [`ConfigOrchestrator::mutate`] and persist the result.
pub fn mutate_config<F>(orchestrator: &ConfigOrchestrator, f: F) -> Result<(), SettingError>
where
    F: FnOnce(&mut Config),
{
    orchestrator.mutate(|config| {
        f(config);
        Ok::<_, ConfigError>(())
    })?;
    Ok(())
}

/// Parse a boolean value from user input.
///
/// Accepts: on/off, true/false, yes/no (case-insensitive).
pub fn parse_bool(input: &str) -> Option<bool> {
    match input.to_lowercase().as_str() {
        "on" | "true" | "yes" | "1" => Some(true),
        "off" | "false" | "no" | "0" => Some(false),
        _ => None,
    }
}

/// Format a boolean value for display.
pub fn format_bool(value: bool) -> &'static str {
    if value {
        "on"
    } else {
        "off"
    }
}

pub fn success_set(key: &str, display: &str) -> String {
    format!("✅ Set {key} to: {display}")
}
