//! Error types for settings operations.

use thiserror::Error;

use crate::core::config::ConfigError;

/// Errors that can occur when modifying configuration settings.
#[derive(Debug, Error)]
pub enum SettingError {
    /// The provided setting key is not recognized.
    #[error("Unknown config key: {0}")]
    UnknownKey(String),
    /// The provided value could not be parsed as a boolean.
    #[error("Invalid boolean value: {0}")]
    InvalidBoolean(String),
    #[error("Invalid value for {key}: {input} (expected a whole number up to {max})")]
    InvalidNumber {
        key: &'static str,
        input: String,
        max: u64,
    },
    /// Required arguments are missing.
    #[error("{hint}")]
    MissingArgs {
        hint: &'static str,
        example: &'static str,
    },
    /// An error occurred while persisting the configuration.
    #[error("Failed to save configuration: {0}")]
    Config(#[from] ConfigError),
}

impl SettingError {
    /// Print the error message to stderr with appropriate formatting.
    pub fn print(&self) {
        match self {
            SettingError::UnknownKey(key) => {
                eprintln!("❌ Unknown config key: {key}");
                eprintln!("   Run 'confab set' to list the available keys.");
            }
            SettingError::InvalidBoolean(input) => {
                eprintln!("❌ Invalid boolean value: {input}");
                eprintln!("   Use 'on' or 'off' (also accepts true/false, yes/no)");
            }
            SettingError::MissingArgs { hint, example } => {
                eprintln!("⚠️  {hint}");
                eprintln!("Example: {example}");
            }
            other => eprintln!("❌ {other}"),
        }
    }
}
