//! Settings management for the CLI `set`/`unset` commands.
//!
//! Each config key is served by a [`SettingHandler`]. Handlers are data
//! driven, one per value shape:
//!
//! - Boolean switches (`auto-load`, `use-gpu`, `flash-attn`)
//! - Numbers with an upper bound (`gpu-layers`, `server-port`, ...)
//! - Free text and paths (`models-dir`, `last-model`, `server-host`, ...)

pub mod error;
pub mod handlers;
pub mod helpers;
pub mod registry;

pub use error::SettingError;
pub use registry::SettingRegistry;

use crate::core::config::{Config, ConfigOrchestrator};

/// Context provided to setting handlers during set/unset operations.
pub struct SetContext<'a> {
    pub config: &'a ConfigOrchestrator,
}

/// Trait for handling a configuration setting.
pub trait SettingHandler: Send + Sync {
    /// Returns the configuration key this handler manages.
    fn key(&self) -> &'static str;

    /// Set the value from the words following the key.
    ///
    /// # Returns
    /// A success message to display, or an error.
    fn set(&self, args: &[String], ctx: &SetContext<'_>) -> Result<String, SettingError>;

    /// Reset the value to its default.
    fn unset(&self, ctx: &SetContext<'_>) -> Result<String, SettingError>;

    /// Format the current value for display in `confab set` output.
    fn format(&self, config: &Config) -> String;
}
