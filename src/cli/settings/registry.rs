//! Registry of setting handlers.

use std::collections::HashMap;

use super::handlers::{boolean, number, text};
use super::SettingHandler;

/// Registry of all available setting handlers.
pub struct SettingRegistry {
    handlers: HashMap<&'static str, Box<dyn SettingHandler>>,
    /// Keys in display order for `confab set` output.
    display_order: Vec<&'static str>,
}

impl SettingRegistry {
    /// Create a new registry with all handlers registered.
    pub fn new() -> Self {
        let mut registry = Self {
            handlers: HashMap::new(),
            display_order: Vec::new(),
        };

        // Register handlers in display order
        registry.register(Box::new(text::data_dir_handler()));
        registry.register(Box::new(text::models_dir_handler()));
        registry.register(Box::new(text::last_model_handler()));
        registry.register(Box::new(boolean::auto_load_handler()));
        registry.register(Box::new(boolean::use_gpu_handler()));
        registry.register(Box::new(number::gpu_layers_handler()));
        registry.register(Box::new(number::context_size_handler()));
        registry.register(Box::new(number::batch_size_handler()));
        registry.register(Box::new(boolean::flash_attn_handler()));
        registry.register(Box::new(text::server_host_handler()));
        registry.register(Box::new(number::server_port_handler()));
        registry.register(Box::new(number::startup_timeout_handler()));
        registry.register(Box::new(text::server_binary_handler()));

        registry
    }

    fn register(&mut self, handler: Box<dyn SettingHandler>) {
        let key = handler.key();
        self.display_order.push(key);
        self.handlers.insert(key, handler);
    }

    /// Get a handler by key.
    pub fn get(&self, key: &str) -> Option<&dyn SettingHandler> {
        self.handlers.get(key).map(|h| h.as_ref())
    }

    /// Get all keys in display order.
    pub fn keys_display_order(&self) -> &[&'static str] {
        &self.display_order
    }
}

impl Default for SettingRegistry {
    fn default() -> Self {
        Self::new()
    }
}
