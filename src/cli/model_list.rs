//! Model listing functionality
//!
//! Lists the `.gguf` files llama-server can be started with.

use std::error::Error;

use crate::core::config::data::path_display;
use crate::core::config::ConfigOrchestrator;
use crate::core::models::{format_size, list_models as scan_models};

pub fn list_models(config: &ConfigOrchestrator) -> Result<(), Box<dyn Error>> {
    let config = config.load_with_cache()?;
    let dir = config.resolved_models_dir()?;
    let models = scan_models(&dir)?;

    println!("🤖 Models in {}", path_display(&dir));
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!();

    if models.is_empty() {
        println!("No .gguf files found. Download a model into the directory above,");
        println!("or point confab elsewhere with: confab set models-dir <path>");
        return Ok(());
    }

    let last = config.last_model.as_deref();
    for model in &models {
        let marker = if Some(model.name.as_str()) == last {
            " (last used)"
        } else {
            ""
        };
        println!("  • {}  {}{marker}", model.name, format_size(model.size_bytes));
    }
    println!();
    println!("💡 Start one with: confab serve <model>");
    Ok(())
}
