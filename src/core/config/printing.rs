use crate::core::config::data::{path_display, Config};

fn on_off(value: bool) -> &'static str {
    if value {
        "on"
    } else {
        "off"
    }
}

impl Config {
    pub fn print_all(&self) {
        println!("Current configuration:");
        match self.resolved_models_dir() {
            Ok(dir) => println!("  models-dir: {}", path_display(dir)),
            Err(err) => println!("  models-dir: (unavailable: {err})"),
        }
        match &self.last_model {
            Some(model) => println!("  last-model: {model}"),
            None => println!("  last-model: (unset)"),
        }
        println!("  auto-load: {}", on_off(self.auto_load));
        println!("  use-gpu: {}", on_off(self.use_gpu));
        println!("  gpu-layers: {}", self.gpu_layers());
        println!("  context-size: {}", self.context_size());
        println!("  batch-size: {}", self.batch_size());
        println!("  flash-attn: {}", on_off(self.flash_attn));
        println!("  server: {}", self.server_url());
        println!("  startup-timeout: {}s", self.startup_timeout().as_secs());
        match &self.server_binary {
            Some(path) => println!("  server-binary: {}", path_display(path)),
            None => println!("  server-binary: (next to executable)"),
        }
    }
}
