//! `serve` and `status`, plus getting a usable server for the other commands.

use std::error::Error;

use tracing::{debug, warn};

use crate::api::CompletionClient;
use crate::core::config::data::path_display;
use crate::core::config::ConfigOrchestrator;
use crate::server::{ProcessSupervisor, StartOverrides};

pub async fn serve(
    supervisor: &ProcessSupervisor,
    model: &str,
    use_gpu: Option<bool>,
    context_size: Option<u32>,
) -> Result<(), Box<dyn Error>> {
    eprintln!("⏳ Loading {model}...");
    let status = supervisor
        .start(
            model,
            StartOverrides {
                use_gpu,
                context_size,
            },
        )
        .await?;
    let url = supervisor.server_url()?;
    println!(
        "✅ {model} is being served at {url} (pid {})",
        status
            .pid
            .map(|pid| pid.to_string())
            .unwrap_or_else(|| "unknown".to_string())
    );
    println!("💡 Press Ctrl+C to stop the server");

    let mut updates = supervisor.subscribe();
    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            supervisor.stop().await?;
            println!("\n👋 Server stopped");
            Ok(())
        }
        _ = updates.wait_for(|status| !status.loaded) => {
            Err("llama-server exited unexpectedly; see llama-server.log in the data directory".into())
        }
    }
}

pub async fn print_status(config: &ConfigOrchestrator) -> Result<(), Box<dyn Error>> {
    let current = config.load_with_cache()?;
    let url = current.server_url();
    let client = CompletionClient::new(url.clone());
    let state = match client.health().await {
        Ok(true) => "ready",
        Ok(false) => "loading model",
        Err(_) => "not running",
    };

    println!("🖥️  Server at {url}: {state}");
    println!("  models-dir: {}", path_display(current.resolved_models_dir()?));
    println!(
        "  last-model: {}",
        current.last_model.as_deref().unwrap_or("(none)")
    );
    println!("  auto-load: {}", if current.auto_load { "on" } else { "off" });
    println!("  use-gpu: {}", if current.use_gpu { "on" } else { "off" });
    Ok(())
}

/// Make sure a server is answering: start `model` when given, otherwise try
/// autoload, otherwise expect one to be running already.
pub async fn connect(
    supervisor: &ProcessSupervisor,
    model: Option<&str>,
) -> Result<CompletionClient, Box<dyn Error>> {
    match model {
        Some(model) => {
            eprintln!("⏳ Loading {model}...");
            supervisor.start(model, StartOverrides::default()).await?;
        }
        None => {
            if let Some(status) = supervisor.autoload().await? {
                debug!(model = ?status.current_model, "Autoloaded model");
            }
        }
    }

    let client = CompletionClient::new(supervisor.server_url()?);
    match client.health().await {
        Ok(true) => Ok(client),
        Ok(false) => {
            warn!("Server is still loading its model; requests may wait");
            Ok(client)
        }
        Err(err) => Err(format!(
            "No inference server is answering at {} ({err}). Pass --model or run 'confab serve <model>' first.",
            client.base_url()
        )
        .into()),
    }
}
