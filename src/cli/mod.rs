//! Command-line interface parsing and handling
//!
//! This module handles parsing command-line arguments and executing the appropriate commands.

pub mod chat;
pub mod generate;
pub mod model_list;
pub mod serve;
pub mod settings;

use std::error::Error;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use crate::cli::settings::{SetContext, SettingError, SettingRegistry};
use crate::core::config::ConfigOrchestrator;
use crate::logging::init_tracing;
use crate::server::ProcessSupervisor;

#[derive(Parser)]
#[command(name = "confab")]
#[command(about = "Multi-character chat against a local llama.cpp server")]
#[command(
    long_about = "Confab supervises a local llama-server process and holds multi-character \
conversations with it. The model picks who speaks next, replies stream as they are generated, \
and every reply keeps its earlier versions as swipes.\n\n\
Models are .gguf files in the configured models directory ('confab models' lists them).\n\n\
Environment Variables:\n\
  RUST_LOG          Override the log filter (defaults to confab=info)"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Log debug detail to stderr
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List .gguf models in the models directory
    Models,
    /// Show server settings and whether a server is answering
    Status,
    /// Start llama-server with a model and keep it running until Ctrl+C
    Serve {
        /// Model file name inside the models directory
        model: String,
        /// Offload layers to the GPU
        #[arg(long, conflicts_with = "no_gpu")]
        gpu: bool,
        /// Run on the CPU only
        #[arg(long)]
        no_gpu: bool,
        /// Context window in tokens
        #[arg(long, value_name = "TOKENS")]
        ctx_size: Option<u32>,
    },
    /// Stream a plain completion of a prompt to stdout
    Generate {
        /// Prompt text (multiple words are joined with spaces)
        #[arg(required = true, trailing_var_arg = true)]
        prompt: Vec<String>,
        /// Start this model first instead of using a running server
        #[arg(short = 'm', long)]
        model: Option<String>,
    },
    /// Interactive multi-character chat
    Chat {
        /// Start this model first instead of using a running server
        #[arg(short = 'm', long)]
        model: Option<String>,
    },
    /// Set configuration values, or list them when no key is given
    Set {
        /// Configuration key to set
        key: Option<String>,
        /// Value to set for the key (can be multiple words)
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        value: Vec<String>,
    },
    /// Reset a configuration value to its default
    Unset {
        /// Configuration key to unset
        key: String,
    },
    /// Print the resolved configuration
    Config,
}

impl Commands {
    pub fn gpu_override(gpu: bool, no_gpu: bool) -> Option<bool> {
        match (gpu, no_gpu) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        }
    }
}

pub fn main() -> Result<(), Box<dyn Error>> {
    tokio::runtime::Runtime::new()?.block_on(async_main())
}

async fn async_main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let config = Arc::new(ConfigOrchestrator::from_default_location()?);

    match args.command {
        Commands::Models => model_list::list_models(&config),
        Commands::Status => serve::print_status(&config).await,
        Commands::Serve {
            model,
            gpu,
            no_gpu,
            ctx_size,
        } => {
            let supervisor = ProcessSupervisor::new(config);
            serve::serve(
                &supervisor,
                &model,
                Commands::gpu_override(gpu, no_gpu),
                ctx_size,
            )
            .await
        }
        Commands::Generate { prompt, model } => {
            let supervisor = ProcessSupervisor::new(config);
            generate::run_generate(&supervisor, prompt.join(" "), model.as_deref()).await
        }
        Commands::Chat { model } => {
            let supervisor = ProcessSupervisor::new(config);
            chat::run_chat(&supervisor, model.as_deref()).await
        }
        Commands::Set { key, value } => {
            let registry = SettingRegistry::new();
            let Some(key) = key else {
                let current = config.load_with_cache()?;
                println!("Settings ({}):", crate::core::config::data::path_display(config.path()));
                for key in registry.keys_display_order() {
                    if let Some(handler) = registry.get(key) {
                        println!("{}", handler.format(&current));
                    }
                }
                return Ok(());
            };
            let ctx = SetContext { config: &config };
            let result = registry
                .get(&key)
                .ok_or_else(|| SettingError::UnknownKey(key.clone()))
                .and_then(|handler| handler.set(&value, &ctx));
            report_setting(result)
        }
        Commands::Unset { key } => {
            let registry = SettingRegistry::new();
            let ctx = SetContext { config: &config };
            let result = registry
                .get(&key)
                .ok_or_else(|| SettingError::UnknownKey(key.clone()))
                .and_then(|handler| handler.unset(&ctx));
            report_setting(result)
        }
        Commands::Config => {
            config.load_with_cache()?.print_all();
            Ok(())
        }
    }
}

fn report_setting(result: Result<String, SettingError>) -> Result<(), Box<dyn Error>> {
    match result {
        Ok(message) => {
            println!("{message}");
            Ok(())
        }
        Err(err) => {
            err.print();
            std::process::exit(1);
        }
    }
}
