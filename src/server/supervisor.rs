use std::path::PathBuf;
use std::process::ExitStatus;
use std::sync::Arc;

use serde::Serialize;
use tokio::process::Child;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::config::{Config, ConfigError, ConfigOrchestrator};
use crate::server::launch::{resolve_binary, resolve_model, LaunchOptions};
use crate::server::output::{spawn_reader, Readiness, ServerLog};
use crate::server::SupervisorError;

/// What callers can observe about the supervised process.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ServerStatus {
    pub loaded: bool,
    pub current_model: Option<String>,
    pub pid: Option<u32>,
}

/// [`ServerStatus`] plus the settings that shape the next launch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    #[serde(flatten)]
    pub status: ServerStatus,
    pub models_dir: PathBuf,
    pub auto_load: bool,
    pub use_gpu: bool,
    pub server_url: String,
}

/// Per-call overrides of the configured launch settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StartOverrides {
    pub use_gpu: Option<bool>,
    pub context_size: Option<u32>,
}

struct RunningServer {
    model: String,
    pid: Option<u32>,
    shutdown: CancellationToken,
    waiter: JoinHandle<std::io::Result<()>>,
}

enum Startup {
    Ready,
    LoadFailed(String),
    Exited(Option<ExitStatus>),
}

/// Owns the one `llama-server` child process.
///
/// `start` and `stop` hold the same lock for their whole duration, so a
/// second `start` waits for the first and then replaces its process.
pub struct ProcessSupervisor {
    config: Arc<ConfigOrchestrator>,
    running: Mutex<Option<RunningServer>>,
    status: Arc<watch::Sender<ServerStatus>>,
}

impl ProcessSupervisor {
    pub fn new(config: Arc<ConfigOrchestrator>) -> Self {
        let (status, _) = watch::channel(ServerStatus::default());
        Self {
            config,
            running: Mutex::new(None),
            status: Arc::new(status),
        }
    }

    pub fn status(&self) -> ServerStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ServerStatus> {
        self.status.subscribe()
    }

    pub fn report(&self) -> Result<StatusReport, SupervisorError> {
        let config = self.config.load_with_cache()?;
        Ok(StatusReport {
            status: self.status(),
            models_dir: config.resolved_models_dir()?,
            auto_load: config.auto_load,
            use_gpu: config.use_gpu,
            server_url: config.server_url(),
        })
    }

    /// Base URL of the server as currently configured.
    pub fn server_url(&self) -> Result<String, SupervisorError> {
        Ok(self.config.load_with_cache()?.server_url())
    }

    /// Start `last_model` when autoload is enabled. `Ok(None)` means there
    /// was nothing to load.
    pub async fn autoload(&self) -> Result<Option<ServerStatus>, SupervisorError> {
        let config = self.config.load_with_cache()?;
        let Some(model) = config.autoload_target().map(str::to_string) else {
            debug!("Autoload disabled or no previous model");
            return Ok(None);
        };
        info!(model = %model, "Autoloading last model");
        self.start(&model, StartOverrides::default()).await.map(Some)
    }

    /// Launch `model_file` and wait until it is serving, replacing any
    /// process that is already running.
    pub async fn start(
        &self,
        model_file: &str,
        overrides: StartOverrides,
    ) -> Result<ServerStatus, SupervisorError> {
        let mut running = self.running.lock().await;

        let config = self.config.load_with_cache()?;
        let model_path = resolve_model(&config.resolved_models_dir()?, model_file)?;
        let binary = resolve_binary(&config)?;

        if let Some(previous) = running.take() {
            info!(model = %previous.model, "Replacing running llama-server");
            let stopped = shutdown(previous).await;
            self.status.send_replace(ServerStatus::default());
            stopped?;
        }

        let mut options = LaunchOptions::from_config(&config, model_path);
        if let Some(use_gpu) = overrides.use_gpu {
            options.use_gpu = use_gpu;
        }
        if let Some(context_size) = overrides.context_size {
            options.context_size = context_size;
        }

        info!(
            binary = %binary.display(),
            model = %model_file,
            gpu = options.use_gpu,
            ctx = options.context_size,
            "Starting llama-server"
        );
        let spawn_error = |source: std::io::Error| SupervisorError::Spawn {
            binary: binary.clone(),
            source,
        };
        let mut child = options.command(&binary).spawn().map_err(spawn_error)?;
        let pid = child.id();

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| spawn_error(std::io::Error::other("stdout was not captured")))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| spawn_error(std::io::Error::other("stderr was not captured")))?;

        let log = open_log(&config);
        let (signals_tx, mut signals) = mpsc::unbounded_channel();
        spawn_reader(stdout, "stdout", log.clone(), signals_tx.clone());
        spawn_reader(stderr, "stderr", log, signals_tx);

        let timeout = config.startup_timeout();
        let startup = tokio::time::timeout(timeout, wait_for_startup(&mut child, &mut signals)).await;

        match startup {
            Ok(Startup::Ready) => {}
            Ok(Startup::LoadFailed(line)) => {
                warn!(model = %model_file, line = %line, "llama-server could not load model");
                kill(&mut child).await;
                return Err(SupervisorError::ModelLoadFailed {
                    model: model_file.to_string(),
                    line,
                });
            }
            Ok(Startup::Exited(status)) => {
                warn!(model = %model_file, status = ?status, "llama-server exited during startup");
                return Err(SupervisorError::ExitedDuringStartup {
                    status: describe_exit(status),
                });
            }
            Err(_) => {
                warn!(model = %model_file, timeout_secs = timeout.as_secs(), "llama-server startup timed out");
                kill(&mut child).await;
                return Err(SupervisorError::StartupTimeout { timeout });
            }
        }

        info!(model = %model_file, pid = ?pid, "llama-server is ready");
        // Must precede the waiter, which clears it on an unexpected exit.
        let status = ServerStatus {
            loaded: true,
            current_model: Some(model_file.to_string()),
            pid,
        };
        self.status.send_replace(status.clone());

        let shutdown_token = CancellationToken::new();
        let waiter = spawn_waiter(
            child,
            model_file.to_string(),
            pid,
            shutdown_token.clone(),
            Arc::clone(&self.status),
        );
        *running = Some(RunningServer {
            model: model_file.to_string(),
            pid,
            shutdown: shutdown_token,
            waiter,
        });

        let remembered = self.config.mutate(|config: &mut Config| {
            config.remember_model(model_file);
            Ok::<_, ConfigError>(())
        });
        if let Err(err) = remembered {
            warn!(error = %err, "Could not remember last model for autoload");
        }

        Ok(status)
    }

    /// Kill the running process, if any, and wait for it to exit. Stopping
    /// when nothing runs is a no-op.
    pub async fn stop(&self) -> Result<(), SupervisorError> {
        let mut running = self.running.lock().await;
        let Some(server) = running.take() else {
            debug!("No llama-server to stop");
            return Ok(());
        };
        info!(model = %server.model, pid = ?server.pid, "Stopping llama-server");
        let stopped = shutdown(server).await;
        self.status.send_replace(ServerStatus::default());
        stopped
    }
}

fn open_log(config: &Config) -> ServerLog {
    match config.server_log_path() {
        Ok(path) => ServerLog::open(&path),
        Err(err) => {
            warn!(error = %err, "No location for the llama-server log");
            ServerLog::disabled()
        }
    }
}

async fn wait_for_startup(
    child: &mut Child,
    signals: &mut mpsc::UnboundedReceiver<Readiness>,
) -> Startup {
    tokio::select! {
        signal = signals.recv() => match signal {
            Some(Readiness::Ready) => Startup::Ready,
            Some(Readiness::LoadFailed(line)) => Startup::LoadFailed(line),
            // Both pipes closed; the process is on its way out.
            None => Startup::Exited(child.wait().await.ok()),
        },
        status = child.wait() => Startup::Exited(status.ok()),
    }
}

/// Own `child` until it exits on its own or `shutdown` fires. An exit nobody
/// asked for clears the loaded status.
fn spawn_waiter(
    mut child: Child,
    model: String,
    pid: Option<u32>,
    shutdown: CancellationToken,
    status: Arc<watch::Sender<ServerStatus>>,
) -> JoinHandle<std::io::Result<()>> {
    tokio::spawn(async move {
        tokio::select! {
            exit = child.wait() => {
                warn!(model = %model, pid = ?pid, status = ?exit, "llama-server exited unexpectedly");
                status.send_if_modified(|current| {
                    if current.pid == pid && current.loaded {
                        *current = ServerStatus::default();
                        true
                    } else {
                        false
                    }
                });
                Ok(())
            }
            _ = shutdown.cancelled() => {
                let killed = child.kill().await;
                debug!(model = %model, pid = ?pid, ok = killed.is_ok(), "llama-server stopped");
                killed
            }
        }
    })
}

/// Signal the waiter to kill the child and wait until it has exited.
async fn shutdown(server: RunningServer) -> Result<(), SupervisorError> {
    server.shutdown.cancel();
    match server.waiter.await {
        Ok(result) => result.map_err(|source| SupervisorError::Stop { source }),
        Err(err) => Err(SupervisorError::Stop {
            source: std::io::Error::other(err.to_string()),
        }),
    }
}

async fn kill(child: &mut Child) {
    if let Err(err) = child.kill().await {
        warn!(error = %err, "Failed to kill llama-server");
    }
}

fn describe_exit(status: Option<ExitStatus>) -> String {
    match status {
        Some(status) => status.to_string(),
        None => "exit status unavailable".to_string(),
    }
}

#[cfg(all(test, unix))]
mod tests;
