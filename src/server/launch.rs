//! Locating the `llama-server` binary and building its command line.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;

use crate::core::config::Config;
use crate::server::SupervisorError;

#[cfg(windows)]
const BINARY_NAMES: &[&str] = &["llama-server.exe", "server.exe"];
#[cfg(not(windows))]
const BINARY_NAMES: &[&str] = &["llama-server"];

/// Hides the console window of the child on Windows.
#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Everything needed to start one server process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchOptions {
    pub model_path: PathBuf,
    pub use_gpu: bool,
    pub gpu_layers: u32,
    pub context_size: u32,
    pub batch_size: u32,
    pub flash_attn: bool,
    pub host: String,
    pub port: u16,
}

impl LaunchOptions {
    pub fn from_config(config: &Config, model_path: PathBuf) -> Self {
        Self {
            model_path,
            use_gpu: config.use_gpu,
            gpu_layers: config.gpu_layers(),
            context_size: config.context_size(),
            batch_size: config.batch_size(),
            flash_attn: config.flash_attn,
            host: config.server_host().to_string(),
            port: config.server_port(),
        }
    }

    pub fn args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "--model".into(),
            self.model_path.clone().into_os_string(),
            "--log-disable".into(),
            "--ctx-size".into(),
            self.context_size.to_string().into(),
            "--batch-size".into(),
            self.batch_size.to_string().into(),
            "--host".into(),
            self.host.clone().into(),
            "--port".into(),
            self.port.to_string().into(),
        ];
        if self.use_gpu {
            args.push("--n-gpu-layers".into());
            args.push(self.gpu_layers.to_string().into());
        }
        if self.flash_attn {
            args.push("--flash-attn".into());
        }
        args
    }

    pub fn command(&self, binary: &Path) -> Command {
        let mut cmd = Command::new(binary);
        cmd.args(self.args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(windows)]
        cmd.creation_flags(CREATE_NO_WINDOW);
        cmd
    }
}

/// The configured override, or the first known binary name found next to
/// the running executable.
pub fn resolve_binary(config: &Config) -> Result<PathBuf, SupervisorError> {
    if let Some(path) = &config.server_binary {
        if path.is_file() {
            return Ok(path.clone());
        }
        return Err(SupervisorError::BinaryNotFound {
            searched: vec![path.clone()],
        });
    }

    let exe = std::env::current_exe().map_err(|source| SupervisorError::Spawn {
        binary: PathBuf::from(BINARY_NAMES[0]),
        source,
    })?;
    let dir = exe.parent().map(Path::to_path_buf).unwrap_or_default();
    let candidates: Vec<PathBuf> = BINARY_NAMES.iter().map(|name| dir.join(name)).collect();
    match candidates.iter().find(|path| path.is_file()) {
        Some(found) => Ok(found.clone()),
        None => Err(SupervisorError::BinaryNotFound {
            searched: candidates,
        }),
    }
}

/// `model_file` inside `models_dir`. Only plain file names are accepted so a
/// request cannot reach outside the directory.
pub fn resolve_model(models_dir: &Path, model_file: &str) -> Result<PathBuf, SupervisorError> {
    let not_found = || SupervisorError::ModelNotFound {
        path: models_dir.join(model_file),
    };
    let name = Path::new(model_file);
    if model_file.is_empty() || name.file_name() != Some(name.as_os_str()) {
        return Err(not_found());
    }
    let path = models_dir.join(name);
    if path.is_file() {
        Ok(path)
    } else {
        Err(not_found())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn options(use_gpu: bool, flash_attn: bool) -> LaunchOptions {
        LaunchOptions {
            model_path: PathBuf::from("/models/tiny.gguf"),
            use_gpu,
            gpu_layers: 128,
            context_size: 4096,
            batch_size: 512,
            flash_attn,
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }

    fn strings(args: Vec<OsString>) -> Vec<String> {
        args.into_iter()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn cpu_launch_omits_gpu_layers() {
        let args = strings(options(false, false).args());
        assert_eq!(
            args,
            [
                "--model",
                "/models/tiny.gguf",
                "--log-disable",
                "--ctx-size",
                "4096",
                "--batch-size",
                "512",
                "--host",
                "127.0.0.1",
                "--port",
                "8080",
            ]
        );
    }

    #[test]
    fn gpu_and_flash_attention_append_flags() {
        let args = strings(options(true, true).args());
        let tail = &args[args.len() - 3..];
        assert_eq!(tail, ["--n-gpu-layers", "128", "--flash-attn"]);
    }

    #[test]
    fn options_follow_config() {
        let config = Config {
            use_gpu: true,
            gpu_layers: Some(33),
            context_size: Some(8192),
            server_port: Some(9090),
            ..Config::default()
        };
        let opts = LaunchOptions::from_config(&config, PathBuf::from("m.gguf"));
        assert!(opts.use_gpu);
        assert_eq!(opts.gpu_layers, 33);
        assert_eq!(opts.context_size, 8192);
        assert_eq!(opts.batch_size, 512);
        assert_eq!(opts.port, 9090);
        assert_eq!(opts.host, "127.0.0.1");
    }

    #[test]
    fn model_must_exist_inside_models_dir() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("tiny.gguf"), b"gguf").unwrap();

        assert_eq!(
            resolve_model(dir.path(), "tiny.gguf").unwrap(),
            dir.path().join("tiny.gguf")
        );
        assert!(matches!(
            resolve_model(dir.path(), "absent.gguf"),
            Err(SupervisorError::ModelNotFound { .. })
        ));
        assert!(matches!(
            resolve_model(dir.path(), "../tiny.gguf"),
            Err(SupervisorError::ModelNotFound { .. })
        ));
        assert!(matches!(
            resolve_model(dir.path(), ""),
            Err(SupervisorError::ModelNotFound { .. })
        ));
    }

    #[test]
    fn missing_override_binary_is_reported() {
        let dir = TempDir::new().unwrap();
        let config = Config {
            server_binary: Some(dir.path().join("llama-server")),
            ..Config::default()
        };
        let err = resolve_binary(&config).unwrap_err();
        assert!(matches!(
            err,
            SupervisorError::BinaryNotFound { ref searched } if searched.len() == 1
        ));
    }

    #[test]
    fn existing_override_binary_wins() {
        let dir = TempDir::new().unwrap();
        let binary = dir.path().join("custom-server");
        std::fs::write(&binary, b"").unwrap();
        let config = Config {
            server_binary: Some(binary.clone()),
            ..Config::default()
        };
        assert_eq!(resolve_binary(&config).unwrap(), binary);
    }
}
