use super::data::{path_display, Config};
use super::defaults::{DEFAULT_CONTEXT_SIZE, DEFAULT_GPU_LAYERS, DEFAULT_SERVER_PORT};
use super::io::ConfigError;
use super::orchestrator::ConfigOrchestrator;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;

#[test]
fn config_orchestrator_detects_external_updates() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let config_path = temp_dir.path().join("config.toml");
    let orchestrator = ConfigOrchestrator::new(config_path.clone());

    orchestrator
        .mutate(|config| {
            config.last_model = Some("first.gguf".to_string());
            Ok::<_, ConfigError>(())
        })
        .expect("mutate failed");

    let persisted = Config::load_from_path(&config_path).expect("load failed");
    assert_eq!(persisted.last_model.as_deref(), Some("first.gguf"));

    let cached = orchestrator.load_with_cache().expect("cached load failed");
    assert_eq!(cached.last_model.as_deref(), Some("first.gguf"));

    std::thread::sleep(Duration::from_millis(1100));

    let external = Config {
        last_model: Some("second.gguf".to_string()),
        ..Default::default()
    };
    external
        .save_to_path(&config_path)
        .expect("external save failed");

    let reloaded = orchestrator.load_with_cache().expect("reload failed");
    assert_eq!(reloaded.last_model.as_deref(), Some("second.gguf"));
}

#[test]
fn failed_mutation_leaves_file_untouched() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let config_path = temp_dir.path().join("config.toml");
    let orchestrator = ConfigOrchestrator::new(config_path.clone());

    let result: Result<(), Box<dyn std::error::Error>> = orchestrator.mutate(|config| {
        config.use_gpu = true;
        Err("nope".into())
    });

    assert!(result.is_err());
    assert!(!config_path.exists());
}

#[test]
fn test_load_nonexistent_config() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let config_path = temp_dir.path().join("nonexistent_config.toml");

    let config = Config::load_from_path(&config_path).expect("Failed to load config");

    assert_eq!(config, Config::default());
    assert!(!config.auto_load);
    assert!(!config.use_gpu);
}

#[test]
fn test_config_persistence_lifecycle() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let config_path = temp_dir.path().join("nested").join("test_config.toml");

    let config = Config {
        models_dir: Some(PathBuf::from("/srv/models")),
        use_gpu: true,
        context_size: Some(8192),
        ..Default::default()
    };
    config
        .save_to_path(&config_path)
        .expect("Failed to save config");
    let mut loaded = Config::load_from_path(&config_path).expect("Failed to load config");
    assert_eq!(loaded, config);

    loaded.remember_model("mistral.gguf");
    loaded.auto_load = true;
    loaded.save_to_path(&config_path).expect("Failed to save");
    let loaded = Config::load_from_path(&config_path).expect("Failed to load config");
    assert_eq!(loaded.autoload_target(), Some("mistral.gguf"));

    let mut cleared = loaded;
    cleared.last_model = None;
    cleared.save_to_path(&config_path).expect("Failed to save");
    let loaded = Config::load_from_path(&config_path).expect("Failed to load config");
    assert_eq!(loaded.autoload_target(), None);
}

#[test]
fn parse_errors_name_the_offending_file() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let config_path = temp_dir.path().join("config.toml");
    std::fs::write(&config_path, "use_gpu = \"maybe\"").expect("write failed");

    let err = Config::load_from_path(&config_path).expect_err("parse should fail");
    assert!(matches!(err, ConfigError::Parse { .. }));
    assert!(err.to_string().contains("config.toml"));
}

#[test]
fn accessors_fall_back_to_defaults() {
    let config = Config::default();
    assert_eq!(config.gpu_layers(), DEFAULT_GPU_LAYERS);
    assert_eq!(config.context_size(), DEFAULT_CONTEXT_SIZE);
    assert_eq!(config.server_port(), DEFAULT_SERVER_PORT);
    assert_eq!(config.server_url(), "http://127.0.0.1:8080");
    assert_eq!(config.startup_timeout(), Duration::from_secs(120));

    let custom = Config {
        server_host: Some("0.0.0.0".to_string()),
        server_port: Some(9090),
        startup_timeout_secs: Some(5),
        ..Default::default()
    };
    assert_eq!(custom.server_url(), "http://127.0.0.1:9090");
    assert_eq!(custom.startup_timeout(), Duration::from_secs(5));
}

#[test]
fn models_dir_defaults_under_data_dir() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let config = Config {
        data_dir: Some(temp_dir.path().to_path_buf()),
        ..Default::default()
    };

    assert_eq!(
        config.resolved_models_dir().unwrap(),
        temp_dir.path().join("models")
    );
    assert_eq!(
        config.server_log_path().unwrap(),
        temp_dir.path().join("llama-server.log")
    );

    config.ensure_dirs().expect("ensure_dirs failed");
    assert!(temp_dir.path().join("models").is_dir());
}

#[test]
fn autoload_requires_flag_and_model() {
    let mut config = Config {
        last_model: Some("a.gguf".to_string()),
        ..Default::default()
    };
    assert_eq!(config.autoload_target(), None);

    config.auto_load = true;
    assert_eq!(config.autoload_target(), Some("a.gguf"));

    config.last_model = Some(String::new());
    assert_eq!(config.autoload_target(), None);
}

#[test]
#[cfg(unix)]
fn path_display_abbreviates_home() {
    let Some(home) = std::env::var_os("HOME") else {
        return;
    };
    let path = PathBuf::from(home).join("models");
    assert_eq!(path_display(&path), "~/models");
}
