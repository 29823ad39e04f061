use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use tempfile::TempDir;

use super::*;

/// Spawning scripts while another test still holds one open for writing can
/// fail with ETXTBSY, so these tests run one at a time.
static SERIAL: LazyLock<tokio::sync::Mutex<()>> = LazyLock::new(|| tokio::sync::Mutex::new(()));

const READY: &str = r#"echo "$@" > "$(dirname "$0")/args.txt"
echo "llama_model_loader: loaded meta data"
echo "main: HTTP server listening, hostname: 127.0.0.1, port: 8080"
exec sleep 30
"#;

struct Fixture {
    dir: TempDir,
    supervisor: ProcessSupervisor,
    config: Arc<ConfigOrchestrator>,
}

impl Fixture {
    fn new(script: &str, timeout_secs: u64) -> Self {
        let dir = TempDir::new().unwrap();
        let models = dir.path().join("models");
        std::fs::create_dir_all(&models).unwrap();
        std::fs::write(models.join("tiny.gguf"), b"GGUF").unwrap();
        std::fs::write(models.join("other.gguf"), b"GGUF").unwrap();

        let binary = dir.path().join("llama-server");
        std::fs::write(&binary, format!("#!/bin/sh\n{script}")).unwrap();
        std::fs::set_permissions(&binary, std::fs::Permissions::from_mode(0o755)).unwrap();

        let config = Arc::new(ConfigOrchestrator::new(dir.path().join("config.toml")));
        config
            .persist(Config {
                data_dir: Some(dir.path().to_path_buf()),
                models_dir: Some(models),
                server_binary: Some(binary),
                startup_timeout_secs: Some(timeout_secs),
                ..Config::default()
            })
            .unwrap();

        Self {
            supervisor: ProcessSupervisor::new(Arc::clone(&config)),
            config,
            dir,
        }
    }

    fn read(&self, name: &str) -> String {
        std::fs::read_to_string(self.dir.path().join(name)).unwrap_or_default()
    }
}

fn is_alive(pid: u32) -> bool {
    std::process::Command::new("kill")
        .arg("-0")
        .arg(pid.to_string())
        .stderr(std::process::Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

async fn serial() -> tokio::sync::MutexGuard<'static, ()> {
    SERIAL.lock().await
}

#[tokio::test]
async fn start_waits_for_ready_and_remembers_model() {
    let _guard = serial().await;
    let fixture = Fixture::new(READY, 10);

    let status = fixture
        .supervisor
        .start("tiny.gguf", StartOverrides::default())
        .await
        .unwrap();
    assert!(status.loaded);
    assert_eq!(status.current_model.as_deref(), Some("tiny.gguf"));
    assert_eq!(fixture.supervisor.status(), status);

    let args = fixture.read("args.txt");
    assert!(args.contains("--model"));
    assert!(args.contains("tiny.gguf"));
    assert!(args.contains("--log-disable"));
    assert!(!args.contains("--n-gpu-layers"));

    assert!(fixture.read("llama-server.log").contains("HTTP server listening"));
    let saved = fixture.config.load_with_cache().unwrap();
    assert_eq!(saved.last_model.as_deref(), Some("tiny.gguf"));

    fixture.supervisor.stop().await.unwrap();
    assert!(!fixture.supervisor.status().loaded);
    assert!(!is_alive(status.pid.unwrap()));
    // Nothing left to stop.
    fixture.supervisor.stop().await.unwrap();
}

#[tokio::test]
async fn overrides_reach_the_command_line() {
    let _guard = serial().await;
    let fixture = Fixture::new(READY, 10);

    fixture
        .supervisor
        .start(
            "tiny.gguf",
            StartOverrides {
                use_gpu: Some(true),
                context_size: Some(2048),
            },
        )
        .await
        .unwrap();
    let args = fixture.read("args.txt");
    assert!(args.contains("--n-gpu-layers 128"));
    assert!(args.contains("--ctx-size 2048"));
    fixture.supervisor.stop().await.unwrap();
}

#[tokio::test]
async fn second_start_replaces_the_first_process() {
    let _guard = serial().await;
    let fixture = Fixture::new(READY, 10);

    let first = fixture
        .supervisor
        .start("tiny.gguf", StartOverrides::default())
        .await
        .unwrap();
    let first_pid = first.pid.unwrap();
    assert!(is_alive(first_pid));

    let second = fixture
        .supervisor
        .start("other.gguf", StartOverrides::default())
        .await
        .unwrap();
    assert_ne!(second.pid, first.pid);
    assert!(!is_alive(first_pid));
    assert!(is_alive(second.pid.unwrap()));
    assert_eq!(
        fixture.supervisor.status().current_model.as_deref(),
        Some("other.gguf")
    );

    fixture.supervisor.stop().await.unwrap();
    assert!(!is_alive(second.pid.unwrap()));
}

#[tokio::test]
async fn missing_model_fails_before_spawning() {
    let _guard = serial().await;
    let fixture = Fixture::new(READY, 10);

    let err = fixture
        .supervisor
        .start("absent.gguf", StartOverrides::default())
        .await
        .unwrap_err();
    assert!(matches!(err, SupervisorError::ModelNotFound { .. }));
    assert!(fixture.read("args.txt").is_empty());
}

#[tokio::test]
async fn load_failure_marker_is_reported() {
    let _guard = serial().await;
    let fixture = Fixture::new(
        "echo \"llama_load_model_from_file: failed to load model '$2'\" >&2\nexec sleep 30\n",
        10,
    );

    let err = fixture
        .supervisor
        .start("tiny.gguf", StartOverrides::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SupervisorError::ModelLoadFailed { ref model, .. } if model == "tiny.gguf"
    ));
    assert!(!fixture.supervisor.status().loaded);
    let saved = fixture.config.load_with_cache().unwrap();
    assert_eq!(saved.last_model, None);
}

#[tokio::test]
async fn ready_on_stderr_counts() {
    let _guard = serial().await;
    let fixture = Fixture::new(
        "echo 'srv  main: server is listening on http://127.0.0.1:8080' >&2\nexec sleep 30\n",
        10,
    );
    let status = fixture
        .supervisor
        .start("tiny.gguf", StartOverrides::default())
        .await
        .unwrap();
    assert!(status.loaded);
    fixture.supervisor.stop().await.unwrap();
}

#[tokio::test]
async fn early_exit_is_distinct_from_load_failure() {
    let _guard = serial().await;
    let fixture = Fixture::new("echo 'bad flag'\nexit 3\n", 10);

    let err = fixture
        .supervisor
        .start("tiny.gguf", StartOverrides::default())
        .await
        .unwrap_err();
    assert!(matches!(err, SupervisorError::ExitedDuringStartup { .. }));
}

#[tokio::test]
async fn silent_server_times_out_and_is_killed() {
    let _guard = serial().await;
    let fixture = Fixture::new("echo $$ > \"$(dirname \"$0\")/pid.txt\"\nexec sleep 30\n", 1);

    let err = fixture
        .supervisor
        .start("tiny.gguf", StartOverrides::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SupervisorError::StartupTimeout { timeout } if timeout == Duration::from_secs(1)
    ));

    let pid: u32 = fixture.read("pid.txt").trim().parse().unwrap();
    assert!(!is_alive(pid));
}

#[tokio::test]
async fn unexpected_exit_clears_loaded() {
    let _guard = serial().await;
    let fixture = Fixture::new("echo 'HTTP server listening'\nsleep 1\nexit 1\n", 10);
    let mut updates = fixture.supervisor.subscribe();

    fixture
        .supervisor
        .start("tiny.gguf", StartOverrides::default())
        .await
        .unwrap();

    let cleared = tokio::time::timeout(
        Duration::from_secs(10),
        updates.wait_for(|status| !status.loaded && status.current_model.is_none()),
    )
    .await
    .is_ok();
    assert!(cleared, "status should drop back to unloaded");
    assert_eq!(fixture.supervisor.status(), ServerStatus::default());
}

#[tokio::test]
async fn autoload_starts_last_model_only_when_enabled() {
    let _guard = serial().await;
    let fixture = Fixture::new(READY, 10);
    assert_eq!(fixture.supervisor.autoload().await.unwrap(), None);

    fixture
        .config
        .mutate(|config: &mut Config| {
            config.auto_load = true;
            config.last_model = Some("other.gguf".to_string());
            Ok::<_, ConfigError>(())
        })
        .unwrap();
    let status = fixture.supervisor.autoload().await.unwrap().unwrap();
    assert_eq!(status.current_model.as_deref(), Some("other.gguf"));
    fixture.supervisor.stop().await.unwrap();
}

#[test]
fn report_echoes_settings() {
    let _guard = SERIAL.blocking_lock();
    let fixture = Fixture::new(READY, 10);
    let report = fixture.supervisor.report().unwrap();
    assert!(!report.status.loaded);
    assert_eq!(report.models_dir, fixture.dir.path().join("models"));
    assert!(!report.auto_load);
    assert_eq!(report.server_url, "http://127.0.0.1:8080");
    assert!(Path::new(&report.models_dir).is_dir());
}

#[tokio::test]
async fn concurrent_starts_leave_one_process() {
    let _guard = serial().await;
    let fixture = Fixture::new(READY, 10);

    let (first, second) = tokio::join!(
        fixture.supervisor.start("tiny.gguf", StartOverrides::default()),
        fixture.supervisor.start("other.gguf", StartOverrides::default()),
    );
    let pids: Vec<u32> = [first.unwrap().pid, second.unwrap().pid]
        .into_iter()
        .flatten()
        .collect();
    assert_eq!(pids.len(), 2);
    assert_ne!(pids[0], pids[1]);

    let alive: Vec<u32> = pids.iter().copied().filter(|pid| is_alive(*pid)).collect();
    assert_eq!(alive.len(), 1, "exactly one server may survive");
    assert_eq!(fixture.supervisor.status().pid, Some(alive[0]));

    fixture.supervisor.stop().await.unwrap();
    assert!(!is_alive(alive[0]));
}

#[tokio::test]
async fn stop_during_start_waits_for_it_then_stops() {
    let _guard = serial().await;
    let fixture = Fixture::new(READY, 10);

    let (started, stopped) = tokio::join!(
        fixture.supervisor.start("tiny.gguf", StartOverrides::default()),
        async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            fixture.supervisor.stop().await
        },
    );
    let pid = started.unwrap().pid.unwrap();
    stopped.unwrap();

    assert!(!is_alive(pid));
    assert_eq!(fixture.supervisor.status(), ServerStatus::default());
}
