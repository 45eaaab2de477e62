use beacon_core::{
    ActivityEvent, BeaconEngine, BeaconError, CliResolver, CommandRunner, EngineOptions,
    Invocation, PipelineConfig, PluginMetadata, ProcessOutput, ResolvedCli, Result,
    StorageConfig, TickOutcome,
};
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

const API_KEY: &str = "0123abcd-0000-1111-2222-33334444wxyz";

struct InstalledCli;

impl CliResolver for InstalledCli {
    fn resolve(&self) -> Result<ResolvedCli> {
        Ok(ResolvedCli {
            runtime: PathBuf::from("/opt/runtime/python"),
            cli: PathBuf::from("/home/u/.beacon/deps/wakatime-master/wakatime/cli.py"),
        })
    }
}

#[derive(Default)]
struct Recorder {
    invocations: Mutex<Vec<Invocation>>,
}

impl Recorder {
    fn invocations(&self) -> Vec<Invocation> {
        self.invocations.lock().unwrap().clone()
    }
}

impl CommandRunner for Recorder {
    fn run(&self, invocation: &Invocation, _capture: bool) -> Result<ProcessOutput> {
        self.invocations.lock().unwrap().push(invocation.clone());
        Ok(ProcessOutput {
            exit_code: Some(0),
            ..Default::default()
        })
    }
}

struct SpawnFails;

impl CommandRunner for SpawnFails {
    fn run(&self, invocation: &Invocation, _capture: bool) -> Result<ProcessOutput> {
        Err(BeaconError::ProcessSpawnFailure {
            command: invocation.display.clone(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
        })
    }
}

fn metadata() -> PluginMetadata {
    PluginMetadata {
        editor_name: "vim".to_string(),
        editor_version: "9.1".to_string(),
        plugin_name: "beacon".to_string(),
        plugin_version: "0.3.0".to_string(),
    }
}

fn engine_with(home: &TempDir, runner: Arc<dyn CommandRunner>) -> BeaconEngine {
    let storage = StorageConfig::with_root(home.path().to_path_buf());
    std::fs::write(
        storage.config_file(),
        format!("[settings]\napi_key = {}\ndisable_threading = true\n", API_KEY),
    )
    .unwrap();

    BeaconEngine::with_options(
        storage,
        metadata(),
        EngineOptions {
            pipeline: PipelineConfig {
                debounce: Duration::from_secs(120),
                dispatch_interval: Duration::from_secs(3600),
                ..PipelineConfig::default()
            },
            runner: Some(runner),
            resolver: Some(Arc::new(InstalledCli)),
        },
    )
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap()
}

fn open(path: &str, offset_secs: i64) -> ActivityEvent {
    ActivityEvent::new(path, false, t0() + ChronoDuration::seconds(offset_secs))
        .with_project("demo")
}

fn save(path: &str, offset_secs: i64) -> ActivityEvent {
    ActivityEvent::new(path, true, t0() + ChronoDuration::seconds(offset_secs))
        .with_project("demo")
}

#[test]
fn editing_session_yields_three_heartbeats_in_one_batch() {
    let home = TempDir::new().unwrap();
    let recorder = Arc::new(Recorder::default());
    let engine = engine_with(&home, recorder.clone());

    assert!(engine.handle_activity(open("/src/a.rs", 0)));
    assert!(!engine.handle_activity(open("/src/a.rs", 10)));
    assert!(engine.handle_activity(save("/src/a.rs", 15)));
    assert!(engine.handle_activity(open("/src/b.rs", 16)));
    assert_eq!(engine.queued_heartbeats(), 3);

    assert_eq!(engine.tick(), TickOutcome::Sent { heartbeats: 3 });

    let invocations = recorder.invocations();
    assert_eq!(invocations.len(), 1);
    let inv = &invocations[0];

    assert_eq!(inv.program, PathBuf::from("/opt/runtime/python"));
    let t0_secs = t0().timestamp();
    assert_eq!(
        inv.args,
        vec![
            "/home/u/.beacon/deps/wakatime-master/wakatime/cli.py".to_string(),
            "--key".to_string(),
            API_KEY.to_string(),
            "--entity".to_string(),
            "/src/a.rs".to_string(),
            "--time".to_string(),
            format!("{}.000000", t0_secs),
            "--plugin".to_string(),
            "vim/9.1 beacon/0.3.0".to_string(),
            "--project".to_string(),
            "demo".to_string(),
            "--extra-heartbeats".to_string(),
        ]
    );

    let extras: serde_json::Value = serde_json::from_str(inv.stdin.as_deref().unwrap()).unwrap();
    let extras = extras.as_array().unwrap();
    assert_eq!(extras.len(), 2);
    assert_eq!(extras[0]["entity"], "/src/a.rs");
    assert_eq!(extras[0]["is_write"], true);
    assert_eq!(extras[0]["timestamp"].as_f64().unwrap(), (t0_secs + 15) as f64);
    assert_eq!(extras[0]["project"], "demo");
    assert_eq!(extras[1]["entity"], "/src/b.rs");
    assert_eq!(extras[1]["is_write"], false);
    assert_eq!(extras[1]["timestamp"].as_f64().unwrap(), (t0_secs + 16) as f64);

    assert!(!inv.display.contains(API_KEY));
    assert!(inv.display.ends_with("--extra-heartbeats"));
}

#[test]
fn heartbeats_after_a_tick_form_the_next_batch() {
    let home = TempDir::new().unwrap();
    let recorder = Arc::new(Recorder::default());
    let engine = engine_with(&home, recorder.clone());

    engine.handle_activity(save("/src/a.rs", 0));
    assert_eq!(engine.tick(), TickOutcome::Sent { heartbeats: 1 });
    engine.handle_activity(save("/src/a.rs", 1));
    engine.handle_activity(save("/src/c.rs", 2));
    assert_eq!(engine.tick(), TickOutcome::Sent { heartbeats: 2 });
    assert_eq!(engine.tick(), TickOutcome::Idle);

    let invocations = recorder.invocations();
    assert_eq!(invocations.len(), 2);
    assert!(invocations[0].stdin.is_none());
    assert!(invocations[0].args.contains(&"--write".to_string()));
    assert!(!invocations[0].args.contains(&"--extra-heartbeats".to_string()));
    assert!(invocations[1].stdin.is_some());
}

#[test]
fn spawn_failure_drops_batch_without_requeue() {
    let home = TempDir::new().unwrap();
    let engine = engine_with(&home, Arc::new(SpawnFails));

    engine.handle_activity(open("/src/a.rs", 0));
    engine.handle_activity(open("/src/b.rs", 1));
    assert_eq!(engine.tick(), TickOutcome::Sent { heartbeats: 2 });
    assert_eq!(engine.queued_heartbeats(), 0);
    assert_eq!(engine.tick(), TickOutcome::Idle);
}

#[test]
fn shutdown_sends_remaining_heartbeats() {
    let home = TempDir::new().unwrap();
    let recorder = Arc::new(Recorder::default());
    let engine = engine_with(&home, recorder.clone());
    engine.start_dispatcher().unwrap();

    engine.handle_activity(open("/src/a.rs", 0));
    engine.shutdown();

    assert_eq!(engine.queued_heartbeats(), 0);
    assert_eq!(recorder.invocations().len(), 1);
}

#[test]
fn empty_project_is_not_passed_to_cli() {
    let home = TempDir::new().unwrap();
    let recorder = Arc::new(Recorder::default());
    let engine = engine_with(&home, recorder.clone());

    engine.handle_activity(ActivityEvent::new("/src/a.rs", true, t0()).with_project(""));
    engine.tick();

    let inv = &recorder.invocations()[0];
    assert!(!inv.args.contains(&"--project".to_string()));
}

/// Lays out an installed CLI and a runtime that answers `--version`.
#[cfg(unix)]
fn install_fake_runtime_and_cli(storage: &StorageConfig) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let cli = storage.cli_script();
    std::fs::create_dir_all(cli.parent().unwrap()).unwrap();
    std::fs::write(&cli, "").unwrap();

    let runtime = storage.embedded_runtime_dir().join("bin").join("python3");
    std::fs::create_dir_all(runtime.parent().unwrap()).unwrap();
    std::fs::write(&runtime, "#!/bin/sh\nexit 0\n").unwrap();
    std::fs::set_permissions(&runtime, std::fs::Permissions::from_mode(0o755)).unwrap();
    runtime
}

#[cfg(unix)]
#[test]
fn offline_start_resolves_installed_runtime_without_dependency_check() {
    let home = TempDir::new().unwrap();
    let storage = StorageConfig::with_root(home.path().to_path_buf());
    std::fs::write(
        storage.config_file(),
        format!("[settings]\napi_key = {}\ndisable_threading = true\n", API_KEY),
    )
    .unwrap();
    let runtime = install_fake_runtime_and_cli(&storage);

    let recorder = Arc::new(Recorder::default());
    let engine = BeaconEngine::with_options(
        storage.clone(),
        metadata(),
        EngineOptions {
            pipeline: PipelineConfig {
                dispatch_interval: Duration::from_secs(3600),
                ..PipelineConfig::default()
            },
            runner: Some(recorder.clone()),
            resolver: None,
        },
    );

    engine.handle_activity(save("/src/a.rs", 0));
    assert_eq!(engine.tick(), TickOutcome::Dropped { heartbeats: 1 });

    engine.start_offline().unwrap();
    engine.handle_activity(save("/src/a.rs", 1));
    assert_eq!(engine.tick(), TickOutcome::Sent { heartbeats: 1 });

    let invocations = recorder.invocations();
    assert_eq!(invocations.len(), 1);
    assert_eq!(invocations[0].program, runtime);
    assert_eq!(invocations[0].args[0], storage.cli_script().to_string_lossy());
    engine.shutdown();
}
