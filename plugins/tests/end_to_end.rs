#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use emrakul_core::api::{
    AppConfig, AppContext, BatchDefinition, BatchState, FailureKind, ServicesFactory,
    StoreBackend, TaskDefinition, TaskFilter, TaskStatus, TaskStore, WorkerKind, WorkerOverride,
};
use emrakul_plugins::services::PluginServicesFactory;
use emrakul_plugins::store::FileTaskStore;
use pretty_assertions::assert_eq;

/// Stand-in worker: echoes the last line of its prompt, fails on "FAIL".
const FAKE_WORKER: &str = r#"#!/bin/sh
for last; do :; done
case "$last" in
  *FAIL*) echo "worker refused" >&2; exit 1 ;;
esac
printf '%s\n' "$last" | tail -n 1
"#;

fn install_worker(dir: &Path) -> String {
    let path = dir.join("fake-gemini");
    std::fs::write(&path, FAKE_WORKER).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path.to_string_lossy().to_string()
}

fn config(dir: &Path) -> AppConfig {
    let mut cfg = AppConfig {
        data_dir: dir.to_string_lossy().to_string(),
        ..AppConfig::default()
    };
    cfg.scheduler.tick_interval_ms = 20;
    cfg.scheduler.kill_grace_ms = 100;
    cfg.workers.insert(
        "gemini".into(),
        WorkerOverride {
            executable: Some(install_worker(dir)),
            ..WorkerOverride::default()
        },
    );
    cfg
}

fn gemini(name: &str, prompt: &str, deps: &[&str]) -> TaskDefinition {
    let mut t = TaskDefinition::new(name, WorkerKind::Gemini, prompt);
    t.dependencies = deps.iter().map(|d| d.to_string()).collect();
    t
}

#[tokio::test]
async fn batch_runs_real_processes_and_persists_results() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());
    let ctx = AppContext::new(cfg.clone(), &PluginServicesFactory)
        .await
        .unwrap();

    let def = BatchDefinition {
        name: Some("e2e".into()),
        concurrency: Some(2),
        tasks: vec![
            gemini("plan", "write the plan", &[]),
            gemini("build", "build it", &["plan"]),
            gemini("broken", "FAIL on purpose", &[]),
            gemini("after-broken", "never runs", &["broken"]),
        ],
    };
    let wd = dir.path().to_string_lossy().to_string();
    let batch = ctx.scheduler().register_batch(&def, &wd).await.unwrap();
    let done = ctx.scheduler().run_batch(&batch.id).await.unwrap();
    assert_eq!(done.state, BatchState::Completed);

    // A fresh store over the same directory sees the committed records.
    let store = FileTaskStore::open(dir.path().join("tasks")).unwrap();
    let records = store.list(&TaskFilter::batch(&batch.id)).await.unwrap();
    assert_eq!(records.len(), 4);
    let by_name = |name: &str| {
        records
            .iter()
            .find(|r| r.spec.name.as_deref() == Some(name))
            .unwrap()
            .clone()
    };

    let build = by_name("build");
    assert_eq!(build.status, TaskStatus::Succeeded);
    assert_eq!(build.result.as_ref().unwrap().stdout, "build it\n");

    let broken = by_name("broken");
    assert_eq!(broken.failure(), Some(FailureKind::NonZeroExit));
    assert_eq!(broken.result.as_ref().unwrap().stderr, "worker refused\n");

    assert_eq!(by_name("after-broken").status, TaskStatus::Skipped);
}

#[tokio::test]
async fn factory_selects_the_memory_store() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config(dir.path());
    cfg.store.backend = StoreBackend::Memory;

    let services = PluginServicesFactory.build_services(&cfg).await.unwrap();
    assert_eq!(services.store.name(), "memory");
    assert_eq!(services.runner.name(), "process");
    assert!(!dir.path().join("tasks").exists());
}
