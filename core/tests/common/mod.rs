#![allow(dead_code)]

use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncRead;
use tokio::sync::watch;

use emrakul_core::api::{
    AppConfig, AppContext, BatchDefinition, BatchPatch, BatchRecord, BatchState, MemoryTaskStore,
    Priority, RunOutcome, RunnerPlugin, RunnerSession, RunnerStartArgs, Services, Signal,
    StoreError, TaskDefinition, TaskFilter, TaskPatch, TaskRecord, TaskStatus, TaskStore,
    WorkerKind,
};

/// Behaviour of one scripted process, parsed from the task prompt.
///
/// Tokens: `name:<label>`, `sleep:<ms>`, `exit:<code>`, `out:<text>`,
/// `hang`, `hang-ignore-term`, `missing` (fails to launch).
#[derive(Debug, Clone, Default)]
struct Script {
    label: String,
    sleep_ms: u64,
    exit_code: i32,
    stdout: String,
    hang: bool,
    ignore_term: bool,
    missing: bool,
}

impl Script {
    fn parse(text: &str) -> Self {
        let mut s = Script::default();
        for tok in text.split_whitespace() {
            if let Some(v) = tok.strip_prefix("name:") {
                s.label = v.to_string();
            } else if let Some(v) = tok.strip_prefix("sleep:") {
                s.sleep_ms = v.parse().unwrap_or(0);
            } else if let Some(v) = tok.strip_prefix("exit:") {
                s.exit_code = v.parse().unwrap_or(1);
            } else if let Some(v) = tok.strip_prefix("out:") {
                s.stdout = v.to_string();
            } else if tok == "hang" {
                s.hang = true;
            } else if tok == "hang-ignore-term" {
                s.hang = true;
                s.ignore_term = true;
            } else if tok == "missing" {
                s.missing = true;
            }
        }
        s
    }
}

/// In-memory runner: no OS processes, deterministic outcomes.
#[derive(Default)]
pub struct ScriptedRunner {
    pub launched: Mutex<Vec<String>>,
    running: Arc<AtomicUsize>,
    pub max_running: Arc<AtomicUsize>,
    pub signals: Arc<Mutex<Vec<(String, Signal)>>>,
}

impl ScriptedRunner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn launched(&self) -> Vec<String> {
        self.launched.lock().unwrap().clone()
    }

    pub fn max_running(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }

    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }
}

fn script_text(args: &RunnerStartArgs) -> String {
    if args.cmd == "sh" {
        // verify commands: sh -c "<script>"
        return args.args.last().cloned().unwrap_or_default();
    }
    args.args
        .iter()
        .find_map(|a| a.split("Task:\n").nth(1))
        .map(|rest| rest.lines().next().unwrap_or_default().to_string())
        .unwrap_or_default()
}

struct RunningGuard(Arc<AtomicUsize>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

struct ScriptedSession {
    script: Script,
    stdout: Option<Vec<u8>>,
    stopped: watch::Sender<bool>,
    signals: Arc<Mutex<Vec<(String, Signal)>>>,
    _guard: RunningGuard,
}

#[async_trait]
impl RunnerSession for ScriptedSession {
    fn id(&self) -> Option<u32> {
        None
    }

    fn stdout(&mut self) -> Option<Box<dyn AsyncRead + Unpin + Send>> {
        self.stdout
            .take()
            .map(|b| Box::new(Cursor::new(b)) as Box<dyn AsyncRead + Unpin + Send>)
    }

    fn stderr(&mut self) -> Option<Box<dyn AsyncRead + Unpin + Send>> {
        None
    }

    async fn signal(&mut self, signal: Signal) -> anyhow::Result<()> {
        self.signals
            .lock()
            .unwrap()
            .push((self.script.label.clone(), signal));
        if signal == Signal::Kill || !self.script.ignore_term {
            self.stopped.send_replace(true);
        }
        Ok(())
    }

    async fn wait(&mut self) -> anyhow::Result<RunOutcome> {
        let mut rx = self.stopped.subscribe();
        if self.script.hang {
            while !*rx.borrow_and_update() {
                rx.changed().await?;
            }
            return Ok(RunOutcome { exit_code: -1 });
        }
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(self.script.sleep_ms)) => {
                Ok(RunOutcome { exit_code: self.script.exit_code })
            }
            _ = async {
                while !*rx.borrow_and_update() {
                    if rx.changed().await.is_err() {
                        std::future::pending::<()>().await;
                    }
                }
            } => Ok(RunOutcome { exit_code: -1 }),
        }
    }
}

#[async_trait]
impl RunnerPlugin for ScriptedRunner {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn start_session(
        &self,
        args: &RunnerStartArgs,
    ) -> anyhow::Result<Box<dyn RunnerSession>> {
        let script = Script::parse(&script_text(args));
        if script.missing {
            anyhow::bail!("executable not found: {}", args.cmd);
        }
        if args.cmd != "sh" {
            self.launched.lock().unwrap().push(script.label.clone());
        }

        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);

        let (stopped, _) = watch::channel(false);
        Ok(Box::new(ScriptedSession {
            stdout: Some(script.stdout.clone().into_bytes()),
            script,
            stopped,
            signals: self.signals.clone(),
            _guard: RunningGuard(self.running.clone()),
        }))
    }
}

pub struct Harness {
    pub ctx: AppContext,
    pub runner: Arc<ScriptedRunner>,
    pub store: Arc<dyn TaskStore>,
    _dir: tempfile::TempDir,
}

pub fn harness() -> Harness {
    harness_with_store(Arc::new(MemoryTaskStore::new()))
}

pub fn harness_with_store(store: Arc<dyn TaskStore>) -> Harness {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    let dir = tempfile::tempdir().unwrap();
    let mut cfg = AppConfig {
        data_dir: dir.path().to_string_lossy().to_string(),
        ..AppConfig::default()
    };
    cfg.scheduler.tick_interval_ms = 20;
    cfg.scheduler.kill_grace_ms = 50;

    let runner = ScriptedRunner::new();
    let ctx = AppContext::with_services(
        cfg,
        Services {
            store: store.clone(),
            runner: runner.clone(),
        },
    );
    Harness {
        ctx,
        runner,
        store,
        _dir: dir,
    }
}

impl Harness {
    /// A second context over the same store, as another process would have.
    pub fn sibling(&self) -> (AppContext, Arc<ScriptedRunner>) {
        let runner = ScriptedRunner::new();
        let ctx = AppContext::with_services(
            self.ctx.cfg().clone(),
            Services {
                store: self.store.clone(),
                runner: runner.clone(),
            },
        );
        (ctx, runner)
    }
}

/// Memory store whose first write of a `skipped` status fails.
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryTaskStore,
    failed_once: AtomicBool,
}

#[async_trait]
impl TaskStore for FlakyStore {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn create(&self, record: TaskRecord) -> Result<(), StoreError> {
        self.inner.create(record).await
    }

    async fn update(&self, id: &str, patch: TaskPatch) -> Result<TaskRecord, StoreError> {
        if patch.status == Some(TaskStatus::Skipped) && !self.failed_once.swap(true, Ordering::SeqCst)
        {
            return Err(StoreError::Io {
                path: id.to_string(),
                source: std::io::Error::other("disk unavailable"),
            });
        }
        self.inner.update(id, patch).await
    }

    async fn get(&self, id: &str) -> Result<TaskRecord, StoreError> {
        self.inner.get(id).await
    }

    async fn list(&self, filter: &TaskFilter) -> Result<Vec<TaskRecord>, StoreError> {
        self.inner.list(filter).await
    }

    async fn create_batch(
        &self,
        batch: BatchRecord,
        tasks: Vec<TaskRecord>,
    ) -> Result<(), StoreError> {
        self.inner.create_batch(batch, tasks).await
    }

    async fn update_batch(&self, id: &str, patch: BatchPatch) -> Result<BatchRecord, StoreError> {
        self.inner.update_batch(id, patch).await
    }

    async fn get_batch(&self, id: &str) -> Result<BatchRecord, StoreError> {
        self.inner.get_batch(id).await
    }

    async fn list_batches(&self) -> Result<Vec<BatchRecord>, StoreError> {
        self.inner.list_batches().await
    }
}

/// A gemini task whose prompt is a script; the name doubles as the label.
pub fn task(name: &str, script: &str, deps: &[&str]) -> TaskDefinition {
    let mut t = TaskDefinition::new(name, WorkerKind::Gemini, format!("name:{name} {script}"));
    t.dependencies = deps.iter().map(|d| d.to_string()).collect();
    t
}

pub fn prioritized(mut t: TaskDefinition, p: Priority) -> TaskDefinition {
    t.priority = p;
    t
}

pub fn batch(concurrency: usize, tasks: Vec<TaskDefinition>) -> BatchDefinition {
    BatchDefinition {
        name: None,
        concurrency: Some(concurrency),
        tasks,
    }
}

/// Waits up to two seconds for `n` scripted processes to be alive.
pub async fn wait_running(runner: &ScriptedRunner, n: usize) -> bool {
    for _ in 0..200 {
        if runner.running() == n {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

/// Waits up to five seconds for every member of the batch to be terminal.
pub async fn wait_resolved(h: &Harness, batch_id: &str) -> bool {
    for _ in 0..500 {
        if h.ctx.query().is_batch_resolved(batch_id).await.unwrap_or(false) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

/// Waits up to five seconds for the batch record to reach `completed`.
pub async fn wait_completed(h: &Harness, batch_id: &str) -> bool {
    for _ in 0..500 {
        if let Ok(b) = h.store.get_batch(batch_id).await {
            if b.state == BatchState::Completed {
                return true;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
