use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::config::{expand_path, SchedulerConfig};
use crate::error::{ExecutorError, RunnerError};
use crate::runner::{
    invoke, InvocationOutcome, InvocationResult, InvokeOptions, RunnerPlugin, RunnerStartArgs,
};
use crate::store::{FailureKind, TaskPatch, TaskRecord, TaskResult, TaskStatus, TaskStore};
use crate::worker::CommandBuilder;

/// Runs one pending task record to a terminal state.
pub struct TaskExecutor {
    store: Arc<dyn TaskStore>,
    runner: Arc<dyn RunnerPlugin>,
    commands: Arc<CommandBuilder>,
    kill_grace: Duration,
    capture_bytes: usize,
    verify_timeout: Duration,
}

impl TaskExecutor {
    pub fn new(
        store: Arc<dyn TaskStore>,
        runner: Arc<dyn RunnerPlugin>,
        commands: Arc<CommandBuilder>,
        cfg: &SchedulerConfig,
    ) -> Self {
        Self {
            store,
            runner,
            commands,
            kill_grace: Duration::from_millis(cfg.kill_grace_ms),
            capture_bytes: cfg.capture_bytes.max(1),
            verify_timeout: Duration::from_secs(cfg.verify_timeout_secs),
        }
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    pub fn commands(&self) -> &Arc<CommandBuilder> {
        &self.commands
    }

    /// Marks the record running, invokes the worker and persists the result.
    ///
    /// Worker failures end up in the record; `Err` is reserved for store
    /// failures and records that are not `pending`.
    pub async fn execute(
        &self,
        id: &str,
        cancel: Option<watch::Receiver<bool>>,
    ) -> Result<TaskRecord, ExecutorError> {
        let record = self.store.update(id, TaskPatch::running()).await?;
        tracing::info!(
            task_id = %id,
            worker = %record.spec.worker,
            device = %record.spec.device,
            "task started"
        );

        let (status, result) = self.run(&record, cancel).await;

        match (&status, result.failure) {
            (TaskStatus::Succeeded, _) => {
                tracing::info!(task_id = %id, duration_ms = result.duration_ms, "task succeeded")
            }
            (_, Some(FailureKind::Timeout)) => {
                tracing::warn!(task_id = %id, "task timed out")
            }
            (_, kind) => tracing::info!(
                task_id = %id,
                failure = ?kind,
                exit_code = ?result.exit_code,
                "task failed"
            ),
        }

        Ok(self
            .store
            .update(id, TaskPatch::finish(status, result))
            .await?)
    }

    async fn run(
        &self,
        record: &TaskRecord,
        cancel: Option<watch::Receiver<bool>>,
    ) -> (TaskStatus, TaskResult) {
        if cancel.as_ref().is_some_and(|rx| *rx.borrow()) {
            return (
                TaskStatus::Failed,
                TaskResult::failed(FailureKind::Cancelled, "cancelled before launch"),
            );
        }

        let start = match self.commands.build(&record.spec) {
            Ok(start) => start,
            Err(e) => return (TaskStatus::Failed, launch_failure(e)),
        };
        tracing::debug!(task_id = %record.id, cmd = %start.cmd, args = ?start.args, "worker command");

        let opts = InvokeOptions {
            timeout: self.commands.timeout(&record.spec),
            kill_grace: self.kill_grace,
            capture_bytes: self.capture_bytes,
        };
        let inv = match invoke(self.runner.as_ref(), &start, &opts, cancel.clone()).await {
            Ok(inv) => inv,
            Err(e) => return (TaskStatus::Failed, launch_failure(e)),
        };

        let mut result = to_result(&inv);
        match inv.outcome {
            InvocationOutcome::Exited(0) => {}
            InvocationOutcome::Exited(code) => {
                result.failure = Some(FailureKind::NonZeroExit);
                result.message = Some(format!("worker exited with code {code}"));
                return (TaskStatus::Failed, result);
            }
            InvocationOutcome::TimedOut => {
                result.failure = Some(FailureKind::Timeout);
                result.message = opts
                    .timeout
                    .map(|t| format!("timed out after {}s", t.as_secs()));
                return (TaskStatus::Failed, result);
            }
            InvocationOutcome::Cancelled => {
                result.failure = Some(FailureKind::Cancelled);
                result.message = Some("batch cancelled".into());
                return (TaskStatus::Failed, result);
            }
        }

        if let Some(cmd) = record.spec.verify.as_deref() {
            if let Err(message) = self.verify(record, cmd, cancel).await {
                result.failure = Some(FailureKind::VerificationFailed);
                result.stderr.push_str(&message);
                result.message = Some(format!("verification failed: {cmd}"));
                result.ended_at = chrono::Utc::now();
                return (TaskStatus::Failed, result);
            }
        }

        (TaskStatus::Succeeded, result)
    }

    /// Runs the verify command locally; `Err` carries its output.
    async fn verify(
        &self,
        record: &TaskRecord,
        cmd: &str,
        cancel: Option<watch::Receiver<bool>>,
    ) -> Result<(), String> {
        let start = RunnerStartArgs {
            cmd: "sh".into(),
            args: vec!["-c".into(), cmd.to_string()],
            envs: HashMap::new(),
            cwd: Some(expand_path(&record.spec.working_dir)),
        };
        let opts = InvokeOptions {
            timeout: Some(self.verify_timeout),
            kill_grace: self.kill_grace,
            capture_bytes: self.capture_bytes,
        };
        tracing::debug!(task_id = %record.id, verify = %cmd, "running verification");

        match invoke(self.runner.as_ref(), &start, &opts, cancel).await {
            Ok(inv) if inv.outcome == InvocationOutcome::Exited(0) => Ok(()),
            Ok(inv) => Err(format!(
                "\n--- verify ({}) ---\n{}{}",
                match inv.outcome {
                    InvocationOutcome::Exited(code) => format!("exit {code}"),
                    InvocationOutcome::TimedOut => "timed out".to_string(),
                    InvocationOutcome::Cancelled => "cancelled".to_string(),
                },
                inv.stdout,
                inv.stderr
            )),
            Err(e) => Err(format!("\n--- verify ---\n{e}")),
        }
    }
}

fn to_result(inv: &InvocationResult) -> TaskResult {
    TaskResult {
        exit_code: inv.exit_code(),
        failure: None,
        stdout: inv.stdout.clone(),
        stderr: inv.stderr.clone(),
        stdout_truncated: inv.stdout_truncated,
        stderr_truncated: inv.stderr_truncated,
        started_at: Some(inv.started_at),
        ended_at: inv.ended_at,
        duration_ms: inv.duration_ms,
        message: None,
    }
}

fn launch_failure(err: RunnerError) -> TaskResult {
    let kind = match err {
        RunnerError::Launch(_) => FailureKind::LaunchError,
        _ => FailureKind::Interrupted,
    };
    let mut result = TaskResult::failed(kind, err.to_string());
    result.stderr = err.to_string();
    result
}
