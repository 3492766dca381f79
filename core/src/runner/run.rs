use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::watch;

use crate::error::RunnerError;
use crate::util::RingBytes;

use super::abort;
use super::io_pump;
use super::traits::RunnerPlugin;
use super::types::{InvocationOutcome, InvocationResult, InvokeOptions, RunnerStartArgs};

/// Upper bound for collecting buffered output once the process is gone.
const PUMP_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

async fn cancelled(rx: Option<&mut watch::Receiver<bool>>) {
    let Some(rx) = rx else {
        return std::future::pending().await;
    };
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return std::future::pending().await;
        }
    }
}

async fn drain(
    mut task: tokio::task::JoinHandle<Result<u64, RunnerError>>,
    label: &'static str,
) {
    match tokio::time::timeout(PUMP_DRAIN_TIMEOUT, &mut task).await {
        Ok(Ok(Ok(_))) => {}
        Ok(Ok(Err(e))) => tracing::warn!("{} pump failed: {}", label, e),
        Ok(Err(e)) => tracing::warn!("{} pump panicked: {}", label, e),
        Err(_) => {
            tracing::debug!("{} still open after exit (inherited by a child?), abandoning", label);
            task.abort();
        }
    }
}

/// Runs one process to completion, timeout or cancellation.
///
/// Only a failure to start is an `Err`; every launched process yields an
/// `InvocationResult`, including the captured output tails.
pub async fn invoke(
    runner: &dyn RunnerPlugin,
    args: &RunnerStartArgs,
    opts: &InvokeOptions,
    mut cancel: Option<watch::Receiver<bool>>,
) -> Result<InvocationResult, RunnerError> {
    let started_at = Utc::now();
    let clock = Instant::now();

    tracing::debug!(cmd = %args.cmd, argc = args.args.len(), cwd = ?args.cwd, "launching");
    let mut session = runner
        .start_session(args)
        .await
        .map_err(|e| RunnerError::Launch(format!("{}: {:#}", args.cmd, e)))?;

    let ring_out = RingBytes::new(opts.capture_bytes);
    let ring_err = RingBytes::new(opts.capture_bytes);
    let out_task = session
        .stdout()
        .map(|rd| io_pump::pump(rd, ring_out.clone(), "stdout"));
    let err_task = session
        .stderr()
        .map(|rd| io_pump::pump(rd, ring_err.clone(), "stderr"));

    enum Stop {
        Timeout,
        Cancel,
    }

    let (exit_status, stop) = {
        let wait_fut = session.wait();
        tokio::pin!(wait_fut);
        let deadline = async {
            match opts.timeout {
                Some(t) => tokio::time::sleep(t).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(deadline);

        tokio::select! {
            res = &mut wait_fut => (Some(res), None),
            _ = &mut deadline => (None, Some(Stop::Timeout)),
            _ = cancelled(cancel.as_mut()) => (None, Some(Stop::Cancel)),
        }
    };

    let outcome = match (exit_status, stop) {
        (Some(res), _) => {
            let status = res.map_err(|e| RunnerError::Wait(format!("{e:#}")))?;
            InvocationOutcome::Exited(status.exit_code)
        }
        (None, Some(Stop::Timeout)) => {
            tracing::warn!(
                pid = ?session.id(),
                timeout_ms = opts.timeout.map(|t| t.as_millis() as u64),
                "worker timed out, terminating"
            );
            abort::terminate(&mut session, opts.kill_grace).await?;
            InvocationOutcome::TimedOut
        }
        (None, _) => {
            tracing::info!(pid = ?session.id(), "cancel requested, terminating worker");
            abort::terminate(&mut session, opts.kill_grace).await?;
            InvocationOutcome::Cancelled
        }
    };

    if let Some(task) = out_task {
        drain(task, "stdout").await;
    }
    if let Some(task) = err_task {
        drain(task, "stderr").await;
    }

    Ok(InvocationResult {
        outcome,
        stdout: ring_out.to_string_lossy(),
        stderr: ring_err.to_string_lossy(),
        stdout_truncated: ring_out.truncated(),
        stderr_truncated: ring_err.truncated(),
        started_at,
        ended_at: Utc::now(),
        duration_ms: clock.elapsed().as_millis() as u64,
    })
}
