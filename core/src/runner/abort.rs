use std::time::Duration;

use crate::error::RunnerError;

use super::traits::RunnerSession;
use super::types::{RunOutcome, Signal};

/// Graceful stop, then a forced kill if the process outlives `grace`.
pub async fn terminate(
    session: &mut Box<dyn RunnerSession>,
    grace: Duration,
) -> Result<RunOutcome, RunnerError> {
    if let Err(e) = session.signal(Signal::Term).await {
        tracing::warn!(pid = ?session.id(), "SIGTERM failed: {:#}", e);
    }

    match tokio::time::timeout(grace, session.wait()).await {
        Ok(res) => res.map_err(|e| RunnerError::Wait(format!("{e:#}"))),
        Err(_) => {
            tracing::warn!(
                pid = ?session.id(),
                grace_ms = grace.as_millis() as u64,
                "process ignored SIGTERM, escalating to SIGKILL"
            );
            session
                .signal(Signal::Kill)
                .await
                .map_err(|e| RunnerError::Signal(format!("{e:#}")))?;
            session
                .wait()
                .await
                .map_err(|e| RunnerError::Wait(format!("{e:#}")))
        }
    }
}
