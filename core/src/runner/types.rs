use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerStartArgs {
    pub cmd: String,
    pub args: Vec<String>,
    pub envs: HashMap<String, String>,
    /// Process working directory; inherited when `None`.
    pub cwd: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Signal {
    Term,
    Kill,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RunOutcome {
    /// `128 + n` for a process ended by signal `n`; `-1` when unknown.
    pub exit_code: i32,
}

#[derive(Debug, Clone)]
pub struct InvokeOptions {
    pub timeout: Option<Duration>,
    /// Time between the graceful and the forced stop.
    pub kill_grace: Duration,
    /// Tail kept per stream.
    pub capture_bytes: usize,
}

impl Default for InvokeOptions {
    fn default() -> Self {
        Self {
            timeout: None,
            kill_grace: Duration::from_secs(5),
            capture_bytes: 256 * 1024,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationOutcome {
    Exited(i32),
    TimedOut,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct InvocationResult {
    pub outcome: InvocationOutcome,
    pub stdout: String,
    pub stderr: String,
    pub stdout_truncated: bool,
    pub stderr_truncated: bool,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl InvocationResult {
    /// Exit code of a process that ran to completion.
    pub fn exit_code(&self) -> Option<i32> {
        match self.outcome {
            InvocationOutcome::Exited(code) => Some(code),
            _ => None,
        }
    }
}
