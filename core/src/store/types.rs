use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ExecutorError, StoreError};
use crate::worker::WorkerKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Skipped)
    }

    /// `pending -> running -> {succeeded, failed}` or `pending -> skipped`.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running)
                | (Self::Pending, Self::Skipped)
                | (Self::Running, Self::Succeeded)
                | (Self::Running, Self::Failed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "succeeded" | "success" | "completed" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            "skipped" => Ok(Self::Skipped),
            other => Err(format!("unknown task status: {other}")),
        }
    }
}

/// Dispatch priority; `P0` is dispatched first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum Priority {
    #[serde(alias = "p0")]
    P0,
    #[serde(alias = "p1")]
    P1,
    #[default]
    #[serde(alias = "p2")]
    P2,
    #[serde(alias = "p3")]
    P3,
}

impl Priority {
    /// Lower rank dispatches earlier.
    pub fn rank(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{}", self.rank())
    }
}

impl FromStr for Priority {
    type Err = ExecutorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "P0" => Ok(Self::P0),
            "P1" => Ok(Self::P1),
            "P2" => Ok(Self::P2),
            "P3" => Ok(Self::P3),
            _ => Err(ExecutorError::InvalidManifest(format!(
                "unknown priority '{s}' (expected P0..P3)"
            ))),
        }
    }
}

/// Execution target. Serialized as `"local"` or the remote device name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Device {
    #[default]
    Local,
    Remote(String),
}

impl Device {
    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local)
    }
}

impl From<String> for Device {
    fn from(value: String) -> Self {
        let trimmed = value.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("local") {
            Self::Local
        } else {
            Self::Remote(trimmed.to_string())
        }
    }
}

impl From<&str> for Device {
    fn from(value: &str) -> Self {
        Self::from(value.to_string())
    }
}

impl From<Device> for String {
    fn from(value: Device) -> Self {
        value.to_string()
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => f.write_str("local"),
            Self::Remote(name) => f.write_str(name),
        }
    }
}

/// Why a task ended `failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    LaunchError,
    Timeout,
    NonZeroExit,
    VerificationFailed,
    Cancelled,
    Interrupted,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::LaunchError => "launch_error",
            Self::Timeout => "timeout",
            Self::NonZeroExit => "non_zero_exit",
            Self::VerificationFailed => "verification_failed",
            Self::Cancelled => "cancelled",
            Self::Interrupted => "interrupted",
        };
        f.write_str(s)
    }
}

/// Terminal outcome of a task. Written exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    #[serde(default)]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub failure: Option<FailureKind>,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    #[serde(default)]
    pub stdout_truncated: bool,
    #[serde(default)]
    pub stderr_truncated: bool,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: DateTime<Utc>,
    #[serde(default)]
    pub duration_ms: u64,
    /// Human readable explanation (skip reason, launch error text, ...).
    #[serde(default)]
    pub message: Option<String>,
}

impl TaskResult {
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            exit_code: None,
            failure: None,
            stdout: String::new(),
            stderr: String::new(),
            stdout_truncated: false,
            stderr_truncated: false,
            started_at: None,
            ended_at: Utc::now(),
            duration_ms: 0,
            message: Some(reason.into()),
        }
    }

    pub fn failed(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            failure: Some(kind),
            ..Self::skipped(message)
        }
    }

    /// Result for a record found `running` with no live process behind it.
    pub fn interrupted(started_at: Option<DateTime<Utc>>) -> Self {
        let ended_at = Utc::now();
        let duration_ms = started_at
            .map(|s| (ended_at - s).num_milliseconds().max(0) as u64)
            .unwrap_or(0);
        Self {
            started_at,
            duration_ms,
            ended_at,
            ..Self::failed(
                FailureKind::Interrupted,
                "process handle lost; outcome unknown",
            )
        }
    }
}

/// Invocation fields of a task, shared by ad-hoc submissions and manifest entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub worker: WorkerKind,
    pub prompt: String,
    #[serde(default)]
    pub context_files: Vec<String>,
    pub working_dir: String,
    #[serde(default)]
    pub device: Device,
    /// Overrides the worker default; `Some(0)` disables the timeout.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub verify: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl TaskSpec {
    pub fn new(worker: WorkerKind, prompt: impl Into<String>, working_dir: impl Into<String>) -> Self {
        Self {
            worker,
            prompt: prompt.into(),
            context_files: Vec::new(),
            working_dir: working_dir.into(),
            device: Device::Local,
            timeout_secs: None,
            verify: None,
            name: None,
            priority: Priority::default(),
            dependencies: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: String,
    #[serde(default)]
    pub batch_id: Option<String>,
    #[serde(flatten)]
    pub spec: TaskSpec,
    pub status: TaskStatus,
    #[serde(default)]
    pub result: Option<TaskResult>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
}

impl TaskRecord {
    pub fn new(id: impl Into<String>, spec: TaskSpec) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            batch_id: None,
            spec,
            status: TaskStatus::Pending,
            result: None,
            created_at: now,
            updated_at: now,
            started_at: None,
        }
    }

    /// `name` for batch members, else the id.
    pub fn display_name(&self) -> &str {
        self.spec.name.as_deref().unwrap_or(&self.id)
    }

    pub fn failure(&self) -> Option<FailureKind> {
        self.result.as_ref().and_then(|r| r.failure)
    }

    /// Applies `patch` in place, enforcing the lifecycle and the status/result pairing.
    ///
    /// On error the record is left untouched.
    pub fn apply(&mut self, patch: TaskPatch) -> Result<(), StoreError> {
        let next_status = patch.status.unwrap_or(self.status);
        if next_status != self.status && !self.status.can_transition_to(next_status) {
            return Err(StoreError::InvalidTransition {
                id: self.id.clone(),
                from: self.status,
                to: next_status,
            });
        }
        if patch.result.is_some() && self.result.is_some() {
            return Err(StoreError::ResultAlreadyWritten(self.id.clone()));
        }

        let has_result = patch.result.is_some() || self.result.is_some();
        if next_status.is_terminal() && !has_result {
            return Err(StoreError::MissingResult {
                id: self.id.clone(),
                status: next_status,
            });
        }
        if !next_status.is_terminal() && has_result {
            return Err(StoreError::UnexpectedResult {
                id: self.id.clone(),
                status: next_status,
            });
        }

        let now = Utc::now();
        if next_status == TaskStatus::Running && self.status != TaskStatus::Running {
            self.started_at = Some(now);
        }
        self.status = next_status;
        if let Some(result) = patch.result {
            self.result = Some(result);
        }
        self.updated_at = now;
        Ok(())
    }
}

/// Partial update; status and result are committed together.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskPatch {
    pub status: Option<TaskStatus>,
    pub result: Option<TaskResult>,
}

impl TaskPatch {
    pub fn running() -> Self {
        Self {
            status: Some(TaskStatus::Running),
            result: None,
        }
    }

    pub fn finish(status: TaskStatus, result: TaskResult) -> Self {
        Self {
            status: Some(status),
            result: Some(result),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub worker: Option<WorkerKind>,
    pub batch_id: Option<String>,
}

impl TaskFilter {
    pub fn batch(id: impl Into<String>) -> Self {
        Self {
            batch_id: Some(id.into()),
            ..Self::default()
        }
    }

    pub fn matches(&self, record: &TaskRecord) -> bool {
        self.status.map_or(true, |s| record.status == s)
            && self.worker.map_or(true, |w| record.spec.worker == w)
            && self
                .batch_id
                .as_deref()
                .map_or(true, |b| record.batch_id.as_deref() == Some(b))
    }
}

/// Lifecycle of the driver for one batch. Never moves backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchState {
    Queued,
    Running,
    Completed,
}

impl fmt::Display for BatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchMember {
    pub name: String,
    pub task_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRecord {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Declaration order.
    pub members: Vec<BatchMember>,
    pub concurrency_limit: usize,
    pub state: BatchState,
    #[serde(default)]
    pub cancel_requested: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    /// Held by the process currently driving the batch.
    #[serde(default)]
    pub driver: Option<DriverLease>,
}

/// Claim on a batch by one driver. Expires unless renewed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverLease {
    /// Unique per drive, not per process.
    pub owner: String,
    pub pid: u32,
    pub expires_at: DateTime<Utc>,
}

impl DriverLease {
    pub fn new(owner: impl Into<String>, ttl: chrono::Duration) -> Self {
        Self {
            owner: owner.into(),
            pid: std::process::id(),
            expires_at: Utc::now() + ttl,
        }
    }

    pub fn is_live(&self) -> bool {
        self.expires_at > Utc::now()
    }
}

impl BatchRecord {
    pub fn new(
        id: impl Into<String>,
        name: Option<String>,
        members: Vec<BatchMember>,
        concurrency_limit: usize,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name,
            members,
            concurrency_limit: concurrency_limit.max(1),
            state: BatchState::Queued,
            cancel_requested: false,
            created_at: now,
            updated_at: now,
            completed_at: None,
            driver: None,
        }
    }

    /// True while another live driver holds the batch.
    pub fn is_driven(&self) -> bool {
        self.driver.as_ref().is_some_and(DriverLease::is_live)
    }

    /// Applies `patch` whole or not at all.
    pub fn apply(&mut self, patch: BatchPatch) -> Result<(), StoreError> {
        match &patch.lease {
            Some(LeaseChange::Acquire(lease)) => match &self.driver {
                Some(held) if held.owner != lease.owner && held.is_live() => {
                    return Err(StoreError::LeaseHeld {
                        id: self.id.clone(),
                        pid: held.pid,
                    });
                }
                _ => {}
            },
            Some(LeaseChange::Release { .. }) | None => {}
        }
        if let Some(next) = patch.state {
            if next < self.state {
                return Err(StoreError::InvalidBatchTransition {
                    id: self.id.clone(),
                    from: self.state,
                    to: next,
                });
            }
            if next == BatchState::Completed && self.completed_at.is_none() {
                self.completed_at = Some(Utc::now());
            }
            self.state = next;
        }
        if patch.cancel_requested == Some(true) {
            self.cancel_requested = true;
        }
        match patch.lease {
            Some(LeaseChange::Acquire(lease)) => self.driver = Some(lease),
            Some(LeaseChange::Release { owner }) => {
                if self.driver.as_ref().is_some_and(|d| d.owner == owner) {
                    self.driver = None;
                }
            }
            None => {}
        }
        self.updated_at = Utc::now();
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseChange {
    /// Takes or renews the lease; fails while someone else holds a live one.
    Acquire(DriverLease),
    /// Drops the lease if `owner` still holds it.
    Release { owner: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchPatch {
    pub state: Option<BatchState>,
    /// The flag is sticky; `Some(false)` is ignored.
    pub cancel_requested: Option<bool>,
    pub lease: Option<LeaseChange>,
}

impl BatchPatch {
    pub fn state(state: BatchState) -> Self {
        Self {
            state: Some(state),
            ..Self::default()
        }
    }

    pub fn cancel() -> Self {
        Self {
            cancel_requested: Some(true),
            ..Self::default()
        }
    }

    pub fn acquire(lease: DriverLease) -> Self {
        Self {
            lease: Some(LeaseChange::Acquire(lease)),
            ..Self::default()
        }
    }

    pub fn release(owner: impl Into<String>) -> Self {
        Self {
            lease: Some(LeaseChange::Release {
                owner: owner.into(),
            }),
            ..Self::default()
        }
    }

    /// Marks the batch completed and gives up the lease in one write.
    pub fn complete(owner: impl Into<String>) -> Self {
        Self {
            state: Some(BatchState::Completed),
            ..Self::release(owner)
        }
    }
}
