use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Root for the store, logs and scratch files. Filled in by `load_default`.
    #[serde(default)]
    pub data_dir: String,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Per-worker overrides keyed by worker name (`codex`, `gemini`, ...).
    #[serde(default)]
    pub workers: BTreeMap<String, WorkerOverride>,

    /// Named remote execution targets.
    #[serde(default)]
    pub devices: BTreeMap<String, DeviceConfig>,

    /// Directory holding `<worker>.md` system prompts.
    #[serde(default)]
    pub prompts_dir: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_enabled")]
    pub enabled: bool,

    /// If true, log to stderr.
    #[serde(default = "default_logging_console")]
    pub console: bool,

    /// If true, log to a file under `directory` (or OS temp dir if unset).
    #[serde(default = "default_logging_file")]
    pub file: bool,

    /// EnvFilter string, e.g. "info" or "emrakul_core=debug".
    #[serde(default = "default_logging_level")]
    pub level: String,

    #[serde(default)]
    pub directory: Option<String>,
}

fn default_logging_enabled() -> bool {
    true
}

fn default_logging_console() -> bool {
    true
}

fn default_logging_file() -> bool {
    false
}

fn default_logging_level() -> String {
    "warn".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: default_logging_enabled(),
            console: default_logging_console(),
            file: default_logging_file(),
            level: default_logging_level(),
            directory: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    File,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_backend")]
    pub backend: StoreBackend,

    /// Defaults to `<data_dir>/tasks`.
    #[serde(default)]
    pub directory: Option<String>,
}

fn default_store_backend() -> StoreBackend {
    StoreBackend::File
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_store_backend(),
            directory: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// In-flight bound for batches that do not declare their own.
    #[serde(default = "default_concurrency")]
    pub default_concurrency: usize,

    /// How often a driver re-reads its batch record (cross-process cancel).
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Delay between SIGTERM and SIGKILL when a worker must be stopped.
    #[serde(default = "default_kill_grace_ms")]
    pub kill_grace_ms: u64,

    /// Bytes kept per output stream (tail).
    #[serde(default = "default_capture_bytes")]
    pub capture_bytes: usize,

    #[serde(default = "default_verify_timeout_secs")]
    pub verify_timeout_secs: u64,

    /// Lifetime of a batch driver's lease; the driver renews it while alive.
    #[serde(default = "default_driver_lease_ms")]
    pub driver_lease_ms: u64,
}

fn default_concurrency() -> usize {
    5
}

fn default_tick_interval_ms() -> u64 {
    500
}

fn default_kill_grace_ms() -> u64 {
    5_000
}

fn default_capture_bytes() -> usize {
    256 * 1024
}

fn default_verify_timeout_secs() -> u64 {
    60
}

fn default_driver_lease_ms() -> u64 {
    30_000
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            default_concurrency: default_concurrency(),
            tick_interval_ms: default_tick_interval_ms(),
            kill_grace_ms: default_kill_grace_ms(),
            capture_bytes: default_capture_bytes(),
            verify_timeout_secs: default_verify_timeout_secs(),
            driver_lease_ms: default_driver_lease_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerOverride {
    #[serde(default = "default_worker_enabled")]
    pub enabled: bool,

    /// Replaces the executable name (e.g. an absolute path).
    #[serde(default)]
    pub executable: Option<String>,

    /// Replaces the default timeout; `0` disables the timeout.
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Appended after the template arguments.
    #[serde(default)]
    pub extra_args: Vec<String>,
}

fn default_worker_enabled() -> bool {
    true
}

impl Default for WorkerOverride {
    fn default() -> Self {
        Self {
            enabled: default_worker_enabled(),
            executable: None,
            timeout_secs: None,
            extra_args: Vec::new(),
        }
    }
}

/// A remote target reached through a pre-configured shell channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    #[serde(default = "default_device_program")]
    pub program: String,

    /// Arguments placed before the remote command, typically the host.
    #[serde(default)]
    pub args: Vec<String>,

    /// Working directory on the remote side; the task's own directory when unset.
    #[serde(default)]
    pub remote_dir: Option<String>,
}

fn default_device_program() -> String {
    "ssh".to_string()
}
