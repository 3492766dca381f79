//! Stable re-exports for consumers (`cli`, `plugins`, and external crates).
//!
//! Prefer importing from `emrakul_core::api` instead of reaching into internal modules.

pub use crate::config::{
    expand_path, finalize, get_data_dir, load_default, load_from_path, AppConfig, DeviceConfig,
    LoggingConfig, SchedulerConfig, StoreBackend, StoreConfig, WorkerOverride,
};
pub use crate::context::{AppContext, Services, ServicesFactory};
pub use crate::delegate::{exit_code_for, Delegator};
pub use crate::error::{CliError, ErrorCode, ExecutorError, RunnerError, StoreError};
pub use crate::executor::{
    resolve, BatchDefinition, BatchPlan, BatchScheduler, ManifestFormat, TaskDefinition,
    TaskExecutor, TaskGraph,
};
pub use crate::query::{
    render_batch, render_summary, render_task, render_task_list, to_json, BatchStatus, BatchView,
    MemberView, QueryService, Summary,
};
pub use crate::runner::{
    invoke, InvocationOutcome, InvocationResult, InvokeOptions, RunOutcome, RunnerPlugin,
    RunnerSession, RunnerStartArgs, Signal,
};
pub use crate::store::{
    sort_batches, sort_records, BatchMember, BatchPatch, BatchRecord, BatchState, Device,
    DriverLease, FailureKind, LeaseChange, MemoryTaskStore, Priority, TaskFilter, TaskPatch,
    TaskRecord, TaskResult, TaskSpec, TaskStatus, TaskStore,
};
pub use crate::util::{is_safe_id, RingBytes};
pub use crate::worker::{CommandBuilder, InvocationTemplate, WorkerKind, WorkerRegistry};
