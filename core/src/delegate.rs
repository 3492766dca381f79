use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinSet;

use crate::error::ExecutorError;
use crate::executor::TaskExecutor;
use crate::store::{TaskRecord, TaskSpec, TaskStatus};
use crate::util::new_task_id;

/// Ad-hoc (single task) submission surface.
pub struct Delegator {
    executor: Arc<TaskExecutor>,
    background: Mutex<JoinSet<()>>,
}

impl Delegator {
    pub fn new(executor: Arc<TaskExecutor>) -> Self {
        Self {
            executor,
            background: Mutex::new(JoinSet::new()),
        }
    }

    /// Validates `spec` and writes a `pending` record. Nothing is launched.
    pub async fn register(&self, mut spec: TaskSpec) -> Result<TaskRecord, ExecutorError> {
        self.executor.commands().validate(&spec)?;
        spec.dependencies.clear();
        let record = TaskRecord::new(new_task_id(spec.worker.as_str()), spec);
        self.executor.store().create(record.clone()).await?;
        tracing::info!(task_id = %record.id, worker = %record.spec.worker, "task submitted");
        Ok(record)
    }

    /// Executes a previously registered pending record in the caller's task.
    pub async fn run_pending(&self, id: &str) -> Result<TaskRecord, ExecutorError> {
        self.executor.execute(id, None).await
    }

    /// Synchronous delegation: returns once the worker has finished.
    pub async fn delegate(&self, spec: TaskSpec) -> Result<TaskRecord, ExecutorError> {
        let record = self.register(spec).await?;
        self.run_pending(&record.id).await
    }

    /// Fire-and-forget delegation: returns the id once the record exists.
    pub async fn delegate_background(
        self: &Arc<Self>,
        spec: TaskSpec,
    ) -> Result<String, ExecutorError> {
        let record = self.register(spec).await?;
        let id = record.id.clone();
        let executor = self.executor.clone();
        self.background.lock().await.spawn(async move {
            if let Err(e) = executor.execute(&id, None).await {
                tracing::error!(task_id = %id, "background task failed to complete: {}", e);
            }
        });
        Ok(record.id)
    }

    /// `submitAdHoc`: the task id in both modes; the outcome is read back from the store.
    pub async fn submit_ad_hoc(
        self: &Arc<Self>,
        spec: TaskSpec,
        background: bool,
    ) -> Result<String, ExecutorError> {
        if background {
            self.delegate_background(spec).await
        } else {
            Ok(self.delegate(spec).await?.id)
        }
    }

    /// Invocation fields of an earlier task, for resubmission by the caller.
    pub async fn retry_spec(&self, task_id: &str) -> Result<TaskSpec, ExecutorError> {
        let previous = self.executor.store().get(task_id).await?;
        if !previous.status.is_terminal() {
            tracing::warn!(task_id = %task_id, status = %previous.status, "retrying a task that has not finished");
        }
        let mut spec = previous.spec;
        spec.dependencies.clear();
        Ok(spec)
    }

    /// Submits a new task with the same invocation as `task_id`.
    pub async fn retry(
        self: &Arc<Self>,
        task_id: &str,
        background: bool,
    ) -> Result<String, ExecutorError> {
        let spec = self.retry_spec(task_id).await?;
        let id = self.submit_ad_hoc(spec, background).await?;
        tracing::info!(task_id = %id, retry_of = %task_id, "task resubmitted");
        Ok(id)
    }

    /// Waits for every background task started by this delegator.
    pub async fn wait_background(&self) {
        let mut set = self.background.lock().await;
        while set.join_next().await.is_some() {}
    }

    pub async fn background_in_flight(&self) -> usize {
        self.background.lock().await.len()
    }
}

/// Terminal status of a finished ad-hoc run, as a process exit code.
pub fn exit_code_for(record: &TaskRecord) -> i32 {
    match record.status {
        TaskStatus::Succeeded => 0,
        _ => 1,
    }
}
