use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;

use crate::error::StoreError;
use crate::store::{
    BatchRecord, BatchState, FailureKind, Priority, TaskFilter, TaskRecord, TaskStatus, TaskStore,
};
use crate::worker::WorkerKind;

/// Batch status derived from member statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Running,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemberView {
    pub name: String,
    pub task_id: String,
    pub worker: WorkerKind,
    pub priority: Priority,
    pub status: TaskStatus,
    pub failure: Option<FailureKind>,
    pub exit_code: Option<i32>,
    pub duration_ms: Option<u64>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchView {
    pub id: String,
    pub name: Option<String>,
    pub status: BatchStatus,
    /// Driver state as persisted.
    pub state: BatchState,
    pub cancel_requested: bool,
    pub concurrency_limit: usize,
    pub counts: BTreeMap<TaskStatus, usize>,
    pub tasks: Vec<MemberView>,
}

impl BatchView {
    pub fn is_resolved(&self) -> bool {
        self.status == BatchStatus::Completed
    }

    pub fn count(&self, status: TaskStatus) -> usize {
        self.counts.get(&status).copied().unwrap_or(0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Summary {
    pub total: usize,
    pub by_status: BTreeMap<TaskStatus, usize>,
    pub by_worker: BTreeMap<WorkerKind, usize>,
    pub batches: usize,
}

/// Read-only view over the store. Every call reads committed records; nothing is cached.
#[derive(Clone)]
pub struct QueryService {
    store: Arc<dyn TaskStore>,
}

impl QueryService {
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self { store }
    }

    pub async fn get_task(&self, id: &str) -> Result<TaskRecord, StoreError> {
        self.store.get(id).await
    }

    pub async fn list(&self, filter: &TaskFilter) -> Result<Vec<TaskRecord>, StoreError> {
        self.store.list(filter).await
    }

    pub async fn list_batches(&self) -> Result<Vec<BatchRecord>, StoreError> {
        self.store.list_batches().await
    }

    pub async fn get_batch(&self, id: &str) -> Result<BatchView, StoreError> {
        let batch = self.store.get_batch(id).await?;
        let mut tasks = Vec::with_capacity(batch.members.len());
        let mut counts = BTreeMap::new();
        for member in &batch.members {
            let rec = self.store.get(&member.task_id).await?;
            *counts.entry(rec.status).or_insert(0) += 1;
            tasks.push(MemberView {
                name: member.name.clone(),
                task_id: rec.id.clone(),
                worker: rec.spec.worker,
                priority: rec.spec.priority,
                status: rec.status,
                failure: rec.failure(),
                exit_code: rec.result.as_ref().and_then(|r| r.exit_code),
                duration_ms: rec.result.as_ref().map(|r| r.duration_ms),
                message: rec.result.as_ref().and_then(|r| r.message.clone()),
            });
        }

        let status = if tasks.iter().all(|t| t.status.is_terminal()) {
            BatchStatus::Completed
        } else {
            BatchStatus::Running
        };

        Ok(BatchView {
            id: batch.id,
            name: batch.name,
            status,
            state: batch.state,
            cancel_requested: batch.cancel_requested,
            concurrency_limit: batch.concurrency_limit,
            counts,
            tasks,
        })
    }

    /// True once every member is terminal.
    pub async fn is_batch_resolved(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.get_batch(id).await?.is_resolved())
    }

    pub async fn summary(&self) -> Result<Summary, StoreError> {
        let records = self.store.list(&TaskFilter::default()).await?;
        let mut summary = Summary {
            total: records.len(),
            batches: self.store.list_batches().await?.len(),
            ..Summary::default()
        };
        for rec in &records {
            *summary.by_status.entry(rec.status).or_insert(0) += 1;
            *summary.by_worker.entry(rec.spec.worker).or_insert(0) += 1;
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{
        BatchMember, MemoryTaskStore, TaskPatch, TaskResult, TaskSpec,
    };

    async fn seeded() -> (Arc<dyn TaskStore>, QueryService) {
        let store: Arc<dyn TaskStore> = Arc::new(MemoryTaskStore::new());
        let mut tasks = Vec::new();
        let mut members = Vec::new();
        for (name, worker) in [("a", WorkerKind::Codex), ("b", WorkerKind::Kimi)] {
            let mut spec = TaskSpec::new(worker, "p", "/tmp");
            spec.name = Some(name.into());
            let mut rec = TaskRecord::new(format!("{worker}-{name}"), spec);
            rec.batch_id = Some("batch-1".into());
            members.push(BatchMember {
                name: name.into(),
                task_id: rec.id.clone(),
            });
            tasks.push(rec);
        }
        store
            .create_batch(BatchRecord::new("batch-1", None, members, 2), tasks)
            .await
            .unwrap();
        store
            .create(TaskRecord::new("gemini-x", TaskSpec::new(WorkerKind::Gemini, "p", "/")))
            .await
            .unwrap();
        let query = QueryService::new(store.clone());
        (store, query)
    }

    #[tokio::test]
    async fn batch_resolves_once_all_members_are_terminal() {
        let (store, query) = seeded().await;
        assert!(!query.is_batch_resolved("batch-1").await.unwrap());

        store.update("codex-a", TaskPatch::running()).await.unwrap();
        let view = query.get_batch("batch-1").await.unwrap();
        assert_eq!(view.status, BatchStatus::Running);
        assert_eq!(view.count(TaskStatus::Running), 1);

        let failed = TaskResult {
            exit_code: Some(2),
            ..TaskResult::failed(FailureKind::NonZeroExit, "exit 2")
        };
        store
            .update("codex-a", TaskPatch::finish(TaskStatus::Failed, failed))
            .await
            .unwrap();
        store
            .update(
                "kimi-b",
                TaskPatch::finish(TaskStatus::Skipped, TaskResult::skipped("dependency 'a' failed")),
            )
            .await
            .unwrap();

        let view = query.get_batch("batch-1").await.unwrap();
        assert!(view.is_resolved());
        assert_eq!(view.tasks[0].exit_code, Some(2));
        assert_eq!(view.tasks[0].failure, Some(FailureKind::NonZeroExit));
        assert_eq!(view.count(TaskStatus::Skipped), 1);
    }

    #[tokio::test]
    async fn summary_counts_by_status_and_worker() {
        let (_, query) = seeded().await;
        let summary = query.summary().await.unwrap();
        assert_eq!(summary.total, 3);
        assert_eq!(summary.batches, 1);
        assert_eq!(summary.by_status[&TaskStatus::Pending], 3);
        assert_eq!(summary.by_worker[&WorkerKind::Gemini], 1);
    }

    #[tokio::test]
    async fn unknown_ids_are_not_found() {
        let (_, query) = seeded().await;
        assert!(matches!(query.get_task("nope").await, Err(StoreError::NotFound(_))));
        assert!(matches!(query.get_batch("nope").await, Err(StoreError::NotFound(_))));
    }
}
