use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::StoreError;

use super::traits::{sort_batches, sort_records, TaskStore};
use super::types::{BatchPatch, BatchRecord, TaskFilter, TaskPatch, TaskRecord};

#[derive(Default)]
struct Inner {
    tasks: HashMap<String, TaskRecord>,
    batches: HashMap<String, BatchRecord>,
}

/// Process-local store, used for tests and `store.backend = "memory"`.
#[derive(Default)]
pub struct MemoryTaskStore {
    inner: RwLock<Inner>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn create(&self, record: TaskRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if inner.tasks.contains_key(&record.id) {
            return Err(StoreError::DuplicateId(record.id));
        }
        inner.tasks.insert(record.id.clone(), record);
        Ok(())
    }

    async fn update(&self, id: &str, patch: TaskPatch) -> Result<TaskRecord, StoreError> {
        let mut inner = self.inner.write().await;
        let current = inner
            .tasks
            .get(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        let mut next = current.clone();
        next.apply(patch)?;
        inner.tasks.insert(id.to_string(), next.clone());
        Ok(next)
    }

    async fn get(&self, id: &str) -> Result<TaskRecord, StoreError> {
        self.inner
            .read()
            .await
            .tasks
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn list(&self, filter: &TaskFilter) -> Result<Vec<TaskRecord>, StoreError> {
        let inner = self.inner.read().await;
        let mut out: Vec<TaskRecord> = inner
            .tasks
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        sort_records(&mut out);
        Ok(out)
    }

    async fn create_batch(
        &self,
        batch: BatchRecord,
        tasks: Vec<TaskRecord>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if inner.batches.contains_key(&batch.id) {
            return Err(StoreError::DuplicateId(batch.id));
        }
        if let Some(dup) = tasks.iter().find(|t| inner.tasks.contains_key(&t.id)) {
            return Err(StoreError::DuplicateId(dup.id.clone()));
        }
        for task in tasks {
            inner.tasks.insert(task.id.clone(), task);
        }
        inner.batches.insert(batch.id.clone(), batch);
        Ok(())
    }

    async fn update_batch(&self, id: &str, patch: BatchPatch) -> Result<BatchRecord, StoreError> {
        let mut inner = self.inner.write().await;
        let current = inner
            .batches
            .get(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        let mut next = current.clone();
        next.apply(patch)?;
        inner.batches.insert(id.to_string(), next.clone());
        Ok(next)
    }

    async fn get_batch(&self, id: &str) -> Result<BatchRecord, StoreError> {
        self.inner
            .read()
            .await
            .batches
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn list_batches(&self) -> Result<Vec<BatchRecord>, StoreError> {
        let mut out: Vec<BatchRecord> = self.inner.read().await.batches.values().cloned().collect();
        sort_batches(&mut out);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::store::{TaskResult, TaskSpec, TaskStatus};
    use crate::worker::WorkerKind;

    fn record(id: &str) -> TaskRecord {
        TaskRecord::new(id, TaskSpec::new(WorkerKind::Gemini, "summarise", "/tmp"))
    }

    #[tokio::test]
    async fn create_rejects_duplicates_and_get_reports_missing() {
        let store = MemoryTaskStore::new();
        store.create(record("a")).await.unwrap();
        assert!(matches!(
            store.create(record("a")).await,
            Err(StoreError::DuplicateId(id)) if id == "a"
        ));
        assert!(matches!(
            store.get("nope").await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn get_returns_last_written_fields() {
        let store = MemoryTaskStore::new();
        store.create(record("a")).await.unwrap();
        store.update("a", TaskPatch::running()).await.unwrap();
        let result = TaskResult {
            exit_code: Some(0),
            stdout: "done".into(),
            ..TaskResult::skipped("")
        };
        let written = store
            .update("a", TaskPatch::finish(TaskStatus::Succeeded, result))
            .await
            .unwrap();
        assert_eq!(store.get("a").await.unwrap(), written);
    }

    #[tokio::test]
    async fn concurrent_readers_never_see_status_without_result() {
        let store = Arc::new(MemoryTaskStore::new());
        for i in 0..20 {
            store.create(record(&format!("t{i}"))).await.unwrap();
        }

        let writer = {
            let store = store.clone();
            tokio::spawn(async move {
                for i in 0..20 {
                    let id = format!("t{i}");
                    store.update(&id, TaskPatch::running()).await.unwrap();
                    let result = TaskResult {
                        exit_code: Some(0),
                        ..TaskResult::skipped("")
                    };
                    store
                        .update(&id, TaskPatch::finish(TaskStatus::Succeeded, result))
                        .await
                        .unwrap();
                    tokio::task::yield_now().await;
                }
            })
        };

        for _ in 0..200 {
            for rec in store.list(&TaskFilter::default()).await.unwrap() {
                assert_eq!(rec.status.is_terminal(), rec.result.is_some());
            }
            tokio::task::yield_now().await;
        }
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn create_batch_is_all_or_nothing_on_duplicates() {
        let store = MemoryTaskStore::new();
        store.create(record("b")).await.unwrap();
        let batch = BatchRecord::new("batch-1", None, Vec::new(), 2);
        let err = store
            .create_batch(batch, vec![record("a"), record("b")])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateId(_)));
        assert!(store.get("a").await.is_err());
        assert!(store.get_batch("batch-1").await.is_err());
    }
}
