use async_trait::async_trait;

use crate::error::StoreError;

use super::types::{BatchPatch, BatchRecord, TaskFilter, TaskPatch, TaskRecord};

/// Keyed record store with atomic read-modify-write updates.
///
/// `update` validates the patch against the current record and commits
/// status and result together; readers never see one without the other.
/// Records are kept until removed externally; there is no eviction.
#[async_trait]
pub trait TaskStore: Send + Sync {
    fn name(&self) -> &str;

    async fn create(&self, record: TaskRecord) -> Result<(), StoreError>;

    async fn update(&self, id: &str, patch: TaskPatch) -> Result<TaskRecord, StoreError>;

    async fn get(&self, id: &str) -> Result<TaskRecord, StoreError>;

    /// Records matching `filter`, oldest first.
    async fn list(&self, filter: &TaskFilter) -> Result<Vec<TaskRecord>, StoreError>;

    /// Creates a batch record together with its member tasks.
    ///
    /// All ids are checked before anything is written.
    async fn create_batch(
        &self,
        batch: BatchRecord,
        tasks: Vec<TaskRecord>,
    ) -> Result<(), StoreError>;

    async fn update_batch(&self, id: &str, patch: BatchPatch) -> Result<BatchRecord, StoreError>;

    async fn get_batch(&self, id: &str) -> Result<BatchRecord, StoreError>;

    async fn list_batches(&self) -> Result<Vec<BatchRecord>, StoreError>;
}

pub fn sort_records(records: &mut [TaskRecord]) {
    records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
}

pub fn sort_batches(batches: &mut [BatchRecord]) {
    batches.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
}
