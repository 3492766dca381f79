use std::path::{Path, PathBuf};

use async_trait::async_trait;
use emrakul_core::api::{
    is_safe_id, sort_batches, sort_records, BatchPatch, BatchRecord, StoreError, TaskFilter,
    TaskPatch, TaskRecord, TaskStore,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;

/// One JSON file per record: `<root>/<task-id>.json` and
/// `<root>/batches/<batch-id>.json`.
///
/// Writes go to a temporary file that is renamed over the target, so a
/// reader in any process sees either the old record or the new one. The
/// mutex serializes read-modify-write cycles inside this process; separate
/// processes touching the same record race, last rename wins. Batch driver
/// leases share that window: two drivers claiming at the same instant can
/// both succeed.
pub struct FileTaskStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

fn io_err(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.display().to_string(),
        source,
    }
}

fn check_id(id: &str) -> Result<(), StoreError> {
    if is_safe_id(id) {
        Ok(())
    } else {
        Err(StoreError::InvalidId(id.to_string()))
    }
}

impl FileTaskStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        let batches = root.join("batches");
        std::fs::create_dir_all(&batches).map_err(|e| io_err(&batches, e))?;
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn task_path(&self, id: &str) -> PathBuf {
        self.root.join(format!("{id}.json"))
    }

    fn batch_dir(&self) -> PathBuf {
        self.root.join("batches")
    }

    fn batch_path(&self, id: &str) -> PathBuf {
        self.batch_dir().join(format!("{id}.json"))
    }

    async fn read<T: DeserializeOwned>(path: &Path, id: &str) -> Result<T, StoreError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(id.to_string()))
            }
            Err(e) => Err(io_err(path, e)),
        }
    }

    async fn write<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(value)?;
        let tmp = path.with_extension(format!("json.tmp-{}", uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| io_err(&tmp, e))?;
        if let Err(e) = tokio::fs::rename(&tmp, path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(io_err(path, e));
        }
        Ok(())
    }

    async fn exists(path: &Path) -> Result<bool, StoreError> {
        tokio::fs::try_exists(path)
            .await
            .map_err(|e| io_err(path, e))
    }

    /// Every `*.json` record in `dir`; unreadable files are logged and skipped.
    async fn read_all<T: DeserializeOwned>(dir: &Path) -> Result<Vec<T>, StoreError> {
        let mut entries = tokio::fs::read_dir(dir).await.map_err(|e| io_err(dir, e))?;
        let mut out = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| io_err(dir, e))? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = match tokio::fs::read(&path).await {
                Ok(b) => b,
                // Renamed away between listing and reading.
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(io_err(&path, e)),
            };
            match serde_json::from_slice(&bytes) {
                Ok(rec) => out.push(rec),
                Err(e) => tracing::warn!(path = %path.display(), "skipping unreadable record: {}", e),
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl TaskStore for FileTaskStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn create(&self, record: TaskRecord) -> Result<(), StoreError> {
        check_id(&record.id)?;
        let _guard = self.write_lock.lock().await;
        let path = self.task_path(&record.id);
        if Self::exists(&path).await? {
            return Err(StoreError::DuplicateId(record.id));
        }
        Self::write(&path, &record).await
    }

    async fn update(&self, id: &str, patch: TaskPatch) -> Result<TaskRecord, StoreError> {
        check_id(id)?;
        let _guard = self.write_lock.lock().await;
        let path = self.task_path(id);
        let mut record: TaskRecord = Self::read(&path, id).await?;
        record.apply(patch)?;
        Self::write(&path, &record).await?;
        Ok(record)
    }

    async fn get(&self, id: &str) -> Result<TaskRecord, StoreError> {
        check_id(id)?;
        Self::read(&self.task_path(id), id).await
    }

    async fn list(&self, filter: &TaskFilter) -> Result<Vec<TaskRecord>, StoreError> {
        let mut out: Vec<TaskRecord> = Self::read_all(&self.root)
            .await?
            .into_iter()
            .filter(|r: &TaskRecord| filter.matches(r))
            .collect();
        sort_records(&mut out);
        Ok(out)
    }

    async fn create_batch(
        &self,
        batch: BatchRecord,
        tasks: Vec<TaskRecord>,
    ) -> Result<(), StoreError> {
        check_id(&batch.id)?;
        for task in &tasks {
            check_id(&task.id)?;
        }
        let _guard = self.write_lock.lock().await;

        let batch_path = self.batch_path(&batch.id);
        if Self::exists(&batch_path).await? {
            return Err(StoreError::DuplicateId(batch.id));
        }
        for task in &tasks {
            if Self::exists(&self.task_path(&task.id)).await? {
                return Err(StoreError::DuplicateId(task.id.clone()));
            }
        }

        // Members first: a batch file never points at missing tasks.
        let mut written = Vec::with_capacity(tasks.len());
        let mut result = Ok(());
        for task in &tasks {
            let path = self.task_path(&task.id);
            if let Err(e) = Self::write(&path, task).await {
                result = Err(e);
                break;
            }
            written.push(path);
        }
        if result.is_ok() {
            result = Self::write(&batch_path, &batch).await;
        }
        if result.is_err() {
            for path in &written {
                if let Err(e) = tokio::fs::remove_file(path).await {
                    tracing::warn!(path = %path.display(), "could not remove partial batch member: {}", e);
                }
            }
        }
        result
    }

    async fn update_batch(&self, id: &str, patch: BatchPatch) -> Result<BatchRecord, StoreError> {
        check_id(id)?;
        let _guard = self.write_lock.lock().await;
        let path = self.batch_path(id);
        let mut batch: BatchRecord = Self::read(&path, id).await?;
        batch.apply(patch)?;
        Self::write(&path, &batch).await?;
        Ok(batch)
    }

    async fn get_batch(&self, id: &str) -> Result<BatchRecord, StoreError> {
        check_id(id)?;
        Self::read(&self.batch_path(id), id).await
    }

    async fn list_batches(&self) -> Result<Vec<BatchRecord>, StoreError> {
        let mut out: Vec<BatchRecord> = Self::read_all(&self.batch_dir()).await?;
        sort_batches(&mut out);
        Ok(out)
    }
}
