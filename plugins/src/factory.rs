use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;

use emrakul_core::api::{
    expand_path, AppConfig, MemoryTaskStore, RunnerPlugin, StoreBackend, TaskStore,
};

use crate::runner::ProcessRunnerPlugin;
use crate::store::FileTaskStore;

/// `store.directory`, else `<data_dir>/tasks`.
pub fn store_dir(cfg: &AppConfig) -> PathBuf {
    match cfg.store.directory.as_deref() {
        Some(dir) if !dir.trim().is_empty() => expand_path(dir),
        _ => expand_path(&cfg.data_dir).join("tasks"),
    }
}

pub fn build_store(cfg: &AppConfig) -> Result<Arc<dyn TaskStore>> {
    match cfg.store.backend {
        StoreBackend::File => {
            let dir = store_dir(cfg);
            let store = FileTaskStore::open(&dir)?;
            tracing::debug!(dir = %dir.display(), "file task store opened");
            Ok(Arc::new(store))
        }
        StoreBackend::Memory => {
            tracing::warn!("memory task store selected; records end with this process");
            Ok(Arc::new(MemoryTaskStore::new()))
        }
    }
}

pub fn build_runner(_cfg: &AppConfig) -> Arc<dyn RunnerPlugin> {
    Arc::new(ProcessRunnerPlugin::new())
}
