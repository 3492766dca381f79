//! ServicesFactory implementation: builds the store and runner from config for the CLI.
use async_trait::async_trait;
use emrakul_core::api::{AppConfig, RunnerError, Services, ServicesFactory};

use crate::factory;

pub struct PluginServicesFactory;

impl Default for PluginServicesFactory {
    fn default() -> Self {
        Self
    }
}

#[async_trait]
impl ServicesFactory for PluginServicesFactory {
    async fn build_services(&self, cfg: &AppConfig) -> Result<Services, RunnerError> {
        let store = factory::build_store(cfg)?;
        let runner = factory::build_runner(cfg);
        Ok(Services { store, runner })
    }
}
