use std::sync::Arc;

use crate::config::AppConfig;
use crate::delegate::Delegator;
use crate::error::RunnerError;
use crate::executor::{BatchScheduler, TaskExecutor};
use crate::query::QueryService;
use crate::runner::RunnerPlugin;
use crate::store::TaskStore;
use crate::worker::{CommandBuilder, WorkerRegistry};

/// Concrete collaborators chosen from configuration.
#[derive(Clone)]
pub struct Services {
    pub store: Arc<dyn TaskStore>,
    pub runner: Arc<dyn RunnerPlugin>,
}

#[async_trait::async_trait]
pub trait ServicesFactory: Send + Sync {
    async fn build_services(&self, cfg: &AppConfig) -> Result<Services, RunnerError>;
}

/// Everything a front end needs, wired once at startup.
#[derive(Clone)]
pub struct AppContext {
    cfg: AppConfig,
    registry: Arc<WorkerRegistry>,
    services: Services,
    scheduler: Arc<BatchScheduler>,
    delegator: Arc<Delegator>,
    query: QueryService,
}

impl AppContext {
    pub async fn new(cfg: AppConfig, factory: &dyn ServicesFactory) -> Result<Self, RunnerError> {
        let services = factory.build_services(&cfg).await?;
        Ok(Self::with_services(cfg, services))
    }

    pub fn with_services(cfg: AppConfig, services: Services) -> Self {
        let registry = Arc::new(WorkerRegistry::from_config(&cfg));
        let commands = Arc::new(CommandBuilder::new(registry.clone(), &cfg));
        let executor = Arc::new(TaskExecutor::new(
            services.store.clone(),
            services.runner.clone(),
            commands,
            &cfg.scheduler,
        ));
        let scheduler = Arc::new(BatchScheduler::new(executor.clone(), &cfg.scheduler));
        let delegator = Arc::new(Delegator::new(executor));
        let query = QueryService::new(services.store.clone());
        tracing::debug!(
            store = services.store.name(),
            runner = services.runner.name(),
            workers = registry.templates().count(),
            "context ready"
        );
        Self {
            cfg,
            registry,
            services,
            scheduler,
            delegator,
            query,
        }
    }

    pub fn cfg(&self) -> &AppConfig {
        &self.cfg
    }

    pub fn registry(&self) -> &WorkerRegistry {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.services.store
    }

    pub fn scheduler(&self) -> &Arc<BatchScheduler> {
        &self.scheduler
    }

    pub fn delegator(&self) -> &Arc<Delegator> {
        &self.delegator
    }

    pub fn query(&self) -> &QueryService {
        &self.query
    }
}
