use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures::FutureExt;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::config::SchedulerConfig;
use crate::error::{ExecutorError, StoreError};
use crate::store::{
    BatchMember, BatchPatch, BatchRecord, BatchState, DriverLease, TaskPatch, TaskRecord,
    TaskResult, TaskSpec, TaskStatus, TaskStore,
};
use crate::util::{new_batch_id, new_task_id};

use super::graph::TaskGraph;
use super::manifest::BatchDefinition;
use super::readiness::evaluate;
use super::task::TaskExecutor;

/// A validated batch, ready to be written to the store.
#[derive(Debug, Clone, Serialize)]
pub struct BatchPlan {
    pub name: Option<String>,
    pub concurrency: usize,
    pub tiers: Vec<Vec<String>>,
    /// Declaration order.
    pub tasks: Vec<TaskSpec>,
}

/// Consecutive passes with failed store writes before a driver gives up.
const STORE_RETRY_PASSES: u32 = 10;

type ActiveDrivers = Arc<Mutex<HashMap<String, watch::Sender<bool>>>>;

/// Removes the driver registration when a drive ends, however it ends.
struct DriverGuard {
    active: ActiveDrivers,
    id: String,
}

impl Drop for DriverGuard {
    fn drop(&mut self) {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        active.remove(&self.id);
    }
}

pub struct BatchScheduler {
    executor: Arc<TaskExecutor>,
    default_concurrency: usize,
    tick: Duration,
    lease_ms: u64,
    active: ActiveDrivers,
}

impl BatchScheduler {
    pub fn new(executor: Arc<TaskExecutor>, cfg: &SchedulerConfig) -> Self {
        Self {
            executor,
            default_concurrency: cfg.default_concurrency.max(1),
            tick: Duration::from_millis(cfg.tick_interval_ms.max(10)),
            lease_ms: cfg.driver_lease_ms.max(cfg.tick_interval_ms.max(10) * 4),
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn store(&self) -> &Arc<dyn TaskStore> {
        self.executor.store()
    }

    /// Validates a batch definition without touching the store.
    pub fn plan(
        &self,
        def: &BatchDefinition,
        default_working_dir: &str,
    ) -> Result<BatchPlan, ExecutorError> {
        if def.tasks.is_empty() {
            return Err(ExecutorError::EmptyBatch);
        }
        let mut tasks = Vec::with_capacity(def.tasks.len());
        for task in &def.tasks {
            let spec = task.to_spec(default_working_dir)?;
            self.executor.commands().validate(&spec)?;
            tasks.push(spec);
        }
        let tiers = TaskGraph::from_tasks(&def.tasks)?.validate()?;
        Ok(BatchPlan {
            name: def.name.clone(),
            concurrency: def.concurrency.unwrap_or(self.default_concurrency).max(1),
            tiers,
            tasks,
        })
    }

    /// Validates and persists a batch in `queued` state. Nothing runs yet.
    ///
    /// Validation errors leave the store untouched.
    pub async fn register_batch(
        &self,
        def: &BatchDefinition,
        default_working_dir: &str,
    ) -> Result<BatchRecord, ExecutorError> {
        let plan = self.plan(def, default_working_dir)?;
        let batch_id = new_batch_id();

        let mut members = Vec::with_capacity(plan.tasks.len());
        let mut records = Vec::with_capacity(plan.tasks.len());
        for spec in plan.tasks {
            let id = new_task_id(spec.worker.as_str());
            members.push(BatchMember {
                name: spec.name.clone().unwrap_or_else(|| id.clone()),
                task_id: id.clone(),
            });
            let mut record = TaskRecord::new(id, spec);
            record.batch_id = Some(batch_id.clone());
            records.push(record);
        }

        let batch = BatchRecord::new(batch_id, plan.name, members, plan.concurrency);
        self.store().create_batch(batch.clone(), records).await?;
        tracing::info!(
            batch_id = %batch.id,
            tasks = batch.members.len(),
            concurrency = batch.concurrency_limit,
            "batch submitted"
        );
        Ok(batch)
    }

    /// Registers the batch and drives it in the background; returns at once.
    pub async fn submit_batch(
        self: &Arc<Self>,
        def: &BatchDefinition,
        default_working_dir: &str,
    ) -> Result<String, ExecutorError> {
        let batch = self.register_batch(def, default_working_dir).await?;
        self.spawn_driver(batch.id.clone());
        Ok(batch.id)
    }

    pub fn spawn_driver(self: &Arc<Self>, batch_id: String) -> tokio::task::JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = this.run_batch(&batch_id).await {
                tracing::error!(batch_id = %batch_id, "batch driver failed: {}", e);
            }
        })
    }

    /// Drives a batch until every member is terminal.
    ///
    /// The driver holds a lease on the batch record for as long as it runs.
    /// A live lease held by another driver, in this process or another one,
    /// makes this call fail with `BatchAlreadyRunning`.
    pub async fn run_batch(&self, batch_id: &str) -> Result<BatchRecord, ExecutorError> {
        let (tx, rx) = watch::channel(false);
        let _guard = {
            let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
            if active.contains_key(batch_id) {
                return Err(ExecutorError::BatchAlreadyRunning(batch_id.to_string()));
            }
            active.insert(batch_id.to_string(), tx);
            DriverGuard {
                active: self.active.clone(),
                id: batch_id.to_string(),
            }
        };

        let owner = uuid::Uuid::new_v4().simple().to_string();
        let batch = match self
            .store()
            .update_batch(batch_id, BatchPatch::acquire(self.lease(&owner)))
            .await
        {
            Ok(batch) => batch,
            Err(StoreError::LeaseHeld { pid, .. }) => {
                tracing::warn!(batch_id = %batch_id, pid, "batch is driven by another process");
                return Err(ExecutorError::BatchAlreadyRunning(batch_id.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        let res = self.drive(batch, &owner, rx).await;
        if res.is_err() {
            if let Err(e) = self
                .store()
                .update_batch(batch_id, BatchPatch::release(owner.as_str()))
                .await
            {
                tracing::warn!(batch_id = %batch_id, "lease release failed: {}", e);
            }
        }
        res
    }

    /// Picks up a batch after its driver stopped.
    ///
    /// Members left `running` by a previous driver are failed as
    /// `interrupted`; they are never re-run. Refused while that driver's
    /// lease is still live.
    pub async fn resume_batch(&self, batch_id: &str) -> Result<BatchRecord, ExecutorError> {
        tracing::info!(batch_id = %batch_id, "resuming batch");
        self.run_batch(batch_id).await
    }

    /// Requests cancellation: pending members are skipped, running ones terminated.
    ///
    /// A driver in this process reacts immediately, one in another process on
    /// its next tick. Without any driver the pending members are skipped here.
    pub async fn cancel_batch(&self, batch_id: &str) -> Result<BatchRecord, ExecutorError> {
        let batch = self
            .store()
            .update_batch(batch_id, BatchPatch::cancel())
            .await?;
        tracing::info!(batch_id = %batch_id, "batch cancel requested");

        let local = {
            let active = self.active.lock().unwrap_or_else(|e| e.into_inner());
            active.get(batch_id).map(|tx| tx.send_replace(true)).is_some()
        };
        if local || batch.state == BatchState::Completed || batch.is_driven() {
            return Ok(batch);
        }

        let mut all_terminal = true;
        for member in &batch.members {
            let rec = self.store().get(&member.task_id).await?;
            match rec.status {
                TaskStatus::Pending => {
                    if self.skip_member(&member.task_id, "batch cancelled").await?
                        == TaskStatus::Running
                    {
                        all_terminal = false;
                    }
                }
                TaskStatus::Running => all_terminal = false,
                _ => {}
            }
        }
        if all_terminal {
            return Ok(self
                .store()
                .update_batch(batch_id, BatchPatch::state(BatchState::Completed))
                .await?);
        }
        Ok(self.store().get_batch(batch_id).await?)
    }

    fn lease(&self, owner: &str) -> DriverLease {
        DriverLease::new(owner, chrono::Duration::milliseconds(self.lease_ms as i64))
    }

    async fn skip(&self, task_id: &str, reason: &str) -> Result<TaskRecord, StoreError> {
        self.store()
            .update(
                task_id,
                TaskPatch::finish(TaskStatus::Skipped, TaskResult::skipped(reason)),
            )
            .await
    }

    /// Skips a pending member; a concurrent writer that got there first wins.
    async fn skip_member(&self, task_id: &str, reason: &str) -> Result<TaskStatus, StoreError> {
        match self.skip(task_id, reason).await {
            Ok(rec) => Ok(rec.status),
            Err(StoreError::InvalidTransition { .. }) => Ok(self.store().get(task_id).await?.status),
            Err(e) => Err(e),
        }
    }

    async fn drive(
        &self,
        batch: BatchRecord,
        owner: &str,
        mut external_cancel: watch::Receiver<bool>,
    ) -> Result<BatchRecord, ExecutorError> {
        let store = self.store().clone();
        let batch_id = batch.id.as_str();
        if batch.state == BatchState::Completed {
            return Ok(store.update_batch(batch_id, BatchPatch::release(owner)).await?);
        }

        // With the lease held, nobody else is running these.
        let mut members = Vec::with_capacity(batch.members.len());
        for member in &batch.members {
            let mut rec = store.get(&member.task_id).await?;
            if rec.status == TaskStatus::Running {
                tracing::warn!(
                    batch_id = %batch_id,
                    task_id = %rec.id,
                    "task was running when its driver stopped, marking interrupted"
                );
                rec = store
                    .update(
                        &rec.id,
                        TaskPatch::finish(TaskStatus::Failed, TaskResult::interrupted(rec.started_at)),
                    )
                    .await?;
            }
            members.push(rec);
        }

        let graph = TaskGraph::from_tasks(&members)?;
        let tiers = graph.validate()?;
        let ids: HashMap<String, String> = batch
            .members
            .iter()
            .map(|m| (m.name.clone(), m.task_id.clone()))
            .collect();
        let mut statuses: HashMap<String, TaskStatus> = batch
            .members
            .iter()
            .zip(&members)
            .map(|(m, rec)| (m.name.clone(), rec.status))
            .collect();

        store
            .update_batch(batch_id, BatchPatch::state(BatchState::Running))
            .await?;

        let limit = batch.concurrency_limit.max(1);
        let mut cancel_requested = batch.cancel_requested;
        let (task_cancel, task_cancel_rx) = watch::channel(false);
        let mut in_flight: JoinSet<(String, Result<TaskRecord, ExecutorError>)> = JoinSet::new();
        let mut tick = tokio::time::interval(self.tick);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let renew_every = Duration::from_millis(self.lease_ms / 3);
        let mut renewed_at = Instant::now();
        let mut lease_lost = false;
        // Members whose execution errored and whose record is not terminal yet.
        let mut unsettled: HashMap<String, String> = HashMap::new();
        let mut failed_passes = 0u32;
        let mut last_store_error: Option<StoreError> = None;

        loop {
            if !lease_lost && renewed_at.elapsed() >= renew_every {
                match store
                    .update_batch(batch_id, BatchPatch::acquire(self.lease(owner)))
                    .await
                {
                    Ok(_) => renewed_at = Instant::now(),
                    Err(StoreError::LeaseHeld { pid, .. }) => {
                        tracing::error!(
                            batch_id = %batch_id,
                            pid,
                            "driver lease taken over, finishing in-flight tasks only"
                        );
                        lease_lost = true;
                    }
                    Err(e) => tracing::warn!(batch_id = %batch_id, "lease renewal failed: {}", e),
                }
            }

            let mut store_failed = false;
            for (name, error) in std::mem::take(&mut unsettled) {
                match self.settle(&ids[&name], &error).await {
                    Ok(status) => {
                        statuses.insert(name, status);
                    }
                    Err(e) => {
                        tracing::warn!(batch_id = %batch_id, task = %name, "settling task failed: {}", e);
                        store_failed = true;
                        last_store_error = Some(e);
                        unsettled.insert(name, error);
                    }
                }
            }

            if lease_lost {
                // The new driver owns every remaining member.
            } else if cancel_requested {
                task_cancel.send_replace(true);
                for (name, status) in statuses.iter_mut() {
                    if *status != TaskStatus::Pending {
                        continue;
                    }
                    match self.skip_member(&ids[name], "batch cancelled").await {
                        Ok(next) => *status = next,
                        Err(e) => {
                            tracing::warn!(batch_id = %batch_id, task = %name, "skip failed: {}", e);
                            store_failed = true;
                            last_store_error = Some(e);
                        }
                    }
                }
            } else {
                let readiness = evaluate(&graph, &tiers, &statuses);
                for (name, reason) in readiness.skip {
                    match self.skip_member(&ids[&name], &reason).await {
                        Ok(status) => {
                            tracing::info!(batch_id = %batch_id, task = %name, reason = %reason, "task skipped");
                            statuses.insert(name, status);
                        }
                        Err(e) => {
                            // Still pending; the next pass computes the same skip.
                            tracing::warn!(batch_id = %batch_id, task = %name, "skip failed: {}", e);
                            store_failed = true;
                            last_store_error = Some(e);
                        }
                    }
                }
                for name in readiness.ready {
                    if in_flight.len() >= limit {
                        break;
                    }
                    let task_id = ids[&name].clone();
                    tracing::debug!(batch_id = %batch_id, task = %name, task_id = %task_id, "dispatching");
                    statuses.insert(name.clone(), TaskStatus::Running);

                    let executor = self.executor.clone();
                    let cancel = task_cancel_rx.clone();
                    in_flight.spawn(async move {
                        let res = AssertUnwindSafe(executor.execute(&task_id, Some(cancel)))
                            .catch_unwind()
                            .await
                            .unwrap_or_else(|_| {
                                Err(ExecutorError::Runner(crate::error::RunnerError::Wait(
                                    "task execution panicked".into(),
                                )))
                            });
                        (name, res)
                    });
                }
            }

            failed_passes = if store_failed { failed_passes + 1 } else { 0 };

            if in_flight.is_empty() {
                if lease_lost {
                    return Err(ExecutorError::BatchAlreadyRunning(batch_id.to_string()));
                }
                if !store_failed {
                    break;
                }
                if failed_passes >= STORE_RETRY_PASSES {
                    if let Some(e) = last_store_error.take() {
                        tracing::error!(
                            batch_id = %batch_id,
                            passes = failed_passes,
                            "store keeps failing, leaving the batch for a later resume"
                        );
                        return Err(e.into());
                    }
                }
                tick.tick().await;
                continue;
            }

            tokio::select! {
                Some(joined) = in_flight.join_next() => {
                    let (name, res) = match joined {
                        Ok(pair) => pair,
                        Err(e) => {
                            // Tasks are never aborted here and panics are caught inside.
                            tracing::error!(batch_id = %batch_id, "task join failed: {}", e);
                            continue;
                        }
                    };
                    match res {
                        Ok(rec) => {
                            statuses.insert(name, rec.status);
                        }
                        Err(e) => {
                            tracing::error!(batch_id = %batch_id, task = %name, "task execution error: {}", e);
                            unsettled.insert(name, e.to_string());
                        }
                    }
                }
                changed = external_cancel.changed(), if !cancel_requested => {
                    if changed.is_ok() && *external_cancel.borrow() {
                        tracing::info!(batch_id = %batch_id, "cancelling batch");
                        cancel_requested = true;
                    }
                }
                _ = tick.tick() => {
                    if !cancel_requested {
                        match store.get_batch(batch_id).await {
                            Ok(b) if b.cancel_requested => {
                                tracing::info!(batch_id = %batch_id, "cancel observed in store");
                                cancel_requested = true;
                            }
                            Ok(_) => {}
                            Err(e) => tracing::warn!(batch_id = %batch_id, "batch re-read failed: {}", e),
                        }
                    }
                }
            }
        }

        let done = store
            .update_batch(batch_id, BatchPatch::complete(owner))
            .await?;
        let failed = statuses
            .values()
            .filter(|s| **s != TaskStatus::Succeeded)
            .count();
        tracing::info!(
            batch_id = %batch_id,
            tasks = statuses.len(),
            not_succeeded = failed,
            cancelled = cancel_requested,
            "batch completed"
        );
        Ok(done)
    }

    /// Brings a task whose execution errored into a terminal state.
    async fn settle(&self, task_id: &str, error: &str) -> Result<TaskStatus, StoreError> {
        let rec = self.store().get(task_id).await?;
        let rec = match rec.status {
            TaskStatus::Pending => self.skip(task_id, &format!("dispatch failed: {error}")).await?,
            TaskStatus::Running => {
                let mut result = TaskResult::interrupted(rec.started_at);
                result.message = Some(error.to_string());
                self.store()
                    .update(task_id, TaskPatch::finish(TaskStatus::Failed, result))
                    .await?
            }
            _ => rec,
        };
        Ok(rec.status)
    }
}
