use emrakul_core::api::{
    exit_code_for, render_task, AppContext, CliError, Device, FailureKind, TaskPatch, TaskRecord,
    TaskResult, TaskSpec, TaskStatus, WorkerKind,
};

use crate::commands::cli::{DelegateArgs, RetryArgs, RunTaskArgs};
use crate::commands::{print_json, working_dir};
use crate::detach;

pub async fn handle_delegate(args: DelegateArgs, ctx: &AppContext) -> Result<i32, CliError> {
    let spec = build_spec(&args)?;
    submit(spec, args.background, args.json, ctx).await
}

pub async fn handle_run_task(args: RunTaskArgs, ctx: &AppContext) -> Result<i32, CliError> {
    let rec = ctx.delegator().run_pending(&args.id).await?;
    Ok(exit_code_for(&rec))
}

pub async fn handle_retry(args: RetryArgs, ctx: &AppContext) -> Result<i32, CliError> {
    let spec = ctx.delegator().retry_spec(&args.id).await?;
    tracing::info!(retry_of = %args.id, worker = %spec.worker, "retrying task");
    submit(spec, args.background, args.json, ctx).await
}

fn build_spec(args: &DelegateArgs) -> Result<TaskSpec, CliError> {
    let worker: WorkerKind = args.worker.parse()?;
    let mut spec = TaskSpec::new(worker, args.task.clone(), working_dir(args.dir.as_deref())?);
    spec.context_files = args.files.clone();
    spec.device = args.device.clone().map(Device::from).unwrap_or_default();
    spec.timeout_secs = args.timeout;
    spec.verify = args.verify.clone().filter(|v| !v.trim().is_empty());
    Ok(spec)
}

fn print_record(rec: &TaskRecord, json: bool) -> Result<(), CliError> {
    if json {
        print_json(rec)
    } else {
        print!("{}", render_task(rec, false));
        Ok(())
    }
}

async fn submit(
    spec: TaskSpec,
    background: bool,
    json: bool,
    ctx: &AppContext,
) -> Result<i32, CliError> {
    let delegator = ctx.delegator();

    if !background {
        let rec = delegator.delegate(spec).await?;
        print_record(&rec, json)?;
        return Ok(exit_code_for(&rec));
    }

    if ctx.store().name() == "memory" {
        tracing::warn!("memory store is private to this process; running the task in the foreground");
        let id = delegator.delegate_background(spec).await?;
        delegator.wait_background().await;
        let rec = ctx.query().get_task(&id).await?;
        print_record(&rec, json)?;
        return Ok(exit_code_for(&rec));
    }

    let rec = delegator.register(spec).await?;
    match detach::spawn_self(&["run-task", &rec.id]) {
        Ok(pid) => tracing::info!(task_id = %rec.id, pid, "task detached"),
        Err(e) => {
            // Nothing else will ever pick the record up.
            let result = TaskResult::failed(FailureKind::LaunchError, format!("failed to detach: {e}"));
            ctx.store().update(&rec.id, TaskPatch::running()).await?;
            ctx.store()
                .update(&rec.id, TaskPatch::finish(TaskStatus::Failed, result))
                .await?;
            return Err(CliError::Io(e));
        }
    }

    if json {
        print_json(&serde_json::json!({ "task_id": rec.id, "status": rec.status }))?;
    } else {
        println!("{}", rec.id);
    }
    Ok(0)
}
