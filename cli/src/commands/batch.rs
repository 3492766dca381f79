use std::fmt::Write as _;
use std::time::Duration;

use emrakul_core::api::{
    expand_path, render_batch, AppContext, BatchDefinition, BatchPlan, BatchView, CliError,
    TaskStatus,
};

use crate::commands::cli::{BatchCommand, BatchIdArgs, BatchPlanArgs, BatchSubmitArgs};
use crate::commands::{print_json, working_dir};
use crate::detach;
use crate::progress::ProgressMonitor;

const POLL_INTERVAL: Duration = Duration::from_millis(250);

pub async fn handle_batch(cmd: BatchCommand, ctx: &AppContext) -> Result<i32, CliError> {
    match cmd {
        BatchCommand::Submit(args) => handle_submit(args, ctx).await,
        BatchCommand::Plan(args) => handle_plan(args, ctx),
        BatchCommand::Run(args) => drive(&args.id, args.json, ctx).await,
        BatchCommand::Cancel(args) => handle_cancel(args, ctx).await,
        BatchCommand::Status(args) => handle_status(args, ctx).await,
    }
}

fn load_manifest(file: &str, concurrency: Option<usize>) -> Result<BatchDefinition, CliError> {
    let mut def = BatchDefinition::from_path(&expand_path(file))?;
    if concurrency.is_some() {
        def.concurrency = concurrency;
    }
    Ok(def)
}

/// 0 when every member succeeded, 1 otherwise.
fn batch_exit_code(view: &BatchView) -> i32 {
    if view.tasks.iter().all(|t| t.status == TaskStatus::Succeeded) {
        0
    } else {
        1
    }
}

fn render_plan(plan: &BatchPlan) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "batch: {}  tasks: {}  concurrency: {}",
        plan.name.as_deref().unwrap_or("-"),
        plan.tasks.len(),
        plan.concurrency
    );
    for (i, tier) in plan.tiers.iter().enumerate() {
        let _ = writeln!(out, "tier {}: {}", i + 1, tier.join(", "));
    }
    out
}

fn print_view(view: &BatchView, json: bool) -> Result<(), CliError> {
    if json {
        print_json(view)
    } else {
        print!("{}", render_batch(view));
        Ok(())
    }
}

async fn handle_submit(args: BatchSubmitArgs, ctx: &AppContext) -> Result<i32, CliError> {
    let def = load_manifest(&args.file, args.concurrency)?;
    let wd = working_dir(args.dir.as_deref())?;
    let batch = ctx.scheduler().register_batch(&def, &wd).await?;

    if args.wait {
        return drive(&batch.id, args.json, ctx).await;
    }
    if ctx.store().name() == "memory" {
        tracing::warn!("memory store is private to this process; driving the batch in the foreground");
        return drive(&batch.id, args.json, ctx).await;
    }

    match detach::spawn_self(&["batch", "run", &batch.id]) {
        Ok(pid) => tracing::info!(batch_id = %batch.id, pid, "batch driver detached"),
        Err(e) => {
            // No driver: resolve the members so the batch does not sit queued forever.
            ctx.scheduler().cancel_batch(&batch.id).await?;
            return Err(CliError::Io(e));
        }
    }

    if args.json {
        print_json(&serde_json::json!({
            "batch_id": batch.id,
            "tasks": batch.members,
            "concurrency": batch.concurrency_limit,
        }))?;
    } else {
        println!("{}", batch.id);
    }
    Ok(0)
}

fn handle_plan(args: BatchPlanArgs, ctx: &AppContext) -> Result<i32, CliError> {
    let def = load_manifest(&args.file, None)?;
    let wd = working_dir(args.dir.as_deref())?;
    let plan = ctx.scheduler().plan(&def, &wd)?;
    if args.json {
        print_json(&plan)?;
    } else {
        print!("{}", render_plan(&plan));
    }
    Ok(0)
}

/// Drives (or resumes) the batch in this process until every member is terminal.
///
/// Ctrl-C requests cancellation and keeps waiting for the driver to wind down.
async fn drive(batch_id: &str, json: bool, ctx: &AppContext) -> Result<i32, CliError> {
    let view = ctx.query().get_batch(batch_id).await?;
    let show_progress = !json && atty::is(atty::Stream::Stderr);
    let mut monitor = ProgressMonitor::new(view.tasks.len(), show_progress);

    let scheduler = ctx.scheduler().clone();
    let id = batch_id.to_string();
    let mut driver = tokio::spawn(async move { scheduler.resume_batch(&id).await });

    let mut poll = tokio::time::interval(POLL_INTERVAL);
    let mut cancel_sent = false;
    let joined = loop {
        tokio::select! {
            res = &mut driver => break res,
            _ = poll.tick() => {
                match ctx.query().get_batch(batch_id).await {
                    Ok(view) => monitor.update(&view),
                    Err(e) => tracing::debug!(batch_id = %batch_id, "progress read failed: {}", e),
                }
            }
            _ = tokio::signal::ctrl_c(), if !cancel_sent => {
                tracing::warn!(batch_id = %batch_id, "interrupt received, cancelling batch");
                ctx.scheduler().cancel_batch(batch_id).await?;
                cancel_sent = true;
            }
        }
    };
    joined.map_err(|e| CliError::Command(format!("batch driver aborted: {e}")))??;

    let view = ctx.query().get_batch(batch_id).await?;
    monitor.finish(&view);
    drop(monitor);
    print_view(&view, json)?;
    Ok(batch_exit_code(&view))
}

async fn handle_cancel(args: BatchIdArgs, ctx: &AppContext) -> Result<i32, CliError> {
    let batch = ctx.scheduler().cancel_batch(&args.id).await?;
    if args.json {
        let view = ctx.query().get_batch(&batch.id).await?;
        print_json(&view)?;
    } else {
        println!("cancel requested for {} (state: {})", batch.id, batch.state);
    }
    Ok(0)
}

async fn handle_status(args: BatchIdArgs, ctx: &AppContext) -> Result<i32, CliError> {
    let view = ctx.query().get_batch(&args.id).await?;
    print_view(&view, args.json)?;
    Ok(0)
}
