use emrakul_core::api::{
    render_summary, render_task, render_task_list, AppContext, CliError, InvocationTemplate,
    TaskFilter, TaskStatus, WorkerKind,
};

use crate::commands::cli::{ResultArgs, StatusArgs, WorkersArgs};
use crate::commands::print_json;

pub async fn handle_status(args: StatusArgs, ctx: &AppContext) -> Result<i32, CliError> {
    let query = ctx.query();

    if let Some(id) = args.target.as_deref().filter(|t| *t != "all") {
        let rec = query.get_task(id).await?;
        if args.json {
            print_json(&rec)?;
        } else {
            print!("{}", render_task(&rec, false));
        }
        return Ok(0);
    }

    let filter = build_filter(&args)?;
    let records = query.list(&filter).await?;
    let summary = query.summary().await?;
    if args.json {
        print_json(&serde_json::json!({ "summary": summary, "tasks": records }))?;
    } else {
        print!("{}", render_task_list(&records));
        println!();
        print!("{}", render_summary(&summary));
    }
    Ok(0)
}

pub async fn handle_result(args: ResultArgs, ctx: &AppContext) -> Result<i32, CliError> {
    let rec = ctx.query().get_task(&args.id).await?;
    if args.json {
        print_json(&rec)?;
    } else {
        print!("{}", render_task(&rec, true));
    }
    Ok(0)
}

pub fn handle_workers(args: WorkersArgs, ctx: &AppContext) -> Result<i32, CliError> {
    let templates: Vec<&InvocationTemplate> = ctx.registry().templates().collect();
    if args.json {
        let rows: Vec<serde_json::Value> = templates
            .iter()
            .map(|t| {
                serde_json::json!({
                    "worker": t.kind,
                    "executable": t.executable,
                    "timeout_secs": t.default_timeout.map(|d| d.as_secs()),
                    "context_files": t.accepts_context_files,
                    "remote_devices": t.accepts_device,
                })
            })
            .collect();
        print_json(&rows)?;
    } else {
        for t in templates {
            println!("{}", describe_worker(t));
        }
    }
    Ok(0)
}

fn describe_worker(t: &InvocationTemplate) -> String {
    let yes_no = |b: bool| if b { "yes" } else { "no" };
    format!(
        "{:<9} {:<24} timeout: {:<6} context files: {:<3} devices: {}",
        t.kind.as_str(),
        t.executable,
        t.default_timeout
            .map(|d| format!("{}s", d.as_secs()))
            .unwrap_or_else(|| "none".into()),
        yes_no(t.accepts_context_files),
        yes_no(t.accepts_device)
    )
}

fn build_filter(args: &StatusArgs) -> Result<TaskFilter, CliError> {
    let status = args
        .status
        .as_deref()
        .map(str::parse::<TaskStatus>)
        .transpose()
        .map_err(CliError::Command)?;
    let worker = args
        .worker
        .as_deref()
        .map(str::parse::<WorkerKind>)
        .transpose()?;
    Ok(TaskFilter {
        status,
        worker,
        batch_id: args.batch.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn status_args(status: Option<&str>, worker: Option<&str>) -> StatusArgs {
        StatusArgs {
            target: None,
            status: status.map(String::from),
            worker: worker.map(String::from),
            batch: Some("batch-1".into()),
            json: false,
        }
    }

    #[test]
    fn filter_from_flags() {
        let f = build_filter(&status_args(Some("failed"), Some("kimi"))).unwrap();
        assert_eq!(f.status, Some(TaskStatus::Failed));
        assert_eq!(f.worker, Some(WorkerKind::Kimi));
        assert_eq!(f.batch_id.as_deref(), Some("batch-1"));

        assert!(build_filter(&status_args(Some("done-ish"), None)).is_err());
        assert!(build_filter(&status_args(None, Some("copilot"))).is_err());
    }

    #[test]
    fn worker_line_shows_capabilities() {
        let line = describe_worker(&InvocationTemplate::builtin(WorkerKind::Cursor));
        assert!(line.starts_with("cursor"));
        assert!(line.contains("timeout: none"));
        assert!(line.ends_with("devices: no"));
    }
}
