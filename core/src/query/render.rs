use std::fmt::Write as _;

use crate::store::{TaskRecord, TaskStatus};

use super::service::{BatchView, Summary};

/// Lines of output shown per stream unless the full record is requested.
pub const TAIL_LINES: usize = 40;

fn tail(s: &str, lines: usize) -> (&str, bool) {
    let trimmed = s.trim_end_matches('\n');
    match trimmed.rmatch_indices('\n').nth(lines.saturating_sub(1)) {
        Some((idx, _)) if lines > 0 => (&trimmed[idx + 1..], true),
        _ => (trimmed, false),
    }
}

fn format_duration(ms: u64) -> String {
    if ms < 1_000 {
        format!("{ms}ms")
    } else if ms < 60_000 {
        format!("{:.1}s", ms as f64 / 1_000.0)
    } else {
        format!("{}m{:02}s", ms / 60_000, (ms % 60_000) / 1_000)
    }
}

fn marker(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Pending => "[ ]",
        TaskStatus::Running => "[~]",
        TaskStatus::Succeeded => "[✓]",
        TaskStatus::Failed => "[✗]",
        TaskStatus::Skipped => "[-]",
    }
}

/// `[worker@device] status`, exit code, duration and output tails.
pub fn render_task(rec: &TaskRecord, full: bool) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "[{}@{}] {}  {}",
        rec.spec.worker, rec.spec.device, rec.status, rec.id
    );
    if let Some(name) = rec.spec.name.as_deref() {
        let _ = writeln!(
            out,
            "name: {}{}",
            name,
            rec.batch_id
                .as_deref()
                .map(|b| format!("  (batch {b})"))
                .unwrap_or_default()
        );
    }
    let _ = writeln!(out, "dir: {}", rec.spec.working_dir);

    let Some(result) = rec.result.as_ref() else {
        return out;
    };

    let mut facts = Vec::new();
    if let Some(code) = result.exit_code {
        facts.push(format!("exit: {code}"));
    }
    if let Some(kind) = result.failure {
        facts.push(format!("failure: {kind}"));
    }
    if result.duration_ms > 0 {
        facts.push(format!("duration: {}", format_duration(result.duration_ms)));
    }
    if !facts.is_empty() {
        let _ = writeln!(out, "{}", facts.join("  "));
    }
    if let Some(msg) = result.message.as_deref().filter(|m| !m.is_empty()) {
        let _ = writeln!(out, "note: {msg}");
    }

    for (label, body, truncated) in [
        ("stdout", &result.stdout, result.stdout_truncated),
        ("stderr", &result.stderr, result.stderr_truncated),
    ] {
        if body.trim().is_empty() {
            continue;
        }
        let (text, cut) = if full {
            (body.trim_end_matches('\n'), false)
        } else {
            tail(body, TAIL_LINES)
        };
        let suffix = if cut || truncated { " (tail)" } else { "" };
        let _ = writeln!(out, "--- {label}{suffix} ---\n{text}");
    }
    out
}

pub fn render_batch(view: &BatchView) -> String {
    let mut out = String::new();
    let title = view
        .name
        .as_deref()
        .map(|n| format!("{} ({})", view.id, n))
        .unwrap_or_else(|| view.id.clone());
    let status = match (view.is_resolved(), view.cancel_requested) {
        (true, true) => "completed (cancelled)".to_string(),
        (true, false) => "completed".to_string(),
        (false, true) => "cancelling".to_string(),
        (false, false) => "running".to_string(),
    };
    let _ = writeln!(
        out,
        "{title}  {status}  {}/{} succeeded, {} failed, {} skipped",
        view.count(TaskStatus::Succeeded),
        view.tasks.len(),
        view.count(TaskStatus::Failed),
        view.count(TaskStatus::Skipped),
    );

    for t in &view.tasks {
        let mut line = format!(
            "  {} {:<20} {:<9} {} {}  {}",
            marker(t.status),
            t.name,
            t.worker.to_string(),
            t.priority,
            t.status,
            t.task_id
        );
        if let Some(kind) = t.failure {
            let _ = write!(line, "  ({kind})");
        } else if t.status == TaskStatus::Skipped {
            if let Some(msg) = t.message.as_deref() {
                let _ = write!(line, "  ({msg})");
            }
        }
        let _ = writeln!(out, "{}", line.trim_end());
    }
    out
}

pub fn render_task_list(records: &[TaskRecord]) -> String {
    if records.is_empty() {
        return "no tasks\n".to_string();
    }
    let mut out = String::new();
    for rec in records {
        let _ = writeln!(
            out,
            "{} {:<22} [{}@{}] {}{}",
            marker(rec.status),
            rec.id,
            rec.spec.worker,
            rec.spec.device,
            rec.status,
            rec.failure().map(|k| format!(" ({k})")).unwrap_or_default()
        );
    }
    out
}

pub fn render_summary(summary: &Summary) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{} tasks in {} batches", summary.total, summary.batches);
    for (status, n) in &summary.by_status {
        let _ = writeln!(out, "  {status:<10} {n}");
    }
    if !summary.by_worker.is_empty() {
        let workers: Vec<String> = summary
            .by_worker
            .iter()
            .map(|(w, n)| format!("{w}={n}"))
            .collect();
        let _ = writeln!(out, "  workers: {}", workers.join(" "));
    }
    out
}

pub fn to_json<T: serde::Serialize>(value: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Device, FailureKind, TaskResult, TaskSpec};
    use crate::worker::WorkerKind;

    #[test]
    fn tail_keeps_last_lines() {
        assert_eq!(tail("a\nb\nc\n", 2), ("b\nc", true));
        assert_eq!(tail("a\nb", 5), ("a\nb", false));
    }

    #[test]
    fn renders_failed_task_with_diagnostics() {
        let mut spec = TaskSpec::new(WorkerKind::Codex, "p", "/repo");
        spec.device = Device::Remote("theodolos".into());
        let mut rec = TaskRecord::new("codex-1", spec);
        rec.status = TaskStatus::Failed;
        rec.result = Some(TaskResult {
            exit_code: Some(2),
            stderr: "boom\n".into(),
            duration_ms: 1_500,
            ..TaskResult::failed(FailureKind::NonZeroExit, "worker exited with code 2")
        });

        let text = render_task(&rec, false);
        assert!(text.starts_with("[codex@theodolos] failed  codex-1\n"));
        assert!(text.contains("exit: 2  failure: non_zero_exit  duration: 1.5s"));
        assert!(text.contains("--- stderr ---\nboom"));
    }

    #[test]
    fn durations_are_compact() {
        assert_eq!(format_duration(250), "250ms");
        assert_eq!(format_duration(61_000), "1m01s");
    }
}
