use std::collections::HashMap;
use std::time::Duration;

use emrakul_core::api::{BatchView, TaskStatus};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

/// Progress bars for a batch driven in the foreground.
///
/// One overall bar counts resolved members; running members get a spinner
/// that is finished with their outcome.
pub struct ProgressMonitor {
    multi: MultiProgress,
    overall: ProgressBar,
    task_bars: HashMap<String, ProgressBar>,
    enabled: bool,
}

fn outcome_icon(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Succeeded => "✅",
        TaskStatus::Failed => "❌",
        TaskStatus::Skipped => "⏭",
        TaskStatus::Pending | TaskStatus::Running => "⏳",
    }
}

impl ProgressMonitor {
    /// `enabled` is false for JSON output and non-terminal stderr.
    pub fn new(total_tasks: usize, enabled: bool) -> Self {
        if !enabled {
            return Self {
                multi: MultiProgress::new(),
                overall: ProgressBar::hidden(),
                task_bars: HashMap::new(),
                enabled: false,
            };
        }

        let multi = MultiProgress::new();
        let overall = multi.add(ProgressBar::new(total_tasks as u64));
        let style = ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} tasks ({percent}%) {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▓▒░  ");
        overall.set_style(style);
        overall.set_message("starting...");

        Self {
            multi,
            overall,
            task_bars: HashMap::new(),
            enabled: true,
        }
    }

    fn spinner(&self, label: &str) -> ProgressBar {
        let bar = self.multi.add(ProgressBar::new_spinner());
        let style = ProgressStyle::default_spinner()
            .template("  {spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        bar.set_style(style);
        bar.set_message(label.to_string());
        bar.enable_steady_tick(Duration::from_millis(100));
        bar
    }

    /// Syncs the bars with a fresh batch view.
    pub fn update(&mut self, view: &BatchView) {
        if !self.enabled {
            return;
        }

        let mut running = 0;
        for task in &view.tasks {
            let label = format!("{} [{}]", task.name, task.worker);
            match task.status {
                TaskStatus::Running => {
                    running += 1;
                    if !self.task_bars.contains_key(&task.task_id) {
                        let bar = self.spinner(&label);
                        self.task_bars.insert(task.task_id.clone(), bar);
                    }
                }
                status if status.is_terminal() => {
                    if let Some(bar) = self.task_bars.remove(&task.task_id) {
                        let took = task
                            .duration_ms
                            .map(|ms| format!(" ({ms}ms)"))
                            .unwrap_or_default();
                        bar.finish_with_message(format!("{} {label}{took}", outcome_icon(status)));
                    }
                }
                _ => {}
            }
        }

        let resolved = view.tasks.iter().filter(|t| t.status.is_terminal()).count();
        self.overall.set_position(resolved as u64);
        self.overall.set_message(format!("{running} running"));
    }

    pub fn finish(&mut self, view: &BatchView) {
        self.update(view);
        if !self.enabled {
            return;
        }
        let all_ok = view.tasks.iter().all(|t| t.status == TaskStatus::Succeeded);
        let msg = if all_ok {
            "✅ all tasks succeeded".to_string()
        } else {
            format!(
                "❌ {} failed, {} skipped",
                view.count(TaskStatus::Failed),
                view.count(TaskStatus::Skipped)
            )
        };
        self.overall.finish_with_message(msg);
    }
}

impl Drop for ProgressMonitor {
    fn drop(&mut self) {
        for (_, bar) in self.task_bars.drain() {
            bar.finish_and_clear();
        }
    }
}
