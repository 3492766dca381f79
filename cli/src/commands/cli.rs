use clap::{Args as ClapArgs, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "emrakul",
    version,
    about = "Delegate coding tasks to external CLI workers and schedule batches of them"
)]
pub struct Args {
    /// Config file; takes precedence over `EMRAKUL_CONFIG` and the default lookup.
    #[arg(long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one task on a worker (codex, gemini, kimi, opencode, cursor).
    Delegate(DelegateArgs),
    /// Execute a pending task record; used by detached background runs.
    #[command(hide = true)]
    RunTask(RunTaskArgs),
    #[command(subcommand)]
    Batch(BatchCommand),
    /// Show one task, or list tasks with a summary.
    Status(StatusArgs),
    /// Full captured output of a task.
    Result(ResultArgs),
    /// Submit a new task with the invocation of an earlier one.
    Retry(RetryArgs),
    /// List configured workers.
    Workers(WorkersArgs),
}

#[derive(ClapArgs, Debug, Clone)]
pub struct DelegateArgs {
    pub worker: String,

    /// Task description handed to the worker.
    pub task: String,

    /// Context files embedded in the prompt. Can be repeated.
    #[arg(short = 'f', long = "file", action = clap::ArgAction::Append)]
    pub files: Vec<String>,

    /// Working directory; defaults to the current directory.
    #[arg(short = 'd', long = "dir")]
    pub dir: Option<String>,

    /// Remote device name from `[devices]`.
    #[arg(long)]
    pub device: Option<String>,

    /// Seconds; 0 disables the worker's default timeout.
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Shell command that must succeed after the worker exits 0.
    #[arg(long)]
    pub verify: Option<String>,

    /// Return the task id at once and run in a detached process.
    #[arg(long = "bg")]
    pub background: bool,

    #[arg(long)]
    pub json: bool,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct RunTaskArgs {
    pub id: String,
}

#[derive(Subcommand, Debug)]
pub enum BatchCommand {
    /// Validate and submit a manifest (YAML, JSON or TOML).
    Submit(BatchSubmitArgs),
    /// Validate a manifest and print its execution tiers without running it.
    Plan(BatchPlanArgs),
    /// Drive (or resume) a stored batch in the foreground.
    Run(BatchIdArgs),
    /// Skip pending members and stop running ones.
    Cancel(BatchIdArgs),
    Status(BatchIdArgs),
}

#[derive(ClapArgs, Debug, Clone)]
pub struct BatchSubmitArgs {
    pub file: String,

    /// Overrides the manifest's concurrency.
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Drive the batch in this process and wait for it.
    #[arg(long)]
    pub wait: bool,

    /// Default working directory for tasks that do not set one.
    #[arg(short = 'd', long = "dir")]
    pub dir: Option<String>,

    #[arg(long)]
    pub json: bool,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct BatchPlanArgs {
    pub file: String,

    #[arg(short = 'd', long = "dir")]
    pub dir: Option<String>,

    #[arg(long)]
    pub json: bool,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct BatchIdArgs {
    pub id: String,

    #[arg(long)]
    pub json: bool,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct StatusArgs {
    /// Task id, or `all`.
    pub target: Option<String>,

    #[arg(long)]
    pub status: Option<String>,

    #[arg(long)]
    pub worker: Option<String>,

    #[arg(long)]
    pub batch: Option<String>,

    #[arg(long)]
    pub json: bool,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct ResultArgs {
    pub id: String,

    #[arg(long)]
    pub json: bool,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct RetryArgs {
    pub id: String,

    #[arg(long = "bg")]
    pub background: bool,

    #[arg(long)]
    pub json: bool,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct WorkersArgs {
    #[arg(long)]
    pub json: bool,
}
