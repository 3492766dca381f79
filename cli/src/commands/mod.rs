pub mod batch;
pub mod cli;
pub mod delegate;
pub mod query;

use emrakul_core::api::{
    to_json, AppContext, CliError, ErrorCode, RunnerError, StoreError,
};
use serde::Serialize;

use cli::Commands;

pub async fn dispatch(cmd: Commands, ctx: &AppContext) -> Result<i32, CliError> {
    match cmd {
        Commands::Delegate(args) => delegate::handle_delegate(args, ctx).await,
        Commands::RunTask(args) => delegate::handle_run_task(args, ctx).await,
        Commands::Retry(args) => delegate::handle_retry(args, ctx).await,
        Commands::Batch(cmd) => batch::handle_batch(cmd, ctx).await,
        Commands::Status(args) => query::handle_status(args, ctx).await,
        Commands::Result(args) => query::handle_result(args, ctx).await,
        Commands::Workers(args) => query::handle_workers(args, ctx),
    }
}

/// Process exit code for an error that aborted a command.
///
/// 0 ok, 1 a task did not succeed (not an error), 11 config, 12 rejected
/// submission, 20 runner/store/IO, 44 unknown id, 50 anything else.
pub fn exit_code_for_error(e: &CliError) -> i32 {
    match e {
        CliError::Config(_) => 11,
        CliError::Executor(ex) => match ex.error_code() {
            ErrorCode::NotFound => 44,
            _ if ex.is_validation() => 12,
            ErrorCode::BackendError | ErrorCode::StorageError => 20,
            _ => 50,
        },
        CliError::Store(StoreError::NotFound(_)) => 44,
        CliError::Store(StoreError::InvalidId(_)) => 12,
        CliError::Store(_) => 20,
        CliError::Runner(RunnerError::Plugin(_)) => 11,
        CliError::Runner(_) => 20,
        CliError::Io(_) | CliError::Command(_) => 20,
        CliError::Anyhow(_) => 50,
    }
}

pub(crate) fn print_json<T: Serialize>(value: &T) -> Result<(), CliError> {
    let s = to_json(value).map_err(|e| CliError::Anyhow(e.into()))?;
    println!("{s}");
    Ok(())
}

/// `--dir`, else the current directory.
pub(crate) fn working_dir(dir: Option<&str>) -> Result<String, CliError> {
    match dir.map(str::trim).filter(|d| !d.is_empty()) {
        Some(d) => Ok(d.to_string()),
        None => Ok(std::env::current_dir()?.to_string_lossy().to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use emrakul_core::api::ExecutorError;
    use pretty_assertions::assert_eq;

    #[test]
    fn exit_codes_by_category() {
        let code = |e: CliError| exit_code_for_error(&e);
        assert_eq!(code(CliError::Config("bad toml".into())), 11);
        assert_eq!(
            code(ExecutorError::CyclicDependency(vec!["a".into(), "a".into()]).into()),
            12
        );
        assert_eq!(code(ExecutorError::UnknownWorker("x".into()).into()), 12);
        assert_eq!(
            code(ExecutorError::Store(StoreError::NotFound("t".into())).into()),
            44
        );
        assert_eq!(code(StoreError::NotFound("t".into()).into()), 44);
        assert_eq!(code(RunnerError::Launch("codex".into()).into()), 20);
        assert_eq!(code(CliError::Anyhow(anyhow::anyhow!("boom"))), 50);
    }
}
