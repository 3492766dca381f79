use thiserror::Error;

use super::executor::ExecutorError;
use super::store::StoreError;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("{0}")]
    Executor(#[from] ExecutorError),
    #[error("{0}")]
    Store(#[from] StoreError),
    #[error("runner failed: {0}")]
    Runner(#[from] RunnerError),
    #[error("config error: {0}")]
    Config(String),
    #[error("command failed: {0}")]
    Command(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Anyhow(#[from] anyhow::Error),
}

#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("launch failed: {0}")]
    Launch(String),
    #[error("stream io error: {stream} {source}")]
    StreamIo {
        stream: &'static str,
        source: std::io::Error,
    },
    #[error("signal delivery failed: {0}")]
    Signal(String),
    #[error("wait failed: {0}")]
    Wait(String),
    #[error("plugin error: {0}")]
    Plugin(#[from] anyhow::Error),
}
