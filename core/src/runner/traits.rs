use async_trait::async_trait;
use tokio::io::AsyncRead;

use super::types::{RunOutcome, RunnerStartArgs, Signal};

/// One launched process.
#[async_trait]
pub trait RunnerSession: Send {
    fn id(&self) -> Option<u32>;
    fn stdout(&mut self) -> Option<Box<dyn AsyncRead + Unpin + Send>>;
    fn stderr(&mut self) -> Option<Box<dyn AsyncRead + Unpin + Send>>;
    async fn signal(&mut self, signal: Signal) -> anyhow::Result<()>;
    async fn wait(&mut self) -> anyhow::Result<RunOutcome>;
}

/// Launches processes. Failing to start is reported as an error, never retried.
#[async_trait]
pub trait RunnerPlugin: Send + Sync {
    fn name(&self) -> &str;
    async fn start_session(&self, args: &RunnerStartArgs)
        -> anyhow::Result<Box<dyn RunnerSession>>;
}
