use std::path::PathBuf;
use std::process::Stdio;

use anyhow::{Context, Result};
use async_trait::async_trait;
use emrakul_core::api::{RunOutcome, RunnerPlugin, RunnerSession, RunnerStartArgs, Signal};
use tokio::io::AsyncRead;
use tokio::process::{Child, Command};

/// Launches workers as OS processes, each in its own process group.
pub struct ProcessRunnerPlugin {}

impl ProcessRunnerPlugin {
    pub fn new() -> Self {
        Self {}
    }
}

impl Default for ProcessRunnerPlugin {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolves bare names through `PATH`; paths are taken as given.
fn resolve_program(cmd: &str) -> Result<PathBuf> {
    if cmd.contains(std::path::MAIN_SEPARATOR) {
        let path = PathBuf::from(cmd);
        anyhow::ensure!(path.exists(), "executable not found: {cmd}");
        return Ok(path);
    }
    which::which(cmd).with_context(|| format!("executable not found: {cmd}"))
}

#[async_trait]
impl RunnerPlugin for ProcessRunnerPlugin {
    fn name(&self) -> &str {
        "process"
    }

    async fn start_session(&self, args: &RunnerStartArgs) -> Result<Box<dyn RunnerSession>> {
        let program = resolve_program(&args.cmd)?;

        let mut cmd = Command::new(&program);
        cmd.args(&args.args)
            .envs(&args.envs)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &args.cwd {
            cmd.current_dir(dir);
        }
        #[cfg(unix)]
        cmd.process_group(0);

        let child = cmd
            .spawn()
            .with_context(|| format!("failed to spawn {}", program.display()))?;
        tracing::debug!(pid = ?child.id(), program = %program.display(), "worker spawned");

        Ok(Box::new(ProcessRunnerSession { child }))
    }
}

struct ProcessRunnerSession {
    child: Child,
}

#[async_trait]
impl RunnerSession for ProcessRunnerSession {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    fn stdout(&mut self) -> Option<Box<dyn AsyncRead + Unpin + Send>> {
        self.child
            .stdout
            .take()
            .map(|s| Box::new(s) as Box<dyn AsyncRead + Unpin + Send>)
    }

    fn stderr(&mut self) -> Option<Box<dyn AsyncRead + Unpin + Send>> {
        self.child
            .stderr
            .take()
            .map(|s| Box::new(s) as Box<dyn AsyncRead + Unpin + Send>)
    }

    #[cfg(unix)]
    async fn signal(&mut self, signal: Signal) -> Result<()> {
        use nix::errno::Errno;
        use nix::sys::signal::{killpg, Signal as NixSignal};
        use nix::unistd::Pid;

        // Already reaped.
        let Some(pid) = self.child.id() else {
            return Ok(());
        };
        let sig = match signal {
            Signal::Term => NixSignal::SIGTERM,
            Signal::Kill => NixSignal::SIGKILL,
        };
        match killpg(Pid::from_raw(pid as i32), sig) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(anyhow::anyhow!("killpg({pid}, {sig:?}) failed: {e}")),
        }
    }

    #[cfg(not(unix))]
    async fn signal(&mut self, _signal: Signal) -> Result<()> {
        self.child.start_kill()?;
        Ok(())
    }

    async fn wait(&mut self) -> Result<RunOutcome> {
        let status = self.child.wait().await?;
        Ok(RunOutcome {
            exit_code: exit_code(status),
        })
    }
}

#[cfg(unix)]
fn exit_code(status: std::process::ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|s| 128 + s))
        .unwrap_or(-1)
}

#[cfg(not(unix))]
fn exit_code(status: std::process::ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}
