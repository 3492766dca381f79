use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{expand_path, AppConfig, DeviceConfig};
use crate::error::{ExecutorError, RunnerError};
use crate::runner::RunnerStartArgs;
use crate::store::{Device, TaskSpec};

use super::prompt::{build_prompt, load_system_prompt};
use super::registry::{
    InvocationTemplate, WorkerRegistry, MCP_CONFIG_PLACEHOLDER, PROMPT_PLACEHOLDER,
    WORKDIR_PLACEHOLDER,
};

const EMPTY_MCP_CONFIG: &str = r#"{"mcpServers":{}}"#;
const MCP_CONFIG_FILE: &str = "kimi-empty-mcp.json";

/// POSIX single-quote escaping.
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r#"'\''"#))
}

/// Turns a task spec into a concrete launch command.
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    registry: Arc<WorkerRegistry>,
    devices: BTreeMap<String, DeviceConfig>,
    prompts_dir: Option<PathBuf>,
    scratch_dir: PathBuf,
}

impl CommandBuilder {
    pub fn new(registry: Arc<WorkerRegistry>, cfg: &AppConfig) -> Self {
        let scratch_dir = if cfg.data_dir.trim().is_empty() {
            std::env::temp_dir().join("emrakul")
        } else {
            PathBuf::from(&cfg.data_dir)
        };
        Self {
            registry,
            devices: cfg.devices.clone(),
            prompts_dir: cfg.prompts_dir.as_deref().map(expand_path),
            scratch_dir,
        }
    }

    pub fn registry(&self) -> &WorkerRegistry {
        &self.registry
    }

    /// Submission-time checks; nothing is launched or written.
    pub fn validate(&self, spec: &TaskSpec) -> Result<(), ExecutorError> {
        let template = self.registry.resolve(spec.worker)?;
        if !spec.context_files.is_empty() && !template.accepts_context_files {
            return Err(ExecutorError::UnsupportedOption {
                worker: spec.worker.to_string(),
                option: "context files",
            });
        }
        if let Device::Remote(name) = &spec.device {
            if !template.accepts_device {
                return Err(ExecutorError::UnsupportedOption {
                    worker: spec.worker.to_string(),
                    option: "a remote device",
                });
            }
            if !self.devices.contains_key(name) {
                return Err(ExecutorError::UnknownDevice(name.clone()));
            }
        }
        Ok(())
    }

    /// Effective timeout: the task's own value wins, `0` disables it.
    pub fn timeout(&self, spec: &TaskSpec) -> Option<Duration> {
        match spec.timeout_secs {
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
            None => self
                .registry
                .resolve(spec.worker)
                .ok()
                .and_then(|t| t.default_timeout),
        }
    }

    pub fn build(&self, spec: &TaskSpec) -> Result<RunnerStartArgs, RunnerError> {
        let template = self
            .registry
            .resolve(spec.worker)
            .map_err(|e| RunnerError::Launch(e.to_string()))?;
        let working_dir = expand_path(&spec.working_dir);

        let system = load_system_prompt(self.prompts_dir.as_deref(), spec.worker);
        let files: &[String] = if template.accepts_context_files {
            &spec.context_files
        } else {
            &[]
        };
        let mut prompt = build_prompt(system.as_deref(), &spec.prompt, files, &working_dir);

        let device = match &spec.device {
            Device::Local => None,
            Device::Remote(name) => Some(
                self.devices
                    .get(name)
                    .ok_or_else(|| RunnerError::Launch(format!("unknown device: {name}")))?,
            ),
        };
        // Where the worker itself runs; context files above are still read locally.
        let run_dir = device
            .and_then(|d| d.remote_dir.as_deref())
            .map(PathBuf::from)
            .unwrap_or_else(|| working_dir.clone());
        if template.workdir_in_prompt {
            prompt = format!("Working directory: {}\n\n{}", run_dir.display(), prompt);
        }

        let args = self.render_args(template, &prompt, &run_dir)?;

        match device {
            None => Ok(RunnerStartArgs {
                cmd: template.executable.clone(),
                args,
                envs: HashMap::new(),
                cwd: Some(working_dir),
            }),
            Some(device) => Ok(wrap_remote(device, &template.executable, &args, &run_dir)),
        }
    }

    fn render_args(
        &self,
        template: &InvocationTemplate,
        prompt: &str,
        working_dir: &Path,
    ) -> Result<Vec<String>, RunnerError> {
        let workdir = working_dir.to_string_lossy();
        let mcp_config = if template
            .args
            .iter()
            .any(|a| a.contains(MCP_CONFIG_PLACEHOLDER))
        {
            Some(ensure_empty_mcp_config(&self.scratch_dir)?)
        } else {
            None
        };

        Ok(template
            .args
            .iter()
            .map(|arg| {
                if arg == PROMPT_PLACEHOLDER {
                    return prompt.to_string();
                }
                let mut out = arg.replace(WORKDIR_PLACEHOLDER, &workdir);
                if let Some(path) = &mcp_config {
                    out = out.replace(MCP_CONFIG_PLACEHOLDER, &path.to_string_lossy());
                }
                out
            })
            .collect())
    }
}

fn wrap_remote(
    device: &DeviceConfig,
    executable: &str,
    args: &[String],
    run_dir: &Path,
) -> RunnerStartArgs {
    let mut remote = format!(
        "cd {} && {}",
        shell_quote(&run_dir.to_string_lossy()),
        shell_quote(executable)
    );
    for arg in args {
        remote.push(' ');
        remote.push_str(&shell_quote(arg));
    }

    let mut wrapped = device.args.clone();
    wrapped.push(remote);
    RunnerStartArgs {
        cmd: device.program.clone(),
        args: wrapped,
        envs: HashMap::new(),
        cwd: None,
    }
}

/// Writes `{"mcpServers":{}}` once and returns its path.
fn ensure_empty_mcp_config(dir: &Path) -> Result<PathBuf, RunnerError> {
    match write_mcp_config(dir) {
        Ok(path) => Ok(path),
        Err(e) => {
            tracing::debug!("mcp config under {} unavailable: {}", dir.display(), e);
            write_mcp_config(&std::env::temp_dir())
                .map_err(|e| RunnerError::Launch(format!("cannot write mcp config: {e}")))
        }
    }
}

fn write_mcp_config(dir: &Path) -> std::io::Result<PathBuf> {
    let path = dir.join(MCP_CONFIG_FILE);
    if !path.exists() {
        std::fs::create_dir_all(dir)?;
        std::fs::write(&path, EMPTY_MCP_CONFIG)?;
    }
    Ok(path)
}
