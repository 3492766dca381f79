use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::AppConfig;
use crate::error::ExecutorError;

/// External CLI tools a task can be delegated to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerKind {
    Codex,
    Gemini,
    Kimi,
    Opencode,
    Cursor,
}

impl WorkerKind {
    pub const ALL: [WorkerKind; 5] = [
        WorkerKind::Codex,
        WorkerKind::Gemini,
        WorkerKind::Kimi,
        WorkerKind::Opencode,
        WorkerKind::Cursor,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Codex => "codex",
            Self::Gemini => "gemini",
            Self::Kimi => "kimi",
            Self::Opencode => "opencode",
            Self::Cursor => "cursor",
        }
    }
}

impl fmt::Display for WorkerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkerKind {
    type Err = ExecutorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase();
        WorkerKind::ALL
            .into_iter()
            .find(|k| k.as_str() == needle)
            .ok_or_else(|| ExecutorError::UnknownWorker(s.to_string()))
    }
}

pub const PROMPT_PLACEHOLDER: &str = "{prompt}";
pub const WORKDIR_PLACEHOLDER: &str = "{workdir}";
pub const MCP_CONFIG_PLACEHOLDER: &str = "{mcp_config}";

/// How to launch one worker non-interactively.
///
/// `args` may contain `{prompt}`, `{workdir}` and `{mcp_config}`; they are
/// substituted per task when the command line is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvocationTemplate {
    pub kind: WorkerKind,
    pub executable: String,
    pub args: Vec<String>,
    pub accepts_context_files: bool,
    pub accepts_device: bool,
    /// Prefix the prompt with `Working directory: ...` for tools without a cwd flag.
    pub workdir_in_prompt: bool,
    pub default_timeout: Option<Duration>,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl InvocationTemplate {
    pub fn builtin(kind: WorkerKind) -> Self {
        match kind {
            WorkerKind::Codex => Self {
                kind,
                executable: "codex".into(),
                args: strings(&[
                    "exec",
                    "--skip-git-repo-check",
                    "-c",
                    r#"sandbox_permissions=["disk-full-read-access", "disk-write-cwd"]"#,
                    PROMPT_PLACEHOLDER,
                ]),
                accepts_context_files: true,
                accepts_device: true,
                workdir_in_prompt: false,
                default_timeout: Some(Duration::from_secs(600)),
            },
            WorkerKind::Gemini => Self {
                kind,
                executable: "gemini".into(),
                args: strings(&["--yolo", "-o", "json", PROMPT_PLACEHOLDER]),
                accepts_context_files: true,
                accepts_device: true,
                workdir_in_prompt: false,
                default_timeout: Some(Duration::from_secs(600)),
            },
            // Research worker: reads nothing locally, starts with an empty MCP config.
            WorkerKind::Kimi => Self {
                kind,
                executable: "kimi".into(),
                args: strings(&[
                    "-p",
                    PROMPT_PLACEHOLDER,
                    "--print",
                    "--mcp-config-file",
                    MCP_CONFIG_PLACEHOLDER,
                ]),
                accepts_context_files: false,
                accepts_device: true,
                workdir_in_prompt: false,
                default_timeout: Some(Duration::from_secs(300)),
            },
            WorkerKind::Opencode => Self {
                kind,
                executable: "opencode".into(),
                args: strings(&["run", "--format", "json", PROMPT_PLACEHOLDER]),
                accepts_context_files: true,
                accepts_device: true,
                workdir_in_prompt: true,
                default_timeout: Some(Duration::from_secs(180)),
            },
            WorkerKind::Cursor => Self {
                kind,
                executable: "cursor".into(),
                args: strings(&[
                    "agent",
                    "--print",
                    "--force",
                    "--output-format",
                    "json",
                    "--workspace",
                    WORKDIR_PLACEHOLDER,
                    PROMPT_PLACEHOLDER,
                ]),
                accepts_context_files: true,
                accepts_device: true,
                workdir_in_prompt: false,
                default_timeout: None,
            },
        }
    }
}

impl InvocationTemplate {
    /// Extra flags go ahead of a trailing prompt so they are not read as part of it.
    fn add_args(&mut self, extra: &[String]) {
        let at = match self.args.last() {
            Some(last) if last == PROMPT_PLACEHOLDER => self.args.len() - 1,
            _ => self.args.len(),
        };
        self.args.splice(at..at, extra.iter().cloned());
    }
}

/// Immutable worker lookup table, built once from configuration.
#[derive(Debug, Clone)]
pub struct WorkerRegistry {
    templates: BTreeMap<WorkerKind, InvocationTemplate>,
}

impl WorkerRegistry {
    pub fn builtin() -> Self {
        let templates = WorkerKind::ALL
            .into_iter()
            .map(|k| (k, InvocationTemplate::builtin(k)))
            .collect();
        Self { templates }
    }

    pub fn from_config(cfg: &AppConfig) -> Self {
        let mut registry = Self::builtin();
        for (name, ov) in &cfg.workers {
            let kind = match name.parse::<WorkerKind>() {
                Ok(kind) => kind,
                Err(_) => {
                    tracing::warn!("ignoring override for unknown worker '{}'", name);
                    continue;
                }
            };
            if !ov.enabled {
                registry.templates.remove(&kind);
                continue;
            }
            let Some(template) = registry.templates.get_mut(&kind) else {
                continue;
            };
            if let Some(exe) = ov.executable.as_deref().map(str::trim) {
                if !exe.is_empty() {
                    template.executable = exe.to_string();
                }
            }
            if let Some(secs) = ov.timeout_secs {
                template.default_timeout = (secs > 0).then(|| Duration::from_secs(secs));
            }
            template.add_args(&ov.extra_args);
        }
        registry
    }

    pub fn resolve(&self, kind: WorkerKind) -> Result<&InvocationTemplate, ExecutorError> {
        self.templates
            .get(&kind)
            .ok_or_else(|| ExecutorError::UnknownWorker(kind.to_string()))
    }

    /// Parses and resolves a worker name in one step.
    pub fn lookup(&self, name: &str) -> Result<&InvocationTemplate, ExecutorError> {
        self.resolve(name.parse()?)
    }

    pub fn templates(&self) -> impl Iterator<Item = &InvocationTemplate> {
        self.templates.values()
    }
}

impl Default for WorkerRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
