use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ExecutorError;
use crate::store::{Device, Priority, TaskSpec};
use crate::worker::WorkerKind;

fn default_worker() -> String {
    "cursor".to_string()
}

/// One entry of a batch manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub name: String,
    #[serde(default = "default_worker", alias = "backend")]
    pub worker: String,
    pub prompt: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub device: Option<String>,
    #[serde(default, alias = "depends_on")]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub context_files: Vec<String>,
    #[serde(default)]
    pub working_dir: Option<String>,
    /// Seconds; `0` disables the worker's default timeout.
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub verify: Option<String>,
}

impl TaskDefinition {
    pub fn new(name: impl Into<String>, worker: WorkerKind, prompt: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            worker: worker.to_string(),
            prompt: prompt.into(),
            priority: Priority::default(),
            device: None,
            dependencies: Vec::new(),
            context_files: Vec::new(),
            working_dir: None,
            timeout: None,
            verify: None,
        }
    }

    /// Resolves the worker name and fills the working directory default.
    pub fn to_spec(&self, default_working_dir: &str) -> Result<TaskSpec, ExecutorError> {
        Ok(TaskSpec {
            worker: self.worker.parse()?,
            prompt: self.prompt.clone(),
            context_files: self.context_files.clone(),
            working_dir: self
                .working_dir
                .clone()
                .filter(|d| !d.trim().is_empty())
                .unwrap_or_else(|| default_working_dir.to_string()),
            device: self.device.clone().map(Device::from).unwrap_or_default(),
            timeout_secs: self.timeout,
            verify: self.verify.clone().filter(|v| !v.trim().is_empty()),
            name: Some(self.name.clone()),
            priority: self.priority,
            dependencies: self.dependencies.clone(),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchDefinition {
    #[serde(default)]
    pub name: Option<String>,
    /// Falls back to `scheduler.default_concurrency`.
    #[serde(default)]
    pub concurrency: Option<usize>,
    #[serde(default)]
    pub tasks: Vec<TaskDefinition>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestFormat {
    Yaml,
    Json,
    Toml,
}

impl ManifestFormat {
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref()
        {
            Some("json") => Self::Json,
            Some("toml") => Self::Toml,
            _ => Self::Yaml,
        }
    }
}

impl BatchDefinition {
    pub fn parse(content: &str, format: ManifestFormat) -> Result<Self, ExecutorError> {
        let parsed = match format {
            ManifestFormat::Yaml => {
                serde_yaml::from_str::<Self>(content).map_err(|e| e.to_string())
            }
            ManifestFormat::Json => {
                serde_json::from_str::<Self>(content).map_err(|e| e.to_string())
            }
            ManifestFormat::Toml => toml::from_str::<Self>(content).map_err(|e| e.to_string()),
        };
        parsed.map_err(ExecutorError::InvalidManifest)
    }

    pub fn from_path(path: &Path) -> Result<Self, ExecutorError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ExecutorError::InvalidManifest(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::parse(&content, ManifestFormat::from_path(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const YAML: &str = r#"
name: refactor-auth
concurrency: 2
tasks:
  - name: research
    backend: kimi
    prompt: Find best practices for token rotation
    priority: P1
  - name: implement
    worker: codex
    prompt: Implement rotation
    dependencies: [research]
    context_files: [src/auth.rs]
    verify: cargo test auth
  - name: review
    prompt: Review the change
    depends_on: [implement]
    device: theodolos
    timeout: 0
"#;

    #[test]
    fn parses_yaml_manifest_with_aliases_and_defaults() {
        let def = BatchDefinition::parse(YAML, ManifestFormat::Yaml).unwrap();
        assert_eq!(def.name.as_deref(), Some("refactor-auth"));
        assert_eq!(def.concurrency, Some(2));
        assert_eq!(def.tasks.len(), 3);
        assert_eq!(def.tasks[0].worker, "kimi");
        assert_eq!(def.tasks[0].priority, Priority::P1);
        assert_eq!(def.tasks[1].priority, Priority::P2);
        assert_eq!(def.tasks[2].worker, "cursor");
        assert_eq!(def.tasks[2].dependencies, vec!["implement".to_string()]);

        let spec = def.tasks[2].to_spec("/repo").unwrap();
        assert_eq!(spec.working_dir, "/repo");
        assert_eq!(spec.device, Device::Remote("theodolos".into()));
        assert_eq!(spec.timeout_secs, Some(0));
        assert_eq!(spec.name.as_deref(), Some("review"));
    }

    #[test]
    fn parses_json_and_toml() {
        let json = r#"{"tasks":[{"name":"a","worker":"gemini","prompt":"p"}]}"#;
        let def = BatchDefinition::parse(json, ManifestFormat::Json).unwrap();
        assert_eq!(def.tasks[0].worker, "gemini");

        let toml_src = "[[tasks]]\nname = \"a\"\nworker = \"opencode\"\nprompt = \"p\"\npriority = \"P0\"\n";
        let def = BatchDefinition::parse(toml_src, ManifestFormat::Toml).unwrap();
        assert_eq!(def.tasks[0].priority, Priority::P0);
    }

    #[test]
    fn unknown_worker_surfaces_at_conversion() {
        let mut def = TaskDefinition::new("a", WorkerKind::Codex, "p");
        def.worker = "claude".into();
        assert!(matches!(
            def.to_spec("/"),
            Err(ExecutorError::UnknownWorker(w)) if w == "claude"
        ));
    }

    #[test]
    fn malformed_manifest_is_rejected() {
        let err = BatchDefinition::parse("tasks: [{name: a}]", ManifestFormat::Yaml).unwrap_err();
        assert!(matches!(err, ExecutorError::InvalidManifest(_)));
    }

    #[test]
    fn format_follows_extension() {
        assert_eq!(ManifestFormat::from_path(Path::new("a.JSON")), ManifestFormat::Json);
        assert_eq!(ManifestFormat::from_path(Path::new("a.toml")), ManifestFormat::Toml);
        assert_eq!(ManifestFormat::from_path(Path::new("tasks.yml")), ManifestFormat::Yaml);
    }
}
