use std::path::{Path, PathBuf};

use super::registry::WorkerKind;

pub const MAX_CONTEXT_FILE_CHARS: usize = 10_000;
const TRUNCATION_MARKER: &str = "\n... (truncated)";

/// Reads `<prompts_dir>/<kind>.md`, if present.
pub fn load_system_prompt(prompts_dir: Option<&Path>, kind: WorkerKind) -> Option<String> {
    let path = prompts_dir?.join(format!("{kind}.md"));
    match std::fs::read_to_string(&path) {
        Ok(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Ok(_) => None,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => {
            tracing::warn!("failed to read system prompt {}: {}", path.display(), e);
            None
        }
    }
}

pub fn resolve_context_path(working_dir: &Path, raw: &str) -> PathBuf {
    let p = crate::config::expand_path(raw);
    if p.is_absolute() {
        p
    } else {
        working_dir.join(p)
    }
}

fn truncate_chars(content: &str, max: usize) -> String {
    match content.char_indices().nth(max) {
        Some((idx, _)) => format!("{}{}", &content[..idx], TRUNCATION_MARKER),
        None => content.to_string(),
    }
}

/// Assembles the text handed to a worker.
///
/// Sections are joined by blank lines: system prompt, `Task:`, then the
/// readable context files. Unreadable files are skipped.
pub fn build_prompt(
    system_prompt: Option<&str>,
    task: &str,
    context_files: &[String],
    working_dir: &Path,
) -> String {
    let mut parts: Vec<String> = Vec::new();
    if let Some(sys) = system_prompt {
        parts.push(sys.to_string());
    }
    parts.push(format!("Task:\n{task}"));

    let mut files = Vec::new();
    for raw in context_files {
        let path = resolve_context_path(working_dir, raw);
        match std::fs::read_to_string(&path) {
            Ok(content) => files.push(format!(
                "--- {} ---\n{}",
                raw,
                truncate_chars(&content, MAX_CONTEXT_FILE_CHARS)
            )),
            Err(e) => {
                tracing::warn!("skipping context file {}: {}", path.display(), e);
            }
        }
    }
    if !files.is_empty() {
        parts.push(format!("Relevant files:\n\n{}", files.join("\n\n")));
    }

    parts.join("\n\n")
}
