mod command;
mod prompt;
mod registry;

pub use command::{shell_quote, CommandBuilder};
pub use prompt::{build_prompt, load_system_prompt, resolve_context_path, MAX_CONTEXT_FILE_CHARS};
pub use registry::{
    InvocationTemplate, WorkerKind, WorkerRegistry, MCP_CONFIG_PLACEHOLDER, PROMPT_PLACEHOLDER,
    WORKDIR_PLACEHOLDER,
};
