mod render;
mod service;

pub use render::{render_batch, render_summary, render_task, render_task_list, to_json, TAIL_LINES};
pub use service::{BatchStatus, BatchView, MemberView, QueryService, Summary};
