mod ids;
mod ring_bytes;

pub use ids::{is_safe_id, new_batch_id, new_task_id};
pub use ring_bytes::RingBytes;
