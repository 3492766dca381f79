mod memory;
mod traits;
mod types;

pub use memory::MemoryTaskStore;
pub use traits::TaskStore;
pub use traits::{sort_batches, sort_records};
pub use types::{
    BatchMember, BatchPatch, BatchRecord, BatchState, Device, DriverLease, FailureKind, LeaseChange,
    Priority, TaskFilter, TaskPatch, TaskRecord, TaskResult, TaskSpec, TaskStatus,
};
