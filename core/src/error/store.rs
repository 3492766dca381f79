use thiserror::Error;

use crate::store::{BatchState, TaskStatus};

/// Errors raised by task record stores.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("record already exists: {0}")]
    DuplicateId(String),

    #[error("record not found: {0}")]
    NotFound(String),

    #[error("invalid status transition for {id}: {from} -> {to}")]
    InvalidTransition {
        id: String,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("invalid batch state transition for {id}: {from} -> {to}")]
    InvalidBatchTransition {
        id: String,
        from: BatchState,
        to: BatchState,
    },

    #[error("batch {id} is driven by live process {pid}")]
    LeaseHeld { id: String, pid: u32 },

    #[error("unsafe record id: {0}")]
    InvalidId(String),

    #[error("result already written for {0}")]
    ResultAlreadyWritten(String),

    #[error("terminal status {status} for {id} requires a result")]
    MissingResult { id: String, status: TaskStatus },

    #[error("non-terminal status {status} for {id} cannot carry a result")]
    UnexpectedResult { id: String, status: TaskStatus },

    #[error("store io error at {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("record encoding error: {0}")]
    Serde(#[from] serde_json::Error),
}
