use thiserror::Error;

use super::error::RunnerError;
use super::store::StoreError;

/// Coarse error categories, used by front ends to pick exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ErrorCode {
    GeneralError = 1,
    ValidationError = 3,
    NotFound = 10,
    DependencyError = 11,
    CircularDependency = 12,
    BackendError = 20,
    StorageError = 40,
}

impl ErrorCode {
    pub fn as_u16(self) -> u16 {
        self as u16
    }
}

/// Submission and scheduling errors.
///
/// Everything except `Store` and `Runner` is raised synchronously while a
/// submission is validated, before any record is written.
#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("Unknown worker: {0}")]
    UnknownWorker(String),

    #[error("Worker '{worker}' does not accept {option}")]
    UnsupportedOption {
        worker: String,
        option: &'static str,
    },

    #[error("Unknown device: {0}")]
    UnknownDevice(String),

    #[error("Duplicate task id: {0}")]
    DuplicateId(String),

    #[error("Unknown dependency: task '{task}' depends on '{missing}'")]
    UnknownDependency { task: String, missing: String },

    #[error("Circular dependency detected: {}", .0.join(" -> "))]
    CyclicDependency(Vec<String>),

    #[error("Batch has no tasks")]
    EmptyBatch,

    #[error("Invalid batch manifest: {0}")]
    InvalidManifest(String),

    #[error("Batch {0} already has a live driver")]
    BatchAlreadyRunning(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Runner error: {0}")]
    Runner(#[from] RunnerError),
}

impl ExecutorError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::UnknownWorker(_)
            | Self::UnsupportedOption { .. }
            | Self::UnknownDevice(_)
            | Self::DuplicateId(_)
            | Self::EmptyBatch
            | Self::InvalidManifest(_) => ErrorCode::ValidationError,
            Self::UnknownDependency { .. } => ErrorCode::DependencyError,
            Self::CyclicDependency(_) => ErrorCode::CircularDependency,
            Self::BatchAlreadyRunning(_) => ErrorCode::GeneralError,
            Self::Store(StoreError::NotFound(_)) => ErrorCode::NotFound,
            Self::Store(StoreError::DuplicateId(_)) => ErrorCode::ValidationError,
            Self::Store(_) => ErrorCode::StorageError,
            Self::Runner(_) => ErrorCode::BackendError,
        }
    }

    /// True for errors that reject a submission outright.
    pub fn is_validation(&self) -> bool {
        matches!(
            self.error_code(),
            ErrorCode::ValidationError | ErrorCode::DependencyError | ErrorCode::CircularDependency
        )
    }
}
