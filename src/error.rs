use thiserror::Error;

use crate::bench::BenchError;
use crate::scheduler::JobState;
use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Job {0} already exists")]
    Conflict(String),

    #[error("Another job is in progress")]
    Busy,

    #[error("Job {id} is not {expected} (current: {actual})")]
    InvalidState {
        id: String,
        expected: JobState,
        actual: JobState,
    },

    #[error("Invalid artifact key: {0}")]
    InvalidKey(String),

    #[error("Invalid job id: {0:?}")]
    InvalidJobId(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("No such workload: {0}")]
    UnknownWorkload(String),

    #[error("No such database: {0}")]
    UnknownDatabase(String),

    #[error("Failed to initialize job: {0}")]
    InitializationFailed(#[source] BenchError),

    #[error("Store error: {0}")]
    Store(#[source] StoreError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl WorkerError {
    /// Stable machine-readable name reported alongside the message.
    pub fn code(&self) -> &'static str {
        match self {
            WorkerError::NotFound(_) => "not_found",
            WorkerError::Conflict(_) => "conflict",
            WorkerError::Busy => "busy",
            WorkerError::InvalidState { .. } => "invalid_state",
            WorkerError::InvalidKey(_) => "invalid_key",
            WorkerError::InvalidJobId(_) => "invalid_job_id",
            WorkerError::InvalidRequest(_) => "invalid_request",
            WorkerError::UnknownWorkload(_) => "unknown_workload",
            WorkerError::UnknownDatabase(_) => "unknown_database",
            WorkerError::InitializationFailed(_) => "initialization_failed",
            WorkerError::Store(_) | WorkerError::Internal(_) => "internal",
        }
    }
}

impl From<StoreError> for WorkerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => WorkerError::NotFound(id),
            StoreError::AlreadyExists(id) => WorkerError::Conflict(id),
            StoreError::InvalidKey(key) => WorkerError::InvalidKey(key),
            other => WorkerError::Store(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, WorkerError>;
