//! Core domain errors.

use thiserror::Error;

/// Core domain errors for FleetRun.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Job submission failed validation. Never retried.
    #[error("Invalid job spec: {0}")]
    InvalidSpec(String),

    /// Job not found.
    #[error("Job not found: {0}")]
    JobNotFound(String),

    /// Task not found.
    #[error("Task not found: {0}")]
    TaskNotFound(String),

    /// Worker not found.
    #[error("Worker not found: {0}")]
    WorkerNotFound(String),

    /// The opaque payload failed on the worker.
    #[error("Task {task} failed: {message}")]
    TaskExecutionFailure { task: String, message: String },

    /// Worker was expired by the liveness monitor.
    #[error("Worker unreachable: {0}")]
    WorkerUnreachable(String),

    /// A second terminal report arrived for the same task.
    #[error("Duplicate report for task {0}")]
    DuplicateReport(String),

    /// Invalid state transition.
    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    /// Persistence backend failure.
    #[error("Storage error: {0}")]
    Storage(String),
}

impl CoreError {
    /// Stable machine-readable name of the error kind, used on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidSpec(_) => "InvalidSpec",
            Self::JobNotFound(_) | Self::TaskNotFound(_) | Self::WorkerNotFound(_) => "NotFound",
            Self::TaskExecutionFailure { .. } => "TaskExecutionFailure",
            Self::WorkerUnreachable(_) => "WorkerUnreachable",
            Self::DuplicateReport(_) => "DuplicateReport",
            Self::InvalidStateTransition { .. } => "InvalidStateTransition",
            Self::Storage(_) => "Storage",
        }
    }

    /// Returns true for any of the not-found variants.
    pub fn is_not_found(&self) -> bool {
        self.kind() == "NotFound"
    }
}
