//! Error taxonomy for the scan orchestration core.
//!
//! The variants follow the propagation rule: anything retryable or isolated
//! to one sub-task must not fail the owning main task. `Fatal` is reserved
//! for start-up misconfiguration, where the process exits non-zero.

/// Dragnet domain errors.
#[derive(Debug, thiserror::Error)]
pub enum DragnetError {
    /// Malformed config or target, surfaced to the API caller as code 400.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Store or RPC unreachable; retried with backoff before surfacing.
    #[error("transport error: {0}")]
    Transport(String),

    /// In-memory queue full with nothing droppable below the incoming band.
    #[error("queue full, task {0} rejected")]
    QueueFull(String),

    /// Sub-task execution raised or timed out; terminal for that sub-task only.
    #[error("engine failure for task {task_id}: {message}")]
    Engine { task_id: String, message: String },

    /// Recovery path failed to requeue an orphaned sub-task.
    #[error("recovery error: {0}")]
    Recovery(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Misconfiguration at start-up; the process exits non-zero.
    #[error("fatal: {0}")]
    Fatal(String),
}

/// Result type for Dragnet domain operations.
pub type Result<T> = std::result::Result<T, DragnetError>;
