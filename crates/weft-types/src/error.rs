use thiserror::Error;

/// Construction errors for workflow trees (non-retryable).
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("task target must be non-empty")]
    EmptyTarget,

    #[error("task '{target}' uses reserved option key '{key}'")]
    ReservedOption { target: String, key: String },

    #[error("accumulated delay of {delay_ms}ms is out of range")]
    DelayOutOfRange { delay_ms: u64 },
}

/// Errors from shared-store operations (used by trait definitions in weft-core).
///
/// Every variant is a transient failure from the engine's point of view: the
/// current job attempt fails and the queue's retry policy re-runs it.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("key '{key}' holds a {actual} value, expected {expected}")]
    WrongType {
        key: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Errors from job queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue is closed")]
    Closed,

    #[error("enqueue failed: {0}")]
    Enqueue(String),
}
