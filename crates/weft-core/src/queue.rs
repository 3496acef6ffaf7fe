//! Job queue port.
//!
//! The engine never executes jobs itself; it hands every task leaf to a
//! [`JobQueue`]. The queue owns scheduling, at-least-once delivery and
//! retries, and runs each job through the runtime bridge.

use chrono::{DateTime, Utc};
use weft_types::error::QueueError;
use weft_types::job::JobPayload;

/// Trait for job queues the engine can enqueue onto.
///
/// Uses RPITIT (native async fn in traits, Rust 2024 edition).
/// Implementations live in weft-infra.
pub trait JobQueue: Send + Sync {
    /// Enqueue a job for immediate execution, or at `at` when given.
    ///
    /// Returns the job id.
    fn enqueue(
        &self,
        job: JobPayload,
        at: Option<DateTime<Utc>>,
    ) -> impl std::future::Future<Output = Result<String, QueueError>> + Send;
}
